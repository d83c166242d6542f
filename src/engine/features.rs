//! Fixed feature schema and deterministic vector encoding.
//!
//! The same ordered schema is used for training and for inference. Every
//! field has a default, so encoding never fails: missing keys take their
//! default and unknown keys are ignored. Learners read fields through
//! [`FeatureView`] accessors rather than string lookups, so a typo cannot
//! silently diverge the training and inference paths.

use std::collections::HashMap;

/// One named field in the schema: its key in the upstream feature map and
/// the value used when the key is absent.
pub struct FieldSpec {
    pub name: &'static str,
    pub default: f64,
}

const fn field(name: &'static str, default: f64) -> FieldSpec {
    FieldSpec { name, default }
}

/// The full ordered schema. Vector position i always corresponds to
/// `SCHEMA[i]`; appending is safe, reordering is not.
pub const SCHEMA: &[FieldSpec] = &[
    // ── Recent form (last 5 matches) ────────────────────────────────────
    field("home_wins_last5", 0.0),
    field("home_draws_last5", 0.0),
    field("home_losses_last5", 0.0),
    field("home_goals_for_last5", 0.0),
    field("home_goals_against_last5", 0.0),
    field("home_form_points_last5", 0.0),
    field("home_win_streak", 0.0),
    field("home_unbeaten_streak", 0.0),
    field("home_losing_streak", 0.0),
    field("home_form_trend", 0.0),
    field("away_wins_last5", 0.0),
    field("away_draws_last5", 0.0),
    field("away_losses_last5", 0.0),
    field("away_goals_for_last5", 0.0),
    field("away_goals_against_last5", 0.0),
    field("away_form_points_last5", 0.0),
    field("away_win_streak", 0.0),
    field("away_unbeaten_streak", 0.0),
    field("away_losing_streak", 0.0),
    field("away_form_trend", 0.0),
    // ── League table ────────────────────────────────────────────────────
    field("home_position", 10.0),
    field("away_position", 10.0),
    field("home_points", 0.0),
    field("away_points", 0.0),
    field("home_played", 0.0),
    field("away_played", 0.0),
    field("home_goal_diff", 0.0),
    field("away_goal_diff", 0.0),
    field("home_points_per_game", 1.3),
    field("away_points_per_game", 1.3),
    // ── Implied odds probabilities and line movement ────────────────────
    field("implied_home_prob", 0.40),
    field("implied_draw_prob", 0.25),
    field("implied_away_prob", 0.35),
    field("implied_over25_prob", 0.50),
    field("implied_under25_prob", 0.50),
    field("implied_btts_yes_prob", 0.50),
    field("implied_btts_no_prob", 0.50),
    field("opening_home_odds", 2.5),
    field("current_home_odds", 2.5),
    field("opening_away_odds", 2.9),
    field("current_away_odds", 2.9),
    field("opening_over25_odds", 2.0),
    field("current_over25_odds", 2.0),
    field("line_move_home_flag", 0.0),
    field("line_move_away_flag", 0.0),
    field("line_move_total_flag", 0.0),
    field("sharp_money_flag", 0.0),
    // ── Head-to-head ────────────────────────────────────────────────────
    field("h2h_matches", 0.0),
    field("h2h_home_wins", 0.0),
    field("h2h_away_wins", 0.0),
    field("h2h_draws", 0.0),
    field("h2h_avg_total_goals", 2.5),
    field("h2h_btts_rate", 0.5),
    field("h2h_over25_rate", 0.5),
    field("h2h_last_meeting_days", 365.0),
    field("h2h_home_win_rate_at_home", 0.45),
    // ── Expected goals ──────────────────────────────────────────────────
    field("home_xg_for_avg", 1.3),
    field("home_xg_against_avg", 1.3),
    field("away_xg_for_avg", 1.2),
    field("away_xg_against_avg", 1.4),
    field("expected_total_goals", 2.5),
    field("home_xg_deviation", 0.0),
    field("away_xg_deviation", 0.0),
    field("home_xg_overperformance_flag", 0.0),
    field("away_xg_overperformance_flag", 0.0),
    field("home_shots_per_game", 12.0),
    field("away_shots_per_game", 11.0),
    field("home_shots_on_target_per_game", 4.5),
    field("away_shots_on_target_per_game", 4.0),
    field("home_big_chances_per_game", 1.8),
    field("away_big_chances_per_game", 1.6),
    // ── Injuries, suspensions, key players ──────────────────────────────
    field("home_injuries", 0.0),
    field("away_injuries", 0.0),
    field("home_key_player_injuries", 0.0),
    field("away_key_player_injuries", 0.0),
    field("home_injury_impact", 0.0),
    field("away_injury_impact", 0.0),
    field("home_suspensions", 0.0),
    field("away_suspensions", 0.0),
    field("home_key_player_impact", 1.0),
    field("away_key_player_impact", 1.0),
    // ── Motivation ──────────────────────────────────────────────────────
    field("derby_flag", 0.0),
    field("home_motivation", 0.5),
    field("away_motivation", 0.5),
    field("home_relegation_battle_flag", 0.0),
    field("away_relegation_battle_flag", 0.0),
    field("home_title_race_flag", 0.0),
    field("away_title_race_flag", 0.0),
    field("home_europe_race_flag", 0.0),
    field("away_europe_race_flag", 0.0),
    field("dead_rubber_flag", 0.0),
    // ── Coach ───────────────────────────────────────────────────────────
    field("home_coach_tenure_days", 365.0),
    field("away_coach_tenure_days", 365.0),
    field("home_new_coach_flag", 0.0),
    field("away_new_coach_flag", 0.0),
    field("home_coach_win_rate", 0.40),
    field("away_coach_win_rate", 0.40),
    // ── Scoring tempo ───────────────────────────────────────────────────
    field("home_goals_scored_avg", 1.3),
    field("home_goals_conceded_avg", 1.3),
    field("away_goals_scored_avg", 1.2),
    field("away_goals_conceded_avg", 1.4),
    field("home_btts_rate", 0.5),
    field("away_btts_rate", 0.5),
    field("home_over25_rate", 0.5),
    field("away_over25_rate", 0.5),
    field("home_clean_sheet_rate", 0.3),
    field("away_clean_sheet_rate", 0.25),
    field("home_failed_to_score_rate", 0.25),
    field("away_failed_to_score_rate", 0.3),
    field("home_first_half_goals_avg", 0.6),
    field("away_first_half_goals_avg", 0.55),
    field("home_late_goals_rate", 0.2),
    field("away_late_goals_rate", 0.2),
    // ── Venue splits ────────────────────────────────────────────────────
    field("home_home_wins_last5", 0.0),
    field("home_home_goals_avg", 1.5),
    field("home_home_conceded_avg", 1.2),
    field("home_home_win_rate", 0.45),
    field("away_away_wins_last5", 0.0),
    field("away_away_goals_avg", 1.1),
    field("away_away_conceded_avg", 1.5),
    field("away_away_win_rate", 0.30),
    // ── Opposition-strength scoring ratios ──────────────────────────────
    field("home_points_vs_top_half_ratio", 0.5),
    field("home_points_vs_bottom_half_ratio", 0.5),
    field("away_points_vs_top_half_ratio", 0.5),
    field("away_points_vs_bottom_half_ratio", 0.5),
    field("home_flat_track_bully_score", 0.0),
    field("away_flat_track_bully_score", 0.0),
    // ── Schedule and fatigue ────────────────────────────────────────────
    field("home_rest_days", 7.0),
    field("away_rest_days", 7.0),
    field("home_matches_last_14d", 2.0),
    field("away_matches_last_14d", 2.0),
    field("home_travel_distance_km", 0.0),
    field("away_travel_distance_km", 100.0),
    field("cup_match_flag", 0.0),
    field("midweek_match_flag", 0.0),
    field("season_progress", 0.5),
    // ── Squad quality ───────────────────────────────────────────────────
    field("home_avg_age", 26.0),
    field("away_avg_age", 26.0),
    field("home_squad_value_ratio", 1.0),
    field("away_squad_value_ratio", 1.0),
    field("class_gap_score", 0.0),
    field("home_top_scorer_available_flag", 1.0),
    field("away_top_scorer_available_flag", 1.0),
];

/// Number of fields in the schema (the encoded vector width).
pub fn width() -> usize {
    SCHEMA.len()
}

/// Encode a named-feature map into the fixed-order numeric vector.
///
/// Never fails: missing keys take their default, unknown keys are ignored.
pub fn encode(features: &HashMap<String, f64>) -> Vec<f64> {
    SCHEMA
        .iter()
        .map(|spec| features.get(spec.name).copied().unwrap_or(spec.default))
        .collect()
}

/// Names of the schema fields, in vector order. Used to label feature
/// importances from the tree models.
pub fn field_names() -> Vec<&'static str> {
    SCHEMA.iter().map(|spec| spec.name).collect()
}

/// Typed read access to an encoded vector for the fields the learners
/// consume.
pub struct FeatureView<'a> {
    values: &'a [f64],
}

impl<'a> FeatureView<'a> {
    pub fn new(values: &'a [f64]) -> Self {
        debug_assert_eq!(values.len(), SCHEMA.len(), "vector width != schema width");
        FeatureView { values }
    }

    fn get(&self, name: &str) -> f64 {
        match SCHEMA.iter().position(|spec| spec.name == name) {
            Some(i) => self.values.get(i).copied().unwrap_or(SCHEMA[i].default),
            None => {
                debug_assert!(false, "unknown schema field {name}");
                0.0
            }
        }
    }

    pub fn home_wins_last5(&self) -> f64 {
        self.get("home_wins_last5")
    }
    pub fn away_wins_last5(&self) -> f64 {
        self.get("away_wins_last5")
    }
    pub fn home_position(&self) -> f64 {
        self.get("home_position")
    }
    pub fn away_position(&self) -> f64 {
        self.get("away_position")
    }
    /// Positive when the home side is higher in the table (smaller position
    /// number), negative when the away side is.
    pub fn position_gap(&self) -> f64 {
        self.away_position() - self.home_position()
    }
    pub fn h2h_matches(&self) -> f64 {
        self.get("h2h_matches")
    }
    pub fn h2h_home_wins(&self) -> f64 {
        self.get("h2h_home_wins")
    }
    pub fn h2h_away_wins(&self) -> f64 {
        self.get("h2h_away_wins")
    }
    pub fn expected_total_goals(&self) -> f64 {
        self.get("expected_total_goals")
    }
    pub fn home_injuries(&self) -> f64 {
        self.get("home_injuries")
    }
    pub fn away_injuries(&self) -> f64 {
        self.get("away_injuries")
    }
    pub fn home_rest_days(&self) -> f64 {
        self.get("home_rest_days")
    }
    pub fn away_rest_days(&self) -> f64 {
        self.get("away_rest_days")
    }
    pub fn cup_match(&self) -> bool {
        self.get("cup_match_flag") >= 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_deterministic_regardless_of_key_order() {
        let mut a = HashMap::new();
        a.insert("home_wins_last5".to_string(), 4.0);
        a.insert("away_position".to_string(), 17.0);
        a.insert("expected_total_goals".to_string(), 3.1);

        let mut b = HashMap::new();
        b.insert("expected_total_goals".to_string(), 3.1);
        b.insert("away_position".to_string(), 17.0);
        b.insert("home_wins_last5".to_string(), 4.0);

        assert_eq!(encode(&a), encode(&b));
        assert_eq!(encode(&a), encode(&a));
    }

    #[test]
    fn missing_keys_take_defaults_and_unknown_keys_are_ignored() {
        let mut map = HashMap::new();
        map.insert("definitely_not_a_field".to_string(), 99.0);
        let vec = encode(&map);
        assert_eq!(vec.len(), width());
        let view = FeatureView::new(&vec);
        assert_eq!(view.home_position(), 10.0);
        assert_eq!(view.home_rest_days(), 7.0);
    }

    #[test]
    fn schema_has_no_duplicate_names() {
        let mut names: Vec<&str> = SCHEMA.iter().map(|s| s.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), SCHEMA.len());
    }

    #[test]
    fn view_reads_encoded_values() {
        let mut map = HashMap::new();
        map.insert("home_position".to_string(), 2.0);
        map.insert("away_position".to_string(), 15.0);
        let vec = encode(&map);
        let view = FeatureView::new(&vec);
        assert_eq!(view.position_gap(), 13.0);
    }
}
