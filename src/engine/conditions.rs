//! Conditional error learner.
//!
//! Learns which specific, named pre-match conditions correlate with failure
//! for a bet category, independent of the coarse pattern. The adjustment cap
//! is asymmetric: penalties can be twice as large as boosts, because
//! overconfidence is the costlier error.

use anyhow::Result;

use crate::db::models::BetCategory;
use crate::db::Database;
use crate::engine::features::FeatureView;

/// Minimum samples before a condition contributes to the aggregate.
const MIN_SAMPLES: i64 = 5;
/// Conditions with a smaller suggested adjustment are treated as noise.
const MIN_EFFECT: i64 = 3;
/// Samples needed for full trust in a condition's statistics.
const FULL_TRUST_SAMPLES: f64 = 20.0;
/// Aggregate clamp, asymmetric like the per-condition one.
const AGGREGATE_MIN: i64 = -25;
const AGGREGATE_MAX: i64 = 15;

/// Extract the named boolean conditions that currently hold for a match.
pub fn extract_conditions(view: &FeatureView) -> Vec<&'static str> {
    let mut conditions = Vec::new();

    if view.home_injuries() > 8.0 {
        conditions.push("home_many_injuries");
    }
    if view.away_injuries() > 8.0 {
        conditions.push("away_many_injuries");
    }

    let gap = view.position_gap();
    if gap < -5.0 {
        conditions.push("away_higher_position");
    }
    if gap > 5.0 {
        conditions.push("home_higher_position");
    }

    if view.home_wins_last5() < 2.0 {
        conditions.push("poor_home_form");
    }
    if view.away_wins_last5() < 2.0 {
        conditions.push("poor_away_form");
    }
    if view.home_wins_last5() >= 4.0 {
        conditions.push("strong_home_form");
    }
    if view.away_wins_last5() >= 4.0 {
        conditions.push("strong_away_form");
    }

    if view.expected_total_goals() <= 2.0 {
        conditions.push("low_scoring_teams");
    }
    if view.h2h_matches() == 0.0 {
        conditions.push("no_h2h_data");
    }
    if view.home_rest_days() < 3.0 {
        conditions.push("home_tired");
    }
    if view.away_rest_days() < 3.0 {
        conditions.push("away_tired");
    }
    if view.cup_match() {
        conditions.push("cup_match");
    }

    conditions
}

/// Weighted contribution of one condition record: the suggested adjustment
/// scaled by sample trust and rounded. Returns `None` when the record is
/// below its evidence thresholds.
pub fn weighted_contribution(total: i64, suggested_adjustment: i64) -> Option<i64> {
    if total < MIN_SAMPLES || suggested_adjustment.abs() < MIN_EFFECT {
        return None;
    }
    let weight = (total as f64 / FULL_TRUST_SAMPLES).min(1.0);
    Some((suggested_adjustment as f64 * weight).round() as i64)
}

pub struct ConditionLearner {
    db: Database,
}

impl ConditionLearner {
    pub fn new(db: Database) -> Self {
        ConditionLearner { db }
    }

    pub fn update(
        &self,
        category: BetCategory,
        condition: &str,
        won: bool,
        confidence_at_time: i64,
    ) -> Result<()> {
        self.db
            .record_condition_outcome(category, condition, won, confidence_at_time)
    }

    /// Sum the weighted contributions of every currently-true condition with
    /// enough evidence, clamped to [-25, 15], with human-readable reasons.
    pub fn aggregate_adjustment(
        &self,
        category: BetCategory,
        view: &FeatureView,
    ) -> Result<(i64, Vec<String>)> {
        let mut total_adjustment = 0i64;
        let mut reasons = Vec::new();

        for condition in extract_conditions(view) {
            let Some(record) = self.db.get_condition(category, condition)? else {
                continue;
            };
            let Some(contribution) =
                weighted_contribution(record.total, record.suggested_adjustment)
            else {
                continue;
            };
            total_adjustment += contribution;
            let win_rate = record.wins as f64 / record.total as f64 * 100.0;
            reasons.push(format!(
                "{condition}: {:+} ({}/{} won, {:.0}% historically)",
                contribution, record.wins, record.total, win_rate
            ));
        }

        Ok((total_adjustment.clamp(AGGREGATE_MIN, AGGREGATE_MAX), reasons))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::features;
    use std::collections::HashMap;

    fn encode(pairs: &[(&str, f64)]) -> Vec<f64> {
        let map: HashMap<String, f64> =
            pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        features::encode(&map)
    }

    #[test]
    fn extraction_matches_thresholds() {
        let vec = encode(&[
            ("home_injuries", 9.0),
            ("home_position", 16.0),
            ("away_position", 3.0),
            ("home_wins_last5", 1.0),
            ("away_wins_last5", 4.0),
            ("expected_total_goals", 1.8),
            ("h2h_matches", 0.0),
            ("away_rest_days", 2.0),
            ("cup_match_flag", 1.0),
        ]);
        let view = FeatureView::new(&vec);
        let conditions = extract_conditions(&view);
        for expected in [
            "home_many_injuries",
            "away_higher_position",
            "poor_home_form",
            "strong_away_form",
            "low_scoring_teams",
            "no_h2h_data",
            "away_tired",
            "cup_match",
        ] {
            assert!(conditions.contains(&expected), "missing {expected}");
        }
        assert!(!conditions.contains(&"home_tired"));
        assert!(!conditions.contains(&"home_higher_position"));
    }

    #[test]
    fn boundary_values_do_not_trigger() {
        // Exactly 8 injuries, gap of exactly -5, 2 wins, 3 rest days.
        let vec = encode(&[
            ("home_injuries", 8.0),
            ("home_position", 10.0),
            ("away_position", 5.0),
            ("home_wins_last5", 2.0),
            ("away_wins_last5", 2.0),
            ("expected_total_goals", 2.5),
            ("h2h_matches", 3.0),
            ("home_rest_days", 3.0),
            ("away_rest_days", 3.0),
        ]);
        let view = FeatureView::new(&vec);
        assert!(extract_conditions(&view).is_empty());
    }

    #[test]
    fn contribution_requires_evidence_and_effect() {
        assert_eq!(weighted_contribution(4, -10), None); // too few samples
        assert_eq!(weighted_contribution(30, 2), None); // effect too small
        // 10 samples, adjustment -6: weight 0.5 -> -3.
        assert_eq!(weighted_contribution(10, -6), Some(-3));
        // Above full trust the adjustment passes through unscaled.
        assert_eq!(weighted_contribution(40, -6), Some(-6));
    }

    #[test]
    fn aggregate_sums_weighted_contributions_and_clamps() {
        let db = Database::open_in_memory().unwrap();
        let learner = ConditionLearner::new(db);
        // Two failing conditions with 20 samples and 2 wins each:
        // suggested (0.1 - 0.5) * 30 = -12 at full trust.
        for i in 0..20 {
            learner
                .update(BetCategory::HomeWin, "home_many_injuries", i < 2, 75)
                .unwrap();
            learner
                .update(BetCategory::HomeWin, "poor_home_form", i < 2, 75)
                .unwrap();
        }
        let vec = encode(&[("home_injuries", 9.0), ("home_wins_last5", 1.0)]);
        let view = FeatureView::new(&vec);
        let (adjustment, reasons) = learner
            .aggregate_adjustment(BetCategory::HomeWin, &view)
            .unwrap();
        // -12 + -12 = -24, inside the clamp.
        assert_eq!(adjustment, -24);
        assert_eq!(reasons.len(), 2);

        // A third failing condition pushes past the clamp.
        for i in 0..20 {
            learner
                .update(BetCategory::HomeWin, "low_scoring_teams", i < 2, 75)
                .unwrap();
        }
        let vec = encode(&[
            ("home_injuries", 9.0),
            ("home_wins_last5", 1.0),
            ("expected_total_goals", 1.5),
        ]);
        let view = FeatureView::new(&vec);
        let (clamped, _) = learner
            .aggregate_adjustment(BetCategory::HomeWin, &view)
            .unwrap();
        assert_eq!(clamped, -25);
    }

    #[test]
    fn conditions_without_records_are_neutral() {
        let db = Database::open_in_memory().unwrap();
        let learner = ConditionLearner::new(db);
        let vec = encode(&[("home_injuries", 9.0)]);
        let view = FeatureView::new(&vec);
        let (adjustment, reasons) = learner
            .aggregate_adjustment(BetCategory::AwayWin, &view)
            .unwrap();
        assert_eq!(adjustment, 0);
        assert!(reasons.is_empty());
    }
}
