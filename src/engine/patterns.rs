//! Coarse pattern learner.
//!
//! Discretizes a small set of match-context signals into categorical labels
//! and tracks the win rate of each resulting signature. Cardinality is
//! bounded by the discretization scheme, so records are never evicted.

use anyhow::Result;

use crate::db::models::BetCategory;
use crate::db::Database;
use crate::engine::features::FeatureView;

/// Minimum observations before a pattern contributes an adjustment.
const MIN_OBSERVATIONS: i64 = 5;
/// Adjustment cap in confidence points.
const MAX_ADJUSTMENT: i64 = 15;

/// Discretize the match context into a pattern signature. Labels are sorted
/// before concatenation so the key is independent of emission order.
pub fn detect_pattern(view: &FeatureView, category: BetCategory) -> String {
    let mut labels: Vec<&'static str> = Vec::new();

    let gap = view.position_gap();
    labels.push(if gap >= 6.0 {
        "pos:home_much_higher"
    } else if gap >= 2.0 {
        "pos:home_higher"
    } else if gap > -2.0 {
        "pos:equal"
    } else if gap > -6.0 {
        "pos:away_higher"
    } else {
        "pos:away_much_higher"
    });

    if view.home_wins_last5() >= 4.0 {
        labels.push("form:home_hot");
    } else if view.home_wins_last5() <= 1.0 {
        labels.push("form:home_cold");
    }
    if view.away_wins_last5() >= 4.0 {
        labels.push("form:away_hot");
    } else if view.away_wins_last5() <= 1.0 {
        labels.push("form:away_cold");
    }

    if view.h2h_home_wins() >= 3.0 {
        labels.push("h2h:home_dominant");
    } else if view.h2h_away_wins() >= 3.0 {
        labels.push("h2h:away_dominant");
    }

    let goals = view.expected_total_goals();
    if goals >= 3.0 {
        labels.push("goals:high");
    } else if goals <= 2.0 {
        labels.push("goals:low");
    }

    labels.sort_unstable();
    format!("{}|{}", category.as_str(), labels.join(","))
}

/// Adjustment from a win/loss tally: half a point per percent of win rate
/// away from even, capped at ±15.
pub fn adjustment_for(wins: i64, losses: i64) -> i64 {
    let total = wins + losses;
    if total < MIN_OBSERVATIONS {
        return 0;
    }
    let win_rate = wins as f64 / total as f64;
    let raw = ((win_rate - 0.5) * 50.0).round() as i64;
    raw.clamp(-MAX_ADJUSTMENT, MAX_ADJUSTMENT)
}

pub struct PatternLearner {
    db: Database,
}

impl PatternLearner {
    pub fn new(db: Database) -> Self {
        PatternLearner { db }
    }

    pub fn update(&self, pattern: &str, won: bool) -> Result<()> {
        self.db.record_pattern_outcome(pattern, won)
    }

    /// Confidence adjustment for a pattern key, zero below the observation
    /// threshold.
    pub fn adjustment(&self, pattern: &str) -> Result<i64> {
        match self.db.get_pattern(pattern)? {
            Some(record) => Ok(adjustment_for(record.wins, record.losses)),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::features;
    use std::collections::HashMap;

    fn view_for(pairs: &[(&str, f64)]) -> Vec<f64> {
        let map: HashMap<String, f64> =
            pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        features::encode(&map)
    }

    #[test]
    fn pattern_key_is_order_independent_and_category_scoped() {
        let vec = view_for(&[
            ("home_position", 2.0),
            ("away_position", 14.0),
            ("home_wins_last5", 5.0),
            ("away_wins_last5", 1.0),
            ("expected_total_goals", 3.2),
        ]);
        let view = FeatureView::new(&vec);
        let key = detect_pattern(&view, BetCategory::HomeWin);
        assert!(key.starts_with("home_win|"));
        assert!(key.contains("pos:home_much_higher"));
        assert!(key.contains("form:home_hot"));
        assert!(key.contains("form:away_cold"));
        assert!(key.contains("goals:high"));
        // Same context under another category is a different key.
        assert_ne!(key, detect_pattern(&view, BetCategory::TotalsOver));
    }

    #[test]
    fn neutral_context_emits_only_the_position_label() {
        let vec = view_for(&[
            ("home_position", 8.0),
            ("away_position", 9.0),
            ("home_wins_last5", 2.0),
            ("away_wins_last5", 3.0),
            ("expected_total_goals", 2.5),
        ]);
        let view = FeatureView::new(&vec);
        assert_eq!(
            detect_pattern(&view, BetCategory::Draw),
            "draw|pos:equal"
        );
    }

    #[test]
    fn adjustment_requires_five_observations() {
        assert_eq!(adjustment_for(4, 0), 0);
        assert_eq!(adjustment_for(5, 0), 15); // raw +25 capped
        assert_eq!(adjustment_for(0, 5), -15); // raw -25 capped
    }

    #[test]
    fn adjustment_scales_with_win_rate() {
        // 6/10 wins: (0.6 - 0.5) * 50 = +5.
        assert_eq!(adjustment_for(6, 4), 5);
        // 4/10 wins: -5.
        assert_eq!(adjustment_for(4, 6), -5);
        // Even record: 0.
        assert_eq!(adjustment_for(5, 5), 0);
    }

    #[test]
    fn learner_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let learner = PatternLearner::new(db);
        for i in 0..10 {
            learner.update("home_win|pos:equal", i < 7).unwrap();
        }
        // 7/10 wins: +10.
        assert_eq!(learner.adjustment("home_win|pos:equal").unwrap(), 10);
        // Unknown pattern is neutral.
        assert_eq!(learner.adjustment("draw|goals:low").unwrap(), 0);
    }
}
