//! ROI / profitability learner.
//!
//! Tracks staked and returned amounts rather than bare win rate, so the
//! engine stops favouring high-win-rate/low-odds bets that lose money (and
//! vice versa). Realized ROI on a category's "overall" key converts into a
//! bucketed confidence adjustment.

use anyhow::Result;

use crate::db::models::BetCategory;
use crate::db::Database;

/// Reserved condition key aggregating a category regardless of condition.
pub const OVERALL_KEY: &str = "overall";
/// Minimum settled bets on the overall key before ROI influences confidence.
const MIN_BETS: i64 = 15;

/// Bucketed adjustment for a realized ROI percentage. Buckets are half-open
/// on the lower bound: -10.0 falls in [-10, 0), not [-20, -10).
pub fn bucket_adjustment(roi_percent: f64) -> i64 {
    if roi_percent < -20.0 {
        -12
    } else if roi_percent < -10.0 {
        -8
    } else if roi_percent < 0.0 {
        -4
    } else if roi_percent < 10.0 {
        3
    } else if roi_percent < 25.0 {
        6
    } else {
        10
    }
}

pub struct RoiLearner {
    db: Database,
}

impl RoiLearner {
    pub fn new(db: Database) -> Self {
        RoiLearner { db }
    }

    /// Record a settled bet under one condition key. Callers are expected to
    /// also record under [`OVERALL_KEY`]; `record_all` does both.
    pub fn record(
        &self,
        category: BetCategory,
        condition_key: &str,
        won: bool,
        odds: f64,
        stake: f64,
        ev: f64,
    ) -> Result<()> {
        let returned = if won { stake * odds } else { 0.0 };
        self.db
            .record_roi_outcome(category, condition_key, won, stake, returned, odds, ev)
    }

    /// Record a settled bet under every applicable condition key plus the
    /// overall aggregate.
    pub fn record_all(
        &self,
        category: BetCategory,
        condition_keys: &[&str],
        won: bool,
        odds: f64,
        stake: f64,
        ev: f64,
    ) -> Result<()> {
        for key in condition_keys {
            self.record(category, key, won, odds, stake, ev)?;
        }
        self.record(category, OVERALL_KEY, won, odds, stake, ev)
    }

    /// Confidence adjustment from the category's realized overall ROI, with
    /// a human-readable reason. Neutral below the bet threshold.
    pub fn adjustment(&self, category: BetCategory) -> Result<(i64, Option<String>)> {
        let Some(record) = self.db.get_roi(category, OVERALL_KEY)? else {
            return Ok((0, None));
        };
        if record.total_bets < MIN_BETS {
            return Ok((0, None));
        }
        let adjustment = bucket_adjustment(record.roi_percent);
        let reason = format!(
            "realized ROI {:.1}% over {} bets: {:+}",
            record.roi_percent, record.total_bets, adjustment
        );
        Ok((adjustment, Some(reason)))
    }
}
