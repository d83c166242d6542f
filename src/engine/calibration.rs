//! Per-(category, band) confidence calibration.
//!
//! Answers "given we historically claimed X% confidence in category C, how
//! often were we actually right?" and corrects future claims with a
//! multiplicative factor. The factor is stored unclamped for auditability
//! and clamped to [`FACTOR_MIN`, `FACTOR_MAX`] only at the point of use.

use anyhow::Result;

use crate::db::models::BetCategory;
use crate::db::Database;

/// Minimum observations in a band before its factor is applied.
pub const MIN_OBSERVATIONS: i64 = 10;
/// Clamp range applied to the stored factor at use time. The lower bound
/// keeps a zero-win streak from driving confidence to zero.
pub const FACTOR_MIN: f64 = 0.65;
pub const FACTOR_MAX: f64 = 1.35;
/// Output confidence range for every correction layer.
pub const CONFIDENCE_MIN: i64 = 30;
pub const CONFIDENCE_MAX: i64 = 95;

/// A 10-point confidence bucket. Derived on read, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceBand {
    Below60,
    Sixties,
    Seventies,
    EightyPlus,
}

impl ConfidenceBand {
    pub fn for_confidence(confidence: i64) -> ConfidenceBand {
        match (confidence / 10) * 10 {
            n if n < 60 => ConfidenceBand::Below60,
            60 => ConfidenceBand::Sixties,
            70 => ConfidenceBand::Seventies,
            _ => ConfidenceBand::EightyPlus,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfidenceBand::Below60 => "<60",
            ConfidenceBand::Sixties => "60-69",
            ConfidenceBand::Seventies => "70-79",
            ConfidenceBand::EightyPlus => "80-100",
        }
    }

    /// Assumed win rate for the band: (band_low + 5) / 100. The open bands
    /// use 50 and 80 as their low edge.
    pub fn midpoint(&self) -> f64 {
        match self {
            ConfidenceBand::Below60 => 0.55,
            ConfidenceBand::Sixties => 0.65,
            ConfidenceBand::Seventies => 0.75,
            ConfidenceBand::EightyPlus => 0.85,
        }
    }
}

/// Apply a stored factor to a raw confidence: clamp the factor, scale,
/// round, clamp the result to the engine's confidence range.
pub fn apply_factor(raw_confidence: i64, factor: f64) -> i64 {
    let corrected = (raw_confidence as f64 * factor.clamp(FACTOR_MIN, FACTOR_MAX)).round() as i64;
    corrected.clamp(CONFIDENCE_MIN, CONFIDENCE_MAX)
}

pub struct Calibrator {
    db: Database,
}

impl Calibrator {
    pub fn new(db: Database) -> Self {
        Calibrator { db }
    }

    /// Record a settled outcome against the band the raw confidence fell in.
    pub fn record_outcome(
        &self,
        category: BetCategory,
        raw_confidence: i64,
        won: bool,
    ) -> Result<()> {
        let band = ConfidenceBand::for_confidence(raw_confidence);
        self.db
            .record_calibration_outcome(category, band.label(), won, band.midpoint())
    }

    /// Correct a raw confidence using the band's historical accuracy.
    /// Below the observation threshold the input is returned unchanged.
    pub fn calibrate(&self, category: BetCategory, raw_confidence: i64) -> Result<i64> {
        let band = ConfidenceBand::for_confidence(raw_confidence);
        match self.db.get_calibration(category, band.label())? {
            Some(record) if record.predicted_count >= MIN_OBSERVATIONS => {
                Ok(apply_factor(raw_confidence, record.calibration_factor))
            }
            _ => Ok(raw_confidence),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_cover_the_confidence_range() {
        assert_eq!(ConfidenceBand::for_confidence(45).label(), "<60");
        assert_eq!(ConfidenceBand::for_confidence(59).label(), "<60");
        assert_eq!(ConfidenceBand::for_confidence(60).label(), "60-69");
        assert_eq!(ConfidenceBand::for_confidence(69).label(), "60-69");
        assert_eq!(ConfidenceBand::for_confidence(75).label(), "70-79");
        assert_eq!(ConfidenceBand::for_confidence(80).label(), "80-100");
        assert_eq!(ConfidenceBand::for_confidence(95).label(), "80-100");
    }

    #[test]
    fn factor_is_clamped_at_use() {
        // Overconfident band: factor 0.7333 on a claimed 75 gives 55.
        assert_eq!(apply_factor(75, (11.0 / 20.0) / 0.75), 55);
        // Factor 0 (zero-win band) is lifted to 0.65.
        assert_eq!(apply_factor(80, 0.0), 52);
        // Factor above the cap is pulled down to 1.35.
        assert_eq!(apply_factor(60, 2.0), 81);
    }

    #[test]
    fn calibrate_matches_historical_win_rate() {
        let db = Database::open_in_memory().unwrap();
        let calibrator = Calibrator::new(db);
        for i in 0..20 {
            calibrator
                .record_outcome(BetCategory::HomeWin, 75, i < 11)
                .unwrap();
        }
        assert_eq!(calibrator.calibrate(BetCategory::HomeWin, 75).unwrap(), 55);
    }

    #[test]
    fn calibrate_is_a_noop_below_ten_observations() {
        let db = Database::open_in_memory().unwrap();
        let calibrator = Calibrator::new(db);
        // Nine losses: a terrible record, but not enough evidence.
        for _ in 0..9 {
            calibrator
                .record_outcome(BetCategory::Draw, 72, false)
                .unwrap();
        }
        assert_eq!(calibrator.calibrate(BetCategory::Draw, 72).unwrap(), 72);
    }

    #[test]
    fn result_stays_inside_the_confidence_range() {
        assert!(apply_factor(95, 1.35) <= CONFIDENCE_MAX);
        assert!(apply_factor(30, 0.65) >= CONFIDENCE_MIN);
    }
}
