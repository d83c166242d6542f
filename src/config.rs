use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

/// Runtime configuration, from CLI arguments or environment variables.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "betlearn",
    about = "Adaptive confidence calibration and ensemble learning engine for bet recommendations"
)]
pub struct Config {
    /// SQLite database path.
    #[arg(long, env = "BETLEARN_DB", default_value = "betlearn.db")]
    pub database_path: String,

    /// Labeled samples required per category before the ensemble trains.
    #[arg(long, env = "BETLEARN_MIN_TRAINING_SAMPLES", default_value_t = 50)]
    pub min_training_samples: usize,

    /// Fractional Kelly multiplier applied to the optimal stake.
    #[arg(long, env = "BETLEARN_KELLY_FRACTION", default_value_t = 0.25)]
    pub kelly_fraction: f64,

    /// Hard ceiling on the recommended stake, in percent of bankroll.
    #[arg(long, env = "BETLEARN_MAX_STAKE_PERCENT", default_value_t = 10.0)]
    pub max_stake_percent: f64,

    /// Retrain a category once its labeled history grows past this multiple
    /// of the sample count at the last training.
    #[arg(long, env = "BETLEARN_RETRAIN_GROWTH_FACTOR", default_value_t = 1.2)]
    pub retrain_growth_factor: f64,

    /// Number of most recent labeled samples used for the accuracy-drift
    /// retraining check.
    #[arg(long, env = "BETLEARN_RECENT_ACCURACY_WINDOW", default_value_t = 20)]
    pub recent_accuracy_window: usize,

    /// Retrain when recent accuracy falls this far below the accuracy
    /// measured at the last training (fraction, not percent).
    #[arg(long, env = "BETLEARN_RECENT_ACCURACY_DROP", default_value_t = 0.15)]
    pub recent_accuracy_drop: f64,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print per-category sample counts, calibration state, and model health.
    Status,
    /// Retrain the ensemble for one category, or all with enough data.
    Retrain {
        /// Bet category (e.g. home_win, totals_over); omit for all.
        category: Option<String>,
    },
    /// Remove duplicate pending predictions.
    Dedupe,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.kelly_fraction) || self.kelly_fraction == 0.0 {
            bail!("kelly_fraction must be in (0.0, 1.0]");
        }
        if self.max_stake_percent <= 0.0 || self.max_stake_percent > 100.0 {
            bail!("max_stake_percent must be in (0.0, 100.0]");
        }
        if self.min_training_samples < 10 {
            bail!("min_training_samples must be at least 10");
        }
        if self.retrain_growth_factor <= 1.0 {
            bail!("retrain_growth_factor must be greater than 1.0");
        }
        if self.recent_accuracy_window == 0 {
            bail!("recent_accuracy_window must be positive");
        }
        if !(0.0..1.0).contains(&self.recent_accuracy_drop) {
            bail!("recent_accuracy_drop must be in [0.0, 1.0)");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::parse_from(["betlearn"]);
        assert!(config.validate().is_ok());
        assert_eq!(config.min_training_samples, 50);
        assert!((config.kelly_fraction - 0.25).abs() < 1e-9);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut config = Config::parse_from(["betlearn"]);
        config.kelly_fraction = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::parse_from(["betlearn"]);
        config.max_stake_percent = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::parse_from(["betlearn"]);
        config.retrain_growth_factor = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_subcommands() {
        let config = Config::parse_from(["betlearn", "retrain", "totals_over"]);
        assert!(matches!(
            config.command,
            Some(Command::Retrain { category: Some(ref c) }) if c == "totals_over"
        ));
    }
}
