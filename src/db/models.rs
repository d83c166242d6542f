use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The fixed catalogue of supported bet categories. Every learner keys its
/// state by category; categories never interact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BetCategory {
    HomeWin,
    AwayWin,
    Draw,
    TotalsOver,
    TotalsUnder,
    BothTeamsScore,
    DoubleChance,
    Handicap,
}

impl BetCategory {
    pub const ALL: [BetCategory; 8] = [
        BetCategory::HomeWin,
        BetCategory::AwayWin,
        BetCategory::Draw,
        BetCategory::TotalsOver,
        BetCategory::TotalsUnder,
        BetCategory::BothTeamsScore,
        BetCategory::DoubleChance,
        BetCategory::Handicap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BetCategory::HomeWin => "home_win",
            BetCategory::AwayWin => "away_win",
            BetCategory::Draw => "draw",
            BetCategory::TotalsOver => "totals_over",
            BetCategory::TotalsUnder => "totals_under",
            BetCategory::BothTeamsScore => "btts",
            BetCategory::DoubleChance => "double_chance",
            BetCategory::Handicap => "handicap",
        }
    }

    pub fn parse(s: &str) -> Option<BetCategory> {
        BetCategory::ALL.iter().copied().find(|c| c.as_str() == s)
    }
}

impl std::fmt::Display for BetCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settled state of a recommended bet. `Push` (stake refunded) is excluded
/// from all learning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Win,
    Loss,
    Push,
    Pending,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Win => "win",
            Outcome::Loss => "loss",
            Outcome::Push => "push",
            Outcome::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Option<Outcome> {
        match s {
            "win" => Some(Outcome::Win),
            "loss" => Some(Outcome::Loss),
            "push" => Some(Outcome::Push),
            "pending" => Some(Outcome::Pending),
            _ => None,
        }
    }
}

/// Immutable record of one recommended bet. The outcome is mutated exactly
/// once, when the match settles; rows are never deleted except by explicit
/// deduplication maintenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: Option<i64>,
    pub category: String,
    /// Raw named-feature map as supplied upstream, JSON-encoded. Re-encoded
    /// through the current schema whenever used for training.
    pub features_json: String,
    /// Decimal odds quoted at recommendation time.
    pub odds: f64,
    /// The model's stated confidence before any correction.
    pub raw_confidence: i64,
    /// Final confidence after all correction layers.
    pub confidence: i64,
    /// Recommended stake as percent of bankroll.
    pub stake_percent: f64,
    /// Expected value in percent at recommendation time.
    pub expected_value: f64,
    /// "win" | "loss" | "push" | "pending"
    pub outcome: String,
    /// Requesting session, or "system" for autonomous alerts.
    pub session: String,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Per-(category, confidence-band) historical accuracy.
/// `calibration_factor` is stored unclamped for auditability and clamped to
/// [0.65, 1.35] at the point of use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub category: String,
    pub band: String,
    pub predicted_count: i64,
    pub actual_wins: i64,
    pub calibration_factor: f64,
}

/// Win/loss tally for one coarse pattern signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    pub pattern: String,
    pub wins: i64,
    pub losses: i64,
}

/// Per-(category, condition) win/loss statistics with a suggested
/// confidence adjustment, recomputed on every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionRecord {
    pub category: String,
    pub condition: String,
    pub total: i64,
    pub wins: i64,
    pub losses: i64,
    pub avg_confidence_when_failed: f64,
    pub suggested_adjustment: i64,
}

/// Staked/returned tracking per (category, condition-key). The reserved key
/// "overall" aggregates the category regardless of condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiRecord {
    pub category: String,
    pub condition_key: String,
    pub total_bets: i64,
    pub wins: i64,
    pub losses: i64,
    pub total_staked: f64,
    pub total_returned: f64,
    pub roi_percent: f64,
    pub avg_odds: f64,
    pub avg_ev: f64,
}

/// Trained classifier artifact plus its holdout metrics. Replaced wholesale
/// on retraining; only the latest version is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleModelRecord {
    pub model_name: String,
    pub category: String,
    /// Serialized model (JSON), deserializable into `engine::models::ModelArtifact`.
    pub artifact_json: String,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Top feature importances as JSON `[(name, weight), ...]`; empty for
    /// models without importances.
    pub feature_importances_json: String,
    pub sample_count: i64,
    pub trained_at: DateTime<Utc>,
}

/// One labeled feature-vector/outcome pair used for training.
#[derive(Debug, Clone)]
pub struct TrainingSample {
    pub features_json: String,
    pub won: bool,
}
