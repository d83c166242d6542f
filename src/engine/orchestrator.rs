//! Orchestrator: the single entry point for both halves of the feedback
//! loop. `finalize` corrects an LLM-stated confidence through every learned
//! layer before a recommendation is shown; `record_outcome` feeds a settled
//! result back into all of them and decides whether to retrain.
//!
//! Confidence flows through the layers in a fixed order, re-clamped to
//! [30, 95] after every step:
//!   ensemble blend -> band calibration -> pattern -> conditions -> ROI

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::models::{
    BetCategory, CalibrationRecord, ConditionRecord, EnsembleModelRecord, Outcome, PatternRecord,
    Prediction,
};
use crate::db::Database;
use crate::engine::calibration::{Calibrator, CONFIDENCE_MAX, CONFIDENCE_MIN};
use crate::engine::conditions::{extract_conditions, ConditionLearner};
use crate::engine::ensemble::{EnsembleVoter, TrainingReport};
use crate::engine::features::{self, FeatureView};
use crate::engine::kelly::{expected_value_percent, kelly_stake};
use crate::engine::patterns::{detect_pattern, PatternLearner};
use crate::engine::roi::RoiLearner;

/// Half the gap between the ensemble's confidence and the raw one, capped.
const BLEND_WEIGHT: f64 = 0.5;
const BLEND_CLAMP: i64 = 15;

/// Blend adjustment toward the ensemble's confidence: half the gap, capped
/// at ±15 so a wildly disagreeing model cannot dominate the raw signal.
pub fn blend_adjustment(ml_confidence: i64, raw_confidence: i64) -> i64 {
    let gap = (ml_confidence - raw_confidence) as f64;
    ((gap * BLEND_WEIGHT).round() as i64).clamp(-BLEND_CLAMP, BLEND_CLAMP)
}

/// Session name used when no requesting session is given.
pub const SYSTEM_SESSION: &str = "system";

/// One stage of the confidence pipeline, for auditability.
#[derive(Debug, Clone)]
pub struct AuditStep {
    pub stage: &'static str,
    pub before: i64,
    pub after: i64,
    pub note: String,
}

/// Result of `finalize`: what the recommendation layer displays.
#[derive(Debug, Clone)]
pub struct FinalizedConfidence {
    pub prediction_id: i64,
    pub confidence: i64,
    /// Expected value of a unit stake, in percent.
    pub expected_value: f64,
    /// Recommended stake as a percentage of bankroll.
    pub stake_percent: f64,
    pub audit_trail: Vec<AuditStep>,
}

/// Per-category snapshot for operator tooling.
#[derive(Debug)]
pub struct CategoryStatus {
    pub category: BetCategory,
    pub labeled: i64,
    pub pending: i64,
    pub calibrations: Vec<CalibrationRecord>,
    /// Conditions ordered by suggested adjustment, most punishing first.
    pub conditions: Vec<ConditionRecord>,
    pub models: Vec<EnsembleModelRecord>,
}

#[derive(Debug)]
pub struct StatusReport {
    pub categories: Vec<CategoryStatus>,
    pub best_patterns: Vec<PatternRecord>,
    pub worst_patterns: Vec<PatternRecord>,
}

pub struct Engine {
    db: Database,
    calibrator: Calibrator,
    patterns: PatternLearner,
    conditions: ConditionLearner,
    roi: RoiLearner,
    ensemble: EnsembleVoter,
    kelly_fraction: f64,
    max_stake_percent: f64,
    min_training_samples: usize,
    retrain_growth_factor: f64,
    recent_accuracy_window: usize,
    recent_accuracy_drop: f64,
}

impl Engine {
    pub fn new(db: Database, config: &Config) -> Self {
        Engine {
            calibrator: Calibrator::new(db.clone()),
            patterns: PatternLearner::new(db.clone()),
            conditions: ConditionLearner::new(db.clone()),
            roi: RoiLearner::new(db.clone()),
            ensemble: EnsembleVoter::new(db.clone(), config.min_training_samples),
            db,
            kelly_fraction: config.kelly_fraction,
            max_stake_percent: config.max_stake_percent,
            min_training_samples: config.min_training_samples,
            retrain_growth_factor: config.retrain_growth_factor,
            recent_accuracy_window: config.recent_accuracy_window,
            recent_accuracy_drop: config.recent_accuracy_drop,
        }
    }

    /// Correct a raw confidence through every learned layer, compute EV and
    /// stake, and persist the pending prediction.
    pub fn finalize(
        &self,
        category: BetCategory,
        raw_confidence: i64,
        feature_map: &HashMap<String, f64>,
        odds: f64,
        session: &str,
    ) -> Result<FinalizedConfidence> {
        let vector = features::encode(feature_map);
        let view = FeatureView::new(&vector);
        let mut trail = Vec::new();

        // 1-2. Ensemble blend; a missing ensemble is a neutral signal. The
        // blend works from the unclamped raw value; only the blended result
        // (and every later additive step) is held to [30, 95].
        let mut confidence = raw_confidence;
        match self.ensemble.predict(category, &vector)? {
            Some(prediction) => {
                let adjustment = blend_adjustment(prediction.confidence, raw_confidence);
                let blended =
                    (raw_confidence + adjustment).clamp(CONFIDENCE_MIN, CONFIDENCE_MAX);
                trail.push(AuditStep {
                    stage: "ensemble",
                    before: confidence,
                    after: blended,
                    note: format!(
                        "ml confidence {} (agreement {:.2}), blend {:+}",
                        prediction.confidence, prediction.agreement, adjustment
                    ),
                });
                confidence = blended;
            }
            None => trail.push(AuditStep {
                stage: "ensemble",
                before: confidence,
                after: confidence,
                note: "no trained models, skipped".to_string(),
            }),
        }

        // 3. Band calibration.
        let calibrated = self.calibrator.calibrate(category, confidence)?;
        trail.push(AuditStep {
            stage: "calibration",
            before: confidence,
            after: calibrated,
            note: format!("band correction {:+}", calibrated - confidence),
        });
        confidence = calibrated;

        // 4. Coarse pattern.
        let pattern = detect_pattern(&view, category);
        let pattern_adjustment = self.patterns.adjustment(&pattern)?;
        let after = (confidence + pattern_adjustment).clamp(CONFIDENCE_MIN, CONFIDENCE_MAX);
        trail.push(AuditStep {
            stage: "pattern",
            before: confidence,
            after,
            note: format!("{pattern}: {pattern_adjustment:+}"),
        });
        confidence = after;

        // 5. Conditional errors.
        let (condition_adjustment, reasons) =
            self.conditions.aggregate_adjustment(category, &view)?;
        let after = (confidence + condition_adjustment).clamp(CONFIDENCE_MIN, CONFIDENCE_MAX);
        trail.push(AuditStep {
            stage: "conditions",
            before: confidence,
            after,
            note: if reasons.is_empty() {
                "no conditions with evidence".to_string()
            } else {
                reasons.join("; ")
            },
        });
        confidence = after;

        // 6. Realized ROI.
        let (roi_adjustment, roi_reason) = self.roi.adjustment(category)?;
        let after = (confidence + roi_adjustment).clamp(CONFIDENCE_MIN, CONFIDENCE_MAX);
        trail.push(AuditStep {
            stage: "roi",
            before: confidence,
            after,
            note: roi_reason.unwrap_or_else(|| "below bet threshold".to_string()),
        });
        confidence = after;

        // 7. EV and fractional-Kelly stake.
        let win_prob = confidence as f64 / 100.0;
        let expected_value = expected_value_percent(win_prob, odds);
        let stake_percent = (kelly_stake(win_prob, odds, self.kelly_fraction) * 100.0)
            .clamp(0.0, self.max_stake_percent);

        let prediction_id = self.db.insert_prediction(&Prediction {
            id: None,
            category: category.as_str().to_string(),
            features_json: serde_json::to_string(feature_map)
                .context("feature map serialization")?,
            odds,
            raw_confidence,
            confidence,
            stake_percent,
            expected_value,
            outcome: Outcome::Pending.as_str().to_string(),
            session: session.to_string(),
            created_at: Utc::now(),
            settled_at: None,
        })?;

        for step in &trail {
            debug!(
                stage = step.stage,
                before = step.before,
                after = step.after,
                note = %step.note,
                "confidence pipeline step"
            );
        }
        info!(
            category = category.as_str(),
            raw = raw_confidence,
            final_confidence = confidence,
            ev = format!("{expected_value:.1}%"),
            stake = format!("{stake_percent:.2}%"),
            prediction_id,
            "finalized recommendation"
        );

        Ok(FinalizedConfidence {
            prediction_id,
            confidence,
            expected_value,
            stake_percent,
            audit_trail: trail,
        })
    }

    /// Feed a settled result into every learner and settle the stored
    /// prediction. Pushes settle without teaching anything; a prediction
    /// can only be settled once, so replays are no-ops.
    pub fn record_outcome(
        &self,
        prediction_id: i64,
        category: BetCategory,
        feature_map: &HashMap<String, f64>,
        raw_confidence: i64,
        odds: f64,
        stake: f64,
        outcome: Outcome,
    ) -> Result<()> {
        if outcome == Outcome::Pending {
            return Ok(());
        }
        let settled = self.db.settle_prediction(prediction_id, outcome)?;
        if !settled {
            debug!(prediction_id, "prediction already settled, skipping");
            return Ok(());
        }
        if outcome == Outcome::Push {
            debug!(prediction_id, "push outcome, stake refunded, nothing learned");
            return Ok(());
        }
        let won = outcome == Outcome::Win;

        // Prefer the values recorded at recommendation time; fall back to
        // the caller's when the prediction was issued out-of-band.
        let stored = self.db.get_prediction(prediction_id)?;
        let (raw_at_time, confidence_at_time, ev) = match &stored {
            Some(p) => (p.raw_confidence, p.confidence, p.expected_value),
            None => (
                raw_confidence,
                raw_confidence,
                expected_value_percent(raw_confidence as f64 / 100.0, odds),
            ),
        };

        let vector = features::encode(feature_map);
        let view = FeatureView::new(&vector);

        // Calibration audits the upstream model's stated confidence, so it
        // accumulates against the raw band, not the corrected one.
        self.calibrator.record_outcome(category, raw_at_time, won)?;
        self.patterns
            .update(&detect_pattern(&view, category), won)?;
        let conditions = extract_conditions(&view);
        for condition in &conditions {
            self.conditions
                .update(category, condition, won, confidence_at_time)?;
        }
        self.roi
            .record_all(category, &conditions, won, odds, stake, ev)?;

        debug!(
            prediction_id,
            category = category.as_str(),
            won,
            conditions = conditions.len(),
            "outcome recorded across all learners"
        );

        if self.should_retrain(category)? {
            info!(category = category.as_str(), "retraining trigger fired");
            self.ensemble.train(category)?;
        }
        Ok(())
    }

    /// Retrain one category unconditionally, or every category that has
    /// reached the minimum sample count.
    pub fn retrain(&self, category: Option<BetCategory>) -> Result<Vec<TrainingReport>> {
        let mut reports = Vec::new();
        match category {
            Some(category) => reports.push(self.ensemble.train(category)?),
            None => {
                for category in BetCategory::ALL {
                    if self.db.labeled_sample_count(category)?
                        >= self.min_training_samples as i64
                    {
                        reports.push(self.ensemble.train(category)?);
                    }
                }
            }
        }
        Ok(reports)
    }

    /// Retrain when the labeled history has outgrown the last training run,
    /// or when recent accuracy has drifted well below the trained accuracy.
    fn should_retrain(&self, category: BetCategory) -> Result<bool> {
        let labeled = self.db.labeled_sample_count(category)?;
        if labeled < self.min_training_samples as i64 {
            return Ok(false);
        }

        let records = self.ensemble.model_records(category)?;
        if records.is_empty() {
            return Ok(true);
        }

        let last_sample_count = records.iter().map(|r| r.sample_count).max().unwrap_or(0);
        if labeled as f64 > self.retrain_growth_factor * last_sample_count as f64 {
            return Ok(true);
        }

        let recent = self
            .db
            .recent_training_samples(category, self.recent_accuracy_window as i64)?;
        if recent.len() < self.recent_accuracy_window {
            return Ok(false);
        }
        let mut correct = 0usize;
        for sample in &recent {
            let map: HashMap<String, f64> = serde_json::from_str(&sample.features_json)
                .context("corrupt feature vector in labeled history")?;
            let vector = features::encode(&map);
            if let Some(prediction) = self.ensemble.predict(category, &vector)? {
                if prediction.predicts_win == sample.won {
                    correct += 1;
                }
            } else {
                return Ok(false);
            }
        }
        let recent_accuracy = correct as f64 / recent.len() as f64;
        let trained_accuracy =
            records.iter().map(|r| r.accuracy).sum::<f64>() / records.len() as f64;
        if trained_accuracy - recent_accuracy > self.recent_accuracy_drop {
            warn!(
                category = category.as_str(),
                trained = format!("{trained_accuracy:.3}"),
                recent = format!("{recent_accuracy:.3}"),
                "accuracy drift detected"
            );
            return Ok(true);
        }
        Ok(false)
    }

    /// Snapshot of every category's learning state for operator tooling.
    pub fn status(&self) -> Result<StatusReport> {
        let mut categories = Vec::with_capacity(BetCategory::ALL.len());
        for category in BetCategory::ALL {
            categories.push(CategoryStatus {
                category,
                labeled: self.db.labeled_sample_count(category)?,
                pending: self.db.pending_sample_count(category)?,
                calibrations: self.db.list_calibrations(category)?,
                conditions: self.db.list_conditions(category)?,
                models: self.db.load_ensemble_models(category)?,
            });
        }
        Ok(StatusReport {
            categories,
            best_patterns: self.db.list_patterns_by_win_rate(5, true, 5)?,
            worst_patterns: self.db.list_patterns_by_win_rate(5, false, 5)?,
        })
    }

    /// Remove duplicate pending predictions, keeping the oldest of each
    /// (category, features, odds) group.
    pub fn dedupe(&self) -> Result<usize> {
        let removed = self.db.dedupe_predictions()?;
        if removed > 0 {
            info!(removed, "removed duplicate pending predictions");
        }
        Ok(removed)
    }
}
