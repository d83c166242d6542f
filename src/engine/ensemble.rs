//! Ensemble classifier voter.
//!
//! Holds three trained classifier families per category and combines their
//! votes into an independent, model-based confidence signal. Gradient
//! boosting is trusted slightly more than the forest, logistic regression
//! slightly less. Trained artifacts live in the `ensemble_models` table and
//! are cached in-process; retraining a category invalidates its cache entry.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::db::models::{BetCategory, EnsembleModelRecord, TrainingSample};
use crate::db::Database;
use crate::engine::features;
use crate::engine::models::{
    self, evaluate, train_test_split, GradientBoosting, LogisticRegression, ModelArtifact,
    ModelMetrics, RandomForest, TrainError,
};

/// The three model families and their fixed relative trust weights.
pub const MODEL_SPECS: [(&str, f64); 3] = [
    (models::RANDOM_FOREST, 1.0),
    (models::GRADIENT_BOOSTING, 1.2),
    (models::LOGISTIC_REGRESSION, 0.8),
];

/// How many of the strongest feature importances are persisted per model.
const TOP_IMPORTANCES: usize = 15;

const CONFIDENCE_MIN: i64 = 30;
const CONFIDENCE_MAX: i64 = 95;

/// One model's vote: its predicted class and the probability it assigns to
/// that class.
#[derive(Debug, Clone)]
pub struct ModelVote {
    pub model: String,
    pub predicts_win: bool,
    pub class_probability: f64,
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct EnsemblePrediction {
    pub predicts_win: bool,
    /// Consensus-boosted confidence in [30, 95].
    pub confidence: i64,
    pub votes: Vec<ModelVote>,
    /// Fraction of models agreeing with the majority class.
    pub agreement: f64,
}

/// Outcome of retraining one category: per-model metrics or the reason the
/// fit was skipped.
pub struct TrainingReport {
    pub category: BetCategory,
    pub sample_count: usize,
    pub outcomes: Vec<(&'static str, Result<ModelMetrics, TrainError>)>,
}

struct LoadedModel {
    name: String,
    weight: f64,
    artifact: ModelArtifact,
}

/// Majority vote with consensus boost. Ties (possible only with an even
/// number of votes) break toward the class with the larger weighted
/// probability mass.
pub fn combine_votes(votes: &[ModelVote]) -> Option<(bool, f64, i64)> {
    if votes.is_empty() {
        return None;
    }

    let win_count = votes.iter().filter(|v| v.predicts_win).count();
    let loss_count = votes.len() - win_count;
    let majority_wins = match win_count.cmp(&loss_count) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => {
            let win_mass: f64 = votes
                .iter()
                .filter(|v| v.predicts_win)
                .map(|v| v.weight * v.class_probability)
                .sum();
            let loss_mass: f64 = votes
                .iter()
                .filter(|v| !v.predicts_win)
                .map(|v| v.weight * v.class_probability)
                .sum();
            win_mass >= loss_mass
        }
    };

    let agreeing = votes
        .iter()
        .filter(|v| v.predicts_win == majority_wins)
        .count();
    let agreement = agreeing as f64 / votes.len() as f64;

    // 2/3 agreement must land in the >=0.67 bucket despite the repeating
    // decimal, so compare with an epsilon.
    let boost = if agreement >= 1.0 - 1e-9 {
        15
    } else if agreement >= 2.0 / 3.0 - 1e-9 {
        8
    } else if agreement >= 0.5 - 1e-9 {
        0
    } else {
        -10
    };

    let total_weight: f64 = votes.iter().map(|v| v.weight).sum();
    let weighted_mean: f64 = votes
        .iter()
        .map(|v| v.weight * v.class_probability)
        .sum::<f64>()
        / total_weight;

    let confidence =
        ((weighted_mean * 100.0).round() as i64 + boost).clamp(CONFIDENCE_MIN, CONFIDENCE_MAX);
    Some((majority_wins, agreement, confidence))
}

pub struct EnsembleVoter {
    db: Database,
    min_training_samples: usize,
    cache: Mutex<HashMap<BetCategory, Arc<Vec<LoadedModel>>>>,
    // Log the missing-models situation once per category, not on every call.
    unavailable_logged: Mutex<HashSet<BetCategory>>,
}

impl EnsembleVoter {
    pub fn new(db: Database, min_training_samples: usize) -> Self {
        EnsembleVoter {
            db,
            min_training_samples,
            cache: Mutex::new(HashMap::new()),
            unavailable_logged: Mutex::new(HashSet::new()),
        }
    }

    /// Train all three families on the category's labeled history and
    /// persist the artifacts. Models that fail to fit are reported, not
    /// fatal; previously stored artifacts for them stay in place.
    pub fn train(&self, category: BetCategory) -> Result<TrainingReport> {
        let samples = self.db.load_training_samples(category)?;
        if samples.len() < self.min_training_samples {
            let outcomes = MODEL_SPECS
                .iter()
                .map(|(name, _)| {
                    (
                        *name,
                        Err(TrainError::InsufficientData {
                            needed: self.min_training_samples,
                            got: samples.len(),
                        }),
                    )
                })
                .collect();
            return Ok(TrainingReport {
                category,
                sample_count: samples.len(),
                outcomes,
            });
        }

        let (xs, ys) = decode_samples(&samples)?;
        let wins = ys.iter().filter(|&&y| y >= 0.5).count();
        let single_class = wins == 0 || wins == ys.len();

        // Seeded so a retrain on identical history reproduces the same
        // split and the same forests.
        let mut rng = StdRng::seed_from_u64(category as u64 * 10_007 + xs.len() as u64);
        let (train_idx, test_idx) = train_test_split(xs.len(), &mut rng);
        let train_xs: Vec<Vec<f64>> = train_idx.iter().map(|&i| xs[i].clone()).collect();
        let train_ys: Vec<f64> = train_idx.iter().map(|&i| ys[i]).collect();
        let test_xs: Vec<Vec<f64>> = test_idx.iter().map(|&i| xs[i].clone()).collect();
        let test_ys: Vec<f64> = test_idx.iter().map(|&i| ys[i]).collect();

        let mut outcomes = Vec::with_capacity(MODEL_SPECS.len());
        for (name, _) in MODEL_SPECS {
            let fitted: Result<ModelArtifact, TrainError> = if single_class {
                Err(TrainError::Fit(
                    "labeled history contains a single outcome class".into(),
                ))
            } else {
                match name {
                    models::RANDOM_FOREST => {
                        RandomForest::fit(&train_xs, &train_ys, &mut rng)
                            .map(ModelArtifact::RandomForest)
                    }
                    models::GRADIENT_BOOSTING => {
                        GradientBoosting::fit(&train_xs, &train_ys, &mut rng)
                            .map(ModelArtifact::GradientBoosting)
                    }
                    _ => LogisticRegression::fit(&train_xs, &train_ys)
                        .map(ModelArtifact::LogisticRegression),
                }
            };

            let outcome = match fitted {
                Ok(artifact) => {
                    let metrics = evaluate(&artifact, &test_xs, &test_ys);
                    self.persist(name, category, &artifact, metrics, samples.len())?;
                    info!(
                        model = name,
                        category = category.as_str(),
                        samples = samples.len(),
                        accuracy = format!("{:.3}", metrics.accuracy),
                        f1 = format!("{:.3}", metrics.f1),
                        "trained ensemble model"
                    );
                    Ok(metrics)
                }
                Err(e) => {
                    warn!(model = name, category = category.as_str(), error = %e, "model fit skipped");
                    Err(e)
                }
            };
            outcomes.push((name, outcome));
        }

        self.invalidate(category);
        Ok(TrainingReport {
            category,
            sample_count: samples.len(),
            outcomes,
        })
    }

    /// Vote on a feature vector with every family that has a trained
    /// artifact for the category. `None` only when no family is trained;
    /// callers treat that as a neutral signal. A family whose fit failed
    /// does not silence the healthy ones.
    pub fn predict(
        &self,
        category: BetCategory,
        features: &[f64],
    ) -> Result<Option<EnsemblePrediction>> {
        let loaded = self.load(category)?;
        if loaded.is_empty() {
            let mut logged = self.unavailable_logged.lock().unwrap();
            if logged.insert(category) {
                info!(
                    category = category.as_str(),
                    "no trained models, confidence passes through unadjusted"
                );
            }
            return Ok(None);
        }

        let votes: Vec<ModelVote> = loaded
            .iter()
            .map(|m| {
                let p = m.artifact.predict_proba(features);
                ModelVote {
                    model: m.name.clone(),
                    predicts_win: p >= 0.5,
                    class_probability: p.max(1.0 - p),
                    weight: m.weight,
                }
            })
            .collect();

        let Some((predicts_win, agreement, confidence)) = combine_votes(&votes) else {
            return Ok(None);
        };
        Ok(Some(EnsemblePrediction {
            predicts_win,
            confidence,
            votes,
            agreement,
        }))
    }

    /// Stored metadata for every trained model of a category.
    pub fn model_records(&self, category: BetCategory) -> Result<Vec<EnsembleModelRecord>> {
        self.db.load_ensemble_models(category)
    }

    fn persist(
        &self,
        name: &str,
        category: BetCategory,
        artifact: &ModelArtifact,
        metrics: ModelMetrics,
        sample_count: usize,
    ) -> Result<()> {
        let importances = artifact
            .feature_importances()
            .map(top_importances)
            .unwrap_or_default();
        let record = EnsembleModelRecord {
            model_name: name.to_string(),
            category: category.as_str().to_string(),
            artifact_json: serde_json::to_string(artifact)?,
            accuracy: metrics.accuracy,
            precision: metrics.precision,
            recall: metrics.recall,
            f1: metrics.f1,
            feature_importances_json: serde_json::to_string(&importances)?,
            sample_count: sample_count as i64,
            trained_at: Utc::now(),
        };
        self.db.upsert_ensemble_model(&record)
    }

    fn load(&self, category: BetCategory) -> Result<Arc<Vec<LoadedModel>>> {
        if let Some(loaded) = self.cache.lock().unwrap().get(&category) {
            return Ok(Arc::clone(loaded));
        }
        let weights: HashMap<&str, f64> = MODEL_SPECS.iter().copied().collect();
        let mut loaded = Vec::new();
        for record in self.db.load_ensemble_models(category)? {
            let Some(&weight) = weights.get(record.model_name.as_str()) else {
                continue;
            };
            let artifact: ModelArtifact = serde_json::from_str(&record.artifact_json)
                .with_context(|| {
                    format!(
                        "corrupt artifact for {}/{}",
                        record.model_name, record.category
                    )
                })?;
            loaded.push(LoadedModel {
                name: record.model_name,
                weight,
                artifact,
            });
        }
        let loaded = Arc::new(loaded);
        self.cache
            .lock()
            .unwrap()
            .insert(category, Arc::clone(&loaded));
        Ok(loaded)
    }

    fn invalidate(&self, category: BetCategory) {
        self.cache.lock().unwrap().remove(&category);
        self.unavailable_logged.lock().unwrap().remove(&category);
    }
}

/// Strongest (name, weight) pairs, descending, zero-weight entries dropped.
fn top_importances(importances: &[f64]) -> Vec<(String, f64)> {
    let names = features::field_names();
    let mut pairs: Vec<(String, f64)> = importances
        .iter()
        .enumerate()
        .filter(|(_, &w)| w > 0.0)
        .map(|(i, &w)| (names[i].to_string(), w))
        .collect();
    pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    pairs.truncate(TOP_IMPORTANCES);
    pairs
}

fn decode_samples(samples: &[TrainingSample]) -> Result<(Vec<Vec<f64>>, Vec<f64>)> {
    let mut xs = Vec::with_capacity(samples.len());
    let mut ys = Vec::with_capacity(samples.len());
    for sample in samples {
        let map: HashMap<String, f64> = serde_json::from_str(&sample.features_json)
            .context("corrupt feature vector in labeled history")?;
        xs.push(features::encode(&map));
        ys.push(if sample.won { 1.0 } else { 0.0 });
    }
    Ok((xs, ys))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Outcome, Prediction};

    fn vote(model: &str, predicts_win: bool, p: f64, weight: f64) -> ModelVote {
        ModelVote {
            model: model.to_string(),
            predicts_win,
            class_probability: p,
            weight,
        }
    }

    #[test]
    fn two_of_three_agreement_gets_the_middle_boost() {
        // Forest and boosting vote win (0.80, 0.75), logistic votes loss
        // with 0.70 for its own class.
        let votes = vec![
            vote(models::RANDOM_FOREST, true, 0.80, 1.0),
            vote(models::GRADIENT_BOOSTING, true, 0.75, 1.2),
            vote(models::LOGISTIC_REGRESSION, false, 0.70, 0.8),
        ];
        let (predicts_win, agreement, confidence) = combine_votes(&votes).unwrap();
        assert!(predicts_win);
        assert!((agreement - 2.0 / 3.0).abs() < 1e-9);
        // Weighted mean: (0.8 + 0.75*1.2 + 0.7*0.8)/3.0 = 0.7533 -> 75 + 8.
        assert_eq!(confidence, 83);
    }

    #[test]
    fn unanimous_votes_get_the_full_boost_and_clamp() {
        let votes = vec![
            vote(models::RANDOM_FOREST, true, 0.90, 1.0),
            vote(models::GRADIENT_BOOSTING, true, 0.92, 1.2),
            vote(models::LOGISTIC_REGRESSION, true, 0.88, 0.8),
        ];
        let (_, agreement, confidence) = combine_votes(&votes).unwrap();
        assert_eq!(agreement, 1.0);
        // ~90 + 15 clamps to 95.
        assert_eq!(confidence, 95);
    }

    #[test]
    fn even_split_breaks_toward_heavier_weighted_mass() {
        let votes = vec![
            vote(models::RANDOM_FOREST, true, 0.60, 1.0),
            vote(models::GRADIENT_BOOSTING, false, 0.60, 1.2),
        ];
        let (predicts_win, agreement, _) = combine_votes(&votes).unwrap();
        assert!(!predicts_win);
        assert!((agreement - 0.5).abs() < 1e-9);
    }

    #[test]
    fn prediction_is_unavailable_with_zero_trained_models() {
        let db = Database::open_in_memory().unwrap();
        let voter = EnsembleVoter::new(db, 50);
        let x = vec![0.0; features::width()];
        assert!(voter.predict(BetCategory::HomeWin, &x).unwrap().is_none());
    }

    fn separable_history_vectors(n: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for i in 0..n {
            let wins = if i % 2 == 0 { 5.0 } else { 0.0 };
            xs.push(features::encode(&HashMap::from([(
                "home_wins_last5".to_string(),
                wins,
            )])));
            ys.push(if i % 2 == 0 { 1.0 } else { 0.0 });
        }
        (xs, ys)
    }

    #[test]
    fn remaining_families_serve_when_one_is_missing() {
        // Only the two tree families have artifacts, as after a logistic
        // regression fit failure: the voter must still serve with both.
        let db = Database::open_in_memory().unwrap();
        let mut rng = StdRng::seed_from_u64(29);
        let (xs, ys) = separable_history_vectors(40);
        let artifacts = [
            (
                models::RANDOM_FOREST,
                ModelArtifact::RandomForest(RandomForest::fit(&xs, &ys, &mut rng).unwrap()),
            ),
            (
                models::GRADIENT_BOOSTING,
                ModelArtifact::GradientBoosting(
                    GradientBoosting::fit(&xs, &ys, &mut rng).unwrap(),
                ),
            ),
        ];
        for (name, artifact) in &artifacts {
            db.upsert_ensemble_model(&EnsembleModelRecord {
                model_name: name.to_string(),
                category: BetCategory::HomeWin.as_str().to_string(),
                artifact_json: serde_json::to_string(artifact).unwrap(),
                accuracy: 1.0,
                precision: 1.0,
                recall: 1.0,
                f1: 1.0,
                feature_importances_json: "[]".to_string(),
                sample_count: 40,
                trained_at: Utc::now(),
            })
            .unwrap();
        }

        let voter = EnsembleVoter::new(db, 50);
        let strong_form =
            features::encode(&HashMap::from([("home_wins_last5".to_string(), 5.0)]));
        let prediction = voter
            .predict(BetCategory::HomeWin, &strong_form)
            .unwrap()
            .expect("two trained families still serve");
        assert_eq!(prediction.votes.len(), 2);
        assert!(prediction.predicts_win);
        // Both trees agree: a two-model unanimous vote, full boost applies.
        assert_eq!(prediction.agreement, 1.0);
    }

    fn seed_labeled_history(db: &Database, category: BetCategory, n: usize) {
        // Winnable when the home side is in form: home_wins_last5 drives the
        // label so all three families can learn it.
        for i in 0..n {
            let wins_last5 = if i % 2 == 0 { 5.0 } else { 0.0 };
            let features_json = serde_json::to_string(&HashMap::from([
                ("home_wins_last5".to_string(), wins_last5),
                ("away_wins_last5".to_string(), (i % 4) as f64),
            ]))
            .unwrap();
            let id = db
                .insert_prediction(&Prediction {
                    id: None,
                    category: category.as_str().to_string(),
                    features_json,
                    odds: 2.0,
                    raw_confidence: 70,
                    confidence: 70,
                    stake_percent: 2.0,
                    expected_value: 5.0,
                    outcome: Outcome::Pending.as_str().to_string(),
                    session: "test".to_string(),
                    created_at: Utc::now(),
                    settled_at: None,
                })
                .unwrap();
            let outcome = if i % 2 == 0 { Outcome::Win } else { Outcome::Loss };
            db.settle_prediction(id, outcome).unwrap();
        }
    }

    #[test]
    fn train_then_predict_round_trip() {
        let db = Database::open_in_memory().unwrap();
        seed_labeled_history(&db, BetCategory::HomeWin, 60);
        let voter = EnsembleVoter::new(db, 50);

        let report = voter.train(BetCategory::HomeWin).unwrap();
        assert_eq!(report.sample_count, 60);
        for (name, outcome) in &report.outcomes {
            assert!(outcome.is_ok(), "{name} failed: {:?}", outcome.as_ref().err());
        }

        let strong_form =
            features::encode(&HashMap::from([("home_wins_last5".to_string(), 5.0)]));
        let prediction = voter
            .predict(BetCategory::HomeWin, &strong_form)
            .unwrap()
            .expect("all three models trained");
        assert!(prediction.predicts_win);
        assert_eq!(prediction.votes.len(), 3);
        assert!(prediction.confidence >= 30 && prediction.confidence <= 95);
    }

    #[test]
    fn insufficient_data_is_reported_per_model() {
        let db = Database::open_in_memory().unwrap();
        seed_labeled_history(&db, BetCategory::Draw, 10);
        let voter = EnsembleVoter::new(db, 50);
        let report = voter.train(BetCategory::Draw).unwrap();
        for (_, outcome) in &report.outcomes {
            assert!(matches!(
                outcome,
                Err(TrainError::InsufficientData { needed: 50, got: 10 })
            ));
        }
    }

    #[test]
    fn retraining_refreshes_the_cache() {
        let db = Database::open_in_memory().unwrap();
        seed_labeled_history(&db, BetCategory::AwayWin, 60);
        let voter = EnsembleVoter::new(db.clone(), 50);
        let x = features::encode(&HashMap::new());

        // Cache the empty state, then train; predictions must now appear.
        assert!(voter.predict(BetCategory::AwayWin, &x).unwrap().is_none());
        voter.train(BetCategory::AwayWin).unwrap();
        assert!(voter.predict(BetCategory::AwayWin, &x).unwrap().is_some());
    }
}
