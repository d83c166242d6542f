//! The three classifier families behind the ensemble voter: a random
//! forest, gradient-boosted trees, and logistic regression.
//!
//! All three train on the fixed-order feature vectors from
//! `engine::features` and predict the probability that a bet in the given
//! category wins. Artifacts serialize to JSON for storage in the
//! `ensemble_models` table.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const RANDOM_FOREST: &str = "random_forest";
pub const GRADIENT_BOOSTING: &str = "gradient_boosting";
pub const LOGISTIC_REGRESSION: &str = "logistic_regression";

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("insufficient training data: need {needed} labeled samples, have {got}")]
    InsufficientData { needed: usize, got: usize },
    #[error("model fitting failed: {0}")]
    Fit(String),
}

/// Holdout metrics persisted alongside each trained model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// A trained classifier of any family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ModelArtifact {
    RandomForest(RandomForest),
    GradientBoosting(GradientBoosting),
    LogisticRegression(LogisticRegression),
}

impl ModelArtifact {
    /// Probability that the bet wins, in [0, 1].
    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        match self {
            ModelArtifact::RandomForest(m) => m.predict_proba(x),
            ModelArtifact::GradientBoosting(m) => m.predict_proba(x),
            ModelArtifact::LogisticRegression(m) => m.predict_proba(x),
        }
    }

    /// Per-feature importances, normalized to sum to 1. Tree models only.
    pub fn feature_importances(&self) -> Option<&[f64]> {
        match self {
            ModelArtifact::RandomForest(m) => Some(&m.importances),
            ModelArtifact::GradientBoosting(m) => Some(&m.importances),
            ModelArtifact::LogisticRegression(_) => None,
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

// ── Regression trees ─────────────────────────────────────────────────────────
//
// One tree builder serves both tree families: leaves hold the mean target
// of their rows. For 0/1 targets the variance-reduction split criterion
// orders candidate splits identically to Gini impurity, and the leaf mean
// is the class probability; for boosting the targets are pseudo-residuals.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Tree {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Tree>,
        right: Box<Tree>,
    },
}

impl Tree {
    fn predict(&self, x: &[f64]) -> f64 {
        let mut node = self;
        loop {
            match node {
                Tree::Leaf { value } => return *value,
                Tree::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if x[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }
}

struct TreeParams {
    max_depth: usize,
    min_leaf: usize,
    /// Number of randomly chosen candidate features per split; `None` means
    /// consider every feature.
    feature_subsample: Option<usize>,
}

fn leaf_mean(targets: &[f64], rows: &[usize]) -> f64 {
    if rows.is_empty() {
        return 0.5;
    }
    rows.iter().map(|&r| targets[r]).sum::<f64>() / rows.len() as f64
}

/// Best (feature, threshold, SSE gain) over the candidate features, or
/// `None` when no split improves on the parent.
fn best_split(
    xs: &[Vec<f64>],
    targets: &[f64],
    rows: &[usize],
    features: &[usize],
    min_leaf: usize,
) -> Option<(usize, f64, f64)> {
    let n = rows.len() as f64;
    let total_sum: f64 = rows.iter().map(|&r| targets[r]).sum();
    let total_sumsq: f64 = rows.iter().map(|&r| targets[r] * targets[r]).sum();
    let parent_sse = total_sumsq - total_sum * total_sum / n;

    let mut best: Option<(usize, f64, f64)> = None;
    for &feature in features {
        let mut vals: Vec<(f64, f64)> = rows
            .iter()
            .map(|&r| (xs[r][feature], targets[r]))
            .collect();
        vals.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut left_sum = 0.0;
        let mut left_sumsq = 0.0;
        for i in 0..vals.len() - 1 {
            left_sum += vals[i].1;
            left_sumsq += vals[i].1 * vals[i].1;
            if vals[i].0 == vals[i + 1].0 {
                continue;
            }
            let left_n = (i + 1) as f64;
            let right_n = n - left_n;
            if (i + 1) < min_leaf || (vals.len() - i - 1) < min_leaf {
                continue;
            }
            let right_sum = total_sum - left_sum;
            let right_sumsq = total_sumsq - left_sumsq;
            let sse = (left_sumsq - left_sum * left_sum / left_n)
                + (right_sumsq - right_sum * right_sum / right_n);
            let gain = parent_sse - sse;
            if gain > best.map_or(1e-12, |b| b.2) {
                best = Some((feature, (vals[i].0 + vals[i + 1].0) / 2.0, gain));
            }
        }
    }
    best
}

fn build_tree(
    xs: &[Vec<f64>],
    targets: &[f64],
    rows: &[usize],
    depth: usize,
    params: &TreeParams,
    rng: &mut StdRng,
    importances: &mut [f64],
) -> Tree {
    if depth >= params.max_depth || rows.len() < 2 * params.min_leaf {
        return Tree::Leaf {
            value: leaf_mean(targets, rows),
        };
    }

    let n_features = xs[0].len();
    let mut candidates: Vec<usize> = (0..n_features).collect();
    if let Some(m) = params.feature_subsample {
        candidates.shuffle(rng);
        candidates.truncate(m.max(1));
    }

    let Some((feature, threshold, gain)) =
        best_split(xs, targets, rows, &candidates, params.min_leaf)
    else {
        return Tree::Leaf {
            value: leaf_mean(targets, rows),
        };
    };

    importances[feature] += gain;

    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
        rows.iter().partition(|&&r| xs[r][feature] <= threshold);

    Tree::Split {
        feature,
        threshold,
        left: Box::new(build_tree(
            xs,
            targets,
            &left_rows,
            depth + 1,
            params,
            rng,
            importances,
        )),
        right: Box::new(build_tree(
            xs,
            targets,
            &right_rows,
            depth + 1,
            params,
            rng,
            importances,
        )),
    }
}

fn normalize_importances(importances: &mut [f64]) {
    let total: f64 = importances.iter().sum();
    if total > 0.0 {
        for v in importances.iter_mut() {
            *v /= total;
        }
    }
}

// ── Random forest ────────────────────────────────────────────────────────────

const FOREST_TREES: usize = 30;
const FOREST_MAX_DEPTH: usize = 5;
const FOREST_MIN_LEAF: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<Tree>,
    importances: Vec<f64>,
}

impl RandomForest {
    /// Fit on bootstrap samples with per-split feature subsampling
    /// (√n_features candidates per split).
    pub fn fit(xs: &[Vec<f64>], ys: &[f64], rng: &mut StdRng) -> Result<Self, TrainError> {
        let n = xs.len();
        let n_features = xs[0].len();
        let params = TreeParams {
            max_depth: FOREST_MAX_DEPTH,
            min_leaf: FOREST_MIN_LEAF,
            feature_subsample: Some((n_features as f64).sqrt().ceil() as usize),
        };
        let mut importances = vec![0.0; n_features];
        let mut trees = Vec::with_capacity(FOREST_TREES);
        for _ in 0..FOREST_TREES {
            let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            trees.push(build_tree(xs, ys, &rows, 0, &params, rng, &mut importances));
        }
        normalize_importances(&mut importances);
        Ok(RandomForest { trees, importances })
    }

    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        let sum: f64 = self.trees.iter().map(|t| t.predict(x)).sum();
        (sum / self.trees.len() as f64).clamp(0.0, 1.0)
    }
}

// ── Gradient-boosted trees ───────────────────────────────────────────────────

const BOOST_ROUNDS: usize = 60;
const BOOST_LEARNING_RATE: f64 = 0.1;
const BOOST_MAX_DEPTH: usize = 3;
const BOOST_MIN_LEAF: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoosting {
    init_score: f64,
    learning_rate: f64,
    trees: Vec<Tree>,
    importances: Vec<f64>,
}

impl GradientBoosting {
    /// Fit with logistic loss: each round a shallow regression tree is fit
    /// to the pseudo-residuals `y − p` and added with shrinkage.
    pub fn fit(xs: &[Vec<f64>], ys: &[f64], rng: &mut StdRng) -> Result<Self, TrainError> {
        let n = xs.len();
        let n_features = xs[0].len();
        let base_rate = (ys.iter().sum::<f64>() / n as f64).clamp(0.01, 0.99);
        let init_score = (base_rate / (1.0 - base_rate)).ln();

        let params = TreeParams {
            max_depth: BOOST_MAX_DEPTH,
            min_leaf: BOOST_MIN_LEAF,
            feature_subsample: None,
        };
        let all_rows: Vec<usize> = (0..n).collect();
        let mut importances = vec![0.0; n_features];
        let mut scores = vec![init_score; n];
        let mut residuals = vec![0.0; n];
        let mut trees = Vec::with_capacity(BOOST_ROUNDS);

        for _ in 0..BOOST_ROUNDS {
            for i in 0..n {
                residuals[i] = ys[i] - sigmoid(scores[i]);
            }
            let tree = build_tree(xs, &residuals, &all_rows, 0, &params, rng, &mut importances);
            for i in 0..n {
                scores[i] += BOOST_LEARNING_RATE * tree.predict(&xs[i]);
            }
            trees.push(tree);
        }
        normalize_importances(&mut importances);
        Ok(GradientBoosting {
            init_score,
            learning_rate: BOOST_LEARNING_RATE,
            trees,
            importances,
        })
    }

    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        let boosted: f64 = self.trees.iter().map(|t| t.predict(x)).sum();
        sigmoid(self.init_score + self.learning_rate * boosted)
    }
}

// ── Logistic regression ──────────────────────────────────────────────────────

const LOGISTIC_ITERS: usize = 300;
const LOGISTIC_LEARNING_RATE: f64 = 0.1;
const LOGISTIC_L2: f64 = 1e-3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    weights: Vec<f64>,
    bias: f64,
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl LogisticRegression {
    /// Standardized gradient descent with L2 regularization and a decaying
    /// learning rate.
    pub fn fit(xs: &[Vec<f64>], ys: &[f64]) -> Result<Self, TrainError> {
        let n = xs.len() as f64;
        let n_features = xs[0].len();

        let mut means = vec![0.0; n_features];
        let mut stds = vec![0.0; n_features];
        for x in xs {
            for (j, v) in x.iter().enumerate() {
                means[j] += v;
            }
        }
        for m in means.iter_mut() {
            *m /= n;
        }
        for x in xs {
            for (j, v) in x.iter().enumerate() {
                stds[j] += (v - means[j]).powi(2);
            }
        }
        for s in stds.iter_mut() {
            *s = (*s / n).sqrt().max(1e-6);
        }

        let standardized: Vec<Vec<f64>> = xs
            .iter()
            .map(|x| {
                x.iter()
                    .enumerate()
                    .map(|(j, v)| (v - means[j]) / stds[j])
                    .collect()
            })
            .collect();

        let mut weights = vec![0.0; n_features];
        let mut bias = 0.0;
        for iter in 0..LOGISTIC_ITERS {
            let lr = LOGISTIC_LEARNING_RATE / (1.0 + 0.01 * iter as f64);
            let mut grad_w = vec![0.0; n_features];
            let mut grad_b = 0.0;
            for (z, &y) in standardized.iter().zip(ys) {
                let p = sigmoid(dot(&weights, z) + bias);
                let err = p - y;
                for (j, v) in z.iter().enumerate() {
                    grad_w[j] += err * v;
                }
                grad_b += err;
            }
            for j in 0..n_features {
                weights[j] -= lr * (grad_w[j] / n + LOGISTIC_L2 * weights[j]);
            }
            bias -= lr * grad_b / n;
            if !bias.is_finite() || weights.iter().any(|w| !w.is_finite()) {
                return Err(TrainError::Fit("logistic regression diverged".into()));
            }
        }

        Ok(LogisticRegression {
            weights,
            bias,
            means,
            stds,
        })
    }

    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        let z: f64 = x
            .iter()
            .enumerate()
            .map(|(j, v)| self.weights[j] * (v - self.means[j]) / self.stds[j])
            .sum();
        sigmoid(z + self.bias)
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

// ── Evaluation ───────────────────────────────────────────────────────────────

/// Classification metrics at the 0.5 decision threshold.
pub fn evaluate(artifact: &ModelArtifact, xs: &[Vec<f64>], ys: &[f64]) -> ModelMetrics {
    let mut tp = 0.0;
    let mut fp = 0.0;
    let mut tn = 0.0;
    let mut fn_ = 0.0;
    for (x, &y) in xs.iter().zip(ys) {
        let predicted_win = artifact.predict_proba(x) >= 0.5;
        let actual_win = y >= 0.5;
        match (predicted_win, actual_win) {
            (true, true) => tp += 1.0,
            (true, false) => fp += 1.0,
            (false, false) => tn += 1.0,
            (false, true) => fn_ += 1.0,
        }
    }
    let total = tp + fp + tn + fn_;
    let accuracy = if total > 0.0 { (tp + tn) / total } else { 0.0 };
    let precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
    let recall = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 };
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    ModelMetrics {
        accuracy,
        precision,
        recall,
        f1,
    }
}

/// Shuffled 80/20 train/test index split with at least one test row.
pub fn train_test_split(n: usize, rng: &mut StdRng) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    let test_len = (n / 5).max(1);
    let test = indices.split_off(n - test_len);
    (indices, test)
}
