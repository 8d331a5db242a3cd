//! Evaluation metrics for classification and regression models.

use serde::{Deserialize, Serialize};

/// Probability floor used by log-loss so a confident miss stays finite.
pub const LOG_LOSS_EPSILON: f64 = 1e-15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Confusion matrix for a `K`-class classifier.
pub struct ConfusionMatrix {
    /// Number of classes.
    pub n_classes: usize,
    /// Row-major `KxK` counts (`truth * K + predicted`).
    pub counts: Vec<u32>,
}

impl ConfusionMatrix {
    /// Create an empty `KxK` confusion matrix.
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            counts: vec![0; n_classes * n_classes],
        }
    }

    pub fn add(&mut self, truth: usize, predicted: usize) {
        if truth >= self.n_classes || predicted >= self.n_classes {
            return;
        }
        let idx = truth * self.n_classes + predicted;
        self.counts[idx] = self.counts[idx].saturating_add(1);
    }

    pub fn get(&self, truth: usize, predicted: usize) -> u32 {
        self.counts[truth * self.n_classes + predicted]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Precision/recall statistics for a single class.
pub struct PerClassStats {
    /// `TP / (TP + FP)`.
    pub precision: f32,
    /// `TP / (TP + FN)`.
    pub recall: f32,
    /// Total number of true examples for the class.
    pub support: u32,
}

/// Compute per-class precision and recall from a confusion matrix.
pub fn precision_recall_by_class(cm: &ConfusionMatrix) -> Vec<PerClassStats> {
    let k = cm.n_classes;
    let mut stats = Vec::with_capacity(k);
    for class_idx in 0..k {
        let tp = cm.get(class_idx, class_idx) as f32;
        let mut fp = 0f32;
        let mut fn_ = 0f32;
        let mut support = 0u32;
        for j in 0..k {
            let v = cm.get(class_idx, j);
            support = support.saturating_add(v);
            if j != class_idx {
                fn_ += v as f32;
            }
        }
        for i in 0..k {
            if i != class_idx {
                fp += cm.get(i, class_idx) as f32;
            }
        }
        let precision = if tp + fp == 0.0 { 0.0 } else { tp / (tp + fp) };
        let recall = if tp + fn_ == 0.0 { 0.0 } else { tp / (tp + fn_) };
        stats.push(PerClassStats {
            precision,
            recall,
            support,
        });
    }
    stats
}

/// Fraction of rows predicted correctly ("micro accuracy").
pub fn accuracy(cm: &ConfusionMatrix) -> f32 {
    let total = cm.total();
    if total == 0 {
        return 0.0;
    }
    let correct: u64 = (0..cm.n_classes).map(|c| cm.get(c, c) as u64).sum();
    correct as f32 / total as f32
}

/// Mean recall over classes that appear in the truth labels.
pub fn macro_accuracy(cm: &ConfusionMatrix) -> f32 {
    let present: Vec<f32> = precision_recall_by_class(cm)
        .into_iter()
        .filter(|stats| stats.support > 0)
        .map(|stats| stats.recall)
        .collect();
    if present.is_empty() {
        return 0.0;
    }
    present.iter().sum::<f32>() / present.len() as f32
}

/// Mean negative log of the probability assigned to the true class.
pub fn log_loss(probabilities: &[Vec<f32>], truth: &[usize]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let total: f64 = probabilities
        .iter()
        .zip(truth)
        .map(|(probs, &label)| {
            let p = probs.get(label).copied().unwrap_or(0.0) as f64;
            -p.clamp(LOG_LOSS_EPSILON, 1.0).ln()
        })
        .sum();
    total / truth.len() as f64
}

/// Log-loss of always predicting the empirical class prior.
pub fn prior_log_loss(truth: &[usize], n_classes: usize) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let mut counts = vec![0usize; n_classes];
    for &label in truth {
        if label < n_classes {
            counts[label] += 1;
        }
    }
    let n = truth.len() as f64;
    counts
        .into_iter()
        .filter(|&c| c > 0)
        .map(|c| {
            let p = c as f64 / n;
            -p * p.ln()
        })
        .sum()
}

/// Relative improvement over the prior: `1 - log_loss / prior_log_loss`.
///
/// With a single-class prior there is nothing to improve on; the result is `0`.
pub fn log_loss_reduction(log_loss: f64, prior: f64) -> f64 {
    if prior <= 0.0 {
        return 0.0;
    }
    1.0 - log_loss / prior
}

/// Fraction of rows whose true class is among the `k` highest scores.
pub fn top_k_accuracy(probabilities: &[Vec<f32>], truth: &[usize], k: usize) -> f32 {
    if truth.is_empty() || k == 0 {
        return 0.0;
    }
    let hits = probabilities
        .iter()
        .zip(truth)
        .filter(|(probs, label)| {
            let Some(&target) = probs.get(**label) else {
                return false;
            };
            let higher = probs.iter().filter(|&&p| p > target).count();
            higher < k
        })
        .count();
    hits as f32 / truth.len() as f32
}

/// Regression quality summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub mean_absolute_error: f64,
    pub mean_squared_error: f64,
    pub root_mean_squared_error: f64,
    /// Mean of the training loss (squared error) over the rows.
    pub loss_function: f64,
    /// Coefficient of determination; `0` when the labels have no variance.
    pub r_squared: f64,
    pub count: usize,
}

impl RegressionMetrics {
    pub fn compute(predictions: &[f32], labels: &[f32]) -> Self {
        let count = predictions.len().min(labels.len());
        if count == 0 {
            return Self {
                mean_absolute_error: 0.0,
                mean_squared_error: 0.0,
                root_mean_squared_error: 0.0,
                loss_function: 0.0,
                r_squared: 0.0,
                count: 0,
            };
        }
        let n = count as f64;
        let mean_label = labels[..count].iter().map(|&y| y as f64).sum::<f64>() / n;
        let mut abs = 0f64;
        let mut sq = 0f64;
        let mut total = 0f64;
        for (&p, &y) in predictions.iter().zip(labels) {
            let diff = p as f64 - y as f64;
            abs += diff.abs();
            sq += diff * diff;
            total += (y as f64 - mean_label).powi(2);
        }
        let mse = sq / n;
        Self {
            mean_absolute_error: abs / n,
            mean_squared_error: mse,
            root_mean_squared_error: mse.sqrt(),
            loss_function: mse,
            r_squared: if total > 0.0 { 1.0 - sq / total } else { 0.0 },
            count,
        }
    }
}
