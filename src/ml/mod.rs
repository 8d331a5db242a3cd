//! Machine learning helpers for training and inference.
//!
//! Small, dependency-free trainers used by the pipeline's trainer stages. Every
//! model serializes to JSON so it can live inside a saved pipeline.

pub mod forest;
pub mod gbdt;
pub mod logreg;
pub mod metrics;
pub mod trainer;
pub(crate) mod tree;

pub use tree::{RegressionTree, TreeNode};

/// Numerically stable softmax. Returns a uniform distribution if every input underflows.
pub fn softmax(raw: &[f32]) -> Vec<f32> {
    if raw.is_empty() {
        return Vec::new();
    }
    let max = raw
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, |a, b| a.max(b));
    let mut exps: Vec<f32> = raw.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum == 0.0 || !sum.is_finite() {
        return vec![1.0 / raw.len() as f32; raw.len()];
    }
    for v in &mut exps {
        *v /= sum;
    }
    exps
}

/// Index of the largest value; the first index wins ties. `NaN` entries never win.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        if best.is_none_or(|(_, current)| v > current) {
            best = Some((idx, v));
        }
    }
    best.map(|(idx, _)| idx)
}
