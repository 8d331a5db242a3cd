//! Random-forest binary classifiers and their one-versus-all combination.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use super::tree::{BinnedMatrix, Histogram, RegressionTree, TreeParams, grow_tree};
use crate::context::MlContext;

/// Forest hyperparameters, shared by every per-class forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastForestOptions {
    pub number_of_trees: usize,
    pub number_of_leaves: usize,
    pub minimum_example_count_per_leaf: usize,
    /// Fraction of rows sampled (without replacement) per tree.
    pub bagging_fraction: f32,
    /// Fraction of features a tree may split on.
    pub feature_fraction: f32,
    pub bins: usize,
}

impl Default for FastForestOptions {
    fn default() -> Self {
        Self {
            number_of_trees: 4,
            number_of_leaves: 4,
            minimum_example_count_per_leaf: 1,
            bagging_fraction: 0.7,
            feature_fraction: 1.0,
            bins: 64,
        }
    }
}

/// Binary forest: the score is the mean leaf value, i.e. the positive fraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FastForestBinary {
    pub trees: Vec<RegressionTree>,
}

impl FastForestBinary {
    pub fn predict(&self, features: &[f32]) -> f32 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.trees.iter().map(|tree| tree.predict(features)).sum();
        (sum / self.trees.len() as f32).clamp(0.0, 1.0)
    }
}

/// Labelled multiclass training set. `y[i]` indexes the class list.
#[derive(Debug, Clone)]
pub struct MulticlassDataset {
    pub feature_len: usize,
    pub n_classes: usize,
    pub x: Vec<Vec<f32>>,
    pub y: Vec<usize>,
}

/// One binary forest per class; scores are normalized to sum to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneVersusAllModel {
    pub model_version: i64,
    pub feature_len: usize,
    pub forests: Vec<FastForestBinary>,
}

impl OneVersusAllModel {
    pub fn n_classes(&self) -> usize {
        self.forests.len()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.forests.len() < 2 {
            return Err("Model must contain at least 2 classes".to_string());
        }
        for forest in &self.forests {
            for tree in &forest.trees {
                tree.validate()?;
            }
        }
        Ok(())
    }

    /// Per-class probabilities. Uniform when no forest fires.
    pub fn predict_proba(&self, features: &[f32]) -> Vec<f32> {
        let mut scores: Vec<f32> = self
            .forests
            .iter()
            .map(|forest| forest.predict(features))
            .collect();
        let sum: f32 = scores.iter().sum();
        if sum <= 0.0 || !sum.is_finite() {
            let uniform = 1.0 / scores.len().max(1) as f32;
            scores.iter_mut().for_each(|s| *s = uniform);
        } else {
            scores.iter_mut().for_each(|s| *s /= sum);
        }
        scores
    }
}

pub fn train_one_versus_all(
    dataset: &MulticlassDataset,
    options: &FastForestOptions,
    ctx: &MlContext,
) -> Result<OneVersusAllModel, String> {
    if dataset.x.len() != dataset.y.len() {
        return Err("Mismatched X/Y lengths".to_string());
    }
    if dataset.x.is_empty() {
        return Err("Empty dataset".to_string());
    }
    if dataset.n_classes < 2 {
        return Err("Need at least 2 classes".to_string());
    }
    if dataset.x.iter().any(|row| row.len() != dataset.feature_len) {
        return Err("Inconsistent feature row length".to_string());
    }
    if let Some(bad) = dataset.y.iter().find(|&&y| y >= dataset.n_classes) {
        return Err(format!("Label index {bad} out of range"));
    }

    let matrix = BinnedMatrix::build(&dataset.x, dataset.feature_len, options.bins);
    let mut hist = Histogram::new(&matrix);
    let mut forests = Vec::with_capacity(dataset.n_classes);
    for class_idx in 0..dataset.n_classes {
        let targets: Vec<f32> = dataset
            .y
            .iter()
            .map(|&y| if y == class_idx { 1.0 } else { 0.0 })
            .collect();
        let trees = (0..options.number_of_trees.max(1))
            .map(|tree_idx| {
                let stream = ((class_idx as u64) << 32) | tree_idx as u64;
                fit_bagged_tree(&matrix, &targets, options, ctx, stream, &mut hist)
            })
            .collect();
        forests.push(FastForestBinary { trees });
    }

    let model = OneVersusAllModel {
        model_version: 1,
        feature_len: dataset.feature_len,
        forests,
    };
    model.validate()?;
    Ok(model)
}

fn fit_bagged_tree(
    matrix: &BinnedMatrix,
    targets: &[f32],
    options: &FastForestOptions,
    ctx: &MlContext,
    stream: u64,
    hist: &mut Histogram,
) -> RegressionTree {
    let mut rng = ctx.rng(stream);
    let n = matrix.n_rows();
    let mut rows: Vec<u32> = (0..n as u32).collect();
    let fraction = options.bagging_fraction.clamp(0.0, 1.0);
    if fraction < 1.0 {
        rows.shuffle(&mut rng);
        let keep = ((n as f32 * fraction).ceil() as usize).clamp(1, n);
        rows.truncate(keep);
        rows.sort_unstable();
    }

    let feature_fraction = options.feature_fraction.clamp(0.0, 1.0);
    let feature_mask = (feature_fraction < 1.0).then(|| {
        let mut mask: Vec<bool> = (0..matrix.n_features())
            .map(|_| rng.random::<f32>() < feature_fraction)
            .collect();
        if !mask.iter().any(|&keep| keep) && !mask.is_empty() {
            let idx = rng.random_range(0..mask.len());
            mask[idx] = true;
        }
        mask
    });

    let params = TreeParams {
        max_leaves: options.number_of_leaves.max(2),
        min_leaf: options.minimum_example_count_per_leaf.max(1),
        feature_mask,
    };
    grow_tree(matrix, targets, rows, &params, 1.0, hist)
}
