//! Least-squares gradient-boosted regression trees.
//!
//! Starts from the mean label and fits each tree to the current residuals.
//! Tree leaves already include the learning rate, so prediction is a plain sum.

use serde::{Deserialize, Serialize};

use super::tree::{BinnedMatrix, Histogram, RegressionTree, TreeParams, grow_tree};

/// Boosting hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastTreeOptions {
    pub number_of_trees: usize,
    pub number_of_leaves: usize,
    pub minimum_example_count_per_leaf: usize,
    pub learning_rate: f32,
    /// Number of bins used for split search.
    pub bins: usize,
}

impl Default for FastTreeOptions {
    fn default() -> Self {
        Self {
            number_of_trees: 100,
            number_of_leaves: 20,
            minimum_example_count_per_leaf: 10,
            learning_rate: 0.2,
            bins: 64,
        }
    }
}

/// In-memory regression training set.
#[derive(Debug, Clone)]
pub struct RegressionDataset {
    pub feature_len: usize,
    /// Feature matrix, row-major.
    pub x: Vec<Vec<f32>>,
    pub y: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbdtRegressor {
    pub model_version: i64,
    pub feature_len: usize,
    /// Initial prediction before any tree.
    pub bias: f32,
    pub learning_rate: f32,
    pub trees: Vec<RegressionTree>,
}

impl GbdtRegressor {
    pub fn validate(&self) -> Result<(), String> {
        if self.feature_len == 0 {
            return Err("Model has no features".to_string());
        }
        if !self.bias.is_finite() {
            return Err("bias must be finite".to_string());
        }
        for (idx, tree) in self.trees.iter().enumerate() {
            tree.validate().map_err(|err| format!("Tree {idx}: {err}"))?;
        }
        Ok(())
    }

    pub fn predict(&self, features: &[f32]) -> f32 {
        self.bias + self.trees.iter().map(|tree| tree.predict(features)).sum::<f32>()
    }
}

pub fn train_gbdt_regressor(
    dataset: &RegressionDataset,
    options: &FastTreeOptions,
) -> Result<GbdtRegressor, String> {
    if dataset.x.len() != dataset.y.len() {
        return Err("Mismatched X/Y lengths".to_string());
    }
    if dataset.x.is_empty() {
        return Err("Empty dataset".to_string());
    }
    if dataset.feature_len == 0 {
        return Err("Feature vectors are empty".to_string());
    }
    if dataset.x.iter().any(|row| row.len() != dataset.feature_len) {
        return Err("Inconsistent feature row length".to_string());
    }
    if dataset.y.iter().any(|y| !y.is_finite()) {
        return Err("Labels must be finite".to_string());
    }

    let n = dataset.x.len();
    let bias = (dataset.y.iter().map(|&y| y as f64).sum::<f64>() / n as f64) as f32;
    let matrix = BinnedMatrix::build(&dataset.x, dataset.feature_len, options.bins);
    let mut hist = Histogram::new(&matrix);
    let params = TreeParams {
        max_leaves: options.number_of_leaves.max(2),
        min_leaf: options.minimum_example_count_per_leaf.max(1),
        feature_mask: None,
    };

    let mut predictions = vec![bias; n];
    let mut residuals = vec![0.0f32; n];
    let mut trees = Vec::with_capacity(options.number_of_trees);
    for _round in 0..options.number_of_trees {
        for i in 0..n {
            residuals[i] = dataset.y[i] - predictions[i];
        }
        let rows: Vec<u32> = (0..n as u32).collect();
        let tree = grow_tree(
            &matrix,
            &residuals,
            rows,
            &params,
            options.learning_rate,
            &mut hist,
        );
        if tree.leaf_count() < 2 {
            // Nothing left to split on; further rounds would add the same constant.
            trees.push(tree);
            break;
        }
        for i in 0..n {
            predictions[i] += tree.predict(&dataset.x[i]);
        }
        trees.push(tree);
    }

    let model = GbdtRegressor {
        model_version: 1,
        feature_len: dataset.feature_len,
        bias,
        learning_rate: options.learning_rate,
        trees,
    };
    model.validate()?;
    Ok(model)
}
