//! Multinomial logistic regression head for fixed-length feature vectors.

use serde::{Deserialize, Serialize};

use crate::ml::softmax;

mod train;
pub use train::{EpochMetrics, TrainDataset, TrainOptions, train_logreg};

/// Versioned softmax regression model over standardized inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRegModel {
    pub model_version: i64,
    pub input_dim: usize,
    pub n_classes: usize,
    /// Per-feature mean subtracted before the linear layer.
    pub feature_mean: Vec<f32>,
    /// Per-feature scale divided out after centering.
    pub feature_std: Vec<f32>,
    /// Row-major `[n_classes][input_dim]`.
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
    pub temperature: f32,
}

impl LogRegModel {
    /// Validate model dimensions.
    pub fn validate(&self) -> Result<(), String> {
        if self.n_classes == 0 {
            return Err("No classes defined".to_string());
        }
        if self.weights.len() != self.n_classes * self.input_dim {
            return Err("weights length mismatch".to_string());
        }
        if self.bias.len() != self.n_classes {
            return Err("bias length mismatch".to_string());
        }
        if self.feature_mean.len() != self.input_dim || self.feature_std.len() != self.input_dim {
            return Err("standardization length mismatch".to_string());
        }
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err("temperature must be > 0".to_string());
        }
        Ok(())
    }

    pub(crate) fn standardize(&self, input: &[f32]) -> Vec<f32> {
        standardize(input, &self.feature_mean, &self.feature_std)
    }

    pub(crate) fn logits(&self, x: &[f32]) -> Vec<f32> {
        linear(x, &self.weights, &self.bias, self.input_dim)
    }

    /// Compute class probabilities for a single input; empty on a length mismatch.
    pub fn predict_proba(&self, input: &[f32]) -> Vec<f32> {
        if input.len() != self.input_dim {
            return Vec::new();
        }
        let temp = self.temperature.max(1e-6);
        let logits: Vec<f32> = self
            .logits(&self.standardize(input))
            .into_iter()
            .map(|l| l / temp)
            .collect();
        softmax(&logits)
    }

    /// Return the argmax class index for the given input.
    pub fn predict_class_index(&self, input: &[f32]) -> usize {
        crate::ml::argmax(&self.predict_proba(input)).unwrap_or(0)
    }
}

fn standardize(input: &[f32], mean: &[f32], std: &[f32]) -> Vec<f32> {
    input
        .iter()
        .zip(mean.iter().zip(std))
        .map(|(&v, (&m, &s))| {
            let v = if v.is_finite() { v } else { m };
            (v - m) / s
        })
        .collect()
}

fn linear(x: &[f32], weights: &[f32], bias: &[f32], dim: usize) -> Vec<f32> {
    bias.iter()
        .enumerate()
        .map(|(c, &b)| {
            let row = &weights[c * dim..(c + 1) * dim];
            b + row.iter().zip(x).map(|(w, v)| w * v).sum::<f32>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_model_is_uniform() {
        let model = LogRegModel {
            model_version: 1,
            input_dim: 3,
            n_classes: 4,
            feature_mean: vec![0.0; 3],
            feature_std: vec![1.0; 3],
            weights: vec![0.0; 12],
            bias: vec![0.0; 4],
            temperature: 1.0,
        };
        model.validate().unwrap();
        let out = model.predict_proba(&[1.0, 2.0, 3.0]);
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|p| (p - 0.25).abs() < 1e-6));
        assert!(model.predict_proba(&[1.0]).is_empty());
    }
}
