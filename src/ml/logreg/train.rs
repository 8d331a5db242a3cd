use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use super::{LogRegModel, linear, standardize};
use crate::context::MlContext;
use crate::ml::softmax;

/// Training options for the logistic regression head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainOptions {
    pub epochs: usize,
    pub learning_rate: f32,
    pub l2: f32,
    pub batch_size: usize,
    pub balance_classes: bool,
    /// Stop after this many epochs without a better monitored loss; `0` disables.
    pub early_stopping_patience: usize,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: 50,
            learning_rate: 0.05,
            l2: 1e-4,
            batch_size: 10,
            balance_classes: false,
            early_stopping_patience: 10,
        }
    }
}

/// In-memory training dataset for logreg models.
#[derive(Debug, Clone)]
pub struct TrainDataset {
    pub n_classes: usize,
    pub x: Vec<Vec<f32>>,
    pub y: Vec<usize>,
}

/// Loss and accuracy reported after each epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochMetrics {
    /// 1-based epoch number.
    pub epoch: usize,
    pub train_loss: f32,
    pub train_accuracy: f32,
    pub validation_loss: Option<f32>,
    pub validation_accuracy: Option<f32>,
}

/// Train a softmax regression model.
///
/// The returned model holds the weights of the epoch with the lowest monitored
/// loss: validation loss when `validation` is given, training loss otherwise.
pub fn train_logreg(
    dataset: &TrainDataset,
    validation: Option<&TrainDataset>,
    options: &TrainOptions,
    ctx: &MlContext,
    on_epoch: &mut dyn FnMut(&EpochMetrics),
) -> Result<LogRegModel, String> {
    check_dataset(dataset, None)?;
    let dim = dataset.x[0].len();
    if let Some(validation) = validation {
        if !validation.x.is_empty() {
            check_dataset(validation, Some(dim))?;
        }
    }
    let classes = dataset.n_classes;

    let (feature_mean, feature_std) = feature_stats(&dataset.x, dim);
    let x: Vec<Vec<f32>> = dataset
        .x
        .iter()
        .map(|row| standardize(row, &feature_mean, &feature_std))
        .collect();
    let validation = validation.filter(|v| !v.x.is_empty()).map(|v| {
        let x: Vec<Vec<f32>> = v
            .x
            .iter()
            .map(|row| standardize(row, &feature_mean, &feature_std))
            .collect();
        (x, v.y.clone())
    });

    let mut rng = ctx.rng(0x10_96);
    let mut weights = vec![0.0f32; classes * dim];
    let mut bias = vec![0.0f32; classes];
    for w in &mut weights {
        *w = (rng.random::<f32>() - 0.5) * 0.01;
    }

    let mut indices: Vec<usize> = (0..x.len()).collect();
    let batch_size = options.batch_size.max(1);
    let lr = options.learning_rate;
    let l2 = options.l2.max(0.0);
    let class_weights = class_weights(&dataset.y, classes, options.balance_classes);

    let mut best: Option<(f32, Vec<f32>, Vec<f32>)> = None;
    let mut epochs_without_improvement = 0usize;
    for epoch in 0..options.epochs {
        indices.shuffle(&mut rng);
        for chunk in indices.chunks(batch_size) {
            let mut grad_w = vec![0.0f32; weights.len()];
            let mut grad_b = vec![0.0f32; bias.len()];
            let mut batch_weight = 0.0f32;
            for &idx in chunk {
                let row = &x[idx];
                let y = dataset.y[idx];
                let weight = class_weights[y];
                if weight == 0.0 {
                    continue;
                }
                let probs = softmax(&linear(row, &weights, &bias, dim));
                for c in 0..classes {
                    let diff = probs[c] - if c == y { 1.0 } else { 0.0 };
                    let base = c * dim;
                    for i in 0..dim {
                        grad_w[base + i] += diff * row[i] * weight;
                    }
                    grad_b[c] += diff * weight;
                }
                batch_weight += weight;
            }
            if batch_weight == 0.0 {
                continue;
            }
            let inv = 1.0 / batch_weight;
            for (idx, w) in weights.iter_mut().enumerate() {
                *w -= lr * (grad_w[idx] * inv + l2 * *w);
            }
            for (b, g) in bias.iter_mut().zip(&grad_b) {
                *b -= lr * g * inv;
            }
        }

        let (train_loss, train_accuracy) = loss_and_accuracy(&x, &dataset.y, &weights, &bias, dim);
        let validation_scores = validation
            .as_ref()
            .map(|(vx, vy)| loss_and_accuracy(vx, vy, &weights, &bias, dim));
        on_epoch(&EpochMetrics {
            epoch: epoch + 1,
            train_loss,
            train_accuracy,
            validation_loss: validation_scores.map(|(loss, _)| loss),
            validation_accuracy: validation_scores.map(|(_, acc)| acc),
        });

        let monitored = validation_scores.map_or(train_loss, |(loss, _)| loss);
        if best.as_ref().is_none_or(|(loss, _, _)| monitored < *loss) {
            best = Some((monitored, weights.clone(), bias.clone()));
            epochs_without_improvement = 0;
        } else {
            epochs_without_improvement += 1;
            if options.early_stopping_patience > 0
                && epochs_without_improvement >= options.early_stopping_patience
            {
                break;
            }
        }
    }

    if let Some((_, best_weights, best_bias)) = best {
        weights = best_weights;
        bias = best_bias;
    }
    let model = LogRegModel {
        model_version: 1,
        input_dim: dim,
        n_classes: classes,
        feature_mean,
        feature_std,
        weights,
        bias,
        temperature: 1.0,
    };
    model.validate()?;
    Ok(model)
}

fn check_dataset(dataset: &TrainDataset, dim: Option<usize>) -> Result<(), String> {
    if dataset.x.is_empty() || dataset.y.is_empty() {
        return Err("Empty training set".to_string());
    }
    if dataset.n_classes == 0 {
        return Err("No classes available for training".to_string());
    }
    if dataset.x.len() != dataset.y.len() {
        return Err("Mismatched training inputs/labels".to_string());
    }
    let dim = dim.unwrap_or(dataset.x[0].len());
    if dim == 0 {
        return Err("Feature vectors are empty".to_string());
    }
    if dataset.x.iter().any(|row| row.len() != dim) {
        return Err("Inconsistent feature row length".to_string());
    }
    if dataset.y.iter().any(|&y| y >= dataset.n_classes) {
        return Err("Label index out of range".to_string());
    }
    Ok(())
}

fn feature_stats(x: &[Vec<f32>], dim: usize) -> (Vec<f32>, Vec<f32>) {
    let n = x.len().max(1) as f64;
    let mut mean = vec![0f64; dim];
    for row in x {
        for (m, &v) in mean.iter_mut().zip(row) {
            if v.is_finite() {
                *m += v as f64;
            }
        }
    }
    mean.iter_mut().for_each(|m| *m /= n);
    let mut var = vec![0f64; dim];
    for row in x {
        for ((s, &v), &m) in var.iter_mut().zip(row).zip(&mean) {
            if v.is_finite() {
                *s += (v as f64 - m).powi(2);
            }
        }
    }
    let std = var
        .into_iter()
        .map(|s| {
            let std = (s / n).sqrt() as f32;
            if std < 1e-6 { 1.0 } else { std }
        })
        .collect();
    (mean.into_iter().map(|m| m as f32).collect(), std)
}

fn class_weights(y: &[usize], classes: usize, balance: bool) -> Vec<f32> {
    if !balance {
        return vec![1.0; classes];
    }
    let mut counts = vec![0f32; classes];
    for &label in y {
        counts[label] += 1.0;
    }
    let total: f32 = counts.iter().sum();
    counts
        .into_iter()
        .map(|count| {
            if count == 0.0 {
                0.0
            } else {
                total / (classes as f32 * count)
            }
        })
        .collect()
}

fn loss_and_accuracy(
    x: &[Vec<f32>],
    y: &[usize],
    weights: &[f32],
    bias: &[f32],
    dim: usize,
) -> (f32, f32) {
    let mut loss = 0f64;
    let mut correct = 0usize;
    for (row, &label) in x.iter().zip(y) {
        let probs = softmax(&linear(row, weights, bias, dim));
        loss -= (probs[label].max(1e-15) as f64).ln();
        if crate::ml::argmax(&probs) == Some(label) {
            correct += 1;
        }
    }
    let n = x.len().max(1);
    ((loss / n as f64) as f32, correct as f32 / n as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs(offset: f32) -> TrainDataset {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..40 {
            let class = i % 2;
            let center = if class == 0 { -2.0 } else { 2.0 };
            let wobble = ((i as f32) * 0.37 + offset).sin() * 0.5;
            x.push(vec![center + wobble, 10.0 + wobble]);
            y.push(class);
        }
        TrainDataset { n_classes: 2, x, y }
    }

    #[test]
    fn separates_blobs_and_reports_each_epoch() {
        let train = blobs(0.0);
        let validation = blobs(1.0);
        let options = TrainOptions {
            epochs: 20,
            early_stopping_patience: 0,
            ..TrainOptions::default()
        };
        let mut seen = Vec::new();
        let model = train_logreg(
            &train,
            Some(&validation),
            &options,
            &MlContext::new(3),
            &mut |m| seen.push(m.clone()),
        )
        .unwrap();
        assert_eq!(seen.len(), 20);
        assert_eq!(seen[0].epoch, 1);
        assert!(seen.iter().all(|m| m.validation_loss.is_some()));
        for (row, &label) in validation.x.iter().zip(&validation.y) {
            assert_eq!(model.predict_class_index(row), label);
        }
    }

    #[test]
    fn early_stopping_ends_before_epoch_budget() {
        // Labels carry no signal, so the loss stalls almost immediately.
        let train = TrainDataset {
            n_classes: 2,
            x: (0..40).map(|i| vec![(i as f32 * 1.7).sin()]).collect(),
            y: (0..40).map(|i| (i / 3) % 2).collect(),
        };
        let options = TrainOptions {
            epochs: 500,
            early_stopping_patience: 2,
            learning_rate: 0.5,
            ..TrainOptions::default()
        };
        let mut epochs = 0;
        train_logreg(&train, Some(&train), &options, &MlContext::new(3), &mut |_| epochs += 1)
            .unwrap();
        assert!(epochs < 500);
    }

    #[test]
    fn rejects_out_of_range_labels() {
        let dataset = TrainDataset {
            n_classes: 2,
            x: vec![vec![1.0]],
            y: vec![5],
        };
        assert!(
            train_logreg(&dataset, None, &TrainOptions::default(), &MlContext::default(), &mut |_| {})
                .is_err()
        );
    }
}
