//! Image classification by transfer learning: frozen backbone plus a trained softmax head.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::backbone::Architecture;
use super::bottleneck::{BottleneckCache, BottleneckSet, fingerprint};
use crate::context::MlContext;
use crate::error::{PipelineError, PipelineResult};
use crate::ml::logreg::{EpochMetrics, LogRegModel, TrainDataset, TrainOptions, train_logreg};
use crate::pipeline::data::{ColumnType, DataView, Row, Schema, Value};
use crate::pipeline::stages::Transformer;
use crate::pipeline::trainers::{PREDICTED_LABEL_COLUMN, SCORE_COLUMN};

/// Receives metrics after every training epoch.
pub type MetricsCallback = Arc<dyn Fn(&EpochMetrics) + Send + Sync>;

/// Settings for [`fit_image_classifier`].
#[derive(Clone)]
pub struct ImageClassificationOptions {
    /// `Bytes` column holding encoded images.
    pub feature_column: String,
    /// `Key` column with the class dictionary.
    pub label_column: String,
    pub architecture: Architecture,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub l2: f32,
    pub early_stopping_patience: usize,
    /// Also report accuracy on the training set once training ends.
    pub test_on_train_set: bool,
    pub reuse_train_set_bottleneck_cached_values: bool,
    pub reuse_validation_set_bottleneck_cached_values: bool,
    /// Where bottleneck caches live; no caching when `None`.
    pub workspace_path: Option<PathBuf>,
    /// Rows already passed through the same pre-processing as the training data.
    pub validation_set: Option<DataView>,
    pub metrics_callback: Option<MetricsCallback>,
}

impl Default for ImageClassificationOptions {
    fn default() -> Self {
        Self {
            feature_column: "Image".to_string(),
            label_column: "LabelAsKey".to_string(),
            architecture: Architecture::default(),
            epochs: 200,
            batch_size: 10,
            learning_rate: 0.01,
            l2: 1e-4,
            early_stopping_patience: 20,
            test_on_train_set: false,
            reuse_train_set_bottleneck_cached_values: true,
            reuse_validation_set_bottleneck_cached_values: true,
            workspace_path: None,
            validation_set: None,
            metrics_callback: None,
        }
    }
}

impl fmt::Debug for ImageClassificationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageClassificationOptions")
            .field("feature_column", &self.feature_column)
            .field("label_column", &self.label_column)
            .field("architecture", &self.architecture)
            .field("epochs", &self.epochs)
            .field("batch_size", &self.batch_size)
            .field("learning_rate", &self.learning_rate)
            .field("early_stopping_patience", &self.early_stopping_patience)
            .field("workspace_path", &self.workspace_path)
            .field("validation_rows", &self.validation_set.as_ref().map(DataView::len))
            .field("metrics_callback", &self.metrics_callback.is_some())
            .finish_non_exhaustive()
    }
}

/// Fitted image classifier stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageClassifierModel {
    pub feature_column: String,
    pub label_column: String,
    pub architecture: Architecture,
    /// Class names, `classes[key - 1]`.
    pub classes: Vec<String>,
    pub head: LogRegModel,
}

impl ImageClassifierModel {
    /// Head dimensions must match the backbone and the class table.
    pub fn validate(&self) -> Result<(), String> {
        self.head.validate()?;
        if self.head.input_dim != self.architecture.output_len() {
            return Err(format!(
                "head expects {} inputs but {} produces {}",
                self.head.input_dim,
                self.architecture.id(),
                self.architecture.output_len()
            ));
        }
        if self.head.n_classes != self.classes.len() {
            return Err(format!(
                "head has {} classes, class table has {}",
                self.head.n_classes,
                self.classes.len()
            ));
        }
        Ok(())
    }

    pub fn predict_proba(&self, image: &[u8]) -> PipelineResult<Vec<f32>> {
        let bottleneck = self.architecture.featurize(image)?;
        Ok(self.head.predict_proba(&bottleneck))
    }
}

impl Transformer for ImageClassifierModel {
    fn output_schema(&self, input: &Schema) -> PipelineResult<Schema> {
        input.require(&self.feature_column, &ColumnType::Bytes)?;
        let mut schema = input.clone();
        schema.set(
            SCORE_COLUMN,
            ColumnType::Vector {
                len: self.classes.len(),
            },
        );
        schema.set_key(PREDICTED_LABEL_COLUMN, self.classes.clone());
        Ok(schema)
    }

    fn transform_row(&self, row: &mut Row) -> PipelineResult<()> {
        let scores = self.predict_proba(row.bytes(&self.feature_column)?)?;
        let key = crate::ml::argmax(&scores).map_or(0, |idx| idx as u32 + 1);
        row.set(SCORE_COLUMN, Value::Vector(scores));
        row.set(PREDICTED_LABEL_COLUMN, Value::Key(key));
        Ok(())
    }
}

/// Train the softmax head on bottleneck vectors of `data`.
pub fn fit_image_classifier(
    options: &ImageClassificationOptions,
    ctx: &MlContext,
    data: &DataView,
) -> PipelineResult<ImageClassifierModel> {
    let classes = class_table(options, data.schema())?;
    if data.is_empty() {
        return Err(PipelineError::EmptyDataset(
            "no images to train the classifier on".to_string(),
        ));
    }
    let cache = options.workspace_path.as_deref().map(BottleneckCache::new);

    let train = bottleneck_set(
        options,
        ctx,
        data,
        classes.len(),
        cache
            .as_ref()
            .filter(|_| options.reuse_train_set_bottleneck_cached_values),
        BottleneckSet::Train,
    )?;
    let distinct: std::collections::BTreeSet<usize> = train.y.iter().copied().collect();
    if distinct.len() < 2 {
        return Err(PipelineError::DegenerateDataset(format!(
            "image classification needs at least 2 labels, found {}",
            distinct.len()
        )));
    }

    let validation = match &options.validation_set {
        Some(view) if !view.is_empty() => {
            class_table(options, view.schema())?;
            Some(bottleneck_set(
                options,
                ctx,
                view,
                classes.len(),
                cache
                    .as_ref()
                    .filter(|_| options.reuse_validation_set_bottleneck_cached_values),
                BottleneckSet::Validation,
            )?)
        }
        _ => None,
    };
    let validation = validation.filter(|v| !v.x.is_empty());

    info!(
        train = train.x.len(),
        validation = validation.as_ref().map_or(0, |v| v.x.len()),
        backbone = options.architecture.id(),
        "Training image classification head"
    );
    let train_options = TrainOptions {
        epochs: options.epochs,
        learning_rate: options.learning_rate,
        l2: options.l2,
        batch_size: options.batch_size,
        balance_classes: false,
        early_stopping_patience: options.early_stopping_patience,
    };
    let callback = options.metrics_callback.clone();
    let mut on_epoch = |metrics: &EpochMetrics| {
        debug!(
            epoch = metrics.epoch,
            train_loss = metrics.train_loss,
            train_accuracy = metrics.train_accuracy,
            validation_loss = ?metrics.validation_loss,
            "Epoch finished"
        );
        if let Some(callback) = &callback {
            callback(metrics);
        }
    };
    let head = train_logreg(&train, validation.as_ref(), &train_options, ctx, &mut on_epoch)
        .map_err(PipelineError::Training)?;

    if options.test_on_train_set {
        let correct = train
            .x
            .iter()
            .zip(&train.y)
            .filter(|(x, y)| head.predict_class_index(x) == **y)
            .count();
        info!(
            "Accuracy on the training set: {:.4}",
            correct as f32 / train.x.len() as f32
        );
    }

    Ok(ImageClassifierModel {
        feature_column: options.feature_column.clone(),
        label_column: options.label_column.clone(),
        architecture: options.architecture,
        classes,
        head,
    })
}

fn class_table(options: &ImageClassificationOptions, schema: &Schema) -> PipelineResult<Vec<String>> {
    schema.require(&options.feature_column, &ColumnType::Bytes)?;
    schema.require_kind(&options.label_column, "key", |ty| {
        matches!(ty, ColumnType::Key { .. })
    })?;
    schema
        .key_values(&options.label_column)
        .map(<[String]>::to_vec)
        .ok_or_else(|| {
            PipelineError::schema_mismatch(
                &options.label_column,
                "key with value dictionary",
                "key without values",
            )
        })
}

/// Bottleneck vectors and 0-based labels; rows with unknown labels or
/// undecodable images are skipped.
fn bottleneck_set(
    options: &ImageClassificationOptions,
    ctx: &MlContext,
    data: &DataView,
    n_classes: usize,
    cache: Option<&BottleneckCache>,
    set: BottleneckSet,
) -> PipelineResult<TrainDataset> {
    let mut images = Vec::with_capacity(data.len());
    let mut keys = Vec::with_capacity(data.len());
    for row in data.rows() {
        images.push(row.bytes(&options.feature_column)?.clone());
        keys.push(row.key(&options.label_column)?);
    }

    let backbone = options.architecture;
    let print = fingerprint(images.iter().map(|b| &b[..]).zip(keys.iter().copied()));
    let cached = cache
        .and_then(|cache| cache.load(set, backbone.id(), &print))
        .filter(|vectors| vectors.len() == images.len());
    let vectors = match cached {
        Some(vectors) => {
            debug!(?set, "Reusing cached bottleneck values");
            vectors
        }
        None => {
            let vectors = featurize_all(backbone, &images, ctx.threads);
            if let Some(cache) = cache {
                if let Err(err) = cache.store(set, backbone.id(), &print, &vectors) {
                    warn!("Failed to write bottleneck cache: {err}");
                }
            }
            vectors
        }
    };

    let mut x = Vec::with_capacity(vectors.len());
    let mut y = Vec::with_capacity(vectors.len());
    for (vector, key) in vectors.into_iter().zip(keys) {
        if vector.len() != backbone.output_len() {
            continue;
        }
        match (key as usize).checked_sub(1).filter(|&idx| idx < n_classes) {
            Some(label) => {
                x.push(vector);
                y.push(label);
            }
            None => warn!("Skipping image with unknown label key {key}"),
        }
    }
    Ok(TrainDataset { n_classes, x, y })
}

/// Featurize on up to `threads` scoped workers. Undecodable images yield empty vectors.
fn featurize_all(backbone: Architecture, images: &[Arc<[u8]>], threads: usize) -> Vec<Vec<f32>> {
    let featurize = |idx: usize, bytes: &[u8]| match backbone.featurize(bytes) {
        Ok(vector) => vector,
        Err(err) => {
            warn!("Skipping image {idx}: {err}");
            Vec::new()
        }
    };
    let chunk_len = images.len().div_ceil(threads.max(1)).max(1);
    std::thread::scope(|scope| {
        let handles: Vec<_> = images
            .chunks(chunk_len)
            .enumerate()
            .map(|(chunk_idx, chunk)| {
                let handle = scope.spawn(move || {
                    chunk
                        .iter()
                        .enumerate()
                        .map(|(offset, bytes)| featurize(chunk_idx * chunk_len + offset, &bytes[..]))
                        .collect::<Vec<_>>()
                });
                (chunk.len(), handle)
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|(len, handle)| handle.join().unwrap_or_else(|_| vec![Vec::new(); len]))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::backbone::tests::png_bytes;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn image_view(items: &[([u8; 3], &str)], classes: &[&str]) -> DataView {
        let mut schema = Schema::new().with("Image", ColumnType::Bytes);
        schema.set_key("LabelAsKey", classes.iter().map(|c| c.to_string()).collect());
        let rows = items
            .iter()
            .enumerate()
            .map(|(idx, (color, label))| {
                let shade = (idx as u8).wrapping_mul(7);
                let stripe = [color[0] / 2 + shade / 4, color[1] / 2, color[2] / 2];
                let key = classes.iter().position(|c| c == label).map_or(0, |p| p as u32 + 1);
                Row::new()
                    .with("Image", Value::Bytes(Arc::from(png_bytes(*color, stripe))))
                    .with("LabelAsKey", Value::Key(key))
            })
            .collect();
        DataView::from_rows(schema, rows).unwrap()
    }

    fn red_blue(n: usize) -> Vec<([u8; 3], &'static str)> {
        (0..n)
            .map(|i| if i % 2 == 0 { ([220, 20, 20], "red") } else { ([20, 20, 220], "blue") })
            .collect()
    }

    #[test]
    fn learns_color_classes_and_reports_epochs() {
        let data = image_view(&red_blue(12), &["red", "blue"]);
        let seen = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&seen);
        let options = ImageClassificationOptions {
            epochs: 30,
            learning_rate: 0.1,
            validation_set: Some(image_view(&red_blue(4), &["red", "blue"])),
            metrics_callback: Some(Arc::new(move |_: &EpochMetrics| {
                *counter.lock().unwrap() += 1
            })),
            ..ImageClassificationOptions::default()
        };
        let model = fit_image_classifier(&options, &MlContext::new(1), &data).unwrap();
        assert!(*seen.lock().unwrap() > 0);

        let mut row = data.rows()[0].clone();
        model.transform_row(&mut row).unwrap();
        assert_eq!(row.key("PredictedLabel").unwrap(), 1);
        let scores = row.vector("Score").unwrap();
        assert!((scores.iter().sum::<f32>() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn single_label_is_degenerate() {
        let items: Vec<_> = (0..4).map(|_| ([200, 0, 0], "red")).collect();
        let data = image_view(&items, &["red"]);
        let err = fit_image_classifier(&ImageClassificationOptions::default(), &MlContext::new(1), &data)
            .unwrap_err();
        assert!(matches!(err, PipelineError::DegenerateDataset(_)));
    }

    #[test]
    fn empty_data_is_rejected() {
        let data = image_view(&[], &["red", "blue"]);
        let err = fit_image_classifier(&ImageClassificationOptions::default(), &MlContext::new(1), &data)
            .unwrap_err();
        assert!(matches!(err, PipelineError::EmptyDataset(_)));
    }

    #[test]
    fn bottlenecks_are_cached_in_workspace() {
        let workspace = tempdir().unwrap();
        let data = image_view(&red_blue(6), &["red", "blue"]);
        let options = ImageClassificationOptions {
            epochs: 2,
            workspace_path: Some(workspace.path().to_path_buf()),
            ..ImageClassificationOptions::default()
        };
        let first = fit_image_classifier(&options, &MlContext::new(1), &data).unwrap();
        let cache = BottleneckCache::new(workspace.path());
        assert!(cache.path(BottleneckSet::Train).is_file());
        let second = fit_image_classifier(&options, &MlContext::new(1), &data).unwrap();
        assert_eq!(first, second);
    }
}
