//! Image classification by transfer learning on a folder of labelled images.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use super::{TaskEnv, TaskError, Workflow};
use crate::dataset::images::{ImageData, LabelMode, load_images_from_directory};
use crate::dataset::split::train_test_split;
use crate::error::PipelineError;
use crate::evaluate::{MulticlassMetrics, evaluate_multiclass};
use crate::ml::logreg::EpochMetrics;
use crate::model_store::{self, ArtifactManifest};
use crate::pipeline::data::{ColumnType, DataView, IntoRow, Row, Schema, Value};
use crate::pipeline::trainers::{PREDICTED_LABEL_COLUMN, SCORE_COLUMN, TrainerSpec};
use crate::pipeline::{EstimatorChain, StageSpec};
use crate::predict::{PredictedLabel, PredictionEngine};

pub const TASK: &str = "image";
pub const LABEL_AS_KEY_COLUMN: &str = "LabelAsKey";
pub const IMAGE_COLUMN: &str = "Image";
pub const PREDICTED_VALUE_COLUMN: &str = "PredictedValue";

#[derive(Debug, Clone, PartialEq)]
pub struct ImageInput {
    pub image_path: String,
    pub label: String,
}

impl ImageInput {
    /// Use `image` with its path relative to `base` when it lies below it.
    fn from_image(image: ImageData, base: &Path) -> Self {
        let path = image
            .image_path
            .strip_prefix(base)
            .map(Path::to_path_buf)
            .unwrap_or(image.image_path);
        Self {
            image_path: path.to_string_lossy().into_owned(),
            label: image.label,
        }
    }
}

impl IntoRow for ImageInput {
    fn schema() -> Schema {
        Schema::new()
            .with("ImagePath", ColumnType::Text)
            .with("Label", ColumnType::Text)
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("ImagePath", Value::Text(self.image_path.clone()))
            .with("Label", Value::Text(self.label.clone()))
    }
}

/// Label keys and raw image bytes; fitted on all data before splitting.
pub fn preprocessing_pipeline(assets: &Path) -> EstimatorChain {
    EstimatorChain::new()
        .append(StageSpec::map_value_to_key("Label", LABEL_AS_KEY_COLUMN))
        .append(StageSpec::load_raw_image_bytes("ImagePath", IMAGE_COLUMN, assets))
}

#[derive(Debug, Clone)]
pub struct ImageTrainReport {
    pub manifest: ArtifactManifest,
    pub train_rows: usize,
    pub validation_rows: usize,
    pub test_rows: usize,
    /// `None` when the split left no test images.
    pub metrics: Option<MulticlassMetrics>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImagePrediction {
    pub file_name: String,
    pub actual: String,
    pub predicted: String,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct ImagePredictReport {
    pub predictions: Vec<ImagePrediction>,
    pub failures: usize,
}

/// Labelled images under `root`, paths relative to it.
///
/// With folder-name labels only images inside a subfolder of `root` count;
/// a file directly in `root` would take the root folder's own name as its
/// class.
fn load_inputs(root: &Path, mode: LabelMode) -> Result<Vec<ImageInput>, TaskError> {
    let mut skipped = 0usize;
    let inputs: Vec<ImageInput> = load_images_from_directory(root, mode)?
        .into_iter()
        .filter(|image| {
            let in_subfolder =
                mode != LabelMode::FolderName || image.image_path.parent() != Some(root);
            if !in_subfolder {
                skipped += 1;
            }
            in_subfolder
        })
        .map(|image| ImageInput::from_image(image, root))
        .collect();
    if skipped > 0 {
        warn!(
            skipped,
            "Ignoring images directly in {}; put each class in its own subfolder",
            root.display()
        );
    }
    if inputs.is_empty() {
        return Err(PipelineError::EmptyDataset(format!(
            "no labelled .jpg or .png images in subfolders of {}",
            root.display()
        ))
        .into());
    }
    Ok(inputs)
}

pub fn train(env: &TaskEnv) -> Result<ImageTrainReport, TaskError> {
    let assets = env.layout.assets_dir();
    let inputs = load_inputs(&assets, env.config.image.label_mode)?;
    let data = DataView::from_records(&inputs);

    let preprocessing = preprocessing_pipeline(&assets).fit(&env.ctx, &data)?;
    let prepared = preprocessing.transform(&data)?;

    let split = train_test_split(&env.ctx, &prepared, env.config.split.image_test_fraction)?;
    let holdout = train_test_split(
        &env.ctx,
        &split.test_set,
        env.config.split.image_holdout_test_fraction,
    )?;
    let (validation, test) = (holdout.train_set, holdout.test_set);
    info!(
        train = split.train_set.len(),
        validation = validation.len(),
        test = test.len(),
        "Split image data"
    );

    let mut options = env.config.image.classification_options();
    options.feature_column = IMAGE_COLUMN.to_string();
    options.label_column = LABEL_AS_KEY_COLUMN.to_string();
    options.workspace_path = Some(env.layout.ensure_workspace()?);
    options.validation_set = Some(validation.clone());
    options.metrics_callback = Some(Arc::new(|metrics: &EpochMetrics| {
        info!(
            "Epoch {:3}: train loss {:.4}, train accuracy {:.3}, validation loss {}, validation accuracy {}",
            metrics.epoch,
            metrics.train_loss,
            metrics.train_accuracy,
            metrics
                .validation_loss
                .map_or_else(|| "n/a".to_string(), |loss| format!("{loss:.4}")),
            metrics
                .validation_accuracy
                .map_or_else(|| "n/a".to_string(), |acc| format!("{acc:.3}")),
        );
    }));

    let training = EstimatorChain::new()
        .append(StageSpec::Train(TrainerSpec::ImageClassification(options)))
        .append(StageSpec::map_key_to_value(
            PREDICTED_LABEL_COLUMN,
            PREDICTED_VALUE_COLUMN,
        ))
        .fit(&env.ctx, &split.train_set)?;
    let model = preprocessing.append(&training)?;
    let manifest = model_store::save(&env.layout.model_path(), TASK, &model, data.schema())?;

    let metrics = if test.is_empty() {
        warn!("No test images left after splitting; skipping evaluation");
        None
    } else {
        Some(evaluate_multiclass(
            &training,
            &test,
            LABEL_AS_KEY_COLUMN,
            SCORE_COLUMN,
            PREDICTED_LABEL_COLUMN,
        )?)
    };
    Ok(ImageTrainReport {
        manifest,
        train_rows: split.train_set.len(),
        validation_rows: validation.len(),
        test_rows: test.len(),
        metrics,
    })
}

/// Classify every image under `test/`, labelled by folder name.
pub fn predict(env: &TaskEnv) -> Result<ImagePredictReport, TaskError> {
    let saved = model_store::load(&env.layout.model_path())?;
    let engine = PredictionEngine::new(&saved.pipeline);
    let test_dir = env.layout.test_dir();
    let images: Vec<ImageData> = load_images_from_directory(&test_dir, LabelMode::FolderName)?;
    if images.is_empty() {
        return Err(PipelineError::EmptyDataset(format!(
            "no .jpg or .png images under {}",
            test_dir.display()
        ))
        .into());
    }
    let inputs: Vec<ImageInput> = images
        .into_iter()
        .map(|image| ImageInput {
            image_path: image.image_path.to_string_lossy().into_owned(),
            label: image.label,
        })
        .collect();

    let mut predictions = Vec::with_capacity(inputs.len());
    let mut failures = 0usize;
    for (idx, result) in engine.predict_batch(&inputs, env.prediction_workers()) {
        let input = &inputs[idx];
        match result {
            Ok(prediction) => {
                let score = prediction.max_score().unwrap_or(f32::NAN);
                let predicted = match prediction.label {
                    PredictedLabel::Class(class) => class,
                    PredictedLabel::Score(score) => score.to_string(),
                };
                predictions.push(ImagePrediction {
                    file_name: Path::new(&input.image_path)
                        .file_name()
                        .map_or_else(|| input.image_path.clone(), |n| n.to_string_lossy().into_owned()),
                    actual: input.label.clone(),
                    predicted,
                    score,
                });
            }
            Err(err) => {
                failures += 1;
                warn!("Could not classify {}: {err}", input.image_path);
            }
        }
    }
    Ok(ImagePredictReport {
        predictions,
        failures,
    })
}

pub struct ImageWorkflow;

impl Workflow for ImageWorkflow {
    fn name(&self) -> &'static str {
        TASK
    }

    fn train(&self, env: &TaskEnv, out: &mut dyn Write) -> Result<(), TaskError> {
        let report = train(env)?;
        writeln!(
            out,
            "Trained on {} images ({} validation, {} test); model saved to {}",
            report.train_rows,
            report.validation_rows,
            report.test_rows,
            env.layout.model_path().display()
        )?;
        if let Some(metrics) = report.metrics {
            writeln!(out)?;
            writeln!(out, "{metrics}")?;
        }
        Ok(())
    }

    fn predict(&self, env: &TaskEnv, out: &mut dyn Write) -> Result<(), TaskError> {
        writeln!(out, "Classifying multiple images")?;
        let report = predict(env)?;
        for line in &report.predictions {
            writeln!(
                out,
                "Image: {} | Actual Value: {} | Predicted Value: {} | Score: {}",
                line.file_name, line.actual, line.predicted, line.score
            )?;
        }
        if report.failures > 0 {
            writeln!(out, "{} images could not be classified", report.failures)?;
        }
        Ok(())
    }
}
