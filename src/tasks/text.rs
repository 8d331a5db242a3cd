//! Luxury apparel category prediction from product names and descriptions.

use std::io::Write;

use tracing::{info, warn};

use super::{TaskEnv, TaskError, Workflow};
use crate::config::TextSettings;
use crate::dataset::RowError;
use crate::dataset::split::train_test_split;
use crate::dataset::tabular::{TabularRecord, load_csv, text_field, text_label};
use crate::evaluate::{MulticlassMetrics, evaluate_multiclass};
use crate::model_store::{self, ArtifactManifest};
use crate::pipeline::data::{ColumnType, DataView, IntoRow, Row, Schema, Value};
use crate::pipeline::trainers::{PREDICTED_LABEL_COLUMN, SCORE_COLUMN, TrainerSpec};
use crate::pipeline::{EstimatorChain, StageSpec};
use crate::predict::{PredictedLabel, PredictionEngine};

pub const TASK: &str = "text";
pub const CATEGORY_COLUMN: &str = "Category";
pub const PREDICTED_CATEGORY_COLUMN: &str = "PredictedCategory";

/// Number of class scores shown after a prediction.
const SHOWN_SCORES: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct ProductInput {
    pub category: String,
    pub product_name: String,
    pub description: String,
}

impl ProductInput {
    pub fn sample() -> Self {
        Self {
            category: "Accessories".to_string(),
            product_name: "Prada Striped Shell Belt Bag".to_string(),
            description: "One of Prada's most functional designs, this belt bag is made from \
                weather-resistant shell fabric with zip compartments for storing your daily \
                belongings. It's designed for navigating your day hands-free- try styling yours \
                diagonally across the body."
                .to_string(),
        }
    }
}

impl TabularRecord for ProductInput {
    fn from_record(record: &csv::StringRecord) -> Result<Self, RowError> {
        Ok(Self {
            category: text_label(record, 1, "Category")?,
            product_name: text_field(record, 3, "ProductName")?,
            description: text_field(record, 4, "Description")?,
        })
    }
}

impl IntoRow for ProductInput {
    fn schema() -> Schema {
        Schema::new()
            .with(CATEGORY_COLUMN, ColumnType::Text)
            .with("ProductName", ColumnType::Text)
            .with("Description", ColumnType::Text)
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with(CATEGORY_COLUMN, Value::Text(self.category.clone()))
            .with("ProductName", Value::Text(self.product_name.clone()))
            .with("Description", Value::Text(self.description.clone()))
    }
}

pub fn build_pipeline(settings: &TextSettings) -> EstimatorChain {
    let featurize = |input: &str, output: &str| StageSpec::FeaturizeText {
        input: input.to_string(),
        output: output.to_string(),
        options: settings.featurizer.clone(),
    };
    EstimatorChain::new()
        .append(featurize("ProductName", "ProductNameFeatures"))
        .append(featurize("Description", "DescriptionFeatures"))
        .append(StageSpec::concatenate(
            "Features",
            &["ProductNameFeatures", "DescriptionFeatures"],
        ))
        .append(StageSpec::map_value_to_key(CATEGORY_COLUMN, "Label"))
        .append(StageSpec::Train(TrainerSpec::OneVersusAllFastForest {
            label: "Label".to_string(),
            features: "Features".to_string(),
            options: settings.trainer.clone(),
        }))
        .append(StageSpec::map_key_to_value(
            PREDICTED_LABEL_COLUMN,
            PREDICTED_CATEGORY_COLUMN,
        ))
}

#[derive(Debug, Clone)]
pub struct TextTrainReport {
    pub manifest: ArtifactManifest,
    pub train_rows: usize,
    pub test_rows: usize,
    pub metrics: MulticlassMetrics,
}

#[derive(Debug, Clone)]
pub struct TextPredictReport {
    pub predicted: String,
    pub actual: String,
    /// Highest class scores, best first.
    pub top_scores: Vec<(String, f32)>,
    /// Fraction of assets rows classified correctly, when batch scoring is enabled.
    pub batch_accuracy: Option<f32>,
}

fn load_data(env: &TaskEnv) -> Result<Vec<ProductInput>, TaskError> {
    let path = env.layout.assets_dir().join(&env.config.text.data_file);
    Ok(load_csv(&path)?)
}

pub fn train(env: &TaskEnv) -> Result<TextTrainReport, TaskError> {
    let records = load_data(env)?;
    let data = DataView::from_records(&records);
    let split = train_test_split(&env.ctx, &data, env.config.split.test_fraction)?;
    info!(
        train = split.train_set.len(),
        test = split.test_set.len(),
        "Split product data"
    );

    let pipeline = build_pipeline(&env.config.text).fit(&env.ctx, &split.train_set)?;
    let manifest = model_store::save(&env.layout.model_path(), TASK, &pipeline, data.schema())?;
    let metrics = evaluate_multiclass(
        &pipeline,
        &split.test_set,
        CATEGORY_COLUMN,
        SCORE_COLUMN,
        PREDICTED_LABEL_COLUMN,
    )?;
    Ok(TextTrainReport {
        manifest,
        train_rows: split.train_set.len(),
        test_rows: split.test_set.len(),
        metrics,
    })
}

pub fn predict(env: &TaskEnv) -> Result<TextPredictReport, TaskError> {
    let saved = model_store::load(&env.layout.model_path())?;
    let engine = PredictionEngine::new(&saved.pipeline);
    let classes = saved
        .pipeline
        .output_schema
        .key_values(PREDICTED_LABEL_COLUMN)
        .unwrap_or_default();

    let sample = ProductInput::sample();
    let prediction = engine.predict(&sample)?;
    let mut top_scores: Vec<(String, f32)> = classes
        .iter()
        .cloned()
        .zip(prediction.scores.clone().unwrap_or_default())
        .collect();
    top_scores.sort_by(|a, b| b.1.total_cmp(&a.1));
    top_scores.truncate(SHOWN_SCORES);

    let batch_accuracy = if env.config.predict.batch_from_assets {
        let records = load_data(env)?;
        let mut scored = 0usize;
        let mut correct = 0usize;
        for (idx, result) in engine.predict_batch(&records, env.prediction_workers()) {
            match result {
                Ok(prediction) => {
                    scored += 1;
                    if prediction.label == PredictedLabel::Class(records[idx].category.clone()) {
                        correct += 1;
                    }
                }
                Err(err) => warn!("Row {idx} could not be scored: {err}"),
            }
        }
        Some(if scored == 0 {
            0.0
        } else {
            correct as f32 / scored as f32
        })
    } else {
        None
    };

    let predicted = match prediction.label {
        PredictedLabel::Class(class) => class,
        PredictedLabel::Score(score) => score.to_string(),
    };
    Ok(TextPredictReport {
        predicted,
        actual: sample.category,
        top_scores,
        batch_accuracy,
    })
}

pub struct TextWorkflow;

impl Workflow for TextWorkflow {
    fn name(&self) -> &'static str {
        TASK
    }

    fn train(&self, env: &TaskEnv, out: &mut dyn Write) -> Result<(), TaskError> {
        let report = train(env)?;
        writeln!(
            out,
            "Trained on {} rows, evaluated on {} rows; model saved to {}",
            report.train_rows,
            report.test_rows,
            env.layout.model_path().display()
        )?;
        writeln!(out)?;
        writeln!(out, "{}", report.metrics)?;
        Ok(())
    }

    fn predict(&self, env: &TaskEnv, out: &mut dyn Write) -> Result<(), TaskError> {
        let report = predict(env)?;
        writeln!(
            out,
            "Predicted category: {} | Actual category: {}",
            report.predicted, report.actual
        )?;
        for (class, score) in &report.top_scores {
            writeln!(out, "    {class}: {score:.3}")?;
        }
        if let Some(accuracy) = report.batch_accuracy {
            writeln!(out, "Accuracy over the assets file: {accuracy:.3}")?;
        }
        Ok(())
    }
}
