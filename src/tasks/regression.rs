//! Life expectancy regression with boosted trees.

use std::io::Write;

use tracing::{info, warn};

use super::{TaskEnv, TaskError, Workflow};
use crate::dataset::RowError;
use crate::dataset::split::train_test_split;
use crate::dataset::tabular::{TabularRecord, load_csv, number_field, number_label, text_field};
use crate::error::PipelineError;
use crate::evaluate::evaluate_regression;
use crate::ml::gbdt::FastTreeOptions;
use crate::ml::metrics::RegressionMetrics;
use crate::model_store::{self, ArtifactManifest};
use crate::pipeline::data::{ColumnType, DataView, IntoRow, Row, Schema, Value};
use crate::pipeline::trainers::{SCORE_COLUMN, TrainerSpec};
use crate::pipeline::{EstimatorChain, StageSpec};
use crate::predict::{PredictedLabel, PredictionEngine};

pub const TASK: &str = "regression";
pub const LABEL_COLUMN: &str = "Label";

const NUMERIC_FEATURES: [&str; 7] = [
    "AdultMortality",
    "InfantDeaths",
    "Alcohol",
    "PercentageExpenditure",
    "HepatitisB",
    "Measles",
    "BMI",
];

/// One row of the life expectancy table.
#[derive(Debug, Clone, PartialEq)]
pub struct LifeExpectancyInput {
    pub status: String,
    pub life_expectancy: f32,
    pub adult_mortality: f32,
    pub infant_deaths: f32,
    pub alcohol: f32,
    pub percentage_expenditure: f32,
    pub hepatitis_b: f32,
    pub measles: f32,
    pub bmi: f32,
}

impl LifeExpectancyInput {
    /// A developing-country row whose actual life expectancy is 65.
    pub fn sample() -> Self {
        Self {
            status: "Developing".to_string(),
            life_expectancy: 65.0,
            adult_mortality: 263.0,
            infant_deaths: 62.0,
            alcohol: 0.01,
            percentage_expenditure: 71.279_625,
            hepatitis_b: 65.0,
            measles: 1154.0,
            bmi: 19.1,
        }
    }

    fn numeric_features(&self) -> [f32; 7] {
        [
            self.adult_mortality,
            self.infant_deaths,
            self.alcohol,
            self.percentage_expenditure,
            self.hepatitis_b,
            self.measles,
            self.bmi,
        ]
    }
}

impl TabularRecord for LifeExpectancyInput {
    fn from_record(record: &csv::StringRecord) -> Result<Self, RowError> {
        Ok(Self {
            status: text_field(record, 2, "Status")?,
            life_expectancy: number_label(record, 3, "LifeExpectancy")?,
            adult_mortality: number_field(record, 4, "AdultMortality")?,
            infant_deaths: number_field(record, 5, "InfantDeaths")?,
            alcohol: number_field(record, 6, "Alcohol")?,
            percentage_expenditure: number_field(record, 7, "PercentageExpenditure")?,
            hepatitis_b: number_field(record, 8, "HepatitisB")?,
            measles: number_field(record, 9, "Measles")?,
            bmi: number_field(record, 10, "BMI")?,
        })
    }
}

impl IntoRow for LifeExpectancyInput {
    fn schema() -> Schema {
        let mut schema = Schema::new()
            .with("Status", ColumnType::Text)
            .with(LABEL_COLUMN, ColumnType::Number);
        for name in NUMERIC_FEATURES {
            schema.set(name, ColumnType::Number);
        }
        schema
    }

    fn to_row(&self) -> Row {
        let mut row = Row::new()
            .with("Status", Value::Text(self.status.clone()))
            .with(LABEL_COLUMN, Value::Number(self.life_expectancy));
        for (name, value) in NUMERIC_FEATURES.iter().zip(self.numeric_features()) {
            row.set(name, Value::Number(value));
        }
        row
    }
}

pub fn build_pipeline(options: &FastTreeOptions) -> EstimatorChain {
    let mut inputs = vec!["StatusEncoded"];
    inputs.extend(NUMERIC_FEATURES);
    EstimatorChain::new()
        .append(StageSpec::one_hot("Status", "StatusEncoded"))
        .append(StageSpec::concatenate("Features", &inputs))
        .append(StageSpec::Train(TrainerSpec::FastTreeRegression {
            label: LABEL_COLUMN.to_string(),
            features: "Features".to_string(),
            options: options.clone(),
        }))
}

#[derive(Debug, Clone)]
pub struct RegressionTrainReport {
    pub manifest: ArtifactManifest,
    pub train_rows: usize,
    pub test_rows: usize,
    pub metrics: RegressionMetrics,
}

#[derive(Debug, Clone)]
pub struct RegressionPredictReport {
    pub predicted: f32,
    pub actual: f32,
    /// Metrics over every assets row, when batch scoring is enabled.
    pub batch: Option<RegressionMetrics>,
}

fn load_data(env: &TaskEnv) -> Result<Vec<LifeExpectancyInput>, TaskError> {
    let path = env
        .layout
        .assets_dir()
        .join(&env.config.regression.data_file);
    Ok(load_csv(&path)?)
}

pub fn train(env: &TaskEnv) -> Result<RegressionTrainReport, TaskError> {
    let records = load_data(env)?;
    let data = DataView::from_records(&records);
    let split = train_test_split(&env.ctx, &data, env.config.split.test_fraction)?;
    info!(
        train = split.train_set.len(),
        test = split.test_set.len(),
        "Split life expectancy data"
    );

    let pipeline =
        build_pipeline(&env.config.regression.trainer).fit(&env.ctx, &split.train_set)?;
    let manifest = model_store::save(&env.layout.model_path(), TASK, &pipeline, data.schema())?;
    let metrics = evaluate_regression(&pipeline, &split.test_set, LABEL_COLUMN)?;
    Ok(RegressionTrainReport {
        manifest,
        train_rows: split.train_set.len(),
        test_rows: split.test_set.len(),
        metrics,
    })
}

pub fn predict(env: &TaskEnv) -> Result<RegressionPredictReport, TaskError> {
    let saved = model_store::load(&env.layout.model_path())?;
    let engine = PredictionEngine::new(&saved.pipeline);
    let sample = LifeExpectancyInput::sample();
    let predicted = score(engine.predict(&sample)?.label)?;

    let batch = if env.config.predict.batch_from_assets {
        let records = load_data(env)?;
        let mut predictions = Vec::with_capacity(records.len());
        let mut labels = Vec::with_capacity(records.len());
        for (idx, result) in engine.predict_batch(&records, env.prediction_workers()) {
            match result {
                Ok(prediction) => {
                    predictions.push(score(prediction.label)?);
                    labels.push(records[idx].life_expectancy);
                }
                Err(err) => warn!("Row {idx} could not be scored: {err}"),
            }
        }
        Some(RegressionMetrics::compute(&predictions, &labels))
    } else {
        None
    };

    Ok(RegressionPredictReport {
        predicted,
        actual: sample.life_expectancy,
        batch,
    })
}

fn score(label: PredictedLabel) -> Result<f32, TaskError> {
    match label {
        PredictedLabel::Score(value) => Ok(value),
        PredictedLabel::Class(class) => Err(PipelineError::schema_mismatch(
            SCORE_COLUMN,
            "regression score",
            format!("class label {class:?}"),
        )
        .into()),
    }
}

pub struct RegressionWorkflow;

impl Workflow for RegressionWorkflow {
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
            "Predicted life expectancy: {:.2} | Actual life expectancy: {:.2}",
            report.predicted, report.actual
        )?;
        if let Some(metrics) = report.batch {
            writeln!(out)?;
            writeln!(out, "{metrics}")?;
        }
        Ok(())
    }
}
