//! Estimator chains and the fitted pipelines they produce.
//!
//! An [`EstimatorChain`] lists stage specifications. Fitting walks the list in
//! order: each stage is fitted on the training data as transformed by every
//! stage fitted before it, so learned parameters (vocabularies, dictionaries,
//! trees) are frozen into a [`FittedPipeline`] that replays the same steps
//! at prediction time.

pub mod data;
pub mod stages;
pub mod trainers;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::MlContext;
use crate::error::PipelineResult;
use crate::vision::ImageClassifierModel;
use data::{DataView, Row, Schema};
use stages::{
    ConcatenateColumns, ImageBytesLoader, KeyOrdinality, KeyToValueMapper, OneHotEncoder,
    TextFeaturizer, TextFeaturizerOptions, Transformer, ValueToKeyMapper,
};
use trainers::{FastTreeRegressionModel, FittedTrainer, OneVersusAllClassifier, TrainerSpec};

/// Specification of one pipeline stage before fitting.
#[derive(Debug, Clone)]
pub enum StageSpec {
    OneHot {
        input: String,
        output: String,
    },
    LoadRawImageBytes {
        input: String,
        output: String,
        image_folder: PathBuf,
    },
    FeaturizeText {
        input: String,
        output: String,
        options: TextFeaturizerOptions,
    },
    Concatenate {
        output: String,
        inputs: Vec<String>,
    },
    MapValueToKey {
        input: String,
        output: String,
        ordinality: KeyOrdinality,
    },
    MapKeyToValue {
        input: String,
        output: String,
    },
    Train(TrainerSpec),
}

impl StageSpec {
    pub fn one_hot(input: &str, output: &str) -> Self {
        Self::OneHot {
            input: input.to_string(),
            output: output.to_string(),
        }
    }

    pub fn load_raw_image_bytes(input: &str, output: &str, image_folder: impl Into<PathBuf>) -> Self {
        Self::LoadRawImageBytes {
            input: input.to_string(),
            output: output.to_string(),
            image_folder: image_folder.into(),
        }
    }

    pub fn featurize_text(input: &str, output: &str) -> Self {
        Self::FeaturizeText {
            input: input.to_string(),
            output: output.to_string(),
            options: TextFeaturizerOptions::default(),
        }
    }

    pub fn concatenate(output: &str, inputs: &[&str]) -> Self {
        Self::Concatenate {
            output: output.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn map_value_to_key(input: &str, output: &str) -> Self {
        Self::MapValueToKey {
            input: input.to_string(),
            output: output.to_string(),
            ordinality: KeyOrdinality::default(),
        }
    }

    pub fn map_key_to_value(input: &str, output: &str) -> Self {
        Self::MapKeyToValue {
            input: input.to_string(),
            output: output.to_string(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::OneHot { .. } => "one_hot",
            Self::LoadRawImageBytes { .. } => "load_raw_image_bytes",
            Self::FeaturizeText { .. } => "featurize_text",
            Self::Concatenate { .. } => "concatenate",
            Self::MapValueToKey { .. } => "map_value_to_key",
            Self::MapKeyToValue { .. } => "map_key_to_value",
            Self::Train(trainer) => trainer.name(),
        }
    }

    /// Stages that learn from row values rather than from the schema alone.
    fn needs_rows(&self) -> bool {
        matches!(
            self,
            Self::OneHot { .. }
                | Self::FeaturizeText { .. }
                | Self::MapValueToKey { .. }
                | Self::Train(_)
        )
    }

    /// Fit against `schema`; `data` holds transformed rows only when [`Self::needs_rows`].
    fn fit(&self, ctx: &MlContext, schema: &Schema, data: &DataView) -> PipelineResult<FittedStage> {
        Ok(match self {
            Self::OneHot { input, output } => {
                FittedStage::OneHot(OneHotEncoder::fit(input, output, data)?)
            }
            Self::LoadRawImageBytes {
                input,
                output,
                image_folder,
            } => FittedStage::LoadRawImageBytes(ImageBytesLoader::new(input, output, image_folder)),
            Self::FeaturizeText {
                input,
                output,
                options,
            } => FittedStage::FeaturizeText(TextFeaturizer::fit(input, output, options, data)?),
            Self::Concatenate { output, inputs } => {
                FittedStage::Concatenate(ConcatenateColumns::fit_schema(output, inputs, schema)?)
            }
            Self::MapValueToKey {
                input,
                output,
                ordinality,
            } => FittedStage::MapValueToKey(ValueToKeyMapper::fit(input, output, *ordinality, data)?),
            Self::MapKeyToValue { input, output } => {
                FittedStage::MapKeyToValue(KeyToValueMapper::fit_schema(input, output, schema)?)
            }
            Self::Train(trainer) => match trainer.fit(ctx, data)? {
                FittedTrainer::FastTree(model) => FittedStage::FastTreeRegression(model),
                FittedTrainer::OneVersusAll(model) => FittedStage::OneVersusAll(model),
                FittedTrainer::Image(model) => FittedStage::ImageClassification(model),
            },
        })
    }
}

/// Ordered list of stages to fit; built by value.
#[derive(Debug, Clone, Default)]
pub struct EstimatorChain {
    stages: Vec<StageSpec>,
}

impl EstimatorChain {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn append(mut self, stage: StageSpec) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn fit(&self, ctx: &MlContext, data: &DataView) -> PipelineResult<FittedPipeline> {
        let input_schema = data.schema().clone();
        let mut schema = input_schema.clone();
        let mut view = data.clone();
        let mut fitted: Vec<FittedStage> = Vec::with_capacity(self.stages.len());
        // Index of the first fitted stage not yet applied to `view`.
        let mut applied = 0usize;

        for spec in &self.stages {
            if spec.needs_rows() && applied < fitted.len() {
                view = apply_stages(&fitted[applied..], view)?;
                applied = fitted.len();
            }
            let stage = spec.fit(ctx, &schema, &view)?;
            schema = stage.output_schema(&schema)?;
            debug!(stage = spec.name(), rows = view.len(), "Fitted pipeline stage");
            fitted.push(stage);
        }

        Ok(FittedPipeline {
            input_schema,
            output_schema: schema,
            stages: fitted,
        })
    }
}

/// A stage with its learned parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum FittedStage {
    OneHot(OneHotEncoder),
    LoadRawImageBytes(ImageBytesLoader),
    FeaturizeText(TextFeaturizer),
    Concatenate(ConcatenateColumns),
    MapValueToKey(ValueToKeyMapper),
    MapKeyToValue(KeyToValueMapper),
    FastTreeRegression(FastTreeRegressionModel),
    OneVersusAll(OneVersusAllClassifier),
    ImageClassification(ImageClassifierModel),
}

impl FittedStage {
    fn transformer(&self) -> &dyn Transformer {
        match self {
            Self::OneHot(stage) => stage,
            Self::LoadRawImageBytes(stage) => stage,
            Self::FeaturizeText(stage) => stage,
            Self::Concatenate(stage) => stage,
            Self::MapValueToKey(stage) => stage,
            Self::MapKeyToValue(stage) => stage,
            Self::FastTreeRegression(stage) => stage,
            Self::OneVersusAll(stage) => stage,
            Self::ImageClassification(stage) => stage,
        }
    }

    /// Internal consistency of the learned parameters.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::FeaturizeText(stage) => stage.validate(),
            Self::FastTreeRegression(stage) => stage.model.validate(),
            Self::OneVersusAll(stage) => {
                stage.model.validate()?;
                if stage.model.n_classes() != stage.classes.len() {
                    return Err(format!(
                        "{} forests for {} classes",
                        stage.model.n_classes(),
                        stage.classes.len()
                    ));
                }
                Ok(())
            }
            Self::ImageClassification(stage) => stage.validate(),
            Self::OneHot(_)
            | Self::LoadRawImageBytes(_)
            | Self::Concatenate(_)
            | Self::MapValueToKey(_)
            | Self::MapKeyToValue(_) => Ok(()),
        }
    }
}

impl Transformer for FittedStage {
    fn output_schema(&self, input: &Schema) -> PipelineResult<Schema> {
        self.transformer().output_schema(input)
    }

    fn transform_row(&self, row: &mut Row) -> PipelineResult<()> {
        self.transformer().transform_row(row)
    }
}

/// Fitted stages plus the schema they were fitted on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedPipeline {
    pub input_schema: Schema,
    pub output_schema: Schema,
    pub stages: Vec<FittedStage>,
}

impl FittedPipeline {
    /// Apply every stage to every row of `data`.
    pub fn transform(&self, data: &DataView) -> PipelineResult<DataView> {
        apply_stages(&self.stages, data.clone())
    }

    /// Apply every stage to one row shaped like [`Self::input_schema`].
    pub fn transform_row(&self, mut row: Row) -> PipelineResult<Row> {
        row.validate(&self.input_schema)?;
        for stage in &self.stages {
            stage.transform_row(&mut row)?;
        }
        Ok(row)
    }

    /// Check every stage and replay the schema chain from `input_schema`;
    /// it must end in exactly `output_schema`.
    pub fn validate(&self) -> Result<(), String> {
        let mut schema = self.input_schema.clone();
        for (idx, stage) in self.stages.iter().enumerate() {
            stage
                .validate()
                .map_err(|err| format!("stage {idx}: {err}"))?;
            schema = stage
                .output_schema(&schema)
                .map_err(|err| format!("stage {idx}: {err}"))?;
        }
        if schema != self.output_schema {
            return Err("stored output schema does not match the stages".to_string());
        }
        Ok(())
    }

    /// Run `next` after this pipeline. Fails if `next` cannot consume this output.
    pub fn append(&self, next: &FittedPipeline) -> PipelineResult<FittedPipeline> {
        let mut schema = self.output_schema.clone();
        for stage in &next.stages {
            schema = stage.output_schema(&schema)?;
        }
        let mut stages = self.stages.clone();
        stages.extend(next.stages.iter().cloned());
        Ok(FittedPipeline {
            input_schema: self.input_schema.clone(),
            output_schema: schema,
            stages,
        })
    }
}

fn apply_stages(stages: &[FittedStage], view: DataView) -> PipelineResult<DataView> {
    let mut schema = view.schema().clone();
    for stage in stages {
        schema = stage.output_schema(&schema)?;
    }
    let mut rows = view.into_rows();
    for row in &mut rows {
        for stage in stages {
            stage.transform_row(row)?;
        }
    }
    Ok(DataView::from_parts(schema, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::ml::forest::FastForestOptions;
    use crate::pipeline::data::{ColumnType, Value};
    use crate::pipeline::trainers::{PREDICTED_LABEL_COLUMN, SCORE_COLUMN};

    fn products() -> DataView {
        let schema = Schema::new()
            .with("Name", ColumnType::Text)
            .with("Category", ColumnType::Text);
        let items = [
            ("leather belt bag", "Accessories"),
            ("silk evening dress", "Clothing"),
            ("woven belt", "Accessories"),
            ("cotton summer dress", "Clothing"),
            ("chain belt", "Accessories"),
            ("midi wrap dress", "Clothing"),
        ];
        let rows = items
            .iter()
            .cycle()
            .take(24)
            .map(|(name, category)| {
                Row::new()
                    .with("Name", Value::Text(name.to_string()))
                    .with("Category", Value::Text(category.to_string()))
            })
            .collect();
        DataView::from_rows(schema, rows).unwrap()
    }

    fn text_chain() -> EstimatorChain {
        EstimatorChain::new()
            .append(StageSpec::featurize_text("Name", "NameFeatures"))
            .append(StageSpec::concatenate("Features", &["NameFeatures"]))
            .append(StageSpec::map_value_to_key("Category", "Label"))
            .append(StageSpec::Train(TrainerSpec::OneVersusAllFastForest {
                label: "Label".into(),
                features: "Features".into(),
                options: FastForestOptions::default(),
            }))
            .append(StageSpec::map_key_to_value(PREDICTED_LABEL_COLUMN, "PredictedCategory"))
    }

    #[test]
    fn fit_then_transform_classifies_training_rows() {
        let data = products();
        let pipeline = text_chain().fit(&MlContext::new(5), &data).unwrap();
        assert_eq!(pipeline.stages.len(), 5);
        assert_eq!(
            pipeline.output_schema.get(SCORE_COLUMN),
            Some(&ColumnType::Vector { len: 2 })
        );

        let scored = pipeline.transform(&data).unwrap();
        for row in scored.rows() {
            assert_eq!(
                row.text("PredictedCategory").unwrap(),
                row.text("Category").unwrap()
            );
        }
    }

    #[test]
    fn transform_is_repeatable() {
        let data = products();
        let pipeline = text_chain().fit(&MlContext::new(5), &data).unwrap();
        let a = pipeline.transform(&data).unwrap();
        let b = pipeline.transform(&data).unwrap();
        assert_eq!(a.rows(), b.rows());
    }

    #[test]
    fn fitted_pipeline_survives_json() {
        let data = products();
        let pipeline = text_chain().fit(&MlContext::new(5), &data).unwrap();
        let json = serde_json::to_string(&pipeline).unwrap();
        let loaded: FittedPipeline = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, pipeline);
    }

    #[test]
    fn validate_accepts_fitted_and_rejects_tampered_pipelines() {
        let data = products();
        let pipeline = text_chain().fit(&MlContext::new(5), &data).unwrap();
        assert!(pipeline.validate().is_ok());

        let mut fewer_forests = pipeline.clone();
        for stage in &mut fewer_forests.stages {
            if let FittedStage::OneVersusAll(model) = stage {
                model.classes.push("Shoes".into());
            }
        }
        assert!(fewer_forests.validate().unwrap_err().contains("forests"));

        let mut wrong_output = pipeline.clone();
        wrong_output.output_schema.set(SCORE_COLUMN, ColumnType::Vector { len: 9 });
        assert!(wrong_output.validate().is_err());
    }

    #[test]
    fn transform_row_rejects_missing_column() {
        let data = products();
        let pipeline = text_chain().fit(&MlContext::new(5), &data).unwrap();
        let row = Row::new().with("Name", Value::Text("belt".into()));
        let err = pipeline.transform_row(row).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch { ref column, .. } if column == "Category"));
    }

    #[test]
    fn append_composes_pre_processing_and_training() {
        let data = products();
        let pre = EstimatorChain::new()
            .append(StageSpec::map_value_to_key("Category", "Label"))
            .fit(&MlContext::new(5), &data)
            .unwrap();
        let prepared = pre.transform(&data).unwrap();
        let train = EstimatorChain::new()
            .append(StageSpec::featurize_text("Name", "Features"))
            .append(StageSpec::Train(TrainerSpec::OneVersusAllFastForest {
                label: "Label".into(),
                features: "Features".into(),
                options: FastForestOptions::default(),
            }))
            .fit(&MlContext::new(5), &prepared)
            .unwrap();
        let full = pre.append(&train).unwrap();
        assert_eq!(full.input_schema, *data.schema());
        let row = full.transform_row(data.rows()[1].clone()).unwrap();
        assert_eq!(row.key(PREDICTED_LABEL_COLUMN).unwrap(), 2);

        let unrelated = EstimatorChain::new()
            .append(StageSpec::one_hot("Color", "ColorEncoded"))
            .fit(
                &MlContext::new(5),
                &DataView::from_rows(
                    Schema::new().with("Color", ColumnType::Text),
                    vec![Row::new().with("Color", Value::Text("red".into()))],
                )
                .unwrap(),
            )
            .unwrap();
        assert!(pre.append(&unrelated).is_err());
    }
}
