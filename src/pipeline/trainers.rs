//! Trainer stages: the last estimator of a chain, producing `Score` columns.

use serde::{Deserialize, Serialize};

use super::data::{ColumnType, DataView, Row, Schema, Value};
use super::stages::Transformer;
use crate::context::MlContext;
use crate::error::{PipelineError, PipelineResult};
use crate::ml::forest::{FastForestOptions, MulticlassDataset, OneVersusAllModel, train_one_versus_all};
use crate::ml::gbdt::{FastTreeOptions, GbdtRegressor, RegressionDataset, train_gbdt_regressor};
use crate::ml::trainer::TrainingRun;
use crate::vision::{ImageClassificationOptions, ImageClassifierModel, fit_image_classifier};

pub const SCORE_COLUMN: &str = "Score";
pub const PREDICTED_LABEL_COLUMN: &str = "PredictedLabel";

/// Which trainer to fit, with its hyperparameters.
#[derive(Debug, Clone)]
pub enum TrainerSpec {
    FastTreeRegression {
        label: String,
        features: String,
        options: FastTreeOptions,
    },
    OneVersusAllFastForest {
        label: String,
        features: String,
        options: FastForestOptions,
    },
    ImageClassification(ImageClassificationOptions),
}

impl TrainerSpec {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FastTreeRegression { .. } => "fast_tree_regression",
            Self::OneVersusAllFastForest { .. } => "one_versus_all_fast_forest",
            Self::ImageClassification(_) => "image_classification",
        }
    }

    pub(crate) fn fit(&self, ctx: &MlContext, data: &DataView) -> PipelineResult<FittedTrainer> {
        let mut run = TrainingRun::new(self.name());
        run.run(|| match self {
            Self::FastTreeRegression {
                label,
                features,
                options,
            } => fit_fast_tree(label, features, options, data).map(FittedTrainer::FastTree),
            Self::OneVersusAllFastForest {
                label,
                features,
                options,
            } => fit_one_versus_all(label, features, options, ctx, data)
                .map(FittedTrainer::OneVersusAll),
            Self::ImageClassification(options) => {
                fit_image_classifier(options, ctx, data).map(FittedTrainer::Image)
            }
        })
    }
}

pub(crate) enum FittedTrainer {
    FastTree(FastTreeRegressionModel),
    OneVersusAll(OneVersusAllClassifier),
    Image(ImageClassifierModel),
}

/// Fitted boosted-tree regressor writing a `Score: Number` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FastTreeRegressionModel {
    pub label: String,
    pub features: String,
    pub model: GbdtRegressor,
}

impl Transformer for FastTreeRegressionModel {
    fn output_schema(&self, input: &Schema) -> PipelineResult<Schema> {
        input.require(
            &self.features,
            &ColumnType::Vector {
                len: self.model.feature_len,
            },
        )?;
        let mut schema = input.clone();
        schema.set(SCORE_COLUMN, ColumnType::Number);
        Ok(schema)
    }

    fn transform_row(&self, row: &mut Row) -> PipelineResult<()> {
        let score = self.model.predict(row.vector(&self.features)?);
        row.set(SCORE_COLUMN, Value::Number(score));
        Ok(())
    }
}

/// Fitted one-versus-all forest writing `Score` probabilities and a `PredictedLabel` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneVersusAllClassifier {
    pub label: String,
    pub features: String,
    /// Class names, `classes[key - 1]`.
    pub classes: Vec<String>,
    pub model: OneVersusAllModel,
}

impl Transformer for OneVersusAllClassifier {
    fn output_schema(&self, input: &Schema) -> PipelineResult<Schema> {
        input.require(
            &self.features,
            &ColumnType::Vector {
                len: self.model.feature_len,
            },
        )?;
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
        let scores = self.model.predict_proba(row.vector(&self.features)?);
        let key = crate::ml::argmax(&scores).map_or(0, |idx| idx as u32 + 1);
        row.set(SCORE_COLUMN, Value::Vector(scores));
        row.set(PREDICTED_LABEL_COLUMN, Value::Key(key));
        Ok(())
    }
}

fn feature_len(schema: &Schema, features: &str) -> PipelineResult<usize> {
    match schema.require_kind(features, "vector", |ty| matches!(ty, ColumnType::Vector { .. }))? {
        ColumnType::Vector { len } => Ok(*len),
        other => Err(PipelineError::schema_mismatch(features, "vector", other)),
    }
}

fn fit_fast_tree(
    label: &str,
    features: &str,
    options: &FastTreeOptions,
    data: &DataView,
) -> PipelineResult<FastTreeRegressionModel> {
    let schema = data.schema();
    schema.require(label, &ColumnType::Number)?;
    let feature_len = feature_len(schema, features)?;
    if data.is_empty() {
        return Err(PipelineError::EmptyDataset(
            "no rows to train the regressor on".to_string(),
        ));
    }
    let mut x = Vec::with_capacity(data.len());
    let mut y = Vec::with_capacity(data.len());
    for row in data.rows() {
        let target = row.number(label)?;
        if !target.is_finite() {
            return Err(PipelineError::Training(format!(
                "label column '{label}' contains a non-finite value"
            )));
        }
        x.push(row.vector(features)?.to_vec());
        y.push(target);
    }
    let model = train_gbdt_regressor(
        &RegressionDataset {
            feature_len,
            x,
            y,
        },
        options,
    )
    .map_err(PipelineError::Training)?;
    Ok(FastTreeRegressionModel {
        label: label.to_string(),
        features: features.to_string(),
        model,
    })
}

fn fit_one_versus_all(
    label: &str,
    features: &str,
    options: &FastForestOptions,
    ctx: &MlContext,
    data: &DataView,
) -> PipelineResult<OneVersusAllClassifier> {
    let schema = data.schema();
    schema.require_kind(label, "key", |ty| matches!(ty, ColumnType::Key { .. }))?;
    let classes = schema
        .key_values(label)
        .map(<[String]>::to_vec)
        .ok_or_else(|| PipelineError::schema_mismatch(label, "key with value dictionary", "key"))?;
    let feature_len = feature_len(schema, features)?;
    if data.is_empty() {
        return Err(PipelineError::EmptyDataset(
            "no rows to train the classifier on".to_string(),
        ));
    }

    let mut x = Vec::with_capacity(data.len());
    let mut y = Vec::with_capacity(data.len());
    for row in data.rows() {
        // Key 0 marks a value unseen by the key mapper; it has no class.
        let Some(class) = row.key(label)?.checked_sub(1) else {
            continue;
        };
        x.push(row.vector(features)?.to_vec());
        y.push(class as usize);
    }
    let distinct: std::collections::BTreeSet<usize> = y.iter().copied().collect();
    if distinct.len() < 2 {
        return Err(PipelineError::DegenerateDataset(format!(
            "multiclass training needs at least 2 classes, found {}",
            distinct.len()
        )));
    }
    let model = train_one_versus_all(
        &MulticlassDataset {
            feature_len,
            n_classes: classes.len(),
            x,
            y,
        },
        options,
        ctx,
    )
    .map_err(PipelineError::Training)?;
    Ok(OneVersusAllClassifier {
        label: label.to_string(),
        features: features.to_string(),
        classes,
        model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regression_view(n: usize) -> DataView {
        let schema = Schema::new()
            .with("Label", ColumnType::Number)
            .with("Features", ColumnType::Vector { len: 1 });
        let rows = (0..n)
            .map(|i| {
                Row::new()
                    .with("Label", Value::Number(if i < n / 2 { 1.0 } else { 9.0 }))
                    .with("Features", Value::Vector(vec![i as f32]))
            })
            .collect();
        DataView::from_rows(schema, rows).unwrap()
    }

    #[test]
    fn fast_tree_writes_score() {
        let spec = TrainerSpec::FastTreeRegression {
            label: "Label".into(),
            features: "Features".into(),
            options: FastTreeOptions {
                minimum_example_count_per_leaf: 2,
                ..FastTreeOptions::default()
            },
        };
        let FittedTrainer::FastTree(model) = spec.fit(&MlContext::default(), &regression_view(40)).unwrap() else {
            panic!("expected a fast tree model");
        };
        let mut row = Row::new().with("Features", Value::Vector(vec![35.0]));
        model.transform_row(&mut row).unwrap();
        assert!((row.number(SCORE_COLUMN).unwrap() - 9.0).abs() < 0.1);
    }

    #[test]
    fn empty_training_set_fails_the_run() {
        let spec = TrainerSpec::FastTreeRegression {
            label: "Label".into(),
            features: "Features".into(),
            options: FastTreeOptions::default(),
        };
        let err = spec.fit(&MlContext::default(), &regression_view(0)).err().unwrap();
        assert!(matches!(err, PipelineError::EmptyDataset(_)));
    }

    #[test]
    fn one_versus_all_needs_two_classes() {
        let mut schema = Schema::new().with("Features", ColumnType::Vector { len: 1 });
        schema.set_key("Label", vec!["a".into(), "b".into()]);
        let rows = (0..5)
            .map(|i| {
                Row::new()
                    .with("Label", Value::Key(1))
                    .with("Features", Value::Vector(vec![i as f32]))
            })
            .collect();
        let data = DataView::from_rows(schema, rows).unwrap();
        let spec = TrainerSpec::OneVersusAllFastForest {
            label: "Label".into(),
            features: "Features".into(),
            options: FastForestOptions::default(),
        };
        let err = spec.fit(&MlContext::default(), &data).err().unwrap();
        assert!(matches!(err, PipelineError::DegenerateDataset(_)));
    }
}
