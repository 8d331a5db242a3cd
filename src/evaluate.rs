//! Scoring a held-out data view and summarizing model quality.

use std::fmt;

use tracing::warn;

use crate::error::{PipelineError, PipelineResult};
use crate::ml::metrics::{
    ConfusionMatrix, PerClassStats, RegressionMetrics, accuracy, log_loss, log_loss_reduction,
    macro_accuracy, precision_recall_by_class, prior_log_loss, top_k_accuracy,
};
use crate::pipeline::FittedPipeline;
use crate::pipeline::data::{ColumnType, DataView, Row, Schema};
use crate::pipeline::trainers::SCORE_COLUMN;

const RULE: &str = "*************************************************";
const SUBRULE: &str = "*------------------------------------------------";

/// Quality of a multiclass classifier on one data view.
#[derive(Debug, Clone, PartialEq)]
pub struct MulticlassMetrics {
    pub classes: Vec<String>,
    pub micro_accuracy: f32,
    pub macro_accuracy: f32,
    pub log_loss: f64,
    pub log_loss_reduction: f64,
    /// Mean log-loss of the rows of each class; `None` for classes absent from the data.
    pub per_class_log_loss: Vec<Option<f64>>,
    pub per_class: Vec<PerClassStats>,
    pub confusion: ConfusionMatrix,
    /// `(k, accuracy)`; only reported with more than three classes.
    pub top_k_accuracy: Option<(usize, f32)>,
    pub count: usize,
}

/// Transform `data` and compare the `Score` column with `label_column`.
pub fn evaluate_regression(
    pipeline: &FittedPipeline,
    data: &DataView,
    label_column: &str,
) -> PipelineResult<RegressionMetrics> {
    data.schema().require(label_column, &ColumnType::Number)?;
    let scored = pipeline.transform(data)?;
    let mut predictions = Vec::with_capacity(scored.len());
    let mut labels = Vec::with_capacity(scored.len());
    for row in scored.rows() {
        let label = row.number(label_column)?;
        if label.is_nan() {
            continue;
        }
        predictions.push(row.number(SCORE_COLUMN)?);
        labels.push(label);
    }
    Ok(RegressionMetrics::compute(&predictions, &labels))
}

/// Transform `data` and compare predicted classes and scores with `label_column`.
///
/// The label may be a key column or the raw text label; either way it is
/// matched to the classifier's classes by name. Rows whose label is not one of
/// the known classes are left out.
pub fn evaluate_multiclass(
    pipeline: &FittedPipeline,
    data: &DataView,
    label_column: &str,
    score_column: &str,
    predicted_column: &str,
) -> PipelineResult<MulticlassMetrics> {
    let scored = pipeline.transform(data)?;
    let schema = scored.schema();
    let classes = schema
        .key_values(predicted_column)
        .map(<[String]>::to_vec)
        .ok_or_else(|| {
            PipelineError::schema_mismatch(predicted_column, "key with value dictionary", "missing")
        })?;
    schema.require(score_column, &ColumnType::Vector { len: classes.len() })?;
    let truth_of = TruthLookup::new(schema, label_column, &classes)?;

    let mut confusion = ConfusionMatrix::new(classes.len());
    let mut probabilities = Vec::with_capacity(scored.len());
    let mut truth = Vec::with_capacity(scored.len());
    let mut unknown = 0usize;
    for row in scored.rows() {
        let Some(class) = truth_of.class(row)? else {
            unknown += 1;
            continue;
        };
        let predicted = row.key(predicted_column)?;
        if let Some(predicted) = predicted.checked_sub(1) {
            confusion.add(class, predicted as usize);
        }
        probabilities.push(row.vector(score_column)?.to_vec());
        truth.push(class);
    }
    if unknown > 0 {
        warn!(unknown, "Rows with labels unseen during training were not evaluated");
    }

    let overall = log_loss(&probabilities, &truth);
    let prior = prior_log_loss(&truth, classes.len());
    let per_class_log_loss = (0..classes.len())
        .map(|class| {
            let (probs, labels): (Vec<Vec<f32>>, Vec<usize>) = probabilities
                .iter()
                .zip(&truth)
                .filter(|(_, label)| **label == class)
                .map(|(p, l)| (p.clone(), *l))
                .unzip();
            (!labels.is_empty()).then(|| log_loss(&probs, &labels))
        })
        .collect();
    let top_k_accuracy =
        (classes.len() > 3).then(|| (3, top_k_accuracy(&probabilities, &truth, 3)));

    Ok(MulticlassMetrics {
        micro_accuracy: accuracy(&confusion),
        macro_accuracy: macro_accuracy(&confusion),
        log_loss: overall,
        log_loss_reduction: log_loss_reduction(overall, prior),
        per_class_log_loss,
        per_class: precision_recall_by_class(&confusion),
        confusion,
        top_k_accuracy,
        count: truth.len(),
        classes,
    })
}

/// Resolves a row's label to a class index of the classifier.
enum TruthLookup<'a> {
    Text {
        column: &'a str,
        classes: &'a [String],
    },
    /// `mapping[key - 1]` is the class index for that key, if the class is known.
    Key {
        column: &'a str,
        mapping: Vec<Option<usize>>,
    },
}

impl<'a> TruthLookup<'a> {
    fn new(schema: &'a Schema, column: &'a str, classes: &'a [String]) -> PipelineResult<Self> {
        let kind = schema.require_kind(column, "key or text", |ty| {
            matches!(ty, ColumnType::Text | ColumnType::Key { .. })
        })?;
        Ok(match kind {
            ColumnType::Key { cardinality } => {
                let mapping = match schema.key_values(column) {
                    Some(values) => values
                        .iter()
                        .map(|value| classes.iter().position(|c| c == value))
                        .collect(),
                    None => (0..*cardinality as usize)
                        .map(|idx| (idx < classes.len()).then_some(idx))
                        .collect(),
                };
                Self::Key { column, mapping }
            }
            _ => Self::Text { column, classes },
        })
    }

    fn class(&self, row: &Row) -> PipelineResult<Option<usize>> {
        Ok(match self {
            Self::Text { column, classes } => {
                let label = row.text(column)?;
                classes.iter().position(|c| c == label)
            }
            Self::Key { column, mapping } => row
                .key(column)?
                .checked_sub(1)
                .and_then(|idx| mapping.get(idx as usize).copied().flatten()),
        })
    }
}

fn header(f: &mut fmt::Formatter<'_>, title: &str) -> fmt::Result {
    writeln!(f, "{RULE}")?;
    writeln!(f, "*       {title}")?;
    writeln!(f, "{SUBRULE}")
}

impl fmt::Display for RegressionMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        header(f, "Model quality metrics evaluation")?;
        writeln!(f, "*       LossFn:        {:.2}", self.loss_function)?;
        writeln!(f, "*       R2 Score:      {:.2}", self.r_squared)?;
        writeln!(f, "*       Absolute loss: {:.2}", self.mean_absolute_error)?;
        writeln!(f, "*       Squared loss:  {:.2}", self.mean_squared_error)?;
        writeln!(f, "*       RMS loss:      {:.2}", self.root_mean_squared_error)?;
        writeln!(f, "*       Rows:          {}", self.count)?;
        write!(f, "{RULE}")
    }
}

impl fmt::Display for MulticlassMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        header(f, "Model quality metrics evaluation")?;
        writeln!(f, "*       MicroAccuracy:    {:.3}", self.micro_accuracy)?;
        writeln!(f, "*       MacroAccuracy:    {:.3}", self.macro_accuracy)?;
        writeln!(f, "*       LogLoss:          {:.3}", self.log_loss)?;
        writeln!(f, "*       LogLossReduction: {:.3}", self.log_loss_reduction)?;
        if let Some((k, top_k)) = self.top_k_accuracy {
            writeln!(f, "*       Top-{k} accuracy:   {top_k:.3}")?;
        }
        writeln!(f, "*       Rows:             {}", self.count)?;
        writeln!(f, "{SUBRULE}")?;
        for (idx, class) in self.classes.iter().enumerate() {
            let Some(stats) = self.per_class.get(idx) else {
                continue;
            };
            let class_log_loss = self
                .per_class_log_loss
                .get(idx)
                .copied()
                .flatten()
                .map_or_else(|| "n/a".to_string(), |ll| format!("{ll:.3}"));
            writeln!(
                f,
                "*       {class}: precision {:.3}, recall {:.3}, support {}, log loss {class_log_loss}",
                stats.precision, stats.recall, stats.support
            )?;
        }
        write!(f, "{RULE}")
    }
}
