//! Scoring single inputs and batches with a fitted pipeline.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::FittedPipeline;
use crate::pipeline::data::{IntoRow, Row, Value};
use crate::pipeline::trainers::{PREDICTED_LABEL_COLUMN, SCORE_COLUMN};

/// The model's answer for one input.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictedLabel {
    Class(String),
    Score(f32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: PredictedLabel,
    /// Per-class scores for classifiers, indexed like the class dictionary.
    pub scores: Option<Vec<f32>>,
    /// The fully transformed row, for reading any other output column.
    pub row: Row,
}

impl Prediction {
    /// Highest class score, if this is a classification.
    pub fn max_score(&self) -> Option<f32> {
        self.scores
            .as_ref()?
            .iter()
            .copied()
            .filter(|s| !s.is_nan())
            .reduce(f32::max)
    }
}

/// Read-only wrapper over a fitted pipeline.
pub struct PredictionEngine<'a> {
    pipeline: &'a FittedPipeline,
    classes: Option<&'a [String]>,
}

impl<'a> PredictionEngine<'a> {
    pub fn new(pipeline: &'a FittedPipeline) -> Self {
        Self {
            pipeline,
            classes: pipeline.output_schema.key_values(PREDICTED_LABEL_COLUMN),
        }
    }

    pub fn pipeline(&self) -> &FittedPipeline {
        self.pipeline
    }

    pub fn predict<T: IntoRow>(&self, input: &T) -> PipelineResult<Prediction> {
        self.predict_row(input.to_row())
    }

    pub fn predict_row(&self, row: Row) -> PipelineResult<Prediction> {
        let row = self.pipeline.transform_row(row)?;
        self.read_prediction(row)
    }

    fn read_prediction(&self, row: Row) -> PipelineResult<Prediction> {
        match (row.get(PREDICTED_LABEL_COLUMN), row.get(SCORE_COLUMN)) {
            (Some(Value::Key(key)), score) => {
                let classes = self.classes.unwrap_or_default();
                let label = key
                    .checked_sub(1)
                    .and_then(|idx| classes.get(idx as usize))
                    .cloned()
                    .ok_or_else(|| {
                        PipelineError::schema_mismatch(
                            PREDICTED_LABEL_COLUMN,
                            format!("key in 1..={}", classes.len()),
                            key,
                        )
                    })?;
                let scores = match score {
                    Some(Value::Vector(scores)) => Some(scores.clone()),
                    _ => None,
                };
                Ok(Prediction {
                    label: PredictedLabel::Class(label),
                    scores,
                    row,
                })
            }
            (_, Some(Value::Number(score))) => Ok(Prediction {
                label: PredictedLabel::Score(*score),
                scores: None,
                row,
            }),
            (_, other) => Err(PipelineError::schema_mismatch(
                SCORE_COLUMN,
                "number or key prediction",
                other.map_or_else(|| "missing column".to_string(), Value::describe),
            )),
        }
    }

    /// Score `inputs` on up to `workers` threads.
    ///
    /// Each result carries the index of its input; one failing input does not
    /// stop the others. The output is sorted by index.
    pub fn predict_batch<T: IntoRow + Sync>(
        &self,
        inputs: &[T],
        workers: usize,
    ) -> Vec<(usize, PipelineResult<Prediction>)> {
        let workers = workers.clamp(1, inputs.len().max(1));
        let queue: Arc<Mutex<VecDeque<usize>>> = Arc::new(Mutex::new((0..inputs.len()).collect()));
        let (tx, rx) = mpsc::channel::<(usize, PipelineResult<Prediction>)>();

        thread::scope(|scope| {
            for worker in 0..workers {
                let queue = Arc::clone(&queue);
                let tx = tx.clone();
                scope.spawn(move || {
                    let mut done = 0usize;
                    loop {
                        let next = match queue.lock() {
                            Ok(mut queue) => queue.pop_front(),
                            Err(_) => None,
                        };
                        let Some(idx) = next else {
                            break;
                        };
                        let result = self.predict(&inputs[idx]);
                        if tx.send((idx, result)).is_err() {
                            break;
                        }
                        done += 1;
                    }
                    debug!(worker, done, "Prediction worker finished");
                });
            }
        });
        drop(tx);

        let mut results: Vec<(usize, PipelineResult<Prediction>)> = rx.into_iter().collect();
        if results.len() < inputs.len() {
            warn!(
                expected = inputs.len(),
                got = results.len(),
                "Prediction workers exited early"
            );
        }
        results.sort_by_key(|(idx, _)| *idx);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MlContext;
    use crate::ml::forest::FastForestOptions;
    use crate::ml::gbdt::FastTreeOptions;
    use crate::pipeline::data::{ColumnType, DataView, Schema};
    use crate::pipeline::trainers::TrainerSpec;
    use crate::pipeline::{EstimatorChain, StageSpec};

    struct Point {
        x: f32,
        y: f32,
    }

    impl IntoRow for Point {
        fn schema() -> Schema {
            Schema::new()
                .with("X", ColumnType::Number)
                .with("Y", ColumnType::Number)
        }

        fn to_row(&self) -> Row {
            Row::new()
                .with("X", Value::Number(self.x))
                .with("Y", Value::Number(self.y))
        }
    }

    fn regression() -> FittedPipeline {
        let points: Vec<Point> = (0..40)
            .map(|i| Point {
                x: i as f32,
                y: if i < 20 { 1.0 } else { 5.0 },
            })
            .collect();
        EstimatorChain::new()
            .append(StageSpec::concatenate("Features", &["X"]))
            .append(StageSpec::Train(TrainerSpec::FastTreeRegression {
                label: "Y".into(),
                features: "Features".into(),
                options: FastTreeOptions {
                    minimum_example_count_per_leaf: 2,
                    ..FastTreeOptions::default()
                },
            }))
            .fit(&MlContext::new(1), &DataView::from_records(&points))
            .unwrap()
    }

    struct Word {
        text: &'static str,
        kind: &'static str,
    }

    impl IntoRow for Word {
        fn schema() -> Schema {
            Schema::new()
                .with("Text", ColumnType::Text)
                .with("Kind", ColumnType::Text)
        }

        fn to_row(&self) -> Row {
            Row::new()
                .with("Text", Value::Text(self.text.into()))
                .with("Kind", Value::Text(self.kind.into()))
        }
    }

    fn classifier() -> FittedPipeline {
        let words: Vec<Word> = ["red apple", "green pear", "ripe apple", "soft pear"]
            .iter()
            .cycle()
            .take(16)
            .map(|&text| Word {
                text,
                kind: if text.ends_with("apple") { "apple" } else { "pear" },
            })
            .collect();
        EstimatorChain::new()
            .append(StageSpec::featurize_text("Text", "Features"))
            .append(StageSpec::map_value_to_key("Kind", "Label"))
            .append(StageSpec::Train(TrainerSpec::OneVersusAllFastForest {
                label: "Label".into(),
                features: "Features".into(),
                options: FastForestOptions::default(),
            }))
            .fit(&MlContext::new(1), &DataView::from_records(&words))
            .unwrap()
    }

    #[test]
    fn regression_prediction_is_a_score() {
        let pipeline = regression();
        let engine = PredictionEngine::new(&pipeline);
        let low = engine.predict(&Point { x: 3.0, y: 0.0 }).unwrap();
        let high = engine.predict(&Point { x: 35.0, y: 0.0 }).unwrap();
        match (low.label, high.label) {
            (PredictedLabel::Score(low), PredictedLabel::Score(high)) => {
                assert!((low - 1.0).abs() < 0.5, "{low}");
                assert!((high - 5.0).abs() < 0.5, "{high}");
            }
            other => panic!("unexpected labels {other:?}"),
        }
        assert!(low.scores.is_none());
    }

    #[test]
    fn classification_prediction_names_the_class() {
        let pipeline = classifier();
        let engine = PredictionEngine::new(&pipeline);
        let prediction = engine
            .predict(&Word {
                text: "apple",
                kind: "apple",
            })
            .unwrap();
        assert_eq!(prediction.label, PredictedLabel::Class("apple".into()));
        let scores = prediction.scores.as_ref().unwrap();
        assert_eq!(scores.len(), 2);
        assert!((scores.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert_eq!(prediction.max_score(), Some(scores[0]));
    }

    #[test]
    fn batch_matches_single_predictions_in_input_order() {
        let pipeline = regression();
        let engine = PredictionEngine::new(&pipeline);
        let points: Vec<Point> = (0..25).map(|i| Point { x: i as f32 * 1.7, y: 0.0 }).collect();
        let batch = engine.predict_batch(&points, 4);
        assert_eq!(batch.len(), points.len());
        for (expected_idx, (idx, result)) in batch.into_iter().enumerate() {
            assert_eq!(idx, expected_idx);
            let single = engine.predict(&points[idx]).unwrap();
            assert_eq!(result.unwrap().label, single.label);
        }
    }

    #[test]
    fn batch_of_nothing_is_empty() {
        let pipeline = regression();
        let engine = PredictionEngine::new(&pipeline);
        assert!(engine.predict_batch::<Point>(&[], 8).is_empty());
    }

    #[test]
    fn wrong_input_schema_is_rejected() {
        let pipeline = regression();
        let engine = PredictionEngine::new(&pipeline);
        let err = engine
            .predict_row(Row::new().with("X", Value::Text("nope".into())))
            .unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch { .. }));
    }
}
