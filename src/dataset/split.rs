//! Seeded random train/test splitting of a data view.

use rand::seq::SliceRandom;

use super::DatasetError;
use crate::context::MlContext;
use crate::pipeline::data::DataView;

const SPLIT_STREAM: u64 = 0x5_9117;

/// The two halves of a split. Rows keep their original relative order.
#[derive(Debug, Clone)]
pub struct TrainTestData {
    pub train_set: DataView,
    pub test_set: DataView,
}

/// Randomly move `test_fraction` of the rows into the test set.
///
/// With two or more rows both sets are non-empty. The same context seed
/// always produces the same split.
pub fn train_test_split(
    ctx: &MlContext,
    data: &DataView,
    test_fraction: f64,
) -> Result<TrainTestData, DatasetError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(DatasetError::InvalidFraction(test_fraction));
    }
    let n = data.len();
    let test_n = if n < 2 {
        0
    } else {
        ((n as f64 * test_fraction).round() as usize).clamp(1, n - 1)
    };

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut ctx.rng(SPLIT_STREAM));
    let (test, train) = indices.split_at_mut(test_n);
    test.sort_unstable();
    train.sort_unstable();
    Ok(TrainTestData {
        train_set: data.select(train),
        test_set: data.select(test),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::data::{ColumnType, Row, Schema, Value};

    fn numbers(n: usize) -> DataView {
        let schema = Schema::new().with("x", ColumnType::Number);
        let rows = (0..n)
            .map(|i| Row::new().with("x", Value::Number(i as f32)))
            .collect();
        DataView::from_rows(schema, rows).unwrap()
    }

    fn values(view: &DataView) -> Vec<f32> {
        view.rows().iter().map(|r| r.number("x").unwrap()).collect()
    }

    #[test]
    fn split_sizes_and_order() {
        let split = train_test_split(&MlContext::new(3), &numbers(10), 0.2).unwrap();
        assert_eq!(split.test_set.len(), 2);
        assert_eq!(split.train_set.len(), 8);
        let train = values(&split.train_set);
        assert!(train.windows(2).all(|w| w[0] < w[1]));
        let mut all: Vec<f32> = train.into_iter().chain(values(&split.test_set)).collect();
        all.sort_by(f32::total_cmp);
        assert_eq!(all, (0..10).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn same_seed_same_split() {
        let data = numbers(50);
        let a = train_test_split(&MlContext::new(1), &data, 0.3).unwrap();
        let b = train_test_split(&MlContext::new(1), &data, 0.3).unwrap();
        assert_eq!(values(&a.test_set), values(&b.test_set));
    }

    #[test]
    fn small_sets_keep_both_sides() {
        let split = train_test_split(&MlContext::new(0), &numbers(2), 0.01).unwrap();
        assert_eq!(split.test_set.len(), 1);
        assert_eq!(split.train_set.len(), 1);
        let single = train_test_split(&MlContext::new(0), &numbers(1), 0.5).unwrap();
        assert_eq!(single.train_set.len(), 1);
        assert!(single.test_set.is_empty());
    }

    #[test]
    fn rejects_out_of_range_fraction() {
        assert!(train_test_split(&MlContext::new(0), &numbers(4), 0.0).is_err());
        assert!(train_test_split(&MlContext::new(0), &numbers(4), 1.0).is_err());
    }
}
