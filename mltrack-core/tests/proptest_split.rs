//! Property tests for the train/test split.

use mltrack_core::data::Dataset;
use mltrack_core::data::dataset::test_rows;
use proptest::prelude::*;

fn dataset(n: usize) -> Dataset {
    let features = (0..n).map(|i| vec![i as f64, (i % 7) as f64]).collect();
    let labels = (0..n).map(|i| i % 2).collect();
    Dataset::new(
        features,
        labels,
        vec!["x".into(), "y".into()],
        vec!["even".into(), "odd".into()],
    )
    .unwrap()
}

proptest! {
    #[test]
    fn split_partitions_every_row(n in 4usize..300, test_size in 0.05f64..0.95, seed in any::<u64>()) {
        let data = dataset(n);
        prop_assume!(test_rows(n, test_size).is_ok());
        let split = data.train_test_split(test_size, Some(seed)).unwrap();

        prop_assert_eq!(split.train_rows() + split.test_rows(), n);
        prop_assert_eq!(split.test_rows(), test_rows(n, test_size).unwrap());
        prop_assert_eq!(split.x_train.len(), split.y_train.len());
        prop_assert_eq!(split.x_test.len(), split.y_test.len());

        // Row i carries x == i, so the union of both sides is exactly 0..n.
        let mut seen: Vec<usize> = split
            .x_train
            .iter()
            .chain(&split.x_test)
            .map(|row| row[0] as usize)
            .collect();
        seen.sort_unstable();
        prop_assert_eq!(seen, (0..n).collect::<Vec<_>>());
    }

    #[test]
    fn same_seed_same_split(n in 4usize..200, seed in any::<u64>()) {
        let data = dataset(n);
        prop_assume!(test_rows(n, 0.25).is_ok());
        let first = data.train_test_split(0.25, Some(seed)).unwrap();
        let second = data.train_test_split(0.25, Some(seed)).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn test_size_outside_unit_interval_is_rejected(test_size in prop_oneof![-5.0f64..=0.0, 1.0f64..5.0]) {
        let data = dataset(20);
        prop_assert!(data.train_test_split(test_size, Some(1)).is_err());
    }
}
