//! In-memory tabular classification data and the train/test split.

use crate::error::{MltrackError, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Feature matrix, label vector, and their names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    features: Vec<Vec<f64>>,
    labels: Vec<usize>,
    feature_names: Vec<String>,
    label_names: Vec<String>,
}

impl Dataset {
    /// Build a dataset, checking that rows, labels and names agree.
    pub fn new(
        features: Vec<Vec<f64>>,
        labels: Vec<usize>,
        feature_names: Vec<String>,
        label_names: Vec<String>,
    ) -> Result<Self> {
        if features.len() != labels.len() {
            return Err(MltrackError::dataset(format!(
                "{} feature rows but {} labels",
                features.len(),
                labels.len()
            )));
        }
        if feature_names.is_empty() || label_names.is_empty() {
            return Err(MltrackError::dataset(
                "feature and label names must be non-empty",
            ));
        }
        if let Some((row, values)) = features
            .iter()
            .enumerate()
            .find(|(_, r)| r.len() != feature_names.len())
        {
            return Err(MltrackError::dataset(format!(
                "row {row} has {} values, expected {}",
                values.len(),
                feature_names.len()
            )));
        }
        if let Some(label) = labels.iter().find(|l| **l >= label_names.len()) {
            return Err(MltrackError::dataset(format!(
                "label {label} has no name ({} label names)",
                label_names.len()
            )));
        }
        Ok(Self {
            features,
            labels,
            feature_names,
            label_names,
        })
    }

    pub fn features(&self) -> &[Vec<f64>] {
        &self.features
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    pub fn n_samples(&self) -> usize {
        self.labels.len()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// `(features, labels, feature_names, label_names)`.
    pub fn into_parts(self) -> (Vec<Vec<f64>>, Vec<usize>, Vec<String>, Vec<String>) {
        (
            self.features,
            self.labels,
            self.feature_names,
            self.label_names,
        )
    }

    /// Shuffle and split into train/test partitions.
    ///
    /// The test partition holds `ceil(n * test_size)` rows. With `seed` set the
    /// partition is reproducible; without it the shuffle draws from OS entropy.
    pub fn train_test_split(&self, test_size: f64, seed: Option<u64>) -> Result<TrainTestSplit> {
        let n = self.n_samples();
        let n_test = test_rows(n, test_size)?;
        let n_train = n - n_test;

        let mut indices: Vec<usize> = (0..n).collect();
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        indices.shuffle(&mut rng);

        let (test_idx, train_idx) = indices.split_at(n_test);
        let take = |idx: &[usize]| -> (Vec<Vec<f64>>, Vec<usize>) {
            idx.iter()
                .map(|&i| (self.features[i].clone(), self.labels[i]))
                .unzip()
        };
        let (x_train, y_train) = take(train_idx);
        let (x_test, y_test) = take(test_idx);
        debug_assert_eq!(x_train.len(), n_train);

        Ok(TrainTestSplit {
            x_train,
            y_train,
            x_test,
            y_test,
            feature_names: self.feature_names.clone(),
            label_names: self.label_names.clone(),
        })
    }
}

/// Number of test rows for `n` samples, rejecting splits that leave a side empty.
pub fn test_rows(n: usize, test_size: f64) -> Result<usize> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(MltrackError::invalid_input(format!(
            "test_size must be in (0, 1), got {test_size}"
        )));
    }
    let raw = test_size * n as f64;
    // 0.2 * 150 must give 30, not 31.
    let n_test = if (raw - raw.round()).abs() < 1e-9 {
        raw.round()
    } else {
        raw.ceil()
    } as usize;
    if n_test == 0 || n_test >= n {
        return Err(MltrackError::invalid_input(format!(
            "test_size {test_size} leaves an empty partition for {n} samples"
        )));
    }
    Ok(n_test)
}

/// Train and test partitions of a [`Dataset`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainTestSplit {
    pub x_train: Vec<Vec<f64>>,
    pub y_train: Vec<usize>,
    pub x_test: Vec<Vec<f64>>,
    pub y_test: Vec<usize>,
    pub feature_names: Vec<String>,
    pub label_names: Vec<String>,
}

impl TrainTestSplit {
    pub fn train_rows(&self) -> usize {
        self.y_train.len()
    }

    pub fn test_rows(&self) -> usize {
        self.y_test.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> Dataset {
        let features = (0..10).map(|i| vec![i as f64, (i * 2) as f64]).collect();
        let labels = (0..10).map(|i| i % 2).collect();
        Dataset::new(
            features,
            labels,
            vec!["a".into(), "b".into()],
            vec!["even".into(), "odd".into()],
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_mismatched_lengths() {
        let err = Dataset::new(
            vec![vec![1.0]],
            vec![0, 1],
            vec!["x".into()],
            vec!["a".into(), "b".into()],
        )
        .unwrap_err();
        assert!(matches!(err, MltrackError::Dataset(_)));
    }

    #[test]
    fn test_rejects_unnamed_label() {
        let err = Dataset::new(vec![vec![1.0]], vec![3], vec!["x".into()], vec!["a".into()])
            .unwrap_err();
        assert!(err.to_string().contains("label 3"));
    }

    #[test]
    fn test_split_sizes() {
        let split = toy().train_test_split(0.3, Some(7)).unwrap();
        assert_eq!(split.test_rows(), 3);
        assert_eq!(split.train_rows(), 7);
        assert_eq!(split.x_train.len(), split.y_train.len());
    }

    #[test]
    fn test_split_is_seeded() {
        let data = toy();
        let a = data.train_test_split(0.2, Some(42)).unwrap();
        let b = data.train_test_split(0.2, Some(42)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_exact_fraction_does_not_round_up() {
        assert_eq!(test_rows(150, 0.2).unwrap(), 30);
        assert_eq!(test_rows(150, 0.3).unwrap(), 45);
        assert_eq!(test_rows(10, 0.25).unwrap(), 3);
    }

    #[test]
    fn test_invalid_test_size() {
        assert!(test_rows(10, 0.0).is_err());
        assert!(test_rows(10, 1.0).is_err());
        assert!(test_rows(10, f64::NAN).is_err());
        assert!(test_rows(1, 0.5).is_err());
    }
}
