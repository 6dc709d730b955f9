//! Input validation and feature standardization shared by the classifiers.

use crate::error::{MltrackError, Result};
use serde::{Deserialize, Serialize};

/// Shape of a validated training set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingShape {
    pub n_samples: usize,
    pub n_features: usize,
    pub n_classes: usize,
}

/// Check a training set and report its shape.
///
/// Requires at least one sample, rectangular rows, finite values, and two distinct classes.
pub fn check_training_set(x: &[Vec<f64>], y: &[usize]) -> Result<TrainingShape> {
    if x.is_empty() {
        return Err(MltrackError::invalid_input("training set is empty"));
    }
    if x.len() != y.len() {
        return Err(MltrackError::invalid_input(format!(
            "{} rows but {} labels",
            x.len(),
            y.len()
        )));
    }
    let n_features = x[0].len();
    if n_features == 0 {
        return Err(MltrackError::invalid_input("rows have no features"));
    }
    check_rows(x, n_features)?;

    let n_classes = y.iter().max().map_or(0, |m| m + 1);
    let first = y[0];
    if y.iter().all(|&label| label == first) {
        return Err(MltrackError::invalid_input(format!(
            "at least two classes are required, training labels are all {first}"
        )));
    }
    Ok(TrainingShape {
        n_samples: x.len(),
        n_features,
        n_classes,
    })
}

/// Check that every row has `n_features` finite values.
pub fn check_rows(x: &[Vec<f64>], n_features: usize) -> Result<()> {
    for (i, row) in x.iter().enumerate() {
        if row.len() != n_features {
            return Err(MltrackError::invalid_input(format!(
                "row {i} has {} features, expected {n_features}",
                row.len()
            )));
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(MltrackError::invalid_input(format!(
                "row {i} contains a non-finite value"
            )));
        }
    }
    Ok(())
}

/// Per-feature zero-mean / unit-variance scaling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl Standardizer {
    pub fn fit(x: &[Vec<f64>]) -> Self {
        let n_features = x.first().map_or(0, Vec::len);
        let n = x.len().max(1) as f64;
        let mut mean = vec![0.0; n_features];
        for row in x {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        let mut var = vec![0.0; n_features];
        for row in x {
            for ((s, v), m) in var.iter_mut().zip(row).zip(&mean) {
                *s += (v - m).powi(2) / n;
            }
        }
        // Constant columns pass through unscaled.
        let scale = var
            .into_iter()
            .map(|v| if v > 1e-24 { v.sqrt() } else { 1.0 })
            .collect();
        Self { mean, scale }
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }

    pub fn transform(&self, x: &[Vec<f64>]) -> Vec<Vec<f64>> {
        x.iter().map(|row| self.transform_row(row)).collect()
    }
}

/// Index of the largest count; ties go to the lowest index.
pub fn argmax_count(counts: &[usize]) -> usize {
    let mut best = 0;
    for (i, &c) in counts.iter().enumerate() {
        if c > counts[best] {
            best = i;
        }
    }
    best
}

/// Index of the largest score; ties go to the lowest index.
pub fn argmax(scores: &[f64]) -> usize {
    let mut best = 0;
    for (i, &s) in scores.iter().enumerate() {
        if s > scores[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standardizer_centers_and_scales() {
        let x = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let scaler = Standardizer::fit(&x);
        let t = scaler.transform(&x);
        assert_eq!(t[0], vec![-1.0, 0.0]);
        assert_eq!(t[1], vec![1.0, 0.0]);
    }

    #[test]
    fn test_single_class_rejected() {
        let err = check_training_set(&[vec![1.0], vec![2.0]], &[1, 1]).unwrap_err();
        assert!(err.to_string().contains("two classes"));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = check_training_set(&[vec![1.0, 2.0], vec![2.0]], &[0, 1]).unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn test_argmax_ties_go_low() {
        assert_eq!(argmax_count(&[2, 5, 5]), 1);
        assert_eq!(argmax(&[0.1, 0.1]), 0);
    }
}
