//! Classification metrics.

use crate::error::{MltrackError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Classification metrics, macro-averaged over classes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    /// `confusion_matrix[true][predicted]`
    pub confusion_matrix: Vec<Vec<usize>>,
}

impl ClassificationMetrics {
    /// Compare predictions against ground truth.
    ///
    /// Averages over every class that appears in either `y_true` or `y_pred`.
    /// A class with no predicted (or no true) rows contributes 0 precision
    /// (or recall) instead of dividing by zero.
    pub fn compute(y_true: &[usize], y_pred: &[usize]) -> Result<Self> {
        if y_true.len() != y_pred.len() {
            return Err(MltrackError::invalid_input(format!(
                "{} labels but {} predictions",
                y_true.len(),
                y_pred.len()
            )));
        }
        if y_true.is_empty() {
            return Err(MltrackError::invalid_input("no labels to evaluate"));
        }

        let n_classes = y_true.iter().chain(y_pred).max().map_or(0, |m| m + 1);
        let mut confusion = vec![vec![0usize; n_classes]; n_classes];
        for (&t, &p) in y_true.iter().zip(y_pred) {
            confusion[t][p] += 1;
        }

        let mut present = vec![false; n_classes];
        for &label in y_true.iter().chain(y_pred) {
            present[label] = true;
        }

        let (mut precision, mut recall, mut f1) = (0.0, 0.0, 0.0);
        let mut classes = 0usize;
        for class in (0..n_classes).filter(|&c| present[c]) {
            classes += 1;
            let tp = confusion[class][class] as f64;
            let predicted: usize = confusion.iter().map(|row| row[class]).sum();
            let actual: usize = confusion[class].iter().sum();
            let p = ratio(tp, predicted as f64);
            let r = ratio(tp, actual as f64);
            precision += p;
            recall += r;
            f1 += ratio(2.0 * p * r, p + r);
        }
        let classes = classes as f64;
        let correct: usize = (0..n_classes).map(|c| confusion[c][c]).sum();

        Ok(Self {
            accuracy: correct as f64 / y_true.len() as f64,
            precision: precision / classes,
            recall: recall / classes,
            f1_score: f1 / classes,
            confusion_matrix: confusion,
        })
    }

    /// Scalar metrics keyed by their tracking names.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("accuracy".to_string(), self.accuracy),
            ("precision".to_string(), self.precision),
            ("recall".to_string(), self.recall),
            ("f1_score".to_string(), self.f1_score),
        ])
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 { 0.0 } else { num / den }
}
