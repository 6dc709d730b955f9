//! Multinomial logistic regression trained by full-batch gradient descent.

use crate::error::{MltrackError, Result};
use crate::models::estimator::Classifier;
use crate::models::hyperparams::Hyperparams;
use crate::models::preprocess::{Standardizer, argmax, check_rows, check_training_set};
use serde::{Deserialize, Serialize};

/// Softmax regression with L2 penalty `1 / C`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub max_iter: usize,
    pub learning_rate: f64,
    /// Inverse regularization strength.
    pub c: f64,
    /// Stop once the largest gradient component falls below this.
    pub tol: f64,
    pub random_state: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fitted: Option<LogisticState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LogisticState {
    scaler: Standardizer,
    /// One row per class: feature weights followed by the intercept.
    weights: Vec<Vec<f64>>,
    n_iter: usize,
}

impl LogisticRegression {
    pub fn defaults() -> Hyperparams {
        Hyperparams::new()
            .with("max_iter", 200)
            .with("learning_rate", 0.1)
            .with("c", 1.0)
            .with("tol", 1e-4)
            .with("random_state", 42)
    }

    pub fn from_params(params: &Hyperparams) -> Result<Self> {
        let model = Self {
            max_iter: params.usize("max_iter")?,
            learning_rate: params.f64("learning_rate")?,
            c: params.f64("c")?,
            tol: params.f64("tol")?,
            random_state: params.u64("random_state")?,
            fitted: None,
        };
        if model.max_iter == 0 {
            return Err(MltrackError::hyperparameter("max_iter", "must be at least 1"));
        }
        if model.learning_rate <= 0.0 {
            return Err(MltrackError::hyperparameter("learning_rate", "must be positive"));
        }
        if model.c <= 0.0 {
            return Err(MltrackError::hyperparameter("c", "must be positive"));
        }
        Ok(model)
    }

    /// Iterations actually run by the last `fit`.
    pub fn n_iter(&self) -> Option<usize> {
        self.fitted.as_ref().map(|s| s.n_iter)
    }

    fn probabilities(weights: &[Vec<f64>], row: &[f64]) -> Vec<f64> {
        let logits: Vec<f64> = weights
            .iter()
            .map(|w| {
                let (coef, bias) = w.split_at(row.len());
                coef.iter().zip(row).map(|(a, b)| a * b).sum::<f64>() + bias[0]
            })
            .collect();
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
        let total: f64 = exp.iter().sum();
        exp.into_iter().map(|e| e / total).collect()
    }
}

impl Classifier for LogisticRegression {
    fn fit(&mut self, x: &[Vec<f64>], y: &[usize]) -> Result<()> {
        let shape = check_training_set(x, y)?;
        let scaler = Standardizer::fit(x);
        let xs = scaler.transform(x);
        let n = shape.n_samples as f64;
        let width = shape.n_features + 1;
        let penalty = 1.0 / (self.c * n);

        let mut weights = vec![vec![0.0; width]; shape.n_classes];
        let mut n_iter = 0;
        for _ in 0..self.max_iter {
            n_iter += 1;
            let mut grad = vec![vec![0.0; width]; shape.n_classes];
            for (row, &label) in xs.iter().zip(y) {
                let probs = Self::probabilities(&weights, row);
                for (k, p) in probs.iter().enumerate() {
                    let err = p - if k == label { 1.0 } else { 0.0 };
                    for (g, v) in grad[k].iter_mut().zip(row) {
                        *g += err * v / n;
                    }
                    grad[k][width - 1] += err / n;
                }
            }
            let mut max_grad: f64 = 0.0;
            for (w, g) in weights.iter_mut().zip(grad.iter_mut()) {
                // Intercepts are not penalized.
                for j in 0..width - 1 {
                    g[j] += penalty * w[j];
                }
                for (wj, gj) in w.iter_mut().zip(g.iter()) {
                    *wj -= self.learning_rate * gj;
                    max_grad = max_grad.max(gj.abs());
                }
            }
            if max_grad < self.tol {
                break;
            }
        }
        if weights.iter().flatten().any(|w| !w.is_finite()) {
            return Err(MltrackError::invalid_input(
                "gradient descent diverged; lower learning_rate",
            ));
        }

        self.fitted = Some(LogisticState {
            scaler,
            weights,
            n_iter,
        });
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<usize>> {
        let state = self
            .fitted
            .as_ref()
            .ok_or_else(|| MltrackError::NotFitted("LogisticRegression".into()))?;
        check_rows(x, state.scaler.n_features())?;
        Ok(x.iter()
            .map(|row| argmax(&Self::probabilities(&state.weights, &state.scaler.transform_row(row))))
            .collect())
    }

    fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> (Vec<Vec<f64>>, Vec<usize>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..20 {
            let jitter = (i % 5) as f64 * 0.1;
            x.push(vec![0.0 + jitter, 0.0 - jitter]);
            y.push(0);
            x.push(vec![5.0 + jitter, 5.0 - jitter]);
            y.push(1);
            x.push(vec![0.0 + jitter, 10.0 - jitter]);
            y.push(2);
        }
        (x, y)
    }

    #[test]
    fn test_separates_blobs() {
        let (x, y) = blobs();
        let mut model = LogisticRegression::from_params(&LogisticRegression::defaults()).unwrap();
        model.fit(&x, &y).unwrap();
        assert_eq!(model.predict(&x).unwrap(), y);
        assert!(model.n_iter().unwrap() <= 200);
    }

    #[test]
    fn test_predict_before_fit() {
        let model = LogisticRegression::from_params(&LogisticRegression::defaults()).unwrap();
        assert!(matches!(
            model.predict(&[vec![1.0, 2.0]]),
            Err(MltrackError::NotFitted(_))
        ));
    }

    #[test]
    fn test_rejects_bad_params() {
        let params = LogisticRegression::defaults().with("c", 0.0);
        assert!(LogisticRegression::from_params(&params).is_err());
    }
}
