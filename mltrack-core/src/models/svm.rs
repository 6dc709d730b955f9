//! RBF-kernel support vector classifier.
//!
//! Each class gets a one-vs-rest kernel SVM trained with the Pegasos
//! stochastic sub-gradient method. Inputs are standardized first, and a
//! constant is added to the kernel so the decision function carries a bias.
//!
//! Kernel values are computed on demand against the current support set, so
//! memory stays linear in the number of rows. Training time grows with
//! `max_iter * rows * support vectors`, and training sets above
//! [`MAX_TRAINING_ROWS`] are rejected.

use crate::error::{MltrackError, Result};
use crate::models::estimator::Classifier;
use crate::models::hyperparams::Hyperparams;
use crate::models::preprocess::{Standardizer, argmax, check_rows, check_training_set};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Largest training set [`RbfSvm`] accepts.
pub const MAX_TRAINING_ROWS: usize = 10_000;

/// RBF kernel width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gamma {
    /// `1 / (n_features * var(X))`
    Scale,
    /// `1 / n_features`
    Auto,
    Value(f64),
}

impl Gamma {
    fn from_params(params: &Hyperparams) -> Result<Self> {
        match params.get("gamma") {
            None | Some(Value::Null) => Ok(Self::Scale),
            Some(Value::String(s)) if s == "scale" => Ok(Self::Scale),
            Some(Value::String(s)) if s == "auto" => Ok(Self::Auto),
            Some(Value::String(s)) => Err(MltrackError::hyperparameter(
                "gamma",
                format!("unknown value '{s}', expected scale, auto or a number"),
            )),
            Some(_) => {
                let g = params.f64("gamma")?;
                if g > 0.0 {
                    Ok(Self::Value(g))
                } else {
                    Err(MltrackError::hyperparameter("gamma", "must be positive"))
                }
            }
        }
    }

    fn resolve(self, x: &[Vec<f64>]) -> f64 {
        let n_features = x.first().map_or(1, Vec::len).max(1) as f64;
        match self {
            Self::Auto => 1.0 / n_features,
            Self::Value(g) => g,
            Self::Scale => {
                let values: Vec<f64> = x.iter().flatten().copied().collect();
                let count = values.len().max(1) as f64;
                let mean = values.iter().sum::<f64>() / count;
                let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
                if var > 0.0 {
                    1.0 / (n_features * var)
                } else {
                    1.0
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RbfSvm {
    pub c: f64,
    pub gamma: Gamma,
    /// Passes over the training set.
    pub max_iter: usize,
    pub random_state: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fitted: Option<SvmState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SvmState {
    scaler: Standardizer,
    gamma: f64,
    support_vectors: Vec<Vec<f64>>,
    /// One row per class, one coefficient per support vector.
    dual_coef: Vec<Vec<f64>>,
}

fn rbf(gamma: f64, a: &[f64], b: &[f64]) -> f64 {
    let dist: f64 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
    (-gamma * dist).exp()
}

impl RbfSvm {
    pub fn defaults() -> Hyperparams {
        Hyperparams::new()
            .with("c", 1.0)
            .with("gamma", "scale")
            .with("max_iter", 100)
            .with("random_state", 42)
    }

    pub fn from_params(params: &Hyperparams) -> Result<Self> {
        let model = Self {
            c: params.f64("c")?,
            gamma: Gamma::from_params(params)?,
            max_iter: params.usize("max_iter")?,
            random_state: params.u64("random_state")?,
            fitted: None,
        };
        if model.c <= 0.0 {
            return Err(MltrackError::hyperparameter("c", "must be positive"));
        }
        if model.max_iter == 0 {
            return Err(MltrackError::hyperparameter("max_iter", "must be at least 1"));
        }
        Ok(model)
    }

    /// Number of training rows kept as support vectors.
    pub fn n_support(&self) -> Option<usize> {
        self.fitted.as_ref().map(|s| s.support_vectors.len())
    }

    fn decision(state: &SvmState, row: &[f64]) -> Vec<f64> {
        let kernel: Vec<f64> = state
            .support_vectors
            .iter()
            .map(|sv| rbf(state.gamma, sv, row) + 1.0)
            .collect();
        state
            .dual_coef
            .iter()
            .map(|coef| coef.iter().zip(&kernel).map(|(a, k)| a * k).sum())
            .collect()
    }
}

impl Classifier for RbfSvm {
    fn fit(&mut self, x: &[Vec<f64>], y: &[usize]) -> Result<()> {
        let shape = check_training_set(x, y)?;
        if shape.n_samples > MAX_TRAINING_ROWS {
            return Err(MltrackError::invalid_input(format!(
                "svm_rbf trains on at most {MAX_TRAINING_ROWS} rows, got {}",
                shape.n_samples
            )));
        }
        let scaler = Standardizer::fit(x);
        let xs = scaler.transform(x);
        let gamma = self.gamma.resolve(&xs);
        let n = shape.n_samples;

        let lambda = 1.0 / (self.c * n as f64);
        let steps = self.max_iter * n;
        let mut rng = StdRng::seed_from_u64(self.random_state);
        let mut coef = vec![vec![0.0; n]; shape.n_classes];

        for (class, class_coef) in coef.iter_mut().enumerate() {
            let sign: Vec<f64> = y
                .iter()
                .map(|&label| if label == class { 1.0 } else { -1.0 })
                .collect();
            let mut alpha = vec![0u32; n];
            // Rows with a non-zero alpha, in the order they entered.
            let mut active: Vec<usize> = Vec::new();
            for t in 1..=steps {
                let i = rng.gen_range(0..n);
                let margin: f64 = active
                    .iter()
                    .map(|&j| f64::from(alpha[j]) * sign[j] * (rbf(gamma, &xs[i], &xs[j]) + 1.0))
                    .sum::<f64>()
                    / (lambda * t as f64);
                if sign[i] * margin < 1.0 {
                    if alpha[i] == 0 {
                        active.push(i);
                    }
                    alpha[i] += 1;
                }
            }
            let scale = lambda * steps as f64;
            for ((c, a), s) in class_coef.iter_mut().zip(&alpha).zip(&sign) {
                *c = f64::from(*a) * s / scale;
            }
        }

        let support: Vec<usize> = (0..n)
            .filter(|&j| coef.iter().any(|class_coef| class_coef[j] != 0.0))
            .collect();
        let support_vectors = support.iter().map(|&j| xs[j].clone()).collect();
        let dual_coef = coef
            .iter()
            .map(|class_coef| support.iter().map(|&j| class_coef[j]).collect())
            .collect();

        self.fitted = Some(SvmState {
            scaler,
            gamma,
            support_vectors,
            dual_coef,
        });
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<usize>> {
        let state = self
            .fitted
            .as_ref()
            .ok_or_else(|| MltrackError::NotFitted("SVC".into()))?;
        check_rows(x, state.scaler.n_features())?;
        Ok(x.iter()
            .map(|row| argmax(&Self::decision(state, &state.scaler.transform_row(row))))
            .collect())
    }

    fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rings() -> (Vec<Vec<f64>>, Vec<usize>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..24 {
            let angle = i as f64 * std::f64::consts::TAU / 24.0;
            x.push(vec![angle.cos(), angle.sin()]);
            y.push(0);
            x.push(vec![4.0 * angle.cos(), 4.0 * angle.sin()]);
            y.push(1);
        }
        (x, y)
    }

    #[test]
    fn test_separates_concentric_rings() {
        let (x, y) = rings();
        let mut svm = RbfSvm::from_params(&RbfSvm::defaults()).unwrap();
        svm.fit(&x, &y).unwrap();
        let predictions = svm.predict(&x).unwrap();
        let correct = predictions.iter().zip(&y).filter(|(p, t)| p == t).count();
        assert!(correct >= 44, "only {correct} of 48 correct");
        assert!(svm.n_support().unwrap() > 0);
    }

    #[test]
    fn test_oversized_training_set_is_rejected() {
        let x: Vec<Vec<f64>> = (0..=MAX_TRAINING_ROWS).map(|i| vec![i as f64]).collect();
        let y: Vec<usize> = (0..=MAX_TRAINING_ROWS).map(|i| i % 2).collect();
        let mut svm = RbfSvm::from_params(&RbfSvm::defaults()).unwrap();
        let err = svm.fit(&x, &y).unwrap_err();
        assert!(matches!(err, MltrackError::InvalidInput(_)));
        assert!(!svm.is_fitted());
    }

    #[test]
    fn test_gamma_parsing() {
        let auto = RbfSvm::defaults().with("gamma", "auto");
        assert_eq!(RbfSvm::from_params(&auto).unwrap().gamma, Gamma::Auto);
        let value = RbfSvm::defaults().with("gamma", 0.5);
        assert_eq!(RbfSvm::from_params(&value).unwrap().gamma, Gamma::Value(0.5));
        let bad = RbfSvm::defaults().with("gamma", -1.0);
        assert!(RbfSvm::from_params(&bad).is_err());
    }

    #[test]
    fn test_gamma_auto_resolution() {
        let x = vec![vec![0.0, 1.0, 2.0, 3.0]];
        assert_eq!(Gamma::Auto.resolve(&x), 0.25);
    }
}
