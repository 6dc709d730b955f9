//! The classifier interface and the serializable estimator wrapper.

use crate::error::{MltrackError, Result};
use crate::models::forest::RandomForest;
use crate::models::hyperparams::Hyperparams;
use crate::models::logistic::LogisticRegression;
use crate::models::svm::RbfSvm;
use crate::models::tree::DecisionTree;
use serde::{Deserialize, Serialize};

/// A supervised classifier over dense `f64` features and class indices.
pub trait Classifier {
    fn fit(&mut self, x: &[Vec<f64>], y: &[usize]) -> Result<()>;

    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<usize>>;

    fn is_fitted(&self) -> bool;
}

/// Every built-in classifier, tagged by kind when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Model {
    LogisticRegression(LogisticRegression),
    DecisionTree(DecisionTree),
    RandomForest(RandomForest),
    SvmRbf(RbfSvm),
}

impl Model {
    /// Class name logged as the `model_type` param.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::LogisticRegression(_) => "LogisticRegression",
            Self::DecisionTree(_) => "DecisionTreeClassifier",
            Self::RandomForest(_) => "RandomForestClassifier",
            Self::SvmRbf(_) => "SVC",
        }
    }

    fn inner(&self) -> &dyn Classifier {
        match self {
            Self::LogisticRegression(m) => m,
            Self::DecisionTree(m) => m,
            Self::RandomForest(m) => m,
            Self::SvmRbf(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Classifier {
        match self {
            Self::LogisticRegression(m) => m,
            Self::DecisionTree(m) => m,
            Self::RandomForest(m) => m,
            Self::SvmRbf(m) => m,
        }
    }
}

impl Classifier for Model {
    fn fit(&mut self, x: &[Vec<f64>], y: &[usize]) -> Result<()> {
        self.inner_mut().fit(x, y)
    }

    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<usize>> {
        self.inner().predict(x)
    }

    fn is_fitted(&self) -> bool {
        self.inner().is_fitted()
    }
}

/// A named, configured model as handed out by the registry.
///
/// Serializes with its hyperparameters and fitted state, so a stored estimator
/// predicts the same labels after it is loaded back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimator {
    name: String,
    params: Hyperparams,
    model: Model,
}

impl Estimator {
    pub fn new(name: impl Into<String>, params: Hyperparams, model: Model) -> Self {
        Self {
            name: name.into(),
            params,
            model,
        }
    }

    /// Registry name, e.g. `random_forest`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective hyperparameters (defaults merged with overrides).
    pub fn params(&self) -> &Hyperparams {
        &self.params
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn model_type(&self) -> &'static str {
        self.model.type_name()
    }

    /// Fraction of rows in `x` predicted as their label in `y`.
    pub fn score(&self, x: &[Vec<f64>], y: &[usize]) -> Result<f64> {
        if x.len() != y.len() {
            return Err(MltrackError::invalid_input(format!(
                "{} rows but {} labels",
                x.len(),
                y.len()
            )));
        }
        if y.is_empty() {
            return Err(MltrackError::invalid_input("cannot score an empty set"));
        }
        let predictions = self.predict(x)?;
        let correct = predictions.iter().zip(y).filter(|(p, t)| p == t).count();
        Ok(correct as f64 / y.len() as f64)
    }
}

impl Classifier for Estimator {
    fn fit(&mut self, x: &[Vec<f64>], y: &[usize]) -> Result<()> {
        self.model.fit(x, y)
    }

    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<usize>> {
        self.model.predict(x)
    }

    fn is_fitted(&self) -> bool {
        self.model.is_fitted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stump() -> Estimator {
        let params = DecisionTree::defaults();
        let model = Model::DecisionTree(DecisionTree::from_params(&params).unwrap());
        Estimator::new("decision_tree", params, model)
    }

    #[test]
    fn test_fitted_estimator_survives_json() {
        let x = vec![vec![0.0], vec![1.0], vec![9.0], vec![10.0]];
        let y = vec![0, 0, 1, 1];
        let mut estimator = stump();
        assert!(!estimator.is_fitted());
        estimator.fit(&x, &y).unwrap();
        assert_eq!(estimator.score(&x, &y).unwrap(), 1.0);

        let json = serde_json::to_string(&estimator).unwrap();
        assert!(json.contains("\"type\":\"decision_tree\""));
        let restored: Estimator = serde_json::from_str(&json).unwrap();
        assert!(restored.is_fitted());
        assert_eq!(restored.predict(&x).unwrap(), y);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(stump().model_type(), "DecisionTreeClassifier");
    }

    #[test]
    fn test_score_rejects_mismatched_lengths() {
        let estimator = stump();
        assert!(estimator.score(&[vec![1.0]], &[0, 1]).is_err());
    }
}
