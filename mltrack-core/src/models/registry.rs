//! Named model factories with default hyperparameters.

use crate::error::{MltrackError, Result};
use crate::models::estimator::{Estimator, Model};
use crate::models::forest::RandomForest;
use crate::models::hyperparams::Hyperparams;
use crate::models::logistic::LogisticRegression;
use crate::models::svm::RbfSvm;
use crate::models::tree::DecisionTree;
use std::sync::LazyLock;

/// Builds an unfitted model from fully merged hyperparameters.
pub type ModelFactory = fn(&Hyperparams) -> Result<Model>;

#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub name: String,
    pub description: String,
    pub defaults: Hyperparams,
    pub factory: ModelFactory,
}

/// Registry of model factories, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    entries: Vec<ModelEntry>,
}

static BUILTIN_MODELS: LazyLock<ModelRegistry> = LazyLock::new(ModelRegistry::with_builtin);

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        let builtin: [(&str, &str, Hyperparams, ModelFactory); 4] = [
            (
                "logistic_regression",
                "Multinomial logistic regression",
                LogisticRegression::defaults(),
                |p| LogisticRegression::from_params(p).map(Model::LogisticRegression),
            ),
            (
                "random_forest",
                "Bagged decision trees with feature sampling",
                RandomForest::defaults(),
                |p| RandomForest::from_params(p).map(Model::RandomForest),
            ),
            (
                "svm_rbf",
                "Support vector classifier with an RBF kernel",
                RbfSvm::defaults(),
                |p| RbfSvm::from_params(p).map(Model::SvmRbf),
            ),
            (
                "decision_tree",
                "CART decision tree",
                DecisionTree::defaults(),
                |p| DecisionTree::from_params(p).map(Model::DecisionTree),
            ),
        ];
        for (name, description, defaults, factory) in builtin {
            registry.entries.push(ModelEntry {
                name: name.to_string(),
                description: description.to_string(),
                defaults,
                factory,
            });
        }
        registry
    }

    /// The process-wide registry of built-in models.
    pub fn builtin() -> &'static ModelRegistry {
        &BUILTIN_MODELS
    }

    pub fn register(&mut self, entry: ModelEntry) -> Result<()> {
        if self.entry(&entry.name).is_some() {
            return Err(MltrackError::invalid_input(format!(
                "model '{}' is already registered",
                entry.name
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn entry(&self, name: &str) -> Option<&ModelEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Build a fresh, unfitted estimator.
    ///
    /// `overrides` are merged over the model defaults; a key the model does
    /// not define is rejected rather than ignored.
    pub fn get_model(&self, name: &str, overrides: &Hyperparams) -> Result<Estimator> {
        let entry = self.entry(name).ok_or_else(|| MltrackError::UnknownModel {
            name: name.to_string(),
            available: self.list_models(),
        })?;
        if let Some(key) = overrides.keys().find(|k| !entry.defaults.contains(k)) {
            return Err(MltrackError::hyperparameter(
                key,
                format!("not a hyperparameter of {name}"),
            ));
        }
        let params = entry.defaults.merged(overrides);
        let model = (entry.factory)(&params)?;
        Ok(Estimator::new(name, params, model))
    }

    /// Registered names in registration order.
    pub fn list_models(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelEntry> {
        self.entries.iter()
    }
}

/// Build a built-in model by name.
pub fn get_model(name: &str, overrides: &Hyperparams) -> Result<Estimator> {
    ModelRegistry::builtin().get_model(name, overrides)
}

/// Names of the built-in models.
pub fn list_models() -> Vec<String> {
    ModelRegistry::builtin().list_models()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::estimator::Classifier;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    #[test]
    fn test_builtin_order() {
        assert_eq!(
            list_models(),
            vec!["logistic_regression", "random_forest", "svm_rbf", "decision_tree"]
        );
    }

    #[test]
    fn test_override_is_applied() {
        let overrides = Hyperparams::new().with("max_depth", 5);
        let estimator = get_model("random_forest", &overrides).unwrap();
        assert_eq!(estimator.params().get("max_depth"), Some(&json!(5)));
        assert_eq!(estimator.params().get("n_estimators"), Some(&json!(100)));
        match estimator.model() {
            Model::RandomForest(forest) => assert_eq!(forest.max_depth, Some(5)),
            other => panic!("unexpected model: {other:?}"),
        }
    }

    #[test]
    fn test_defaults_without_overrides() {
        let estimator = get_model("decision_tree", &Hyperparams::new()).unwrap();
        assert_eq!(estimator.params().get("max_depth"), Some(&Value::Null));
        assert_eq!(estimator.model_type(), "DecisionTreeClassifier");
        assert!(!estimator.is_fitted());
    }

    #[test]
    fn test_every_model_builds_fresh() {
        for name in list_models() {
            let a = get_model(&name, &Hyperparams::new()).unwrap();
            let b = get_model(&name, &Hyperparams::new()).unwrap();
            assert_eq!(a, b, "{name}");
            assert!(!a.is_fitted(), "{name}");
        }
    }

    #[test]
    fn test_unknown_model_lists_available() {
        let err = get_model("xgboost", &Hyperparams::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown model: xgboost. Available: logistic_regression, random_forest, svm_rbf, decision_tree"
        );
    }

    #[test]
    fn test_unknown_hyperparameter_rejected() {
        let overrides = Hyperparams::new().with("depth", 3);
        let err = get_model("decision_tree", &overrides).unwrap_err();
        assert!(matches!(err, MltrackError::InvalidHyperparameter { ref key, .. } if key == "depth"));
    }
}
