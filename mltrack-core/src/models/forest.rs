//! Random forest: bagged decision trees with per-split feature sampling.

use crate::error::{MltrackError, Result};
use crate::models::estimator::Classifier;
use crate::models::hyperparams::Hyperparams;
use crate::models::preprocess::{argmax_count, check_rows, check_training_set};
use crate::models::tree::{DecisionTree, MaxFeatures};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub random_state: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    trees: Vec<DecisionTree>,
    #[serde(default)]
    n_classes: usize,
    #[serde(default)]
    n_features: usize,
}

impl RandomForest {
    pub fn defaults() -> Hyperparams {
        Hyperparams::new()
            .with("n_estimators", 100)
            .with("max_depth", Value::Null)
            .with("min_samples_split", 2)
            .with("max_features", "sqrt")
            .with("bootstrap", true)
            .with("random_state", 42)
    }

    pub fn from_params(params: &Hyperparams) -> Result<Self> {
        let bootstrap = match params.get("bootstrap") {
            None => true,
            Some(v) => v.as_bool().ok_or_else(|| {
                MltrackError::hyperparameter("bootstrap", format!("expected a boolean, got {v}"))
            })?,
        };
        let forest = Self {
            n_estimators: params.usize("n_estimators")?,
            max_depth: params.opt_usize("max_depth")?,
            min_samples_split: params.usize("min_samples_split")?,
            max_features: MaxFeatures::from_params(params, "max_features")?,
            bootstrap,
            random_state: params.u64("random_state")?,
            trees: Vec::new(),
            n_classes: 0,
            n_features: 0,
        };
        if forest.n_estimators == 0 {
            return Err(MltrackError::hyperparameter("n_estimators", "must be at least 1"));
        }
        forest.tree(forest.random_state)?;
        Ok(forest)
    }

    fn tree(&self, seed: u64) -> Result<DecisionTree> {
        DecisionTree::unfitted(
            self.max_depth,
            self.min_samples_split,
            self.max_features,
            seed,
        )
    }

    /// The fitted trees.
    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }
}

impl Classifier for RandomForest {
    fn fit(&mut self, x: &[Vec<f64>], y: &[usize]) -> Result<()> {
        let shape = check_training_set(x, y)?;
        let mut rng = StdRng::seed_from_u64(self.random_state);
        let n = shape.n_samples;

        let mut trees = Vec::with_capacity(self.n_estimators);
        for _ in 0..self.n_estimators {
            let tree_seed: u64 = rng.r#gen();
            let rows: Vec<usize> = if self.bootstrap {
                (0..n).map(|_| rng.gen_range(0..n)).collect()
            } else {
                (0..n).collect()
            };
            let mut tree = self.tree(tree_seed)?;
            tree.fit_rows(x, y, rows, shape.n_classes, StdRng::seed_from_u64(tree_seed));
            trees.push(tree);
        }

        self.trees = trees;
        self.n_classes = shape.n_classes;
        self.n_features = shape.n_features;
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<usize>> {
        if self.trees.is_empty() {
            return Err(MltrackError::NotFitted("RandomForest".into()));
        }
        check_rows(x, self.n_features)?;
        Ok(x.iter()
            .map(|row| {
                let mut votes = vec![0usize; self.n_classes];
                for class in self.trees.iter().filter_map(|t| t.predict_row(row)) {
                    votes[class] += 1;
                }
                argmax_count(&votes)
            })
            .collect())
    }

    fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }
}
