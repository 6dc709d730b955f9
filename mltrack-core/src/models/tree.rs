//! CART decision tree classifier (Gini impurity).

use crate::error::{MltrackError, Result};
use crate::models::estimator::Classifier;
use crate::models::hyperparams::Hyperparams;
use crate::models::preprocess::{argmax_count, check_rows, check_training_set};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Number of features examined at each split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    All,
    Sqrt,
    Log2,
    Count(usize),
}

impl MaxFeatures {
    /// Parse `null`, `"sqrt"`, `"log2"`, or a positive integer.
    pub fn from_params(params: &Hyperparams, key: &str) -> Result<Self> {
        match params.get(key) {
            None | Some(Value::Null) => Ok(Self::All),
            Some(Value::String(s)) => match s.as_str() {
                "sqrt" => Ok(Self::Sqrt),
                "log2" => Ok(Self::Log2),
                "all" => Ok(Self::All),
                other => Err(MltrackError::hyperparameter(
                    key,
                    format!("unknown value '{other}', expected sqrt, log2, all or an integer"),
                )),
            },
            Some(_) => match params.usize(key)? {
                0 => Err(MltrackError::hyperparameter(key, "must be at least 1")),
                n => Ok(Self::Count(n)),
            },
        }
    }

    pub fn resolve(self, n_features: usize) -> usize {
        let k = match self {
            Self::All => n_features,
            Self::Sqrt => (n_features as f64).sqrt() as usize,
            Self::Log2 => (n_features as f64).log2() as usize,
            Self::Count(n) => n,
        };
        k.clamp(1, n_features)
    }
}

/// One node of the fitted tree; children are indices into the node list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
enum Node {
    Leaf {
        class: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Walk from the root (`nodes[0]`) to a leaf.
fn predict_nodes(nodes: &[Node], row: &[f64]) -> usize {
    let mut at = 0;
    loop {
        match &nodes[at] {
            Node::Leaf { class } => return *class,
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                at = if row[*feature] <= *threshold { *left } else { *right };
            }
        }
    }
}

fn nodes_depth(nodes: &[Node]) -> usize {
    let mut deepest = 0;
    let mut stack = vec![(0usize, 0usize)];
    while let Some((at, depth)) = stack.pop() {
        deepest = deepest.max(depth);
        if let Node::Split { left, right, .. } = nodes[at] {
            stack.push((left, depth + 1));
            stack.push((right, depth + 1));
        }
    }
    deepest
}

/// Decision tree grown greedily on Gini impurity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    /// `None` grows until leaves are pure.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub max_features: MaxFeatures,
    pub random_state: u64,
    /// Flat node list, root first. Empty until fitted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    nodes: Vec<Node>,
    #[serde(default)]
    n_features: usize,
}

struct Grower<'a> {
    x: &'a [Vec<f64>],
    y: &'a [usize],
    n_classes: usize,
    n_candidates: usize,
    max_depth: Option<usize>,
    min_samples_split: usize,
    rng: StdRng,
    nodes: Vec<Node>,
}

impl Grower<'_> {
    fn class_counts(&self, idx: &[usize]) -> Vec<usize> {
        let mut counts = vec![0; self.n_classes];
        for &i in idx {
            counts[self.y[i]] += 1;
        }
        counts
    }

    /// Grow the subtree for `idx` and return the index of its root node.
    fn grow(&mut self, mut idx: Vec<usize>, depth: usize) -> usize {
        let counts = self.class_counts(&idx);
        let majority = argmax_count(&counts);
        let at = self.nodes.len();
        self.nodes.push(Node::Leaf { class: majority });

        let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
        let depth_reached = self.max_depth.is_some_and(|d| depth >= d);
        if pure || depth_reached || idx.len() < self.min_samples_split {
            return at;
        }

        let parent = gini(&counts, idx.len());
        let Some((feature, threshold)) = self.best_split(&mut idx, parent) else {
            return at;
        };

        let (left, right): (Vec<usize>, Vec<usize>) =
            idx.into_iter().partition(|&i| self.x[i][feature] <= threshold);
        let left = self.grow(left, depth + 1);
        let right = self.grow(right, depth + 1);
        self.nodes[at] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        at
    }

    /// Best impurity-reducing `(feature, threshold)`.
    ///
    /// Examines `n_candidates` randomly ordered features, and keeps going past
    /// that budget only while no split has reduced impurity.
    fn best_split(&mut self, idx: &mut [usize], parent: f64) -> Option<(usize, f64)> {
        let n_features = self.x[0].len();
        let mut order: Vec<usize> = (0..n_features).collect();
        if self.n_candidates < n_features {
            order.shuffle(&mut self.rng);
        }

        let total = self.class_counts(idx);
        let n = idx.len();
        let mut best: Option<(usize, f64, f64)> = None;

        for (visited, feature) in order.into_iter().enumerate() {
            if visited >= self.n_candidates && best.is_some() {
                break;
            }
            idx.sort_by(|&a, &b| self.x[a][feature].total_cmp(&self.x[b][feature]));
            let mut left = vec![0usize; self.n_classes];
            for pos in 0..n - 1 {
                left[self.y[idx[pos]]] += 1;
                let here = self.x[idx[pos]][feature];
                let next = self.x[idx[pos + 1]][feature];
                if here == next {
                    continue;
                }
                let n_left = pos + 1;
                let right: Vec<usize> = total.iter().zip(&left).map(|(t, l)| t - l).collect();
                let impurity = (n_left as f64 * gini(&left, n_left)
                    + (n - n_left) as f64 * gini(&right, n - n_left))
                    / n as f64;
                if impurity < parent - 1e-12 && best.is_none_or(|(_, _, b)| impurity < b) {
                    best = Some((feature, (here + next) / 2.0, impurity));
                }
            }
        }
        best.map(|(feature, threshold, _)| (feature, threshold))
    }
}

fn gini(counts: &[usize], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    1.0 - counts.iter().map(|&c| (c as f64 / n).powi(2)).sum::<f64>()
}

impl DecisionTree {
    pub fn defaults() -> Hyperparams {
        Hyperparams::new()
            .with("max_depth", Value::Null)
            .with("min_samples_split", 2)
            .with("max_features", Value::Null)
            .with("random_state", 42)
    }

    pub fn from_params(params: &Hyperparams) -> Result<Self> {
        Self::unfitted(
            params.opt_usize("max_depth")?,
            params.usize("min_samples_split")?,
            MaxFeatures::from_params(params, "max_features")?,
            params.u64("random_state")?,
        )
    }

    pub(crate) fn unfitted(
        max_depth: Option<usize>,
        min_samples_split: usize,
        max_features: MaxFeatures,
        random_state: u64,
    ) -> Result<Self> {
        let tree = Self {
            max_depth,
            min_samples_split,
            max_features,
            random_state,
            nodes: Vec::new(),
            n_features: 0,
        };
        tree.validate()?;
        Ok(tree)
    }

    fn validate(&self) -> Result<()> {
        if self.max_depth == Some(0) {
            return Err(MltrackError::hyperparameter("max_depth", "must be at least 1"));
        }
        if self.min_samples_split < 2 {
            return Err(MltrackError::hyperparameter(
                "min_samples_split",
                "must be at least 2",
            ));
        }
        Ok(())
    }

    /// Depth of the fitted tree.
    pub fn depth(&self) -> Option<usize> {
        (!self.nodes.is_empty()).then(|| nodes_depth(&self.nodes))
    }

    /// Grow on the rows in `idx` (with repeats, for bootstrap samples).
    pub(crate) fn fit_rows(
        &mut self,
        x: &[Vec<f64>],
        y: &[usize],
        idx: Vec<usize>,
        n_classes: usize,
        rng: StdRng,
    ) {
        let n_features = x[0].len();
        let mut grower = Grower {
            x,
            y,
            n_classes,
            n_candidates: self.max_features.resolve(n_features),
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            rng,
            nodes: Vec::new(),
        };
        grower.grow(idx, 0);
        self.nodes = grower.nodes;
        self.n_features = n_features;
    }

    pub(crate) fn predict_row(&self, row: &[f64]) -> Option<usize> {
        (!self.nodes.is_empty()).then(|| predict_nodes(&self.nodes, row))
    }
}

impl Classifier for DecisionTree {
    fn fit(&mut self, x: &[Vec<f64>], y: &[usize]) -> Result<()> {
        let shape = check_training_set(x, y)?;
        let rng = StdRng::seed_from_u64(self.random_state);
        self.fit_rows(x, y, (0..shape.n_samples).collect(), shape.n_classes, rng);
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<usize>> {
        if self.nodes.is_empty() {
            return Err(MltrackError::NotFitted("DecisionTree".into()));
        }
        check_rows(x, self.n_features)?;
        Ok(x.iter().map(|row| predict_nodes(&self.nodes, row)).collect())
    }

    fn is_fitted(&self) -> bool {
        !self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xor() -> (Vec<Vec<f64>>, Vec<usize>) {
        let x = vec![
            vec![0.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![1.0, 1.0],
            vec![0.1, 0.1],
            vec![0.1, 0.9],
            vec![0.9, 0.1],
            vec![0.9, 0.9],
            vec![0.2, 0.2],
        ];
        let y = vec![0, 1, 1, 0, 0, 1, 1, 0, 0];
        (x, y)
    }

    #[test]
    fn test_fits_training_data() {
        let x = vec![vec![1.0], vec![2.0], vec![3.0], vec![10.0], vec![11.0], vec![12.0]];
        let y = vec![0, 0, 0, 1, 1, 1];
        let mut tree = DecisionTree::from_params(&DecisionTree::defaults()).unwrap();
        tree.fit(&x, &y).unwrap();
        assert_eq!(tree.predict(&x).unwrap(), y);
        assert_eq!(tree.depth(), Some(1));
        assert_eq!(tree.predict(&[vec![6.4], vec![6.6]]).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_max_depth_limits_growth() {
        let (x, y) = xor();
        let params = DecisionTree::defaults().with("max_depth", 1);
        let mut tree = DecisionTree::from_params(&params).unwrap();
        tree.fit(&x, &y).unwrap();
        assert!(tree.depth().unwrap() <= 1);
    }

    #[test]
    fn test_max_features_parsing() {
        let params = Hyperparams::new().with("m", "sqrt");
        assert_eq!(MaxFeatures::from_params(&params, "m").unwrap(), MaxFeatures::Sqrt);
        assert_eq!(MaxFeatures::Sqrt.resolve(4), 2);
        assert_eq!(MaxFeatures::Log2.resolve(1), 1);
        assert_eq!(MaxFeatures::Count(10).resolve(4), 4);
        let bad = Hyperparams::new().with("m", "half");
        assert!(MaxFeatures::from_params(&bad, "m").is_err());
    }

    #[test]
    fn test_deep_tree_survives_json_round_trip() {
        let x: Vec<Vec<f64>> = (0..400).map(|i| vec![i as f64]).collect();
        let y: Vec<usize> = (0..400).map(|i| i % 2).collect();
        let mut tree = DecisionTree::from_params(&DecisionTree::defaults()).unwrap();
        tree.fit(&x, &y).unwrap();
        assert!(tree.depth().unwrap() > 200);

        let json = serde_json::to_string(&tree).unwrap();
        let restored: DecisionTree = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, tree);
        assert_eq!(restored.predict(&x).unwrap(), y);
    }

    #[test]
    fn test_unfitted_tree_serializes_without_nodes() {
        let tree = DecisionTree::from_params(&DecisionTree::defaults()).unwrap();
        let json = serde_json::to_value(&tree).unwrap();
        assert!(json.get("nodes").is_none());
        assert!(!serde_json::from_value::<DecisionTree>(json).unwrap().is_fitted());
    }

    #[test]
    fn test_gini() {
        assert_eq!(gini(&[5, 0], 5), 0.0);
        assert!((gini(&[5, 5], 10) - 0.5).abs() < 1e-12);
    }
}
