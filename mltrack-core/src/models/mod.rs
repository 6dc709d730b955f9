//! Classifiers and the model registry.

pub mod estimator;
pub mod forest;
pub mod hyperparams;
pub mod logistic;
pub mod preprocess;
pub mod registry;
pub mod svm;
pub mod tree;

pub use estimator::{Classifier, Estimator, Model};
pub use hyperparams::Hyperparams;
pub use registry::{ModelEntry, ModelFactory, ModelRegistry, get_model, list_models};
