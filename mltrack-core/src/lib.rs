//! # mltrack-core
//!
//! Train a set of classifiers on one dataset and record every run in an
//! MLflow tracking server, optionally copying models and splits to an
//! S3-compatible object store.
//!
//! The pieces, leaf-first:
//! - [`config`] reads settings from the environment and an optional TOML file.
//! - [`data`] holds the dataset loaders and the train/test split.
//! - [`models`] holds the classifiers and the registry that builds them.
//! - [`tracking`] talks to MLflow (or records in memory).
//! - [`storage`] persists JSON artifacts to S3 (or memory).
//! - [`training`] ties them together in [`TrainingPipeline`].

pub mod config;
pub mod data;
pub mod error;
pub mod models;
pub mod storage;
pub mod tracking;
pub mod training;

pub use config::MltrackConfig;
pub use data::{DataLoader, Dataset, LoaderRegistry, TrainTestSplit, get_loader};
pub use error::{MltrackError, Result};
pub use models::{Classifier, Estimator, Hyperparams, ModelRegistry, get_model, list_models};
pub use storage::{ArtifactStorage, InMemoryObjectStore, ObjectStore, S3ObjectStore};
pub use tracking::{InMemoryTracker, MlflowClient, RunInfo, RunStatus, TrackingClient};
pub use training::{
    ClassificationMetrics, FailurePolicy, ModelOutcome, ModelResult, PipelineConfig,
    PipelineReport, TrainingPipeline,
};
