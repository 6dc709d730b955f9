//! Error types for the mltrack-core crate.

use thiserror::Error;

/// Top-level error type for mltrack operations.
#[derive(Debug, Error)]
pub enum MltrackError {
    #[error("Unknown dataset: {name}. Available: {}", available.join(", "))]
    UnknownDataset { name: String, available: Vec<String> },

    #[error("Unknown model: {name}. Available: {}", available.join(", "))]
    UnknownModel { name: String, available: Vec<String> },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Missing configuration: {key} is required")]
    MissingConfiguration { key: String },

    #[error("Training failed for {model}: {message}")]
    TrainingFailure { model: String, message: String },

    #[error("Tracking service error: {0}")]
    Tracking(String),

    #[error("Invalid hyperparameter '{key}': {reason}")]
    InvalidHyperparameter { key: String, reason: String },

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Model is not fitted: {0}")]
    NotFitted(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl MltrackError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageUnavailable(msg.into())
    }

    pub fn missing(key: impl Into<String>) -> Self {
        Self::MissingConfiguration { key: key.into() }
    }

    pub fn training(model: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::TrainingFailure {
            model: model.into(),
            message: msg.into(),
        }
    }

    pub fn tracking(msg: impl Into<String>) -> Self {
        Self::Tracking(msg.into())
    }

    pub fn hyperparameter(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidHyperparameter {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether this error should stop the pipeline before any run is opened.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnknownDataset { .. }
                | Self::MissingConfiguration { .. }
                | Self::Config(_)
                | Self::InvalidInput(_)
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MltrackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_lists_available() {
        let err = MltrackError::UnknownModel {
            name: "bogus".into(),
            available: vec!["logistic_regression".into(), "random_forest".into()],
        };
        assert_eq!(
            err.to_string(),
            "Unknown model: bogus. Available: logistic_regression, random_forest"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(MltrackError::missing("MLFLOW_TRACKING_URI").is_fatal());
        assert!(!MltrackError::training("svm_rbf", "diverged").is_fatal());
        assert!(!MltrackError::storage("connection refused").is_fatal());
    }
}
