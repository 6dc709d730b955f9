//! Experiment tracking: the client interface, the MLflow REST client, and an
//! in-memory tracker.

pub mod memory;
pub mod mlflow;

pub use memory::{InMemoryTracker, RecordedRun};
pub use mlflow::MlflowClient;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle state of a tracked run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Scheduled,
    Finished,
    Failed,
    Killed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Scheduled => "SCHEDULED",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Killed => "KILLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Killed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an open run, as returned by the tracking service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub experiment_id: String,
    pub run_name: String,
    /// Root under which the run's artifacts live, e.g. `mlflow-artifacts:/1/<run>/artifacts`.
    pub artifact_uri: String,
}

/// Client for an experiment tracking service.
///
/// Calls are awaited one at a time by the pipeline; implementations do not
/// retry.
#[async_trait]
pub trait TrackingClient: Send + Sync {
    /// Where runs are recorded, for display.
    fn tracking_uri(&self) -> &str;

    /// Id of the experiment called `name`, creating it when absent.
    async fn get_or_create_experiment(&self, name: &str) -> Result<String>;

    async fn start_run(&self, experiment_id: &str, run_name: &str) -> Result<RunInfo>;

    async fn get_run(&self, run_id: &str) -> Result<(RunInfo, RunStatus)>;

    async fn log_params(&self, run_id: &str, params: &[(String, String)]) -> Result<()>;

    async fn log_metrics(&self, run_id: &str, metrics: &BTreeMap<String, f64>) -> Result<()>;

    /// Upload `body` to `path` relative to the run's artifact root and
    /// return the artifact's full URI.
    async fn log_artifact(&self, run: &RunInfo, path: &str, body: Vec<u8>) -> Result<String>;

    async fn end_run(&self, run_id: &str, status: RunStatus) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&RunStatus::Finished).unwrap(),
            "\"FINISHED\""
        );
        let parsed: RunStatus = serde_json::from_str("\"FAILED\"").unwrap();
        assert_eq!(parsed, RunStatus::Failed);
        assert_eq!(RunStatus::Running.to_string(), "RUNNING");
        assert!(!RunStatus::Running.is_terminal());
    }
}
