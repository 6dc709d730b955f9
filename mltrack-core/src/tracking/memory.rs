//! In-process tracker that records everything it is sent.

use crate::error::{MltrackError, Result};
use crate::tracking::{RunInfo, RunStatus, TrackingClient};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// A run as recorded by [`InMemoryTracker`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRun {
    pub info: RunInfo,
    pub status: RunStatus,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub artifacts: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Default)]
struct TrackerState {
    experiments: Vec<(String, String)>,
    runs: Vec<RecordedRun>,
}

/// Tracker backed by memory, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryTracker {
    state: Mutex<TrackerState>,
    unreachable: bool,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker whose every call fails as if the server were down.
    pub fn unreachable() -> Self {
        Self {
            state: Mutex::default(),
            unreachable: true,
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, TrackerState>> {
        if self.unreachable {
            return Err(MltrackError::tracking("tracking server unreachable"));
        }
        self.state
            .lock()
            .map_err(|e| MltrackError::tracking(format!("tracker state poisoned: {e}")))
    }

    /// Every run recorded so far, in creation order.
    pub fn runs(&self) -> Vec<RecordedRun> {
        self.state
            .lock()
            .map(|s| s.runs.clone())
            .unwrap_or_default()
    }

    pub fn run(&self, run_id: &str) -> Option<RecordedRun> {
        self.runs().into_iter().find(|r| r.info.run_id == run_id)
    }

    /// `(id, name)` of each experiment, in creation order.
    pub fn experiments(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .map(|s| s.experiments.clone())
            .unwrap_or_default()
    }

    fn with_run<T>(
        &self,
        run_id: &str,
        f: impl FnOnce(&mut RecordedRun) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state()?;
        let run = state
            .runs
            .iter_mut()
            .find(|r| r.info.run_id == run_id)
            .ok_or_else(|| MltrackError::tracking(format!("run {run_id} does not exist")))?;
        f(run)
    }

    fn with_open_run(
        &self,
        run_id: &str,
        f: impl FnOnce(&mut RecordedRun),
    ) -> Result<()> {
        self.with_run(run_id, |run| {
            if run.status.is_terminal() {
                return Err(MltrackError::tracking(format!(
                    "run {run_id} is already {}",
                    run.status
                )));
            }
            f(run);
            Ok(())
        })
    }
}

#[async_trait]
impl TrackingClient for InMemoryTracker {
    fn tracking_uri(&self) -> &str {
        "memory://"
    }

    async fn get_or_create_experiment(&self, name: &str) -> Result<String> {
        let mut state = self.state()?;
        if let Some((id, _)) = state.experiments.iter().find(|(_, n)| n == name) {
            return Ok(id.clone());
        }
        let id = state.experiments.len().to_string();
        state.experiments.push((id.clone(), name.to_string()));
        Ok(id)
    }

    async fn start_run(&self, experiment_id: &str, run_name: &str) -> Result<RunInfo> {
        let mut state = self.state()?;
        if !state.experiments.iter().any(|(id, _)| id == experiment_id) {
            return Err(MltrackError::tracking(format!(
                "experiment {experiment_id} does not exist"
            )));
        }
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let info = RunInfo {
            artifact_uri: format!("memory://{experiment_id}/{run_id}/artifacts"),
            run_id,
            experiment_id: experiment_id.to_string(),
            run_name: run_name.to_string(),
        };
        state.runs.push(RecordedRun {
            info: info.clone(),
            status: RunStatus::Running,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            artifacts: BTreeMap::new(),
        });
        Ok(info)
    }

    async fn get_run(&self, run_id: &str) -> Result<(RunInfo, RunStatus)> {
        self.with_run(run_id, |run| Ok((run.info.clone(), run.status)))
    }

    async fn log_params(&self, run_id: &str, params: &[(String, String)]) -> Result<()> {
        self.with_open_run(run_id, |run| {
            run.params.extend(params.iter().cloned());
        })
    }

    async fn log_metrics(&self, run_id: &str, metrics: &BTreeMap<String, f64>) -> Result<()> {
        self.with_open_run(run_id, |run| {
            run.metrics.extend(metrics.iter().map(|(k, v)| (k.clone(), *v)));
        })
    }

    async fn log_artifact(&self, run: &RunInfo, path: &str, body: Vec<u8>) -> Result<String> {
        let path = path.trim_start_matches('/').to_string();
        let uri = format!("{}/{path}", run.artifact_uri);
        self.with_open_run(&run.run_id, |recorded| {
            recorded.artifacts.insert(path, body);
        })?;
        Ok(uri)
    }

    async fn end_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        self.with_run(run_id, |run| {
            run.status = status;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_experiment_is_reused_by_name() {
        let tracker = InMemoryTracker::new();
        let a = tracker.get_or_create_experiment("Iris").await.unwrap();
        let b = tracker.get_or_create_experiment("Iris").await.unwrap();
        let c = tracker.get_or_create_experiment("Wine").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(tracker.experiments().len(), 2);
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let tracker = InMemoryTracker::new();
        let exp = tracker.get_or_create_experiment("Iris").await.unwrap();
        let run = tracker.start_run(&exp, "decision_tree").await.unwrap();
        tracker
            .log_params(&run.run_id, &[("max_depth".into(), "None".into())])
            .await
            .unwrap();
        tracker
            .log_metrics(&run.run_id, &BTreeMap::from([("accuracy".into(), 0.9)]))
            .await
            .unwrap();
        let uri = tracker
            .log_artifact(&run, "model/model.json", b"{}".to_vec())
            .await
            .unwrap();
        assert!(uri.ends_with("/artifacts/model/model.json"));
        tracker.end_run(&run.run_id, RunStatus::Finished).await.unwrap();

        let recorded = tracker.run(&run.run_id).unwrap();
        assert_eq!(recorded.status, RunStatus::Finished);
        assert_eq!(recorded.params["max_depth"], "None");
        assert_eq!(recorded.metrics["accuracy"], 0.9);
        assert!(recorded.artifacts.contains_key("model/model.json"));

        let (info, status) = tracker.get_run(&run.run_id).await.unwrap();
        assert_eq!(info, run);
        assert_eq!(status, RunStatus::Finished);
    }

    #[tokio::test]
    async fn test_closed_run_rejects_logging() {
        let tracker = InMemoryTracker::new();
        let exp = tracker.get_or_create_experiment("Iris").await.unwrap();
        let run = tracker.start_run(&exp, "svm_rbf").await.unwrap();
        tracker.end_run(&run.run_id, RunStatus::Failed).await.unwrap();
        assert!(
            tracker
                .log_metrics(&run.run_id, &BTreeMap::new())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_unreachable_tracker() {
        let tracker = InMemoryTracker::unreachable();
        let err = tracker.get_or_create_experiment("Iris").await.unwrap_err();
        assert!(matches!(err, MltrackError::Tracking(_)));
    }
}
