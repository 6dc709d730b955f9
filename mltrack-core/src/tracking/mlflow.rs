//! MLflow tracking client over the REST API (`/api/2.0/mlflow/...`).

use crate::config::MltrackConfig;
use crate::error::{MltrackError, Result};
use crate::storage::{ObjectStore, S3ObjectStore};
use crate::tracking::{RunInfo, RunStatus, TrackingClient};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

/// Most params MLflow accepts in one `log-batch` call.
const MAX_PARAMS_PER_BATCH: usize = 100;
/// Most metrics MLflow accepts in one `log-batch` call.
const MAX_METRICS_PER_BATCH: usize = 1000;

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Empty {}

#[derive(Debug, Deserialize)]
struct GetExperimentResponse {
    experiment: Experiment,
}

#[derive(Debug, Deserialize)]
struct Experiment {
    experiment_id: String,
    #[serde(default)]
    lifecycle_stage: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    run: Run,
}

#[derive(Debug, Deserialize)]
struct Run {
    info: ApiRunInfo,
}

#[derive(Debug, Deserialize)]
struct ApiRunInfo {
    run_id: String,
    experiment_id: String,
    #[serde(default)]
    run_name: String,
    #[serde(default)]
    artifact_uri: String,
    #[serde(default = "running")]
    status: RunStatus,
}

fn running() -> RunStatus {
    RunStatus::Running
}

impl From<ApiRunInfo> for RunInfo {
    fn from(info: ApiRunInfo) -> Self {
        Self {
            run_id: info.run_id,
            experiment_id: info.experiment_id,
            run_name: info.run_name,
            artifact_uri: info.artifact_uri,
        }
    }
}

/// Where an artifact upload goes, decided by the run's artifact root.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ArtifactTarget {
    /// Through the tracking server's artifact proxy, at this relative path.
    Proxy(String),
    /// Directly into the object store.
    ObjectStore { bucket: String, key: String },
}

fn artifact_target(artifact_uri: &str, path: &str) -> Result<ArtifactTarget> {
    let path = path.trim_matches('/');
    if let Some(rest) = artifact_uri.strip_prefix("mlflow-artifacts:") {
        // `mlflow-artifacts://host/a/b` names a server; `mlflow-artifacts:/a/b` does not.
        let rest = match rest.strip_prefix("//") {
            Some(with_host) => with_host.split_once('/').map_or("", |(_, p)| p),
            None => rest,
        };
        let root = rest.trim_matches('/');
        return Ok(ArtifactTarget::Proxy(join(root, path)));
    }
    if let Some(rest) = artifact_uri.strip_prefix("s3://") {
        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(MltrackError::tracking(format!(
                "artifact root '{artifact_uri}' has no bucket"
            )));
        }
        return Ok(ArtifactTarget::ObjectStore {
            bucket: bucket.to_string(),
            key: join(prefix.trim_matches('/'), path),
        });
    }
    Err(MltrackError::tracking(format!(
        "unsupported artifact root '{artifact_uri}'; expected mlflow-artifacts:/ or s3://"
    )))
}

fn join(root: &str, path: &str) -> String {
    match (root.is_empty(), path.is_empty()) {
        (true, _) => path.to_string(),
        (_, true) => root.to_string(),
        _ => format!("{root}/{path}"),
    }
}

/// Whether `host` matches an entry of `MLFLOW_SERVER_ALLOWED_HOSTS`.
///
/// Entries may be `*`, exact hosts (with or without port), or carry a
/// single leading or trailing `*` wildcard.
pub fn host_allowed(allowed: &[String], host: &str, port: Option<u16>) -> bool {
    let with_port = port.map(|p| format!("{host}:{p}"));
    let candidates: Vec<&str> = std::iter::once(host).chain(with_port.as_deref()).collect();
    allowed.iter().map(|a| a.trim()).any(|entry| {
        candidates.iter().any(|candidate| {
            if entry == "*" {
                true
            } else if let Some(suffix) = entry.strip_prefix('*') {
                candidate.ends_with(suffix)
            } else if let Some(prefix) = entry.strip_suffix('*') {
                candidate.starts_with(prefix)
            } else {
                entry.eq_ignore_ascii_case(candidate)
            }
        })
    })
}

/// REST client for an MLflow tracking server.
#[derive(Clone)]
pub struct MlflowClient {
    http: reqwest::Client,
    base: Url,
    tracking_uri: String,
    artifact_store: Option<Arc<dyn ObjectStore>>,
    /// Bucket the server is expected to keep `s3://` artifact roots in.
    artifact_bucket: Option<String>,
}

impl MlflowClient {
    /// `tracking_uri` must be an `http` or `https` URL.
    pub fn new(http: reqwest::Client, tracking_uri: &str) -> Result<Self> {
        let mut base = Url::parse(tracking_uri).map_err(|e| {
            MltrackError::invalid_input(format!("invalid tracking URI '{tracking_uri}': {e}"))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(MltrackError::invalid_input(format!(
                "tracking URI '{tracking_uri}' must use http or https"
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            http,
            base,
            tracking_uri: tracking_uri.to_string(),
            artifact_store: None,
            artifact_bucket: None,
        })
    }

    /// Client for the configured tracking server.
    ///
    /// When storage credentials are configured, an S3 store is attached for
    /// runs whose artifact root is an `s3://` URI. Roots outside
    /// `S3_BUCKET_MLFLOW` are still written, with a warning.
    pub fn from_config(config: &MltrackConfig) -> Result<Self> {
        let mut client = Self::new(config.http_client()?, config.tracking_uri()?)?;
        client.artifact_bucket = Some(config.s3_bucket_mlflow.clone());
        if !config.allowed_hosts.is_empty() {
            let host = client.base.host_str().unwrap_or_default();
            if !host_allowed(&config.allowed_hosts, host, client.base.port()) {
                tracing::warn!(
                    host,
                    allowed = ?config.allowed_hosts,
                    "tracking host is not in MLFLOW_SERVER_ALLOWED_HOSTS; the server may reject requests"
                );
            }
        }
        if config.storage_credentials().is_ok() {
            client = client.with_artifact_store(Arc::new(S3ObjectStore::from_config(config)?));
        }
        Ok(client)
    }

    pub fn with_artifact_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.artifact_store = Some(store);
        self
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| MltrackError::tracking(format!("cannot build URL for {path}: {e}")))
    }

    async fn send(&self, endpoint: &str, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        tracing::debug!(endpoint, "MLflow request");
        request
            .send()
            .await
            .map_err(|e| MltrackError::tracking(format!("{endpoint}: {e}")))
    }

    async fn decode<T: DeserializeOwned>(endpoint: &str, resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| MltrackError::tracking(format!("{endpoint}: {e}")))?;
        if !status.is_success() {
            tracing::warn!(%status, endpoint, "MLflow API error");
            return Err(MltrackError::tracking(describe_failure(endpoint, status, &body)));
        }
        let body = if body.trim().is_empty() { "{}" } else { body.as_str() };
        serde_json::from_str(body)
            .map_err(|e| MltrackError::tracking(format!("{endpoint}: unexpected response: {e}")))
    }

    async fn post<T: DeserializeOwned>(&self, endpoint: &str, body: &Value) -> Result<T> {
        let url = self.url(&format!("api/2.0/mlflow/{endpoint}"))?;
        let resp = self.send(endpoint, self.http.post(url).json(body)).await?;
        Self::decode(endpoint, resp).await
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = self.url(&format!("api/2.0/mlflow/{endpoint}"))?;
        let resp = self.send(endpoint, self.http.get(url).query(query)).await?;
        Self::decode(endpoint, resp).await
    }

    async fn find_experiment(&self, name: &str) -> Result<Option<Experiment>> {
        let endpoint = "experiments/get-by-name";
        let url = self.url(&format!("api/2.0/mlflow/{endpoint}"))?;
        let resp = self
            .send(endpoint, self.http.get(url).query(&[("experiment_name", name)]))
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let found: GetExperimentResponse = Self::decode(endpoint, resp).await?;
        Ok(Some(found.experiment))
    }

    async fn upload_via_proxy(&self, path: &str, body: Vec<u8>) -> Result<()> {
        let endpoint = "mlflow-artifacts/artifacts";
        let encoded = crate::storage::sigv4::uri_encode(path, true);
        let url = self.url(&format!("api/2.0/{endpoint}/{encoded}"))?;
        let resp = self
            .send(
                endpoint,
                self.http
                    .put(url)
                    .header("content-type", "application/octet-stream")
                    .body(body),
            )
            .await?;
        let _: Empty = Self::decode(endpoint, resp).await?;
        Ok(())
    }
}

fn describe_failure(endpoint: &str, status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ApiError>(body) {
        Ok(err) if !err.error_code.is_empty() || !err.message.is_empty() => {
            format!("{endpoint}: {} ({}): {}", err.error_code, status.as_u16(), err.message)
        }
        _ => format!("{endpoint}: HTTP {status}: {}", body.trim()),
    }
}

impl std::fmt::Debug for MlflowClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MlflowClient")
            .field("tracking_uri", &self.tracking_uri)
            .field(
                "artifact_store",
                &self.artifact_store.as_ref().map(|s| s.backend_type()),
            )
            .field("artifact_bucket", &self.artifact_bucket)
            .finish()
    }
}

#[async_trait]
impl TrackingClient for MlflowClient {
    fn tracking_uri(&self) -> &str {
        &self.tracking_uri
    }

    async fn get_or_create_experiment(&self, name: &str) -> Result<String> {
        if let Some(experiment) = self.find_experiment(name).await? {
            if experiment.lifecycle_stage.as_deref() == Some("deleted") {
                return Err(MltrackError::tracking(format!(
                    "experiment '{name}' is deleted; restore it or choose another name"
                )));
            }
            return Ok(experiment.experiment_id);
        }
        let created: CreateExperimentResponse = self
            .post("experiments/create", &json!({ "name": name }))
            .await?;
        tracing::info!(experiment = name, id = %created.experiment_id, "created experiment");
        Ok(created.experiment_id)
    }

    async fn start_run(&self, experiment_id: &str, run_name: &str) -> Result<RunInfo> {
        let body = json!({
            "experiment_id": experiment_id,
            "run_name": run_name,
            "start_time": Utc::now().timestamp_millis(),
            "tags": [{ "key": "mlflow.runName", "value": run_name }],
        });
        let created: RunResponse = self.post("runs/create", &body).await?;
        Ok(created.run.info.into())
    }

    async fn get_run(&self, run_id: &str) -> Result<(RunInfo, RunStatus)> {
        let found: RunResponse = self.get("runs/get", &[("run_id", run_id)]).await?;
        let status = found.run.info.status;
        Ok((found.run.info.into(), status))
    }

    async fn log_params(&self, run_id: &str, params: &[(String, String)]) -> Result<()> {
        for chunk in params.chunks(MAX_PARAMS_PER_BATCH) {
            let params: Vec<Value> = chunk
                .iter()
                .map(|(key, value)| json!({ "key": key, "value": value }))
                .collect();
            let _: Empty = self
                .post("runs/log-batch", &json!({ "run_id": run_id, "params": params }))
                .await?;
        }
        Ok(())
    }

    async fn log_metrics(&self, run_id: &str, metrics: &BTreeMap<String, f64>) -> Result<()> {
        let timestamp = Utc::now().timestamp_millis();
        let metrics: Vec<Value> = metrics
            .iter()
            .map(|(key, value)| {
                json!({ "key": key, "value": value, "timestamp": timestamp, "step": 0 })
            })
            .collect();
        for chunk in metrics.chunks(MAX_METRICS_PER_BATCH) {
            let _: Empty = self
                .post("runs/log-batch", &json!({ "run_id": run_id, "metrics": chunk }))
                .await?;
        }
        Ok(())
    }

    async fn log_artifact(&self, run: &RunInfo, path: &str, body: Vec<u8>) -> Result<String> {
        let uri = format!("{}/{}", run.artifact_uri.trim_end_matches('/'), path.trim_matches('/'));
        match artifact_target(&run.artifact_uri, path)? {
            ArtifactTarget::Proxy(relative) => self.upload_via_proxy(&relative, body).await?,
            ArtifactTarget::ObjectStore { bucket, key } => {
                let store = self.artifact_store.as_ref().ok_or_else(|| {
                    MltrackError::tracking(format!(
                        "run {} stores artifacts in {}, but no object store credentials are configured",
                        run.run_id, run.artifact_uri
                    ))
                })?;
                if let Some(expected) = self.artifact_bucket.as_deref().filter(|b| *b != bucket) {
                    tracing::warn!(
                        run_id = %run.run_id,
                        %bucket,
                        expected,
                        "run artifact root is outside S3_BUCKET_MLFLOW"
                    );
                }
                store.put_object(&bucket, &key, body).await?;
            }
        }
        tracing::debug!(run_id = %run.run_id, %uri, "logged artifact");
        Ok(uri)
    }

    async fn end_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        let body = json!({
            "run_id": run_id,
            "status": status,
            "end_time": Utc::now().timestamp_millis(),
        });
        let _: Empty = self.post("runs/update", &body).await?;
        Ok(())
    }
}
