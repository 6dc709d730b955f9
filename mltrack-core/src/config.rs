//! Configuration for mltrack.
//!
//! Uses `figment` for layered configuration: defaults -> optional TOML file -> environment.
//! Environment variables keep the names the docker-compose stack already exports
//! (`MLFLOW_TRACKING_URI`, `S3_BUCKET_DATA`, `AWS_REGION`, ...).
//!
//! Values without a sensible default (tracking URI, storage credentials) are only
//! checked when the operation that needs them runs, through the accessor methods.

use crate::error::{MltrackError, Result};
use figment::{
    Figment, Metadata, Profile, Provider,
    providers::{Format, Serialized, Toml},
    value::{Dict, Map, Value},
};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable -> config field mapping.
pub const ENV_KEYS: &[(&str, &str)] = &[
    ("MLFLOW_TRACKING_URI", "tracking_uri"),
    ("S3_BUCKET_MLFLOW", "s3_bucket_mlflow"),
    ("S3_BUCKET_DATA", "s3_bucket_data"),
    ("AWS_REGION", "aws_region"),
    ("S3_ENDPOINT_URL", "s3_endpoint_url"),
    ("AWS_ACCESS_KEY_ID", "aws_access_key_id"),
    ("AWS_SECRET_ACCESS_KEY", "aws_secret_access_key"),
    ("AWS_SESSION_TOKEN", "aws_session_token"),
    ("MLTRACK_STORAGE_PREFIX", "storage_prefix"),
    ("MLFLOW_SERVER_ALLOWED_HOSTS", "allowed_hosts"),
    ("MLTRACK_HTTP_TIMEOUT_SECS", "http_timeout_secs"),
    ("ENV", "env"),
];

/// Settings for the tracking server and object storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MltrackConfig {
    /// MLflow tracking server URI.
    #[serde(default)]
    pub tracking_uri: Option<String>,
    /// Bucket backing MLflow's artifact store.
    #[serde(default = "default_bucket_mlflow")]
    pub s3_bucket_mlflow: String,
    /// Bucket for preprocessed data and model copies.
    #[serde(default = "default_bucket_data")]
    pub s3_bucket_data: String,
    #[serde(default = "default_region")]
    pub aws_region: String,
    /// Custom endpoint for S3-compatible services (MinIO, R2, ...).
    #[serde(default)]
    pub s3_endpoint_url: Option<String>,
    #[serde(default)]
    pub aws_access_key_id: Option<String>,
    #[serde(default)]
    pub aws_secret_access_key: Option<String>,
    #[serde(default)]
    pub aws_session_token: Option<String>,
    /// Key prefix applied to every stored object.
    #[serde(default)]
    pub storage_prefix: String,
    /// Hosts the tracking server process accepts (comma separated in the environment).
    #[serde(default, deserialize_with = "deserialize_host_list")]
    pub allowed_hosts: Vec<String>,
    /// Request timeout for tracking and storage clients; client default when unset.
    #[serde(default, deserialize_with = "deserialize_opt_secs")]
    pub http_timeout_secs: Option<u64>,
    /// Deployment environment; `local` turns on debug logging.
    #[serde(default = "default_env")]
    pub env: String,
}

impl Default for MltrackConfig {
    fn default() -> Self {
        Self {
            tracking_uri: None,
            s3_bucket_mlflow: default_bucket_mlflow(),
            s3_bucket_data: default_bucket_data(),
            aws_region: default_region(),
            s3_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_session_token: None,
            storage_prefix: String::new(),
            allowed_hosts: Vec::new(),
            http_timeout_secs: None,
            env: default_env(),
        }
    }
}

fn default_bucket_mlflow() -> String {
    "mltrack-mlflow".to_string()
}

fn default_bucket_data() -> String {
    "mltrack-data".to_string()
}

fn default_region() -> String {
    "eu-west-1".to_string()
}

fn default_env() -> String {
    "production".to_string()
}

/// Accept either a list or a comma separated string.
fn deserialize_host_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HostList {
        List(Vec<String>),
        Joined(String),
    }

    Ok(match HostList::deserialize(deserializer)? {
        HostList::List(hosts) => hosts,
        HostList::Joined(joined) => joined
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect(),
    })
}

/// Accept a number or a numeric string; blank means unset.
fn deserialize_opt_secs<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Secs {
        Number(u64),
        Text(String),
    }

    match Option::<Secs>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Secs::Number(secs)) => Ok(Some(secs)),
        Some(Secs::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(Secs::Text(text)) => text.trim().parse().map(Some).map_err(|_| {
            D::Error::custom(format!("expected a number of seconds, found '{text}'"))
        }),
    }
}

/// The variables in [`ENV_KEYS`], mapped onto config fields with their values
/// left as strings, so `2024` or `007` stays text instead of becoming a number.
struct EnvVars;

impl Provider for EnvVars {
    fn metadata(&self) -> Metadata {
        Metadata::named("environment variable(s)")
    }

    fn data(&self) -> std::result::Result<Map<Profile, Dict>, figment::Error> {
        let dict: Dict = std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .filter_map(|(key, value)| {
                ENV_KEYS
                    .iter()
                    .find(|(env, _)| key.eq_ignore_ascii_case(env))
                    .map(|(_, field)| ((*field).to_string(), Value::from(value)))
            })
            .collect();
        Ok(Profile::Default.collect(dict))
    }
}

impl MltrackConfig {
    /// Load configuration from layered sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. The TOML file at `file`, when given and present
    /// 3. Built-in defaults
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = file {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            } else {
                tracing::warn!(path = %path.display(), "config file not found, skipping");
            }
        }
        figment = figment.merge(EnvVars);
        figment.extract().map_err(|e| MltrackError::Config(Box::new(e)))
    }

    /// Load from the environment only.
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Tracking server URI, required once tracking is used.
    pub fn tracking_uri(&self) -> Result<&str> {
        self.tracking_uri
            .as_deref()
            .filter(|uri| !uri.trim().is_empty())
            .ok_or_else(|| MltrackError::missing("MLFLOW_TRACKING_URI"))
    }

    /// Storage credentials, required once the object store is used.
    pub fn storage_credentials(&self) -> Result<StorageCredentials> {
        let access_key_id = self
            .aws_access_key_id
            .clone()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| MltrackError::missing("AWS_ACCESS_KEY_ID"))?;
        let secret_access_key = self
            .aws_secret_access_key
            .clone()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| MltrackError::missing("AWS_SECRET_ACCESS_KEY"))?;
        Ok(StorageCredentials {
            access_key_id,
            secret_access_key,
            session_token: self.aws_session_token.clone().filter(|v| !v.is_empty()),
        })
    }

    pub fn http_timeout(&self) -> Option<Duration> {
        self.http_timeout_secs.map(Duration::from_secs)
    }

    /// Whether verbose local-development logging is requested.
    pub fn is_local(&self) -> bool {
        self.env.eq_ignore_ascii_case("local")
    }

    /// Build an HTTP client honoring the configured timeout.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder().user_agent(concat!(
            "mltrack/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(timeout) = self.http_timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(builder.build()?)
    }
}

/// Access key pair (plus optional STS session token).
#[derive(Clone, PartialEq, Eq)]
pub struct StorageCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Build an S3 URI from a bucket and path components.
///
/// `s3_uri("mltrack-data", &["training", "iris.csv"])` is `s3://mltrack-data/training/iris.csv`.
pub fn s3_uri(bucket: &str, parts: &[&str]) -> String {
    let path = parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    format!("s3://{bucket}/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_config() {
        let config = MltrackConfig::default();
        assert!(config.tracking_uri.is_none());
        assert_eq!(config.s3_bucket_mlflow, "mltrack-mlflow");
        assert_eq!(config.s3_bucket_data, "mltrack-data");
        assert_eq!(config.aws_region, "eu-west-1");
        assert!(!config.is_local());
    }

    #[test]
    fn test_load_from_env() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("MLFLOW_TRACKING_URI", "http://test:5000");
            jail.set_env("S3_BUCKET_MLFLOW", "test-mlflow-bucket");
            jail.set_env("S3_BUCKET_DATA", "test-data-bucket");
            jail.set_env("AWS_REGION", "us-east-1");
            jail.set_env("MLFLOW_SERVER_ALLOWED_HOSTS", "mlflow,localhost");

            let config = MltrackConfig::from_env().map_err(|e| e.to_string())?;
            assert_eq!(config.tracking_uri().unwrap(), "http://test:5000");
            assert_eq!(config.s3_bucket_mlflow, "test-mlflow-bucket");
            assert_eq!(config.s3_bucket_data, "test-data-bucket");
            assert_eq!(config.aws_region, "us-east-1");
            assert_eq!(config.allowed_hosts, vec!["mlflow", "localhost"]);
            Ok(())
        });
    }

    #[test]
    fn test_missing_values_fail_lazily() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            let config = MltrackConfig::from_env().map_err(|e| e.to_string())?;
            let err = config.tracking_uri().unwrap_err();
            assert!(
                matches!(err, MltrackError::MissingConfiguration { ref key } if key == "MLFLOW_TRACKING_URI")
            );
            let err = config.storage_credentials().unwrap_err();
            assert!(
                matches!(err, MltrackError::MissingConfiguration { ref key } if key == "AWS_ACCESS_KEY_ID")
            );
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "mltrack.toml",
                r#"
                tracking_uri = "http://from-file:5000"
                s3_bucket_data = "file-bucket"
                env = "local"
                "#,
            )?;
            jail.set_env("S3_BUCKET_DATA", "env-bucket");

            let config = MltrackConfig::load(Some(Path::new("mltrack.toml"))).map_err(|e| e.to_string())?;
            assert_eq!(config.tracking_uri().unwrap(), "http://from-file:5000");
            assert_eq!(config.s3_bucket_data, "env-bucket");
            assert!(config.is_local());
            Ok(())
        });
    }

    #[test]
    fn test_numeric_env_values_stay_text() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("AWS_ACCESS_KEY_ID", "12345678");
            jail.set_env("AWS_SECRET_ACCESS_KEY", "00123456");
            jail.set_env("MLTRACK_STORAGE_PREFIX", "2024");
            jail.set_env("S3_BUCKET_DATA", "1.50");
            jail.set_env("ENV", "true");
            jail.set_env("MLTRACK_HTTP_TIMEOUT_SECS", "30");

            let config = MltrackConfig::from_env().map_err(|e| e.to_string())?;
            assert_eq!(config.storage_prefix, "2024");
            assert_eq!(config.s3_bucket_data, "1.50");
            assert_eq!(config.env, "true");
            assert_eq!(config.http_timeout(), Some(Duration::from_secs(30)));
            let creds = config.storage_credentials().unwrap();
            assert_eq!(creds.access_key_id, "12345678");
            assert_eq!(creds.secret_access_key, "00123456");
            Ok(())
        });
    }

    #[test]
    fn test_timeout_from_file_and_bad_timeout() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file("mltrack.toml", "http_timeout_secs = 5")?;
            let config = MltrackConfig::load(Some(Path::new("mltrack.toml"))).map_err(|e| e.to_string())?;
            assert_eq!(config.http_timeout_secs, Some(5));

            jail.set_env("MLTRACK_HTTP_TIMEOUT_SECS", "soon");
            let err = MltrackConfig::from_env().unwrap_err();
            assert!(matches!(err, MltrackError::Config(_)));
            Ok(())
        });
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let config = MltrackConfig {
            aws_access_key_id: Some("AKIDEXAMPLE".into()),
            aws_secret_access_key: Some("super-secret".into()),
            ..Default::default()
        };
        let creds = config.storage_credentials().unwrap();
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("AKIDEXAMPLE"));
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn test_s3_uri() {
        assert_eq!(
            s3_uri("my-bucket", &["folder", "subfolder", "file.txt"]),
            "s3://my-bucket/folder/subfolder/file.txt"
        );
        assert_eq!(s3_uri("bucket", &["single-file.csv"]), "s3://bucket/single-file.csv");
    }
}
