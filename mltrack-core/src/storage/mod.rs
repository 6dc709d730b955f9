//! Object storage for preprocessed splits and trained models.
//!
//! Objects are JSON documents stored under
//! `{prefix}/{category}/{name}.json` in a single bucket.

pub mod s3;
pub mod sigv4;

pub use s3::S3ObjectStore;

use crate::config::{MltrackConfig, s3_uri};
use crate::data::TrainTestSplit;
use crate::error::{MltrackError, Result};
use crate::models::Estimator;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Minimal object store: whole-object put and get.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()>;

    /// Fails with `NotFound` when the object does not exist.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    fn backend_type(&self) -> &'static str;
}

/// Object store held in memory.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<(String, String), Vec<u8>>>,
    unavailable: bool,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects every call as unreachable.
    pub fn unavailable() -> Self {
        Self {
            objects: RwLock::default(),
            unavailable: true,
        }
    }

    /// Keys stored in `bucket`, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .map(|objects| {
                objects
                    .keys()
                    .filter(|(b, _)| b == bucket)
                    .map(|(_, k)| k.clone())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            Err(MltrackError::storage("object store unreachable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        self.check_available()?;
        self.objects
            .write()
            .map_err(|e| MltrackError::storage(e.to_string()))?
            .insert((bucket.to_string(), key.to_string()), body);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.check_available()?;
        self.objects
            .read()
            .map_err(|e| MltrackError::storage(e.to_string()))?
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| MltrackError::not_found(s3_uri(bucket, &[key])))
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

/// What a stored object holds; the middle segment of its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactCategory {
    Preprocessed,
    Models,
}

impl ArtifactCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preprocessed => "preprocessed",
            Self::Models => "models",
        }
    }
}

/// Typed JSON persistence on top of an [`ObjectStore`].
#[derive(Clone)]
pub struct ArtifactStorage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
}

impl ArtifactStorage {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    /// S3 storage in the data bucket, using the configured prefix.
    pub fn from_config(config: &MltrackConfig) -> Result<Self> {
        let store = S3ObjectStore::from_config(config)?;
        tracing::info!(
            bucket = %config.s3_bucket_data,
            endpoint = %store.endpoint(),
            "object storage configured"
        );
        Ok(Self::new(
            Arc::new(store),
            config.s3_bucket_data.clone(),
            config.storage_prefix.clone(),
        ))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn backend_type(&self) -> &'static str {
        self.store.backend_type()
    }

    /// `{prefix}/{category}/{name}.json`, without the prefix segment when it is empty.
    pub fn key_for(&self, category: ArtifactCategory, name: &str) -> String {
        let file = format!("{}.json", name.trim_matches('/'));
        [self.prefix.as_str(), category.as_str(), file.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/")
    }

    /// `s3://{bucket}/{key}`
    pub fn uri(&self, key: &str) -> String {
        s3_uri(&self.bucket, &[key])
    }

    pub async fn save<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        let bytes = body.len();
        self.store.put_object(&self.bucket, key, body).await?;
        tracing::info!(uri = %self.uri(key), bytes, "stored object");
        Ok(())
    }

    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let body = self.store.get_object(&self.bucket, key).await?;
        let value = serde_json::from_slice(&body)?;
        tracing::debug!(uri = %self.uri(key), "loaded object");
        Ok(value)
    }

    /// Store a fitted estimator and return its key.
    pub async fn save_model(&self, experiment: &str, run_id: &str, estimator: &Estimator) -> Result<String> {
        let key = self.key_for(
            ArtifactCategory::Models,
            &model_name(experiment, estimator.name(), run_id),
        );
        self.save(&key, estimator).await?;
        Ok(key)
    }

    pub async fn load_model(&self, key: &str) -> Result<Estimator> {
        self.load(key).await
    }

    /// Store a train/test split and return its key.
    pub async fn save_split(
        &self,
        dataset: &str,
        seed: Option<u64>,
        test_size: f64,
        split: &TrainTestSplit,
    ) -> Result<String> {
        let key = self.key_for(
            ArtifactCategory::Preprocessed,
            &split_name(dataset, seed, test_size),
        );
        self.save(&key, split).await?;
        Ok(key)
    }

    pub async fn load_split(&self, key: &str) -> Result<TrainTestSplit> {
        self.load(key).await
    }
}

impl std::fmt::Debug for ArtifactStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStorage")
            .field("backend", &self.store.backend_type())
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Lower-case, hyphen-separated form of `name` usable as a key segment.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// `{experiment-slug}/{model}/{run_id}`
pub fn model_name(experiment: &str, model: &str, run_id: &str) -> String {
    format!("{}/{model}/{run_id}", slug(experiment))
}

/// `{dataset}-seed{seed|random}-test{pct}`
pub fn split_name(dataset: &str, seed: Option<u64>, test_size: f64) -> String {
    let seed = seed.map_or_else(|| "random".to_string(), |s| s.to_string());
    let pct = (test_size * 100.0).round() as u32;
    format!("{}-seed{seed}-test{pct}", slug(dataset))
}
