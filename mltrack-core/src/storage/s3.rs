//! S3-compatible object store over HTTP (AWS S3, MinIO).

use crate::config::{MltrackConfig, StorageCredentials};
use crate::error::{MltrackError, Result};
use crate::storage::ObjectStore;
use crate::storage::sigv4::{CanonicalRequest, Signer, amz_date, hash_payload, uri_encode};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, StatusCode};
use std::collections::BTreeMap;
use url::Url;

/// Object store speaking the S3 REST API with path-style addressing
/// (`{endpoint}/{bucket}/{key}`).
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    http: reqwest::Client,
    endpoint: Url,
    signer: Signer,
}

impl S3ObjectStore {
    pub fn new(
        http: reqwest::Client,
        endpoint: Url,
        credentials: StorageCredentials,
        region: &str,
    ) -> Self {
        Self {
            http,
            endpoint,
            signer: Signer::new(credentials, region),
        }
    }

    /// Build from configuration.
    ///
    /// Fails with `MissingConfiguration` when the access key pair is unset.
    /// Without `S3_ENDPOINT_URL` the regional AWS endpoint is used.
    pub fn from_config(config: &MltrackConfig) -> Result<Self> {
        let credentials = config.storage_credentials()?;
        let endpoint = match config.s3_endpoint_url.as_deref().filter(|e| !e.is_empty()) {
            Some(endpoint) => endpoint.to_string(),
            None => format!("https://s3.{}.amazonaws.com", config.aws_region),
        };
        let endpoint = Url::parse(&endpoint).map_err(|e| {
            MltrackError::invalid_input(format!("invalid S3 endpoint '{endpoint}': {e}"))
        })?;
        Ok(Self::new(
            config.http_client()?,
            endpoint,
            credentials,
            &config.aws_region,
        ))
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn object_url(&self, bucket: &str, key: &str) -> (Url, String) {
        let path = format!(
            "{}/{}/{}",
            self.endpoint.path().trim_end_matches('/'),
            uri_encode(bucket, false),
            uri_encode(key.trim_start_matches('/'), true)
        );
        let mut url = self.endpoint.clone();
        url.set_path(&path);
        (url, path)
    }

    fn host_header(url: &Url) -> String {
        let host = url.host_str().unwrap_or_default();
        match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    async fn send(
        &self,
        method: Method,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> Result<reqwest::Response> {
        let (url, path) = self.object_url(bucket, key);
        let now = Utc::now();
        let payload_hash = hash_payload(&body);

        let mut headers = BTreeMap::from([
            ("host".to_string(), Self::host_header(&url)),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date(&now)),
        ]);
        if let Some(token) = self.signer.session_token() {
            headers.insert("x-amz-security-token".to_string(), token.to_string());
        }
        let request = CanonicalRequest {
            method: method.as_str().to_string(),
            path,
            query: String::new(),
            headers,
            payload_hash,
        };
        let authorization = self.signer.authorization(&request, &now)?;

        tracing::debug!(%method, %url, bytes = body.len(), "S3 request");
        let mut builder = self
            .http
            .request(method, url.clone())
            .header("authorization", authorization);
        for (name, value) in &request.headers {
            if name != "host" {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| MltrackError::storage(format!("{url}: {e}")))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body_text = resp.text().await.unwrap_or_default();
        tracing::warn!(%status, %url, "S3 request failed");
        match status {
            StatusCode::NOT_FOUND => Err(MltrackError::not_found(format!("s3://{bucket}/{key}"))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(MltrackError::storage(format!(
                "access denied to s3://{bucket}/{key} (HTTP {status}); check the AWS credentials"
            ))),
            _ => Err(MltrackError::storage(format!(
                "HTTP {status} for s3://{bucket}/{key}: {}",
                error_code(&body_text).unwrap_or(body_text.trim())
            ))),
        }
    }
}

/// The `<Code>` element of an S3 XML error body.
fn error_code(body: &str) -> Option<&str> {
    let start = body.find("<Code>")? + "<Code>".len();
    let end = body[start..].find("</Code>")? + start;
    Some(&body[start..end])
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        self.send(Method::PUT, bucket, key, body).await?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let resp = self.send(Method::GET, bucket, key, Vec::new()).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| MltrackError::storage(format!("reading s3://{bucket}/{key}: {e}")))?;
        Ok(bytes.to_vec())
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(endpoint: &str) -> S3ObjectStore {
        S3ObjectStore::new(
            reqwest::Client::new(),
            Url::parse(endpoint).unwrap(),
            StorageCredentials {
                access_key_id: "minio".into(),
                secret_access_key: "minio123".into(),
                session_token: None,
            },
            "eu-west-1",
        )
    }

    #[test]
    fn test_path_style_url() {
        let s3 = store("http://localhost:9000");
        let (url, path) = s3.object_url("mltrack-data", "models/iris classification/rf.json");
        assert_eq!(path, "/mltrack-data/models/iris%20classification/rf.json");
        assert_eq!(
            url.as_str(),
            "http://localhost:9000/mltrack-data/models/iris%20classification/rf.json"
        );
        assert_eq!(S3ObjectStore::host_header(&url), "localhost:9000");
    }

    #[test]
    fn test_endpoint_with_base_path() {
        let s3 = store("https://gateway.example.com/s3/");
        let (_, path) = s3.object_url("b", "/k.json");
        assert_eq!(path, "/s3/b/k.json");
    }

    #[test]
    fn test_default_endpoint_from_region() {
        let config = MltrackConfig {
            aws_access_key_id: Some("id".into()),
            aws_secret_access_key: Some("secret".into()),
            ..MltrackConfig::default()
        };
        let s3 = S3ObjectStore::from_config(&config).unwrap();
        assert_eq!(s3.endpoint().as_str(), "https://s3.eu-west-1.amazonaws.com/");
    }

    #[test]
    fn test_missing_credentials() {
        let err = S3ObjectStore::from_config(&MltrackConfig::default()).unwrap_err();
        assert!(matches!(err, MltrackError::MissingConfiguration { ref key } if key == "AWS_ACCESS_KEY_ID"));
    }

    #[test]
    fn test_error_code_extraction() {
        let body = "<?xml version=\"1.0\"?><Error><Code>NoSuchBucket</Code></Error>";
        assert_eq!(error_code(body), Some("NoSuchBucket"));
        assert_eq!(error_code("nope"), None);
    }
}
