//! AWS Signature Version 4 request signing.

use crate::config::StorageCredentials;
use crate::error::{MltrackError, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Hex SHA-256 of a request body, as sent in `x-amz-content-sha256`.
pub fn hash_payload(body: &[u8]) -> String {
    format!("{:x}", Sha256::digest(body))
}

/// Percent-encode everything but the RFC 3986 unreserved set (and `/` when
/// `keep_slash` is set).
pub fn uri_encode(input: &str, keep_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if keep_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// The parts of an HTTP request that go into its signature.
#[derive(Debug, Clone)]
pub struct CanonicalRequest {
    pub method: String,
    /// Already URI-encoded path.
    pub path: String,
    /// Already encoded and sorted query string.
    pub query: String,
    /// Lower-case header names to values.
    pub headers: BTreeMap<String, String>,
    pub payload_hash: String,
}

impl CanonicalRequest {
    pub fn signed_headers(&self) -> String {
        self.headers.keys().cloned().collect::<Vec<_>>().join(";")
    }

    fn render(&self) -> String {
        let headers: String = self
            .headers
            .iter()
            .map(|(k, v)| format!("{k}:{}\n", v.trim()))
            .collect();
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            self.path,
            self.query,
            headers,
            self.signed_headers(),
            self.payload_hash
        )
    }
}

/// Signs requests for one service in one region.
#[derive(Clone)]
pub struct Signer {
    credentials: StorageCredentials,
    region: String,
    service: String,
}

impl Signer {
    pub fn new(credentials: StorageCredentials, region: impl Into<String>) -> Self {
        Self {
            credentials,
            region: region.into(),
            service: "s3".to_string(),
        }
    }

    pub fn session_token(&self) -> Option<&str> {
        self.credentials.session_token.as_deref()
    }

    fn scope(&self, at: &DateTime<Utc>) -> String {
        format!(
            "{}/{}/{}/aws4_request",
            at.format("%Y%m%d"),
            self.region,
            self.service
        )
    }

    fn signing_key(&self, at: &DateTime<Utc>) -> Result<Vec<u8>> {
        let secret = format!("AWS4{}", self.credentials.secret_access_key);
        let date = hmac(secret.as_bytes(), at.format("%Y%m%d").to_string().as_bytes())?;
        let region = hmac(&date, self.region.as_bytes())?;
        let service = hmac(&region, self.service.as_bytes())?;
        hmac(&service, b"aws4_request")
    }

    /// Value of the `Authorization` header for `request` signed at `at`.
    ///
    /// `request.headers` must already hold `host`, `x-amz-date` and
    /// `x-amz-content-sha256`.
    pub fn authorization(&self, request: &CanonicalRequest, at: &DateTime<Utc>) -> Result<String> {
        let canonical_hash = format!("{:x}", Sha256::digest(request.render().as_bytes()));
        let scope = self.scope(at);
        let string_to_sign = format!(
            "{ALGORITHM}\n{}\n{scope}\n{canonical_hash}",
            amz_date(at)
        );
        let key = self.signing_key(at)?;
        let signature = hex(&hmac(&key, string_to_sign.as_bytes())?);
        Ok(format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={}, Signature={signature}",
            self.credentials.access_key_id,
            request.signed_headers()
        ))
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("credentials", &self.credentials)
            .field("region", &self.region)
            .finish()
    }
}

/// `YYYYMMDDTHHMMSSZ`, the `x-amz-date` format.
pub fn amz_date(at: &DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| MltrackError::storage(format!("cannot derive signing key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
