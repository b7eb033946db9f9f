//! S3-compatible object store over HTTP (AWS S3, MinIO, R2, ...).
//!
//! Path-style addressing (`{scheme}://{endpoint}/{bucket}/{key}`) with every
//! request signed by [`crate::sigv4`]. File bodies are streamed from disk
//! with an explicit `Content-Length`.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::object::{Metadata, ObjectInfo, ObjectStore, PutBody, PutOptions};
use crate::sigv4::{payload_hash, sign_request, uri_encode, SigningKey, UNSIGNED_PAYLOAD};

const META_PREFIX: &str = "x-amz-meta-";

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// Host (and optional port) of the endpoint, without scheme.
    pub endpoint: String,
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Bucket every key lives in.
    pub bucket: String,
    /// Signing region.
    pub region: String,
    /// Use HTTPS.
    pub secure: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            bucket: "updates".to_string(),
            region: "us-east-1".to_string(),
            secure: true,
        }
    }
}

impl S3Config {
    /// Reject settings no request could succeed with.
    pub fn validate(&self) -> StoreResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(StoreError::InvalidConfig("s3 endpoint is empty".into()));
        }
        if self.endpoint.contains("://") {
            return Err(StoreError::InvalidConfig(format!(
                "s3 endpoint must be a host, not a URL: {}",
                self.endpoint
            )));
        }
        if self.bucket.trim().is_empty() {
            return Err(StoreError::InvalidConfig("s3 bucket is empty".into()));
        }
        Ok(())
    }
}

/// Object store backed by an S3-compatible HTTP endpoint.
pub struct S3ObjectStore {
    client: Client,
    config: S3Config,
    signing: SigningKey,
}

impl S3ObjectStore {
    /// Create a store for the configured endpoint and bucket.
    pub fn new(config: S3Config) -> StoreResult<Self> {
        config.validate()?;
        let signing = SigningKey {
            access_key_id: config.access_key_id.clone(),
            secret_access_key: config.secret_access_key.clone(),
            region: config.region.clone(),
        };
        Ok(Self {
            client: Client::new(),
            config,
            signing,
        })
    }

    /// Canonical (already encoded) path of a key.
    fn object_path(&self, key: &str) -> String {
        format!(
            "/{}/{}",
            uri_encode(&self.config.bucket, false),
            uri_encode(key, true)
        )
    }

    fn url(&self, path: &str) -> String {
        let scheme = if self.config.secure { "https" } else { "http" };
        format!("{scheme}://{}{path}", self.config.endpoint)
    }

    /// Build the signed header map for a request.
    fn signed_headers(
        &self,
        method: &Method,
        path: &str,
        mut headers: Vec<(String, String)>,
        body_hash: &str,
    ) -> StoreResult<HeaderMap> {
        headers.push(("host".to_string(), self.config.endpoint.clone()));
        let auth = sign_request(
            &self.signing,
            method.as_str(),
            path,
            &headers,
            body_hash,
            Utc::now(),
        );

        let mut map = HeaderMap::new();
        for (name, value) in headers.into_iter().chain(auth) {
            if name == "host" {
                continue;
            }
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| StoreError::InvalidConfig(format!("bad header name {name}: {e}")))?;
            let value = HeaderValue::from_bytes(value.as_bytes())
                .map_err(|e| StoreError::InvalidConfig(format!("bad header value for {name}: {e}")))?;
            map.insert(name, value);
        }
        Ok(map)
    }

    async fn status_error(method: &'static str, key: &str, response: Response) -> StoreError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        StoreError::Status {
            method,
            key: key.to_string(),
            status,
            message,
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Stored size from a HEAD response. A hit without a usable length is an error,
/// never a zero-sized object.
fn content_length(key: &str, status: StatusCode, headers: &HeaderMap) -> StoreResult<u64> {
    let raw = header_str(headers, &CONTENT_LENGTH);
    raw.and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| StoreError::Status {
            method: "HEAD",
            key: key.to_string(),
            status: status.as_u16(),
            message: format!("missing or invalid Content-Length: {:?}", raw.unwrap_or("")),
        })
}

fn user_metadata(headers: &HeaderMap) -> Metadata {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(META_PREFIX)?;
            Some((key.to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
        })
        .collect()
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn stat(&self, key: &str) -> StoreResult<Option<ObjectInfo>> {
        let path = self.object_path(key);
        let headers = self.signed_headers(&Method::HEAD, &path, Vec::new(), &payload_hash(b""))?;
        let response = self
            .client
            .head(self.url(&path))
            .headers(headers)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let headers = response.headers();
                let size = content_length(key, status, headers)?;
                debug!(key, size, "s3 stat hit");
                Ok(Some(ObjectInfo {
                    size,
                    content_type: header_str(headers, &CONTENT_TYPE).map(str::to_string),
                    metadata: user_metadata(headers),
                }))
            }
            _ => Err(Self::status_error("HEAD", key, response).await),
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        let path = self.object_path(key);
        let headers = self.signed_headers(&Method::GET, &path, Vec::new(), &payload_hash(b""))?;
        let response = self
            .client
            .get(self.url(&path))
            .headers(headers)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            status if status.is_success() => Ok(response.bytes().await?),
            _ => Err(Self::status_error("GET", key, response).await),
        }
    }

    async fn put(
        &self,
        key: &str,
        body: PutBody,
        size: u64,
        options: PutOptions,
    ) -> StoreResult<()> {
        let path = self.object_path(key);

        let mut signed = Vec::new();
        if let Some(content_type) = &options.content_type {
            signed.push(("content-type".to_string(), content_type.clone()));
        }
        for (name, value) in &options.metadata {
            signed.push((format!("{META_PREFIX}{}", name.to_ascii_lowercase()), value.clone()));
        }

        let (request_body, body_hash) = match body {
            PutBody::Bytes(bytes) => {
                if bytes.len() as u64 != size {
                    return Err(StoreError::LengthMismatch {
                        key: key.to_string(),
                        declared: size,
                        actual: bytes.len() as u64,
                    });
                }
                let hash = payload_hash(&bytes);
                (reqwest::Body::from(bytes), hash)
            }
            PutBody::File(file_path) => {
                let file = tokio::fs::File::open(&file_path).await?;
                let actual = file.metadata().await?.len();
                if actual != size {
                    return Err(StoreError::LengthMismatch {
                        key: key.to_string(),
                        declared: size,
                        actual,
                    });
                }
                (
                    reqwest::Body::wrap_stream(ReaderStream::new(file)),
                    UNSIGNED_PAYLOAD.to_string(),
                )
            }
        };

        let mut headers = self.signed_headers(&Method::PUT, &path, signed, &body_hash)?;
        headers.insert(CONTENT_LENGTH, HeaderValue::from(size));

        let response = self
            .client
            .put(self.url(&path))
            .headers(headers)
            .body(request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::status_error("PUT", key, response).await);
        }
        debug!(key, size, "s3 put");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("s3://{}/{}", self.config.endpoint, self.config.bucket)
    }
}
