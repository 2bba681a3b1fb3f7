//! Object store client for inspection images.

use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, error, instrument};
use url::Url;

use crate::error::{ErrorKind, ServiceError};

/// Remote store the upload pipeline writes to.
pub trait AssetStore: Send + Sync + 'static {
    /// Store `bytes` at `path` and return the public URL of the new object.
    fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> impl Future<Output = Result<String, ServiceError>> + Send;

    fn delete(&self, path: &str) -> impl Future<Output = Result<(), ServiceError>> + Send;
}

/// Supabase storage REST API.
#[derive(Clone)]
pub struct SupabaseStorage {
    client: Client,
    base_url: Url,
    bucket: String,
    service_key: String,
}

#[derive(Debug, Deserialize)]
struct StorageErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl SupabaseStorage {
    pub fn new(base_url: &str, service_key: &str, bucket: &str) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url).context("Invalid SUPABASE_URL")?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("SUPABASE_URL must be an http(s) URL");
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create storage HTTP client")?;

        tracing::info!(bucket = bucket, "Storage client initialized");

        Ok(Self {
            client,
            base_url,
            bucket: bucket.to_string(),
            service_key: service_key.to_string(),
        })
    }

    /// `<base>/storage/v1/object/[<prefix>/]<bucket>/<path...>` with each segment escaped.
    fn object_url(&self, prefix: Option<&str>, path: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["storage", "v1", "object"])
                .extend(prefix)
                .push(&self.bucket)
                .extend(path.split('/').filter(|s| !s.is_empty()));
        }
        url
    }

    pub fn public_url(&self, path: &str) -> String {
        self.object_url(Some("public"), path).to_string()
    }

    /// Object path for a public URL we produced, or the input when it already is a path.
    pub fn path_from_public_url<'a>(&self, url_or_path: &'a str) -> &'a str {
        let marker = format!("/object/public/{}/", self.bucket);
        match url_or_path.find(&marker) {
            Some(idx) => &url_or_path[idx + marker.len()..],
            None => url_or_path.trim_start_matches('/'),
        }
    }

    /// Check the storage API answers with our credentials.
    pub async fn health_check(&self) -> anyhow::Result<()> {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["storage", "v1", "bucket"])
                .push(&self.bucket);
        }

        self.client
            .get(url)
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .context("Storage health check failed")?
            .error_for_status()
            .context("Storage unhealthy")?;
        Ok(())
    }

    async fn error_from_response(operation: &str, response: reqwest::Response) -> ServiceError {
        let status = response.status();
        let body = response.json::<StorageErrorBody>().await.ok();
        let detail = body
            .and_then(|b| b.message.or(b.error))
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());

        // Supabase reports a missing bucket/object as 400 with a "not found" message
        let kind = if status == StatusCode::BAD_REQUEST && detail.to_lowercase().contains("not found")
        {
            ErrorKind::NotFound
        } else {
            ErrorKind::from_status(status)
        };

        error!(status = %status, detail = %detail, operation, "Storage request failed");
        ServiceError::new(
            kind,
            format!("Storage {} failed ({}): {}", operation, status.as_u16(), detail),
        )
    }
}

impl AssetStore for SupabaseStorage {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ServiceError> {
        let response = self
            .client
            .post(self.object_url(None, path))
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
            .header("Content-Type", content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await
            .map_err(|e| ServiceError::from_reqwest("Storage upload", e))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response("upload", response).await);
        }

        debug!(path, "Object stored");
        Ok(self.public_url(path))
    }

    #[instrument(skip(self))]
    async fn delete(&self, path: &str) -> Result<(), ServiceError> {
        let path = self.path_from_public_url(path);
        let response = self
            .client
            .delete(self.object_url(None, path))
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
            .send()
            .await
            .map_err(|e| ServiceError::from_reqwest("Storage delete", e))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response("delete", response).await);
        }

        debug!(path, "Object deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> SupabaseStorage {
        SupabaseStorage::new("https://abc.supabase.co", "key", "inspection-images").unwrap()
    }

    #[test]
    fn public_urls_escape_segments() {
        let s = storage();
        assert_eq!(
            s.public_url("12-high-st/room-7/photo 1.jpg"),
            "https://abc.supabase.co/storage/v1/object/public/inspection-images/12-high-st/room-7/photo%201.jpg"
        );
        assert_eq!(
            s.object_url(None, "a/b.png").as_str(),
            "https://abc.supabase.co/storage/v1/object/inspection-images/a/b.png"
        );
    }

    #[test]
    fn public_url_maps_back_to_path() {
        let s = storage();
        let url = s.public_url("prop/room/x.jpg");
        assert_eq!(s.path_from_public_url(&url), "prop/room/x.jpg");
        assert_eq!(s.path_from_public_url("/prop/room/x.jpg"), "prop/room/x.jpg");
    }

    #[test]
    fn rejects_bad_base_url() {
        assert!(SupabaseStorage::new("not a url", "k", "b").is_err());
        assert!(SupabaseStorage::new("mailto:ops@example.com", "k", "b").is_err());
    }
}
