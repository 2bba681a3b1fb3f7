//! Image upload types: data URIs, destinations and batch results.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// A decoded `data:<mime>;base64,<payload>` image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl DataUri {
    /// True for inline data that still has to be persisted.
    pub fn is_data_uri(value: &str) -> bool {
        value.trim_start().starts_with("data:")
    }

    pub fn parse(value: &str) -> Result<Self, ServiceError> {
        let rest = value
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| ServiceError::validation("Not a data URI"))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| ServiceError::validation("Data URI has no payload separator"))?;

        let mut parts = header.split(';');
        let mime_type = match parts.next() {
            Some(m) if !m.is_empty() => m.to_lowercase(),
            _ => "application/octet-stream".to_string(),
        };
        if !parts.any(|p| p.eq_ignore_ascii_case("base64")) {
            return Err(ServiceError::validation("Only base64 data URIs are supported"));
        }

        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| ServiceError::validation(format!("Invalid base64 image data: {}", e)))?;
        if bytes.is_empty() {
            return Err(ServiceError::validation("Data URI payload is empty"));
        }

        Ok(Self { mime_type, bytes })
    }

    /// File extension for the stored object.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/png" => "png",
            "image/webp" => "webp",
            "image/gif" => "gif",
            "image/heic" => "heic",
            _ => "jpg",
        }
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

/// Where a batch of images belongs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDestination {
    pub report_id: String,
    pub room_id: String,
    #[serde(default)]
    pub property_name: Option<String>,
    #[serde(default)]
    pub room_name: Option<String>,
    #[serde(default)]
    pub component_name: Option<String>,
}

/// Destination with human readable folder names resolved once per batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDestination {
    pub property_folder: String,
    pub room_folder: String,
    pub component_folder: Option<String>,
}

impl ResolvedDestination {
    pub fn resolve(dest: &UploadDestination) -> Result<Self, ServiceError> {
        let report_id = dest.report_id.trim();
        let room_id = dest.room_id.trim();
        if report_id.is_empty() || room_id.is_empty() {
            return Err(ServiceError::validation(
                "Report id and room id are required to store images",
            ));
        }

        let property_folder = dest
            .property_name
            .as_deref()
            .map(sanitize_folder)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("property-{}", sanitize_folder(report_id)));
        let room_folder = dest
            .room_name
            .as_deref()
            .map(sanitize_folder)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("room-{}", sanitize_folder(room_id)));
        let component_folder = dest
            .component_name
            .as_deref()
            .map(sanitize_folder)
            .filter(|s| !s.is_empty());

        Ok(Self {
            property_folder,
            room_folder,
            component_folder,
        })
    }

    /// Object path for a new file under this destination.
    pub fn object_path(&self, file_name: &str) -> String {
        match &self.component_folder {
            Some(component) => format!(
                "{}/{}/{}/{}",
                self.property_folder, self.room_folder, component, file_name
            ),
            None => format!("{}/{}/{}", self.property_folder, self.room_folder, file_name),
        }
    }
}

/// Lowercase, dash separated, storage safe folder name.
pub fn sanitize_folder(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = false;
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash && !out.is_empty() {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_end_matches('-').chars().take(60).collect()
}

/// One asset scheduled for upload.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub index: usize,
    pub data_uri: String,
}

/// Aggregate outcome of a batch upload.
///
/// `uploaded_urls` is in completion order within each chunk, not input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUploadResult {
    pub uploaded_urls: Vec<String>,
    pub failed_uploads: Vec<String>,
    pub total_attempts: u32,
    pub total_retries: u32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub total_failure: bool,
}

impl BatchUploadResult {
    /// Legacy flat list: every success followed by every failed original.
    pub fn into_flat_list(self) -> Vec<String> {
        let mut all = self.uploaded_urls;
        all.extend(self.failed_uploads);
        all
    }
}

/// Progress after each chunk settles.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub chunk_index: usize,
    pub chunk_count: usize,
}
