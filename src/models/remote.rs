//! Wire types exchanged with the remote processing service.

use std::collections::BTreeMap;
use std::path::Path;

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::StyleId;

/// Status vocabulary reported by the status endpoint.
///
/// Strings outside the known vocabulary are kept verbatim and treated as
/// intermediate by the poller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RemoteStatus {
    #[default]
    Processing,
    Done,
    EmptyComplete,
    Error,
    StyleError,
    Other(String),
}

impl RemoteStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RemoteStatus::Processing => "processing",
            RemoteStatus::Done => "done",
            RemoteStatus::EmptyComplete => "empty_complete",
            RemoteStatus::Error => "error",
            RemoteStatus::StyleError => "style_error",
            RemoteStatus::Other(s) => s,
        }
    }
}

impl From<String> for RemoteStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "processing" => RemoteStatus::Processing,
            "done" => RemoteStatus::Done,
            "empty_complete" => RemoteStatus::EmptyComplete,
            "error" => RemoteStatus::Error,
            "style_error" => RemoteStatus::StyleError,
            _ => RemoteStatus::Other(value),
        }
    }
}

impl From<&str> for RemoteStatus {
    fn from(value: &str) -> Self {
        RemoteStatus::from(value.to_string())
    }
}

impl From<RemoteStatus> for String {
    fn from(value: RemoteStatus) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response of `GET /status/{jobId}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: RemoteStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub styled_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl StatusReport {
    pub fn new(status: impl Into<RemoteStatus>) -> Self {
        Self {
            status: status.into(),
            ..Default::default()
        }
    }

    pub fn with_empty_url(mut self, url: impl Into<String>) -> Self {
        self.empty_url = Some(url.into());
        self
    }

    pub fn with_original_url(mut self, url: impl Into<String>) -> Self {
        self.original_url = Some(url.into());
        self
    }

    pub fn with_styled_url(mut self, url: impl Into<String>) -> Self {
        self.styled_url = Some(url.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Response of `POST /upload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub job_id: String,
    #[serde(default)]
    pub status: RemoteStatus,
}

/// Body of `POST /apply-style`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    pub job_id: String,
    pub style_id: StyleId,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl TriggerRequest {
    pub fn new(job_id: &str, style_id: &StyleId) -> Self {
        Self {
            job_id: job_id.to_string(),
            style_id: style_id.clone(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Room photo submitted for processing.
#[derive(Debug, Clone, Validate)]
pub struct ImagePayload {
    #[garde(length(min = 1, max = 255))]
    pub file_name: String,

    /// At most 20 MiB.
    #[garde(length(min = 1, max = 20971520))]
    pub bytes: Vec<u8>,
}

impl ImagePayload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    /// Read a photo from disk.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self { file_name, bytes })
    }

    /// Validate the payload and return its MIME type.
    pub fn check(&self) -> Result<&'static str, String> {
        self.validate().map_err(|report| report.to_string())?;

        let format = image::guess_format(&self.bytes)
            .map_err(|_| "image format not recognized".to_string())?;

        match format {
            image::ImageFormat::Png | image::ImageFormat::Jpeg | image::ImageFormat::WebP => {
                Ok(format.to_mime_type())
            }
            other => Err(format!("unsupported image format: {:?}", other)),
        }
    }
}

/// Form fields set from typed parameters; `extra` cannot override them.
const RESERVED_FORM_FIELDS: [&str; 3] = ["image", "mode", "roomType"];

/// Parameters sent with the upload that configure the first stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageParams {
    /// Room category hint (e.g. "living_room").
    pub room_type: Option<String>,

    /// Additional form fields forwarded verbatim, except `image`, `mode`
    /// and `roomType`.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl StageParams {
    pub fn with_room_type(mut self, room_type: impl Into<String>) -> Self {
        self.room_type = Some(room_type.into());
        self
    }

    /// Form fields for the multipart upload.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![("mode".to_string(), "empty".to_string())];
        if let Some(room_type) = &self.room_type {
            fields.push(("roomType".to_string(), room_type.clone()));
        }
        for (key, value) in &self.extra {
            if RESERVED_FORM_FIELDS.contains(&key.as_str()) {
                tracing::debug!(field = %key, "Ignoring extra form field that shadows a stage parameter");
                continue;
            }
            fields.push((key.clone(), value.clone()));
        }
        fields
    }
}
