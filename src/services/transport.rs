//! HTTP adapter for the remote processing service.
//!
//! The transport is a stateless protocol adapter: it performs exactly one
//! request per call and never retries. Retry policy lives in the
//! orchestrator.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;

use crate::models::job::{ErrorKind, StyleId};
use crate::models::remote::{ImagePayload, StageParams, StatusReport, TriggerRequest, UploadResponse};

const UPLOAD_PATH: &str = "/upload";
const STATUS_PATH: &str = "/status";
const APPLY_STYLE_PATH: &str = "/apply-style";

/// Requests the orchestrator issues against the remote service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the photo and first-stage parameters. Returns the assigned job id.
    async fn upload(
        &self,
        image: &ImagePayload,
        params: &StageParams,
    ) -> Result<UploadResponse, TransportError>;

    /// Read the current status of a job.
    async fn check_status(&self, job_id: &str) -> Result<StatusReport, TransportError>;

    /// Arm the remote worker for the second stage.
    async fn trigger_second_stage(&self, job_id: &str, style: &StyleId)
        -> Result<(), TransportError>;
}

/// Errors from the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connectivity failure (DNS, connect, TLS, request timeout).
    #[error("Network request failed: {0}")]
    Network(String),

    /// The service rejected the request (4xx).
    #[error("Request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The service failed while handling the request (5xx).
    #[error("Remote service error ({status}): {body}")]
    Server { status: u16, body: String },

    /// The response body did not match the expected shape.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The request was not sent because it is malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Network(_) => ErrorKind::NetworkError,
            TransportError::Rejected { .. } | TransportError::InvalidRequest(_) => {
                ErrorKind::ValidationError
            }
            TransportError::Server { .. } | TransportError::Decode(_) => ErrorKind::RemoteError,
        }
    }

    fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status.is_client_error() {
            TransportError::Rejected {
                status: status.as_u16(),
                body,
            }
        } else {
            TransportError::Server {
                status: status.as_u16(),
                body,
            }
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            TransportError::from_status(status, e.to_string())
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

/// [`Transport`] over HTTP using [`reqwest`].
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a client for the service at `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("restyle-orchestrator/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self::with_client(http, base_url))
    }

    /// Reuse an existing [`reqwest::Client`].
    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Status URL with `job_id` escaped as a single path segment.
    fn status_url(&self, job_id: &str) -> Result<reqwest::Url, TransportError> {
        let mut url = reqwest::Url::parse(&self.url(STATUS_PATH))
            .map_err(|e| TransportError::InvalidRequest(format!("invalid service URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| {
                TransportError::InvalidRequest(format!(
                    "service URL cannot carry a path: {}",
                    self.base_url
                ))
            })?
            .push(job_id);
        Ok(url)
    }

    /// Return the response unchanged on 2xx, otherwise an error carrying the body.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::from_status(status, body));
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, TransportError> {
        let response = Self::ensure_success(response).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn upload(
        &self,
        image: &ImagePayload,
        params: &StageParams,
    ) -> Result<UploadResponse, TransportError> {
        let mime = image.check().map_err(TransportError::InvalidRequest)?;

        let part = multipart::Part::bytes(image.bytes.clone())
            .file_name(image.file_name.clone())
            .mime_str(mime)?;

        let form = params
            .form_fields()
            .into_iter()
            .fold(multipart::Form::new().part("image", part), |form, (k, v)| {
                form.text(k, v)
            });

        tracing::debug!(
            file_name = %image.file_name,
            size_bytes = image.bytes.len(),
            "Uploading image"
        );

        let response = self
            .http
            .post(self.url(UPLOAD_PATH))
            .multipart(form)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn check_status(&self, job_id: &str) -> Result<StatusReport, TransportError> {
        let response = self.http.get(self.status_url(job_id)?).send().await?;

        Self::parse_response(response).await
    }

    async fn trigger_second_stage(
        &self,
        job_id: &str,
        style: &StyleId,
    ) -> Result<(), TransportError> {
        let response = self
            .http
            .post(self.url(APPLY_STYLE_PATH))
            .json(&TriggerRequest::new(job_id, style))
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_follow_status_class() {
        let rejected = TransportError::from_status(reqwest::StatusCode::BAD_REQUEST, String::new());
        assert_eq!(rejected.kind(), ErrorKind::ValidationError);

        let server = TransportError::from_status(
            reqwest::StatusCode::SERVICE_UNAVAILABLE,
            String::new(),
        );
        assert_eq!(server.kind(), ErrorKind::RemoteError);

        assert_eq!(
            TransportError::Network("offline".into()).kind(),
            ErrorKind::NetworkError
        );
        assert_eq!(
            TransportError::Decode("eof".into()).kind(),
            ErrorKind::RemoteError
        );
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let transport = HttpTransport::with_client(reqwest::Client::new(), "http://svc/api/");
        assert_eq!(transport.url(UPLOAD_PATH), "http://svc/api/upload");
    }

    #[test]
    fn job_id_is_one_escaped_path_segment() {
        let transport = HttpTransport::with_client(reqwest::Client::new(), "http://svc/api");
        let url = transport.status_url("room 7/a?x=1#frag").unwrap();
        assert_eq!(url.as_str(), "http://svc/api/status/room%207%2Fa%3Fx=1%23frag");
        assert!(url.query().is_none());
        assert!(url.fragment().is_none());
    }

    #[test]
    fn unusable_base_url_is_an_invalid_request() {
        let transport = HttpTransport::with_client(reqwest::Client::new(), "not a url");
        let err = transport.status_url("J1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }
}
