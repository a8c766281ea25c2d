//! Avatar upload.
//!
//! Posts the exported JPEG as a multipart form field. The editor itself never
//! uploads; the host calls this with the blob it received from `on_save`.

use crate::editor::source::HTTP_CLIENT;
use bytes::Bytes;
use thiserror::Error;

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No upload URL configured")]
    NoUploadUrl,

    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Upload rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Server response to a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub status: u16,
    pub body: String,
}

/// Multipart upload target
#[derive(Debug, Clone)]
pub struct Uploader {
    url: String,
    field: String,
    token: Option<String>,
}

impl Uploader {
    pub fn new(url: &str, field: &str, token: Option<String>) -> Self {
        Self {
            url: url.trim().to_string(),
            field: field.to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.url.is_empty()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send the blob as `<field>` (`avatar.jpg`, `image/jpeg`)
    pub async fn upload(&self, blob: Bytes) -> Result<UploadReceipt, UploadError> {
        if !self.is_configured() {
            return Err(UploadError::NoUploadUrl);
        }

        tracing::info!("Uploading {} byte avatar to {}", blob.len(), self.url);

        let part = reqwest::multipart::Part::stream(blob)
            .file_name("avatar.jpg")
            .mime_str("image/jpeg")?;
        let form = reqwest::multipart::Form::new().part(self.field.clone(), part);

        let mut request = HTTP_CLIENT.post(&self.url).multipart(form);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            tracing::warn!("Upload rejected: HTTP {}", status);
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!("Upload complete: HTTP {}", status);
        Ok(UploadReceipt {
            status: status.as_u16(),
            body,
        })
    }
}
