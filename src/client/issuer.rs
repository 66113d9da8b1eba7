//! Client for the upload URL issuance endpoint

use crate::issuance::{ErrorBody, IssueRequest, IssuedUrl};
use crate::server::PRESIGN_PATH;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Issuer client errors
#[derive(Error, Debug)]
pub enum IssuerError {
    /// The server answered with an error status
    #[error("Failed to get upload URL: {message}")]
    Rejected { status: u16, message: String },

    #[error("Failed to get upload URL: {0}")]
    Request(String),

    #[error("Failed to get upload URL: invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid issuer configuration: {0}")]
    Config(String),
}

/// Obtains an upload URL for a file
#[async_trait]
pub trait UrlIssuer: Send + Sync {
    async fn issue(&self, request: &IssueRequest) -> Result<IssuedUrl, IssuerError>;
}

/// [`UrlIssuer`] calling `POST /api/get-presigned-url` over HTTP
#[derive(Clone)]
pub struct HttpUrlIssuer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpUrlIssuer {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:3000`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, IssuerError> {
        let base = base_url.trim_end_matches('/');
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(IssuerError::Config(format!(
                "issuer URL must be http(s): {}",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IssuerError::Config(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}{}", base, PRESIGN_PATH),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl UrlIssuer for HttpUrlIssuer {
    #[tracing::instrument(name = "issuer.issue", skip(self, request), fields(file.name = ?request.file_name), err)]
    async fn issue(&self, request: &IssueRequest) -> Result<IssuedUrl, IssuerError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| IssuerError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            // Fall back to the status line when the body is not the JSON error shape
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status.to_string(),
            };
            return Err(IssuerError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<IssuedUrl>()
            .await
            .map_err(|e| IssuerError::InvalidResponse(e.to_string()))
    }
}
