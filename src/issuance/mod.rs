//! Upload URL issuance
//!
//! Validates an upload request, derives a unique storage key and asks the
//! [`Presigner`] for a PUT URL scoped to that key and content type. Nothing
//! is written to the bucket; the URL only authorizes a future PUT.
//!
//! # Example
//!
//! ```no_run
//! use tsubame_uploadr::config::StorageConfig;
//! use tsubame_uploadr::issuance::{IssuanceService, IssueRequest};
//! use tsubame_uploadr::s3::AwsPresigner;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let presigner = AwsPresigner::new(&StorageConfig::default());
//! let service = IssuanceService::new(Arc::new(presigner));
//!
//! let issued = service
//!     .issue(&IssueRequest::new("report.pdf", "application/pdf", Some(50 * 1024 * 1024)))
//!     .await?;
//! println!("{} -> {}", issued.file_key, issued.upload_url);
//! # Ok(())
//! # }
//! ```

use crate::metrics;
use crate::s3::{generate_key, Presigner};
use crate::validation::{self, Rejection};
use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Lifetime of an issued upload URL
pub const UPLOAD_URL_EXPIRY_SECS: u64 = 300;

/// Issuance errors
///
/// `Display` carries internal detail for logs; clients only ever see
/// [`IssueError::public_message`].
#[derive(Error, Debug)]
pub enum IssueError {
    #[error("Missing required parameters")]
    MissingParameter,

    #[error("File exceeds maximum size (100MB)")]
    SizeExceeded,

    #[error("Invalid file type or extension")]
    InvalidType,

    #[error("Failed to generate upload URL: {0}")]
    IssuanceFailed(String),
}

impl IssueError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingParameter | Self::SizeExceeded | Self::InvalidType => {
                StatusCode::BAD_REQUEST
            }
            Self::IssuanceFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to clients
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::MissingParameter => "Missing required parameters",
            Self::SizeExceeded => "File exceeds maximum size (100MB)",
            Self::InvalidType => "Invalid file type or extension",
            Self::IssuanceFailed(_) => "Failed to generate upload URL",
        }
    }

    /// Short label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::MissingParameter => "missing_parameter",
            Self::SizeExceeded => "size_exceeded",
            Self::InvalidType => "invalid_type",
            Self::IssuanceFailed(_) => "issuance_failed",
        }
    }
}

impl From<Rejection> for IssueError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::SizeExceeded => Self::SizeExceeded,
            Rejection::InvalidType => Self::InvalidType,
        }
    }
}

/// Body of `POST /api/get-presigned-url`
///
/// `fileSize` is advisory: numbers are truncated, numeric strings are read
/// up to the first non-digit, and anything that is not a positive size
/// (negative, non-numeric, `null`) skips the size check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRequest {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_file_size",
        skip_serializing_if = "Option::is_none"
    )]
    pub file_size: Option<u64>,
}

fn deserialize_file_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 1.0)
                .map(|f| f.min(u64::MAX as f64) as u64)
        }),
        Some(serde_json::Value::String(s)) => leading_size(&s),
        _ => None,
    })
}

/// Leading decimal digits of `s`; saturates rather than overflowing
fn leading_size(s: &str) -> Option<u64> {
    let trimmed = s.trim_start();
    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let digits: &str = &unsigned[..unsigned
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(unsigned.len())];
    if digits.is_empty() {
        return None;
    }
    Some(digits.parse().unwrap_or(u64::MAX))
}

impl IssueRequest {
    pub fn new(file_name: &str, file_type: &str, file_size: Option<u64>) -> Self {
        Self {
            file_name: Some(file_name.to_string()),
            file_type: Some(file_type.to_string()),
            file_size,
        }
    }
}

/// Successful issuance response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedUrl {
    pub upload_url: String,
    pub file_key: String,
    pub file_url: String,
    pub expires_in: u64,
}

/// Error response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Stateless upload URL issuer
#[derive(Clone)]
pub struct IssuanceService {
    presigner: Arc<dyn Presigner>,
}

impl IssuanceService {
    pub fn new(presigner: Arc<dyn Presigner>) -> Self {
        Self { presigner }
    }

    /// Validate the request and mint an upload URL.
    ///
    /// Checks run in order: required parameters, size bound, type/extension
    /// whitelist. Signing failures are logged with detail and reported as
    /// [`IssueError::IssuanceFailed`].
    #[tracing::instrument(
        name = "issuance.issue",
        skip(self, request),
        fields(
            file.name = ?request.file_name,
            file.type = ?request.file_type,
            file.size = ?request.file_size,
            s3.key = tracing::field::Empty
        )
    )]
    pub async fn issue(&self, request: &IssueRequest) -> Result<IssuedUrl, IssueError> {
        let start_time = Instant::now();
        let result = self.try_issue(request).await;
        let duration = start_time.elapsed();

        match &result {
            Ok(issued) => {
                metrics::record_presign("issued", duration.as_secs_f64());
                tracing::Span::current().record("s3.key", issued.file_key.as_str());
                tracing::info!(
                    file_key = %issued.file_key,
                    duration_ms = duration.as_millis(),
                    "Issued upload URL"
                );
            }
            Err(e @ IssueError::IssuanceFailed(_)) => {
                metrics::record_presign(e.label(), duration.as_secs_f64());
                tracing::error!(error = %e, "Error generating pre-signed URL");
            }
            Err(e) => {
                metrics::record_presign(e.label(), duration.as_secs_f64());
                tracing::warn!(error = %e, "Rejected upload URL request");
            }
        }

        result
    }

    async fn try_issue(&self, request: &IssueRequest) -> Result<IssuedUrl, IssueError> {
        let (file_name, file_type) = match (
            non_empty(request.file_name.as_deref()),
            non_empty(request.file_type.as_deref()),
        ) {
            (Some(name), Some(kind)) => (name, kind),
            _ => return Err(IssueError::MissingParameter),
        };

        match request.file_size {
            Some(size) => validation::validate(file_name, file_type, size)?,
            None if !validation::validate_type(file_name, file_type) => {
                return Err(IssueError::InvalidType)
            }
            None => {}
        }

        let file_key = generate_key(file_name);
        let upload_url = self
            .presigner
            .presign_put(
                &file_key,
                file_type,
                Duration::from_secs(UPLOAD_URL_EXPIRY_SECS),
            )
            .await
            .map_err(|e| IssueError::IssuanceFailed(e.to_string()))?;

        Ok(IssuedUrl {
            upload_url,
            file_url: self.presigner.public_url(&file_key),
            file_key,
            expires_in: UPLOAD_URL_EXPIRY_SECS,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
