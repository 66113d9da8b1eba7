//! Upload records and the changes applied to them

use super::transfer::FileSource;
use crate::validation;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Identifier of an upload record, unique for the controller's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadId(Uuid);

impl UploadId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of an upload record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadStatus {
    Pending,
    Uploading,
    Paused,
    Completed,
    Error,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file tracked by the controller.
///
/// Records are immutable values; every change produces a new `Arc`.
#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub id: UploadId,
    pub source: FileSource,
    pub name: String,
    pub size: u64,
    /// MIME type declared for the file, sent as the PUT `Content-Type`
    pub content_type: String,
    /// Percentage 0-100
    pub progress: u8,
    pub status: UploadStatus,
    /// Set iff `status == Error`
    pub error: Option<String>,
    /// Storage key, set once completed
    pub file_key: Option<String>,
    /// Public object URL, set once completed
    pub file_url: Option<String>,
}

impl UploadRecord {
    pub(crate) fn pending(file: SelectedFile) -> Self {
        Self {
            id: UploadId::new(),
            source: file.source,
            name: file.name,
            size: file.size,
            content_type: file.content_type,
            progress: 0,
            status: UploadStatus::Pending,
            error: None,
            file_key: None,
            file_url: None,
        }
    }

    /// Apply `changes` to a copy of this record.
    ///
    /// Keeps `error` present iff the resulting status is `Error`.
    pub(crate) fn with(&self, changes: RecordUpdate) -> Self {
        let mut next = self.clone();
        if let Some(status) = changes.status {
            next.status = status;
        }
        if let Some(progress) = changes.progress {
            next.progress = progress.min(100);
        }
        if let Some(error) = changes.error {
            next.error = Some(error);
        }
        if let Some(file_key) = changes.file_key {
            next.file_key = Some(file_key);
        }
        if let Some(file_url) = changes.file_url {
            next.file_url = Some(file_url);
        }

        if next.status == UploadStatus::Error {
            if next.error.is_none() {
                next.error = Some("Upload failed".to_string());
            }
        } else {
            next.error = None;
        }
        next
    }
}

/// Partial change to an [`UploadRecord`]; unset fields are left alone
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub status: Option<UploadStatus>,
    pub progress: Option<u8>,
    pub error: Option<String>,
    pub file_key: Option<String>,
    pub file_url: Option<String>,
}

impl RecordUpdate {
    pub fn status(status: UploadStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(UploadStatus::Error),
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Notifications published by the controller
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// A record changed; carries the new value
    Updated(Arc<UploadRecord>),
    /// A record was canceled and removed
    Removed(UploadId),
    /// A transfer finished successfully
    Completed {
        id: UploadId,
        file_key: String,
        file_url: String,
    },
}

/// A file offered to the controller
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub name: String,
    pub content_type: String,
    pub size: u64,
    pub source: FileSource,
}

impl SelectedFile {
    pub fn from_bytes(
        name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: bytes::Bytes,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            size: bytes.len() as u64,
            source: FileSource::Bytes(bytes),
        }
    }

    /// Describe a file on disk.
    ///
    /// Without an explicit `content_type` the type is inferred from the
    /// extension, falling back to `application/octet-stream` (which the
    /// validator rejects).
    pub async fn from_path(
        path: impl AsRef<Path>,
        content_type: Option<&str>,
    ) -> std::io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let content_type = content_type
            .or_else(|| validation::content_type_for(&name))
            .unwrap_or("application/octet-stream")
            .to_string();

        Ok(Self {
            name,
            content_type,
            size: metadata.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }
}
