//! Upload lifecycle controller
//!
//! Tracks a collection of files and drives each one through
//! `pending -> uploading -> completed`, with `paused` and `error` as the
//! detours. Every transfer attempt (initial start, resume or retry) asks the
//! issuance server for a fresh upload URL and then streams the whole file
//! with a PUT.
//!
//! Resuming does **not** continue from the last byte: the pre-signed PUT has
//! no range support, so a resumed transfer restarts from zero. Only the
//! displayed progress is kept until the new attempt overtakes it.
//!
//! Each attempt is a Tokio task identified by an attempt number. Pausing or
//! canceling aborts the task and forgets its number, so progress or
//! completion reported late by an aborted attempt is discarded.
//!
//! # Example
//!
//! ```no_run
//! use tsubame_uploadr::client::{SelectedFile, UploadController};
//! use tsubame_uploadr::config::ClientConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let controller = UploadController::from_config(&ClientConfig::default())?;
//! let file = SelectedFile::from_path("report.pdf", None).await?;
//! controller.add_files([file]);
//! controller.wait_idle().await;
//!
//! for record in controller.snapshot() {
//!     println!("{} {} {}%", record.name, record.status, record.progress);
//! }
//! # Ok(())
//! # }
//! ```

pub mod issuer;
pub mod record;
pub mod transfer;

pub use issuer::{HttpUrlIssuer, IssuerError, UrlIssuer};
pub use record::{RecordUpdate, SelectedFile, UploadEvent, UploadId, UploadRecord, UploadStatus};
pub use transfer::{FileSource, HttpTransport, ProgressFn, TransferError, Transport};

use crate::config::ClientConfig;
use crate::issuance::{IssueRequest, IssuedUrl};
use crate::metrics;
use crate::validation::{self, Rejection};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

/// Controller construction errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Upload controller must be created inside a Tokio runtime")]
    NoRuntime,

    #[error(transparent)]
    Issuer(#[from] IssuerError),

    #[error("Failed to build storage client: {0}")]
    Transport(String),
}

/// Owns the upload records and their in-flight transfers.
///
/// Dropping the controller aborts every active transfer.
pub struct UploadController {
    inner: Arc<Inner>,
}

struct Inner {
    issuer: Arc<dyn UrlIssuer>,
    transport: Arc<dyn Transport>,
    runtime: Handle,
    state: Mutex<ControllerState>,
    events: broadcast::Sender<UploadEvent>,
    idle: Notify,
}

#[derive(Default)]
struct ControllerState {
    records: Vec<Arc<UploadRecord>>,
    active: HashMap<UploadId, TransferHandle>,
    next_attempt: u64,
    banner: Option<String>,
}

/// Abortable handle to one transfer attempt
struct TransferHandle {
    attempt: u64,
    task: JoinHandle<()>,
}

enum Outcome {
    Completed(IssuedUrl),
    Failed(String),
}

impl ControllerState {
    fn find(&self, id: UploadId) -> Option<&Arc<UploadRecord>> {
        self.records.iter().find(|r| r.id == id)
    }

    fn is_current(&self, id: UploadId, attempt: u64) -> bool {
        self.active
            .get(&id)
            .is_some_and(|handle| handle.attempt == attempt)
    }
}

impl UploadController {
    /// Create a controller spawning transfers on the current Tokio runtime
    pub fn new(
        issuer: Arc<dyn UrlIssuer>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ClientError> {
        let runtime = Handle::try_current().map_err(|_| ClientError::NoRuntime)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                issuer,
                transport,
                runtime,
                state: Mutex::new(ControllerState::default()),
                events,
                idle: Notify::new(),
            }),
        })
    }

    /// Create a controller talking HTTP to `config.issuer_url`.
    ///
    /// The request timeout bounds the issuance round trip and connecting to
    /// storage; the PUT body itself may take as long as it needs.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let timeout = Duration::from_secs(config.request_timeout_seconds);
        let issuer = HttpUrlIssuer::new(&config.issuer_url, timeout)?;
        let storage_client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Self::new(
            Arc::new(issuer),
            Arc::new(HttpTransport::new(storage_client)),
        )
    }

    /// Validate and enqueue files, starting an upload for each accepted one.
    ///
    /// Rejected files get no record; the last rejection is shown in the
    /// banner. Returns the ids of the accepted files in order.
    pub fn add_files(&self, files: impl IntoIterator<Item = SelectedFile>) -> Vec<UploadId> {
        let mut accepted = Vec::new();
        {
            let mut state = self.inner.state.lock();
            for file in files {
                if let Err(rejection) =
                    validation::validate(&file.name, &file.content_type, file.size)
                {
                    warn!(file.name = %file.name, reason = %rejection, "Rejected file");
                    state.banner = Some(rejection_banner(&file.name, rejection));
                    continue;
                }

                let record = Arc::new(UploadRecord::pending(file));
                debug!(upload.id = %record.id, file.name = %record.name, "Added upload");
                accepted.push(record.id);
                state.records.push(Arc::clone(&record));
                self.inner.emit(UploadEvent::Updated(record));
            }
        }

        for id in &accepted {
            self.start(*id);
        }
        accepted
    }

    /// Start a pending upload
    pub fn start(&self, id: UploadId) -> bool {
        self.inner.begin(id, UploadStatus::Pending, None)
    }

    /// Restart a paused upload from the first byte, keeping its progress
    pub fn resume(&self, id: UploadId) -> bool {
        self.inner.begin(id, UploadStatus::Paused, None)
    }

    /// Restart a failed upload with progress reset to 0 and the error cleared
    pub fn retry(&self, id: UploadId) -> bool {
        self.inner.begin(id, UploadStatus::Error, Some(0))
    }

    /// Abort an uploading record's transfer and mark it paused.
    ///
    /// Returns `false` (and changes nothing) unless the record is uploading
    /// with an active transfer.
    pub fn pause(&self, id: UploadId) -> bool {
        let mut state = self.inner.state.lock();
        if state.find(id).map(|r| r.status) != Some(UploadStatus::Uploading) {
            return false;
        }
        let Some(handle) = state.active.remove(&id) else {
            return false;
        };
        handle.task.abort();
        self.inner
            .apply(&mut state, id, RecordUpdate::status(UploadStatus::Paused));
        drop(state);

        metrics::record_transfer_stopped("paused");
        info!(upload.id = %id, "Upload paused");
        self.inner.idle.notify_waiters();
        true
    }

    /// Abort any transfer for `id` and remove the record, whatever its status
    pub fn cancel(&self, id: UploadId) -> bool {
        let mut state = self.inner.state.lock();
        let had_transfer = match state.active.remove(&id) {
            Some(handle) => {
                handle.task.abort();
                true
            }
            None => false,
        };

        let before = state.records.len();
        state.records.retain(|r| r.id != id);
        let removed = state.records.len() != before;
        drop(state);

        if had_transfer {
            metrics::record_transfer_stopped("canceled");
            self.inner.idle.notify_waiters();
        }
        if removed {
            info!(upload.id = %id, "Upload canceled");
            self.inner.emit(UploadEvent::Removed(id));
        }
        removed
    }

    /// Apply a partial change to a record.
    ///
    /// Completed and unknown records are left alone and `false` is returned.
    pub fn update(&self, id: UploadId, changes: RecordUpdate) -> bool {
        let mut state = self.inner.state.lock();
        self.inner.apply(&mut state, id, changes).is_some()
    }

    pub fn get(&self, id: UploadId) -> Option<Arc<UploadRecord>> {
        self.inner.state.lock().find(id).cloned()
    }

    /// All records in the order they were added
    pub fn snapshot(&self) -> Vec<Arc<UploadRecord>> {
        self.inner.state.lock().records.clone()
    }

    /// Whether `id` has a transfer attempt in flight
    pub fn is_active(&self, id: UploadId) -> bool {
        self.inner.state.lock().active.contains_key(&id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.inner.events.subscribe()
    }

    /// Message describing the most recent rejected file, if not dismissed
    pub fn banner(&self) -> Option<String> {
        self.inner.state.lock().banner.clone()
    }

    pub fn dismiss_banner(&self) {
        self.inner.state.lock().banner = None;
    }

    /// Wait until no transfer attempt is in flight
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.state.lock().active.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Abort every active transfer; interrupted records become paused
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        let handles: Vec<(UploadId, TransferHandle)> = state.active.drain().collect();
        for (id, handle) in &handles {
            handle.task.abort();
            self.inner
                .apply(&mut state, *id, RecordUpdate::status(UploadStatus::Paused));
        }
        drop(state);

        if !handles.is_empty() {
            info!(aborted = handles.len(), "Aborted active uploads");
            self.inner.idle.notify_waiters();
        }
    }
}

/// Receive the next controller event.
///
/// Events dropped because the receiver fell behind are skipped, not fatal;
/// `None` means the controller is gone.
pub async fn next_event(events: &mut broadcast::Receiver<UploadEvent>) -> Option<UploadEvent> {
    loop {
        match events.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Upload event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

impl Drop for UploadController {
    fn drop(&mut self) {
        for (_, handle) in self.inner.state.lock().active.drain() {
            handle.task.abort();
        }
    }
}

impl Inner {
    fn emit(&self, event: UploadEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Replace the record for `id` with `changes` applied
    fn apply(
        &self,
        state: &mut ControllerState,
        id: UploadId,
        changes: RecordUpdate,
    ) -> Option<Arc<UploadRecord>> {
        let slot = state.records.iter_mut().find(|r| r.id == id)?;
        if slot.status == UploadStatus::Completed {
            debug!(upload.id = %id, "Ignoring update to completed upload");
            return None;
        }

        let next = Arc::new(slot.with(changes));
        *slot = Arc::clone(&next);
        self.emit(UploadEvent::Updated(Arc::clone(&next)));
        Some(next)
    }

    /// Move a record in status `from` to uploading and spawn a new attempt
    fn begin(self: &Arc<Self>, id: UploadId, from: UploadStatus, reset: Option<u8>) -> bool {
        let mut state = self.state.lock();
        if state.find(id).map(|r| r.status) != Some(from) {
            return false;
        }

        let mut changes = RecordUpdate::status(UploadStatus::Uploading);
        changes.progress = reset;
        let Some(record) = self.apply(&mut state, id, changes) else {
            return false;
        };

        if let Some(stale) = state.active.remove(&id) {
            stale.task.abort();
        }
        state.next_attempt += 1;
        let attempt = state.next_attempt;

        // Registered before the lock is released, so the task can never
        // observe itself as stale.
        let task = self
            .runtime
            .spawn(Arc::clone(self).run_attempt(id, attempt, record));
        state.active.insert(id, TransferHandle { attempt, task });

        info!(upload.id = %id, attempt, from = %from, "Upload started");
        true
    }

    async fn run_attempt(self: Arc<Self>, id: UploadId, attempt: u64, record: Arc<UploadRecord>) {
        let request = IssueRequest::new(&record.name, &record.content_type, Some(record.size));
        let issued = match self.issuer.issue(&request).await {
            Ok(issued) => issued,
            Err(e) => {
                self.settle(id, attempt, Outcome::Failed(e.to_string()));
                return;
            }
        };

        let progress_target = Arc::clone(&self);
        let on_progress: ProgressFn = Arc::new(move |loaded, total| {
            progress_target.on_progress(id, attempt, loaded, total)
        });

        let outcome = match self
            .transport
            .put(
                &issued.upload_url,
                &record.content_type,
                &record.source,
                on_progress,
            )
            .await
        {
            Ok(()) => Outcome::Completed(issued),
            Err(e) => Outcome::Failed(e.to_string()),
        };
        self.settle(id, attempt, outcome);
    }

    fn on_progress(&self, id: UploadId, attempt: u64, loaded: u64, total: u64) {
        if total == 0 {
            return;
        }
        let percent = percent(loaded, total);

        let mut state = self.state.lock();
        if !state.is_current(id, attempt) {
            return;
        }
        match state.find(id) {
            Some(record) if record.status == UploadStatus::Uploading && percent > record.progress => {}
            _ => return,
        }
        self.apply(&mut state, id, RecordUpdate::progress(percent));
    }

    /// Record the end of an attempt, unless it has been superseded
    fn settle(&self, id: UploadId, attempt: u64, outcome: Outcome) {
        let mut state = self.state.lock();
        if !state.is_current(id, attempt) {
            debug!(upload.id = %id, attempt, "Dropping result of stale attempt");
            return;
        }
        state.active.remove(&id);

        let completed = match outcome {
            Outcome::Completed(issued) => {
                let changes = RecordUpdate {
                    status: Some(UploadStatus::Completed),
                    progress: Some(100),
                    file_key: Some(issued.file_key.clone()),
                    file_url: Some(issued.file_url.clone()),
                    ..Default::default()
                };
                self.apply(&mut state, id, changes).map(|record| (record, issued))
            }
            Outcome::Failed(message) => {
                warn!(upload.id = %id, error = %message, "Upload failed");
                self.apply(&mut state, id, RecordUpdate::failed(message));
                metrics::record_transfer_stopped("error");
                None
            }
        };
        drop(state);

        if let Some((record, issued)) = completed {
            info!(upload.id = %id, file.key = %issued.file_key, "Upload completed");
            metrics::record_transfer_completed(record.size);
            self.emit(UploadEvent::Completed {
                id,
                file_key: issued.file_key,
                file_url: issued.file_url,
            });
        }
        self.idle.notify_waiters();
    }
}

/// `round(loaded * 100 / total)`, capped at 100
fn percent(loaded: u64, total: u64) -> u8 {
    let total = u128::from(total);
    let scaled = (u128::from(loaded) * 100 + total / 2) / total;
    scaled.min(100) as u8
}

fn rejection_banner(name: &str, rejection: Rejection) -> String {
    match rejection {
        Rejection::SizeExceeded => {
            format!("File \"{}\" is too large. Maximum size is 100MB.", name)
        }
        Rejection::InvalidType => format!("File \"{}\" has an unsupported type.", name),
    }
}
