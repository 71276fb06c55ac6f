//! Event types and the broadcast event bus
//!
//! Background jobs publish [`RomhoardEvent`]s on the [`EventBus`]; the SSE
//! endpoint forwards them to connected clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// RomHoard event types
///
/// Serialized with a `type` tag so SSE clients can dispatch on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RomhoardEvent {
    /// A scan job moved from pending to running
    ScanStarted {
        job_id: Uuid,
        path: String,
        timestamp: DateTime<Utc>,
    },

    /// Periodic scan progress (first file, then every 10 files)
    ScanProgress {
        job_id: Uuid,
        files_processed: u64,
        roms_found: u64,
        images_found: u64,
        current_directory: String,
        timestamp: DateTime<Utc>,
    },

    ScanCompleted {
        job_id: Uuid,
        added: u64,
        skipped: u64,
        deleted_roms: u64,
        images_added: u64,
        timestamp: DateTime<Utc>,
    },

    ScanFailed {
        job_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },

    ScanCancelled {
        job_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Multi-game bundle progress
    DownloadProgress {
        job_id: Uuid,
        games_processed: u64,
        games_total: u64,
        current_game: String,
        bytes_written: u64,
        timestamp: DateTime<Utc>,
    },

    DownloadCompleted {
        job_id: Uuid,
        file_name: String,
        file_size: u64,
        games_included: u64,
        timestamp: DateTime<Utc>,
    },

    DownloadFailed {
        job_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// An upload job filed another file
    UploadProgress {
        job_id: Uuid,
        files_processed: u64,
        files_total: u64,
        current_file: String,
        timestamp: DateTime<Utc>,
    },

    /// Processing ended; `unidentified` files still need a system
    UploadProcessed {
        job_id: Uuid,
        games_added: u64,
        games_skipped: u64,
        unidentified: u64,
        timestamp: DateTime<Utc>,
    },

    UploadFailed {
        job_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A hash lookup renamed a game (or merged it into an existing one)
    GameIdentified {
        game_id: i64,
        old_name: String,
        new_name: String,
        source: String,
        timestamp: DateTime<Utc>,
    },

    GamesMerged {
        target_id: i64,
        merged_ids: Vec<i64>,
        timestamp: DateTime<Utc>,
    },
}

impl RomhoardEvent {
    /// Get event type as string for SSE `event:` lines
    pub fn event_type(&self) -> &'static str {
        match self {
            RomhoardEvent::ScanStarted { .. } => "ScanStarted",
            RomhoardEvent::ScanProgress { .. } => "ScanProgress",
            RomhoardEvent::ScanCompleted { .. } => "ScanCompleted",
            RomhoardEvent::ScanFailed { .. } => "ScanFailed",
            RomhoardEvent::ScanCancelled { .. } => "ScanCancelled",
            RomhoardEvent::DownloadProgress { .. } => "DownloadProgress",
            RomhoardEvent::DownloadCompleted { .. } => "DownloadCompleted",
            RomhoardEvent::DownloadFailed { .. } => "DownloadFailed",
            RomhoardEvent::UploadProgress { .. } => "UploadProgress",
            RomhoardEvent::UploadProcessed { .. } => "UploadProcessed",
            RomhoardEvent::UploadFailed { .. } => "UploadFailed",
            RomhoardEvent::GameIdentified { .. } => "GameIdentified",
            RomhoardEvent::GamesMerged { .. } => "GamesMerged",
        }
    }
}

/// Central event distribution bus
///
/// Wraps `tokio::sync::broadcast`: publishing never blocks, slow
/// subscribers observe `Lagged` and skip ahead.
///
/// # Examples
///
/// ```
/// use romhoard_common::events::{EventBus, RomhoardEvent};
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
///
/// bus.emit_lossy(RomhoardEvent::ScanCancelled {
///     job_id: uuid::Uuid::new_v4(),
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert_eq!(rx.try_recv().unwrap().event_type(), "ScanCancelled");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RomhoardEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<RomhoardEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: RomhoardEvent,
    ) -> Result<usize, broadcast::error::SendError<RomhoardEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: RomhoardEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
