//! # Sync Events
//!
//! Notifications published by the orchestrator. Payloads are plain data;
//! no engine state leaks through them.
//!
//! ```text
//! export_profile ──► ExportSucceeded { caveat } | ExportFailed
//! import_*       ──► ImportStarted ─► ImportProgress* ─► ImportCompleted ─► Refreshed
//!                                                   └──► ImportFailed
//! fetch_cloud_profiles ──► CloudListFetched | CloudListFetchFailed
//! ```
//!
//! Every export or import ends in exactly one terminal event naming the
//! configuration.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::CloudProfile;

/// A notification for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SyncEvent {
    /// File uploaded. `caveat` is set when the catalog record failed.
    ExportSucceeded {
        name: String,
        url: String,
        caveat: Option<String>,
    },
    ExportFailed {
        name: String,
        message: String,
    },
    ImportStarted {
        name: String,
        total: usize,
    },
    ImportProgress {
        name: String,
        processed: usize,
        total: usize,
    },
    ImportCompleted {
        name: String,
        /// Name of the durable layer the settings landed in.
        profile_name: String,
        applied: usize,
        total: usize,
    },
    ImportFailed {
        name: String,
        message: String,
    },
    /// Final refresh after an import; observers re-read resolved values.
    Refreshed {
        name: String,
    },
    CloudListFetched(Vec<CloudProfile>),
    CloudListFetchFailed(String),
}

impl SyncEvent {
    /// True for events that end an export, import or list fetch.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncEvent::ExportSucceeded { .. }
                | SyncEvent::ExportFailed { .. }
                | SyncEvent::ImportCompleted { .. }
                | SyncEvent::ImportFailed { .. }
                | SyncEvent::CloudListFetched(_)
                | SyncEvent::CloudListFetchFailed(_)
        )
    }
}

// =============================================================================
// Emitters
// =============================================================================

/// Receives orchestrator notifications.
pub trait ProfileEventEmitter: Send + Sync {
    fn emit(&self, event: SyncEvent);
}

/// Discards every event.
pub struct NoOpEmitter;

impl ProfileEventEmitter for NoOpEmitter {
    fn emit(&self, _event: SyncEvent) {}
}

/// Forwards events into an unbounded tokio channel.
#[derive(Clone)]
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<SyncEvent>,
}

impl ChannelEmitter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelEmitter { tx }, rx)
    }
}

impl ProfileEventEmitter for ChannelEmitter {
    fn emit(&self, event: SyncEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }
}
