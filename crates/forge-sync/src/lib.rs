//! # forge-sync: Export/Import Orchestration for Forge Profile Sync
//!
//! This crate turns the pure engine in `forge-core` into the two user
//! workflows: export (persist, serialize, upload, record) and import
//! (download, parse, filter, apply in chunks, finalize).
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Orchestrator Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                SyncOrchestrator (Main Orchestrator)              │  │
//! │  │                                                                  │  │
//! │  │  Owns the ComponentSet, the BatchApplier and the staging file   │  │
//! │  │  Emits one terminal SyncEvent per export/import                  │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ export         │  │ staging        │  │ import                 │    │
//! │  │                │  │                │  │                        │    │
//! │  │ promote, force │  │ <uuid>.txt in  │  │ parse, filter, create  │    │
//! │  │ save, fill,    │  │ the temp dir   │  │ durable layers         │    │
//! │  │ serialize      │  │                │  │                        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  COLLABORATORS (uplink):                                               │
//! │  • EditBarrier       - flush edits still being typed                   │
//! │  • ProfileCatalog    - credentials, cloud list, metadata record        │
//! │  • ProfileUploader   - staging file to public URL, abortable           │
//! │  • ProfileDownloader - URL to text                                     │
//! │                                                                         │
//! │  EVENTS (to the presentation layer):                                   │
//! │  • ExportSucceeded / ExportFailed                                      │
//! │  • ImportStarted / ImportProgress / ImportCompleted / ImportFailed     │
//! │  • Refreshed                                                           │
//! │  • CloudListFetched / CloudListFetchFailed                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`orchestrator`] - `SyncOrchestrator` and its builder
//! - [`export`] - Merge passes and serialization before upload
//! - [`import`] - Parse/filter planning and durable layer creation
//! - [`staging`] - Staging file handling
//! - [`uplink`] - Collaborator traits and the local directory store
//! - [`protocol`] - Cloud catalog payloads
//! - [`events`] - `SyncEvent` and emitters
//! - [`config`] - Sync configuration (TOML + env)
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use forge_sync::{LocalDirectoryStore, SyncConfig, SyncOrchestrator};
//!
//! let config = SyncConfig::load_or_default(None);
//! let store = Arc::new(LocalDirectoryStore::new("/srv/profiles"));
//!
//! let mut orchestrator = SyncOrchestrator::builder(config, component_set)
//!     .with_catalog(store.clone())
//!     .with_uploader(store.clone())
//!     .with_downloader(store)
//!     .build()?;
//!
//! let receipt = orchestrator.export_profile("PLA Fine", "0.1mm layers").await?;
//! orchestrator.import_from_url(&receipt.url, "PLA Fine copy").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod events;
pub mod export;
pub mod import;
pub mod orchestrator;
pub mod protocol;
pub mod staging;
pub mod uplink;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{CloudSettings, EngineSettings, StagingSettings, SyncConfig, TimingSettings};
pub use error::{SyncError, SyncResult};
pub use events::{ChannelEmitter, NoOpEmitter, ProfileEventEmitter, SyncEvent};
pub use export::ExportReport;
pub use import::{ImportPlan, ImportTarget};
pub use orchestrator::{
    ExportReceipt, ImportSummary, SyncOrchestrator, SyncOrchestratorBuilder, UploadAbortHandle,
};
pub use protocol::{CloudProfile, ProfileRecord, UploadCredentials};
pub use staging::StagingArea;
pub use uplink::{
    EditBarrier, LocalDirectoryStore, NoOpBarrier, ProfileCatalog, ProfileDownloader, ProfileUploader,
};
