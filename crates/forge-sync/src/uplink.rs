//! # Collaborator Seams
//!
//! The orchestrator never talks to the network or the host UI directly.
//! Everything outside the engine is reached through these traits:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncOrchestrator                                 │
//! │                                                                         │
//! │   EditBarrier ──────── flush pending UI edits before export            │
//! │   ProfileCatalog ───── upload credentials, profile list, record        │
//! │   ProfileUploader ──── staging file ──► public URL (abortable)         │
//! │   ProfileDownloader ── URL ──► text content                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Catalog methods return the raw JSON body; decoding and filtering live in
//! [`crate::protocol`]. [`LocalDirectoryStore`] implements every seam over
//! a plain directory and backs the CLI and the integration tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};
use crate::protocol::{CatalogDevice, CloudProfile, ProfileRecord, SliceTypeEntry, UploadCredentials};

// =============================================================================
// Traits
// =============================================================================

/// Commits any value the user is still typing before an export reads the
/// layers.
#[async_trait]
pub trait EditBarrier: Send + Sync {
    async fn flush_pending_edits(&self) -> SyncResult<()>;
}

/// Catalog endpoints. Each call returns the response body.
#[async_trait]
pub trait ProfileCatalog: Send + Sync {
    /// Envelope wrapping [`UploadCredentials`].
    async fn upload_credentials(&self) -> SyncResult<String>;

    /// Envelope wrapping `Vec<CatalogDevice>`.
    async fn fetch_catalog(&self) -> SyncResult<String>;

    /// Envelope acknowledging the record.
    async fn record_profile(&self, record: &ProfileRecord) -> SyncResult<String>;
}

/// Moves a staging file into object storage.
#[async_trait]
pub trait ProfileUploader: Send + Sync {
    /// Returns the public URL of the uploaded file.
    async fn upload(&self, path: &Path, credentials: &UploadCredentials) -> SyncResult<String>;

    /// Aborts the in-flight upload, which then fails with
    /// [`SyncError::UploadFailed`].
    fn abort(&self);
}

/// Fetches a profile file.
#[async_trait]
pub trait ProfileDownloader: Send + Sync {
    async fn download(&self, url: &str) -> SyncResult<String>;
}

/// Barrier for hosts with nothing to flush.
pub struct NoOpBarrier;

#[async_trait]
impl EditBarrier for NoOpBarrier {
    async fn flush_pending_edits(&self) -> SyncResult<()> {
        Ok(())
    }
}

// =============================================================================
// Local Directory Store
// =============================================================================

/// Catalog, uploader and downloader backed by a directory.
///
/// ```text
/// <root>/
/// ├── catalog.json        Vec<CatalogDevice>
/// └── profiles/<file>     uploaded staging files
/// ```
pub struct LocalDirectoryStore {
    root: PathBuf,
    aborted: AtomicBool,
    catalog_lock: Mutex<()>,
}

impl LocalDirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalDirectoryStore {
            root: root.into(),
            aborted: AtomicBool::new(false),
            catalog_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn profiles_dir(&self) -> PathBuf {
        self.root.join("profiles")
    }

    fn catalog_path(&self) -> PathBuf {
        self.root.join("catalog.json")
    }

    async fn load_catalog(&self) -> SyncResult<Vec<CatalogDevice>> {
        match tokio::fs::read_to_string(self.catalog_path()).await {
            Ok(body) => Ok(serde_json::from_str(&body)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(SyncError::CatalogFailed(e.to_string())),
        }
    }

    async fn store_catalog(&self, devices: &[CatalogDevice]) -> SyncResult<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| SyncError::CatalogFailed(e.to_string()))?;
        let body = serde_json::to_string_pretty(devices)?;
        tokio::fs::write(self.catalog_path(), body)
            .await
            .map_err(|e| SyncError::CatalogFailed(e.to_string()))
    }

    /// Copies a staged file into `profiles/`, returning its new path.
    async fn store_file(&self, path: &Path) -> SyncResult<PathBuf> {
        let file_name = path
            .file_name()
            .ok_or_else(|| SyncError::UploadFailed(format!("not a file: {}", path.display())))?;
        let dir = self.profiles_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SyncError::UploadFailed(e.to_string()))?;

        let target = dir.join(file_name);
        tokio::fs::copy(path, &target)
            .await
            .map_err(|e| SyncError::UploadFailed(e.to_string()))?;
        Ok(target)
    }
}

fn directory_url(path: &Path) -> SyncResult<Url> {
    Url::from_directory_path(path).map_err(|_| SyncError::InvalidUrl(format!("not an absolute path: {}", path.display())))
}

fn success(data: serde_json::Value) -> String {
    json!({ "code": 0, "msg": "success", "data": data }).to_string()
}

#[async_trait]
impl ProfileCatalog for LocalDirectoryStore {
    async fn upload_credentials(&self) -> SyncResult<String> {
        let host = directory_url(&self.root)?;
        let cdn = directory_url(&self.profiles_dir())?;
        Ok(success(json!({
            "host": host.as_str(),
            "cdn": cdn.as_str(),
            "key": "profiles/",
            "policy": "",
            "signature": "",
            "accessid": "local",
        })))
    }

    async fn fetch_catalog(&self) -> SyncResult<String> {
        let devices = self.load_catalog().await?;
        Ok(success(serde_json::to_value(devices)?))
    }

    async fn record_profile(&self, record: &ProfileRecord) -> SyncResult<String> {
        let _guard = self.catalog_lock.lock().await;
        let mut devices = self.load_catalog().await?;

        let device = match devices.iter().position(|d| d.device_type == record.device_type) {
            Some(i) => &mut devices[i],
            None => {
                devices.push(CatalogDevice {
                    device_type: record.device_type.clone(),
                    slice_types: Vec::new(),
                });
                let last = devices.len() - 1;
                &mut devices[last]
            }
        };
        let family = match device.slice_types.iter().position(|s| s.slice_type == record.slice_type) {
            Some(i) => &mut device.slice_types[i],
            None => {
                device.slice_types.push(SliceTypeEntry {
                    slice_type: record.slice_type.clone(),
                    slice_confs: Vec::new(),
                });
                let last = device.slice_types.len() - 1;
                &mut device.slice_types[last]
            }
        };

        let id = uuid::Uuid::new_v4().to_string();
        family.slice_confs.push(CloudProfile {
            id: id.clone(),
            name: record.name.clone(),
            config_file_url: record.config_file_url.clone(),
            config_file_name: record.config_file_name.clone(),
            info: record.info.clone(),
            system_config: 0,
        });

        self.store_catalog(&devices).await?;
        info!(name = %record.name, id = %id, "Profile recorded in local catalog");
        Ok(success(json!({ "id": id })))
    }
}

#[async_trait]
impl ProfileUploader for LocalDirectoryStore {
    async fn upload(&self, path: &Path, credentials: &UploadCredentials) -> SyncResult<String> {
        let stored = self.store_file(path).await;

        // An abort requested before or during the copy fails this upload.
        if self.aborted.swap(false, Ordering::SeqCst) {
            if let Ok(target) = &stored {
                if let Err(e) = tokio::fs::remove_file(target).await {
                    warn!(path = %target.display(), error = %e, "Failed to discard aborted upload");
                }
            }
            return Err(SyncError::UploadFailed("upload aborted".into()));
        }
        let target = stored?;

        let base = Url::parse(&credentials.cdn).or_else(|_| directory_url(&self.profiles_dir()))?;
        let file_name = target.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let url = base.join(&file_name)?;
        debug!(url = %url, "Profile file stored");
        Ok(url.to_string())
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProfileDownloader for LocalDirectoryStore {
    async fn download(&self, url: &str) -> SyncResult<String> {
        let parsed = Url::parse(url)?;
        if parsed.scheme() != "file" {
            return Err(SyncError::DownloadFailed(format!("unsupported scheme: {}", parsed.scheme())));
        }
        let path = parsed
            .to_file_path()
            .map_err(|_| SyncError::DownloadFailed(format!("not a local file: {}", url)))?;

        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| SyncError::DownloadFailed(format!("{}: {}", path.display(), e)))
    }
}
