//! # Sync Orchestrator
//!
//! Sequences the engine into the export and import flows and owns the
//! staging file of each one.
//!
//! ## Export
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  export_profile(name, info)                                             │
//! │                                                                         │
//! │  1. Preconditions      supported machine, valid name, durable layer     │
//! │  2. EditBarrier        flush pending edits, wait edit_barrier_delay     │
//! │  3. prepare_export     promote ─► forced save ─► fill ─► serialize      │
//! │  4. Staging            write <uuid>.txt                                 │
//! │  5. Catalog            upload credentials                               │
//! │  6. Uploader           staging file ─► URL    (staging file removed)    │
//! │  7. Catalog            record metadata; failure becomes a caveat        │
//! │                                                                         │
//! │  ──► ExportSucceeded { caveat } | ExportFailed                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Import
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  import_from_url(url, name)                                             │
//! │     download ─► staging file ─► wait import_start_delay ─► read back    │
//! │                                          │                              │
//! │  import_content(content, name) ──────────┤                              │
//! │                                          ▼                              │
//! │  begin_import    plan (parse, filter) ─► durable layers ─► start batch  │
//! │  step_import     one chunk per call         ──► ImportProgress          │
//! │  finish_import   finalize, remove staging   ──► ImportCompleted         │
//! │  run_import      steps with a yield between, finish, wait, Refreshed    │
//! │  abort_import    drop the batch (applied chunks stay) ──► ImportFailed  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every export or import ends with exactly one terminal event naming the
//! configuration. Only one import may be in flight per orchestrator.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use forge_core::diagnostics::log_monitored_keys;
use forge_core::validation::{validate_profile_name, validate_url};
use forge_core::{
    BatchApplier, BatchPhase, BatchReport, ChunkOutcome, ComponentId, ComponentSet, CoreError, MergeEngine,
    ObjectOverride,
};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{NoOpEmitter, ProfileEventEmitter, SyncEvent};
use crate::export::{prepare_export, ExportReport};
use crate::import::{plan_import, prepare_target};
use crate::protocol::{self, CatalogDevice, CloudProfile, ProfileRecord, UploadCredentials};
use crate::staging::StagingArea;
use crate::uplink::{EditBarrier, NoOpBarrier, ProfileCatalog, ProfileDownloader, ProfileUploader};

// =============================================================================
// Outcomes
// =============================================================================

/// Result of a successful export.
#[derive(Debug, Clone, Serialize)]
pub struct ExportReceipt {
    pub name: String,
    /// Public URL of the uploaded file.
    pub url: String,
    /// Set when the file persisted but its catalog record did not.
    pub caveat: Option<String>,
    pub exported_at: DateTime<Utc>,
    pub report: ExportReport,
}

/// Result of a completed import.
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub name: String,
    /// Global durable layer the settings landed in.
    pub profile_name: String,
    pub report: BatchReport,
    /// `machine_*` keys dropped before the batch.
    pub reserved: usize,
    /// Keys unknown to the machine, dropped before the batch.
    pub unknown: usize,
    /// Components that received a new durable layer.
    pub created_layers: Vec<ComponentId>,
}

/// Import currently owned by the orchestrator.
#[derive(Debug)]
struct ActiveImport {
    name: String,
    profile_name: String,
    staging: Option<PathBuf>,
    reserved: usize,
    unknown: usize,
    created_layers: Vec<ComponentId>,
}

/// Aborts the in-flight upload from outside the orchestrator.
#[derive(Clone)]
pub struct UploadAbortHandle {
    uploader: Arc<dyn ProfileUploader>,
}

impl UploadAbortHandle {
    pub fn abort(&self) {
        warn!("Upload abort requested");
        self.uploader.abort();
    }
}

// =============================================================================
// Sync Orchestrator
// =============================================================================

/// Runs exports and imports against one machine's component set.
pub struct SyncOrchestrator {
    config: SyncConfig,
    set: ComponentSet,
    merge: MergeEngine,
    applier: BatchApplier,
    staging: StagingArea,
    objects: Vec<ObjectOverride>,
    active: Option<ActiveImport>,
    barrier: Arc<dyn EditBarrier>,
    catalog: Arc<dyn ProfileCatalog>,
    uploader: Arc<dyn ProfileUploader>,
    downloader: Arc<dyn ProfileDownloader>,
    emitter: Arc<dyn ProfileEventEmitter>,
}

impl SyncOrchestrator {
    pub fn builder(config: SyncConfig, set: ComponentSet) -> SyncOrchestratorBuilder {
        SyncOrchestratorBuilder::new(config, set)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn components(&self) -> &ComponentSet {
        &self.set
    }

    /// Mutable access for the host. Not allowed while an import is running.
    pub fn components_mut(&mut self) -> SyncResult<&mut ComponentSet> {
        self.ensure_no_import()?;
        Ok(&mut self.set)
    }

    pub fn into_components(self) -> ComponentSet {
        self.set
    }

    /// Per-object overrides included in the next export.
    pub fn set_object_overrides(&mut self, objects: Vec<ObjectOverride>) {
        self.objects = objects;
    }

    pub fn import_phase(&self) -> BatchPhase {
        self.applier.phase()
    }

    /// True when the global component is the machine definition the
    /// workflow supports.
    pub fn is_supported_machine(&self) -> bool {
        self.set.global().schema().definition_id() == self.config.cloud.target_definition
    }

    fn ensure_supported_machine(&self) -> SyncResult<()> {
        if self.is_supported_machine() {
            Ok(())
        } else {
            Err(SyncError::NoActiveMachine(self.set.global().schema().definition_id().to_string()))
        }
    }

    fn ensure_no_import(&self) -> SyncResult<()> {
        match self.applier.phase() {
            BatchPhase::Idle => Ok(()),
            BatchPhase::Running { cursor, total } => Err(SyncError::ImportRunning { processed: cursor, total }),
            BatchPhase::Finalizing { total } => Err(SyncError::ImportRunning { processed: total, total }),
        }
    }

    // =========================================================================
    // Export
    // =========================================================================

    /// Persists the current configuration and uploads it under `name`.
    ///
    /// Emits exactly one of `ExportSucceeded` or `ExportFailed`.
    pub async fn export_profile(&mut self, name: &str, info: &str) -> SyncResult<ExportReceipt> {
        match self.run_export(name, info).await {
            Ok(receipt) => {
                self.emitter.emit(SyncEvent::ExportSucceeded {
                    name: receipt.name.clone(),
                    url: receipt.url.clone(),
                    caveat: receipt.caveat.clone(),
                });
                Ok(receipt)
            }
            Err(e) => {
                error!(name, error = %e, "Export failed");
                self.emitter.emit(SyncEvent::ExportFailed {
                    name: name.to_string(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_export(&mut self, name: &str, info: &str) -> SyncResult<ExportReceipt> {
        self.ensure_supported_machine()?;
        validate_profile_name(name).map_err(|e| SyncError::InvalidName(e.to_string()))?;
        self.ensure_no_import()?;
        if !self.set.global().has_durable_layer() {
            return Err(SyncError::NothingToExport);
        }

        info!(name, "Starting export");
        self.barrier.flush_pending_edits().await?;
        tokio::time::sleep(self.config.timing.edit_barrier_delay()).await;

        let report = prepare_export(&mut self.set, &self.merge, &self.objects, self.config.debug_mode())?;
        let path = self.staging.write(&report.text).await?;

        let uploaded = self.upload_staged(&path).await;
        StagingArea::remove(&path).await;
        let url = uploaded?;
        info!(name, url = %url, "Profile file uploaded");

        let record = ProfileRecord::new(name, &url, info, &self.config.cloud);
        let caveat = match self.record(&record).await {
            Ok(()) => None,
            Err(e) => {
                warn!(name, error = %e, "Profile uploaded but its record failed");
                Some(format!("file uploaded, but saving its details failed: {}", e))
            }
        };

        Ok(ExportReceipt {
            name: name.to_string(),
            url,
            caveat,
            exported_at: Utc::now(),
            report,
        })
    }

    async fn upload_staged(&self, path: &std::path::Path) -> SyncResult<String> {
        let body = self.catalog.upload_credentials().await?;
        let credentials: UploadCredentials = protocol::decode(&body)?;
        self.uploader.upload(path, &credentials).await
    }

    async fn record(&self, record: &ProfileRecord) -> SyncResult<()> {
        let body = self.catalog.record_profile(record).await?;
        let _ack: serde_json::Value = protocol::decode(&body)?;
        Ok(())
    }

    /// Aborts the in-flight upload. The export then fails.
    pub fn abort_upload(&self) {
        self.upload_abort_handle().abort();
    }

    /// Handle for aborting an upload while `export_profile` is awaited.
    pub fn upload_abort_handle(&self) -> UploadAbortHandle {
        UploadAbortHandle {
            uploader: Arc::clone(&self.uploader),
        }
    }

    // =========================================================================
    // Cloud List
    // =========================================================================

    /// Fetches the catalog and keeps the profiles for the configured device
    /// type and slicer family.
    ///
    /// Emits `CloudListFetched` or `CloudListFetchFailed`.
    pub async fn fetch_cloud_profiles(&self) -> SyncResult<Vec<CloudProfile>> {
        let result = async {
            let body = self.catalog.fetch_catalog().await?;
            let devices: Vec<CatalogDevice> = protocol::decode(&body)?;
            Ok::<_, SyncError>(protocol::filter_profiles(
                devices,
                &self.config.cloud.device_type,
                &self.config.cloud.slice_type,
            ))
        }
        .await;

        match result {
            Ok(profiles) => {
                info!(count = profiles.len(), "Cloud profiles fetched");
                self.emitter.emit(SyncEvent::CloudListFetched(profiles.clone()));
                Ok(profiles)
            }
            Err(e) => {
                error!(error = %e, "Cloud profile list failed");
                self.emitter.emit(SyncEvent::CloudListFetchFailed(e.to_string()));
                Err(e)
            }
        }
    }

    // =========================================================================
    // Import
    // =========================================================================

    /// Downloads a profile and imports it to completion.
    pub async fn import_from_url(&mut self, url: &str, name: &str) -> SyncResult<ImportSummary> {
        let staged = self.stage_download(url, name).await;
        let (content, path) = match staged {
            Ok(staged) => staged,
            Err(e) => return Err(self.fail_import(name, e).await),
        };

        if let Err(e) = self.begin(&content, name, Some(path.clone())) {
            StagingArea::remove(&path).await;
            return Err(self.fail_import(name, e).await);
        }
        self.run_import().await
    }

    async fn stage_download(&self, url: &str, name: &str) -> SyncResult<(String, PathBuf)> {
        validate_url(url).map_err(|e| SyncError::InvalidUrl(e.to_string()))?;
        self.ensure_supported_machine()?;
        self.ensure_no_import()?;

        info!(name, url, "Downloading profile");
        let content = self.downloader.download(url).await?;
        let path = self.staging.write(&content).await?;

        tokio::time::sleep(self.config.timing.import_start_delay()).await;
        match StagingArea::read(&path).await {
            Ok(content) => Ok((content, path)),
            Err(e) => {
                StagingArea::remove(&path).await;
                Err(e)
            }
        }
    }

    /// Imports raw settings text to completion.
    pub async fn import_content(&mut self, content: &str, name: &str) -> SyncResult<ImportSummary> {
        self.begin_import(content, name).await?;
        self.run_import().await
    }

    /// `Idle -> Running`: plans the import, creates missing durable layers
    /// and starts the batch. Returns the number of settings to apply.
    ///
    /// Parse and filter failures leave every layer untouched.
    pub async fn begin_import(&mut self, content: &str, name: &str) -> SyncResult<usize> {
        match self.begin(content, name, None) {
            Ok(total) => Ok(total),
            Err(e) => Err(self.fail_import(name, e).await),
        }
    }

    fn begin(&mut self, content: &str, name: &str, staging: Option<PathBuf>) -> SyncResult<usize> {
        self.ensure_supported_machine()?;
        validate_profile_name(name).map_err(|e| SyncError::InvalidName(e.to_string()))?;
        self.ensure_no_import()?;

        let plan = plan_import(content, &self.set)?;
        let target = prepare_target(&mut self.set, name);
        let total = self.applier.start_with_components(plan.settings, plan.per_component)?;

        self.active = Some(ActiveImport {
            name: name.to_string(),
            profile_name: target.profile_name,
            staging,
            reserved: plan.reserved,
            unknown: plan.unknown,
            created_layers: target.created,
        });
        self.emitter.emit(SyncEvent::ImportStarted {
            name: name.to_string(),
            total,
        });
        Ok(total)
    }

    /// Applies one chunk and emits `ImportProgress`.
    pub async fn step_import(&mut self) -> SyncResult<ChunkOutcome> {
        let name = self.active.as_ref().map(|a| a.name.clone()).ok_or(SyncError::NoImportRunning)?;

        match self.applier.step(&mut self.set) {
            Ok(outcome) => {
                self.emitter.emit(SyncEvent::ImportProgress {
                    name,
                    processed: outcome.processed,
                    total: outcome.total,
                });
                Ok(outcome)
            }
            Err(e) => Err(self.fail_import(&name, e.into()).await),
        }
    }

    /// `Finalizing -> Idle`: propagates to extruders, removes the staging
    /// file and emits `ImportCompleted`.
    pub async fn finish_import(&mut self) -> SyncResult<ImportSummary> {
        let report = match self.applier.finalize(&mut self.set) {
            Ok(report) => report,
            Err(CoreError::BatchNotFinalizing { cursor, total }) => {
                return Err(SyncError::ImportRunning { processed: cursor, total })
            }
            Err(CoreError::NoBatchRunning) => return Err(SyncError::NoImportRunning),
            Err(e) => {
                let name = self.active.as_ref().map(|a| a.name.clone()).unwrap_or_default();
                return Err(self.fail_import(&name, e.into()).await);
            }
        };

        let active = self
            .active
            .take()
            .ok_or_else(|| SyncError::Internal("finished batch without an active import".into()))?;
        if let Some(path) = &active.staging {
            StagingArea::remove(path).await;
        }

        if self.config.debug_mode() {
            log_monitored_keys(&self.set, ComponentId::Global, "after import");
        }

        info!(
            name = %active.name,
            profile = %active.profile_name,
            applied = report.applied,
            total = report.total,
            "Import completed"
        );
        self.emitter.emit(SyncEvent::ImportCompleted {
            name: active.name.clone(),
            profile_name: active.profile_name.clone(),
            applied: report.applied,
            total: report.total,
        });

        Ok(ImportSummary {
            name: active.name,
            profile_name: active.profile_name,
            report,
            reserved: active.reserved,
            unknown: active.unknown,
            created_layers: active.created_layers,
        })
    }

    /// Drives the started import to completion, yielding to the runtime
    /// between chunks, then emits `Refreshed` after the final refresh delay.
    pub async fn run_import(&mut self) -> SyncResult<ImportSummary> {
        loop {
            let outcome = self.step_import().await?;
            if outcome.finished {
                break;
            }
            tokio::task::yield_now().await;
        }

        let summary = self.finish_import().await?;

        tokio::time::sleep(self.config.timing.final_refresh_delay()).await;
        debug!(name = %summary.name, "Final refresh");
        self.emitter.emit(SyncEvent::Refreshed {
            name: summary.name.clone(),
        });
        Ok(summary)
    }

    /// Drops the in-flight import. Chunks already applied stay applied.
    ///
    /// Returns false when no import was running.
    pub async fn abort_import(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        let position = self.applier.abort();
        if let Some(path) = &active.staging {
            StagingArea::remove(path).await;
        }

        let (processed, total) = position.unwrap_or_default();
        warn!(name = %active.name, processed, total, "Import aborted");
        self.emitter.emit(SyncEvent::ImportFailed {
            name: active.name,
            message: format!("import aborted after {} of {} settings", processed, total),
        });
        true
    }

    /// Emits `ImportFailed` and releases the batch if the error ended it.
    async fn fail_import(&mut self, name: &str, e: SyncError) -> SyncError {
        // A rejected second import must not disturb the one in flight.
        let rejected_while_busy = matches!(e, SyncError::ImportRunning { .. })
            || matches!(e, SyncError::Core(CoreError::BatchAlreadyRunning { .. }));
        if !rejected_while_busy {
            if self.applier.abort().is_some() {
                debug!(name, "Dropped batch after failure");
            }
            if let Some(active) = self.active.take() {
                if let Some(path) = &active.staging {
                    StagingArea::remove(path).await;
                }
            }
        }

        error!(name, error = %e, "Import failed");
        self.emitter.emit(SyncEvent::ImportFailed {
            name: name.to_string(),
            message: e.to_string(),
        });
        e
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`SyncOrchestrator`].
pub struct SyncOrchestratorBuilder {
    config: SyncConfig,
    set: ComponentSet,
    merge: Option<MergeEngine>,
    staging: Option<StagingArea>,
    barrier: Option<Arc<dyn EditBarrier>>,
    catalog: Option<Arc<dyn ProfileCatalog>>,
    uploader: Option<Arc<dyn ProfileUploader>>,
    downloader: Option<Arc<dyn ProfileDownloader>>,
    emitter: Option<Arc<dyn ProfileEventEmitter>>,
}

impl SyncOrchestratorBuilder {
    pub fn new(config: SyncConfig, set: ComponentSet) -> Self {
        Self {
            config,
            set,
            merge: None,
            staging: None,
            barrier: None,
            catalog: None,
            uploader: None,
            downloader: None,
            emitter: None,
        }
    }

    pub fn with_merge_engine(mut self, merge: MergeEngine) -> Self {
        self.merge = Some(merge);
        self
    }

    /// Overrides the staging directory from the config.
    pub fn with_staging(mut self, staging: StagingArea) -> Self {
        self.staging = Some(staging);
        self
    }

    pub fn with_barrier(mut self, barrier: Arc<dyn EditBarrier>) -> Self {
        self.barrier = Some(barrier);
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn ProfileCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn ProfileUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_downloader(mut self, downloader: Arc<dyn ProfileDownloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn ProfileEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn build(self) -> SyncResult<SyncOrchestrator> {
        self.config.validate()?;

        let catalog = self
            .catalog
            .ok_or_else(|| SyncError::InvalidConfig("profile catalog is required".into()))?;
        let uploader = self
            .uploader
            .ok_or_else(|| SyncError::InvalidConfig("profile uploader is required".into()))?;
        let downloader = self
            .downloader
            .ok_or_else(|| SyncError::InvalidConfig("profile downloader is required".into()))?;

        let applier = BatchApplier::new(self.config.engine.chunk_size).with_key_monitoring(self.config.debug_mode());
        let staging = self
            .staging
            .unwrap_or_else(|| StagingArea::from_settings(&self.config.staging));

        Ok(SyncOrchestrator {
            set: self.set,
            merge: self.merge.unwrap_or_default(),
            applier,
            staging,
            objects: Vec::new(),
            active: None,
            barrier: self.barrier.unwrap_or_else(|| Arc::new(NoOpBarrier)),
            catalog,
            uploader,
            downloader,
            emitter: self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter)),
            config: self.config,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelEmitter;
    use async_trait::async_trait;
    use forge_core::{
        Component, Layer, LayerRole, SettingDefinition, SettingSchema, SettingType, SettingValue,
    };
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// In-memory collaborators with switchable failures.
    #[derive(Default)]
    struct FakeCloud {
        uploaded: Mutex<Vec<String>>,
        records: Mutex<Vec<ProfileRecord>>,
        download_body: Mutex<String>,
        fail_record: AtomicBool,
        fail_upload: AtomicBool,
        flushes: AtomicUsize,
    }

    #[async_trait]
    impl EditBarrier for FakeCloud {
        async fn flush_pending_edits(&self) -> SyncResult<()> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl ProfileCatalog for FakeCloud {
        async fn upload_credentials(&self) -> SyncResult<String> {
            Ok(r#"{"msg":"success","data":{"cdn":"https://cdn.example.com/p/"}}"#.to_string())
        }

        async fn fetch_catalog(&self) -> SyncResult<String> {
            Ok(serde_json::json!({
                "code": 0,
                "data": [{ "deviceType": "EP3", "sliceTypes": [
                    { "sliceType": "cura", "sliceConfs": [{ "id": "1", "name": "PLA" }] },
                    { "sliceType": "orca", "sliceConfs": [{ "id": "2", "name": "ABS" }] }
                ]}]
            })
            .to_string())
        }

        async fn record_profile(&self, record: &ProfileRecord) -> SyncResult<String> {
            if self.fail_record.load(Ordering::SeqCst) {
                return Ok(r#"{"code":500,"msg":"database busy"}"#.to_string());
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(r#"{"code":0,"msg":"success"}"#.to_string())
        }
    }

    #[async_trait]
    impl ProfileUploader for FakeCloud {
        async fn upload(&self, path: &Path, credentials: &UploadCredentials) -> SyncResult<String> {
            if self.fail_upload.load(Ordering::SeqCst) {
                return Err(SyncError::UploadFailed("upload aborted".into()));
            }
            let text = std::fs::read_to_string(path).map_err(|e| SyncError::UploadFailed(e.to_string()))?;
            self.uploaded.lock().unwrap().push(text);
            let file = path.file_name().unwrap().to_string_lossy();
            Ok(format!("{}{}", credentials.cdn, file))
        }

        fn abort(&self) {
            self.fail_upload.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ProfileDownloader for FakeCloud {
        async fn download(&self, _url: &str) -> SyncResult<String> {
            Ok(self.download_body.lock().unwrap().clone())
        }
    }

    fn schema(id: &str, keys: usize) -> SettingSchema {
        let mut defs = vec![
            SettingDefinition::new("layer_height", SettingType::Float, SettingValue::Float(0.2)),
            SettingDefinition::new("cool_fan_speed", SettingType::Float, SettingValue::Float(100.0)),
            SettingDefinition::new("support_enable", SettingType::Bool, SettingValue::Bool(false)),
        ];
        for i in 0..keys {
            defs.push(SettingDefinition::new(format!("extra_{}", i), SettingType::Int, SettingValue::Int(0)));
        }
        SettingSchema::new(id, defs)
    }

    fn machine(with_custom: bool) -> ComponentSet {
        let mut global = Component::new(ComponentId::Global, schema("explorer_3", 62));
        if with_custom {
            global = global.with_custom(Layer::named("explorer_3_mine", LayerRole::Custom));
        }
        ComponentSet::new(global.with_user(Layer::named("user", LayerRole::User).with_value("layer_height", 0.16)))
            .with_sub(Component::new(ComponentId::Sub(0), schema("explorer_3_extruder_0", 62)))
    }

    struct Harness {
        orchestrator: SyncOrchestrator,
        cloud: Arc<FakeCloud>,
        events: UnboundedReceiver<SyncEvent>,
        _dir: tempfile::TempDir,
    }

    fn harness(set: ComponentSet) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let cloud = Arc::new(FakeCloud::default());
        let (emitter, events) = ChannelEmitter::new();
        let orchestrator = SyncOrchestrator::builder(SyncConfig::default(), set)
            .with_staging(StagingArea::new(dir.path().join("staging"), "txt"))
            .with_barrier(cloud.clone())
            .with_catalog(cloud.clone())
            .with_uploader(cloud.clone())
            .with_downloader(cloud.clone())
            .with_emitter(Arc::new(emitter))
            .build()
            .unwrap();
        Harness {
            orchestrator,
            cloud,
            events,
            _dir: dir,
        }
    }

    fn drain(rx: &mut UnboundedReceiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn staging_files(h: &Harness) -> usize {
        std::fs::read_dir(h.orchestrator.staging.dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let result = SyncOrchestrator::builder(SyncConfig::default(), machine(true)).build();
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_uploads_and_records() {
        let mut h = harness(machine(true));
        let receipt = h.orchestrator.export_profile("PLA Fine", "0.16mm").await.unwrap();

        assert!(receipt.url.starts_with("https://cdn.example.com/p/"));
        assert!(receipt.caveat.is_none());
        assert_eq!(h.cloud.flushes.load(Ordering::SeqCst), 1);

        let uploaded = h.cloud.uploaded.lock().unwrap().clone();
        assert!(uploaded[0].starts_with(r#"-s layer_height="0.16""#));

        let records = h.cloud.records.lock().unwrap().clone();
        assert_eq!(records[0].name, "PLA Fine");
        assert_eq!(records[0].info, "0.16mm");
        assert_eq!(records[0].device_type, "EP3");

        assert_eq!(staging_files(&h), 0);
        let events = drain(&mut h.events);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], SyncEvent::ExportSucceeded { caveat: None, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_without_durable_layer_creates_no_staging_file() {
        let mut h = harness(machine(false));
        let err = h.orchestrator.export_profile("PLA", "").await.unwrap_err();

        assert!(matches!(err, SyncError::NothingToExport));
        assert_eq!(staging_files(&h), 0);
        assert_eq!(h.cloud.flushes.load(Ordering::SeqCst), 0);
        assert!(matches!(&drain(&mut h.events)[..], [SyncEvent::ExportFailed { .. }]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_failure_is_success_with_caveat() {
        let mut h = harness(machine(true));
        h.cloud.fail_record.store(true, Ordering::SeqCst);

        let receipt = h.orchestrator.export_profile("PLA", "").await.unwrap();
        assert!(receipt.caveat.as_deref().unwrap().contains("database busy"));
        assert!(matches!(
            &drain(&mut h.events)[..],
            [SyncEvent::ExportSucceeded { caveat: Some(_), .. }]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_upload_keeps_saved_edits() {
        let mut h = harness(machine(true));
        h.orchestrator.abort_upload();

        let err = h.orchestrator.export_profile("PLA", "").await.unwrap_err();
        assert!(err.is_collaborator());
        assert_eq!(
            h.orchestrator
                .components()
                .layer_value(ComponentId::Global, LayerRole::Custom, "layer_height"),
            Some(&SettingValue::Float(0.16))
        );
        assert_eq!(staging_files(&h), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_machine_is_rejected() {
        let set = ComponentSet::new(
            Component::new(ComponentId::Global, schema("other_printer", 0))
                .with_custom(Layer::named("c", LayerRole::Custom)),
        );
        let mut h = harness(set);
        assert!(!h.orchestrator.is_supported_machine());

        let err = h.orchestrator.import_content("-s layer_height=0.1", "x").await.unwrap_err();
        assert!(matches!(err, SyncError::NoActiveMachine(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_import_runs_three_chunks_for_65_keys() {
        let mut h = harness(machine(false));
        let mut content = String::from(r#"-s layer_height="0.3" -s cool_fan_speed="55.0" -s support_enable="True""#);
        for i in 0..62 {
            content.push_str(&format!(" -s extra_{}={}", i, i));
        }
        content.push_str(r#" -s machine_width="220""#);

        let summary = h.orchestrator.import_content(&content, "Imported").await.unwrap();
        assert_eq!(summary.report.total, 65);
        assert_eq!(summary.report.applied, 65);
        assert_eq!(summary.report.chunk_steps, 3);
        assert_eq!(summary.reserved, 1);
        assert_eq!(summary.profile_name, "explorer_3_imported");
        assert_eq!(summary.report.discarded_edits, 1);

        let set = h.orchestrator.components();
        assert_eq!(set.resolve(ComponentId::Global, "layer_height"), Some(&SettingValue::Float(0.3)));
        assert_eq!(
            set.layer_value(ComponentId::Sub(0), LayerRole::Custom, "cool_fan_speed"),
            Some(&SettingValue::Float(55.0))
        );

        let events = drain(&mut h.events);
        let progress: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                SyncEvent::ImportProgress { processed, .. } => Some(*processed),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![30, 60, 65]);
        assert!(matches!(events.first(), Some(SyncEvent::ImportStarted { total: 65, .. })));
        assert!(matches!(events.last(), Some(SyncEvent::Refreshed { .. })));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_import_is_rejected_while_running() {
        let mut h = harness(machine(true));
        h.orchestrator.begin_import("-s layer_height=0.1", "first").await.unwrap();

        let err = h.orchestrator.begin_import("-s layer_height=0.2", "second").await.unwrap_err();
        assert!(err.is_precondition());
        assert!(matches!(h.orchestrator.import_phase(), BatchPhase::Running { cursor: 0, total: 1 }));

        let summary = h.orchestrator.run_import().await.unwrap();
        assert_eq!(summary.name, "first");
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_import_keeps_applied_chunks() {
        let mut content = String::new();
        for i in 0..40 {
            content.push_str(&format!("-s extra_{}={} ", i, i + 1));
        }
        let mut h = harness(machine(true));
        h.orchestrator.begin_import(&content, "partial").await.unwrap();
        h.orchestrator.step_import().await.unwrap();

        assert!(h.orchestrator.abort_import().await);
        assert!(!h.orchestrator.abort_import().await);
        assert!(matches!(h.orchestrator.import_phase(), BatchPhase::Idle));

        let set = h.orchestrator.components();
        assert_eq!(set.resolve(ComponentId::Global, "extra_0"), Some(&SettingValue::Int(1)));
        assert_eq!(set.resolve(ComponentId::Global, "extra_35"), Some(&SettingValue::Int(0)));

        let events = drain(&mut h.events);
        assert!(matches!(events.last(), Some(SyncEvent::ImportFailed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_import_from_url_stages_and_cleans_up() {
        let mut h = harness(machine(true));
        *h.cloud.download_body.lock().unwrap() = r#"-s layer_height="0.28""#.to_string();

        let summary = h.orchestrator.import_from_url("https://cdn.example.com/p/a.txt", "remote").await.unwrap();
        assert_eq!(summary.report.applied, 1);
        assert_eq!(staging_files(&h), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_import_failures_are_reported_once() {
        let mut h = harness(machine(true));

        let err = h.orchestrator.import_from_url("  ", "remote").await.unwrap_err();
        assert!(err.is_precondition());

        *h.cloud.download_body.lock().unwrap() = "-s machine_width=1".to_string();
        let err = h.orchestrator.import_from_url("https://x/a.txt", "remote").await.unwrap_err();
        assert!(err.is_data_format());
        assert_eq!(staging_files(&h), 0);

        let events = drain(&mut h.events);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, SyncEvent::ImportFailed { .. })));
        assert!(matches!(h.orchestrator.import_phase(), BatchPhase::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_step_removes_staging_file() {
        let mut h = harness(machine(true));
        let path = h.orchestrator.staging.write("-s layer_height=0.3").await.unwrap();
        h.orchestrator.begin("-s layer_height=0.3", "staged", Some(path.clone())).unwrap();
        // Batch dropped underneath the active import.
        h.orchestrator.applier.abort();

        let err = h.orchestrator.step_import().await.unwrap_err();
        assert!(matches!(err, SyncError::Core(CoreError::NoBatchRunning)));
        assert!(!path.exists());
        assert!(h.orchestrator.active.is_none());
        assert!(matches!(drain(&mut h.events).last(), Some(SyncEvent::ImportFailed { .. })));
    }

    #[tokio::test]
    async fn test_fetch_cloud_profiles_filters_by_slicer() {
        let mut h = harness(machine(true));
        let profiles = h.orchestrator.fetch_cloud_profiles().await.unwrap();

        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].name, "PLA");
        assert!(matches!(&drain(&mut h.events)[..], [SyncEvent::CloudListFetched(list)] if list.len() == 1));
    }
}
