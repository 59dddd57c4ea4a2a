//! # Batch Applier
//!
//! Applies a large parsed configuration onto a [`ComponentSet`] a chunk at
//! a time, so the caller can hand control back to its scheduler between
//! chunks.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │          start()                step() while cursor < total             │
//! │   Idle ──────────► Running(cursor) ◄──────┐                             │
//! │    ▲                    │         └───────┘                             │
//! │    │                    │ step() reaches total                          │
//! │    │                    ▼                                               │
//! │    └────────────── Finalizing                                           │
//! │       finalize()                                                        │
//! │                                                                         │
//! │   abort() from Running or Finalizing drops the batch; chunks already    │
//! │   applied stay applied.                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The applier never loops to completion on its own: one [`BatchApplier::step`]
//! call is exactly one chunk. Driving the steps (and yielding between them)
//! is the orchestrator's job.
//!
//! ## Per-key failures
//! A key whose value cannot be coerced or written is logged with the
//! offending value and skipped. It never stops the batch.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec::ParsedSettings;
use crate::error::{CoreError, CoreResult};
use crate::layer::ComponentSet;
use crate::types::{ComponentId, LayerRole, SettingKey, SettingValue};
use crate::validation::coerce_for_import;
use crate::{DEFAULT_CHUNK_SIZE, KEY_MONITORING_PARAMS};

// =============================================================================
// Phase and Reports
// =============================================================================

/// Externally visible state of the applier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Idle,
    Running { cursor: usize, total: usize },
    Finalizing { total: usize },
}

/// Result of one chunk step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOutcome {
    /// Keys processed so far, including this chunk.
    pub processed: usize,
    pub total: usize,
    /// Keys written by this chunk.
    pub applied: usize,
    /// True once the batch entered `Finalizing`.
    pub finished: bool,
}

/// Summary returned by [`BatchApplier::finalize`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Keys written into the global durable layer.
    pub applied: usize,
    /// Keys in the batch.
    pub total: usize,
    /// Keys skipped by a per-key failure.
    pub failed: usize,
    /// Pending user edits discarded before propagation.
    pub discarded_edits: usize,
    /// Writes into sub-component durable layers.
    pub sub_writes: usize,
    /// Chunk steps taken.
    pub chunk_steps: usize,
}

// =============================================================================
// Batch State
// =============================================================================

#[derive(Debug)]
struct ImportBatch {
    entries: Vec<(SettingKey, SettingValue)>,
    /// Per-extruder values that replace `entries` for that extruder.
    per_component: BTreeMap<usize, ParsedSettings>,
    cursor: usize,
    applied: usize,
    failed: usize,
    chunk_steps: usize,
}

impl ImportBatch {
    fn total(&self) -> usize {
        self.entries.len()
    }

    fn is_done(&self) -> bool {
        self.cursor >= self.entries.len()
    }
}

// =============================================================================
// Batch Applier
// =============================================================================

/// Chunked import state machine. At most one batch is in flight.
#[derive(Debug)]
pub struct BatchApplier {
    chunk_size: usize,
    monitor_keys: bool,
    batch: Option<ImportBatch>,
}

impl Default for BatchApplier {
    fn default() -> Self {
        BatchApplier::new(DEFAULT_CHUNK_SIZE)
    }
}

impl BatchApplier {
    /// Creates an idle applier. A chunk size of zero is treated as one.
    pub fn new(chunk_size: usize) -> Self {
        BatchApplier {
            chunk_size: chunk_size.max(1),
            monitor_keys: false,
            batch: None,
        }
    }

    /// Logs every applied monitored key at debug level.
    pub fn with_key_monitoring(mut self, enabled: bool) -> Self {
        self.monitor_keys = enabled;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn phase(&self) -> BatchPhase {
        match &self.batch {
            None => BatchPhase::Idle,
            Some(b) if b.is_done() => BatchPhase::Finalizing { total: b.total() },
            Some(b) => BatchPhase::Running {
                cursor: b.cursor,
                total: b.total(),
            },
        }
    }

    pub fn is_idle(&self) -> bool {
        self.batch.is_none()
    }

    /// `Idle -> Running`.
    ///
    /// ## Errors
    /// [`CoreError::BatchAlreadyRunning`] if a batch is in flight.
    pub fn start(&mut self, settings: ParsedSettings) -> CoreResult<usize> {
        self.start_with_components(settings, BTreeMap::new())
    }

    /// `Idle -> Running`, with per-extruder values used by
    /// [`BatchApplier::finalize`] in place of the shared value for that
    /// extruder.
    ///
    /// ## Errors
    /// [`CoreError::BatchAlreadyRunning`] when a batch is in flight.
    pub fn start_with_components(
        &mut self,
        settings: ParsedSettings,
        per_component: BTreeMap<usize, ParsedSettings>,
    ) -> CoreResult<usize> {
        if let Some(batch) = &self.batch {
            return Err(CoreError::BatchAlreadyRunning {
                cursor: batch.cursor,
                total: batch.total(),
            });
        }

        let entries: Vec<_> = settings.into_iter().collect();
        let total = entries.len();
        info!(total, chunk_size = self.chunk_size, "Starting import batch");

        self.batch = Some(ImportBatch {
            entries,
            per_component,
            cursor: 0,
            applied: 0,
            failed: 0,
            chunk_steps: 0,
        });
        Ok(total)
    }

    /// `Running -> Running | Finalizing`: applies one chunk to the global
    /// durable layer.
    ///
    /// A step while already finalizing is a no-op.
    ///
    /// ## Errors
    /// [`CoreError::NoBatchRunning`] when idle.
    pub fn step(&mut self, set: &mut ComponentSet) -> CoreResult<ChunkOutcome> {
        let monitor = self.monitor_keys;
        let chunk_size = self.chunk_size;
        let batch = self.batch.as_mut().ok_or(CoreError::NoBatchRunning)?;

        if batch.is_done() {
            return Ok(ChunkOutcome {
                processed: batch.cursor,
                total: batch.total(),
                applied: 0,
                finished: true,
            });
        }

        let end = (batch.cursor + chunk_size).min(batch.total());
        let mut applied = 0;
        for (key, value) in &batch.entries[batch.cursor..end] {
            match apply_one(set, ComponentId::Global, key, value) {
                Ok(coerced) => {
                    applied += 1;
                    if monitor && KEY_MONITORING_PARAMS.contains(&key.as_str()) {
                        debug!(key = %key, value = %coerced, "Applied monitored setting");
                    }
                }
                Err(e) => {
                    batch.failed += 1;
                    warn!(key = %key, value = %value, error = %e, "Skipping setting");
                }
            }
        }

        batch.cursor = end;
        batch.applied += applied;
        batch.chunk_steps += 1;
        debug!(processed = end, total = batch.total(), "Import chunk applied");

        Ok(ChunkOutcome {
            processed: end,
            total: batch.total(),
            applied,
            finished: batch.is_done(),
        })
    }

    /// `Finalizing -> Idle`.
    ///
    /// Discards every pending user edit (with a warning), then writes the
    /// batch's settings into each sub-component's durable layer, one
    /// attempt per key per sub-component. A sub-component's own value from
    /// `start_with_components` wins over the shared one.
    ///
    /// ## Errors
    /// - [`CoreError::NoBatchRunning`] when idle
    /// - [`CoreError::BatchNotFinalizing`] when chunks remain
    pub fn finalize(&mut self, set: &mut ComponentSet) -> CoreResult<BatchReport> {
        match &self.batch {
            None => return Err(CoreError::NoBatchRunning),
            Some(b) if !b.is_done() => {
                return Err(CoreError::BatchNotFinalizing {
                    cursor: b.cursor,
                    total: b.total(),
                })
            }
            Some(_) => {}
        }
        let Some(batch) = self.batch.take() else {
            return Err(CoreError::NoBatchRunning);
        };

        let discarded_edits = set.clear_user_edits();
        if discarded_edits > 0 {
            warn!(discarded = discarded_edits, "Import discards unsaved user edits");
        }

        let mut sub_writes = 0;
        for index in 0..set.subs().len() {
            let id = ComponentId::Sub(index);
            if !set.subs()[index].has_durable_layer() {
                warn!(component = %id, "No durable layer, extruder keeps its settings");
                continue;
            }
            let own = batch.per_component.get(&index);
            for (key, shared) in &batch.entries {
                let value = own.and_then(|section| section.get(key.as_str())).unwrap_or(shared);
                match apply_one(set, id, key, value) {
                    Ok(_) => sub_writes += 1,
                    Err(e) => debug!(component = %id, key = %key, error = %e, "Not synced to extruder"),
                }
            }
        }

        let report = BatchReport {
            applied: batch.applied,
            total: batch.total(),
            failed: batch.failed,
            discarded_edits,
            sub_writes,
            chunk_steps: batch.chunk_steps,
        };
        info!(
            applied = report.applied,
            total = report.total,
            failed = report.failed,
            "Import batch complete"
        );
        Ok(report)
    }

    /// Drops the in-flight batch without finalizing.
    ///
    /// Returns `(cursor, total)` of the dropped batch. Applied chunks are
    /// not rolled back.
    pub fn abort(&mut self) -> Option<(usize, usize)> {
        let batch = self.batch.take()?;
        warn!(cursor = batch.cursor, total = batch.total(), "Import batch aborted");
        Some((batch.cursor, batch.total()))
    }
}

/// Coerces against the component's schema (falling back to the global
/// schema) and writes into the component's durable layer.
fn apply_one(
    set: &mut ComponentSet,
    id: ComponentId,
    key: &SettingKey,
    value: &SettingValue,
) -> CoreResult<SettingValue> {
    let component = set.component(id)?;
    let schema = if component.schema().contains(key.as_str()) {
        component.schema()
    } else {
        set.global().schema()
    };
    let coerced = coerce_for_import(key, value, schema)?;
    set.set_value(id, LayerRole::Custom, key, coerced.clone())?;
    Ok(coerced)
}

// =============================================================================
// Unit Tests
// =============================================================================
