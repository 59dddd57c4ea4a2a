//! End-to-end export → cloud list → import through a local directory store.

use std::sync::Arc;

use forge_core::{
    Component, ComponentId, ComponentSet, Layer, LayerRole, SettingDefinition, SettingSchema, SettingType,
    SettingValue,
};
use forge_sync::{
    ChannelEmitter, LocalDirectoryStore, StagingArea, SyncConfig, SyncEvent, SyncOrchestrator,
};

fn schema(id: &str) -> SettingSchema {
    SettingSchema::new(
        id,
        vec![
            SettingDefinition::new("machine_width", SettingType::Float, SettingValue::Float(300.0)),
            SettingDefinition::new("layer_height", SettingType::Float, SettingValue::Float(0.2))
                .with_label("Layer Height")
                .with_unit("mm"),
            SettingDefinition::new("wall_line_count", SettingType::Int, SettingValue::Int(2))
                .with_formula("max(1, round((wall_thickness - 0.4) / 0.4) + 1)"),
            SettingDefinition::new("infill_pattern", SettingType::Enum, SettingValue::text("grid")),
            SettingDefinition::new("support_enable", SettingType::Bool, SettingValue::Bool(false)),
            SettingDefinition::new("cool_fan_speed", SettingType::Float, SettingValue::Float(100.0)),
            SettingDefinition::new("print_note", SettingType::Str, SettingValue::text("")),
        ],
    )
}

/// Machine with a saved profile, one pending edit and a tuned extruder.
fn source_machine() -> ComponentSet {
    ComponentSet::new(
        Component::new(ComponentId::Global, schema("explorer_3"))
            .with_base(Layer::named("normal", LayerRole::Base).with_value("layer_height", 0.15))
            .with_custom(
                Layer::named("explorer_3_pla", LayerRole::Custom)
                    .with_value("infill_pattern", SettingValue::text("gyroid"))
                    .with_value("print_note", SettingValue::text(r#"say "hi""#)),
            )
            .with_user(Layer::named("user", LayerRole::User).with_value("support_enable", true)),
    )
    .with_sub(
        Component::new(ComponentId::Sub(0), schema("explorer_3_extruder_0"))
            .with_custom(Layer::named("extruder_pla", LayerRole::Custom).with_value("cool_fan_speed", 40.0)),
    )
}

/// Fresh machine with no custom profile.
fn target_machine() -> ComponentSet {
    ComponentSet::new(Component::new(ComponentId::Global, schema("explorer_3")))
        .with_sub(Component::new(ComponentId::Sub(0), schema("explorer_3_extruder_0")))
}

fn orchestrator(
    set: ComponentSet,
    store: &Arc<LocalDirectoryStore>,
    staging: &std::path::Path,
) -> (SyncOrchestrator, tokio::sync::mpsc::UnboundedReceiver<SyncEvent>) {
    let (emitter, events) = ChannelEmitter::new();
    let mut config = SyncConfig::default();
    config.engine.debug_mode = true;
    let orchestrator = SyncOrchestrator::builder(config, set)
        .with_staging(StagingArea::new(staging, "txt"))
        .with_catalog(store.clone())
        .with_uploader(store.clone())
        .with_downloader(store.clone())
        .with_emitter(Arc::new(emitter))
        .build()
        .unwrap();
    (orchestrator, events)
}

#[tokio::test(start_paused = true)]
async fn test_export_then_import_reproduces_resolved_values() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalDirectoryStore::new(dir.path().join("cloud")));
    let staging = dir.path().join("staging");

    let (mut source, _source_events) = orchestrator(source_machine(), &store, &staging);
    let receipt = source.export_profile("PLA Everyday", "gyroid, supports").await.unwrap();
    assert!(receipt.caveat.is_none());

    let (mut target, mut events) = orchestrator(target_machine(), &store, &staging);
    let listed = target.fetch_cloud_profiles().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "PLA Everyday");
    assert_eq!(listed[0].config_file_url, receipt.url);

    let summary = target.import_from_url(&listed[0].config_file_url, "PLA Everyday").await.unwrap();
    assert_eq!(summary.profile_name, "explorer_3_pla_everyday");
    assert_eq!(summary.reserved, 1);
    assert_eq!(summary.report.failed, 0);
    assert_eq!(summary.created_layers, vec![ComponentId::Global, ComponentId::Sub(0)]);

    let exported = source.components();
    let imported = target.components();
    for key in ["layer_height", "wall_line_count", "infill_pattern", "support_enable", "print_note"] {
        assert_eq!(
            imported.resolve(ComponentId::Global, key),
            exported.resolve(ComponentId::Global, key),
            "{key}"
        );
    }
    assert_eq!(
        imported.resolve(ComponentId::Global, "print_note"),
        Some(&SettingValue::text(r#"say "hi""#))
    );
    // Per-extruder keys keep the extruder's own value.
    assert_eq!(
        imported.resolve(ComponentId::Sub(0), "cool_fan_speed"),
        exported.resolve(ComponentId::Sub(0), "cool_fan_speed")
    );
    assert_eq!(imported.resolve(ComponentId::Sub(0), "cool_fan_speed"), Some(&SettingValue::Float(40.0)));
    assert_eq!(imported.resolve(ComponentId::Global, "cool_fan_speed"), Some(&SettingValue::Float(100.0)));
    // Machine identity is never imported.
    assert!(imported
        .layer_value(ComponentId::Global, LayerRole::Custom, "machine_width")
        .is_none());

    let mut saw_completed = false;
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::ImportCompleted { applied, total, .. } = event {
            assert_eq!(applied, total);
            saw_completed = true;
        }
    }
    assert!(saw_completed);

    assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_export_without_profile_leaves_cloud_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalDirectoryStore::new(dir.path().join("cloud")));
    let staging = dir.path().join("staging");

    let (mut fresh, _events) = orchestrator(target_machine(), &store, &staging);
    assert!(fresh.export_profile("Nothing", "").await.is_err());

    assert!(fresh.fetch_cloud_profiles().await.unwrap().is_empty());
    assert!(!staging.exists());
}
