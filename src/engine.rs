use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use geojson::{FeatureCollection, GeoJson};
use log::{info, warn};
use serde_json::Value as JsonValue;

use crate::aggregation::{summarize, AggregatedSummary};
use crate::area::compute_areas;
use crate::config::EngineConfig;
use crate::demo::demo_layers;
use crate::error::LkError;
use crate::fallback::FallbackChain;
use crate::metadata::{
    build_metadata, new_layer, Layer, LayerStatus, LayerSummary, Realm, UserInput,
};
use crate::normalize::normalize;
use crate::schema::settings_keys;
use crate::store::{BackupBundle, LayerStore};
use crate::tracker::{Completeness, ExpectedCatalog, ExpectedLayerTracker, TrackerEntry};

/// Mutation notifications for the presentation layer. Subscribers receive
/// these over a channel instead of an ambient refresh broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    LayerSaved(String),
    LayerDeleted(String),
    TrackerChanged,
    SettingChanged(String),
    StoreImported,
}

/// Result of one ingestion attempt. A `Failed` layer comes back unsaved; the
/// caller decides whether to store it for manual repair via `save_layer`.
#[derive(Debug)]
pub struct IngestOutcome {
    pub layer: Layer,
    pub saved: bool,
}

/// The top-level context object owning engine state: configuration, the
/// expected-layer catalogue, the durable store and the tracker. Single writer
/// at a time per layer id; callers generating fresh ids avoid contention.
pub struct LayerEngine {
    config: EngineConfig,
    catalog: ExpectedCatalog,
    store: Arc<dyn LayerStore>,
    tracker: ExpectedLayerTracker,
    subscribers: Vec<Sender<ChangeEvent>>,
}

impl LayerEngine {
    pub fn new(
        config: EngineConfig,
        catalog: ExpectedCatalog,
        store: Arc<dyn LayerStore>,
    ) -> Result<Self, LkError> {
        let tracker = load_tracker(store.as_ref());
        Ok(Self {
            config,
            catalog,
            store,
            tracker,
            subscribers: Vec::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ExpectedCatalog {
        &self.catalog
    }

    pub fn tracker(&self) -> &ExpectedLayerTracker {
        &self.tracker
    }

    // ── Ingestion ───────────────────────────────────────────────────────────

    /// Run one upload through the full pipeline: size gate, parse, normalize,
    /// area computation, metadata build, then save unless the normalizer
    /// marked the layer `Failed`.
    pub fn ingest(
        &mut self,
        raw: &str,
        declared_crs: Option<&str>,
        input: UserInput,
    ) -> Result<IngestOutcome, LkError> {
        let size_mb = raw.len() as f64 / (1024.0 * 1024.0);
        if size_mb > self.config.max_upload_mb as f64 {
            return Err(LkError::UploadTooLarge {
                size_mb,
                max_mb: self.config.max_upload_mb,
            });
        }

        let geojson: GeoJson = raw
            .parse()
            .map_err(|e: geojson::Error| LkError::UnreadableInput(e.to_string()))?;
        let collection = FeatureCollection::try_from(geojson)
            .map_err(|e| LkError::UnreadableInput(e.to_string()))?;

        let mut normalized = normalize(collection, declared_crs, &self.config)?;
        let areas = compute_areas(&mut normalized);
        let metadata = build_metadata(&input, &normalized, &areas);
        let layer = new_layer(metadata, normalized.collection);

        if layer.metadata.status == LayerStatus::Failed {
            info!(
                "layer '{}' failed normalization and was not saved",
                layer.metadata.name
            );
            return Ok(IngestOutcome {
                layer,
                saved: false,
            });
        }

        self.store.put(&layer)?;
        self.notify(ChangeEvent::LayerSaved(layer.id.clone()));
        Ok(IngestOutcome { layer, saved: true })
    }

    /// Manual-repair path: store a layer the ingestion pipeline refused to
    /// auto-save.
    pub fn save_layer(&mut self, layer: &Layer) -> Result<(), LkError> {
        self.store.put(layer)?;
        self.notify(ChangeEvent::LayerSaved(layer.id.clone()));
        Ok(())
    }

    // ── Layer access ────────────────────────────────────────────────────────

    pub fn list_layers(&self) -> Result<Vec<LayerSummary>, LkError> {
        self.store.list()
    }

    pub fn get_layer(&self, id: &str) -> Result<Option<Layer>, LkError> {
        self.store.get(id)
    }

    pub fn delete_layer(&mut self, id: &str) -> Result<bool, LkError> {
        let removed = self.store.delete(id)?;
        if removed {
            self.notify(ChangeEvent::LayerDeleted(id.to_string()));
        }
        Ok(removed)
    }

    // ── Expected-layer tracking ─────────────────────────────────────────────

    /// Link a layer to an expected slot. The layer must exist at link time;
    /// staleness after a later deletion is tolerated downstream.
    pub fn track(&mut self, slot_id: &str, layer_id: &str) -> Result<(), LkError> {
        if self.catalog.get(slot_id).is_none() {
            return Err(LkError::Validation(format!(
                "unknown expected-layer slot: {slot_id}"
            )));
        }
        if self.store.get(layer_id)?.is_none() {
            return Err(LkError::NotFound(format!("layer {layer_id}")));
        }
        self.tracker.track(slot_id, layer_id);
        self.persist_tracker()?;
        self.notify(ChangeEvent::TrackerChanged);
        Ok(())
    }

    pub fn untrack(&mut self, slot_id: &str) -> Result<Option<TrackerEntry>, LkError> {
        let removed = self.tracker.untrack(slot_id);
        if removed.is_some() {
            self.persist_tracker()?;
            self.notify(ChangeEvent::TrackerChanged);
        }
        Ok(removed)
    }

    pub fn completeness(&self) -> Completeness {
        self.tracker.completeness(&self.catalog)
    }

    pub fn completeness_filtered(
        &self,
        realm: Option<Realm>,
        target_code: Option<&str>,
    ) -> Completeness {
        self.tracker
            .completeness_filtered(&self.catalog, realm, target_code)
    }

    fn persist_tracker(&self) -> Result<(), LkError> {
        let snapshot = self.tracker.to_snapshot()?;
        self.store
            .set_setting(settings_keys::TRACKER_SNAPSHOT, &snapshot)
    }

    // ── Reporting ───────────────────────────────────────────────────────────

    /// Recompute the dashboard summary from the current layers and tracker.
    pub fn summarize(&self) -> Result<AggregatedSummary, LkError> {
        let layers = self.all_layers()?;
        summarize(&layers, &self.tracker, &self.config.baseline)
    }

    // ── Settings ────────────────────────────────────────────────────────────

    pub fn get_setting(&self, key: &str) -> Result<Option<JsonValue>, LkError> {
        self.store.get_setting(key)
    }

    pub fn set_setting(&mut self, key: &str, value: &JsonValue) -> Result<(), LkError> {
        self.store.set_setting(key, value)?;
        self.notify(ChangeEvent::SettingChanged(key.to_string()));
        Ok(())
    }

    // ── Backup ──────────────────────────────────────────────────────────────

    pub fn export(&self) -> Result<BackupBundle, LkError> {
        self.store.export()
    }

    /// Restore a backup. Clear-then-repopulate, re-runnable; the tracker is
    /// reloaded from the imported settings afterwards.
    pub fn import(&mut self, bundle: &BackupBundle) -> Result<(), LkError> {
        self.store.import(bundle)?;
        self.tracker = load_tracker(self.store.as_ref());
        self.notify(ChangeEvent::StoreImported);
        Ok(())
    }

    // ── Initial load ────────────────────────────────────────────────────────

    /// Load the working layer set within a bounded time window. A store that
    /// does not respond promptly, errors, or comes back empty falls through
    /// to seeded demonstration content instead of blocking the portal.
    pub fn load_initial(&mut self) -> Result<Vec<Layer>, LkError> {
        let timeout = Duration::from_millis(self.config.load_timeout_ms);

        let stored = Arc::clone(&self.store);
        let seeding = Arc::clone(&self.store);
        let config = self.config.clone();

        FallbackChain::new()
            .strategy(
                "stored-layers",
                timeout,
                move || load_all_layers(stored.as_ref()),
                |layers: &Vec<Layer>| !layers.is_empty(),
            )
            .strategy(
                "demonstration-content",
                timeout,
                move || {
                    let layers = demo_layers(&config)?;
                    for layer in &layers {
                        if let Err(e) = seeding.put(layer) {
                            warn!("could not seed demonstration layer: {e}");
                        }
                    }
                    Ok(layers)
                },
                |layers: &Vec<Layer>| !layers.is_empty(),
            )
            .execute()
    }

    // ── Subscriptions ───────────────────────────────────────────────────────

    /// Register a mutation observer. Dropped receivers are pruned on the next
    /// notification.
    pub fn subscribe(&mut self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    fn notify(&mut self, event: ChangeEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    fn all_layers(&self) -> Result<Vec<Layer>, LkError> {
        load_all_layers(self.store.as_ref())
    }
}

fn load_all_layers(store: &dyn LayerStore) -> Result<Vec<Layer>, LkError> {
    let mut layers = Vec::new();
    for summary in store.list()? {
        if let Some(layer) = store.get(&summary.id)? {
            layers.push(layer);
        }
    }
    Ok(layers)
}

fn load_tracker(store: &dyn LayerStore) -> ExpectedLayerTracker {
    match store.get_setting(settings_keys::TRACKER_SNAPSHOT) {
        Ok(Some(snapshot)) => match ExpectedLayerTracker::from_snapshot(&snapshot) {
            Ok(tracker) => tracker,
            Err(e) => {
                warn!("unreadable tracker snapshot, starting empty: {e}");
                ExpectedLayerTracker::new()
            }
        },
        Ok(None) => ExpectedLayerTracker::new(),
        Err(e) => {
            warn!("could not read tracker snapshot, starting empty: {e}");
            ExpectedLayerTracker::new()
        }
    }
}
