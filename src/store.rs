use std::collections::BTreeMap;
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sled::{Db, Tree};

use crate::error::LkError;
use crate::metadata::{Layer, LayerSummary};
use crate::schema::settings_keys;

/// Durable keyed storage for layers plus a small settings sub-store.
///
/// The engine only talks to this trait; the embedded sled binding below and a
/// remote resource-oriented binding (`GET/POST /layers`, `GET /layers/{id}`,
/// `DELETE /layers/{id}`, `GET/POST /settings/{key}`, `GET /backup/export`,
/// `POST /backup/import`) are interchangeable.
pub trait LayerStore: Send + Sync {
    fn list(&self) -> Result<Vec<LayerSummary>, LkError>;
    fn get(&self, id: &str) -> Result<Option<Layer>, LkError>;
    /// Upsert keyed by the layer's id. Callers generate new ids for what
    /// should be new layers.
    fn put(&self, layer: &Layer) -> Result<(), LkError>;
    fn delete(&self, id: &str) -> Result<bool, LkError>;
    fn get_setting(&self, key: &str) -> Result<Option<JsonValue>, LkError>;
    fn set_setting(&self, key: &str, value: &JsonValue) -> Result<(), LkError>;
    fn export(&self) -> Result<BackupBundle, LkError>;
    /// Clear-then-repopulate, best effort. Not transactional: a crash mid
    /// restore leaves a partial store, and the operation is re-runnable.
    fn import(&self, bundle: &BackupBundle) -> Result<(), LkError>;
}

/// Full-store backup: every layer and every setting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupBundle {
    pub layers: Vec<Layer>,
    pub settings: BTreeMap<String, JsonValue>,
}

const LAYERS_TREE: &str = "layers";
const SETTINGS_TREE: &str = "settings";

/// Embedded sled-backed store. Layers and settings live in named trees;
/// earlier versions wrote layer blobs at the environment root, which is
/// migrated once on open.
pub struct EmbeddedStore {
    db: Db,
    layers: Tree,
    settings: Tree,
}

impl EmbeddedStore {
    pub fn open(path: impl AsRef<Path>, clear_legacy: bool) -> Result<Self, LkError> {
        let db = sled::Config::new()
            .path(path.as_ref())
            .flush_every_ms(Some(1000))
            .open()?;
        let layers = db.open_tree(LAYERS_TREE)?;
        let settings = db.open_tree(SETTINGS_TREE)?;
        let store = Self {
            db,
            layers,
            settings,
        };
        store.migrate_legacy(clear_legacy)?;
        Ok(store)
    }

    /// One-time migration of root-level legacy layer blobs into the layers
    /// tree. A settings marker makes the pass a no-op on every later open.
    fn migrate_legacy(&self, clear_legacy: bool) -> Result<(), LkError> {
        if self.settings.contains_key(settings_keys::LEGACY_MIGRATED)? {
            return Ok(());
        }

        let mut migrated = 0usize;
        let mut legacy_keys = Vec::new();
        for entry in self.db.iter() {
            let (key, value) = entry?;
            match serde_json::from_slice::<Layer>(&value) {
                Ok(layer) => {
                    if !self.layers.contains_key(layer.id.as_bytes())? {
                        self.layers.insert(layer.id.as_bytes(), value.to_vec())?;
                        migrated += 1;
                    }
                    legacy_keys.push(key);
                }
                Err(e) => {
                    warn!("skipping unreadable legacy record: {e}");
                }
            }
        }
        if clear_legacy {
            for key in legacy_keys {
                self.db.remove(key)?;
            }
        }
        self.settings.insert(
            settings_keys::LEGACY_MIGRATED,
            serde_json::to_vec(&JsonValue::Bool(true))?,
        )?;
        self.db.flush()?;
        if migrated > 0 {
            info!("migrated {migrated} legacy layer records");
        }
        Ok(())
    }
}

impl LayerStore for EmbeddedStore {
    fn list(&self) -> Result<Vec<LayerSummary>, LkError> {
        let mut summaries = Vec::new();
        for entry in self.layers.iter() {
            let (_, value) = entry?;
            let layer: Layer = serde_json::from_slice(&value)?;
            summaries.push(layer.summary());
        }
        Ok(summaries)
    }

    fn get(&self, id: &str) -> Result<Option<Layer>, LkError> {
        match self.layers.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&self, layer: &Layer) -> Result<(), LkError> {
        let bytes = serde_json::to_vec(layer)?;
        self.layers.insert(layer.id.as_bytes(), bytes)?;
        self.db.flush()?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool, LkError> {
        let removed = self.layers.remove(id.as_bytes())?.is_some();
        if removed {
            self.db.flush()?;
        }
        Ok(removed)
    }

    fn get_setting(&self, key: &str) -> Result<Option<JsonValue>, LkError> {
        match self.settings.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set_setting(&self, key: &str, value: &JsonValue) -> Result<(), LkError> {
        self.settings
            .insert(key.as_bytes(), serde_json::to_vec(value)?)?;
        self.db.flush()?;
        Ok(())
    }

    fn export(&self) -> Result<BackupBundle, LkError> {
        let mut layers = Vec::new();
        for entry in self.layers.iter() {
            let (_, value) = entry?;
            layers.push(serde_json::from_slice(&value)?);
        }
        let mut settings = BTreeMap::new();
        for entry in self.settings.iter() {
            let (key, value) = entry?;
            let key = String::from_utf8_lossy(&key).to_string();
            settings.insert(key, serde_json::from_slice(&value)?);
        }
        Ok(BackupBundle { layers, settings })
    }

    fn import(&self, bundle: &BackupBundle) -> Result<(), LkError> {
        self.layers.clear()?;
        self.settings.clear()?;
        for layer in &bundle.layers {
            self.layers
                .insert(layer.id.as_bytes(), serde_json::to_vec(layer)?)?;
        }
        for (key, value) in &bundle.settings {
            self.settings
                .insert(key.as_bytes(), serde_json::to_vec(value)?)?;
        }
        self.db.flush()?;
        info!(
            "imported {} layers and {} settings",
            bundle.layers.len(),
            bundle.settings.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{LayerCategory, LayerMetadata, LayerStatus, Realm};
    use chrono::Utc;
    use geojson::FeatureCollection;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_layer(id: &str, name: &str) -> Layer {
        Layer {
            id: id.to_string(),
            metadata: LayerMetadata {
                name: name.to_string(),
                file_name: format!("{name}.geojson"),
                category: LayerCategory::ProtectedArea,
                target_codes: vec!["T1".to_string()],
                realm: Realm::Terrestrial,
                counts_toward_30x30: true,
                source_crs: "EPSG:4326".to_string(),
                crs_ambiguous: false,
                feature_count: 0,
                valid_geometry_count: 0,
                dropped_sliver_count: 0,
                total_area_ha: 0.0,
                status: LayerStatus::Clean,
                uploaded_by: None,
                created_at: Utc::now(),
            },
            collection: FeatureCollection {
                bbox: None,
                features: vec![],
                foreign_members: None,
            },
        }
    }

    #[test]
    fn put_get_list_delete_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = EmbeddedStore::open(dir.path().join("store"), true).unwrap();

        assert!(store.get("missing").unwrap().is_none());
        assert!(!store.delete("missing").unwrap());

        let layer = test_layer("a", "Forest Reserves");
        store.put(&layer).unwrap();
        store.put(&test_layer("b", "Mangroves")).unwrap();

        let fetched = store.get("a").unwrap().unwrap();
        assert_eq!(fetched.metadata.name, "Forest Reserves");
        assert_eq!(store.list().unwrap().len(), 2);

        // Re-saving the same id overwrites.
        store.put(&test_layer("a", "Forest Reserves v2")).unwrap();
        assert_eq!(store.list().unwrap().len(), 2);
        assert_eq!(
            store.get("a").unwrap().unwrap().metadata.name,
            "Forest Reserves v2"
        );

        assert!(store.delete("a").unwrap());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn settings_substore_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = EmbeddedStore::open(dir.path().join("store"), true).unwrap();

        assert!(store.get_setting("theme").unwrap().is_none());
        store.set_setting("theme", &json!({"dark": true})).unwrap();
        assert_eq!(
            store.get_setting("theme").unwrap(),
            Some(json!({"dark": true}))
        );
    }

    #[test]
    fn export_import_reproduces_store() {
        let dir = TempDir::new().unwrap();
        let store = EmbeddedStore::open(dir.path().join("store"), true).unwrap();
        store.put(&test_layer("a", "Forest Reserves")).unwrap();
        store.put(&test_layer("b", "Mangroves")).unwrap();
        store.set_setting("zoom", &json!(5.5)).unwrap();

        let bundle = store.export().unwrap();

        let dir2 = TempDir::new().unwrap();
        let other = EmbeddedStore::open(dir2.path().join("store"), true).unwrap();
        other.import(&bundle).unwrap();

        let mut ids: Vec<String> = other.list().unwrap().into_iter().map(|s| s.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(other.get_setting("zoom").unwrap(), Some(json!(5.5)));

        // Import is re-runnable.
        other.import(&bundle).unwrap();
        assert_eq!(other.list().unwrap().len(), 2);
    }

    #[test]
    fn legacy_root_records_migrate_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");

        // Seed a legacy-format record at the environment root.
        {
            let db = sled::open(&path).unwrap();
            let layer = test_layer("legacy-1", "Old Upload");
            db.insert("legacy-1", serde_json::to_vec(&layer).unwrap())
                .unwrap();
            db.flush().unwrap();
        }

        {
            let store = EmbeddedStore::open(&path, true).unwrap();
            let summaries = store.list().unwrap();
            assert_eq!(summaries.len(), 1);
            assert_eq!(summaries[0].id, "legacy-1");
            // Legacy source was cleared.
            assert_eq!(store.db.iter().count(), 0);
        }

        // Second open is a no-op.
        let store = EmbeddedStore::open(&path, true).unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
