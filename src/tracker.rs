use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::LkError;
use crate::metadata::{LayerCategory, Realm};

/// Static catalogue entry: one nationally expected dataset slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedLayerSlot {
    pub id: String,
    pub display_name: String,
    pub category: LayerCategory,
    pub target_code: String,
    pub realm: Realm,
    pub counts_toward_30x30: bool,
    pub description: String,
}

/// The expected-layer catalogue, loaded once. Reference data, not user data.
#[derive(Debug, Clone)]
pub struct ExpectedCatalog {
    slots: Vec<ExpectedLayerSlot>,
}

impl ExpectedCatalog {
    pub fn new(slots: Vec<ExpectedLayerSlot>) -> Self {
        Self { slots }
    }

    pub fn slots(&self) -> &[ExpectedLayerSlot] {
        &self.slots
    }

    pub fn get(&self, slot_id: &str) -> Option<&ExpectedLayerSlot> {
        self.slots.iter().find(|s| s.id == slot_id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// The national slot list shipped with the engine.
pub fn default_catalog() -> ExpectedCatalog {
    fn slot(
        id: &str,
        display_name: &str,
        category: LayerCategory,
        target_code: &str,
        realm: Realm,
        counts: bool,
        description: &str,
    ) -> ExpectedLayerSlot {
        ExpectedLayerSlot {
            id: id.to_string(),
            display_name: display_name.to_string(),
            category,
            target_code: target_code.to_string(),
            realm,
            counts_toward_30x30: counts,
            description: description.to_string(),
        }
    }

    ExpectedCatalog::new(vec![
        slot(
            "protected-areas",
            "Protected Areas",
            LayerCategory::ProtectedArea,
            "T3",
            Realm::Terrestrial,
            true,
            "Legislated terrestrial protected areas",
        ),
        slot(
            "marine-protected-areas",
            "Marine Protected Areas",
            LayerCategory::MarineProtectedArea,
            "T3",
            Realm::Marine,
            true,
            "Designated marine protected areas",
        ),
        slot(
            "community-conserved-areas",
            "Community Conserved Areas",
            LayerCategory::CommunityConservedArea,
            "T3",
            Realm::Terrestrial,
            true,
            "Indigenous and community conserved areas",
        ),
        slot(
            "oecms",
            "Other Effective Conservation Measures",
            LayerCategory::Oecm,
            "T3",
            Realm::Terrestrial,
            true,
            "OECM sites outside the formal protected estate",
        ),
        slot(
            "key-biodiversity-areas",
            "Key Biodiversity Areas",
            LayerCategory::KeyBiodiversityArea,
            "T1",
            Realm::Terrestrial,
            false,
            "Sites of global biodiversity importance",
        ),
        slot(
            "restoration-sites",
            "Restoration Sites",
            LayerCategory::RestorationSite,
            "T2",
            Realm::Terrestrial,
            false,
            "Active ecosystem restoration sites",
        ),
        slot(
            "invasive-species-zones",
            "Invasive Species Zones",
            LayerCategory::InvasiveSpeciesArea,
            "T6",
            Realm::Terrestrial,
            false,
            "Mapped invasive species management zones",
        ),
    ])
}

/// Link from an expected slot to the uploaded layer fulfilling it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerEntry {
    pub layer_id: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Completeness of the expected-layer catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completeness {
    pub fulfilled: usize,
    pub expected: usize,
}

impl fmt::Display for Completeness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.fulfilled, self.expected)
    }
}

/// Mapping from slot id to the layer fulfilling it. At most one entry per
/// slot; re-tracking replaces the link and orphans the previous layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpectedLayerTracker {
    entries: BTreeMap<String, TrackerEntry>,
}

impl ExpectedLayerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link a layer to a slot. Last write wins.
    pub fn track(&mut self, slot_id: &str, layer_id: &str) {
        self.entries.insert(
            slot_id.to_string(),
            TrackerEntry {
                layer_id: layer_id.to_string(),
                uploaded_at: Utc::now(),
            },
        );
    }

    /// Remove the link for a slot. Returns the removed entry, if any.
    pub fn untrack(&mut self, slot_id: &str) -> Option<TrackerEntry> {
        self.entries.remove(slot_id)
    }

    pub fn entry(&self, slot_id: &str) -> Option<&TrackerEntry> {
        self.entries.get(slot_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &TrackerEntry)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Layer ids referenced by fulfilled slots, keeping only those for which
    /// `exists` holds. A stale reference is a soft inconsistency: the slot is
    /// simply treated as unfulfilled.
    pub fn resolve_fulfilled(&self, exists: impl Fn(&str) -> bool) -> Vec<String> {
        self.entries
            .values()
            .map(|e| e.layer_id.clone())
            .filter(|id| exists(id))
            .collect()
    }

    pub fn completeness(&self, catalog: &ExpectedCatalog) -> Completeness {
        self.completeness_filtered(catalog, None, None)
    }

    /// Completeness over the subset of the catalogue matching the filters.
    pub fn completeness_filtered(
        &self,
        catalog: &ExpectedCatalog,
        realm: Option<Realm>,
        target_code: Option<&str>,
    ) -> Completeness {
        let matching: Vec<_> = catalog
            .slots()
            .iter()
            .filter(|s| realm.is_none_or(|r| s.realm == r))
            .filter(|s| target_code.is_none_or(|t| s.target_code == t))
            .collect();
        let fulfilled = matching
            .iter()
            .filter(|s| self.entries.contains_key(&s.id))
            .count();
        Completeness {
            fulfilled,
            expected: matching.len(),
        }
    }

    // ── Snapshot persistence ────────────────────────────────────────────────

    pub fn to_snapshot(&self) -> Result<JsonValue, LkError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_snapshot(value: &JsonValue) -> Result<Self, LkError> {
        Ok(serde_json::from_value(value.clone())?)
    }
}
