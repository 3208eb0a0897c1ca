/// Attribute names, alias tables and storage keys for conserve-layerkit.
/// Single source of truth for every string the engine reads or writes.

// ── Feature attributes ──────────────────────────────────────────────────────
pub mod attrs {
    pub const AREA_HA: &str = "area_ha";
    pub const ISSUE: &str = "issue";
    pub const PROVINCE: &str = "province";
    pub const STATUS: &str = "status";
}

// ── Issue attribute values ──────────────────────────────────────────────────
pub mod issues {
    pub const EMPTY_GEOMETRY: &str = "empty-geometry";
    pub const DEGENERATE_RING: &str = "degenerate-ring";
    pub const SELF_INTERSECTION: &str = "self-intersection";
    pub const UNSUPPORTED_TYPE: &str = "unsupported-geometry-type";
}

// ── Coordinate reference systems ────────────────────────────────────────────
pub mod crs {
    /// The working reference system every stored layer is normalized to.
    pub const WORKING: &str = "EPSG:4326";
    pub const WEB_MERCATOR: &str = "EPSG:3857";

    /// Declared spellings accepted as the working system.
    pub const GEOGRAPHIC_ALIASES: [&str; 4] = [
        "EPSG:4326",
        "epsg:4326",
        "urn:ogc:def:crs:OGC:1.3:CRS84",
        "CRS84",
    ];

    /// Declared spellings accepted as web mercator.
    pub const WEB_MERCATOR_ALIASES: [&str; 3] = ["EPSG:3857", "epsg:3857", "EPSG:900913"];
}

// ── Attribute alias resolution ──────────────────────────────────────────────
//
// Uploaded data arrives with heterogeneous field names. Each canonical field
// carries the list of accepted source spellings, checked in order.
pub mod aliases {
    use serde_json::Map;
    use serde_json::Value;

    pub struct AliasTable {
        pub canonical: &'static str,
        pub accepted: &'static [&'static str],
    }

    pub const PROVINCE: AliasTable = AliasTable {
        canonical: super::attrs::PROVINCE,
        accepted: &[
            "province",
            "Province",
            "PROVINCE",
            "PROV_NAME",
            "ADM1_EN",
            "NAME_1",
            "prov",
        ],
    };

    pub const STATUS: AliasTable = AliasTable {
        canonical: super::attrs::STATUS,
        accepted: &[
            "status",
            "Status",
            "STATUS",
            "threat",
            "threat_level",
            "condition",
        ],
    };

    /// Resolve a canonical field from a feature's property map.
    /// The first accepted spelling with a non-empty string value wins.
    pub fn resolve(properties: Option<&Map<String, Value>>, table: &AliasTable) -> Option<String> {
        let props = properties?;
        for name in table.accepted {
            if let Some(Value::String(s)) = props.get(*name) {
                let trimmed = s.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
        None
    }
}

// ── Settings keys ───────────────────────────────────────────────────────────
pub mod settings_keys {
    pub const TRACKER_SNAPSHOT: &str = "expected_layer_tracker";
    pub const LEGACY_MIGRATED: &str = "legacy_store_migrated";
}

// ── Summary columns ─────────────────────────────────────────────────────────
pub mod cols {
    pub const CATEGORY: &str = "category";
    pub const REALM: &str = "realm";
    pub const FEATURE_COUNT: &str = "feature_count";
    pub const AREA_SUM: &str = "area_ha_sum";
}

/// Bucket for features missing a grouping attribute. Keeping them explicit
/// lets grouped totals reconcile with the ungrouped total.
pub const UNKNOWN_BUCKET: &str = "Unknown";
