use serde::Deserialize;

use crate::error::LkError;

/// National land/sea area in hectares, the denominators for
/// percentage-of-baseline calculations. Loaded once, immutable afterwards.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct NationalBaseline {
    pub terrestrial_ha: f64,
    pub marine_ha: f64,
}

impl Default for NationalBaseline {
    fn default() -> Self {
        Self {
            terrestrial_ha: 30_000_000.0,
            marine_ha: 66_300_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBackend {
    LocalEmbedded,
    RemoteApi,
}

/// Process-wide configuration, loaded once at startup.
///
/// Map center/zoom and the auth provider belong to the surrounding portal
/// but share this config object.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Polygons below this planar area are digitizing artifacts, not real
    /// conservation area.
    pub sliver_threshold_m2: f64,
    /// Ramer-Douglas-Peucker tolerance, in degrees.
    pub simplify_tolerance_deg: f64,
    pub max_features_per_layer: usize,
    pub max_upload_mb: u64,
    /// Above this invalid/total ratio the whole layer is marked Failed.
    pub max_invalid_ratio: f64,
    pub baseline: NationalBaseline,
    pub map_center: [f64; 2],
    pub map_zoom: f64,
    pub storage: StorageBackend,
    pub auth_provider: String,
    pub clear_legacy_after_migration: bool,
    /// Per-strategy timeout for the initial-load fallback chain.
    pub load_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sliver_threshold_m2: 5.0,
            simplify_tolerance_deg: 0.0001,
            max_features_per_layer: 50_000,
            max_upload_mb: 100,
            max_invalid_ratio: 0.5,
            baseline: NationalBaseline::default(),
            map_center: [12.8797, 121.7740],
            map_zoom: 5.5,
            storage: StorageBackend::LocalEmbedded,
            auth_provider: "none".to_string(),
            clear_legacy_after_migration: true,
            load_timeout_ms: 3_000,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration document. Missing fields fall back to defaults;
    /// unrecognized fields are tolerated because the portal shares this
    /// config object.
    pub fn from_json(raw: &str) -> Result<Self, LkError> {
        let config: EngineConfig = serde_json::from_str(raw)?;
        if config.sliver_threshold_m2 < 0.0 {
            return Err(LkError::Validation(
                "sliver_threshold_m2 must be non-negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&config.max_invalid_ratio) {
            return Err(LkError::Validation(
                "max_invalid_ratio must be within 0..=1".to_string(),
            ));
        }
        Ok(config)
    }
}
