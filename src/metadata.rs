use chrono::{DateTime, Utc};
use geojson::FeatureCollection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::area::AreaReport;
use crate::normalize::NormalizedCollection;

/// Fixed classification set for uploaded layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayerCategory {
    CommunityConservedArea,
    MarineProtectedArea,
    ProtectedArea,
    Oecm,
    KeyBiodiversityArea,
    RestorationSite,
    InvasiveSpeciesArea,
    Other,
}

impl LayerCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommunityConservedArea => "community-conserved-area",
            Self::MarineProtectedArea => "marine-protected-area",
            Self::ProtectedArea => "protected-area",
            Self::Oecm => "oecm",
            Self::KeyBiodiversityArea => "key-biodiversity-area",
            Self::RestorationSite => "restoration-site",
            Self::InvasiveSpeciesArea => "invasive-species-area",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Realm {
    Terrestrial,
    Marine,
}

impl Realm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Terrestrial => "terrestrial",
            Self::Marine => "marine",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerStatus {
    Clean,
    HasIssues,
    Failed,
}

/// User-supplied classification accompanying an upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInput {
    pub name: String,
    pub file_name: String,
    pub category: LayerCategory,
    pub target_codes: Vec<String>,
    pub realm: Realm,
    pub counts_toward_30x30: bool,
    pub uploaded_by: Option<String>,
}

/// Descriptive record for a stored layer. Created once at ingestion and never
/// mutated in place; corrections produce a new layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerMetadata {
    pub name: String,
    pub file_name: String,
    pub category: LayerCategory,
    pub target_codes: Vec<String>,
    pub realm: Realm,
    pub counts_toward_30x30: bool,
    pub source_crs: String,
    pub crs_ambiguous: bool,
    pub feature_count: usize,
    pub valid_geometry_count: usize,
    pub dropped_sliver_count: usize,
    /// Rounded to one decimal hectare; per-feature values keep full precision.
    pub total_area_ha: f64,
    pub status: LayerStatus,
    pub uploaded_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An immutable-once-saved aggregate of metadata plus geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub id: String,
    pub metadata: LayerMetadata,
    pub collection: FeatureCollection,
}

impl Layer {
    pub fn summary(&self) -> LayerSummary {
        LayerSummary {
            id: self.id.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Listing record: everything but the geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSummary {
    pub id: String,
    pub metadata: LayerMetadata,
}

/// Round an area figure to one decimal hectare. Applied at the metadata and
/// summary level only.
pub fn round_ha(area_ha: f64) -> f64 {
    (area_ha * 10.0).round() / 10.0
}

/// Build the metadata record for a normalized, area-annotated collection.
///
/// Deterministic given identical inputs aside from the generated id and
/// timestamp. A `Failed` status set by the normalizer is preserved; otherwise
/// the layer is `Clean` only when every retained feature is valid and the
/// source reference system was not ambiguous.
pub fn build_metadata(
    input: &UserInput,
    normalized: &NormalizedCollection,
    areas: &AreaReport,
) -> LayerMetadata {
    let feature_count = normalized.collection.features.len();
    let status = match normalized.status {
        LayerStatus::Failed => LayerStatus::Failed,
        _ => {
            if normalized.valid_geometry_count == feature_count && !normalized.crs_ambiguous {
                LayerStatus::Clean
            } else {
                LayerStatus::HasIssues
            }
        }
    };

    LayerMetadata {
        name: input.name.clone(),
        file_name: input.file_name.clone(),
        category: input.category,
        target_codes: input.target_codes.clone(),
        realm: input.realm,
        counts_toward_30x30: input.counts_toward_30x30,
        source_crs: normalized.detected_crs.clone(),
        crs_ambiguous: normalized.crs_ambiguous,
        feature_count,
        valid_geometry_count: normalized.valid_geometry_count,
        dropped_sliver_count: normalized.dropped_sliver_count,
        total_area_ha: round_ha(areas.total_area_ha),
        status,
        uploaded_by: input.uploaded_by.clone(),
        created_at: Utc::now(),
    }
}

/// Assemble a full layer with a freshly generated id.
pub fn new_layer(metadata: LayerMetadata, collection: FeatureCollection) -> Layer {
    Layer {
        id: Uuid::new_v4().to_string(),
        metadata,
        collection,
    }
}
