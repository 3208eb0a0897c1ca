use std::f64::consts::PI;

use geo::{ChamberlainDuquetteArea, MultiPolygon, Polygon, Simplify, Validation};
use geojson::{Feature, FeatureCollection, Geometry, Value};
use log::{info, warn};

use crate::config::EngineConfig;
use crate::error::LkError;
use crate::metadata::LayerStatus;
use crate::schema::{attrs, crs, issues};

const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Output of the normalizer: a collection guaranteed to be in the working
/// reference system, with slivers dropped and invalid features tagged.
#[derive(Debug, Clone)]
pub struct NormalizedCollection {
    pub collection: FeatureCollection,
    /// Features in the input, before sliver removal.
    pub feature_count: usize,
    pub valid_geometry_count: usize,
    pub invalid_count: usize,
    pub dropped_sliver_count: usize,
    /// The source reference system as detected, not the working system.
    pub detected_crs: String,
    /// Set when the source system had to be assumed and the coordinate-range
    /// heuristic could not confirm the assumption, or when a declared system
    /// is one this engine cannot normalize.
    pub crs_ambiguous: bool,
    pub status: LayerStatus,
}

/// Clean and normalize a raw feature collection.
///
/// CRS handling never reprojects on a guess: a declared geographic system is
/// accepted as-is, declared web mercator is unprojected with the closed-form
/// inverse, any other declaration is recorded verbatim and flagged. With no
/// declaration the working system is assumed and confirmed (or not) by a
/// coordinate-range check.
///
/// Degenerate features are tagged with an `issue` attribute and retained for
/// inspection; slivers below the configured threshold are dropped outright.
/// Surviving polygons are simplified here, before any area is computed, so
/// reported area is always the area of what is stored.
pub fn normalize(
    collection: FeatureCollection,
    declared_crs: Option<&str>,
    config: &EngineConfig,
) -> Result<NormalizedCollection, LkError> {
    let feature_count = collection.features.len();
    if feature_count > config.max_features_per_layer {
        return Err(LkError::TooManyFeatures(feature_count));
    }

    let (mut collection, detected_crs, crs_ambiguous) = resolve_crs(collection, declared_crs);

    let mut kept: Vec<Feature> = Vec::with_capacity(feature_count);
    let mut valid_geometry_count = 0usize;
    let mut invalid_count = 0usize;
    let mut dropped_sliver_count = 0usize;

    for mut feature in collection.features.drain(..) {
        match assess(&feature) {
            Assessment::NonPolygonal => {
                valid_geometry_count += 1;
                kept.push(feature);
            }
            Assessment::Invalid(issue) => {
                feature.set_property(attrs::ISSUE, issue);
                invalid_count += 1;
                kept.push(feature);
            }
            Assessment::Polygon(polygon) => {
                let area_m2 = polygon.chamberlain_duquette_unsigned_area();
                if area_m2 < config.sliver_threshold_m2 {
                    dropped_sliver_count += 1;
                    continue;
                }
                let polygon = maybe_simplify(polygon, config.simplify_tolerance_deg);
                feature.geometry = Some(Geometry::new(Value::from(&polygon)));
                valid_geometry_count += 1;
                kept.push(feature);
            }
            Assessment::MultiPolygon(multi) => {
                let area_m2 = multi.chamberlain_duquette_unsigned_area();
                if area_m2 < config.sliver_threshold_m2 {
                    dropped_sliver_count += 1;
                    continue;
                }
                let multi = maybe_simplify(multi, config.simplify_tolerance_deg);
                feature.geometry = Some(Geometry::new(Value::from(&multi)));
                valid_geometry_count += 1;
                kept.push(feature);
            }
        }
    }

    let assessed = valid_geometry_count + invalid_count;
    let invalid_ratio = if assessed == 0 {
        0.0
    } else {
        invalid_count as f64 / assessed as f64
    };

    let status = if invalid_ratio > config.max_invalid_ratio {
        warn!(
            "layer failed normalization: {invalid_count} of {assessed} features invalid (ratio {invalid_ratio:.2})"
        );
        LayerStatus::Failed
    } else if invalid_count > 0 || crs_ambiguous {
        LayerStatus::HasIssues
    } else {
        LayerStatus::Clean
    };

    info!(
        "normalized {feature_count} features: {valid_geometry_count} valid, \
         {invalid_count} invalid, {dropped_sliver_count} slivers dropped ({detected_crs})"
    );

    collection.features = kept;
    Ok(NormalizedCollection {
        collection,
        feature_count,
        valid_geometry_count,
        invalid_count,
        dropped_sliver_count,
        detected_crs,
        crs_ambiguous,
        status,
    })
}

// ── CRS handling ────────────────────────────────────────────────────────────

fn resolve_crs(
    collection: FeatureCollection,
    declared: Option<&str>,
) -> (FeatureCollection, String, bool) {
    match declared {
        Some(declared) if crs::GEOGRAPHIC_ALIASES.contains(&declared) => {
            (collection, crs::WORKING.to_string(), false)
        }
        Some(declared) if crs::WEB_MERCATOR_ALIASES.contains(&declared) => {
            let mut collection = collection;
            for feature in &mut collection.features {
                if let Some(geometry) = feature.geometry.as_mut() {
                    unproject_mercator(&mut geometry.value);
                }
            }
            (collection, crs::WEB_MERCATOR.to_string(), false)
        }
        Some(declared) => {
            // Declared but not a system this engine can normalize. Keep the
            // coordinates untouched and record the declaration honestly.
            warn!("declared CRS '{declared}' is not supported; coordinates left as-is");
            (collection, declared.to_string(), true)
        }
        None => {
            let confirmed = collection
                .features
                .iter()
                .filter_map(|f| f.geometry.as_ref())
                .all(|g| within_geographic_range(&g.value));
            if !confirmed {
                warn!("no declared CRS and coordinates exceed geographic range");
            }
            (collection, crs::WORKING.to_string(), !confirmed)
        }
    }
}

fn within_geographic_range(value: &Value) -> bool {
    fn position_ok(position: &[f64]) -> bool {
        position.len() >= 2 && position[0].abs() <= 180.0 && position[1].abs() <= 90.0
    }
    match value {
        Value::Point(p) => position_ok(p),
        Value::MultiPoint(ps) | Value::LineString(ps) => ps.iter().all(|p| position_ok(p)),
        Value::MultiLineString(lines) | Value::Polygon(lines) => lines
            .iter()
            .all(|line| line.iter().all(|p| position_ok(p))),
        Value::MultiPolygon(polygons) => polygons
            .iter()
            .all(|rings| rings.iter().all(|ring| ring.iter().all(|p| position_ok(p)))),
        Value::GeometryCollection(geometries) => geometries
            .iter()
            .all(|g| within_geographic_range(&g.value)),
    }
}

fn unproject_mercator(value: &mut Value) {
    fn unproject(position: &mut Vec<f64>) {
        if position.len() < 2 {
            return;
        }
        let lon = position[0] / EARTH_RADIUS_M * 180.0 / PI;
        let lat = ((position[1] / EARTH_RADIUS_M).exp().atan() * 2.0 - PI / 2.0) * 180.0 / PI;
        position[0] = lon;
        position[1] = lat;
    }
    match value {
        Value::Point(p) => unproject(p),
        Value::MultiPoint(ps) | Value::LineString(ps) => ps.iter_mut().for_each(unproject),
        Value::MultiLineString(lines) | Value::Polygon(lines) => lines
            .iter_mut()
            .for_each(|line| line.iter_mut().for_each(unproject)),
        Value::MultiPolygon(polygons) => polygons.iter_mut().for_each(|rings| {
            rings
                .iter_mut()
                .for_each(|ring| ring.iter_mut().for_each(unproject))
        }),
        Value::GeometryCollection(geometries) => geometries
            .iter_mut()
            .for_each(|g| unproject_mercator(&mut g.value)),
    }
}

// ── Feature assessment ──────────────────────────────────────────────────────

enum Assessment {
    NonPolygonal,
    Invalid(&'static str),
    Polygon(Polygon<f64>),
    MultiPolygon(MultiPolygon<f64>),
}

fn assess(feature: &Feature) -> Assessment {
    let Some(geometry) = feature.geometry.as_ref() else {
        return Assessment::Invalid(issues::EMPTY_GEOMETRY);
    };
    match &geometry.value {
        Value::Point(_) | Value::MultiPoint(_) | Value::LineString(_) | Value::MultiLineString(_) => {
            Assessment::NonPolygonal
        }
        Value::GeometryCollection(_) => Assessment::Invalid(issues::UNSUPPORTED_TYPE),
        Value::Polygon(rings) => {
            if rings.is_empty() || rings.iter().any(|ring| ring_degenerate(ring)) {
                return Assessment::Invalid(issues::DEGENERATE_RING);
            }
            match Polygon::<f64>::try_from(geometry.value.clone()) {
                Ok(polygon) if polygon.is_valid() => Assessment::Polygon(polygon),
                Ok(_) => Assessment::Invalid(issues::SELF_INTERSECTION),
                Err(_) => Assessment::Invalid(issues::DEGENERATE_RING),
            }
        }
        Value::MultiPolygon(polygons) => {
            if polygons.is_empty()
                || polygons
                    .iter()
                    .any(|rings| rings.is_empty() || rings.iter().any(|ring| ring_degenerate(ring)))
            {
                return Assessment::Invalid(issues::DEGENERATE_RING);
            }
            match MultiPolygon::<f64>::try_from(geometry.value.clone()) {
                Ok(multi) if multi.is_valid() => Assessment::MultiPolygon(multi),
                Ok(_) => Assessment::Invalid(issues::SELF_INTERSECTION),
                Err(_) => Assessment::Invalid(issues::DEGENERATE_RING),
            }
        }
    }
}

impl NormalizedCollection {
    /// Strict gate for callers that refuse `Failed` layers outright instead
    /// of deciding later whether to store them for manual repair.
    pub fn require_acceptable(&self) -> Result<(), LkError> {
        if self.status == LayerStatus::Failed {
            return Err(LkError::ExcessiveInvalidRatio {
                invalid: self.invalid_count,
                total: self.valid_geometry_count + self.invalid_count,
            });
        }
        Ok(())
    }
}

/// Classify a single feature the way bulk ingestion would, as a typed result.
/// Bulk ingestion tags the same conditions as `issue` attributes instead of
/// aborting the layer.
pub fn check_feature(feature: &Feature) -> Result<(), LkError> {
    if let Assessment::Invalid(issue) = assess(feature) {
        return Err(if issue == issues::UNSUPPORTED_TYPE {
            LkError::UnsupportedGeometry(
                "GeometryCollection features are not supported".to_string(),
            )
        } else {
            LkError::InvalidData(issue.to_string())
        });
    }
    Ok(())
}

fn ring_degenerate(ring: &[Vec<f64>]) -> bool {
    ring.len() < 4 || ring.first() != ring.last() || ring.iter().any(|p| p.len() < 2)
}

fn maybe_simplify<G: Simplify<f64>>(geometry: G, tolerance_deg: f64) -> G {
    if tolerance_deg > 0.0 {
        geometry.simplify(&tolerance_deg)
    } else {
        geometry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn square(lon: f64, lat: f64, size: f64) -> Feature {
        let ring = vec![
            vec![lon, lat],
            vec![lon + size, lat],
            vec![lon + size, lat + size],
            vec![lon, lat + size],
            vec![lon, lat],
        ];
        Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::Polygon(vec![ring]))),
            id: None,
            properties: Some(Map::new()),
            foreign_members: None,
        }
    }

    fn collection(features: Vec<Feature>) -> FeatureCollection {
        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }

    #[test]
    fn slivers_are_dropped_and_counted() {
        // 0.01 deg squares are ~120 ha; 0.00001 deg squares are ~1.2 m2.
        let features = vec![
            square(120.0, 10.0, 0.01),
            square(121.0, 10.0, 0.01),
            square(122.0, 10.0, 0.00001),
            square(123.0, 10.0, 0.01),
            square(124.0, 10.0, 0.00001),
            square(125.0, 10.0, 0.01),
        ];
        let out = normalize(collection(features), None, &EngineConfig::default()).unwrap();
        assert_eq!(out.feature_count, 6);
        assert_eq!(out.dropped_sliver_count, 2);
        assert_eq!(out.collection.features.len(), 4);
        assert_eq!(out.valid_geometry_count, 4);
        assert_eq!(out.status, LayerStatus::Clean);
    }

    #[test]
    fn renormalizing_own_output_drops_nothing() {
        let features = vec![
            square(120.0, 10.0, 0.01),
            square(122.0, 10.0, 0.00001),
            square(123.0, 10.0, 0.01),
        ];
        let config = EngineConfig::default();
        let first = normalize(collection(features), None, &config).unwrap();
        let second = normalize(first.collection.clone(), None, &config).unwrap();
        assert_eq!(second.dropped_sliver_count, 0);
        assert_eq!(second.collection.features.len(), first.collection.features.len());
    }

    #[test]
    fn unclosed_ring_is_flagged_and_retained() {
        let ring = vec![
            vec![120.0, 10.0],
            vec![120.1, 10.0],
            vec![120.1, 10.1],
            vec![120.0, 10.1],
        ];
        let feature = Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::Polygon(vec![ring]))),
            id: None,
            properties: Some(Map::new()),
            foreign_members: None,
        };
        let out = normalize(
            collection(vec![feature, square(121.0, 10.0, 0.01)]),
            None,
            &EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(out.invalid_count, 1);
        assert_eq!(out.valid_geometry_count, 1);
        assert_eq!(out.collection.features.len(), 2);
        let issue = out.collection.features[0]
            .property(attrs::ISSUE)
            .and_then(|v| v.as_str());
        assert_eq!(issue, Some(issues::DEGENERATE_RING));
        assert_eq!(out.status, LayerStatus::HasIssues);
    }

    #[test]
    fn excessive_invalid_ratio_marks_layer_failed() {
        let bad = || Feature {
            bbox: None,
            geometry: None,
            id: None,
            properties: Some(Map::new()),
            foreign_members: None,
        };
        let out = normalize(
            collection(vec![bad(), bad(), square(120.0, 10.0, 0.01)]),
            None,
            &EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(out.status, LayerStatus::Failed);
    }

    #[test]
    fn declared_web_mercator_is_unprojected() {
        // (13_358_338.9, 1_118_890.0) in EPSG:3857 is close to (120 E, 10 N).
        let ring = vec![
            vec![13_358_338.9, 1_118_890.0],
            vec![13_359_338.9, 1_118_890.0],
            vec![13_359_338.9, 1_119_890.0],
            vec![13_358_338.9, 1_119_890.0],
            vec![13_358_338.9, 1_118_890.0],
        ];
        let feature = Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::Polygon(vec![ring]))),
            id: None,
            properties: Some(Map::new()),
            foreign_members: None,
        };
        let out = normalize(
            collection(vec![feature]),
            Some("EPSG:3857"),
            &EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(out.detected_crs, crs::WEB_MERCATOR);
        assert!(!out.crs_ambiguous);
        let Some(Geometry {
            value: Value::Polygon(rings),
            ..
        }) = out.collection.features[0].geometry.clone()
        else {
            panic!("expected polygon");
        };
        let p = &rings[0][0];
        assert!((p[0] - 120.0).abs() < 0.01);
        assert!((p[1] - 10.0).abs() < 0.01);
    }

    #[test]
    fn missing_crs_with_huge_coordinates_is_ambiguous() {
        let out = normalize(
            collection(vec![square(13_358_338.9, 10.0, 1000.0)]),
            None,
            &EngineConfig::default(),
        )
        .unwrap();
        assert!(out.crs_ambiguous);
        assert_eq!(out.status, LayerStatus::HasIssues);
    }

    #[test]
    fn check_feature_reports_typed_errors() {
        assert!(check_feature(&square(120.0, 10.0, 0.01)).is_ok());

        let collection_feature = Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::GeometryCollection(vec![]))),
            id: None,
            properties: Some(Map::new()),
            foreign_members: None,
        };
        assert!(matches!(
            check_feature(&collection_feature),
            Err(LkError::UnsupportedGeometry(_))
        ));

        let empty = Feature {
            bbox: None,
            geometry: None,
            id: None,
            properties: Some(Map::new()),
            foreign_members: None,
        };
        assert!(matches!(
            check_feature(&empty),
            Err(LkError::InvalidData(_))
        ));
    }

    #[test]
    fn failed_collection_fails_the_strict_gate() {
        let bad = || Feature {
            bbox: None,
            geometry: None,
            id: None,
            properties: Some(Map::new()),
            foreign_members: None,
        };
        let out = normalize(
            collection(vec![bad(), bad(), square(120.0, 10.0, 0.01)]),
            None,
            &EngineConfig::default(),
        )
        .unwrap();
        assert!(matches!(
            out.require_acceptable(),
            Err(LkError::ExcessiveInvalidRatio {
                invalid: 2,
                total: 3
            })
        ));
    }

    #[test]
    fn unknown_declared_crs_is_recorded_verbatim() {
        let out = normalize(
            collection(vec![square(120.0, 10.0, 0.01)]),
            Some("EPSG:32651"),
            &EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(out.detected_crs, "EPSG:32651");
        assert!(out.crs_ambiguous);
        assert_eq!(out.status, LayerStatus::HasIssues);
    }
}
