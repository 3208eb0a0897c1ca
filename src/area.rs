use geo::{ChamberlainDuquetteArea, MultiPolygon, Polygon};
use geojson::{Feature, Value};

use crate::normalize::NormalizedCollection;
use crate::schema::attrs;

const M2_PER_HECTARE: f64 = 10_000.0;

/// Totals from the area pass. `total_area_ha` keeps full precision; rounding
/// to 0.1 ha happens at the metadata and summary level.
#[derive(Debug, Clone, Copy)]
pub struct AreaReport {
    pub total_area_ha: f64,
    pub measured_features: usize,
}

/// Attach an `area_ha` attribute to every feature of a normalized collection.
///
/// Area is spherical (Chamberlain-Duquette), so the figure is insensitive to
/// latitude distortion; planar degree-space area is never reported. Features
/// without polygonal geometry, and features tagged with an `issue` attribute,
/// get `area_ha = 0` so rejects never inflate totals.
///
/// This runs on the collection as it will be stored, after sliver removal and
/// simplification, which keeps `sum(area_ha)` reconcilable with the persisted
/// features.
pub fn compute_areas(normalized: &mut NormalizedCollection) -> AreaReport {
    let mut total_area_ha = 0.0;
    let mut measured_features = 0;

    for feature in &mut normalized.collection.features {
        let area_ha = feature_area_ha(feature);
        if area_ha > 0.0 {
            measured_features += 1;
        }
        total_area_ha += area_ha;
        feature.set_property(attrs::AREA_HA, area_ha);
    }

    AreaReport {
        total_area_ha,
        measured_features,
    }
}

fn feature_area_ha(feature: &Feature) -> f64 {
    if feature.property(attrs::ISSUE).is_some() {
        return 0.0;
    }
    let Some(geometry) = feature.geometry.as_ref() else {
        return 0.0;
    };
    let area_m2 = match &geometry.value {
        Value::Polygon(_) => Polygon::<f64>::try_from(geometry.value.clone())
            .map(|p| p.chamberlain_duquette_unsigned_area())
            .unwrap_or(0.0),
        Value::MultiPolygon(_) => MultiPolygon::<f64>::try_from(geometry.value.clone())
            .map(|m| m.chamberlain_duquette_unsigned_area())
            .unwrap_or(0.0),
        _ => 0.0,
    };
    area_m2 / M2_PER_HECTARE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::normalize::normalize;
    use geojson::{FeatureCollection, Geometry};
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

    fn point(lon: f64, lat: f64) -> Feature {
        Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::Point(vec![lon, lat]))),
            id: None,
            properties: Some(Map::new()),
            foreign_members: None,
        }
    }

    #[test]
    fn areas_are_positive_and_reconcile_with_total() {
        let collection = FeatureCollection {
            bbox: None,
            features: vec![
                square(120.0, 10.0, 0.01),
                square(121.0, 14.0, 0.02),
                point(122.0, 8.0),
            ],
            foreign_members: None,
        };
        let mut normalized = normalize(collection, None, &EngineConfig::default()).unwrap();
        let report = compute_areas(&mut normalized);

        let mut sum = 0.0;
        for feature in &normalized.collection.features {
            let area = feature
                .property(attrs::AREA_HA)
                .and_then(|v| v.as_f64())
                .unwrap();
            assert!(area >= 0.0);
            sum += area;
        }
        assert!((sum - report.total_area_ha).abs() < 0.1);
        assert_eq!(report.measured_features, 2);
    }

    #[test]
    fn a_degree_hundredth_square_is_around_120_hectares() {
        let collection = FeatureCollection {
            bbox: None,
            features: vec![square(120.0, 10.0, 0.01)],
            foreign_members: None,
        };
        let mut normalized = normalize(collection, None, &EngineConfig::default()).unwrap();
        let report = compute_areas(&mut normalized);
        assert!(report.total_area_ha > 100.0 && report.total_area_ha < 140.0);
    }

    #[test]
    fn points_and_flagged_features_get_zero() {
        let unclosed = Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::Polygon(vec![vec![
                vec![120.0, 10.0],
                vec![120.1, 10.0],
                vec![120.1, 10.1],
                vec![120.0, 10.1],
            ]]))),
            id: None,
            properties: Some(Map::new()),
            foreign_members: None,
        };
        let collection = FeatureCollection {
            bbox: None,
            features: vec![point(120.0, 10.0), unclosed],
            foreign_members: None,
        };
        let mut normalized = normalize(collection, None, &EngineConfig::default()).unwrap();
        let report = compute_areas(&mut normalized);
        assert_eq!(report.total_area_ha, 0.0);
        for feature in &normalized.collection.features {
            assert_eq!(
                feature.property(attrs::AREA_HA).and_then(|v| v.as_f64()),
                Some(0.0)
            );
        }
    }
}
