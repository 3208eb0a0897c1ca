use geojson::{Feature, FeatureCollection, Geometry, Value};
use serde_json::{json, Map};

use crate::area::compute_areas;
use crate::config::EngineConfig;
use crate::error::LkError;
use crate::metadata::{build_metadata, Layer, LayerCategory, Realm, UserInput};
use crate::normalize::normalize;

/// Built-in demonstration layers, used when the durable store is empty or
/// unreadable. They run through the real ingestion pipeline so their metadata
/// is honest; ids are stable so re-seeding is idempotent.
pub fn demo_layers(config: &EngineConfig) -> Result<Vec<Layer>, LkError> {
    Ok(vec![
        demo_layer(
            config,
            "demo-terrestrial-pa",
            UserInput {
                name: "Demonstration Protected Area".to_string(),
                file_name: "demo_protected_area.geojson".to_string(),
                category: LayerCategory::ProtectedArea,
                target_codes: vec!["T3".to_string()],
                realm: Realm::Terrestrial,
                counts_toward_30x30: true,
                uploaded_by: None,
            },
            square(121.1, 16.4, 0.05, "Nueva Vizcaya"),
        )?,
        demo_layer(
            config,
            "demo-marine-mpa",
            UserInput {
                name: "Demonstration Marine Protected Area".to_string(),
                file_name: "demo_mpa.geojson".to_string(),
                category: LayerCategory::MarineProtectedArea,
                target_codes: vec!["T3".to_string()],
                realm: Realm::Marine,
                counts_toward_30x30: true,
                uploaded_by: None,
            },
            square(119.8, 10.7, 0.1, "Palawan"),
        )?,
    ])
}

fn demo_layer(
    config: &EngineConfig,
    id: &str,
    input: UserInput,
    feature: Feature,
) -> Result<Layer, LkError> {
    let collection = FeatureCollection {
        bbox: None,
        features: vec![feature],
        foreign_members: None,
    };
    let mut normalized = normalize(collection, Some("EPSG:4326"), config)?;
    let areas = compute_areas(&mut normalized);
    let metadata = build_metadata(&input, &normalized, &areas);
    Ok(Layer {
        id: id.to_string(),
        metadata,
        collection: normalized.collection,
    })
}

fn square(lon: f64, lat: f64, size: f64, province: &str) -> Feature {
    let ring = vec![
        vec![lon, lat],
        vec![lon + size, lat],
        vec![lon + size, lat + size],
        vec![lon, lat + size],
        vec![lon, lat],
    ];
    let mut properties = Map::new();
    properties.insert("province".to_string(), json!(province));
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::Polygon(vec![ring]))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::LayerStatus;

    #[test]
    fn demo_layers_are_clean_and_stable() {
        let config = EngineConfig::default();
        let layers = demo_layers(&config).unwrap();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].id, "demo-terrestrial-pa");
        assert_eq!(layers[1].id, "demo-marine-mpa");
        for layer in &layers {
            assert_eq!(layer.metadata.status, LayerStatus::Clean);
            assert!(layer.metadata.total_area_ha > 0.0);
        }
        // Seeding twice produces identical ids.
        let again = demo_layers(&config).unwrap();
        assert_eq!(again[0].id, layers[0].id);
    }
}
