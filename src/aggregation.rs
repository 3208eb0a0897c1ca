use geo::{BoundingRect, Intersects, MultiPolygon, Polygon, Rect};
use geojson::Value;
use polars::prelude::*;
use serde::Serialize;

use crate::config::NationalBaseline;
use crate::error::LkError;
use crate::metadata::{round_ha, Layer, Realm};
use crate::schema::{aliases, attrs, cols, UNKNOWN_BUCKET};
use crate::tracker::ExpectedLayerTracker;

/// One bucket of a grouped total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupTotal {
    pub key: String,
    pub feature_count: u32,
    pub area_ha: f64,
}

/// Percentage-of-baseline progress for one realm.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealmProgress {
    pub realm: Realm,
    pub protected_ha: f64,
    pub baseline_ha: f64,
    /// Not clamped to 100: overlapping layers over-count, and that is
    /// reported rather than hidden.
    pub percent: f64,
    /// Best-effort hint that two counting layers of this realm overlap.
    pub may_double_count: bool,
}

/// Dashboard-ready summary. Derived on demand from the current layers and
/// tracker state; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedSummary {
    pub layer_count: usize,
    pub total_area_ha: f64,
    pub by_province: Vec<GroupTotal>,
    pub by_category: Vec<GroupTotal>,
    pub by_realm: Vec<GroupTotal>,
    pub by_status: Vec<GroupTotal>,
    pub thirty_by_thirty: Vec<RealmProgress>,
}

/// Compute every dashboard summary over the current layer set.
///
/// Layer selection is part of this engine: when any tracker entry resolves to
/// a stored layer, only fulfilled layers are summarized; otherwise every
/// stored layer is (demonstration fallback). Every summary type applies the
/// same selection.
pub fn summarize(
    layers: &[Layer],
    tracker: &ExpectedLayerTracker,
    baseline: &NationalBaseline,
) -> Result<AggregatedSummary, LkError> {
    let selected = select_dashboard_layers(layers, tracker);
    let table = feature_table(&selected)?;
    let total_area_ha = round_ha(table.column(attrs::AREA_HA)?.f64()?.sum().unwrap_or(0.0));

    Ok(AggregatedSummary {
        layer_count: selected.len(),
        total_area_ha,
        by_province: group_totals(&table, attrs::PROVINCE)?,
        by_category: group_totals(&table, cols::CATEGORY)?,
        by_realm: group_totals(&table, cols::REALM)?,
        by_status: group_totals(&table, attrs::STATUS)?,
        thirty_by_thirty: thirty_by_thirty(&selected, baseline),
    })
}

/// Canonical form used for province grouping: trimmed, inner whitespace
/// collapsed, title-cased. "  bataan " and "BATAAN" land in one bucket.
pub fn normalize_province(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn select_dashboard_layers<'a>(
    layers: &'a [Layer],
    tracker: &ExpectedLayerTracker,
) -> Vec<&'a Layer> {
    let fulfilled = tracker.resolve_fulfilled(|id| layers.iter().any(|l| l.id == id));
    if fulfilled.is_empty() {
        layers.iter().collect()
    } else {
        layers.iter().filter(|l| fulfilled.contains(&l.id)).collect()
    }
}

/// Flatten the selected layers into one row per feature. Missing grouping
/// attributes land in the explicit Unknown bucket so grouped totals always
/// reconcile with the ungrouped total.
fn feature_table(layers: &[&Layer]) -> Result<DataFrame, LkError> {
    let mut provinces: Vec<String> = Vec::new();
    let mut categories: Vec<String> = Vec::new();
    let mut realms: Vec<String> = Vec::new();
    let mut statuses: Vec<String> = Vec::new();
    let mut areas: Vec<f64> = Vec::new();

    for layer in layers {
        for feature in &layer.collection.features {
            provinces.push(
                aliases::resolve(feature.properties.as_ref(), &aliases::PROVINCE)
                    .map(|p| normalize_province(&p))
                    .unwrap_or_else(|| UNKNOWN_BUCKET.to_string()),
            );
            statuses.push(
                aliases::resolve(feature.properties.as_ref(), &aliases::STATUS)
                    .unwrap_or_else(|| UNKNOWN_BUCKET.to_string()),
            );
            categories.push(layer.metadata.category.as_str().to_string());
            realms.push(layer.metadata.realm.as_str().to_string());
            areas.push(
                feature
                    .property(attrs::AREA_HA)
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0),
            );
        }
    }

    let table = DataFrame::new(vec![
        Column::new(attrs::PROVINCE.into(), &provinces),
        Column::new(cols::CATEGORY.into(), &categories),
        Column::new(cols::REALM.into(), &realms),
        Column::new(attrs::STATUS.into(), &statuses),
        Column::new(attrs::AREA_HA.into(), &areas),
    ])?;
    Ok(table)
}

fn group_totals(table: &DataFrame, key: &str) -> Result<Vec<GroupTotal>, LkError> {
    let grouped = table
        .clone()
        .lazy()
        .group_by([col(key)])
        .agg([
            col(attrs::AREA_HA).count().alias(cols::FEATURE_COUNT),
            col(attrs::AREA_HA).sum().alias(cols::AREA_SUM),
        ])
        .collect()?;

    let keys = grouped.column(key)?.str()?;
    let counts = grouped.column(cols::FEATURE_COUNT)?.u32()?;
    let sums = grouped.column(cols::AREA_SUM)?.f64()?;

    let mut totals = Vec::with_capacity(grouped.height());
    for i in 0..grouped.height() {
        totals.push(GroupTotal {
            key: keys.get(i).unwrap_or(UNKNOWN_BUCKET).to_string(),
            feature_count: counts.get(i).unwrap_or(0),
            area_ha: round_ha(sums.get(i).unwrap_or(0.0)),
        });
    }
    totals.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(totals)
}

fn thirty_by_thirty(layers: &[&Layer], baseline: &NationalBaseline) -> Vec<RealmProgress> {
    [Realm::Terrestrial, Realm::Marine]
        .into_iter()
        .map(|realm| {
            let counting: Vec<&&Layer> = layers
                .iter()
                .filter(|l| l.metadata.realm == realm && l.metadata.counts_toward_30x30)
                .collect();
            let protected_ha: f64 = counting.iter().map(|l| l.metadata.total_area_ha).sum();
            let baseline_ha = match realm {
                Realm::Terrestrial => baseline.terrestrial_ha,
                Realm::Marine => baseline.marine_ha,
            };
            let percent = if baseline_ha > 0.0 {
                protected_ha / baseline_ha * 100.0
            } else {
                0.0
            };
            RealmProgress {
                realm,
                protected_ha: round_ha(protected_ha),
                baseline_ha,
                percent,
                may_double_count: any_overlap(&counting),
            }
        })
        .collect()
}

/// Best-effort overlap hint over layer bounding rectangles. Exact geometric
/// overlap is out of scope; a bbox hit is enough to warn about double
/// counting.
fn any_overlap(layers: &[&&Layer]) -> bool {
    let boxes: Vec<Rect<f64>> = layers.iter().filter_map(|l| layer_bbox(l)).collect();
    for (i, a) in boxes.iter().enumerate() {
        for b in boxes.iter().skip(i + 1) {
            if a.intersects(b) {
                return true;
            }
        }
    }
    false
}

fn layer_bbox(layer: &Layer) -> Option<Rect<f64>> {
    let mut current: Option<Rect<f64>> = None;
    for feature in &layer.collection.features {
        let Some(geometry) = feature.geometry.as_ref() else {
            continue;
        };
        let rect = match &geometry.value {
            Value::Polygon(_) => Polygon::<f64>::try_from(geometry.value.clone())
                .ok()
                .and_then(|p| p.bounding_rect()),
            Value::MultiPolygon(_) => MultiPolygon::<f64>::try_from(geometry.value.clone())
                .ok()
                .and_then(|m| m.bounding_rect()),
            _ => None,
        };
        if let Some(rect) = rect {
            current = Some(match current {
                None => rect,
                Some(acc) => merge_rects(acc, rect),
            });
        }
    }
    current
}

fn merge_rects(a: Rect<f64>, b: Rect<f64>) -> Rect<f64> {
    Rect::new(
        (a.min().x.min(b.min().x), a.min().y.min(b.min().y)),
        (a.max().x.max(b.max().x), a.max().y.max(b.max().y)),
    )
}
