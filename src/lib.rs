//! # conserve-layerkit
//!
//! Geospatial layer ingestion and conservation-progress aggregation for a
//! national conservation-tracking portal.
//!
//! The engine takes an uploaded feature collection of unknown coordinate
//! system and quality, cleans and normalizes it, computes authoritative
//! per-feature areas, and rolls the results up into 30x30
//! percentage-of-baseline progress, per-province and per-category totals,
//! and an expected-layer completeness tracker.
//!
//! Ingestion flows one direction:
//!
//! ```text
//! raw upload -> normalize -> area -> metadata -> store -> tracker link
//! ```
//!
//! and reporting the other:
//!
//! ```text
//! store + tracker -> aggregation -> presentation
//! ```
//!
//! [`engine::LayerEngine`] is the owning context object composing the
//! pieces; every module underneath it is usable on its own.

pub mod aggregation;
pub mod area;
pub mod config;
pub mod demo;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod metadata;
pub mod normalize;
pub mod schema;
pub mod store;
pub mod tracker;

pub use aggregation::{AggregatedSummary, GroupTotal, RealmProgress};
pub use config::{EngineConfig, NationalBaseline, StorageBackend};
pub use engine::{ChangeEvent, IngestOutcome, LayerEngine};
pub use error::LkError;
pub use metadata::{
    Layer, LayerCategory, LayerMetadata, LayerStatus, LayerSummary, Realm, UserInput,
};
pub use store::{BackupBundle, EmbeddedStore, LayerStore};
pub use tracker::{
    default_catalog, Completeness, ExpectedCatalog, ExpectedLayerSlot, ExpectedLayerTracker,
};
