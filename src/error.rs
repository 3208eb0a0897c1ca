use thiserror::Error;

#[derive(Error, Debug)]
pub enum LkError {
    #[error("Unreadable input: {0}")]
    UnreadableInput(String),

    #[error("Unsupported geometry: {0}")]
    UnsupportedGeometry(String),

    #[error("Excessive invalid ratio: {invalid} invalid of {total} features")]
    ExcessiveInvalidRatio { invalid: usize, total: usize },

    #[error("Too many features: {0} exceeds the configured per-layer cap")]
    TooManyFeatures(usize),

    #[error("Upload too large: {size_mb:.1} MB exceeds the {max_mb} MB limit")]
    UploadTooLarge { size_mb: f64, max_mb: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No load strategy succeeded: {0}")]
    LoadFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation: {0}")]
    Validation(String),

    #[error("InvalidData: {0}")]
    InvalidData(String),
}
