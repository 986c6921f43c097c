use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuadSearchError {
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("invalid bounding box: {0}")]
    InvalidBoundingBox(String),

    #[error("no mosaics selected")]
    NoMosaics,

    #[error("no mosaics in the selected area")]
    NoMosaicsInArea,

    #[error("area of {area_km2:.2} km2 exceeds the {limit_km2} km2 download limit")]
    AreaTooLarge { area_km2: f64, limit_km2: f64 },

    #[error("a quad search is already running")]
    SearchInProgress,

    #[error("mosaic not found: {0}")]
    MosaicNotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited by {0}")]
    RateLimited(String),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("search task failed: {0}")]
    Task(String),
}

pub type Result<T, E = QuadSearchError> = std::result::Result<T, E>;
