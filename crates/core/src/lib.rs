pub mod client;
pub mod error;
pub mod estimate;
pub mod geometry;
pub mod grouping;
pub mod models;
pub mod progress;
pub mod traits;
pub mod worker;

pub use client::{
    ClientConfig, PlanetClient, PlanetQuadPager, DEFAULT_BASEMAPS_URL, DEFAULT_PAGE_SIZE,
};
pub use error::{QuadSearchError, Result};
pub use estimate::{
    estimate_pages, exceeds_quad_limit, plan_search, preflight, SearchPlan,
    MAX_AREA_TO_DOWNLOAD_KM2, MAX_QUADS_TO_DOWNLOAD, QUADS_PER_PAGE,
};
pub use geometry::Aoi;
pub use grouping::{group_by_mosaic, group_by_quad, summary, total_area_km2};
pub use models::{BoundingBox, Mosaic, Quad, SearchResult};
pub use progress::SearchProgress;
pub use traits::{QuadIndex, QuadPager};
pub use worker::{find_quads, CancelHandle, Outcome, QuadFinder, SearchEvent, SearchSession};
