use crate::traits::QuadIndex;
use crate::{Aoi, Mosaic, Quad, QuadSearchError};

pub const QUADS_PER_PAGE: usize = 50;
pub const MAX_AREA_TO_DOWNLOAD_KM2: f64 = 100_000.0;
pub const MAX_QUADS_TO_DOWNLOAD: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchPlan {
    pub aoi_area_km2: f64,
    pub quad_area_km2: Option<f64>,
    pub estimated_pages: usize,
}

/// Rough page count for one mosaic: `ceil(aoi / quad / QUADS_PER_PAGE)`, at least 1.
pub fn estimate_pages(aoi_area_km2: f64, quad_area_km2: f64) -> usize {
    if quad_area_km2.is_nan() || quad_area_km2 <= 0.0 || !aoi_area_km2.is_finite() {
        return 1;
    }
    let pages = (aoi_area_km2 / quad_area_km2 / QUADS_PER_PAGE as f64).ceil();
    (pages as usize).max(1)
}

pub fn exceeds_quad_limit(count: usize) -> bool {
    count > MAX_QUADS_TO_DOWNLOAD
}

/// Checks run before a search is started against the first selected mosaic.
pub fn preflight(
    aoi: &Aoi,
    first_mosaic: &Mosaic,
    sample_quad: Option<&Quad>,
) -> Result<SearchPlan, QuadSearchError> {
    if !aoi.intersects_bbox(&first_mosaic.bbox) {
        return Err(QuadSearchError::NoMosaicsInArea);
    }

    let aoi_area_km2 = aoi.area_km2();
    if aoi_area_km2 > MAX_AREA_TO_DOWNLOAD_KM2 {
        return Err(QuadSearchError::AreaTooLarge {
            area_km2: aoi_area_km2,
            limit_km2: MAX_AREA_TO_DOWNLOAD_KM2,
        });
    }

    let quad_area_km2 = sample_quad.map(|quad| quad.bbox.geodesic_area_km2());
    let estimated_pages = quad_area_km2
        .map(|quad_area| estimate_pages(aoi_area_km2, quad_area))
        .unwrap_or(1);

    Ok(SearchPlan {
        aoi_area_km2,
        quad_area_km2,
        estimated_pages,
    })
}

/// Fetches a sample quad of the first mosaic and runs [`preflight`].
pub async fn plan_search<I>(
    index: &I,
    aoi: &Aoi,
    mosaics: &[Mosaic],
) -> Result<SearchPlan, QuadSearchError>
where
    I: QuadIndex + ?Sized,
{
    let first = mosaics.first().ok_or(QuadSearchError::NoMosaics)?;
    // Fail before the sample quad request; preflight repeats this for direct callers.
    if !aoi.intersects_bbox(&first.bbox) {
        return Err(QuadSearchError::NoMosaicsInArea);
    }
    let sample = index.one_quad(first).await?;
    preflight(aoi, first, sample.as_ref())
}
