use crate::{Mosaic, Quad, SearchResult};
use std::collections::BTreeMap;

pub fn group_by_mosaic<'a>(
    mosaics: &'a [Mosaic],
    result: &'a SearchResult,
) -> Vec<(&'a str, &'a [Quad])> {
    mosaics
        .iter()
        .zip(result.quads.iter())
        .map(|(mosaic, quads)| (mosaic.name.as_str(), quads.as_slice()))
        .collect()
}

/// Quad id to the names of the mosaics that contain it, in search order.
pub fn group_by_quad<'a>(
    mosaics: &'a [Mosaic],
    result: &'a SearchResult,
) -> BTreeMap<&'a str, Vec<&'a str>> {
    let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, quads) in group_by_mosaic(mosaics, result) {
        for quad in quads {
            grouped.entry(quad.id.as_str()).or_default().push(name);
        }
    }
    grouped
}

pub fn summary(mosaics: &[Mosaic], result: &SearchResult) -> String {
    format!(
        "{} quads from {} basemap instances intersect your AOI",
        result.total_quads(),
        mosaics.len()
    )
}

pub fn total_area_km2(quads: &[Quad]) -> f64 {
    quads.iter().map(|quad| quad.bbox.geodesic_area_km2()).sum()
}
