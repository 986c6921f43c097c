use crate::{BoundingBox, QuadSearchError};
use geo::line_intersection::line_intersection;
use geo::{BoundingRect, Coord, GeodesicArea, Intersects, Line, LineString, Polygon};
use serde_json::Value;
use std::path::Path;

/// Area of interest, a polygon in EPSG:4326.
#[derive(Debug, Clone, PartialEq)]
pub struct Aoi {
    polygon: Polygon<f64>,
    bbox: BoundingBox,
}

impl Aoi {
    pub fn new(polygon: Polygon<f64>) -> Result<Self, QuadSearchError> {
        validate_ring(polygon.exterior())?;

        let rect = polygon
            .bounding_rect()
            .ok_or_else(|| invalid("polygon has no bounding box"))?;
        if rect.width() <= 0.0 || rect.height() <= 0.0 {
            return Err(invalid("polygon has zero extent"));
        }

        let bbox = BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)?;
        Ok(Self { polygon, bbox })
    }

    pub fn from_geojson_str(text: &str) -> Result<Self, QuadSearchError> {
        let value: Value = serde_json::from_str(text)?;
        Self::new(polygon_from_geojson(&value)?)
    }

    pub async fn from_geojson_file(path: &Path) -> Result<Self, QuadSearchError> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_geojson_str(&text)
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bbox
    }

    pub fn area_km2(&self) -> f64 {
        self.polygon.geodesic_area_unsigned() / 1_000_000.0
    }

    pub fn intersects_bbox(&self, bbox: &BoundingBox) -> bool {
        self.polygon.intersects(&bbox.to_rect())
    }
}

fn invalid(details: impl Into<String>) -> QuadSearchError {
    QuadSearchError::InvalidGeometry(details.into())
}

fn validate_ring(ring: &LineString<f64>) -> Result<(), QuadSearchError> {
    let mut vertices: Vec<Coord<f64>> = ring.coords().copied().collect();
    // Repeated consecutive vertices would yield zero-length segments.
    vertices.dedup();
    if vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }

    for coord in &vertices {
        if !coord.x.is_finite() || !coord.y.is_finite() {
            return Err(invalid("coordinates must be finite"));
        }
        if !(-180.0..=180.0).contains(&coord.x) || !(-90.0..=90.0).contains(&coord.y) {
            return Err(invalid(format!(
                "coordinate ({}, {}) is outside EPSG:4326 bounds",
                coord.x, coord.y
            )));
        }
    }

    let mut distinct: Vec<Coord<f64>> = Vec::with_capacity(vertices.len());
    for coord in &vertices {
        if !distinct.contains(coord) {
            distinct.push(*coord);
        }
    }
    if distinct.len() < 3 {
        return Err(invalid("exterior ring needs at least 3 distinct vertices"));
    }

    if is_self_intersecting(&vertices) {
        return Err(invalid("exterior ring is self-intersecting"));
    }

    Ok(())
}

fn is_self_intersecting(vertices: &[Coord<f64>]) -> bool {
    let count = vertices.len();
    let segments: Vec<Line<f64>> = (0..count)
        .map(|index| Line::new(vertices[index], vertices[(index + 1) % count]))
        .collect();

    for first in 0..count {
        for second in (first + 1)..count {
            let adjacent = second == first + 1 || (first == 0 && second == count - 1);
            if adjacent {
                continue;
            }
            if line_intersection(segments[first], segments[second]).is_some() {
                return true;
            }
        }
    }
    false
}

fn polygon_from_geojson(value: &Value) -> Result<Polygon<f64>, QuadSearchError> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("geojson object has no type"))?;

    match kind {
        "Polygon" => polygon_from_rings(value.get("coordinates")),
        "MultiPolygon" => {
            let polygons = value
                .get("coordinates")
                .and_then(Value::as_array)
                .ok_or_else(|| invalid("multipolygon has no coordinates"))?;
            match polygons.as_slice() {
                [single] => polygon_from_rings(Some(single)),
                _ => Err(invalid("only single-part multipolygons are supported")),
            }
        }
        "Feature" => {
            let geometry = value
                .get("geometry")
                .ok_or_else(|| invalid("feature has no geometry"))?;
            polygon_from_geojson(geometry)
        }
        "FeatureCollection" => {
            let first = value
                .get("features")
                .and_then(Value::as_array)
                .and_then(|features| features.first())
                .ok_or_else(|| invalid("feature collection is empty"))?;
            polygon_from_geojson(first)
        }
        other => Err(invalid(format!("unsupported geojson type {other}"))),
    }
}

fn polygon_from_rings(coordinates: Option<&Value>) -> Result<Polygon<f64>, QuadSearchError> {
    let rings = coordinates
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("polygon has no coordinates"))?;

    let mut parsed = rings
        .iter()
        .map(ring_from_value)
        .collect::<Result<Vec<_>, _>>()?;

    if parsed.is_empty() {
        return Err(invalid("polygon has no exterior ring"));
    }

    let exterior = parsed.remove(0);
    Ok(Polygon::new(exterior, parsed))
}

fn ring_from_value(ring: &Value) -> Result<LineString<f64>, QuadSearchError> {
    let positions = ring
        .as_array()
        .ok_or_else(|| invalid("ring is not an array"))?;

    positions
        .iter()
        .map(|position| {
            let pair = position
                .as_array()
                .filter(|pair| pair.len() >= 2)
                .ok_or_else(|| invalid("position needs x and y"))?;
            let x = pair[0].as_f64().ok_or_else(|| invalid("x is not a number"))?;
            let y = pair[1].as_f64().ok_or_else(|| invalid("y is not a number"))?;
            Ok::<_, QuadSearchError>(Coord { x, y })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(LineString::new)
}
