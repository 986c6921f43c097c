use crate::QuadSearchError;
use chrono::{DateTime, Utc};
use geo::{GeodesicArea, Rect};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Axis-aligned extent in EPSG:4326 degrees, serialized as
/// `[xmin, ymin, xmax, ymax]` the way the basemaps API returns it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl BoundingBox {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Result<Self, QuadSearchError> {
        if ![xmin, ymin, xmax, ymax].iter().all(|value| value.is_finite()) {
            return Err(QuadSearchError::InvalidBoundingBox(
                "bounds must be finite".to_string(),
            ));
        }
        if xmin > xmax || ymin > ymax {
            return Err(QuadSearchError::InvalidBoundingBox(format!(
                "inverted bounds [{xmin}, {ymin}, {xmax}, {ymax}]"
            )));
        }
        Ok(Self {
            xmin,
            ymin,
            xmax,
            ymax,
        })
    }

    pub fn as_query_param(&self) -> String {
        format!("{},{},{},{}", self.xmin, self.ymin, self.xmax, self.ymax)
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.xmin <= other.xmax
            && other.xmin <= self.xmax
            && self.ymin <= other.ymax
            && other.ymin <= self.ymax
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new((self.xmin, self.ymin), (self.xmax, self.ymax))
    }

    pub fn geodesic_area_km2(&self) -> f64 {
        self.to_rect().to_polygon().geodesic_area_unsigned() / 1_000_000.0
    }
}

impl TryFrom<[f64; 4]> for BoundingBox {
    type Error = QuadSearchError;

    fn try_from(value: [f64; 4]) -> Result<Self, Self::Error> {
        Self::new(value[0], value[1], value[2], value[3])
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(value: BoundingBox) -> Self {
        [value.xmin, value.ymin, value.xmax, value.ymax]
    }
}

/// One dated, queryable basemap instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Mosaic {
    pub id: String,
    pub name: String,
    pub bbox: BoundingBox,
    #[serde(default)]
    pub first_acquired: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_acquired: Option<DateTime<Utc>>,
    #[serde(default)]
    pub datatype: Option<String>,
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub quad_size: Option<u32>,
    #[serde(default)]
    pub level: Option<u8>,
    #[serde(default, rename = "_links")]
    pub links: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quad {
    pub id: String,
    pub bbox: BoundingBox,
    #[serde(default)]
    pub percent_covered: Option<f64>,
    #[serde(default, rename = "_links")]
    pub links: HashMap<String, Value>,
}

/// Quads grouped per mosaic, in the order the mosaics were searched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub quads: Vec<Vec<Quad>>,
}

impl SearchResult {
    pub fn total_quads(&self) -> usize {
        self.quads.iter().map(Vec::len).sum()
    }

    pub fn mosaic_count(&self) -> usize {
        self.quads.len()
    }
}
