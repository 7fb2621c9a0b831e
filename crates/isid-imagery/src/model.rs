//! Core data types shared across the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One imagery provider paired with the year its imagery represents.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DataSource {
    /// Base URL of the ArcGIS MapServer/ImageServer.
    #[serde(rename = "URL")]
    pub url: String,
    /// Imagery year.
    #[serde(rename = "Year")]
    pub year: i32,
}

impl DataSource {
    /// Create a data source.
    pub fn new(url: impl Into<String>, year: i32) -> Self {
        Self {
            url: url.into(),
            year,
        }
    }

    /// The service URL without a trailing slash, ready for path joins.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

/// A geographic point of interest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intersection {
    /// Stable intersection id.
    pub id: i64,
    /// Latitude in WGS84 degrees.
    pub latitude: f64,
    /// Longitude in WGS84 degrees.
    pub longitude: f64,
}

/// Per-point-per-year acquisition status.
///
/// Status only advances from `Unfetched`; `Blank` and `Saved` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum AvailabilityStatus {
    /// Never attempted, or every attempt failed.
    #[default]
    Unfetched = 0,
    /// The provider returned an all-black no-data tile.
    Blank = 1,
    /// Usable imagery was written to disk.
    Saved = 2,
}

impl AvailabilityStatus {
    /// Numeric code stored in the availability table.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Parse a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Unfetched),
            1 => Some(Self::Blank),
            2 => Some(Self::Saved),
            _ => None,
        }
    }

    /// Whether the pipeline is done with this (point, year) pair.
    pub fn is_terminal(self) -> bool {
        self != Self::Unfetched
    }
}

impl fmt::Display for AvailabilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unfetched => "unfetched",
            Self::Blank => "blank",
            Self::Saved => "saved",
        };
        f.write_str(name)
    }
}

/// Geographic bounds in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct BoundingBox {
    /// Minimum latitude (south edge).
    pub min_lat: f64,
    /// Minimum longitude (west edge).
    pub min_lon: f64,
    /// Maximum latitude (north edge).
    pub max_lat: f64,
    /// Maximum longitude (east edge).
    pub max_lon: f64,
}

impl BoundingBox {
    /// Create a bounding box from its edges.
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// Check if a coordinate is within the bounds (edges inclusive).
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }

    /// Render as an ArcGIS `bbox` parameter: `xmin,ymin,xmax,ymax`.
    pub fn to_query_param(&self) -> String {
        format!(
            "{},{},{},{}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}
