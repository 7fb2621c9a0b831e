//! Harvest configuration.
//!
//! Defaults reproduce the reference acquisition settings; a YAML file can
//! override any subset of them.
//!
//! No extents ship built in: `known_extents` is empty by default, and
//! operators add an entry for each provider whose metadata reports a wrong
//! or missing extent. The URL and box below are illustrative.
//!
//! ```yaml
//! radius_m: 30.0
//! tile_size: 416
//! timeout_secs: 10
//! workers: 4
//! image_dir: data/images
//! known_extents:
//!   - url_contains: "gis.example.org/arcgis/rest/services/Ortho2016"
//!     bbox: { min_lat: 44.4, min_lon: -94.0, max_lat: 45.5, max_lon: -92.7 }
//! ```

use crate::window::DEFAULT_RADIUS_M;
use crate::{BoundingBox, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Edge length in pixels of requested tiles.
pub const DEFAULT_TILE_SIZE: u32 = 416;

/// Per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// A provider whose metadata endpoint is not trusted; its coverage is given
/// explicitly instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownExtent {
    /// Matched as a substring of the data source URL.
    pub url_contains: String,
    /// Coverage in WGS84 degrees.
    pub bbox: BoundingBox,
}

/// Settings for one harvest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Half-width of the request window in meters.
    pub radius_m: f64,
    /// Requested tile width and height in pixels.
    pub tile_size: u32,
    /// Timeout applied to every HTTP request.
    pub timeout_secs: u64,
    /// Concurrent fetch workers per source. `1` is fully sequential.
    pub workers: usize,
    /// Where saved tiles are written.
    pub image_dir: PathBuf,
    /// Extents used instead of querying service metadata. Empty by default.
    pub known_extents: Vec<KnownExtent>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            radius_m: DEFAULT_RADIUS_M,
            tile_size: DEFAULT_TILE_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            workers: 1,
            image_dir: PathBuf::from("images"),
            known_extents: Vec::new(),
        }
    }
}

impl HarvestConfig {
    /// Load from a YAML file; missing keys take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Parse from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Worker count, never below one.
    pub fn worker_count(&self) -> usize {
        self.workers.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_settings() {
        let config = HarvestConfig::default();
        assert_eq!(config.radius_m, 30.0);
        assert_eq!(config.tile_size, 416);
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.worker_count(), 1);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = HarvestConfig::from_yaml("workers: 4\nimage_dir: out/tiles\n").unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.image_dir, PathBuf::from("out/tiles"));
        assert_eq!(config.tile_size, DEFAULT_TILE_SIZE);
    }

    #[test]
    fn test_known_extents_parse() {
        let yaml = r#"
known_extents:
  - url_contains: "Ortho2016"
    bbox: { min_lat: 44.4, min_lon: -94.0, max_lat: 45.5, max_lon: -92.7 }
"#;
        let config = HarvestConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.known_extents.len(), 1);
        assert_eq!(config.known_extents[0].bbox.max_lon, -92.7);
    }

    #[test]
    fn test_no_known_extents_by_default() {
        assert!(HarvestConfig::default().known_extents.is_empty());
        let config = HarvestConfig::from_yaml("workers: 2\n").unwrap();
        assert!(config.known_extents.is_empty());
    }

    #[test]
    fn test_zero_workers_clamped() {
        let config = HarvestConfig {
            workers: 0,
            ..Default::default()
        };
        assert_eq!(config.worker_count(), 1);
    }

    #[test]
    fn test_bad_yaml_is_error() {
        assert!(HarvestConfig::from_yaml("workers: many").is_err());
    }
}
