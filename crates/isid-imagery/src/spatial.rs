//! Resolving a map service's full extent into a WGS84 bounding box.
//!
//! ArcGIS services report `fullExtent` in their native spatial reference.
//! Only two are understood: geographic WGS84 (EPSG:4326) and Web Mercator
//! (EPSG:3857, which Esri also publishes as wkid 102100). Anything else is
//! rejected so the source is skipped rather than filtered with a bogus box.

use crate::config::KnownExtent;
use crate::service::ImageryService;
use crate::{BoundingBox, DataSource, HarvestError, Result};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use serde::Deserialize;
use tracing::debug;

/// Esri's alias for EPSG:3857.
const ESRI_WEB_MERCATOR: u32 = 102100;

/// Half the width of the Web Mercator plane in meters (pi * 6378137).
pub const WEB_MERCATOR_LIMIT: f64 = 20_037_508.342_789_244;

/// Spatial references the normalizer can handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialReference {
    /// EPSG:4326, degrees.
    Geographic4326,
    /// EPSG:3857 / Esri 102100, meters.
    WebMercator3857,
}

impl SpatialReference {
    /// Classify a well-known id.
    pub fn from_wkid(wkid: u32) -> Result<Self> {
        match wkid {
            4326 => Ok(Self::Geographic4326),
            3857 | ESRI_WEB_MERCATOR => Ok(Self::WebMercator3857),
            other => Err(HarvestError::UnsupportedSpatialReference(other)),
        }
    }
}

/// The `spatialReference` object of an ArcGIS response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpatialReferenceJson {
    /// Legacy identifier.
    #[serde(default)]
    pub wkid: Option<u32>,
    /// Current identifier; preferred when present.
    #[serde(default, rename = "latestWkid")]
    pub latest_wkid: Option<u32>,
}

impl SpatialReferenceJson {
    /// The effective identifier, preferring `latestWkid`.
    pub fn effective_wkid(&self) -> Option<u32> {
        self.latest_wkid.or(self.wkid)
    }
}

/// A provider-reported extent in its native spatial reference.
#[derive(Debug, Clone, Deserialize)]
pub struct Extent {
    /// West edge.
    pub xmin: f64,
    /// South edge.
    pub ymin: f64,
    /// East edge.
    pub xmax: f64,
    /// North edge.
    pub ymax: f64,
    /// Reference the edges are expressed in, if the extent carries one.
    #[serde(default, rename = "spatialReference")]
    pub spatial_reference: Option<SpatialReferenceJson>,
}

/// The subset of `GET <service>?f=json` the harvester reads.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceMetadata {
    /// Coverage of the whole service.
    #[serde(default, rename = "fullExtent")]
    pub full_extent: Option<Extent>,
    /// Service-level reference, used when the extent has none.
    #[serde(default, rename = "spatialReference")]
    pub spatial_reference: Option<SpatialReferenceJson>,
}

impl ServiceMetadata {
    /// Normalize the service's full extent into WGS84 degrees.
    ///
    /// The extent's own `spatialReference` wins over the service-level one.
    pub fn wgs84_extent(&self) -> Result<BoundingBox> {
        let extent = self.full_extent.as_ref().ok_or(HarvestError::MissingExtent)?;
        let wkid = extent
            .spatial_reference
            .as_ref()
            .and_then(SpatialReferenceJson::effective_wkid)
            .or_else(|| {
                self.spatial_reference
                    .as_ref()
                    .and_then(SpatialReferenceJson::effective_wkid)
            })
            .ok_or(HarvestError::MissingExtent)?;
        normalize_extent(extent, SpatialReference::from_wkid(wkid)?)
    }
}

/// Convert an extent in `srs` to a WGS84 bounding box.
///
/// Web Mercator corners outside the projected plane (world services often
/// overshoot it by a few meters) are clamped to its edges first. A box that
/// still comes out inverted is rejected.
pub fn normalize_extent(extent: &Extent, srs: SpatialReference) -> Result<BoundingBox> {
    let bbox = match srs {
        SpatialReference::Geographic4326 => {
            BoundingBox::new(extent.ymin, extent.xmin, extent.ymax, extent.xmax)
        }
        SpatialReference::WebMercator3857 => {
            let (min_lat, min_lon) = web_mercator_corner(extent.xmin, extent.ymin)?;
            let (max_lat, max_lon) = web_mercator_corner(extent.xmax, extent.ymax)?;
            BoundingBox::new(min_lat, min_lon, max_lat, max_lon)
        }
    };
    if bbox.min_lat > bbox.max_lat || bbox.min_lon > bbox.max_lon {
        return Err(HarvestError::Projection(format!("inverted extent {bbox:?}")));
    }
    Ok(bbox)
}

/// Inverse-project one extent corner, clamped to the Web Mercator plane.
///
/// proj4rs wraps longitudes at the antimeridian, so corners on the plane's
/// east/west edge are pinned to +/-180 degrees.
fn web_mercator_corner(x: f64, y: f64) -> Result<(f64, f64)> {
    let x = x.clamp(-WEB_MERCATOR_LIMIT, WEB_MERCATOR_LIMIT);
    let y = y.clamp(-WEB_MERCATOR_LIMIT, WEB_MERCATOR_LIMIT);
    let (lat, lon) = web_mercator_to_wgs84(x, y)?;
    if x.abs() == WEB_MERCATOR_LIMIT {
        return Ok((lat, 180.0_f64.copysign(x)));
    }
    Ok((lat, lon))
}

/// Transform a Web Mercator coordinate (meters) to `(lat, lon)` degrees.
pub fn web_mercator_to_wgs84(x: f64, y: f64) -> Result<(f64, f64)> {
    let (lon, lat) = reproject(3857, 4326, (x, y))?;
    Ok((lat.to_degrees(), lon.to_degrees()))
}

/// Transform `(lat, lon)` degrees to a Web Mercator coordinate (meters).
pub fn wgs84_to_web_mercator(lat: f64, lon: f64) -> Result<(f64, f64)> {
    reproject(4326, 3857, (lon.to_radians(), lat.to_radians()))
}

// proj4rs works in radians for geographic systems.
fn reproject(from: u16, to: u16, (x, y): (f64, f64)) -> Result<(f64, f64)> {
    let src = Proj::from_epsg_code(from).map_err(|e| HarvestError::Projection(format!("{e:?}")))?;
    let dst = Proj::from_epsg_code(to).map_err(|e| HarvestError::Projection(format!("{e:?}")))?;
    let mut point = (x, y, 0.0);
    transform(&src, &dst, &mut point).map_err(|e| HarvestError::Projection(format!("{e:?}")))?;
    if !point.0.is_finite() || !point.1.is_finite() {
        return Err(HarvestError::Projection(format!(
            "non-finite result projecting ({x}, {y}) from EPSG:{from} to EPSG:{to}"
        )));
    }
    Ok((point.0, point.1))
}

/// Resolve a data source's usable extent.
///
/// A configured [`KnownExtent`] whose fragment appears in the URL short-circuits
/// the metadata query; otherwise the service is asked for its metadata.
pub fn resolve_extent<S: ImageryService + ?Sized>(
    service: &S,
    source: &DataSource,
    known_extents: &[KnownExtent],
) -> Result<BoundingBox> {
    if let Some(known) = known_extents
        .iter()
        .find(|k| source.url.contains(&k.url_contains))
    {
        debug!(url = %source.url, fragment = %known.url_contains, "using configured extent");
        return Ok(known.bbox);
    }

    let metadata = service.service_metadata(source.base_url())?;
    metadata.wgs84_extent()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn metadata(json: &str) -> ServiceMetadata {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_geographic_extent_passes_through() {
        let meta = metadata(
            r#"{"fullExtent": {"xmin": -93.5, "ymin": 44.8, "xmax": -92.9, "ymax": 45.2,
                "spatialReference": {"wkid": 4326}}}"#,
        );
        let bbox = meta.wgs84_extent().unwrap();
        assert_eq!(bbox, BoundingBox::new(44.8, -93.5, 45.2, -92.9));
    }

    #[test]
    fn test_web_mercator_extent_round_trips() {
        let (xmin, ymin, xmax, ymax) = (-10_408_000.0, 5_592_000.0, -10_340_000.0, 5_654_000.0);
        let meta = metadata(&format!(
            r#"{{"fullExtent": {{"xmin": {xmin}, "ymin": {ymin}, "xmax": {xmax}, "ymax": {ymax},
                "spatialReference": {{"wkid": 102100, "latestWkid": 3857}}}}}}"#
        ));
        let bbox = meta.wgs84_extent().unwrap();

        // Minneapolis area.
        assert!(bbox.min_lat > 44.0 && bbox.max_lat < 46.0, "{bbox:?}");
        assert!(bbox.min_lon > -94.0 && bbox.max_lon < -92.0, "{bbox:?}");

        let (x0, y0) = wgs84_to_web_mercator(bbox.min_lat, bbox.min_lon).unwrap();
        let (x1, y1) = wgs84_to_web_mercator(bbox.max_lat, bbox.max_lon).unwrap();
        assert_relative_eq!(x0, xmin, epsilon = 1e-3);
        assert_relative_eq!(y0, ymin, epsilon = 1e-3);
        assert_relative_eq!(x1, xmax, epsilon = 1e-3);
        assert_relative_eq!(y1, ymax, epsilon = 1e-3);
    }

    #[test]
    fn test_world_extent_past_plane_edges_is_clamped() {
        let meta = metadata(
            r#"{"fullExtent": {"xmin": -20037700, "ymin": -20037700, "xmax": 20037700, "ymax": 20037700,
                "spatialReference": {"wkid": 102100, "latestWkid": 3857}}}"#,
        );
        let bbox = meta.wgs84_extent().unwrap();
        assert_relative_eq!(bbox.min_lon, -180.0);
        assert_relative_eq!(bbox.max_lon, 180.0);
        assert_relative_eq!(bbox.max_lat, 85.051_128_78, epsilon = 1e-6);
        assert_relative_eq!(bbox.min_lat, -85.051_128_78, epsilon = 1e-6);
        assert!(bbox.contains(45.0, -93.2));
    }

    #[test]
    fn test_inverted_extent_rejected() {
        let meta = metadata(
            r#"{"fullExtent": {"xmin": 10, "ymin": 2, "xmax": -10, "ymax": 4,
                "spatialReference": {"wkid": 4326}}}"#,
        );
        assert!(matches!(meta.wgs84_extent(), Err(HarvestError::Projection(_))));
    }

    #[test]
    fn test_origin_projects_to_origin() {
        let (lat, lon) = web_mercator_to_wgs84(0.0, 0.0).unwrap();
        assert_relative_eq!(lat, 0.0, epsilon = 1e-9);
        assert_relative_eq!(lon, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_latest_wkid_preferred() {
        let sr = SpatialReferenceJson {
            wkid: Some(102100),
            latest_wkid: Some(3857),
        };
        assert_eq!(sr.effective_wkid(), Some(3857));
        let legacy = SpatialReferenceJson {
            wkid: Some(4326),
            latest_wkid: None,
        };
        assert_eq!(legacy.effective_wkid(), Some(4326));
    }

    #[test]
    fn test_unsupported_wkid_rejected() {
        let meta = metadata(
            r#"{"fullExtent": {"xmin": 0, "ymin": 0, "xmax": 1, "ymax": 1,
                "spatialReference": {"wkid": 26915}}}"#,
        );
        assert!(matches!(
            meta.wgs84_extent(),
            Err(HarvestError::UnsupportedSpatialReference(26915))
        ));
    }

    #[test]
    fn test_service_level_reference_used_as_fallback() {
        let meta = metadata(
            r#"{"spatialReference": {"wkid": 4326},
                "fullExtent": {"xmin": 1, "ymin": 2, "xmax": 3, "ymax": 4}}"#,
        );
        assert_eq!(meta.wgs84_extent().unwrap(), BoundingBox::new(2.0, 1.0, 4.0, 3.0));
    }

    #[test]
    fn test_missing_extent() {
        let meta = metadata(r#"{"currentVersion": 10.9}"#);
        assert!(matches!(meta.wgs84_extent(), Err(HarvestError::MissingExtent)));
    }
}
