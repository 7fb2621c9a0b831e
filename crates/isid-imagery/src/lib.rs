//! # isid-imagery
//!
//! Resumable acquisition of aerial imagery tiles for intersections from
//! ArcGIS map and image services, across several imagery years.
//!
//! ## Overview
//!
//! A run walks a list of data sources (a service URL paired with the year
//! its imagery represents). For each source:
//!
//! 1. The service's full extent is normalized to a WGS84 bounding box
//!    ([`spatial`]). Web Mercator extents are inverse-projected; other spatial
//!    references skip the source.
//! 2. Intersections inside the box whose status for the year is still
//!    unfetched are selected ([`select`]).
//! 3. A 30 m query window around each point ([`window`]) is requested from
//!    `<service>/export`, falling back to `<service>/exportImage`
//!    ([`service`]).
//! 4. The tile is classified as blank or usable ([`classify`]); usable tiles
//!    are written to `<image_dir>/<id>_<year>.<ext>`.
//! 5. The status is recorded and the availability table rewritten on disk
//!    before the next point is recorded ([`store`]).
//!
//! Because the table on disk is always current, an interrupted run picks up
//! where it stopped and never re-requests a tile already classified.
//!
//! ## Example
//!
//! ```no_run
//! use isid_imagery::{load_sources, ArcGisClient, AvailabilityStore, HarvestConfig, Harvester};
//!
//! let config = HarvestConfig::default();
//! let store = AvailabilityStore::open("data/interim/existing_stations_intersections.csv")?;
//! let sources = load_sources("data/raw/imagery_sources.csv")?;
//! let client = ArcGisClient::new(config.timeout())?;
//!
//! let mut harvester = Harvester::new(client, store, config);
//! let summary = harvester.run(&sources);
//! println!("saved {} tiles, {} blank", summary.saved(), summary.blank());
//! # Ok::<(), isid_imagery::HarvestError>(())
//! ```

pub mod cancel;
pub mod classify;
pub mod config;
mod error;
pub mod harvest;
mod model;
pub mod select;
pub mod service;
pub mod sources;
pub mod spatial;
pub mod store;
pub mod window;

pub use cancel::CancelToken;
pub use classify::{classify_tile, TileClass};
pub use config::{HarvestConfig, KnownExtent};
pub use error::HarvestError;
pub use harvest::{Harvester, RunSummary, SourceOutcome, SourceReport};
pub use model::{AvailabilityStatus, BoundingBox, DataSource, Intersection};
pub use select::select_candidates;
pub use service::{ArcGisClient, FetchOutcome, ImageryService, SkipReason};
pub use sources::load_sources;
pub use spatial::{resolve_extent, ServiceMetadata, SpatialReference};
pub use store::{AvailabilityStore, StatusCounts};
pub use window::query_window;

/// Result type for harvester operations.
pub type Result<T> = std::result::Result<T, HarvestError>;
