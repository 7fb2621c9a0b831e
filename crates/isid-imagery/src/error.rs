//! Error types for the imagery harvester.

use thiserror::Error;

/// Errors that can occur while loading tables, resolving sources, or
/// recording tile outcomes.
///
/// Per-point fetch failures are not errors: they are reported through
/// [`FetchOutcome`](crate::FetchOutcome) so the orchestrator can decide
/// whether to skip the point or abandon the source.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// I/O error reading or writing a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parse or write error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Malformed JSON from a map service.
    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed YAML configuration.
    #[error("config error: {0}")]
    Config(#[from] serde_yaml::Error),

    /// HTTP request error.
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// The service answered the metadata query with a non-success status.
    #[error("metadata request to {url} failed: HTTP {status}")]
    MetadataStatus {
        /// Service URL.
        url: String,
        /// Returned status code.
        status: u16,
    },

    /// A service URL could not be parsed.
    #[error("invalid service URL {url:?}: {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// Image bytes could not be decoded.
    #[error("image decode error: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// Service metadata carries no `fullExtent`.
    #[error("service metadata has no fullExtent")]
    MissingExtent,

    /// The extent is reported in a spatial reference we cannot normalize.
    #[error("unsupported spatial reference wkid {0}")]
    UnsupportedSpatialReference(u32),

    /// Coordinate transform failure.
    #[error("projection error: {0}")]
    Projection(String),

    /// A required column is absent from an input table.
    #[error("{table} is missing required column {column:?}")]
    MissingColumn {
        /// Which table.
        table: &'static str,
        /// Missing column name.
        column: String,
    },

    /// A cell could not be parsed.
    #[error("invalid value {value:?} in column {column:?} at row {row}")]
    InvalidCell {
        /// One-based data row.
        row: usize,
        /// Column name.
        column: String,
        /// Raw cell text.
        value: String,
    },

    /// An availability status would move backwards or be rewritten.
    #[error("intersection {id} year {year}: cannot change status {from} to {to}")]
    InvalidTransition {
        /// Intersection id.
        id: i64,
        /// Year column.
        year: i32,
        /// Current status code.
        from: u8,
        /// Requested status code.
        to: u8,
    },

    /// No row with this intersection id.
    #[error("unknown intersection {0}")]
    UnknownIntersection(i64),

    /// No column for this year.
    #[error("availability table has no column for year {0}")]
    UnknownYear(i32),
}
