//! Metrics infrastructure for the intersection imagery harvester.
//!
//! Every counter the harvester records is declared here as a structured
//! [`Metric`] constant so names stay consistent between the code that records
//! them and whatever exporter an operator installs. Without an installed
//! recorder the `metrics` macros are no-ops.
//!
//! # Example
//!
//! ```rust,ignore
//! use isid_metrics::{describe_metrics, metric_defs, SourceLabels};
//!
//! describe_metrics();
//!
//! let labels = SourceLabels::new("https://example.com/arcgis/rest/services/Ortho/MapServer", 2020);
//! metrics::counter!(metric_defs::TILES_SAVED.name, &labels.to_labels()).increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, Unit};

/// A counter declaration with its metadata.
///
/// ```rust
/// use isid_metrics::Metric;
/// use metrics::Unit;
///
/// const FETCHES: Metric = Metric::counter("isid.fetch.requests")
///     .with_description("Export requests issued")
///     .with_unit(Unit::Count)
///     .with_labels(&["source", "year"]);
///
/// assert_eq!(FETCHES.name, "isid.fetch.requests");
/// assert_eq!(FETCHES.labels, &["source", "year"]);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "isid.tiles.saved").
    pub name: &'static str,
    /// Human-readable description of the metric.
    pub description: &'static str,
    /// The unit of measurement (optional).
    pub unit: Option<Unit>,
    /// Label keys every recording of this metric carries, in order.
    pub labels: &'static [&'static str],
}

impl Metric {
    /// Creates a new counter with the given name.
    pub const fn counter(name: &'static str) -> Self {
        Self {
            name,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Sets the description for the metric.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Sets the unit for the metric.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets the expected label keys for the metric.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the metrics recorder.
    pub fn describe(&self) {
        match self.unit {
            Some(unit) => {
                describe_counter!(self.name, unit, self.description);
            }
            None => {
                describe_counter!(self.name, self.description);
            }
        }
    }
}

/// Labels attached to every per-source metric.
#[derive(Debug, Clone)]
pub struct SourceLabels {
    /// Map service URL.
    pub source: String,
    /// Imagery year the source provides.
    pub year: i32,
}

impl SourceLabels {
    /// Create labels for a data source.
    pub fn new(source: impl Into<String>, year: i32) -> Self {
        Self {
            source: source.into(),
            year,
        }
    }

    /// Convert to the label pairs expected by the `metrics` macros.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![("source", self.source.clone()), ("year", self.year.to_string())]
    }

    /// Same as [`to_labels`](Self::to_labels) with an extra `reason` label.
    pub fn with_reason(&self, reason: &'static str) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.push(("reason", reason.to_string()));
        labels
    }
}

/// All metric definitions for the harvester.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Labels present on all source-scoped metrics.
    pub const SOURCE_LABELS: &[&str] = &["source", "year"];

    // ========================================================================
    // Tile outcomes
    // ========================================================================

    /// Tiles classified as usable and written to disk.
    pub const TILES_SAVED: Metric = Metric::counter("isid.tiles.saved")
        .with_description("Tiles classified as usable and written to disk")
        .with_unit(Unit::Count)
        .with_labels(SOURCE_LABELS);

    /// Tiles classified as blank (all-zero extrema).
    pub const TILES_BLANK: Metric = Metric::counter("isid.tiles.blank")
        .with_description("Tiles classified as blank")
        .with_unit(Unit::Count)
        .with_labels(SOURCE_LABELS);

    /// Bytes of imagery downloaded.
    pub const TILE_BYTES: Metric = Metric::counter("isid.tiles.bytes")
        .with_description("Bytes of imagery downloaded")
        .with_unit(Unit::Bytes)
        .with_labels(SOURCE_LABELS);

    /// Points left unfetched this run.
    ///
    /// Labels: source, year, reason (`http`, `request`, `decode`, `write`)
    pub const POINTS_SKIPPED: Metric = Metric::counter("isid.points.skipped")
        .with_description("Points skipped and left unfetched")
        .with_unit(Unit::Count)
        .with_labels(&["source", "year", "reason"]);

    // ========================================================================
    // Requests and sources
    // ========================================================================

    /// Requests retried against `exportImage` after `export` failed.
    pub const FALLBACK_REQUESTS: Metric = Metric::counter("isid.fetch.fallback_requests")
        .with_description("Requests retried against the exportImage endpoint")
        .with_unit(Unit::Count)
        .with_labels(&["source"]);

    /// Sources whose extent could not be resolved.
    pub const SOURCES_UNRESOLVED: Metric = Metric::counter("isid.sources.unresolved")
        .with_description("Sources skipped because their extent could not be resolved")
        .with_unit(Unit::Count)
        .with_labels(SOURCE_LABELS);

    /// Sources abandoned after a request timeout.
    pub const SOURCES_ABORTED: Metric = Metric::counter("isid.sources.aborted")
        .with_description("Sources abandoned after a request timed out")
        .with_unit(Unit::Count)
        .with_labels(SOURCE_LABELS);

    /// Availability table writes that failed.
    pub const PERSIST_FAILURES: Metric = Metric::counter("isid.store.persist_failures")
        .with_description("Availability table writes that failed")
        .with_unit(Unit::Count);

    /// Every metric declared above.
    pub const ALL: &[Metric] = &[
        TILES_SAVED,
        TILES_BLANK,
        TILE_BYTES,
        POINTS_SKIPPED,
        FALLBACK_REQUESTS,
        SOURCES_UNRESOLVED,
        SOURCES_ABORTED,
        PERSIST_FAILURES,
    ];
}

/// Register descriptions for all harvester metrics.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_labels() {
        let labels = SourceLabels::new("https://host/MapServer", 2020);
        let pairs = labels.to_labels();
        assert_eq!(pairs.len(), 2);
        assert!(pairs.contains(&("source", "https://host/MapServer".to_string())));
        assert!(pairs.contains(&("year", "2020".to_string())));
    }

    #[test]
    fn test_labels_with_reason() {
        let labels = SourceLabels::new("https://host/MapServer", 2018);
        let pairs = labels.with_reason("decode");
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[2], ("reason", "decode".to_string()));
    }

    #[test]
    fn test_metric_names_unique() {
        let mut names: Vec<_> = metric_defs::ALL.iter().map(|m| m.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), metric_defs::ALL.len());
    }

    #[test]
    fn test_all_metrics_prefixed() {
        for metric in metric_defs::ALL {
            assert!(metric.name.starts_with("isid."), "{}", metric.name);
            assert!(!metric.description.is_empty(), "{} has no description", metric.name);
        }
    }

    fn keys(labels: &[(&'static str, String)]) -> Vec<&'static str> {
        labels.iter().map(|(key, _)| *key).collect()
    }

    #[test]
    fn test_declared_labels_match_recorded_labels() {
        let labels = SourceLabels::new("https://host/MapServer", 2020);
        let source_keys = keys(&labels.to_labels());
        let reason_keys = keys(&labels.with_reason("http"));

        for metric in [
            &metric_defs::TILES_SAVED,
            &metric_defs::TILES_BLANK,
            &metric_defs::TILE_BYTES,
            &metric_defs::SOURCES_UNRESOLVED,
            &metric_defs::SOURCES_ABORTED,
        ] {
            assert_eq!(metric.labels, source_keys.as_slice(), "{}", metric.name);
        }
        assert_eq!(metric_defs::POINTS_SKIPPED.labels, reason_keys.as_slice());
        assert_eq!(metric_defs::FALLBACK_REQUESTS.labels, &["source"]);
        assert!(metric_defs::PERSIST_FAILURES.labels.is_empty());
    }

    #[test]
    fn test_describe_without_recorder() {
        // No recorder installed; must not panic.
        describe_metrics();
    }
}
