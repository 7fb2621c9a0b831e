//! Driving acquisition source by source.
//!
//! For each data source the harvester resolves the source's extent, selects
//! the intersections inside it that are still unfetched for the source's
//! year, and then works through them:
//!
//! ```text
//! Resolving ──fail──────────────────────────────────────────────▶ Done
//!     │
//! Selecting ──empty─────────────────────────────────────────────▶ Done
//!     │
//! Fetching(point) ──timeout──────────────────────────────────────▶ Done
//!     │   ├──skip──▶ Fetching(next)
//!     │   └──bytes─▶ Classifying ──blank/saved, persist──▶ Fetching(next)
//!     └──exhausted──────────────────────────────────────────────▶ Done
//! ```
//!
//! ## Concurrency
//!
//! Points of one source are fanned out to `workers` threads. Workers own the
//! fetch, classification and tile write for a point; only this thread touches
//! the [`AvailabilityStore`], so every table cell has exactly one writer and
//! each status change is persisted before the next is applied. A timeout
//! raises a per-source flag that stops workers from starting new points while
//! requests already in flight finish and are recorded. Cancellation works the
//! same way across the whole run.

use crate::cancel::CancelToken;
use crate::classify::{classify_tile, tile_extension, TileClass};
use crate::config::HarvestConfig;
use crate::select::select_candidates;
use crate::service::{FetchOutcome, ImageryService, SkipReason};
use crate::spatial::resolve_extent;
use crate::store::AvailabilityStore;
use crate::window::query_window;
use crate::{AvailabilityStatus, DataSource, HarvestError, Intersection};
use crossbeam_channel::unbounded;
use isid_metrics::{metric_defs, SourceLabels};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

/// Log progress every this many recorded points.
const PROGRESS_INTERVAL: usize = 100;

/// How processing of one data source ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    /// Every candidate was attempted.
    Completed,
    /// Nothing inside the extent still needed imagery.
    NoCandidates,
    /// The extent could not be resolved; nothing was fetched.
    Unresolved(String),
    /// A request timed out; remaining points were left for a later run.
    Aborted(String),
    /// The operator interrupted the run.
    Cancelled,
}

/// What happened while processing one data source.
#[derive(Debug, Clone)]
pub struct SourceReport {
    /// The source processed.
    pub source: DataSource,
    /// How processing ended.
    pub outcome: SourceOutcome,
    /// Points selected for fetching.
    pub candidates: usize,
    /// Points recorded as saved.
    pub saved: usize,
    /// Points recorded as blank.
    pub blank: usize,
    /// Points skipped and left unfetched.
    pub skipped: usize,
}

impl SourceReport {
    fn new(source: &DataSource) -> Self {
        Self {
            source: source.clone(),
            outcome: SourceOutcome::Completed,
            candidates: 0,
            saved: 0,
            blank: 0,
            skipped: 0,
        }
    }

    /// Points that reached a result (saved, blank or skipped).
    pub fn attempted(&self) -> usize {
        self.saved + self.blank + self.skipped
    }
}

/// Reports for every source processed in a run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// One report per source, in processing order.
    pub sources: Vec<SourceReport>,
    /// Whether the run stopped because of an interrupt.
    pub cancelled: bool,
}

impl RunSummary {
    /// Total points saved.
    pub fn saved(&self) -> usize {
        self.sources.iter().map(|r| r.saved).sum()
    }

    /// Total points found blank.
    pub fn blank(&self) -> usize {
        self.sources.iter().map(|r| r.blank).sum()
    }

    /// Total points skipped.
    pub fn skipped(&self) -> usize {
        self.sources.iter().map(|r| r.skipped).sum()
    }
}

/// Where a saved tile for `(id, year)` lives.
pub fn tile_path(image_dir: &Path, id: i64, year: i32, extension: &str) -> PathBuf {
    image_dir.join(format!("{id}_{year}.{extension}"))
}

/// Write a tile through a sibling temporary file so an interrupted write
/// never leaves a truncated image under the final name.
pub fn write_tile(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Per-point work done on a worker thread.
enum PointResult {
    Classified {
        status: AvailabilityStatus,
        bytes: usize,
    },
    Skipped(SkipReason),
    Aborted(String),
}

struct PointWorker<'a, S: ?Sized> {
    service: &'a S,
    source: &'a DataSource,
    config: &'a HarvestConfig,
}

impl<S: ImageryService + ?Sized> PointWorker<'_, S> {
    fn process(&self, point: &Intersection) -> PointResult {
        let window = query_window(point.latitude, point.longitude, self.config.radius_m);
        let bytes =
            match self
                .service
                .fetch_tile(self.source.base_url(), &window, self.config.tile_size)
            {
                FetchOutcome::Bytes(bytes) => bytes,
                FetchOutcome::Skip(reason) => return PointResult::Skipped(reason),
                FetchOutcome::AbortSource(reason) => return PointResult::Aborted(reason),
            };

        match classify_tile(&bytes) {
            Err(e) => PointResult::Skipped(SkipReason::Decode(e.to_string())),
            Ok(TileClass::Blank) => PointResult::Classified {
                status: AvailabilityStatus::Blank,
                bytes: bytes.len(),
            },
            Ok(TileClass::Usable) => {
                let path = tile_path(
                    &self.config.image_dir,
                    point.id,
                    self.source.year,
                    tile_extension(&bytes),
                );
                match write_tile(&path, &bytes) {
                    Ok(()) => PointResult::Classified {
                        status: AvailabilityStatus::Saved,
                        bytes: bytes.len(),
                    },
                    Err(e) => {
                        PointResult::Skipped(SkipReason::Write(format!("{}: {e}", path.display())))
                    }
                }
            }
        }
    }
}

/// Drives the acquisition pipeline over a list of data sources.
pub struct Harvester<S> {
    service: S,
    store: AvailabilityStore,
    config: HarvestConfig,
    cancel: CancelToken,
}

impl<S: ImageryService> Harvester<S> {
    /// Create a harvester writing statuses to `store`.
    pub fn new(service: S, store: AvailabilityStore, config: HarvestConfig) -> Self {
        Self {
            service,
            store,
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Use an externally owned cancellation token (e.g. one wired to Ctrl-C).
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A handle that stops the run at the next safe point.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The availability table.
    pub fn store(&self) -> &AvailabilityStore {
        &self.store
    }

    /// The imagery service.
    pub fn service(&self) -> &S {
        &self.service
    }

    /// The active configuration.
    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Consume the harvester, returning the availability table.
    pub fn into_store(self) -> AvailabilityStore {
        self.store
    }

    /// Process every source in order. Failures are isolated per point and per
    /// source; only an interrupt ends the run early.
    pub fn run(&mut self, sources: &[DataSource]) -> RunSummary {
        let mut summary = RunSummary::default();
        info!(
            sources = sources.len(),
            intersections = self.store.len(),
            workers = self.config.worker_count(),
            "starting harvest"
        );

        for source in sources {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let report = self.harvest_source(source);
            let cancelled = report.outcome == SourceOutcome::Cancelled;
            summary.sources.push(report);
            if cancelled {
                summary.cancelled = true;
                break;
            }
        }
        if self.cancel.is_cancelled() {
            summary.cancelled = true;
        }

        info!(
            sources = summary.sources.len(),
            saved = summary.saved(),
            blank = summary.blank(),
            skipped = summary.skipped(),
            cancelled = summary.cancelled,
            "harvest finished"
        );
        summary
    }

    /// Process a single data source.
    pub fn harvest_source(&mut self, source: &DataSource) -> SourceReport {
        let labels = SourceLabels::new(source.base_url(), source.year);
        let mut report = SourceReport::new(source);
        info!(url = %source.url, year = source.year, "processing source");

        let bbox = match resolve_extent(&self.service, source, &self.config.known_extents) {
            Ok(bbox) => bbox,
            Err(e) => {
                warn!(url = %source.url, year = source.year, error = %e, "skipping source: extent not resolved");
                metrics::counter!(metric_defs::SOURCES_UNRESOLVED.name, &labels.to_labels())
                    .increment(1);
                report.outcome = SourceOutcome::Unresolved(e.to_string());
                return report;
            }
        };
        debug!(url = %source.url, ?bbox, "resolved extent");

        if self.store.ensure_year(source.year) {
            info!(year = source.year, "added availability column");
            self.persist_logged();
        }

        let candidates = select_candidates(&self.store, &bbox, source.year);
        report.candidates = candidates.len();
        if candidates.is_empty() {
            info!(url = %source.url, year = source.year, "no intersections need imagery from this source");
            report.outcome = SourceOutcome::NoCandidates;
            return report;
        }
        info!(url = %source.url, year = source.year, candidates = candidates.len(), "fetching tiles");

        if let Err(e) = std::fs::create_dir_all(&self.config.image_dir) {
            error!(dir = %self.config.image_dir.display(), error = %e, "cannot create image directory");
        }

        let abort_reason = self.fetch_candidates(source, &labels, candidates, &mut report);
        report.outcome = match abort_reason {
            Some(reason) => SourceOutcome::Aborted(reason),
            None if self.cancel.is_cancelled() && report.attempted() < report.candidates => {
                SourceOutcome::Cancelled
            }
            None => SourceOutcome::Completed,
        };

        info!(
            url = %source.url,
            year = source.year,
            saved = report.saved,
            blank = report.blank,
            skipped = report.skipped,
            outcome = ?report.outcome,
            "source done"
        );
        report
    }

    /// Fetch, classify and record every candidate. Returns the abort reason if
    /// a request timed out.
    fn fetch_candidates(
        &mut self,
        source: &DataSource,
        labels: &SourceLabels,
        candidates: Vec<Intersection>,
        report: &mut SourceReport,
    ) -> Option<String> {
        let Self {
            service,
            store,
            config,
            cancel,
        } = self;
        let cancel: &CancelToken = cancel;
        let worker = PointWorker {
            service: &*service,
            source,
            config: &*config,
        };
        let worker = &worker;
        let workers = config.worker_count().min(candidates.len());
        let abort = AtomicBool::new(false);
        let abort = &abort;

        let (job_tx, job_rx) = unbounded::<Intersection>();
        for point in candidates {
            // The receiver is alive, so an unbounded send cannot fail.
            let _ = job_tx.send(point);
        }
        drop(job_tx);

        let (result_tx, result_rx) = unbounded::<(Intersection, PointResult)>();
        let mut abort_reason = None;

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    for point in job_rx.iter() {
                        if abort.load(Ordering::SeqCst) || cancel.is_cancelled() {
                            break;
                        }
                        let result = worker.process(&point);
                        if matches!(result, PointResult::Aborted(_)) {
                            abort.store(true, Ordering::SeqCst);
                        }
                        if result_tx.send((point, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            for (point, result) in result_rx.iter() {
                match result {
                    PointResult::Classified { status, bytes } => {
                        metrics::counter!(metric_defs::TILE_BYTES.name, &labels.to_labels())
                            .increment(bytes as u64);
                        record_status(store, source, labels, &point, status, report);
                    }
                    PointResult::Skipped(reason) => {
                        warn!(id = point.id, year = source.year, %reason, "skipping point");
                        metrics::counter!(
                            metric_defs::POINTS_SKIPPED.name,
                            &labels.with_reason(reason.label())
                        )
                        .increment(1);
                        report.skipped += 1;
                    }
                    PointResult::Aborted(reason) => {
                        if abort_reason.is_none() {
                            warn!(
                                url = %source.url,
                                year = source.year,
                                id = point.id,
                                %reason,
                                "request timed out, abandoning remaining points of this source"
                            );
                            metrics::counter!(metric_defs::SOURCES_ABORTED.name, &labels.to_labels())
                                .increment(1);
                            abort_reason = Some(reason);
                        }
                    }
                }

                let done = report.attempted();
                if done % PROGRESS_INTERVAL == 0 && done > 0 {
                    info!(url = %source.url, done, total = report.candidates, "progress");
                }
            }
        });

        abort_reason
    }

    fn persist_logged(&self) {
        if let Err(e) = self.store.persist() {
            error!(path = %self.store.path().display(), error = %e, "failed to persist availability table");
            metrics::counter!(metric_defs::PERSIST_FAILURES.name).increment(1);
        }
    }
}

/// Apply one terminal status and persist it.
fn record_status(
    store: &mut AvailabilityStore,
    source: &DataSource,
    labels: &SourceLabels,
    point: &Intersection,
    status: AvailabilityStatus,
    report: &mut SourceReport,
) {
    match store.set_and_persist(point.id, source.year, status) {
        Ok(()) => debug!(id = point.id, year = source.year, %status, "recorded"),
        Err(e @ HarvestError::InvalidTransition { .. }) => {
            // Another source for the same year got here first.
            warn!(id = point.id, year = source.year, error = %e, "status already recorded");
            return;
        }
        Err(e) => {
            // The in-memory table holds the new status; the next successful
            // persist writes it out.
            error!(
                id = point.id,
                year = source.year,
                path = %store.path().display(),
                error = %e,
                "failed to persist availability table"
            );
            metrics::counter!(metric_defs::PERSIST_FAILURES.name).increment(1);
        }
    }

    match status {
        AvailabilityStatus::Saved => {
            report.saved += 1;
            metrics::counter!(metric_defs::TILES_SAVED.name, &labels.to_labels()).increment(1);
        }
        AvailabilityStatus::Blank => {
            report.blank += 1;
            metrics::counter!(metric_defs::TILES_BLANK.name, &labels.to_labels()).increment(1);
        }
        AvailabilityStatus::Unfetched => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_path() {
        let path = tile_path(Path::new("images"), 42, 2020, "png");
        assert_eq!(path, PathBuf::from("images/42_2020.png"));
    }

    #[test]
    fn test_write_tile_replaces_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = tile_path(dir.path(), 7, 2021, "png");
        std::fs::write(&path, b"partial").unwrap();

        write_tile(&path, b"full tile bytes").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"full tile bytes");
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("7_2021.png")]);
    }

    #[test]
    fn test_write_tile_missing_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = tile_path(&dir.path().join("absent"), 1, 2020, "png");
        assert!(write_tile(&path, b"bytes").is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_summary_totals() {
        let source = DataSource::new("https://host/MapServer", 2020);
        let mut a = SourceReport::new(&source);
        a.saved = 2;
        a.skipped = 1;
        let mut b = SourceReport::new(&source);
        b.blank = 3;
        let summary = RunSummary {
            sources: vec![a, b],
            cancelled: false,
        };
        assert_eq!(summary.saved(), 2);
        assert_eq!(summary.blank(), 3);
        assert_eq!(summary.skipped(), 1);
        assert_eq!(summary.sources[0].attempted(), 3);
    }
}
