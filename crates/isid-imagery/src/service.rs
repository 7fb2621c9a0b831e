//! Talking to ArcGIS map/image services.
//!
//! Two requests are made against a service:
//!
//! - `GET <service>?f=json` for metadata (full extent and spatial reference)
//! - `GET <service>/export` for a tile, retried once against
//!   `<service>/exportImage` when the first answers with an error status
//!   (MapServers implement the former, ImageServers the latter)
//!
//! Every request carries the same fixed timeout. Tile requests never return
//! an error: the result is a [`FetchOutcome`] telling the orchestrator to use
//! the bytes, skip the point, or abandon the rest of the source.

use crate::spatial::ServiceMetadata;
use crate::{BoundingBox, HarvestError, Result};
use isid_metrics::metric_defs;
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Why a point was skipped. The point stays unfetched for a later run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Both endpoints answered with an error status.
    HttpStatus {
        /// Status from `export`.
        export: u16,
        /// Status from `exportImage`.
        export_image: u16,
    },
    /// The request failed for a reason other than a timeout.
    Request(String),
    /// The response was not a decodable image.
    Decode(String),
    /// The tile could not be written to disk.
    Write(String),
}

impl SkipReason {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::HttpStatus { .. } => "http",
            SkipReason::Request(_) => "request",
            SkipReason::Decode(_) => "decode",
            SkipReason::Write(_) => "write",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::HttpStatus {
                export,
                export_image,
            } => write!(f, "export HTTP {export}, exportImage HTTP {export_image}"),
            SkipReason::Request(msg) => write!(f, "request failed: {msg}"),
            SkipReason::Decode(msg) => write!(f, "undecodable image: {msg}"),
            SkipReason::Write(msg) => write!(f, "could not write tile: {msg}"),
        }
    }
}

/// Result of asking a service for one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Raw image bytes.
    Bytes(Vec<u8>),
    /// Give up on this point, continue with the next.
    Skip(SkipReason),
    /// A request timed out; stop dispatching points for this source.
    AbortSource(String),
}

/// A source of imagery tiles and service metadata.
///
/// Implementations must be shareable across the per-source worker pool.
pub trait ImageryService: Send + Sync {
    /// Fetch and parse `GET <url>?f=json`.
    fn service_metadata(&self, url: &str) -> Result<ServiceMetadata>;

    /// Fetch a `size` x `size` tile covering `window` (WGS84).
    fn fetch_tile(&self, url: &str, window: &BoundingBox, size: u32) -> FetchOutcome;
}

/// Request statistics for a client.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchStats {
    /// Tile requests issued, fallbacks included.
    pub requests: u64,
    /// Requests retried against `exportImage`.
    pub fallbacks: u64,
    /// Image bytes received.
    pub bytes_downloaded: u64,
}

/// Result of a single HTTP attempt.
enum Attempt {
    Image(Vec<u8>),
    Status(StatusCode),
    TimedOut(reqwest::Error),
    Failed(String),
}

/// Blocking HTTP client for ArcGIS REST services.
pub struct ArcGisClient {
    client: Client,
    timeout: Duration,
    requests: AtomicU64,
    fallbacks: AtomicU64,
    bytes_downloaded: AtomicU64,
}

impl fmt::Debug for ArcGisClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArcGisClient")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ArcGisClient {
    /// Create a client applying `timeout` to every request.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            timeout,
            requests: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
        })
    }

    /// The per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Statistics for this client's lifetime.
    pub fn stats(&self) -> FetchStats {
        FetchStats {
            requests: self.requests.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
        }
    }

    fn attempt(&self, endpoint: &str, params: &[(&str, String)]) -> Attempt {
        let url = match Url::parse_with_params(endpoint, params) {
            Ok(url) => url,
            Err(e) => return Attempt::Failed(format!("bad URL {endpoint}: {e}")),
        };
        self.requests.fetch_add(1, Ordering::Relaxed);

        let response = match self.client.get(url).send() {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Attempt::TimedOut(e),
            Err(e) => return Attempt::Failed(e.to_string()),
        };
        if !response.status().is_success() {
            return Attempt::Status(response.status());
        }
        match response.bytes() {
            Ok(bytes) => {
                self.bytes_downloaded
                    .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                Attempt::Image(bytes.to_vec())
            }
            Err(e) if e.is_timeout() => Attempt::TimedOut(e),
            Err(e) => Attempt::Failed(e.to_string()),
        }
    }
}

/// Query parameters for an export request.
pub fn export_params(window: &BoundingBox, size: u32) -> Vec<(&'static str, String)> {
    vec![
        ("bbox", window.to_query_param()),
        ("size", format!("{size},{size}")),
        ("f", "image".to_string()),
        ("bboxSR", "4326".to_string()),
    ]
}

impl ImageryService for ArcGisClient {
    fn service_metadata(&self, url: &str) -> Result<ServiceMetadata> {
        let endpoint =
            Url::parse_with_params(url, &[("f", "json")]).map_err(|e| HarvestError::InvalidUrl {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let response = self.client.get(endpoint).send()?;
        if !response.status().is_success() {
            return Err(HarvestError::MetadataStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        let body = response.bytes()?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn fetch_tile(&self, url: &str, window: &BoundingBox, size: u32) -> FetchOutcome {
        let params = export_params(window, size);
        let base = url.trim_end_matches('/');

        let export = format!("{base}/export");
        let first = match self.attempt(&export, &params) {
            Attempt::Image(bytes) => return FetchOutcome::Bytes(bytes),
            Attempt::TimedOut(e) => return FetchOutcome::AbortSource(format!("{export}: {e}")),
            Attempt::Failed(msg) => return FetchOutcome::Skip(SkipReason::Request(msg)),
            Attempt::Status(status) => status,
        };

        debug!(url = %base, status = first.as_u16(), "export failed, trying exportImage");
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(metric_defs::FALLBACK_REQUESTS.name, "source" => base.to_string())
            .increment(1);

        let export_image = format!("{base}/exportImage");
        match self.attempt(&export_image, &params) {
            Attempt::Image(bytes) => FetchOutcome::Bytes(bytes),
            Attempt::TimedOut(e) => FetchOutcome::AbortSource(format!("{export_image}: {e}")),
            Attempt::Failed(msg) => FetchOutcome::Skip(SkipReason::Request(msg)),
            Attempt::Status(second) => {
                warn!(
                    url = %base,
                    export = first.as_u16(),
                    export_image = second.as_u16(),
                    "both export endpoints failed"
                );
                FetchOutcome::Skip(SkipReason::HttpStatus {
                    export: first.as_u16(),
                    export_image: second.as_u16(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_params() {
        let window = BoundingBox::new(44.0, -93.5, 44.5, -93.0);
        let params = export_params(&window, 416);
        assert_eq!(
            params,
            vec![
                ("bbox", "-93.5,44,-93,44.5".to_string()),
                ("size", "416,416".to_string()),
                ("f", "image".to_string()),
                ("bboxSR", "4326".to_string()),
            ]
        );
    }

    #[test]
    fn test_skip_reason_labels() {
        let http = SkipReason::HttpStatus {
            export: 404,
            export_image: 500,
        };
        assert_eq!(http.label(), "http");
        assert_eq!(http.to_string(), "export HTTP 404, exportImage HTTP 500");
        assert_eq!(SkipReason::Decode("eof".into()).label(), "decode");
    }

    #[test]
    fn test_invalid_metadata_url() {
        let client = ArcGisClient::new(Duration::from_secs(1)).unwrap();
        assert!(matches!(
            client.service_metadata("not a url"),
            Err(HarvestError::InvalidUrl { .. })
        ));
    }
}
