//! HTTP client for downloading trail geometry resources.
//!
//! Each configured source is downloaded, parsed, and only written into the
//! trail data directory when it yields at least one trail segment. A failed
//! download leaves the previous file in place, so a bad fetch can never
//! empty the network.
//!
//! - 30 s request timeout
//! - Retry with exponential backoff on transport errors, 429 and 5xx

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures::future::join_all;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, TrailSource};
use crate::error::{Result, TrailMatchError};
use crate::network::parse_resource;

const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Outcome of fetching one trail source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub name: String,
    pub url: String,
    pub success: bool,
    /// Segments in the downloaded resource
    pub segments: usize,
    pub bytes: usize,
    pub error: Option<String>,
}

impl FetchResult {
    fn failed(source: &TrailSource, error: String) -> Self {
        Self {
            name: source.name.clone(),
            url: source.url.clone(),
            success: false,
            segments: 0,
            bytes: 0,
            error: Some(error),
        }
    }
}

/// Downloads trail sources into a trail data directory.
pub struct TrailDataFetcher {
    client: Client,
    target_dir: PathBuf,
    initial_backoff: Duration,
}

impl TrailDataFetcher {
    pub fn new<P: Into<PathBuf>>(target_dir: P) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TrailMatchError::Http {
                message: format!("Failed to create HTTP client: {}", e),
                status_code: None,
            })?;

        Ok(Self {
            client,
            target_dir: target_dir.into(),
            initial_backoff: INITIAL_BACKOFF,
        })
    }

    /// Override the first retry delay (doubles on each retry).
    pub fn with_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    /// Fetch every source concurrently.
    pub async fn fetch_all(&self, sources: &[TrailSource]) -> Vec<FetchResult> {
        info!("[TrailFetcher] Fetching {} trail sources", sources.len());
        let start = Instant::now();

        let results = join_all(sources.iter().map(|s| self.fetch_source(s))).await;

        info!(
            "[TrailFetcher] Completed: {}/{} successful in {:.2}s",
            results.iter().filter(|r| r.success).count(),
            results.len(),
            start.elapsed().as_secs_f64()
        );
        results
    }

    /// Download, validate and install one source.
    pub async fn fetch_source(&self, source: &TrailSource) -> FetchResult {
        let body = match self.download(&source.url).await {
            Ok(body) => body,
            Err(e) => {
                warn!("[TrailFetcher] {} failed: {}", source.name, e);
                return FetchResult::failed(source, e.to_string());
            }
        };

        match install_resource(&self.target_dir, &source.name, &body) {
            Ok(segments) => {
                info!(
                    "[TrailFetcher] Installed {} ({} segments, {} bytes)",
                    source.name,
                    segments,
                    body.len()
                );
                FetchResult {
                    name: source.name.clone(),
                    url: source.url.clone(),
                    success: true,
                    segments,
                    bytes: body.len(),
                    error: None,
                }
            }
            Err(e) => {
                warn!("[TrailFetcher] Rejected {}: {}", source.name, e);
                FetchResult::failed(source, e.to_string())
            }
        }
    }

    async fn download(&self, url: &str) -> Result<String> {
        let mut retries = 0;

        loop {
            let retryable = match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp.text().await.map_err(|e| TrailMatchError::Http {
                            message: format!("Body error: {}", e),
                            status_code: Some(status.as_u16()),
                        });
                    }

                    let error = TrailMatchError::Http {
                        message: format!("GET {} returned {}", url, status),
                        status_code: Some(status.as_u16()),
                    };
                    if status != StatusCode::TOO_MANY_REQUESTS && !status.is_server_error() {
                        return Err(error);
                    }
                    error
                }
                Err(e) => TrailMatchError::Http {
                    message: format!("Request error: {}", e),
                    status_code: None,
                },
            };

            retries += 1;
            if retries > MAX_RETRIES {
                return Err(retryable);
            }

            let backoff = self.initial_backoff * (1 << (retries - 1));
            warn!(
                "[TrailFetcher] {} for {}, retry {} after {:?}",
                retryable, url, retries, backoff
            );
            tokio::time::sleep(backoff).await;
        }
    }
}

/// Validate `body` as a trail resource and atomically replace
/// `dir/name` with it. Returns the number of segments it contains.
pub fn install_resource(dir: &Path, name: &str, body: &str) -> Result<usize> {
    let segments = parse_resource(name, body)?.len();
    if segments == 0 {
        return Err(TrailMatchError::NetworkResource {
            name: name.to_string(),
            message: "no line-strings with two or more points".to_string(),
        });
    }

    fs::create_dir_all(dir)?;
    let target = dir.join(name);
    let staging = dir.join(format!("{}.download", name));
    fs::write(&staging, body)?;
    fs::rename(&staging, &target)?;
    debug!("[TrailFetcher] Wrote {}", target.display());
    Ok(segments)
}

/// Blocking wrapper: fetch the configured sources into the configured
/// trail data directory on a private runtime.
pub fn fetch_trail_data_sync(config: &EngineConfig) -> Result<Vec<FetchResult>> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let fetcher = TrailDataFetcher::new(&config.trail_data_dir)?;
    Ok(rt.block_on(fetcher.fetch_all(&config.trail_sources)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRAIL: &str = r#"{"type": "FeatureCollection", "features": [
        {"type": "Feature", "geometry": {"type": "LineString",
            "coordinates": [[-82.40, 34.85], [-82.40, 34.86]]}}
    ]}"#;

    #[test]
    fn test_install_valid_resource() {
        let dir = tempfile::tempdir().unwrap();
        let segments = install_resource(dir.path(), "main.geojson", TRAIL).unwrap();
        assert_eq!(segments, 1);
        assert_eq!(fs::read_to_string(dir.path().join("main.geojson")).unwrap(), TRAIL);
        assert!(!dir.path().join("main.geojson.download").exists());
    }

    #[test]
    fn test_invalid_resource_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        install_resource(dir.path(), "main.geojson", TRAIL).unwrap();

        assert!(install_resource(dir.path(), "main.geojson", "<html>maintenance</html>").is_err());
        let empty = r#"{"type": "FeatureCollection", "features": []}"#;
        assert!(install_resource(dir.path(), "main.geojson", empty).is_err());

        assert_eq!(fs::read_to_string(dir.path().join("main.geojson")).unwrap(), TRAIL);
    }

    #[tokio::test]
    async fn test_unreachable_source_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = TrailDataFetcher::new(dir.path())
            .unwrap()
            .with_backoff(Duration::from_millis(1));
        let source = TrailSource {
            name: "main.geojson".to_string(),
            url: "http://127.0.0.1:9/main.geojson".to_string(),
        };

        let results = fetcher.fetch_all(&[source]).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(results[0].error.is_some());
        assert!(!dir.path().join("main.geojson").exists());
    }
}
