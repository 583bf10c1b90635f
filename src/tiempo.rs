//! Main entry point: a configured client that serves weather snapshots for
//! one station page.

use crate::caption::{Captioner, SnapshotSummary, FALLBACK_CAPTION};
use crate::config::TiempoConfig;
use crate::error::TiempoError;
use crate::snapshot_cache::{CacheState, SnapshotCache};
use crate::types::snapshot::SnapshotResponse;
use crate::weather_data::fetcher::{ImnFetcher, PageSource};
use bon::bon;
use log::warn;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CAPTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Serves the station's weather snapshot through a TTL cache.
///
/// One `Tiempo` per process is the intended use; share it behind an `Arc`.
///
/// # Examples
///
/// ```no_run
/// # use tiempo::{RainThresholds, RiskThresholds, Tiempo, TiempoConfig, TiempoError};
/// # #[tokio::main]
/// # async fn main() -> Result<(), TiempoError> {
/// let config = TiempoConfig::builder()
///     .url("https://example.org/estacion.html")
///     .risk(RiskThresholds::new(20.0, 60.0)?)
///     .rain(RainThresholds::new(0.5, 4.0, 15.0)?)
///     .build();
/// let tiempo = Tiempo::new(config)?;
///
/// let response = tiempo.get_snapshot().await?;
/// if response.stale {
///     println!("Showing older data; upstream is not answering");
/// }
/// println!("{} {}", response.snapshot.risk.emoji, response.snapshot.risk.label);
/// # Ok(())
/// # }
/// ```
pub struct Tiempo {
    cache: SnapshotCache,
}

#[bon]
impl Tiempo {
    /// Creates a client that fetches `config.url` over HTTP.
    ///
    /// # Errors
    ///
    /// [`TiempoError::Config`] when the configuration does not validate,
    /// [`TiempoError::HttpClient`] when the HTTP client cannot be built.
    pub fn new(config: TiempoConfig) -> Result<Self, TiempoError> {
        config.validate()?;
        let fetcher = ImnFetcher::new(&config.url).map_err(TiempoError::HttpClient)?;
        Ok(Self {
            cache: SnapshotCache::new(Arc::new(fetcher), config)?,
        })
    }

    /// Creates a client around any page source, e.g. a fixture in tests.
    pub fn with_source(
        config: TiempoConfig,
        source: Arc<dyn PageSource>,
    ) -> Result<Self, TiempoError> {
        Ok(Self {
            cache: SnapshotCache::new(source, config)?,
        })
    }

    /// The current snapshot, refreshing first if the cached one has expired.
    ///
    /// A failed refresh is not an error as long as an older snapshot exists:
    /// it comes back with `stale` set.
    pub async fn get_snapshot(&self) -> Result<SnapshotResponse, TiempoError> {
        self.cache.get_snapshot().await
    }

    /// Forces a refresh now, ignoring the TTL.
    pub async fn refresh(&self) -> Result<SnapshotResponse, TiempoError> {
        self.cache.refresh().await
    }

    pub fn cache_state(&self) -> CacheState {
        self.cache.state()
    }

    pub fn config(&self) -> &TiempoConfig {
        self.cache.config()
    }

    /// Asks `captioner` for a one-liner about the current snapshot.
    ///
    /// Never fails: any problem (no snapshot, captioner error, timeout)
    /// yields `fallback`, which defaults to [`FALLBACK_CAPTION`].
    ///
    /// ```no_run
    /// # use tiempo::{Captioner, Tiempo};
    /// # async fn run(tiempo: &Tiempo, llm: &dyn Captioner) {
    /// let line = tiempo.caption().captioner(llm).call().await;
    /// # }
    /// ```
    #[builder]
    pub async fn caption(
        &self,
        captioner: &dyn Captioner,
        #[builder(into)] fallback: Option<String>,
        timeout: Option<Duration>,
    ) -> String {
        let fallback = fallback.unwrap_or_else(|| FALLBACK_CAPTION.to_string());
        let response = match self.get_snapshot().await {
            Ok(response) => response,
            Err(e) => {
                warn!("No snapshot to caption: {}", e);
                return fallback;
            }
        };
        let summary = SnapshotSummary::new(&response.snapshot, response.stale);
        let timeout = timeout.unwrap_or(DEFAULT_CAPTION_TIMEOUT);

        match tokio::time::timeout(timeout, captioner.caption(&summary)).await {
            Ok(Ok(line)) if !line.trim().is_empty() => line.trim().to_string(),
            Ok(Ok(_)) => fallback,
            Ok(Err(e)) => {
                warn!("{}", e);
                fallback
            }
            Err(_) => {
                warn!("Caption timed out after {:?}", timeout);
                fallback
            }
        }
    }
}
