//! Time-boxed, single-flight cache around the fetch → parse → classify
//! pipeline.
//!
//! There is one logical entry. A fresh entry is returned without touching
//! upstream. Otherwise callers either start a refresh or attach to the one
//! already running, so at most one fetch is ever outstanding. A failed
//! refresh falls back to the previous snapshot, marked stale, and leaves the
//! entry expired so the next call tries again.

use crate::config::TiempoConfig;
use crate::error::TiempoError;
use crate::types::snapshot::{CacheDirective, Snapshot, SnapshotResponse};
use crate::weather_data::error::{FetchError, RefreshError};
use crate::weather_data::fetcher::PageSource;
use chrono::Utc;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use log::{info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task;
use tokio::time::Instant;

type RefreshOutcome = Result<Arc<Snapshot>, FailedRefresh>;
type InFlightRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Where the single cache entry is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Nothing has ever been published.
    Empty,
    Fresh,
    /// Older than the TTL; the next request refreshes.
    Expired,
    /// A refresh is running; requests attach to it.
    Refreshing,
}

/// A failed refresh, with the fallback every waiter on it is served.
///
/// The fallback is taken when the refresh fails, not when each waiter
/// resumes, so all of them see the same snapshot.
#[derive(Clone)]
struct FailedRefresh {
    error: Arc<RefreshError>,
    fallback: Option<Fallback>,
}

#[derive(Clone)]
struct Fallback {
    snapshot: Arc<Snapshot>,
    fetched_at: Instant,
    /// Whether the fallback was past its TTL when the refresh failed.
    stale: bool,
}

struct Published {
    snapshot: Arc<Snapshot>,
    fetched_at: Instant,
    generation: u64,
}

#[derive(Default)]
struct Slot {
    published: Option<Published>,
    in_flight: Option<(u64, InFlightRefresh)>,
    last_generation: u64,
}

struct Inner {
    source: Arc<dyn PageSource>,
    config: TiempoConfig,
    slot: Mutex<Slot>,
}

pub struct SnapshotCache {
    inner: Arc<Inner>,
}

impl SnapshotCache {
    /// # Errors
    ///
    /// [`TiempoError::Config`] when `config` does not validate.
    pub fn new(source: Arc<dyn PageSource>, config: TiempoConfig) -> Result<Self, TiempoError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                source,
                config,
                slot: Mutex::new(Slot::default()),
            }),
        })
    }

    pub fn config(&self) -> &TiempoConfig {
        &self.inner.config
    }

    pub fn state(&self) -> CacheState {
        let slot = self.inner.lock_slot();
        if slot.in_flight.is_some() {
            return CacheState::Refreshing;
        }
        match &slot.published {
            None => CacheState::Empty,
            Some(p) if self.inner.is_fresh(p) => CacheState::Fresh,
            Some(_) => CacheState::Expired,
        }
    }

    /// Returns the cached snapshot while it is fresh, otherwise the result
    /// of the (shared) refresh it triggers or joins.
    ///
    /// # Errors
    ///
    /// [`TiempoError::NoData`] when the refresh fails and there is no earlier
    /// snapshot to fall back to.
    pub async fn get_snapshot(&self) -> Result<SnapshotResponse, TiempoError> {
        let refresh = {
            let mut slot = self.inner.lock_slot();
            if let Some(published) = &slot.published {
                if self.inner.is_fresh(published) {
                    return Ok(self.inner.fresh_response(published));
                }
            }
            Inner::join_or_start(&self.inner, &mut slot)
        };
        let outcome = refresh.await;
        self.inner.respond(outcome)
    }

    /// Refreshes regardless of age. Still joins a refresh that is already running.
    pub async fn refresh(&self) -> Result<SnapshotResponse, TiempoError> {
        let refresh = {
            let mut slot = self.inner.lock_slot();
            Inner::join_or_start(&self.inner, &mut slot)
        };
        let outcome = refresh.await;
        self.inner.respond(outcome)
    }
}

impl Inner {
    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_fresh(&self, published: &Published) -> bool {
        published.fetched_at.elapsed() < self.config.ttl()
    }

    fn fresh_response(&self, published: &Published) -> SnapshotResponse {
        let max_age = self
            .config
            .ttl()
            .saturating_sub(published.fetched_at.elapsed());
        SnapshotResponse {
            snapshot: Arc::clone(&published.snapshot),
            stale: false,
            refresh_error: None,
            directive: CacheDirective::Fresh { max_age },
        }
    }

    fn join_or_start(this: &Arc<Inner>, slot: &mut Slot) -> InFlightRefresh {
        if let Some((_, refresh)) = &slot.in_flight {
            return refresh.clone();
        }
        slot.last_generation += 1;
        let generation = slot.last_generation;

        // Spawned so that callers giving up does not stall the refresh.
        let handle = task::spawn(Arc::clone(this).run_refresh(generation));
        let inner = Arc::clone(this);
        let refresh = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let mut slot = inner.lock_slot();
                    inner.clear_in_flight(&mut slot, generation);
                    Err(inner.failure(&slot, RefreshError::from(e)))
                }
            }
        }
        .boxed()
        .shared();
        slot.in_flight = Some((generation, refresh.clone()));
        refresh
    }

    async fn run_refresh(self: Arc<Self>, generation: u64) -> RefreshOutcome {
        info!(
            "Refreshing weather snapshot #{} from {}",
            generation,
            self.source.describe()
        );
        let outcome = self.fetch_and_build().await;

        let mut slot = self.lock_slot();
        self.clear_in_flight(&mut slot, generation);
        match outcome {
            Ok(snapshot) => {
                info!(
                    "Snapshot #{} ready: {} hourly, {} daily rows, risk {}",
                    generation,
                    snapshot.hourly.len(),
                    snapshot.daily.len(),
                    snapshot.risk.level
                );
                Ok(Self::publish(&mut slot, generation, Arc::new(snapshot)))
            }
            Err(e) => {
                warn!("Refresh #{} failed: {}", generation, e);
                Err(self.failure(&slot, e))
            }
        }
    }

    async fn fetch_and_build(&self) -> Result<Snapshot, RefreshError> {
        let timeout = self.config.fetch_timeout();
        // Dropping the fetch future on timeout cancels the request.
        let html = tokio::time::timeout(timeout, self.source.fetch())
            .await
            .map_err(|_| FetchError::Timeout {
                url: self.source.describe().to_string(),
                timeout,
            })??;

        let config = self.config.clone();
        let fetched = Utc::now();
        task::spawn_blocking(move || Snapshot::from_html(&html, &config, fetched)).await?
    }

    fn clear_in_flight(&self, slot: &mut Slot, generation: u64) {
        if slot.in_flight.as_ref().is_some_and(|(g, _)| *g == generation) {
            slot.in_flight = None;
        }
    }

    fn failure(&self, slot: &Slot, error: RefreshError) -> FailedRefresh {
        FailedRefresh {
            error: Arc::new(error),
            fallback: slot.published.as_ref().map(|published| Fallback {
                snapshot: Arc::clone(&published.snapshot),
                fetched_at: published.fetched_at,
                stale: !self.is_fresh(published),
            }),
        }
    }

    /// Publishes unless a later refresh already has; returns whichever
    /// snapshot ends up current.
    fn publish(slot: &mut Slot, generation: u64, snapshot: Arc<Snapshot>) -> Arc<Snapshot> {
        if let Some(current) = &slot.published {
            if current.generation > generation {
                warn!(
                    "Discarding snapshot #{}; #{} was published first",
                    generation, current.generation
                );
                return Arc::clone(&current.snapshot);
            }
        }
        slot.published = Some(Published {
            snapshot: Arc::clone(&snapshot),
            fetched_at: Instant::now(),
            generation,
        });
        snapshot
    }

    fn respond(&self, outcome: RefreshOutcome) -> Result<SnapshotResponse, TiempoError> {
        let failed = match outcome {
            Ok(snapshot) => {
                let slot = self.lock_slot();
                return Ok(match &slot.published {
                    Some(published) if Arc::ptr_eq(&snapshot, &published.snapshot) => {
                        self.fresh_response(published)
                    }
                    _ => SnapshotResponse {
                        snapshot,
                        stale: false,
                        refresh_error: None,
                        directive: CacheDirective::Fresh {
                            max_age: self.config.ttl(),
                        },
                    },
                });
            }
            Err(failed) => failed,
        };
        match failed.fallback {
            Some(fallback) if !fallback.stale => Ok(SnapshotResponse {
                snapshot: fallback.snapshot,
                stale: false,
                refresh_error: Some(failed.error),
                directive: CacheDirective::Fresh {
                    max_age: self.config.ttl().saturating_sub(fallback.fetched_at.elapsed()),
                },
            }),
            Some(fallback) => {
                warn!(
                    "Serving stale snapshot computed at {}: {}",
                    fallback.snapshot.computed_at, failed.error
                );
                Ok(SnapshotResponse {
                    snapshot: fallback.snapshot,
                    stale: true,
                    refresh_error: Some(failed.error),
                    directive: CacheDirective::Stale,
                })
            }
            None => Err(TiempoError::NoData(failed.error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RainThresholds, RiskThresholds};
    use crate::types::risk::RiskStatus;
    use crate::weather_data::error::ParseError;
    use futures_util::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone)]
    enum Reply {
        Page(String),
        Fail,
        Hang,
    }

    /// Replies in order; the last reply repeats.
    struct FakeSource {
        replies: Vec<Reply>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Self::with_delay(replies, Duration::from_millis(100))
        }

        fn with_delay(replies: Vec<Reply>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                replies,
                delay,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl PageSource for FakeSource {
        fn fetch(&self) -> BoxFuture<'_, Result<String, FetchError>> {
            async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                let reply = self.replies[call.min(self.replies.len() - 1)].clone();
                tokio::time::sleep(self.delay).await;
                match reply {
                    Reply::Page(html) => Ok(html),
                    Reply::Fail => Err(FetchError::Unavailable("connection reset".to_string())),
                    Reply::Hang => {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(String::new())
                    }
                }
            }
            .boxed()
        }

        fn describe(&self) -> &str {
            "fake://estacion"
        }
    }

    fn config() -> TiempoConfig {
        TiempoConfig::builder()
            .url("fake://estacion")
            .risk(RiskThresholds::new(20.0, 60.0).unwrap())
            .rain(RainThresholds::new(0.5, 4.0, 15.0).unwrap())
            .build()
    }

    fn page(sum_lluv: f64, lluv_ayer: f64) -> Reply {
        Reply::Page(format!(
            r#"<table>
                 <tr><th>Fecha</th><th>Temp</th><th>HR</th><th>Lluvia</th></tr>
                 <tr><td>14/03 13:00</td><td>24.5</td><td>88</td><td>2.3</td></tr>
               </table>
               <table>
                 <tr><th>SUM_lluv</th><th>LLUV_ayer</th></tr>
                 <tr><td>{sum_lluv}</td><td>{lluv_ayer}</td></tr>
               </table>"#
        ))
    }

    fn cache(source: &Arc<FakeSource>) -> SnapshotCache {
        SnapshotCache::new(source.clone(), config()).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let source = FakeSource::new(vec![Reply::Fail]);
        let config = TiempoConfig {
            fetch_timeout_secs: 0,
            ..config()
        };
        assert!(matches!(
            SnapshotCache::new(source, config),
            Err(TiempoError::Config(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_request_fetches_then_serves_fresh() {
        let source = FakeSource::new(vec![page(15.0, 40.0)]);
        let cache = cache(&source);
        assert_eq!(cache.state(), CacheState::Empty);

        let first = cache.get_snapshot().await.unwrap();
        assert!(!first.stale);
        assert_eq!(first.snapshot.risk.level, RiskStatus::Yellow);
        assert_eq!(cache.state(), CacheState::Fresh);

        tokio::time::advance(Duration::from_secs(120)).await;
        let second = cache.get_snapshot().await.unwrap();
        assert!(Arc::ptr_eq(&first.snapshot, &second.snapshot));
        assert_eq!(source.calls(), 1);
        assert_eq!(
            second.directive,
            CacheDirective::Fresh {
                max_age: Duration::from_secs(180)
            }
        );
        assert_eq!(second.cache_control(), "public, max-age=180");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_fetch() {
        let source = FakeSource::new(vec![page(15.0, 40.0)]);
        let cache = cache(&source);

        let responses = join_all((0..16).map(|_| cache.get_snapshot())).await;
        assert_eq!(source.calls(), 1);
        let first = responses[0].as_ref().unwrap();
        for response in &responses {
            assert!(Arc::ptr_eq(&first.snapshot, &response.as_ref().unwrap().snapshot));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_after_expiry_share_one_fetch() {
        let source = FakeSource::new(vec![page(15.0, 40.0), page(70.0, 40.0)]);
        let cache = cache(&source);
        let before = cache.get_snapshot().await.unwrap();

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(cache.state(), CacheState::Expired);

        let responses = join_all((0..8).map(|_| cache.get_snapshot())).await;
        assert_eq!(source.calls(), 2);
        let after = responses[0].as_ref().unwrap();
        assert!(!Arc::ptr_eq(&before.snapshot, &after.snapshot));
        assert_eq!(after.snapshot.risk.level, RiskStatus::Red);
        assert!(responses
            .iter()
            .all(|r| Arc::ptr_eq(&after.snapshot, &r.as_ref().unwrap().snapshot)));
        assert_eq!(cache.state(), CacheState::Fresh);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_across_tasks() {
        let source = FakeSource::with_delay(vec![page(1.0, 2.0)], Duration::from_millis(50));
        let cache = Arc::new(cache(&source));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_snapshot().await })
            })
            .collect();
        let mut snapshots = Vec::new();
        for handle in handles {
            snapshots.push(handle.await.unwrap().unwrap().snapshot);
        }
        assert_eq!(source.calls(), 1);
        assert!(snapshots.iter().all(|s| Arc::ptr_eq(s, &snapshots[0])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_serves_stale() {
        let source = FakeSource::new(vec![page(10.0, 0.0), Reply::Fail, page(10.0, 0.0)]);
        let cache = cache(&source);

        let t0 = cache.get_snapshot().await.unwrap();
        assert_eq!(t0.snapshot.risk.level, RiskStatus::Green);

        tokio::time::advance(Duration::from_secs(301)).await;
        let fallback = cache.get_snapshot().await.unwrap();
        assert!(fallback.stale);
        assert!(Arc::ptr_eq(&t0.snapshot, &fallback.snapshot));
        assert_eq!(fallback.snapshot.risk.level, RiskStatus::Green);
        assert!(matches!(
            fallback.refresh_error.as_deref(),
            Some(RefreshError::Transport(FetchError::Unavailable(_)))
        ));
        assert_eq!(fallback.directive, CacheDirective::Stale);
        assert_eq!(fallback.cache_control(), "no-cache, max-age=0, must-revalidate");

        // Back to expired, so the very next call retries.
        assert_eq!(cache.state(), CacheState::Expired);
        let recovered = cache.get_snapshot().await.unwrap();
        assert!(!recovered.stale);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_on_failed_refresh_share_fallback() {
        let source = FakeSource::new(vec![page(10.0, 0.0), Reply::Fail, page(70.0, 40.0)]);
        let cache = cache(&source);
        let t0 = cache.get_snapshot().await.unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;

        // Joins the failing refresh, then sits idle while others move on.
        let late = cache.get_snapshot();
        tokio::pin!(late);
        assert!(futures_util::poll!(&mut late).is_pending());

        let early = cache.get_snapshot().await.unwrap();
        assert_eq!(source.calls(), 2);
        let newer = cache.refresh().await.unwrap();
        assert_eq!(newer.snapshot.risk.level, RiskStatus::Red);

        let late = late.await.unwrap();
        assert!(early.stale && late.stale);
        assert!(Arc::ptr_eq(&early.snapshot, &t0.snapshot));
        assert!(Arc::ptr_eq(&early.snapshot, &late.snapshot));
        assert_eq!(late.directive, CacheDirective::Stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_refresh_failure_is_no_data() {
        let source = FakeSource::new(vec![Reply::Fail]);
        let cache = cache(&source);

        let err = cache.get_snapshot().await.unwrap_err();
        assert!(matches!(err, TiempoError::NoData(_)));
        assert_eq!(cache.state(), CacheState::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_page_is_fatal_parse_error() {
        let maintenance = Reply::Page("<html><body>Mantenimiento</body></html>".to_string());
        let source = FakeSource::new(vec![maintenance]);
        let cache = cache(&source);

        match cache.get_snapshot().await {
            Err(TiempoError::NoData(e)) => assert!(matches!(
                *e,
                RefreshError::Parse(ParseError::NoSections { .. })
            )),
            other => panic!("expected NoData, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_fetch_times_out() {
        let source = FakeSource::new(vec![page(10.0, 0.0), Reply::Hang]);
        let cache = cache(&source);
        cache.get_snapshot().await.unwrap();

        tokio::time::advance(Duration::from_secs(301)).await;
        let started = Instant::now();
        let response = cache.get_snapshot().await.unwrap();
        assert!(response.stale);
        assert!(matches!(
            response.refresh_error.as_deref(),
            Some(RefreshError::Transport(FetchError::Timeout { .. }))
        ));
        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(cache.state(), CacheState::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_refresh_ignores_ttl() {
        let source = FakeSource::new(vec![page(10.0, 0.0), page(30.0, 0.0)]);
        let cache = cache(&source);
        cache.get_snapshot().await.unwrap();

        let refreshed = cache.refresh().await.unwrap();
        assert_eq!(source.calls(), 2);
        assert_eq!(refreshed.snapshot.risk.level, RiskStatus::Yellow);
        let cached = cache.get_snapshot().await.unwrap();
        assert!(Arc::ptr_eq(&refreshed.snapshot, &cached.snapshot));
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_refresh_failure_keeps_fresh_data() {
        let source = FakeSource::new(vec![page(10.0, 0.0), Reply::Fail]);
        let cache = cache(&source);
        let first = cache.get_snapshot().await.unwrap();

        let response = cache.refresh().await.unwrap();
        assert!(!response.stale);
        assert!(response.refresh_error.is_some());
        assert!(Arc::ptr_eq(&first.snapshot, &response.snapshot));
    }

    #[test]
    fn test_older_generation_is_not_published() {
        let config = config();
        let build = |sum: f64| {
            let Reply::Page(html) = page(sum, 0.0) else {
                unreachable!()
            };
            Arc::new(Snapshot::from_html(&html, &config, Utc::now()).unwrap())
        };
        let newer = build(70.0);
        let older = build(10.0);

        let mut slot = Slot::default();
        let current = Inner::publish(&mut slot, 2, Arc::clone(&newer));
        assert!(Arc::ptr_eq(&current, &newer));

        let current = Inner::publish(&mut slot, 1, older);
        assert!(Arc::ptr_eq(&current, &newer));
        let published = slot.published.as_ref().unwrap();
        assert_eq!(published.generation, 2);
        assert_eq!(published.snapshot.risk.level, RiskStatus::Red);
    }
}
