use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use malradar_core::config::{NB_SEASONS_MAX, NB_SEASONS_MIN};
use tokio::sync::{Mutex, Notify, broadcast};
use tracing::{debug, error, info, warn};

use crate::api::{
    AnimeDetails, BatchSummary, Collaborators, StatusSnapshot, WatcherConfig, WatcherEvent,
    WatcherHandle,
};
use crate::dispatch::Dispatcher;
use crate::ratelimit::RateLimiter;
use crate::retry::CatalogFetcher;
use crate::season::current_season;
use crate::store::{StateStore, TrackedState};
use crate::{refresh, seed};

/// Cooperative stop flag that can also be awaited.
#[derive(Debug, Default)]
pub(crate) struct StopSignal {
    requested: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Returns `true` for the first request only.
    pub(crate) fn request(&self) -> bool {
        if self.requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.notify.notify_waiters();
        true
    }

    pub(crate) fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolve once a stop has been requested.
    pub(crate) async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent request can't slip
        // between the check and the await.
        notified.as_mut().enable();
        if self.is_requested() {
            return;
        }
        notified.await;
    }
}

pub(crate) struct WatcherInner {
    pub(crate) event_tx: broadcast::Sender<WatcherEvent>,
    state: Mutex<TrackedState>,
    // Set until a seeding pass commits.
    needs_seed: AtomicBool,
    store: StateStore,
    stop: StopSignal,
}

impl WatcherInner {
    pub(crate) fn request_stop(&self) {
        if self.stop.request() {
            info!("stop requested");
            let _ = self.event_tx.send(WatcherEvent::StopRequested);
        }
    }

    fn emit(&self, event: WatcherEvent) {
        let _ = self.event_tx.send(event);
    }

    pub(crate) async fn snapshot(&self) -> StatusSnapshot {
        let state = self.state.lock().await;
        StatusSnapshot {
            stop_requested: self.stop.is_requested(),
            watch_list: state.watch_list.clone(),
            genres: state.genres.clone(),
            ratings: state.ratings.clone(),
            types: state.types.clone(),
            resolved: state.resolved.clone(),
        }
    }

    async fn save(&self) -> anyhow::Result<()> {
        let tracked = self.store.persist(&self.state).await?;
        info!(tracked, dir = %self.store.dir().display(), "state saved");
        Ok(())
    }

    pub(crate) async fn checkpoint(&self) -> anyhow::Result<()> {
        self.save().await?;
        self.emit(WatcherEvent::CheckpointSaved);
        Ok(())
    }
}

/// What the dispatcher made of a batch's candidates.
#[derive(Debug, Default)]
pub(crate) struct DispatchCounts {
    pub(crate) notified: usize,
    pub(crate) filtered: usize,
    pub(crate) failed: usize,
}

struct WatcherRuntime {
    cfg: WatcherConfig,
    collaborators: Collaborators,
    limiter: RateLimiter,
    inner: Arc<WatcherInner>,
}

impl WatcherRuntime {
    fn fetcher(&mut self) -> CatalogFetcher<'_> {
        CatalogFetcher {
            catalog: self.collaborators.catalog.as_ref(),
            limiter: &mut self.limiter,
            stop: &self.inner.stop,
            max_attempts: self.cfg.max_fetch_attempts,
        }
    }

    async fn batch(&mut self) -> BatchSummary {
        let started = Instant::now();
        let mut summary = BatchSummary::default();
        debug!("starting new batch");

        let seeding = self.inner.needs_seed.load(Ordering::SeqCst);
        let candidates = if seeding {
            summary.seeded = true;
            self.seed().await
        } else {
            self.update().await
        };

        summary.candidates = candidates.len();
        if self.inner.stop.is_requested() {
            if !candidates.is_empty() {
                info!(
                    candidates = candidates.len(),
                    "stop requested, leaving candidates for the next run"
                );
            }
        } else if !candidates.is_empty() {
            let dispatcher = Dispatcher {
                cfg: &self.cfg,
                collaborators: &self.collaborators,
                state: &self.inner.state,
                stop: &self.inner.stop,
            };
            let counts = dispatcher.dispatch(candidates).await;
            summary.notified = counts.notified;
            summary.filtered = counts.filtered;
            summary.failed = counts.failed;
        }

        summary.tracked = self.inner.state.lock().await.watch_list.len();
        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            seeded = summary.seeded,
            candidates = summary.candidates,
            notified = summary.notified,
            filtered = summary.filtered,
            failed = summary.failed,
            tracked = summary.tracked,
            "batch executed in {:?}",
            started.elapsed()
        );
        summary
    }

    async fn seed(&mut self) -> Vec<AnimeDetails> {
        info!("initializing watch-list...");
        let (year, season) = current_season();
        let existing = self.inner.state.lock().await.clone();
        let nb_seasons = self.cfg.nb_seasons;
        let notify = self.cfg.notify_on_first_run;

        let res = seed::build_initial_list(
            &mut self.fetcher(),
            &existing,
            (year, season),
            nb_seasons,
            notify,
        )
        .await;

        match res {
            Ok(outcome) => {
                let mut state = self.inner.state.lock().await;
                outcome.commit(&mut state);
                self.inner.needs_seed.store(false, Ordering::SeqCst);
                info!(
                    tracked = state.watch_list.len(),
                    candidates = outcome.candidates.len(),
                    "watch-list initialized"
                );
                outcome.candidates
            }
            Err(err) => {
                if self.inner.stop.is_requested() {
                    info!("watch-list initialization abandoned: {err}");
                } else {
                    error!("failed to build initial list: {err}");
                }
                Vec::new()
            }
        }
    }

    async fn update(&mut self) -> Vec<AnimeDetails> {
        let state = &self.inner.state;
        let mut fetcher = CatalogFetcher {
            catalog: self.collaborators.catalog.as_ref(),
            limiter: &mut self.limiter,
            stop: &self.inner.stop,
            max_attempts: self.cfg.max_fetch_attempts,
        };
        refresh::update(&mut fetcher, state).await
    }

    async fn run(mut self) -> anyhow::Result<()> {
        self.inner.emit(WatcherEvent::Started);

        let mut ticker = tokio::time::interval(self.cfg.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let inner = self.inner.clone();
            tokio::select! {
                biased;
                _ = inner.stop.wait() => break,
                _ = ticker.tick() => {
                    let summary = self.batch().await;
                    self.inner.emit(WatcherEvent::BatchFinished { summary });
                }
            }
        }

        info!("watcher stopping, saving state");
        if let Err(err) = self.inner.save().await {
            error!("failed to save state on stop: {err:#}");
        }
        self.inner.emit(WatcherEvent::Stopped);
        Ok(())
    }
}

pub(crate) fn start_watcher(
    mut cfg: WatcherConfig,
    collaborators: Collaborators,
) -> anyhow::Result<WatcherHandle> {
    if cfg.poll_interval == Duration::ZERO {
        cfg.poll_interval = WatcherConfig::DEFAULT_POLL_INTERVAL;
    }
    if cfg.max_fetch_attempts == 0 {
        cfg.max_fetch_attempts = WatcherConfig::DEFAULT_MAX_FETCH_ATTEMPTS;
    }
    if cfg.nb_seasons == 0 {
        cfg.nb_seasons = WatcherConfig::DEFAULT_NB_SEASONS;
    }
    let clamped = cfg.nb_seasons.clamp(NB_SEASONS_MIN, NB_SEASONS_MAX);
    if clamped != cfg.nb_seasons {
        warn!(
            requested = cfg.nb_seasons,
            used = clamped,
            "number of seasons to scrape is out of range"
        );
        cfg.nb_seasons = clamped;
    }
    if !cfg.min_score.is_finite() || cfg.min_score < 0.0 {
        warn!(min_score = cfg.min_score, "invalid minimum score, using 0");
        cfg.min_score = 0.0;
    }

    let store = StateStore::new(cfg.state_dir.clone());
    let loaded = store.load()?;

    let (event_tx, _) = broadcast::channel::<WatcherEvent>(1024);
    let inner = Arc::new(WatcherInner {
        event_tx,
        state: Mutex::new(loaded.state),
        needs_seed: AtomicBool::new(loaded.needs_seed),
        store,
        stop: StopSignal::new(),
    });

    let runtime = WatcherRuntime {
        limiter: RateLimiter::new(cfg.rate_limit),
        cfg,
        collaborators,
        inner: inner.clone(),
    };

    let join = tokio::spawn(runtime.run());
    Ok(WatcherHandle { inner, join })
}
