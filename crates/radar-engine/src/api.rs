//! Public API types for the in-process watcher.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use malradar_core::{Blacklists, Configuration};
use serde::{Deserialize, Serialize};

use crate::season::Season;

/// Configuration for the in-process watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Directory holding the watch-list and the encountered-values files.
    pub state_dir: PathBuf,

    /// Number of seasons scanned backward when the watch-list is empty.
    pub nb_seasons: u32,

    /// Whether anime already finished during the initial scan are notified.
    pub notify_on_first_run: bool,

    /// Finished anime scoring below this are not notified.
    pub min_score: f64,

    /// Genres and types that end tracking without a notification.
    pub blacklists: Blacklists,

    /// MyAnimeList user whose list is checked before notifying.
    ///
    /// Anime present on that list with any status other than "plan to watch"
    /// are dropped.
    pub user: Option<String>,

    /// Time between two batches. The first batch runs at start.
    pub poll_interval: Duration,

    /// Minimum spacing between two catalog requests.
    pub rate_limit: Duration,

    /// Attempts made for a single catalog fetch before giving up.
    pub max_fetch_attempts: u32,
}

impl WatcherConfig {
    /// Default time between two batches.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

    /// Default catalog request spacing (the public Jikan API allows roughly one
    /// request per second).
    pub const DEFAULT_RATE_LIMIT: Duration = Duration::from_secs(2);

    /// Default fetch attempt cap.
    pub const DEFAULT_MAX_FETCH_ATTEMPTS: u32 = 5;

    /// Default backlog depth.
    pub const DEFAULT_NB_SEASONS: u32 = 4;

    /// Build a watcher configuration from a validated configuration file.
    pub fn from_configuration(conf: &Configuration, state_dir: PathBuf) -> Self {
        Self {
            state_dir,
            nb_seasons: conf.mal.init.nb_seasons,
            notify_on_first_run: conf.mal.init.notify,
            min_score: conf.mal.min_score,
            blacklists: conf.mal.blacklists.clone(),
            user: conf.mal.user.clone(),
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            rate_limit: Self::DEFAULT_RATE_LIMIT,
            max_fetch_attempts: Self::DEFAULT_MAX_FETCH_ATTEMPTS,
        }
    }
}

/// Airing status of a tracked anime, persisted as the catalog's own wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnimeStatus {
    /// Announced, not started yet.
    #[serde(rename = "Not yet aired")]
    NotYetAired,
    /// Episodes are being released.
    #[serde(rename = "Currently Airing")]
    Airing,
    /// The last episode aired.
    #[serde(rename = "Finished Airing")]
    Finished,
}

impl AnimeStatus {
    /// Catalog wording of the status.
    pub fn as_upstream(self) -> &'static str {
        match self {
            AnimeStatus::NotYetAired => "Not yet aired",
            AnimeStatus::Airing => "Currently Airing",
            AnimeStatus::Finished => "Finished Airing",
        }
    }

    /// Parse the catalog wording; `None` for anything unknown.
    pub fn from_upstream(raw: &str) -> Option<Self> {
        match raw {
            "Not yet aired" => Some(AnimeStatus::NotYetAired),
            "Currently Airing" => Some(AnimeStatus::Airing),
            "Finished Airing" => Some(AnimeStatus::Finished),
            _ => None,
        }
    }
}

/// Full catalog record of one anime.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnimeDetails {
    /// MyAnimeList identifier.
    pub id: u64,
    /// Default (usually romanized) title.
    pub title: String,
    /// English title, when the catalog has one.
    pub title_english: Option<String>,
    /// Raw airing status as reported by the catalog.
    pub status: String,
    /// Average score.
    pub score: Option<f64>,
    /// Number of users who scored it.
    pub scored_by: u64,
    /// Rank by score.
    pub rank: u64,
    /// Episode count, 0 when unknown.
    pub episodes: u32,
    /// Media type (`TV`, `Movie`, `OVA`...).
    pub kind: String,
    /// Episode duration as free text.
    pub duration: String,
    /// Age rating.
    pub rating: String,
    /// Genre names.
    pub genres: Vec<String>,
    /// Studio names.
    pub studios: Vec<String>,
    /// Cover image.
    pub image_url: Option<String>,
    /// Page of the anime on MyAnimeList.
    pub url: String,
    /// Start of airing.
    pub aired_from: Option<DateTime<Utc>>,
    /// End of airing.
    pub aired_to: Option<DateTime<Utc>>,
}

impl AnimeDetails {
    /// Parsed airing status.
    pub fn status(&self) -> Option<AnimeStatus> {
        AnimeStatus::from_upstream(&self.status)
    }

    /// English title when available, otherwise the default title.
    pub fn display_title(&self) -> &str {
        match self.title_english.as_deref() {
            Some(title) if !title.trim().is_empty() => title,
            _ => &self.title,
        }
    }
}

/// One anime of a season listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeasonEntry {
    /// MyAnimeList identifier.
    pub id: u64,
    /// Default title.
    pub title: String,
}

/// Status of an anime on a user's personal list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersonalListStatus {
    /// Being watched.
    Watching,
    /// Watched.
    Completed,
    /// Paused.
    OnHold,
    /// Abandoned.
    Dropped,
    /// Planned.
    PlanToWatch,
    /// Any other code.
    Unknown(u8),
}

impl PersonalListStatus {
    /// Map the numeric code used by the MyAnimeList list endpoint.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => PersonalListStatus::Watching,
            2 => PersonalListStatus::Completed,
            3 => PersonalListStatus::OnHold,
            4 => PersonalListStatus::Dropped,
            6 => PersonalListStatus::PlanToWatch,
            other => PersonalListStatus::Unknown(other),
        }
    }
}

/// One anime of a user's personal list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalListEntry {
    /// MyAnimeList identifier.
    pub id: u64,
    /// List status.
    pub status: PersonalListStatus,
}

/// Notification priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Priority {
    /// No sound or vibration.
    Low,
    /// Default.
    #[default]
    Normal,
    /// Bypasses quiet hours.
    High,
}

/// A push notification ready to be delivered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Title line.
    pub title: String,
    /// Body. Interpreted as HTML when `html` is set.
    pub message: String,
    /// Whether `message` contains HTML markup.
    pub html: bool,
    /// Supplementary link.
    pub url: Option<String>,
    /// Caption of `url`.
    pub url_title: Option<String>,
    /// Unix timestamp shown instead of the delivery time.
    pub timestamp: Option<i64>,
    /// Priority.
    pub priority: Priority,
    /// Image downloaded and attached by the notifier.
    pub image_url: Option<String>,
}

/// Source of season listings and anime details.
#[async_trait::async_trait]
pub trait CatalogClient: Send + Sync {
    /// All anime of a season.
    async fn season_listing(&self, year: i32, season: Season) -> anyhow::Result<Vec<SeasonEntry>>;

    /// Details of a single anime.
    async fn anime_details(&self, id: u64) -> anyhow::Result<AnimeDetails>;
}

/// Source of a user's personal anime list.
#[async_trait::async_trait]
pub trait PersonalListClient: Send + Sync {
    /// Every entry of `user`'s list, whatever its status.
    async fn full_list(&self, user: &str) -> anyhow::Result<Vec<PersonalListEntry>>;
}

/// Push notification sink.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification. `Ok` means the sink accepted it.
    async fn send(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// External services the watcher talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Anime catalog.
    pub catalog: Arc<dyn CatalogClient>,
    /// Personal list lookup, used when a user is configured.
    pub personal_list: Arc<dyn PersonalListClient>,
    /// Notification sink.
    pub notifier: Arc<dyn Notifier>,
}

/// Counters of a completed batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchSummary {
    /// Whether this batch seeded an empty watch-list.
    pub seeded: bool,
    /// Finished anime handed to the dispatcher.
    pub candidates: usize,
    /// Notifications delivered.
    pub notified: usize,
    /// Candidates dropped by a filter.
    pub filtered: usize,
    /// Candidates whose delivery failed, kept for the next batch.
    pub failed: usize,
    /// Anime tracked once the batch completed.
    pub tracked: usize,
    /// Batch duration (milliseconds).
    pub elapsed_ms: u64,
}

/// Watcher event stream payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum WatcherEvent {
    /// Watcher started.
    Started,
    /// A batch completed (or was abandoned because of a stop request).
    BatchFinished {
        /// Batch counters.
        summary: BatchSummary,
    },
    /// State was written to disk on request.
    CheckpointSaved,
    /// Watcher is stopping (graceful shutdown requested).
    StopRequested,
    /// Watcher stopped and flushed its state.
    Stopped,
}

/// Current watcher state snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Whether the watcher has been asked to stop.
    pub stop_requested: bool,
    /// Tracked anime and their last known status.
    pub watch_list: BTreeMap<u64, AnimeStatus>,
    /// Every genre seen so far.
    pub genres: BTreeSet<String>,
    /// Every rating seen so far.
    pub ratings: BTreeSet<String>,
    /// Every media type seen so far.
    pub types: BTreeSet<String>,
    /// Anime that reached a final outcome and must not be rediscovered.
    pub resolved: BTreeSet<u64>,
}

/// Handle to a running in-process watcher instance.
pub struct WatcherHandle {
    pub(crate) inner: Arc<crate::engine::WatcherInner>,
    pub(crate) join: tokio::task::JoinHandle<anyhow::Result<()>>,
}

/// Start a new watcher.
///
/// The persisted state is loaded before this returns; an unreadable watch-list
/// is reported here instead of being silently replaced by a fresh seed.
pub fn start_watcher(
    config: WatcherConfig,
    collaborators: Collaborators,
) -> anyhow::Result<WatcherHandle> {
    crate::engine::start_watcher(config, collaborators)
}

impl WatcherHandle {
    /// Subscribe to the watcher event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WatcherEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Copy of the current tracked state.
    pub async fn snapshot(&self) -> StatusSnapshot {
        self.inner.snapshot().await
    }

    /// Request a graceful shutdown (the running batch is abandoned at its next
    /// request, then state is flushed).
    pub fn request_stop(&self) {
        self.inner.request_stop();
    }

    /// Write the current state to disk without stopping.
    pub async fn checkpoint(&self) -> anyhow::Result<()> {
        self.inner.checkpoint().await
    }

    /// Wait for the watcher to stop, returning the watcher task result.
    pub async fn wait(self) -> anyhow::Result<()> {
        match self.join.await {
            Ok(res) => res,
            Err(err) => Err(anyhow::anyhow!("watcher task join error: {err}")),
        }
    }
}
