//! In-memory collaborators shared by the unit and scenario tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use crate::api::{
    AnimeDetails, CatalogClient, Notification, Notifier, PersonalListClient, PersonalListEntry,
    SeasonEntry,
};
use crate::season::Season;

mod watcher_tests;

/// Airing-status string as the catalog reports it, plus plausible filler.
pub(crate) fn anime(id: u64, status: &str) -> AnimeDetails {
    AnimeDetails {
        id,
        title: format!("Anime {id}"),
        status: status.to_string(),
        score: Some(8.0),
        scored_by: 1000,
        rank: 100,
        episodes: 12,
        kind: "TV".into(),
        duration: "24 min per ep".into(),
        rating: "PG-13 - Teens 13 or older".into(),
        genres: vec!["Action".into()],
        studios: vec!["Studio".into()],
        url: format!("https://myanimelist.net/anime/{id}"),
        ..AnimeDetails::default()
    }
}

#[derive(Default)]
struct CatalogState {
    listing: Vec<SeasonEntry>,
    details: HashMap<u64, AnimeDetails>,
    detail_failures: HashMap<u64, u32>,
    listing_failures: u32,
    detail_calls: HashMap<u64, u32>,
    seasons_requested: Vec<(i32, Season)>,
}

/// Catalog returning the same listing for every season.
#[derive(Default)]
pub(crate) struct FakeCatalog {
    state: Mutex<CatalogState>,
}

fn consume_failure(remaining: &mut u32) -> bool {
    match *remaining {
        0 => false,
        u32::MAX => true,
        _ => {
            *remaining -= 1;
            true
        }
    }
}

impl FakeCatalog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// List `details` in every season and serve its details.
    pub(crate) fn add(&self, details: AnimeDetails) {
        let mut state = self.state.lock().unwrap();
        state.listing.push(SeasonEntry {
            id: details.id,
            title: details.title.clone(),
        });
        state.details.insert(details.id, details);
    }

    /// Serve `details` without listing it.
    pub(crate) fn add_unlisted(&self, details: AnimeDetails) {
        self.state.lock().unwrap().details.insert(details.id, details);
    }

    /// Fail the next `times` detail fetches of `id` (`u32::MAX`: forever).
    pub(crate) fn fail_details(&self, id: u64, times: u32) {
        self.state.lock().unwrap().detail_failures.insert(id, times);
    }

    /// Fail the next `times` listing fetches (`u32::MAX`: forever).
    pub(crate) fn fail_listing(&self, times: u32) {
        self.state.lock().unwrap().listing_failures = times;
    }

    pub(crate) fn detail_calls(&self, id: u64) -> u32 {
        let state = self.state.lock().unwrap();
        state.detail_calls.get(&id).copied().unwrap_or(0)
    }

    pub(crate) fn seasons_requested(&self) -> Vec<(i32, Season)> {
        self.state.lock().unwrap().seasons_requested.clone()
    }
}

#[async_trait::async_trait]
impl CatalogClient for FakeCatalog {
    async fn season_listing(&self, year: i32, season: Season) -> anyhow::Result<Vec<SeasonEntry>> {
        let mut state = self.state.lock().unwrap();
        state.seasons_requested.push((year, season));
        if consume_failure(&mut state.listing_failures) {
            anyhow::bail!("listing unavailable");
        }
        Ok(state.listing.clone())
    }

    async fn anime_details(&self, id: u64) -> anyhow::Result<AnimeDetails> {
        let mut state = self.state.lock().unwrap();
        *state.detail_calls.entry(id).or_default() += 1;
        if let Some(remaining) = state.detail_failures.get_mut(&id) {
            if consume_failure(remaining) {
                anyhow::bail!("http 503 Service Unavailable: anime {id}");
            }
        }
        state
            .details
            .get(&id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("http 404 Not Found: anime {id}"))
    }
}

/// Notifier recording what it was asked to send.
#[derive(Default)]
pub(crate) struct FakeNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
    delay: Mutex<Duration>,
}

impl FakeNotifier {
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Take `delay` to deliver each notification.
    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Titles of the notifications accepted so far.
    pub(crate) fn sent_titles(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.title.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl Notifier for FakeNotifier {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("http 500 Internal Server Error: pushover down");
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Personal list served from memory.
#[derive(Default)]
pub(crate) struct FakePersonalList {
    entries: Mutex<Vec<PersonalListEntry>>,
    calls: AtomicU32,
    failing: AtomicBool,
}

impl FakePersonalList {
    pub(crate) fn set_entries(&self, entries: Vec<PersonalListEntry>) {
        *self.entries.lock().unwrap() = entries;
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PersonalListClient for FakePersonalList {
    async fn full_list(&self, _user: &str) -> anyhow::Result<Vec<PersonalListEntry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("http 403 Forbidden: list is private");
        }
        Ok(self.entries.lock().unwrap().clone())
    }
}
