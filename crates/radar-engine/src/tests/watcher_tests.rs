use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast;

use super::{FakeCatalog, FakeNotifier, FakePersonalList, anime};
use crate::api::{
    AnimeDetails, AnimeStatus, BatchSummary, Collaborators, PersonalListEntry, PersonalListStatus,
    StatusSnapshot, WatcherConfig, WatcherEvent, WatcherHandle, start_watcher,
};

struct Fixture {
    dir: TempDir,
    catalog: Arc<FakeCatalog>,
    notifier: Arc<FakeNotifier>,
    personal_list: Arc<FakePersonalList>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            catalog: Arc::new(FakeCatalog::new()),
            notifier: Arc::new(FakeNotifier::default()),
            personal_list: Arc::new(FakePersonalList::default()),
        }
    }

    fn config(&self) -> WatcherConfig {
        WatcherConfig {
            state_dir: self.dir.path().to_path_buf(),
            nb_seasons: 1,
            notify_on_first_run: false,
            min_score: 7.0,
            blacklists: Default::default(),
            user: None,
            poll_interval: Duration::from_secs(3600),
            rate_limit: Duration::from_millis(1),
            max_fetch_attempts: 2,
        }
    }

    fn collaborators(&self) -> Collaborators {
        Collaborators {
            catalog: self.catalog.clone(),
            personal_list: self.personal_list.clone(),
            notifier: self.notifier.clone(),
        }
    }

    fn preload(&self, watch_list: &str) {
        std::fs::write(self.dir.path().join("animes_state.json"), watch_list).unwrap();
    }

    fn saved_watch_list(&self) -> Option<serde_json::Value> {
        let raw = std::fs::read_to_string(self.dir.path().join("animes_state.json")).ok()?;
        Some(serde_json::from_str(&raw).unwrap())
    }

    fn start(&self, cfg: WatcherConfig) -> (WatcherHandle, broadcast::Receiver<WatcherEvent>) {
        let handle = start_watcher(cfg, self.collaborators()).unwrap();
        let events = handle.subscribe();
        (handle, events)
    }

    /// Start a watcher, let it run one batch, stop it.
    async fn run_once(&self, cfg: WatcherConfig) -> (BatchSummary, StatusSnapshot) {
        let (handle, mut events) = self.start(cfg);
        let summary = next_batch(&mut events).await;
        let snapshot = handle.snapshot().await;
        handle.request_stop();
        handle.wait().await.unwrap();
        (summary, snapshot)
    }
}

async fn next_batch(events: &mut broadcast::Receiver<WatcherEvent>) -> BatchSummary {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(WatcherEvent::BatchFinished { summary }) => return summary,
                Ok(_) => continue,
                Err(err) => panic!("event stream closed: {err}"),
            }
        }
    })
    .await
    .expect("batch did not finish in time")
}

#[tokio::test]
async fn first_run_tracks_airing_anime_without_notifying() {
    let fx = Fixture::new();
    fx.catalog.add(anime(1, "Currently Airing"));

    let (summary, snapshot) = fx.run_once(fx.config()).await;

    assert!(summary.seeded);
    assert_eq!(summary.candidates, 0);
    assert_eq!(snapshot.watch_list.len(), 1);
    assert_eq!(snapshot.watch_list.get(&1), Some(&AnimeStatus::Airing));
    assert!(fx.notifier.sent_titles().is_empty());
    assert_eq!(
        fx.saved_watch_list().unwrap(),
        serde_json::json!({ "1": "Currently Airing" })
    );
}

#[tokio::test]
async fn newly_finished_anime_is_notified_then_forgotten() {
    let fx = Fixture::new();
    fx.preload(r#"{"42":"Currently Airing"}"#);
    fx.catalog.add(AnimeDetails {
        score: Some(8.5),
        ..anime(42, "Finished Airing")
    });

    let (summary, snapshot) = fx.run_once(fx.config()).await;

    assert!(!summary.seeded);
    assert_eq!(summary.notified, 1);
    assert_eq!(fx.notifier.sent_titles(), vec!["Anime 42"]);
    assert!(!snapshot.watch_list.contains_key(&42));
    assert!(snapshot.resolved.contains(&42));
    // An empty watch-list is never written over the previous one.
    assert_eq!(
        fx.saved_watch_list().unwrap(),
        serde_json::json!({ "42": "Currently Airing" })
    );

    let (summary, snapshot) = fx.run_once(fx.config()).await;
    assert!(!summary.seeded);
    assert_eq!(summary.candidates, 0);
    assert!(snapshot.watch_list.is_empty());
    assert_eq!(fx.notifier.sent_titles(), vec!["Anime 42"]);
}

#[tokio::test]
async fn emptied_watch_list_keeps_updating_instead_of_seeding() {
    let fx = Fixture::new();
    fx.preload(r#"{"1":"Currently Airing"}"#);
    fx.catalog.add(anime(1, "Finished Airing"));
    let mut cfg = fx.config();
    cfg.poll_interval = Duration::from_millis(300);

    let (handle, mut events) = fx.start(cfg);
    let first = next_batch(&mut events).await;
    assert!(!first.seeded);
    assert_eq!(first.notified, 1);
    assert!(handle.snapshot().await.watch_list.is_empty());

    fx.catalog.add(anime(2, "Finished Airing"));
    let second = next_batch(&mut events).await;
    handle.request_stop();
    handle.wait().await.unwrap();

    assert!(!second.seeded);
    assert_eq!(second.notified, 1);
    assert_eq!(fx.notifier.sent_titles(), vec!["Anime 1", "Anime 2"]);
}

#[tokio::test]
async fn stop_interrupts_delivery() {
    let fx = Fixture::new();
    let ids = [1, 2, 3, 4, 5];
    let preload: serde_json::Map<String, serde_json::Value> = ids
        .iter()
        .map(|id| (id.to_string(), "Currently Airing".into()))
        .collect();
    fx.preload(&serde_json::Value::Object(preload).to_string());
    for id in ids {
        fx.catalog.add_unlisted(anime(id, "Finished Airing"));
    }
    fx.notifier.set_delay(Duration::from_millis(200));

    let (handle, _events) = fx.start(fx.config());
    tokio::time::timeout(Duration::from_secs(10), async {
        while fx.notifier.sent_titles().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first notification was not sent in time");
    handle.request_stop();
    handle.wait().await.unwrap();

    let sent = fx.notifier.sent_titles().len();
    assert!(sent < ids.len(), "{sent} notifications sent after stop");
    let saved = fx.saved_watch_list().unwrap();
    let saved = saved.as_object().unwrap();
    assert_eq!(saved.len(), ids.len() - sent);
    assert!(saved.values().all(|status| status == "Finished Airing"));
}

#[tokio::test]
async fn failed_delivery_is_retried_by_the_next_run() {
    let fx = Fixture::new();
    fx.preload(r#"{"42":"Currently Airing"}"#);
    fx.catalog.add_unlisted(AnimeDetails {
        score: Some(8.5),
        ..anime(42, "Finished Airing")
    });
    fx.notifier.set_failing(true);

    let (summary, snapshot) = fx.run_once(fx.config()).await;
    assert_eq!(summary.failed, 1);
    assert_eq!(snapshot.watch_list.get(&42), Some(&AnimeStatus::Finished));
    assert_eq!(
        fx.saved_watch_list().unwrap(),
        serde_json::json!({ "42": "Finished Airing" })
    );

    fx.notifier.set_failing(false);
    let (summary, snapshot) = fx.run_once(fx.config()).await;
    assert_eq!(summary.notified, 1);
    assert_eq!(fx.notifier.sent_titles(), vec!["Anime 42"]);
    assert!(snapshot.watch_list.is_empty());
}

#[tokio::test]
async fn blacklisted_genre_is_dropped_without_delivery() {
    let fx = Fixture::new();
    fx.preload(r#"{"42":"Currently Airing"}"#);
    fx.catalog.add_unlisted(anime(42, "Finished Airing"));
    let mut cfg = fx.config();
    cfg.blacklists.genres.insert("Action".into());

    let (summary, snapshot) = fx.run_once(cfg).await;

    assert_eq!(summary.filtered, 1);
    assert_eq!(summary.notified, 0);
    assert!(fx.notifier.sent_titles().is_empty());
    assert!(!snapshot.watch_list.contains_key(&42));
}

#[tokio::test]
async fn anime_discovered_finished_is_notified_once() {
    let fx = Fixture::new();
    fx.preload(r#"{"1":"Currently Airing"}"#);
    fx.catalog.add(anime(1, "Currently Airing"));
    fx.catalog.add(anime(2, "Finished Airing"));

    let (summary, _) = fx.run_once(fx.config()).await;
    assert_eq!(summary.notified, 1);
    assert_eq!(fx.notifier.sent_titles(), vec!["Anime 2"]);

    let (summary, snapshot) = fx.run_once(fx.config()).await;
    assert_eq!(summary.candidates, 0);
    assert_eq!(fx.notifier.sent_titles().len(), 1);
    assert_eq!(fx.catalog.detail_calls(2), 1);
    assert!(!snapshot.watch_list.contains_key(&2));
}

#[tokio::test]
async fn personal_list_is_fetched_once_and_filters_watched_anime() {
    let fx = Fixture::new();
    fx.preload(r#"{"2":"Currently Airing","3":"Currently Airing","4":"Currently Airing"}"#);
    for id in [2, 3, 4] {
        fx.catalog.add_unlisted(anime(id, "Finished Airing"));
    }
    fx.personal_list.set_entries(vec![
        PersonalListEntry {
            id: 2,
            status: PersonalListStatus::Completed,
        },
        PersonalListEntry {
            id: 3,
            status: PersonalListStatus::PlanToWatch,
        },
    ]);
    let mut cfg = fx.config();
    cfg.user = Some("someone".into());

    let (summary, snapshot) = fx.run_once(cfg).await;

    assert_eq!(fx.personal_list.calls(), 1);
    assert_eq!(summary.filtered, 1);
    assert_eq!(summary.notified, 2);
    assert_eq!(fx.notifier.sent_titles(), vec!["Anime 3", "Anime 4"]);
    assert!(snapshot.watch_list.is_empty());
}

#[tokio::test]
async fn unreachable_personal_list_does_not_block_notifications() {
    let fx = Fixture::new();
    fx.preload(r#"{"2":"Currently Airing"}"#);
    fx.catalog.add_unlisted(anime(2, "Finished Airing"));
    fx.personal_list.set_failing(true);
    let mut cfg = fx.config();
    cfg.user = Some("someone".into());

    let (summary, _) = fx.run_once(cfg).await;
    assert_eq!(summary.notified, 1);
}

#[tokio::test]
async fn failed_seed_leaves_nothing_behind() {
    let fx = Fixture::new();
    fx.catalog.add(anime(1, "Currently Airing"));
    fx.catalog.add(anime(2, "Currently Airing"));
    fx.catalog.fail_details(2, u32::MAX);

    let (summary, snapshot) = fx.run_once(fx.config()).await;

    assert!(summary.seeded);
    assert!(snapshot.watch_list.is_empty());
    assert_eq!(fx.saved_watch_list(), None);
}

#[tokio::test]
async fn first_run_absorbs_or_notifies_finished_backlog() {
    let fx = Fixture::new();
    fx.catalog.add(anime(1, "Finished Airing"));
    fx.catalog.add(anime(2, "Currently Airing"));

    let (summary, snapshot) = fx.run_once(fx.config()).await;
    assert_eq!(summary.candidates, 0);
    assert!(fx.notifier.sent_titles().is_empty());
    assert!(snapshot.resolved.contains(&1));
    assert!(!snapshot.watch_list.contains_key(&1));

    let fx = Fixture::new();
    fx.catalog.add(anime(1, "Finished Airing"));
    fx.catalog.add(anime(2, "Currently Airing"));
    let mut cfg = fx.config();
    cfg.notify_on_first_run = true;

    let (summary, snapshot) = fx.run_once(cfg).await;
    assert_eq!(summary.notified, 1);
    assert_eq!(fx.notifier.sent_titles(), vec!["Anime 1"]);
    assert_eq!(snapshot.watch_list.get(&2), Some(&AnimeStatus::Airing));
}

#[tokio::test]
async fn checkpoint_saves_while_running() {
    let fx = Fixture::new();
    fx.catalog.add(anime(1, "Not yet aired"));

    let (handle, mut events) = fx.start(fx.config());
    next_batch(&mut events).await;
    assert_eq!(fx.saved_watch_list(), None);

    handle.checkpoint().await.unwrap();
    assert_eq!(events.recv().await.unwrap(), WatcherEvent::CheckpointSaved);
    assert_eq!(
        fx.saved_watch_list().unwrap(),
        serde_json::json!({ "1": "Not yet aired" })
    );
    assert!(fx.dir.path().join("encountered_genres.json").exists());
    assert!(!handle.snapshot().await.stop_requested);

    handle.request_stop();
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn stop_is_announced_once_and_ends_the_stream() {
    let fx = Fixture::new();
    fx.catalog.add(anime(1, "Currently Airing"));

    let (handle, mut events) = fx.start(fx.config());
    assert_eq!(events.recv().await.unwrap(), WatcherEvent::Started);
    next_batch(&mut events).await;

    handle.request_stop();
    handle.request_stop();
    assert!(handle.snapshot().await.stop_requested);
    handle.wait().await.unwrap();

    assert_eq!(events.recv().await.unwrap(), WatcherEvent::StopRequested);
    assert_eq!(events.recv().await.unwrap(), WatcherEvent::Stopped);
    assert!(events.recv().await.is_err());
}

#[tokio::test]
async fn unreadable_watch_list_prevents_start() {
    let fx = Fixture::new();
    fx.preload("{ definitely not json");
    assert!(start_watcher(fx.config(), fx.collaborators()).is_err());
}
