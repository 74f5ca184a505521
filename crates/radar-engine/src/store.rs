use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::api::{AnimeDetails, AnimeStatus};

const WATCH_LIST_FILE: &str = "animes_state.json";
const GENRES_FILE: &str = "encountered_genres.json";
const RATINGS_FILE: &str = "encountered_ratings.json";
const TYPES_FILE: &str = "encountered_types.json";
const RESOLVED_FILE: &str = "resolved_animes.json";

/// Everything the watcher remembers between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct TrackedState {
    pub(crate) watch_list: BTreeMap<u64, AnimeStatus>,
    pub(crate) genres: BTreeSet<String>,
    pub(crate) ratings: BTreeSet<String>,
    pub(crate) types: BTreeSet<String>,
    pub(crate) resolved: BTreeSet<u64>,
}

impl TrackedState {
    /// Merge the genres, rating and type of `details` into the encountered sets.
    pub(crate) fn record_values(&mut self, details: &AnimeDetails) {
        for genre in details.genres.iter().filter(|g| !g.is_empty()) {
            self.genres.insert(genre.clone());
        }
        if !details.rating.is_empty() {
            self.ratings.insert(details.rating.clone());
        }
        if !details.kind.is_empty() {
            self.types.insert(details.kind.clone());
        }
    }

    /// Merge the encountered sets of `other` into `self`.
    pub(crate) fn merge_values(&mut self, other: &TrackedState) {
        self.genres.extend(other.genres.iter().cloned());
        self.ratings.extend(other.ratings.iter().cloned());
        self.types.extend(other.types.iter().cloned());
    }
}

/// State read back at startup.
#[derive(Debug)]
pub(crate) struct LoadedState {
    pub(crate) state: TrackedState,
    /// No watch-list file was found: the first batch must build one.
    pub(crate) needs_seed: bool,
}

/// Flat JSON files under the state directory.
#[derive(Debug)]
pub(crate) struct StateStore {
    dir: PathBuf,
    // Held for a whole save so checkpoints and the final save never share
    // temporary files.
    writing: Mutex<()>,
}

impl StateStore {
    pub(crate) fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            writing: Mutex::new(()),
        }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load the persisted state.
    ///
    /// An unreadable watch-list is an error. Unreadable encountered-values files
    /// are logged and treated as empty. Watch-list entries already resolved are
    /// dropped: an empty watch-list is never written, so the file on disk can
    /// lag behind the resolved set.
    pub(crate) fn load(&self) -> anyhow::Result<LoadedState> {
        let watch_list: Option<BTreeMap<u64, AnimeStatus>> =
            read_json(&self.dir.join(WATCH_LIST_FILE))?;
        let needs_seed = watch_list.is_none();
        let mut state = TrackedState {
            watch_list: watch_list.unwrap_or_default(),
            genres: self.load_lenient(GENRES_FILE),
            ratings: self.load_lenient(RATINGS_FILE),
            types: self.load_lenient(TYPES_FILE),
            resolved: self.load_lenient(RESOLVED_FILE),
        };

        let before = state.watch_list.len();
        let resolved = &state.resolved;
        state.watch_list.retain(|id, _| !resolved.contains(id));
        if state.watch_list.len() != before {
            debug!(
                dropped = before - state.watch_list.len(),
                "skipping watch-list entries already resolved"
            );
        }

        if needs_seed {
            info!(dir = %self.dir.display(), "no previous watch-list, it will be built on the first batch");
        } else {
            info!(tracked = state.watch_list.len(), "watch-list loaded");
        }
        Ok(LoadedState { state, needs_seed })
    }

    fn load_lenient<T: DeserializeOwned + Default>(&self, name: &str) -> T {
        let path = self.dir.join(name);
        match read_json(&path) {
            Ok(Some(value)) => value,
            Ok(None) => T::default(),
            Err(err) => {
                warn!("ignoring unreadable state file: {err:#}");
                T::default()
            }
        }
    }

    /// Write every file from a snapshot of `state` taken once no other save is
    /// running. Each file is written independently; the first error is
    /// returned after all writes were attempted. Returns the number of tracked
    /// entries saved.
    pub(crate) async fn persist(&self, state: &Mutex<TrackedState>) -> anyhow::Result<usize> {
        let _writing = self.writing.lock().await;
        let snapshot = state.lock().await.clone();
        let tracked = snapshot.watch_list.len();
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || persist_all(&dir, &snapshot))
            .await
            .map_err(|err| anyhow::anyhow!("persist state: {err:#}"))??;
        Ok(tracked)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("can't read '{}'", path.display()))?;
    let value = serde_json::from_str(&raw)
        .with_context(|| format!("can't decode '{}'", path.display()))?;
    Ok(Some(value))
}

fn persist_all(dir: &Path, state: &TrackedState) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("can't create state dir '{}'", dir.display()))?;

    let mut first_err = None;
    let mut record = |res: anyhow::Result<()>| {
        if let Err(err) = res {
            error!("{err:#}");
            first_err.get_or_insert(err);
        }
    };

    if state.watch_list.is_empty() {
        debug!("watch-list is empty, leaving the previous file untouched");
    } else {
        record(write_json(&dir.join(WATCH_LIST_FILE), &state.watch_list));
    }
    record(write_json(&dir.join(GENRES_FILE), &state.genres));
    record(write_json(&dir.join(RATINGS_FILE), &state.ratings));
    record(write_json(&dir.join(TYPES_FILE), &state.types));
    record(write_json(&dir.join(RESOLVED_FILE), &state.resolved));

    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).with_context(|| format!("can't write '{}'", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("can't replace '{}'", path.display()))?;
    Ok(())
}
