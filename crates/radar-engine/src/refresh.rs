//! Per-batch update of a non-empty watch-list.

use std::collections::BTreeSet;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::api::{AnimeDetails, AnimeStatus};
use crate::retry::{CatalogFetcher, FetchError};
use crate::season::{Season, current_season};
use crate::store::TrackedState;

/// Recover unresolved finished anime, refresh the others, then look for
/// newcomers in the current season. Returns every finished anime to dispatch.
///
/// A stop request ends the update early; what was collected so far is returned
/// and stays `Finished` in the watch-list either way.
pub(crate) async fn update(
    fetcher: &mut CatalogFetcher<'_>,
    state: &Mutex<TrackedState>,
) -> Vec<AnimeDetails> {
    let mut candidates = Vec::new();
    if recover_finished(fetcher, state, &mut candidates).await.is_err() {
        return candidates;
    }
    if refresh_tracked(fetcher, state, &mut candidates).await.is_err() {
        return candidates;
    }
    let (year, season) = current_season();
    let _ = discover_new(fetcher, state, year, season, &mut candidates).await;
    candidates
}

/// Marker for a pass interrupted by a stop request.
#[derive(Debug)]
pub(crate) struct Interrupted;

fn tracked_ids(state: &TrackedState, finished: bool) -> Vec<u64> {
    state
        .watch_list
        .iter()
        .filter(|(_, status)| (**status == AnimeStatus::Finished) == finished)
        .map(|(id, _)| *id)
        .collect()
}

/// Fetch details, logging failures. `Ok(None)` means "skip this item".
async fn fetch_or_skip(
    fetcher: &mut CatalogFetcher<'_>,
    id: u64,
    phase: &str,
) -> Result<Option<AnimeDetails>, Interrupted> {
    match fetcher.details(id).await {
        Ok(details) => Ok(Some(details)),
        Err(FetchError::Cancelled) => Err(Interrupted),
        Err(err) => {
            error!(id, "{phase}: skipping anime: {err}");
            Ok(None)
        }
    }
}

pub(crate) async fn recover_finished(
    fetcher: &mut CatalogFetcher<'_>,
    state: &Mutex<TrackedState>,
    candidates: &mut Vec<AnimeDetails>,
) -> Result<(), Interrupted> {
    let ids = tracked_ids(&*state.lock().await, true);
    if ids.is_empty() {
        return Ok(());
    }
    info!(count = ids.len(), "recovering finished animes not yet processed");

    for id in ids {
        let Some(details) = fetch_or_skip(fetcher, id, "recovery").await? else {
            continue;
        };
        let mut state = state.lock().await;
        state.record_values(&details);
        match details.status() {
            Some(AnimeStatus::Finished) => candidates.push(details),
            Some(status) => {
                warn!(
                    id,
                    title = details.display_title(),
                    status = status.as_upstream(),
                    "anime is no longer finished, tracking it again"
                );
                state.watch_list.insert(id, status);
            }
            None => {
                warn!(id, status = %details.status, "unknown status, keeping it as finished");
                candidates.push(details);
            }
        }
    }
    Ok(())
}

pub(crate) async fn refresh_tracked(
    fetcher: &mut CatalogFetcher<'_>,
    state: &Mutex<TrackedState>,
    candidates: &mut Vec<AnimeDetails>,
) -> Result<(), Interrupted> {
    let ids = tracked_ids(&*state.lock().await, false);
    info!(count = ids.len(), "refreshing tracked animes");

    let mut changed = 0usize;
    for id in ids {
        let Some(details) = fetch_or_skip(fetcher, id, "refresh").await? else {
            continue;
        };
        let mut state = state.lock().await;
        state.record_values(&details);
        let Some(status) = details.status() else {
            warn!(id, status = %details.status, "unknown status, leaving entry untouched");
            continue;
        };
        let Some(previous) = state.watch_list.get(&id).copied() else {
            continue;
        };
        if previous == status {
            debug!(id, title = details.display_title(), "status unchanged");
            continue;
        }

        info!(
            id,
            title = details.display_title(),
            from = previous.as_upstream(),
            to = status.as_upstream(),
            "status changed"
        );
        state.watch_list.insert(id, status);
        changed += 1;
        if status == AnimeStatus::Finished {
            candidates.push(details);
        }
    }
    debug!(changed, "refresh done");
    Ok(())
}

pub(crate) async fn discover_new(
    fetcher: &mut CatalogFetcher<'_>,
    state: &Mutex<TrackedState>,
    year: i32,
    season: Season,
    candidates: &mut Vec<AnimeDetails>,
) -> Result<(), Interrupted> {
    let listing = match fetcher.season_listing(year, season).await {
        Ok(listing) => listing,
        Err(FetchError::Cancelled) => return Err(Interrupted),
        Err(err) => {
            error!("discovery: can't fetch {season} {year} listing, skipping: {err}");
            return Ok(());
        }
    };

    let mut seen = BTreeSet::new();
    let unknown: Vec<u64> = {
        let state = state.lock().await;
        listing
            .iter()
            .map(|entry| entry.id)
            .filter(|id| seen.insert(*id))
            .filter(|id| !state.watch_list.contains_key(id) && !state.resolved.contains(id))
            .collect()
    };
    info!(
        listed = listing.len(),
        new = unknown.len(),
        "discovering new animes in {season} {year}"
    );

    for id in unknown {
        let Some(details) = fetch_or_skip(fetcher, id, "discovery").await? else {
            continue;
        };
        let mut state = state.lock().await;
        state.record_values(&details);
        match details.status() {
            Some(status) => {
                info!(
                    id,
                    title = details.display_title(),
                    status = status.as_upstream(),
                    "new anime tracked"
                );
                state.watch_list.insert(id, status);
                if status == AnimeStatus::Finished {
                    candidates.push(details);
                }
            }
            None => {
                warn!(id, status = %details.status, "unknown status, not tracking it");
            }
        }
    }
    Ok(())
}
