//! First-run scan of the backlog seasons.

use tracing::{debug, info, warn};

use crate::api::{AnimeDetails, AnimeStatus};
use crate::retry::{CatalogFetcher, FetchError};
use crate::season::{Season, previous_season};
use crate::store::TrackedState;

#[derive(Debug, thiserror::Error)]
pub(crate) enum SeedError {
    #[error("season {index}/{total} ({season} {year}): can't fetch listing: {source}")]
    Listing {
        index: u32,
        total: u32,
        year: i32,
        season: Season,
        source: FetchError,
    },
    #[error("season {index}/{total} ({season} {year}): can't fetch anime {id} details: {source}")]
    Details {
        index: u32,
        total: u32,
        year: i32,
        season: Season,
        id: u64,
        source: FetchError,
    },
}

/// Result of a complete scan, not yet applied to the shared state.
#[derive(Debug, Default)]
pub(crate) struct SeedOutcome {
    staged: TrackedState,
    pub(crate) candidates: Vec<AnimeDetails>,
}

impl SeedOutcome {
    /// Apply the scan to `state`. Entries already present are kept as they are.
    pub(crate) fn commit(&self, state: &mut TrackedState) {
        for (id, status) in &self.staged.watch_list {
            state.watch_list.entry(*id).or_insert(*status);
        }
        state.merge_values(&self.staged);
        state.resolved.extend(self.staged.resolved.iter().copied());
    }
}

/// Scan `nb_seasons` seasons backward from `start`.
///
/// Nothing is written to the shared state here: any failure (or a stop request)
/// drops the whole scan so a partial watch-list is never mistaken for a
/// complete one.
pub(crate) async fn build_initial_list(
    fetcher: &mut CatalogFetcher<'_>,
    existing: &TrackedState,
    start: (i32, Season),
    nb_seasons: u32,
    notify_on_first_run: bool,
) -> Result<SeedOutcome, SeedError> {
    let mut outcome = SeedOutcome::default();
    let (mut year, mut season) = start;

    for index in 1..=nb_seasons {
        let listing = fetcher.season_listing(year, season).await.map_err(|source| {
            SeedError::Listing {
                index,
                total: nb_seasons,
                year,
                season,
                source,
            }
        })?;
        info!(
            "building initial list: season {index}/{nb_seasons} ({season} {year}): fetching details for {} animes...",
            listing.len()
        );

        let before = outcome.staged.watch_list.len();
        for entry in &listing {
            let id = entry.id;
            if existing.watch_list.contains_key(&id)
                || existing.resolved.contains(&id)
                || outcome.staged.watch_list.contains_key(&id)
                || outcome.staged.resolved.contains(&id)
            {
                debug!(id, title = %entry.title, "already known, skipping");
                continue;
            }

            let details = fetcher.details(id).await.map_err(|source| SeedError::Details {
                index,
                total: nb_seasons,
                year,
                season,
                id,
                source,
            })?;
            outcome.staged.record_values(&details);

            match details.status() {
                Some(AnimeStatus::Finished) if notify_on_first_run => {
                    debug!(id, title = details.display_title(), "already finished, will be notified");
                    outcome.staged.watch_list.insert(id, AnimeStatus::Finished);
                    outcome.candidates.push(details);
                }
                Some(AnimeStatus::Finished) => {
                    debug!(id, title = details.display_title(), "already finished, skipping");
                    outcome.staged.resolved.insert(id);
                }
                Some(status) => {
                    debug!(id, title = details.display_title(), status = status.as_upstream(), "adding to the list");
                    outcome.staged.watch_list.insert(id, status);
                }
                None => {
                    warn!(
                        id,
                        title = details.display_title(),
                        status = %details.status,
                        "unknown status, skipping"
                    );
                }
            }
        }
        info!(
            "building initial list: season {index}/{nb_seasons} ({season} {year}): added {}/{} animes",
            outcome.staged.watch_list.len() - before,
            listing.len()
        );

        (year, season) = previous_season(year, season);
    }

    Ok(outcome)
}
