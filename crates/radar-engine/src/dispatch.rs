use std::collections::HashMap;
use std::fmt;

use tokio::sync::Mutex;
use tracing::{error, info};

use malradar_core::Blacklists;

use crate::api::{AnimeDetails, Collaborators, PersonalListStatus, WatcherConfig};
use crate::engine::{DispatchCounts, StopSignal};
use crate::message::build_notification;
use crate::store::TrackedState;

/// Why a finished anime is not notified.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DropReason {
    BlacklistedType(String),
    BlacklistedGenres(Vec<String>),
    LowScore { score: f64, min: f64 },
    OnPersonalList(PersonalListStatus),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::BlacklistedType(kind) => write!(f, "type '{kind}' is blacklisted"),
            DropReason::BlacklistedGenres(genres) => {
                write!(f, "contains blacklisted genre(s): {}", genres.join(", "))
            }
            DropReason::LowScore { score, min } => {
                write!(f, "does not have the required score ({score:.2}/{min:.2})")
            }
            DropReason::OnPersonalList(status) => {
                write!(f, "is already on the personal list ({status:?})")
            }
        }
    }
}

/// Filter chain, in order: type, genres, score, personal list.
pub(crate) fn apply_filters(
    details: &AnimeDetails,
    blacklists: &Blacklists,
    min_score: f64,
    personal_list: Option<&HashMap<u64, PersonalListStatus>>,
) -> Option<DropReason> {
    if blacklists.types.contains(&details.kind) {
        return Some(DropReason::BlacklistedType(details.kind.clone()));
    }

    let genres: Vec<String> = details
        .genres
        .iter()
        .filter(|genre| blacklists.genres.contains(*genre))
        .cloned()
        .collect();
    if !genres.is_empty() {
        return Some(DropReason::BlacklistedGenres(genres));
    }

    let score = details.score.unwrap_or(0.0);
    if score < min_score {
        return Some(DropReason::LowScore {
            score,
            min: min_score,
        });
    }

    if let Some(status) = personal_list.and_then(|list| list.get(&details.id)) {
        if *status != PersonalListStatus::PlanToWatch {
            return Some(DropReason::OnPersonalList(*status));
        }
    }

    None
}

pub(crate) struct Dispatcher<'a> {
    pub(crate) cfg: &'a WatcherConfig,
    pub(crate) collaborators: &'a Collaborators,
    pub(crate) state: &'a Mutex<TrackedState>,
    pub(crate) stop: &'a StopSignal,
}

impl Dispatcher<'_> {
    async fn personal_list(&self) -> Option<HashMap<u64, PersonalListStatus>> {
        let user = self.cfg.user.as_deref()?;
        match self.collaborators.personal_list.full_list(user).await {
            Ok(entries) => {
                info!(user, entries = entries.len(), "personal list fetched");
                Some(entries.into_iter().map(|e| (e.id, e.status)).collect())
            }
            Err(err) => {
                error!(user, "can't fetch personal list, not filtering on it this time: {err:#}");
                None
            }
        }
    }

    /// Entry reached a final outcome: stop tracking it for good.
    async fn resolve(&self, id: u64) {
        let mut state = self.state.lock().await;
        state.watch_list.remove(&id);
        state.resolved.insert(id);
    }

    pub(crate) async fn dispatch(&self, candidates: Vec<AnimeDetails>) -> DispatchCounts {
        let mut counts = DispatchCounts::default();
        info!(count = candidates.len(), "processing finished animes");
        let personal_list = self.personal_list().await;

        let total = candidates.len();
        for (index, details) in candidates.into_iter().enumerate() {
            if self.stop.is_requested() {
                info!(
                    left = total - index,
                    "stop requested, leaving the remaining animes for the next run"
                );
                break;
            }
            let title = details.display_title();
            if let Some(reason) = apply_filters(
                &details,
                &self.cfg.blacklists,
                self.cfg.min_score,
                personal_list.as_ref(),
            ) {
                info!(id = details.id, "'{title}' {reason}: skipping");
                self.resolve(details.id).await;
                counts.filtered += 1;
                continue;
            }

            let notification = build_notification(&details);
            match self.collaborators.notifier.send(&notification).await {
                Ok(()) => {
                    info!(id = details.id, "notification sent for '{title}'");
                    self.resolve(details.id).await;
                    counts.notified += 1;
                }
                Err(err) => {
                    error!(
                        id = details.id,
                        "sending notification failed for '{title}', will retry next batch: {err:#}"
                    );
                    counts.failed += 1;
                }
            }
        }
        counts
    }
}
