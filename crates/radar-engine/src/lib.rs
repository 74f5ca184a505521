#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! In-process watcher for `malradar` (season scanning, status tracking,
//! finished-airing notifications).

/// Public API for the watcher crate.
pub mod api;
/// Calendar seasons.
pub mod season;

mod dispatch;
mod engine;
mod http;
mod jikan;
mod message;
mod pushover;
mod ratelimit;
mod refresh;
mod retry;
mod seed;
mod store;
mod userlist;

#[cfg(test)]
mod tests;

pub use api::{
    AnimeDetails, AnimeStatus, BatchSummary, CatalogClient, Collaborators, Notification,
    Notifier, PersonalListClient, PersonalListEntry, PersonalListStatus, Priority, SeasonEntry,
    StatusSnapshot, WatcherConfig, WatcherEvent, WatcherHandle, start_watcher,
};
pub use http::{ClientError, build_http_client};
pub use jikan::JikanClient;
pub use pushover::PushoverClient;
pub use retry::FetchError;
pub use season::Season;
pub use userlist::MalUserListClient;
