use std::future::Future;

use tracing::{debug, warn};

use crate::api::{AnimeDetails, CatalogClient, SeasonEntry};
use crate::engine::StopSignal;
use crate::ratelimit::RateLimiter;
use crate::season::Season;

/// Why a throttled fetch did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// A stop was requested while waiting for a request slot.
    #[error("cancelled")]
    Cancelled,
    /// Every attempt failed.
    #[error("gave up after {attempts} attempt(s): {last:#}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error of the last attempt.
        last: anyhow::Error,
    },
}

/// Run `op` at most `max_attempts` times, taking a rate limiter slot before each
/// attempt. The limiter interval is the only backoff between attempts.
pub(crate) async fn with_retry<T, F, Fut>(
    limiter: &mut RateLimiter,
    stop: &StopSignal,
    max_attempts: u32,
    what: &str,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        if !limiter.throttle(stop).await {
            return Err(FetchError::Cancelled);
        }
        attempt += 1;
        debug!(what, attempt, "fetching");
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_attempts => {
                return Err(FetchError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }
            Err(err) => {
                warn!(what, attempt, max_attempts, "fetch failed, retrying: {err:#}");
            }
        }
    }
}

/// Catalog access shared by the seeding and refresh passes: every call goes
/// through the same rate limiter and attempt cap.
pub(crate) struct CatalogFetcher<'a> {
    pub(crate) catalog: &'a dyn CatalogClient,
    pub(crate) limiter: &'a mut RateLimiter,
    pub(crate) stop: &'a StopSignal,
    pub(crate) max_attempts: u32,
}

impl CatalogFetcher<'_> {
    pub(crate) async fn season_listing(
        &mut self,
        year: i32,
        season: Season,
    ) -> Result<Vec<SeasonEntry>, FetchError> {
        let catalog = self.catalog;
        let what = format!("{season} {year} listing");
        with_retry(self.limiter, self.stop, self.max_attempts, &what, || {
            catalog.season_listing(year, season)
        })
        .await
    }

    pub(crate) async fn details(&mut self, id: u64) -> Result<AnimeDetails, FetchError> {
        let catalog = self.catalog;
        let what = format!("anime {id} details");
        with_retry(self.limiter, self.stop, self.max_attempts, &what, || {
            catalog.anime_details(id)
        })
        .await
    }
}
