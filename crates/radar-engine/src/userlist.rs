use anyhow::Context as _;
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use crate::api::{PersonalListClient, PersonalListEntry, PersonalListStatus};
use crate::http::ensure_success;

/// Entries returned by one `load.json` call.
const PAGE_SIZE: usize = 300;
/// Upper bound on the entries walked for a single user.
const SAFETY_LIMIT: usize = 100_000;
/// `status` query value selecting every list.
const STATUS_ALL: u8 = 7;

#[derive(Debug, Deserialize)]
struct ListEntryDto {
    anime_id: u64,
    status: u8,
}

/// Reads a user's public anime list from the MyAnimeList website.
#[derive(Debug, Clone)]
pub struct MalUserListClient {
    http: reqwest::Client,
    base_url: Url,
}

impl MalUserListClient {
    /// MyAnimeList website root.
    pub const DEFAULT_BASE_URL: &'static str = "https://myanimelist.net/";

    /// Client for the website rooted at `base_url`.
    pub fn new(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    fn page_url(&self, user: &str, offset: usize) -> anyhow::Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("invalid base url: {}", self.base_url))?
            .pop_if_empty()
            .extend(["animelist", user, "load.json"]);
        url.query_pairs_mut()
            .append_pair("offset", &offset.to_string())
            .append_pair("status", &STATUS_ALL.to_string());
        Ok(url)
    }
}

#[async_trait::async_trait]
impl PersonalListClient for MalUserListClient {
    async fn full_list(&self, user: &str) -> anyhow::Result<Vec<PersonalListEntry>> {
        let mut entries = Vec::new();
        let mut offset = 0;
        while offset < SAFETY_LIMIT {
            let url = self.page_url(user, offset)?;
            debug!(%url, "fetching personal list page");
            let page: Vec<ListEntryDto> = async {
                let res = ensure_success(self.http.get(url).send().await?).await?;
                anyhow::Ok(res.json().await?)
            }
            .await
            .with_context(|| {
                format!(
                    "page {} (offset {offset}) of '{user}' list",
                    offset / PAGE_SIZE + 1
                )
            })?;
            if page.is_empty() {
                return Ok(entries);
            }
            entries.extend(page.into_iter().map(|e| PersonalListEntry {
                id: e.anime_id,
                status: PersonalListStatus::from_code(e.status),
            }));
            offset += PAGE_SIZE;
        }
        anyhow::bail!("'{user}' list has more than {SAFETY_LIMIT} entries")
    }
}
