//! Jikan (unofficial MyAnimeList REST API) catalog client.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use crate::api::{AnimeDetails, CatalogClient, SeasonEntry};
use crate::http::ensure_success;
use crate::season::Season;

/// Season listings page guard. Jikan pages hold 25 entries, a season rarely
/// spans more than a dozen pages.
const MAX_LISTING_PAGES: u32 = 100;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct SeasonPageDto {
    #[serde(default)]
    data: Vec<SeasonAnimeDto>,
    #[serde(default)]
    pagination: PaginationDto,
}

#[derive(Debug, Default, Deserialize)]
struct PaginationDto {
    #[serde(default)]
    has_next_page: bool,
}

#[derive(Debug, Deserialize)]
struct SeasonAnimeDto {
    mal_id: u64,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct AnimeDto {
    mal_id: u64,
    #[serde(default)]
    url: String,
    #[serde(default)]
    images: ImagesDto,
    #[serde(default)]
    title: String,
    title_english: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    episodes: Option<u32>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    aired: AiredDto,
    duration: Option<String>,
    rating: Option<String>,
    score: Option<f64>,
    scored_by: Option<u64>,
    rank: Option<u64>,
    #[serde(default)]
    genres: Vec<NamedDto>,
    #[serde(default)]
    studios: Vec<NamedDto>,
}

#[derive(Debug, Default, Deserialize)]
struct ImagesDto {
    jpg: Option<ImageSetDto>,
}

#[derive(Debug, Deserialize)]
struct ImageSetDto {
    image_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AiredDto {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct NamedDto {
    name: String,
}

impl From<AnimeDto> for AnimeDetails {
    fn from(dto: AnimeDto) -> Self {
        let names = |list: Vec<NamedDto>| list.into_iter().map(|n| n.name).collect();
        AnimeDetails {
            id: dto.mal_id,
            title: dto.title,
            title_english: dto.title_english.filter(|t| !t.trim().is_empty()),
            status: dto.status,
            score: dto.score,
            scored_by: dto.scored_by.unwrap_or(0),
            rank: dto.rank.unwrap_or(0),
            episodes: dto.episodes.unwrap_or(0),
            kind: dto.kind.unwrap_or_default(),
            duration: dto.duration.unwrap_or_default(),
            rating: dto.rating.unwrap_or_default(),
            genres: names(dto.genres),
            studios: names(dto.studios),
            image_url: dto.images.jpg.and_then(|jpg| jpg.image_url),
            url: dto.url,
            aired_from: dto.aired.from,
            aired_to: dto.aired.to,
        }
    }
}

/// Catalog backed by the Jikan v4 API.
#[derive(Debug, Clone)]
pub struct JikanClient {
    http: reqwest::Client,
    base_url: Url,
    page_delay: Duration,
}

impl JikanClient {
    /// Public Jikan v4 endpoint.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.jikan.moe/v4/";

    /// Pause between two pages of the same season listing.
    pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_secs(1);

    /// Client for the API rooted at `base_url` (which must end with a `/`).
    pub fn new(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            page_delay: Self::DEFAULT_PAGE_DELAY,
        }
    }

    /// Override the pause between listing pages.
    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    fn season_page_url(&self, year: i32, season: Season, page: u32) -> anyhow::Result<Url> {
        let mut url = self.base_url.join(&format!("seasons/{year}/{season}"))?;
        url.query_pairs_mut().append_pair("page", &page.to_string());
        Ok(url)
    }

    fn anime_url(&self, id: u64) -> anyhow::Result<Url> {
        Ok(self.base_url.join(&format!("anime/{id}"))?)
    }
}

#[async_trait::async_trait]
impl CatalogClient for JikanClient {
    async fn season_listing(&self, year: i32, season: Season) -> anyhow::Result<Vec<SeasonEntry>> {
        let mut entries = Vec::new();
        for page in 1..=MAX_LISTING_PAGES {
            if page > 1 {
                tokio::time::sleep(self.page_delay).await;
            }
            let url = self.season_page_url(year, season, page)?;
            debug!(%url, "fetching season listing page");
            let res = ensure_success(self.http.get(url).send().await?).await?;
            let body: SeasonPageDto = res.json().await?;
            entries.extend(body.data.into_iter().map(|a| SeasonEntry {
                id: a.mal_id,
                title: a.title,
            }));
            if !body.pagination.has_next_page {
                return Ok(entries);
            }
        }
        anyhow::bail!("{season} {year} listing has more than {MAX_LISTING_PAGES} pages")
    }

    async fn anime_details(&self, id: u64) -> anyhow::Result<AnimeDetails> {
        let url = self.anime_url(id)?;
        debug!(%url, "fetching anime details");
        let res = ensure_success(self.http.get(url).send().await?).await?;
        let body: Envelope<AnimeDto> = res.json().await?;
        Ok(body.data.into())
    }
}
