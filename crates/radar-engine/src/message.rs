use std::sync::LazyLock;

use regex::Regex;

use crate::api::{AnimeDetails, Notification, Priority};

const PLACEHOLDER_IMAGE: &str = "https://cdn.myanimelist.net/img/sp/icon/apple-touch-icon-256.png";

static ANIME_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://cdn\.myanimelist\.net/images/anime/[0-9]+/[0-9]+\.jpg$")
        .expect("valid image pattern")
});

/// Large variant of a catalog cover, `None` for the generic placeholder.
pub(crate) fn large_image_url(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() || url == PLACEHOLDER_IMAGE {
        return None;
    }
    if ANIME_IMAGE.is_match(url) {
        if let Some(stem) = url.strip_suffix(".jpg") {
            return Some(format!("{stem}l.jpg"));
        }
    }
    Some(url.to_string())
}

/// Notification announcing that `details` finished airing.
pub(crate) fn build_notification(details: &AnimeDetails) -> Notification {
    let message = format!(
        "<b>Score</b>\n{:.2} ({} votes) ranked #{}\n\
         <b>Episodes</b>\n{} {} ({})\n\
         <b>Studios</b>\n{}\n\
         <b>Genres</b>\n{}\n\
         <b>Rating</b>\n{}",
        details.score.unwrap_or(0.0),
        details.scored_by,
        details.rank,
        details.episodes,
        details.kind,
        details.duration,
        details.studios.join(", "),
        details.genres.join(", "),
        details.rating,
    );

    Notification {
        title: details.display_title().to_string(),
        message,
        html: true,
        url: Some(details.url.clone()).filter(|url| !url.is_empty()),
        url_title: Some("Check it on MyAnimeList".to_string()),
        timestamp: details
            .aired_to
            .or(details.aired_from)
            .map(|at| at.timestamp()),
        priority: Priority::Normal,
        image_url: details.image_url.as_deref().and_then(large_image_url),
    }
}
