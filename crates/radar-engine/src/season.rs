//! Calendar seasons as used by the catalog to group anime by airing period.

use std::fmt;
use std::str::FromStr;

use chrono::Datelike;
use serde::{Deserialize, Serialize};

/// One of the four three-month buckets of the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    /// December to February.
    Winter,
    /// March to May.
    Spring,
    /// June to August.
    Summer,
    /// September to November.
    Fall,
}

impl Season {
    /// Lowercase name, as expected by the catalog endpoints.
    pub fn as_str(self) -> &'static str {
        match self {
            Season::Winter => "winter",
            Season::Spring => "spring",
            Season::Summer => "summer",
            Season::Fall => "fall",
        }
    }

    /// Season a calendar month (1..=12) belongs to.
    ///
    /// December maps to winter of the same calendar year.
    pub fn from_month(month: u32) -> Option<Self> {
        match month {
            12 | 1 | 2 => Some(Season::Winter),
            3..=5 => Some(Season::Spring),
            6..=8 => Some(Season::Summer),
            9..=11 => Some(Season::Fall),
            _ => None,
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown season name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown season: {0}")]
pub struct UnknownSeason(
    /// The rejected name.
    pub String,
);

impl FromStr for Season {
    type Err = UnknownSeason;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "winter" => Ok(Season::Winter),
            "spring" => Ok(Season::Spring),
            "summer" => Ok(Season::Summer),
            "fall" => Ok(Season::Fall),
            _ => Err(UnknownSeason(s.to_string())),
        }
    }
}

/// Season containing `date`.
pub fn season_of<D: Datelike>(date: &D) -> (i32, Season) {
    // chrono guarantees month() is within 1..=12.
    let season = Season::from_month(date.month()).unwrap_or(Season::Winter);
    (date.year(), season)
}

/// Season of the local current date.
pub fn current_season() -> (i32, Season) {
    season_of(&chrono::Local::now().date_naive())
}

/// Season immediately before `(year, season)`.
pub fn previous_season(year: i32, season: Season) -> (i32, Season) {
    match season {
        Season::Winter => (year - 1, Season::Fall),
        Season::Spring => (year, Season::Winter),
        Season::Summer => (year, Season::Spring),
        Season::Fall => (year, Season::Summer),
    }
}
