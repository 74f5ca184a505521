use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

/// Accepted range for the number of backlog seasons scraped on first run.
pub const NB_SEASONS_MIN: u32 = 1;
pub const NB_SEASONS_MAX: u32 = 40;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("pushover application key must be set")]
    MissingApplicationKey,
    #[error("pushover user key must be set")]
    MissingUserKey,
    #[error("nb_of_seasons_to_scrape must be within [{min}, {max}] (got {got})")]
    SeasonsOutOfRange { got: u32, min: u32, max: u32 },
    #[error("minimum_score must be a finite, non-negative number (got {0})")]
    InvalidMinimumScore(f64),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Configuration {
    #[serde(rename = "myanimelist", default)]
    pub mal: MalConfig,
    #[serde(default)]
    pub pushover: PushoverConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MalConfig {
    #[serde(rename = "minimum_score", default)]
    pub min_score: f64,
    #[serde(rename = "user_to_check_against", default)]
    pub user: Option<String>,
    #[serde(default)]
    pub blacklists: Blacklists,
    #[serde(rename = "initialization", default)]
    pub init: InitConfig,
}

/// Genre and type names that end tracking of an anime without notifying it.
///
/// Valid values are whatever the catalog reports; the watcher records every
/// value it encounters so operators can pick from them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Blacklists {
    #[serde(default)]
    pub genres: BTreeSet<String>,
    #[serde(default)]
    pub types: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitConfig {
    #[serde(rename = "nb_of_seasons_to_scrape", default = "default_nb_seasons")]
    pub nb_seasons: u32,
    #[serde(rename = "notify_on_first_run", default)]
    pub notify: bool,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            nb_seasons: default_nb_seasons(),
            notify: false,
        }
    }
}

fn default_nb_seasons() -> u32 {
    4
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushoverConfig {
    #[serde(default)]
    pub user_key: String,
    #[serde(default)]
    pub application_key: String,
}

impl Configuration {
    fn normalize(&mut self) {
        self.mal.user = self.mal.user.as_ref().map(|s| s.trim().to_string());
        if matches!(self.mal.user.as_deref(), Some(s) if s.is_empty()) {
            self.mal.user = None;
        }

        self.mal.blacklists.genres = trimmed_set(&self.mal.blacklists.genres);
        self.mal.blacklists.types = trimmed_set(&self.mal.blacklists.types);

        self.pushover.user_key = self.pushover.user_key.trim().to_string();
        self.pushover.application_key = self.pushover.application_key.trim().to_string();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pushover.application_key.is_empty() {
            return Err(ConfigError::MissingApplicationKey);
        }
        if self.pushover.user_key.is_empty() {
            return Err(ConfigError::MissingUserKey);
        }
        let nb_seasons = self.mal.init.nb_seasons;
        if !(NB_SEASONS_MIN..=NB_SEASONS_MAX).contains(&nb_seasons) {
            return Err(ConfigError::SeasonsOutOfRange {
                got: nb_seasons,
                min: NB_SEASONS_MIN,
                max: NB_SEASONS_MAX,
            });
        }
        if !self.mal.min_score.is_finite() || self.mal.min_score < 0.0 {
            return Err(ConfigError::InvalidMinimumScore(self.mal.min_score));
        }
        Ok(())
    }
}

fn trimmed_set(values: &BTreeSet<String>) -> BTreeSet<String> {
    values
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_config(raw: &str) -> anyhow::Result<Configuration> {
    let mut cfg: Configuration = serde_json::from_str(raw)?;
    cfg.normalize();
    cfg.validate()?;
    Ok(cfg)
}

pub fn load_config(path: &Path) -> anyhow::Result<Configuration> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("can't open '{}' for reading", path.display()))?;
    parse_config(&raw).with_context(|| format!("invalid configuration in '{}'", path.display()))
}
