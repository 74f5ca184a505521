use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "malradar",
    version,
    about = "Watches MyAnimeList for anime that finished airing and sends Pushover notifications"
)]
pub struct Cli {
    /// Configuration file.
    #[arg(short = 'c', long = "conf", env = "MALRADAR_CONF", default_value = "config.json")]
    pub conf: PathBuf,

    /// Directory holding the watch-list and the encountered-values files.
    ///
    /// Defaults to `$XDG_STATE_HOME/malradar`.
    #[arg(long, env = "MALRADAR_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Log level (`error`, `warn`, `info`, `debug`, `trace`). `RUST_LOG` wins when set.
    #[arg(long, env = "MALRADAR_LOG", default_value = "info")]
    pub log_level: String,
}
