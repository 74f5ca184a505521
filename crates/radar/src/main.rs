mod cli;
mod shutdown;

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use malradar_core::{default_state_dir, load_config};
use malradar_engine::{
    Collaborators, JikanClient, MalUserListClient, Notification, Notifier, Priority,
    PushoverClient, WatcherConfig, WatcherEvent, build_http_client, start_watcher,
};

use crate::cli::Cli;
use crate::shutdown::{ShutdownController, ShutdownEvent, spawn_signal_handler};

fn lifecycle_notification(message: &str, priority: Priority) -> Notification {
    Notification {
        title: "malradar".to_string(),
        message: message.to_string(),
        priority,
        ..Notification::default()
    }
}

async fn notify_lifecycle(notifier: &dyn Notifier, message: &str, priority: Priority) {
    if let Err(err) = notifier
        .send(&lifecycle_notification(message, priority))
        .await
    {
        error!("can't send '{message}' notification: {err:#}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    info!("malradar {} • MyAnimeList watcher", env!("CARGO_PKG_VERSION"));

    let conf = load_config(&cli.conf).context("configuration extraction failed")?;
    let state_dir = match cli.state_dir.clone() {
        Some(dir) => dir,
        None => default_state_dir().context("can't determine the state directory")?,
    };
    info!(conf = %cli.conf.display(), state_dir = %state_dir.display(), "configuration loaded");

    let http = build_http_client()?;
    let pushover: Arc<dyn Notifier> = Arc::new(PushoverClient::new(
        http.clone(),
        PushoverClient::DEFAULT_ENDPOINT.parse()?,
        conf.pushover.application_key.clone(),
        conf.pushover.user_key.clone(),
    ));
    let collaborators = Collaborators {
        catalog: Arc::new(JikanClient::new(
            http.clone(),
            JikanClient::DEFAULT_BASE_URL.parse()?,
        )),
        personal_list: Arc::new(MalUserListClient::new(
            http,
            MalUserListClient::DEFAULT_BASE_URL.parse()?,
        )),
        notifier: pushover.clone(),
    };

    let watcher = start_watcher(
        WatcherConfig::from_configuration(&conf, state_dir),
        collaborators,
    )
    .context("failed to start the watcher")?;
    let mut events = watcher.subscribe();

    let shutdown = Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_signal_handler(shutdown, shutdown_tx)?;

    notify_lifecycle(pushover.as_ref(), "Application has started", Priority::Low).await;

    let mut immediate_exit = false;
    loop {
        tokio::select! {
            ev_opt = shutdown_rx.recv() => {
                match ev_opt {
                    Some(ShutdownEvent::Graceful) => {
                        info!("stop requested, finishing current work before exiting (send the signal again to exit immediately)");
                        notify_lifecycle(pushover.as_ref(), "Application is stopping...", Priority::High).await;
                        watcher.request_stop();
                    }
                    Some(ShutdownEvent::Immediate) => {
                        warn!("stop requested again, exiting immediately");
                        immediate_exit = true;
                        break;
                    }
                    Some(ShutdownEvent::Checkpoint) => {
                        info!("checkpoint requested, saving current state");
                        if let Err(err) = watcher.checkpoint().await {
                            error!("checkpoint failed: {err:#}");
                        }
                    }
                    None => {}
                }
            }
            evt = events.recv() => {
                let evt = match evt {
                    Ok(v) => v,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                };

                match evt {
                    WatcherEvent::Started => debug!("watcher started"),
                    WatcherEvent::BatchFinished { summary } => {
                        debug!(?summary, "batch finished");
                    }
                    WatcherEvent::CheckpointSaved => debug!("checkpoint saved"),
                    WatcherEvent::StopRequested => {}
                    WatcherEvent::Stopped => break,
                }
            }
        }
    }

    if immediate_exit {
        std::process::exit(130);
    }

    watcher.wait().await?;
    info!("stopped");
    Ok(())
}
