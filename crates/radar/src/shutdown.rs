use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::mpsc;

#[derive(Debug)]
pub struct ShutdownController {
    forced: AtomicU8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownEvent {
    Graceful,
    Immediate,
    Checkpoint,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self {
            forced: AtomicU8::new(0),
        }
    }

    /// Record a stop signal and tell what it should do.
    pub fn on_stop_signal(&self) -> ShutdownEvent {
        let n = self.forced.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        if n == 1 {
            ShutdownEvent::Graceful
        } else {
            ShutdownEvent::Immediate
        }
    }
}

/// SIGINT and SIGTERM stop the watcher (twice: exit at once), SIGUSR1 asks for a
/// checkpoint.
#[cfg(unix)]
pub fn spawn_signal_handler(
    shutdown: Arc<ShutdownController>,
    shutdown_tx: mpsc::UnboundedSender<ShutdownEvent>,
) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut checkpoint = signal(SignalKind::user_defined1())?;

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                Some(()) = interrupt.recv() => shutdown.on_stop_signal(),
                Some(()) = terminate.recv() => shutdown.on_stop_signal(),
                Some(()) = checkpoint.recv() => ShutdownEvent::Checkpoint,
                else => return,
            };
            if shutdown_tx.send(event).is_err() || event == ShutdownEvent::Immediate {
                return;
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
pub fn spawn_signal_handler(
    shutdown: Arc<ShutdownController>,
    shutdown_tx: mpsc::UnboundedSender<ShutdownEvent>,
) -> anyhow::Result<()> {
    use tracing::warn;

    tokio::spawn(async move {
        loop {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("can't listen for ctrl-c: {err}");
                return;
            }
            let event = shutdown.on_stop_signal();
            if shutdown_tx.send(event).is_err() || event == ShutdownEvent::Immediate {
                return;
            }
        }
    });
    Ok(())
}
