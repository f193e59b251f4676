//! Process lifecycle: termination signals and the global "keep running" flag.

use std::sync::LazyLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Notify;

static RUNNING: AtomicBool = AtomicBool::new(true);
static SHUTDOWN: LazyLock<Notify> = LazyLock::new(Notify::new);

/// Spawns a task which flips [`is_running`] to `false` on SIGINT, SIGTERM or SIGHUP.
pub fn install_termination_listener() {
    tokio::spawn(async move {
        let mut sig_term = signal(SignalKind::terminate()).ok();
        let mut sig_int = signal(SignalKind::interrupt()).ok();
        let mut sig_hup = signal(SignalKind::hangup()).ok();

        tokio::select! {
            Some(_) = async { sig_int.as_mut()?.recv().await } => {
                tracing::info!("Received SIGINT. Shutting down...");
            },
            Some(_) = async { sig_term.as_mut()?.recv().await } => {
                tracing::info!("Received SIGTERM. Shutting down...");
            },
            Some(_) = async { sig_hup.as_mut()?.recv().await } => {
                tracing::info!("Received SIGHUP. Shutting down...");
            },
        }

        request_shutdown();
    });
}

/// Marks the process as stopping and wakes everyone waiting in [`await_shutdown`].
pub fn request_shutdown() {
    RUNNING.store(false, Ordering::Relaxed);
    SHUTDOWN.notify_waiters();
}

pub fn is_running() -> bool {
    RUNNING.load(Ordering::Relaxed)
}

/// Resolves once a shutdown has been requested.
pub async fn await_shutdown() {
    while is_running() {
        let notified = SHUTDOWN.notified();
        if !is_running() {
            break;
        }

        // The timeout covers a notification racing the registration above.
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), notified).await;
    }
}
