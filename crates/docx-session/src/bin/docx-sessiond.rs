//! Watch daemon: restores sessions from the sessions directory, watches
//! every session with a source path, and absorbs external changes for
//! sessions that opted into auto-sync.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use docx_session::{ExternalChangeTracker, SessionManager};
use docx_session_core::SessionConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = SessionConfig::parse();

    let default_filter = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("starting docx-sessiond");
    info!("  sessions dir: {}", config.effective_sessions_dir().display());
    info!("  checkpoint interval: {}", config.checkpoint_interval);
    info!("  compaction threshold: {}", config.compaction_threshold);

    let manager = Arc::new(SessionManager::new(config)?);
    let restored = manager.restore_sessions().await?;
    info!(restored, "sessions restored");

    let tracker = Arc::new(ExternalChangeTracker::new(Arc::clone(&manager)));
    for entry in manager.list_sessions()? {
        if entry.source_path.is_none() {
            continue;
        }
        if let Err(e) = tracker.start_watching(&entry.id).await {
            warn!(session_id = %entry.id, error = %e, "could not watch session");
        }
    }

    let mut shutdown_rx = shutdown_signal();
    let poll_tracker = Arc::clone(&tracker);
    let poll_manager = Arc::clone(&manager);
    let poll = tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            for session_id in poll_tracker.pending_sessions() {
                let auto_sync = poll_manager
                    .list_sessions()
                    .ok()
                    .and_then(|sessions| {
                        sessions
                            .into_iter()
                            .find(|s| s.id == session_id)
                            .map(|s| s.auto_sync)
                    })
                    .unwrap_or(false);
                if !auto_sync {
                    continue;
                }
                let result = poll_tracker.sync(&session_id).await;
                if result.success {
                    info!(%session_id, message = %result.message, "auto-synced");
                } else {
                    warn!(%session_id, message = %result.message, "auto-sync failed");
                }
            }
        }
    });

    let _ = shutdown_rx.wait_for(|&stop| stop).await;
    info!("shutting down");
    poll.abort();
    tracker.stop_all();
    info!("shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!(error = %e, "failed to install Ctrl+C handler");
            }
            info!("received Ctrl+C, initiating shutdown");
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("received SIGTERM, initiating shutdown");
                }
                Err(e) => {
                    warn!(error = %e, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {},
            () = terminate => {},
        }

        let _ = tx.send(true);
    });

    rx
}
