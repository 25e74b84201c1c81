use tracing::{error, info};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Resolve on the first SIGINT or SIGTERM.
///
/// If a handler cannot be installed the failure is logged and that signal is
/// ignored; Ctrl-C still works through the other one.
#[cfg(unix)]
pub async fn shutdown_signal() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to setup SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to setup SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = terminate => info!("SIGTERM received, initiating graceful shutdown"),
        _ = interrupt => info!("SIGINT received, initiating graceful shutdown"),
    }
}

/// Resolve on Ctrl-C
#[cfg(not(unix))]
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received, initiating graceful shutdown"),
        Err(e) => {
            error!(error = %e, "Failed to setup Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    }
}
