use tokio::signal;

use crate::core::state::AppState;

pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

/// Waits for a signal, then cancels every in-flight auto-grading poll.
pub(crate) async fn drain_on_signal(state: AppState) {
    shutdown_signal().await;
    let cancelled = state.polling().cancel_all().await;
    if cancelled > 0 {
        tracing::info!(cancelled, "Cancelled in-flight grading polls");
    }
}
