pub mod probe;
pub mod run;
pub mod serve;
pub mod sessions;

use tokio::signal;
use tracing::warn;

/// Resolves with the signal name on SIGINT, or SIGTERM on unix
///
/// A handler that cannot be installed never fires.
pub async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => "SIGINT",
            Err(e) => {
                warn!(error = %e, "failed to install ctrl-c handler");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let term = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                "SIGTERM"
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending().await
            }
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<&'static str>();

    tokio::select! {
        name = ctrl_c => name,
        name = term => name,
    }
}
