// SPDX-License-Identifier: PolyForm-Shield-1.0

use tokio::signal;
use tracing::{info, warn};

/// Resolve on ctrl-c, or SIGTERM on unix.
pub async fn wait_for_signal() {
    info!("gateway: waiting for shutdown signal");

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("gateway: failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("gateway: failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("gateway: received ctrl-c"),
        _ = terminate => info!("gateway: received SIGTERM"),
    }
}
