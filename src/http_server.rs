use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::admin;
use crate::auth::AdminCredentials;
use crate::dispatch::handle_webhook;
use crate::AppState;

/// Every path goes through the dispatch handler, which resolves the route
/// against the registry on each call.
pub fn public_router(state: AppState) -> Router {
    Router::new().fallback(handle_webhook).with_state(state)
}

/// Admin routes nested under `prefix` (e.g. `/__admin__`).
pub fn admin_router(state: AppState, credentials: AdminCredentials, prefix: &str) -> Router {
    Router::new().nest(prefix, admin::router(state, credentials))
}

pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listener bound");
    Ok(listener)
}

/// Serve `router` until CTRL+C or SIGTERM.
pub async fn serve(listener: TcpListener, router: Router) -> std::io::Result<()> {
    let app = router.layer(TraceLayer::new_for_http());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received CTRL+C, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
