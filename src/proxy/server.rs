//! # HTTP 监听

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::service::Gateway;
use crate::error::Result;

/// 在已绑定的监听器上运行 `gateway`，直到 Ctrl-C。
pub async fn serve(listener: TcpListener, gateway: Arc<Gateway>) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "gateway listening");

    let app = Arc::clone(&gateway).router();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    let stats = gateway.stats();
    info!(
        requests = stats.requests,
        responses = stats.responses,
        statuses = ?stats.statuses,
        "gateway stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => {
            warn!(error = %err, "unable to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
