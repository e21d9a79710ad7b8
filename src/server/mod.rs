//! HTTP server for browser clients
//!
//! WebSocket upgrades are accepted at `/` and `/ws`; `/health` and `/metrics`
//! share the same listener.

pub mod client;

use crate::observability::health::{self, HealthSource};
use crate::protocol::DeviceId;
use crate::session::SessionManager;
use crate::transport::LinkStatus;
use async_trait::async_trait;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use warp::Filter;

pub use client::{handle_socket, ClientSession};

#[async_trait]
impl HealthSource for SessionManager {
    async fn link_statuses(&self) -> Vec<(DeviceId, LinkStatus)> {
        self.statuses().await
    }

    async fn client_count(&self) -> usize {
        self.broadcaster().client_count().await
    }
}

/// Every route the relay serves
pub fn routes(
    sessions: Arc<SessionManager>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let ws_sessions = sessions.clone();
    let websocket = warp::path::end()
        .or(warp::path("ws").and(warp::path::end()))
        .unify()
        .and(warp::ws())
        .and(warp::any().map(move || ws_sessions.clone()))
        .map(|ws: warp::ws::Ws, sessions: Arc<SessionManager>| {
            ws.on_upgrade(move |socket| handle_socket(socket, sessions))
        });

    websocket.or(health::routes(sessions))
}

/// Bind `addr` and serve until `shutdown` resolves
pub async fn serve<F>(
    sessions: Arc<SessionManager>,
    addr: SocketAddr,
    shutdown: F,
) -> Result<(), warp::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (bound, server) =
        warp::serve(routes(sessions)).try_bind_with_graceful_shutdown(addr, shutdown)?;
    info!(addr = %bound, "Relay server listening");
    server.await;
    Ok(())
}
