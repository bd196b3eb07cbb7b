//! Upgrade endpoint: validates the `app_key` path segment and enforces
//! connection-count limits before handing the socket to [`crate::socket`]
//! (`spec.md` §4.1, §6 "WebSocket URL").

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{http::StatusCode, Router};
use pushi_broker::Broker;
use pushi_common::AppKey;
use tracing::warn;

use crate::limits::Limiters;

#[derive(Clone)]
pub struct WsState {
    pub broker: Arc<Broker>,
    pub limiters: Arc<Limiters>,
}

pub fn ws_router(state: WsState) -> Router {
    Router::new()
        .route("/:app_key", get(upgrade))
        .with_state(state)
}

async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<WsState>,
    Path(app_key): Path<String>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Response {
    let Some(app_key) = AppKey::parse(&app_key) else {
        return (StatusCode::NOT_FOUND, "unknown app").into_response();
    };
    let Some(app) = state.broker.app_by_key(&app_key) else {
        return (StatusCode::NOT_FOUND, "unknown app").into_response();
    };

    let limits = &state.broker.config().limits;
    if state.broker.total_connections() >= limits.max_connections {
        warn!("global connection limit reached, refusing upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }
    if state.broker.connection_count_for_app(app.id) >= limits.max_connections_per_app {
        warn!(app_id = %app.id, "per-app connection limit reached, refusing upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections for this app").into_response();
    }
    if state.limiters.ip_counts.count(remote.ip()) >= limits.max_connections_per_ip {
        warn!(ip = %remote.ip(), "per-ip connection limit reached, refusing upgrade");
        return (StatusCode::TOO_MANY_REQUESTS, "too many connections from this address").into_response();
    }
    state.limiters.ip_counts.acquire(remote.ip());

    let broker = state.broker;
    let limiters = state.limiters;
    ws.on_upgrade(move |socket| crate::socket::handle_socket(socket, broker, limiters, app, remote))
}
