//! Control-plane REST API (`spec.md` §4.6, component C8): app management,
//! event publishing, VAPID key lookup. Separate listener from the
//! WebSocket router in `pushi-ws` (`spec.md` §2 "two listeners: control
//! plane HTTP, realtime WebSocket").

pub mod auth;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod types;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use pushi_broker::Broker;

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
}

/// Builds the control-plane router (`spec.md` §4.6 endpoint table).
pub fn http_router(state: AppState) -> Router {
    Router::new()
        .route("/apps", post(routes::apps::create_app).get(routes::apps::list_apps))
        .route("/apps/vapid_key", get(routes::vapid::vapid_key))
        .route(
            "/apps/:id",
            get(routes::apps::get_app).put(routes::apps::update_app),
        )
        .route("/apps/:id/ping", get(routes::apps::ping))
        .route("/apps/:id/events", post(routes::events::publish))
        .layer(axum::middleware::from_fn(middleware::logging_middleware))
        .layer(middleware::get_tracing_layer())
        .with_state(state)
}
