//! App CRUD and the `/ping` smoke-test endpoint (`spec.md` §4.6).

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use pushi_common::model::App;
use pushi_common::{AppId, AppKey, BrokerError};

use crate::auth::authorize_publish;
use crate::error::{ApiError, ApiResult};
use crate::types::{AppView, CreateAppRequest, CreateAppResponse, UpdateAppRequest};
use crate::AppState;

fn parse_app_id(raw: &str) -> ApiResult<AppId> {
    uuid::Uuid::parse_str(raw)
        .map(AppId)
        .map_err(|_| ApiError(BrokerError::NotFound("malformed app id".into())))
}

/// `POST /apps` (`spec.md` §4.6): creates a tenant and returns its secret
/// — the only time the caller ever sees it.
pub async fn create_app(
    State(state): State<AppState>,
    Json(req): Json<CreateAppRequest>,
) -> ApiResult<Json<CreateAppResponse>> {
    let app = App {
        id: AppId::new(),
        key: AppKey::generate(),
        secret: uuid::Uuid::new_v4().to_string(),
        name: req.name,
        apn: None,
        vapid: None,
        smtp_url: None,
        created_at: chrono::Utc::now(),
    };
    state.broker.create_app(app.clone()).await?;
    Ok(Json(CreateAppResponse {
        id: app.id.to_string(),
        key: app.key.to_string(),
        secret: app.secret,
    }))
}

/// `GET /apps` (`spec.md` §4.6, admin listing).
pub async fn list_apps(State(state): State<AppState>) -> Json<Vec<AppView>> {
    Json(state.broker.list_apps().into_iter().map(AppView::from).collect())
}

/// `GET /apps/{id}` (`spec.md` §4.6).
pub async fn get_app(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<AppView>> {
    let app_id = parse_app_id(&id)?;
    let app = state
        .broker
        .app_by_id(app_id)
        .ok_or_else(|| ApiError(BrokerError::NotFound("unknown app".into())))?;
    Ok(Json(AppView::from(app)))
}

/// `PUT /apps/{id}` (`spec.md` §4.6 "update non-identity fields").
/// Requires publisher credentials (`spec.md` §4.5 "every mutation that
/// names an `app_id`").
pub async fn update_app(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdateAppRequest>,
) -> ApiResult<Json<AppView>> {
    let app_id = parse_app_id(&id)?;
    let mut existing = authorize_publish(&state.broker, app_id, &headers)?;

    if let Some(name) = req.name {
        existing.name = name;
    }
    if req.smtp_url.is_some() {
        existing.smtp_url = req.smtp_url;
    }
    if req.apn.is_some() {
        existing.apn = req.apn;
    }
    if req.vapid.is_some() {
        existing.vapid = req.vapid;
    }

    let updated = state.broker.update_app(app_id, existing).await?;
    Ok(Json(AppView::from(updated)))
}

/// `GET /apps/{id}/ping` (`spec.md` §4.6): triggers a `ping` event on
/// channel `ping`, exercising the live fan-out path without requiring a
/// real client publisher.
pub async fn ping(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    let app_id = parse_app_id(&id)?;
    let app = state
        .broker
        .app_by_id(app_id)
        .ok_or_else(|| ApiError(BrokerError::NotFound("unknown app".into())))?;
    let report = state
        .broker
        .trigger(
            &app,
            "ping",
            serde_json::json!("pong"),
            &["ping".to_string()],
            pushi_broker::TriggerOptions {
                persist: false,
                ..Default::default()
            },
        )
        .await?;
    Ok(Json(serde_json::json!({
        "delivered_sockets": report.delivered_sockets,
    })))
}
