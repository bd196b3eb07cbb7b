//! `GET /apps/vapid_key` (`spec.md` §4.6): returns the VAPID public key
//! derived from an App's private key, for browsers to call
//! `PushManager.subscribe({applicationServerKey})` against.

use axum::extract::{Query, State};
use pushi_adapters::WebPushAdapter;
use pushi_common::{AppId, BrokerError};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::types::VapidKeyResponse;
use crate::AppState;
use axum::Json;

#[derive(Debug, Deserialize)]
pub struct VapidKeyQuery {
    pub app_id: String,
}

/// `spec.md` §7 "OperationalError — missing credentials (e.g., VAPID not
/// set) → HTTP 400 with explanation" — surfaced here as
/// `BrokerError::Operational`, mapped to 400 by `crate::error`.
pub async fn vapid_key(
    State(state): State<AppState>,
    Query(params): Query<VapidKeyQuery>,
) -> ApiResult<Json<VapidKeyResponse>> {
    let app_id = uuid::Uuid::parse_str(&params.app_id)
        .map(AppId)
        .map_err(|_| ApiError(BrokerError::NotFound("malformed app id".into())))?;

    let adapter = state
        .broker
        .adapter("web_push")
        .ok_or_else(|| ApiError(BrokerError::Operational("web push adapter not configured".into())))?;

    let web_push = adapter
        .as_any()
        .downcast_ref::<WebPushAdapter>()
        .ok_or_else(|| ApiError(BrokerError::Operational("web push adapter not configured".into())))?;

    let public_key = web_push
        .public_key(app_id)
        .await
        .map_err(|e| ApiError(BrokerError::Operational(e.to_string())))?;

    Ok(Json(VapidKeyResponse { public_key }))
}
