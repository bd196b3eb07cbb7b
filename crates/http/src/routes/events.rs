//! `POST /apps/{id}/events` — the HTTP publish path (`spec.md` §4.6, §4.2
//! `trigger`).

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use pushi_broker::TriggerOptions;
use pushi_common::model::AdapterOverrides;
use pushi_common::BrokerError;

use crate::auth::authorize_publish;
use crate::error::{ApiError, ApiResult};
use crate::types::{PublishAdapterFailure, PublishRequest, PublishResponse};
use crate::AppState;

pub async fn publish(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<PublishRequest>,
) -> ApiResult<Json<PublishResponse>> {
    let app_id = uuid::Uuid::parse_str(&id)
        .map(pushi_common::AppId)
        .map_err(|_| ApiError(BrokerError::NotFound("malformed app id".into())))?;
    let app = authorize_publish(&state.broker, app_id, &headers)?;

    let channels = req.channel_list();
    if channels.is_empty() {
        return Err(ApiError(BrokerError::Protocol(
            "publish requires at least one channel".into(),
        )));
    }

    let overrides = if req.subject.is_some() || req.body.is_some() {
        Some(AdapterOverrides {
            subject: req.subject.clone(),
            body: req.body.clone(),
        })
    } else {
        None
    };

    let options = TriggerOptions {
        owner_id: req.owner_id.clone(),
        persist: req.persist,
        echo: req.echo,
        verify_owner: req.verify_owner,
        overrides,
    };

    let report = state
        .broker
        .trigger(&app, &req.event, req.data.clone(), &channels, options)
        .await?;

    Ok(Json(PublishResponse {
        delivered_sockets: report.delivered_sockets,
        adapter_deliveries: report.adapter_deliveries,
        adapter_failures: report
            .adapter_failures
            .into_iter()
            .map(|(adapter, reason)| PublishAdapterFailure { adapter, reason })
            .collect(),
    }))
}
