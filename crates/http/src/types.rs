//! Request/response bodies for the control plane (`spec.md` §4.6), modeled
//! on the teacher's `api/src/types.rs` (`ErrorResponse { error, code,
//! timestamp }`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// `POST /apps` request body (`spec.md` §4.6).
#[derive(Debug, Deserialize)]
pub struct CreateAppRequest {
    pub name: String,
}

/// `POST /apps` response — the only time the caller ever sees `secret`
/// (`spec.md` §4.6 "only chance to see secret").
#[derive(Debug, Serialize)]
pub struct CreateAppResponse {
    pub id: String,
    pub key: String,
    pub secret: String,
}

/// Public view of an `App` — never carries `secret` (`spec.md` §3 "never
/// leaves server").
#[derive(Debug, Serialize)]
pub struct AppView {
    pub id: String,
    pub key: String,
    pub name: String,
    pub has_apn: bool,
    pub has_vapid: bool,
    pub smtp_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<pushi_common::model::App> for AppView {
    fn from(app: pushi_common::model::App) -> Self {
        Self {
            id: app.id.to_string(),
            key: app.key.to_string(),
            name: app.name,
            has_apn: app.apn.is_some(),
            has_vapid: app.vapid.is_some(),
            smtp_url: app.smtp_url,
            created_at: app.created_at,
        }
    }
}

/// `PUT /apps/{id}` request body — partial update of non-identity fields
/// (`spec.md` §4.6). `None` leaves the corresponding field unchanged.
#[derive(Debug, Deserialize, Default)]
pub struct UpdateAppRequest {
    pub name: Option<String>,
    pub smtp_url: Option<String>,
    pub apn: Option<pushi_common::model::ApnCredentials>,
    pub vapid: Option<pushi_common::model::VapidCredentials>,
}

/// `POST /apps/{id}/events` request body (`spec.md` §4.6, §4.2 `trigger`).
/// Accepts either a single `channel` or a `channels` list, matching the
/// broker's `trigger(..., channels: &[String], ...)` signature.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub event: String,
    pub channel: Option<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    pub data: serde_json::Value,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default = "default_persist")]
    pub persist: bool,
    #[serde(default)]
    pub echo: bool,
    #[serde(default = "default_verify_owner")]
    pub verify_owner: bool,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

fn default_persist() -> bool {
    true
}

fn default_verify_owner() -> bool {
    true
}

impl PublishRequest {
    /// Flattens `channel`/`channels` into the single list `trigger` wants.
    pub fn channel_list(&self) -> Vec<String> {
        let mut channels = self.channels.clone();
        if let Some(channel) = &self.channel {
            if !channels.contains(channel) {
                channels.push(channel.clone());
            }
        }
        channels
    }
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub delivered_sockets: usize,
    pub adapter_deliveries: usize,
    pub adapter_failures: Vec<PublishAdapterFailure>,
}

#[derive(Debug, Serialize)]
pub struct PublishAdapterFailure {
    pub adapter: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct VapidKeyResponse {
    pub public_key: String,
}

/// Machine-publisher credentials presented on every mutating admin/publish
/// call (`spec.md` §4.5 "(app_id, app_key, app_secret) ... requiring exact
/// match against the App record"). Carried as request headers rather than
/// in the JSON body so publish payloads stay exactly the `{event, channel,
/// data}` shape `spec.md` §4.6 names.
pub struct PublisherCredentials {
    pub app_key: String,
    pub app_secret: String,
}
