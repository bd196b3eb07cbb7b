//! Tenant and wire-level data model (`spec.md` §3, §6).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{AppId, AppKey};

/// APNs credentials for the mobile-push adapter, held per `App`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApnCredentials {
    pub key_data: String,
    pub cer_data: String,
    #[serde(default)]
    pub sandbox: bool,
}

/// VAPID credentials for the Web Push adapter, held per `App`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VapidCredentials {
    pub private_key: String,
    pub contact_email: String,
}

/// Tenant identity record (`spec.md` §3 "App").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    pub id: AppId,
    pub key: AppKey,
    /// HMAC key. Never sent back to clients after creation.
    pub secret: String,
    pub name: String,
    #[serde(default)]
    pub apn: Option<ApnCredentials>,
    #[serde(default)]
    pub vapid: Option<VapidCredentials>,
    /// `smtp://` or `smtps://` URL, optionally with a `?sender=` query
    /// (`spec.md` §4.4).
    #[serde(default)]
    pub smtp_url: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Per-subscription presence payload. Must include `user_id`
/// (`spec.md` §3, §9 — enforced at subscribe time, not here).
pub type ChannelData = HashMap<String, serde_json::Value>;

/// An event accepted for publication (`spec.md` §3 "Event").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub channel: String,
    pub event: String,
    pub data: serde_json::Value,
    #[serde(default)]
    pub owner_id: Option<String>,
    /// Only honored by adapters that support overriding their payload
    /// (`spec.md` §4.4 — email `subject`/`body`).
    #[serde(default)]
    pub overrides: Option<AdapterOverrides>,
}

/// Per-adapter overrides for an event's delivery payload, distinct from the
/// envelope sent to WebSocket subscribers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterOverrides {
    pub subject: Option<String>,
    pub body: Option<String>,
}

/// The `{channel, event, data}` triple actually delivered to subscribers
/// and adapters (`spec.md` GLOSSARY "Envelope"). `data` is always the
/// normalized JSON string produced by `trigger` step 1, never the
/// original `serde_json::Value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: String,
    pub event: String,
    pub data: String,
    #[serde(default)]
    pub overrides: Option<AdapterOverrides>,
}

/// A frame as it actually goes out over the WebSocket wire (`spec.md` §6):
/// `{event, channel?, data}` where `data` is always a pre-serialized JSON
/// string, never a nested object — matches both the internal
/// `pusher_internal:*` frames and published `Envelope`s forwarded verbatim
/// to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub data: String,
}

impl OutboundFrame {
    pub fn new(event: impl Into<String>, channel: Option<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            channel,
            data: data.into(),
        }
    }

    /// Builds a frame whose `data` is the JSON-serialized form of `value`
    /// (the common case — presence payloads, error messages, snapshots).
    pub fn with_json(
        event: impl Into<String>,
        channel: Option<String>,
        value: &impl Serialize,
    ) -> serde_json::Result<Self> {
        Ok(Self::new(event, channel, serde_json::to_string(value)?))
    }
}

impl From<Envelope> for OutboundFrame {
    fn from(envelope: Envelope) -> Self {
        Self {
            event: envelope.event,
            channel: Some(envelope.channel),
            data: envelope.data,
        }
    }
}

/// A persisted message record, appended to the Repository's event log on
/// `trigger` when `persist = true` (`spec.md` §4.2 step 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub mid: Uuid,
    pub app_id: AppId,
    pub channel: String,
    pub owner_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub data: String,
}

/// An adapter subscription record (`spec.md` §3 "Adapter subscription
/// record"): `(app_id, event, target)` plus which adapter it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub app_id: AppId,
    pub adapter: String,
    pub event: String,
    pub target: String,
    /// Set only for personal-channel (alias) subscriptions.
    #[serde(default)]
    pub user_id: Option<String>,
}
