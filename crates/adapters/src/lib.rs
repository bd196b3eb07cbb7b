//! Out-of-band delivery adapters (`spec.md` §3 "Adapter", §4.4).
//!
//! Each adapter accepts `(app_id, channel, envelope)` and delivers outside
//! the WebSocket fan-out path, owning its own subscription index. Modeled
//! as a capability trait rather than a class hierarchy (`spec.md` §9):
//! concrete adapters share [`subscription_index::SubscriptionIndex`] by
//! composition, not inheritance.

pub mod email;
pub mod mobile_push;
pub mod subscription_index;
pub mod web_push;
pub mod webhook;

use async_trait::async_trait;
use pushi_common::{model::App, model::SubscriptionRecord, AdapterError, AppId, Envelope};

pub use email::EmailAdapter;
pub use mobile_push::MobilePushAdapter;
pub use subscription_index::SubscriptionIndex;
pub use web_push::WebPushAdapter;
pub use webhook::WebhookAdapter;

/// Outcome of one `Adapter::send` call, per target.
#[derive(Debug, Default, Clone)]
pub struct SendReport {
    pub delivered: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl SendReport {
    pub fn is_total_failure(&self) -> bool {
        !self.failed.is_empty() && self.delivered.is_empty()
    }
}

/// Out-of-band delivery plugin (`spec.md` §4.4). Every method is scoped to
/// a single `app_id` — adapters hold no cross-tenant state.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Short, stable name used as the `adapter` discriminator in
    /// `SubscriptionRecord` and as the `subs_<adapter>` table suffix
    /// (`spec.md` §6).
    fn name(&self) -> &'static str;

    /// Delivers `envelope` to every target subscribed on any channel in
    /// `channels` (`spec.md` §4.4: `aliased = [channel] ++
    /// AliasMap.get(channel)`, union, dedup, deliver — the caller, i.e. the
    /// broker, is responsible for building `channels` from the `AliasMap`
    /// since adapters hold no alias state of their own).
    ///
    /// Never returns an error for per-target failures: those land in
    /// [`SendReport::failed`]. An `Err` here means the call could not even
    /// be attempted (e.g. missing credentials).
    async fn send(
        &self,
        app_id: AppId,
        channels: &[String],
        envelope: &Envelope,
    ) -> Result<SendReport, AdapterError>;

    /// Registers a new subscription. Returns the stored record (normalized
    /// by the adapter, e.g. lower-cased email).
    async fn subscribe(&self, record: SubscriptionRecord) -> Result<SubscriptionRecord, AdapterError>;

    /// Removes subscription(s) for `target`, optionally scoped to one
    /// `event`. Returns whatever was removed.
    async fn unsubscribe(
        &self,
        app_id: AppId,
        target: &str,
        event: Option<&str>,
    ) -> Result<Vec<SubscriptionRecord>, AdapterError>;

    /// Lists subscriptions for an app, optionally scoped to one event
    /// (channel).
    async fn list(&self, app_id: AppId, event: Option<&str>) -> Vec<SubscriptionRecord>;

    /// Rebuilds this adapter's in-memory index for `app_id` from records
    /// already read out of the Repository (`spec.md` §4.4 `load`). Adapters
    /// never talk to the Repository directly — the broker's startup
    /// sequence owns that I/O and feeds records in here.
    fn load(&self, records: &[SubscriptionRecord]);

    /// Downcasting escape hatch for callers that need a concrete adapter's
    /// own methods (e.g. `pushi-http`'s `/apps/vapid_key` needs
    /// `WebPushAdapter::public_key`, which isn't part of this shared
    /// capability interface). Every adapter implements this as `self`.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Read-only lookup of per-app credentials (APNs cert/key, VAPID key,
/// SMTP URL), needed by adapters to deliver without giving them direct
/// access to the Repository (`spec.md` §3 "App" carries adapter
/// credentials; `pushi-broker` implements this over its own App cache).
#[async_trait]
pub trait AppDirectory: Send + Sync {
    async fn get(&self, app_id: AppId) -> Option<App>;
}
