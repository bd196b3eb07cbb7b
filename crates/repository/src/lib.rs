//! The `Repository` abstraction (`spec.md` §1, §3, §6): persistence of apps
//! and adapter subscription records, read through on startup. Out of scope
//! for this spec at the implementation level — concrete storage engines are
//! external collaborators — but a working in-memory implementation ships so
//! the broker runs standalone and in tests, plus a Postgres-backed one
//! matching the schema `spec.md` §6 names.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use pushi_common::{AppId, AppKey, RepositoryError};
use pushi_common::model::{App, MessageRecord, SubscriptionRecord};

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Storage abstraction the broker reads through at startup and writes
/// through during operation. Every method is also reachable without ever
/// holding a per-app lock (`spec.md` §5 "Repository calls are issued
/// outside any app lock").
#[async_trait]
pub trait Repository: Send + Sync {
    /// Loads every known app. Failure here aborts startup (`spec.md` §4.8 —
    /// "the broker cannot safely run without app records").
    async fn load_apps(&self) -> Result<Vec<App>>;

    async fn get_app(&self, id: AppId) -> Result<Option<App>>;
    async fn get_app_by_key(&self, key: &AppKey) -> Result<Option<App>>;
    async fn create_app(&self, app: App) -> Result<()>;
    async fn update_app(&self, app: App) -> Result<()>;
    async fn list_apps(&self) -> Result<Vec<App>>;

    /// Appends a message record to the event log (`spec.md` §4.2 step 2).
    /// Failure must not prevent live delivery — callers log and continue.
    async fn append_event(&self, record: MessageRecord) -> Result<()>;

    /// Associates a persisted message with a user id for personal-channel
    /// history reconstruction (`spec.md` §4.2, §6 `assoc` table).
    async fn append_assoc(&self, app_id: AppId, mid: uuid::Uuid, user_id: &str) -> Result<()>;

    /// Adds an adapter (or personal-alias) subscription record.
    async fn add_subscription(&self, record: SubscriptionRecord) -> Result<()>;

    /// Removes subscription record(s) matching `(app_id, adapter, target,
    /// event)`. `event = None` removes every event for that target.
    async fn remove_subscription(
        &self,
        app_id: AppId,
        adapter: &str,
        target: &str,
        event: Option<&str>,
    ) -> Result<()>;

    /// Lists every subscription record for an adapter, used to rebuild its
    /// in-memory index at startup (`spec.md` §4.4 "load").
    async fn list_subscriptions(&self, app_id: AppId, adapter: &str) -> Result<Vec<SubscriptionRecord>>;

    /// Lists every personal-channel (`subs_personal`) record for an app,
    /// used to rebuild the `AliasMap` at startup (`spec.md` §3 "AliasMap").
    async fn list_personal_subscriptions(&self, app_id: AppId) -> Result<Vec<SubscriptionRecord>>;
}
