//! In-memory `Repository` implementation. Used by the standalone binary
//! when no database is configured, and by every test in the workspace.

use std::sync::RwLock;

use async_trait::async_trait;
use dashmap::DashMap;
use pushi_common::model::{App, MessageRecord, SubscriptionRecord};
use pushi_common::{AppId, AppKey, RepositoryError};

use crate::Repository;

#[derive(Default)]
pub struct InMemoryRepository {
    apps: DashMap<AppId, App>,
    events: RwLock<Vec<MessageRecord>>,
    assocs: RwLock<Vec<(AppId, uuid::Uuid, String)>>,
    /// adapter -> subscription records
    subscriptions: DashMap<String, Vec<SubscriptionRecord>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an app directly, bypassing the trait (handy for test setup).
    pub fn seed_app(&self, app: App) {
        self.apps.insert(app.id, app);
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn load_apps(&self) -> crate::Result<Vec<App>> {
        Ok(self.apps.iter().map(|e| e.value().clone()).collect())
    }

    async fn get_app(&self, id: AppId) -> crate::Result<Option<App>> {
        Ok(self.apps.get(&id).map(|e| e.value().clone()))
    }

    async fn get_app_by_key(&self, key: &AppKey) -> crate::Result<Option<App>> {
        Ok(self
            .apps
            .iter()
            .find(|e| &e.value().key == key)
            .map(|e| e.value().clone()))
    }

    async fn create_app(&self, app: App) -> crate::Result<()> {
        self.apps.insert(app.id, app);
        Ok(())
    }

    async fn update_app(&self, app: App) -> crate::Result<()> {
        if !self.apps.contains_key(&app.id) {
            return Err(RepositoryError::NotFound(app.id.to_string()));
        }
        self.apps.insert(app.id, app);
        Ok(())
    }

    async fn list_apps(&self) -> crate::Result<Vec<App>> {
        self.load_apps().await
    }

    async fn append_event(&self, record: MessageRecord) -> crate::Result<()> {
        self.events
            .write()
            .map_err(|_| RepositoryError::Storage("event log poisoned".into()))?
            .push(record);
        Ok(())
    }

    async fn append_assoc(&self, app_id: AppId, mid: uuid::Uuid, user_id: &str) -> crate::Result<()> {
        self.assocs
            .write()
            .map_err(|_| RepositoryError::Storage("assoc log poisoned".into()))?
            .push((app_id, mid, user_id.to_string()));
        Ok(())
    }

    async fn add_subscription(&self, record: SubscriptionRecord) -> crate::Result<()> {
        self.subscriptions
            .entry(record.adapter.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn remove_subscription(
        &self,
        app_id: AppId,
        adapter: &str,
        target: &str,
        event: Option<&str>,
    ) -> crate::Result<()> {
        if let Some(mut records) = self.subscriptions.get_mut(adapter) {
            records.retain(|r| {
                !(r.app_id == app_id
                    && r.target == target
                    && event.map(|e| e == r.event).unwrap_or(true))
            });
        }
        Ok(())
    }

    async fn list_subscriptions(
        &self,
        app_id: AppId,
        adapter: &str,
    ) -> crate::Result<Vec<SubscriptionRecord>> {
        Ok(self
            .subscriptions
            .get(adapter)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.app_id == app_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_personal_subscriptions(&self, app_id: AppId) -> crate::Result<Vec<SubscriptionRecord>> {
        self.list_subscriptions(app_id, "personal").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushi_common::AppKey;

    fn sample_app() -> App {
        App {
            id: AppId::new(),
            key: AppKey::generate(),
            secret: "s3cr3t".into(),
            name: "test".into(),
            apn: None,
            vapid: None,
            smtp_url: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_then_load() {
        let repo = InMemoryRepository::new();
        let app = sample_app();
        repo.create_app(app.clone()).await.unwrap();
        let loaded = repo.load_apps().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, app.id);
    }

    #[tokio::test]
    async fn subscription_add_remove_round_trip() {
        let repo = InMemoryRepository::new();
        let app_id = AppId::new();
        let record = SubscriptionRecord {
            app_id,
            adapter: "webhook".into(),
            event: "orders".into(),
            target: "https://example.com/hook".into(),
            user_id: None,
        };
        repo.add_subscription(record.clone()).await.unwrap();
        assert_eq!(
            repo.list_subscriptions(app_id, "webhook").await.unwrap().len(),
            1
        );
        repo.remove_subscription(app_id, "webhook", &record.target, None)
            .await
            .unwrap();
        assert!(repo
            .list_subscriptions(app_id, "webhook")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn update_unknown_app_fails() {
        let repo = InMemoryRepository::new();
        let err = repo.update_app(sample_app()).await;
        assert!(err.is_err());
    }
}
