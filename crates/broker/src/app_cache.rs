//! In-memory cache of `App` records, read through from the Repository at
//! startup and kept current on admin mutations (`spec.md` §3 "App").
//!
//! Doubles as the [`pushi_adapters::AppDirectory`] adapters use to resolve
//! per-App credentials without depending on the Repository directly.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use pushi_adapters::AppDirectory;
use pushi_common::{model::App, AppId, AppKey};

#[derive(Default)]
pub struct AppCache {
    by_id: DashMap<AppId, App>,
    by_key: DashMap<AppKey, AppId>,
}

impl AppCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, app: App) {
        self.by_key.insert(app.key.clone(), app.id);
        self.by_id.insert(app.id, app);
    }

    pub fn get(&self, id: AppId) -> Option<App> {
        self.by_id.get(&id).map(|e| e.value().clone())
    }

    pub fn get_by_key(&self, key: &AppKey) -> Option<App> {
        self.by_key
            .get(key)
            .and_then(|id| self.by_id.get(&id).map(|e| e.value().clone()))
    }

    pub fn all(&self) -> Vec<App> {
        self.by_id.iter().map(|e| e.value().clone()).collect()
    }
}

#[async_trait]
impl AppDirectory for AppCache {
    async fn get(&self, app_id: AppId) -> Option<App> {
        AppCache::get(self, app_id)
    }
}
