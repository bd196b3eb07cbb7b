//! Per-app state container: one `ChannelStore` + `AliasMap` pair behind a
//! single lock (`spec.md` §5 "guarded by a per-app lock").
//!
//! `ChannelStores are created lazily on first access for an app and never
//! destroyed` (`spec.md` §3) — `AppRegistry` holds one `Arc` per app,
//! inserted on first touch and kept for the process lifetime.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use pushi_channels::{AliasMap, ChannelStore};
use pushi_common::AppId;

pub struct AppChannelState {
    pub store: ChannelStore,
    pub aliases: AliasMap,
}

impl Default for AppChannelState {
    fn default() -> Self {
        Self {
            store: ChannelStore::new(),
            aliases: AliasMap::new(),
        }
    }
}

/// Lazily-created per-app `ChannelStore`/`AliasMap` pairs.
#[derive(Default)]
pub struct AppRegistry {
    apps: DashMap<AppId, Arc<RwLock<AppChannelState>>>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, app_id: AppId) -> Arc<RwLock<AppChannelState>> {
        self.apps
            .entry(app_id)
            .or_insert_with(|| Arc::new(RwLock::new(AppChannelState::default())))
            .clone()
    }
}
