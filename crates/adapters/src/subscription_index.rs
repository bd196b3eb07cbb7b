//! Shared `subs: app_id → event → set<target>` index (`spec.md` §3
//! "Adapter subscription record", §4.4).
//!
//! Every concrete adapter owns one of these by composition rather than by
//! inheriting from a shared base class (`spec.md` §9 "model as an `Adapter`
//! capability interface ... share a small `SubscriptionIndex` helper by
//! composition, not inheritance").
//!
//! The record's `event` field doubles as the channel name a target is
//! subscribed to — the same string `trigger` receives as `channel` and,
//! after `AliasMap` expansion, the `aliased` list `Adapter::send` is given.

use std::collections::HashSet;

use dashmap::DashMap;
use pushi_common::{model::SubscriptionRecord, AppId};

/// `(app_id, event) -> set<target>`, plus the reverse `(app_id, target) ->
/// set<event>` needed to implement `unsubscribe(target, event?)` without a
/// full scan.
#[derive(Default)]
pub struct SubscriptionIndex {
    by_event: DashMap<(AppId, String), HashSet<String>>,
    by_target: DashMap<(AppId, String), HashSet<String>>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, app_id: AppId, event: String, target: String) {
        self.by_event
            .entry((app_id, event.clone()))
            .or_default()
            .insert(target.clone());
        self.by_target
            .entry((app_id, target))
            .or_default()
            .insert(event);
    }

    /// Removes a single `(target, event)` pair, or every event for `target`
    /// when `event` is `None` (`spec.md` §4.4 `unsubscribe`). Returns the
    /// removed records.
    pub fn remove(
        &self,
        app_id: AppId,
        target: &str,
        event: Option<&str>,
    ) -> Vec<SubscriptionRecord> {
        let events: Vec<String> = match event {
            Some(e) => vec![e.to_string()],
            None => self
                .by_target
                .get(&(app_id, target.to_string()))
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default(),
        };

        let mut removed = Vec::new();
        for ev in events {
            if let Some(mut set) = self.by_event.get_mut(&(app_id, ev.clone())) {
                if set.remove(target) {
                    removed.push(SubscriptionRecord {
                        app_id,
                        adapter: String::new(),
                        event: ev.clone(),
                        target: target.to_string(),
                        user_id: None,
                    });
                }
            }
            if let Some(mut set) = self.by_target.get_mut(&(app_id, target.to_string())) {
                set.remove(&ev);
            }
        }
        self.by_target.retain(|_, s| !s.is_empty());
        self.by_event.retain(|_, s| !s.is_empty());
        removed
    }

    /// Unions targets across every channel in `channels` (the alias-expanded
    /// set `Adapter::send` resolves, `spec.md` §4.4).
    pub fn targets_for(&self, app_id: AppId, channels: &[String]) -> HashSet<String> {
        let mut out = HashSet::new();
        for ch in channels {
            if let Some(set) = self.by_event.get(&(app_id, ch.clone())) {
                out.extend(set.iter().cloned());
            }
        }
        out
    }

    /// Lists every subscription for an app, optionally filtered to one
    /// event (`spec.md` §4.4 `list`).
    pub fn list(&self, app_id: AppId, event: Option<&str>, adapter_name: &str) -> Vec<SubscriptionRecord> {
        self.by_event
            .iter()
            .filter(|entry| entry.key().0 == app_id)
            .filter(|entry| match event {
                Some(e) => entry.key().1 == e,
                None => true,
            })
            .flat_map(|entry| {
                let ev = entry.key().1.clone();
                entry
                    .value()
                    .iter()
                    .map(|target| SubscriptionRecord {
                        app_id,
                        adapter: adapter_name.to_string(),
                        event: ev.clone(),
                        target: target.clone(),
                        user_id: None,
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Rebuilds this app's slice of the index from Repository records
    /// (`spec.md` §4.4 `load`).
    pub fn load(&self, records: &[SubscriptionRecord]) {
        for record in records {
            self.insert(record.app_id, record.event.clone(), record.target.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_union_across_aliased_channels() {
        let idx = SubscriptionIndex::new();
        let app = AppId::new();
        idx.insert(app, "orders".into(), "https://a.example/hook".into());
        idx.insert(app, "personal-u1".into(), "https://b.example/hook".into());

        let targets = idx.targets_for(app, &["orders".to_string(), "personal-u1".to_string()]);
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn remove_without_event_drops_every_subscription() {
        let idx = SubscriptionIndex::new();
        let app = AppId::new();
        idx.insert(app, "orders".into(), "t1".into());
        idx.insert(app, "shipping".into(), "t1".into());

        let removed = idx.remove(app, "t1", None);
        assert_eq!(removed.len(), 2);
        assert!(idx.targets_for(app, &["orders".to_string()]).is_empty());
    }

    #[test]
    fn remove_with_event_is_scoped() {
        let idx = SubscriptionIndex::new();
        let app = AppId::new();
        idx.insert(app, "orders".into(), "t1".into());
        idx.insert(app, "shipping".into(), "t1".into());

        idx.remove(app, "t1", Some("orders"));
        assert!(idx.targets_for(app, &["orders".to_string()]).is_empty());
        assert!(!idx.targets_for(app, &["shipping".to_string()]).is_empty());
    }
}
