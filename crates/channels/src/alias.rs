//! `channel → [alias]` map for personal channels (`spec.md` §3, §4.2).

use std::collections::HashMap;

use pushi_common::ChannelName;

/// Expands a personal channel name into the concrete channel set it
/// represents. Loaded from the Repository at startup and updated whenever a
/// personal subscription record is created or removed.
#[derive(Debug, Default, Clone)]
pub struct AliasMap {
    aliases: HashMap<ChannelName, Vec<String>>,
}

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `alias` to `channel`'s alias list (`spec.md` §4.2
    /// `addAlias`). No-op if already present.
    pub fn add_alias(&mut self, channel: ChannelName, alias: impl Into<String>) {
        let alias = alias.into();
        let entry = self.aliases.entry(channel).or_default();
        if !entry.contains(&alias) {
            entry.push(alias);
        }
    }

    /// Removes `alias` from `channel`'s alias list. Drops the entry
    /// entirely once empty.
    pub fn remove_alias(&mut self, channel: &ChannelName, alias: &str) {
        if let Some(entry) = self.aliases.get_mut(channel) {
            entry.retain(|a| a != alias);
            if entry.is_empty() {
                self.aliases.remove(channel);
            }
        }
    }

    /// The concrete channel names `channel` currently expands to.
    pub fn get(&self, channel: &ChannelName) -> &[String] {
        self.aliases.get(channel).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Reverse lookup: every personal channel name that currently expands
    /// to `concrete_channel`, used to fill the subscription snapshot's
    /// `alias` field (`spec.md` §4.2 step 8 — "`alias` is filled in by the
    /// broker from the `AliasMap`").
    pub fn aliases_of(&self, concrete_channel: &str) -> Vec<String> {
        self.aliases
            .iter()
            .filter(|(_, aliases)| aliases.iter().any(|a| a == concrete_channel))
            .map(|(personal, _)| personal.as_str().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_expansion_yields_exactly_added_aliases() {
        let mut map = AliasMap::new();
        let personal = ChannelName::new("personal-u1");
        map.add_alias(personal.clone(), "orders");
        map.add_alias(personal.clone(), "shipping");
        let mut aliases = map.get(&personal).to_vec();
        aliases.sort();
        assert_eq!(aliases, vec!["orders".to_string(), "shipping".to_string()]);
    }

    #[test]
    fn remove_drops_empty_entry() {
        let mut map = AliasMap::new();
        let personal = ChannelName::new("personal-u1");
        map.add_alias(personal.clone(), "orders");
        map.remove_alias(&personal, "orders");
        assert!(map.get(&personal).is_empty());
    }

    #[test]
    fn duplicate_add_is_idempotent() {
        let mut map = AliasMap::new();
        let personal = ChannelName::new("personal-u1");
        map.add_alias(personal.clone(), "orders");
        map.add_alias(personal.clone(), "orders");
        assert_eq!(map.get(&personal).len(), 1);
    }

    #[test]
    fn aliases_of_reverse_lookup() {
        let mut map = AliasMap::new();
        map.add_alias(ChannelName::new("personal-u1"), "orders");
        map.add_alias(ChannelName::new("personal-u2"), "orders");
        let mut found = map.aliases_of("orders");
        found.sort();
        assert_eq!(found, vec!["personal-u1".to_string(), "personal-u2".to_string()]);
        assert!(map.aliases_of("shipping").is_empty());
    }
}
