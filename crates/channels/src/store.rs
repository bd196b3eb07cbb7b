//! `ChannelStore`: the invariant-bearing per-app structure (`spec.md` §3,
//! §4.3).

use std::collections::{HashMap, HashSet, VecDeque};

use pushi_common::{ChannelData, ChannelKind, ChannelName, SocketId};
use thiserror::Error;

/// How many recent events a channel retains for `pusher:latest` and for
/// subscription snapshots. Snapshots further truncate to the last 10
/// (`spec.md` §4.2 "recentEvents[≤10]"); the ring itself is kept larger so
/// `pusher:latest`'s `skip`/`count` has more to page through.
const RING_CAPACITY: usize = 50;
const SNAPSHOT_EVENT_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("presence channel join requires channel_data.user_id")]
    MissingUserId,
}

/// A persisted, already-published event kept for replay (`spec.md` §4.2
/// "Recent events").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentEvent {
    pub event: String,
    pub data: String,
}

/// Snapshot returned on successful subscribe (`spec.md` §4.2 step 8).
/// `alias` is filled in by the broker from the `AliasMap` — `ChannelStore`
/// has no notion of aliases.
#[derive(Debug, Clone, Default)]
pub struct ChannelSnapshot {
    pub name: String,
    pub members: HashMap<String, ChannelData>,
    pub recent_events: Vec<RecentEvent>,
}

#[derive(Debug, Clone, Default)]
struct PresenceInfo {
    /// user_id -> sockets currently subscribed under that identity.
    users: HashMap<String, HashSet<SocketId>>,
    /// user_id -> last-seen channel_data.
    members: HashMap<String, ChannelData>,
}

impl PresenceInfo {
    fn user_count(&self) -> usize {
        self.users.len()
    }

    fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Outcome of a `join` call, used by the broker to decide whether to
/// broadcast `pusher_internal:member_added` (`spec.md` §4.2 step 6).
#[derive(Debug, Clone, Default)]
pub struct JoinOutcome {
    /// `true` iff this is the user's first connection in the channel.
    pub is_new_member: bool,
    /// The subscribing connection's presence user id, if this is a
    /// presence channel.
    pub user_id: Option<String>,
}

/// Outcome of a `leave` call, used by the broker to decide whether to
/// broadcast `pusher_internal:member_removed` (`spec.md` §4.2
/// `unsubscribe`).
#[derive(Debug, Clone, Default)]
pub struct LeaveOutcome {
    /// `false` if the socket was not actually in the channel (no-op).
    pub left: bool,
    /// `true` iff this was the user's last connection in the channel.
    pub was_last_member: bool,
    pub user_id: Option<String>,
}

/// Pure in-memory, per-app channel/subscription state.
///
/// Invariants (`spec.md` §3), re-verified by the property tests in this
/// module's `tests` submodule:
/// - `socket_id ∈ channel_sockets[ch] ⇔ ch ∈ socket_channels[socket_id]`
/// - `channel_data` exists only for presence channels, only while
///   subscribed
/// - `presence[ch].user_count == |presence[ch].users|`, every value
///   non-empty
/// - `channel_sockets[ch]` empty ⇒ `presence[ch]` absent
#[derive(Debug, Default)]
pub struct ChannelStore {
    socket_channels: HashMap<SocketId, HashSet<ChannelName>>,
    channel_sockets: HashMap<ChannelName, HashSet<SocketId>>,
    channel_socket_data: HashMap<(ChannelName, SocketId), ChannelData>,
    presence: HashMap<ChannelName, PresenceInfo>,
    recent_events: HashMap<ChannelName, VecDeque<RecentEvent>>,
}

impl ChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins `socket` to `channel`. Idempotent: if already subscribed, the
    /// existing membership is dropped and replaced (`spec.md` §4.2 step 4
    /// "idempotent rejoin").
    ///
    /// `channel_data` is only retained for presence channels; callers must
    /// have already discarded it for every other kind (`spec.md` §4.2 step
    /// 3) — passing it for a non-presence channel is simply ignored here as
    /// defense in depth.
    pub fn join(
        &mut self,
        socket: SocketId,
        channel: &ChannelName,
        channel_data: Option<ChannelData>,
    ) -> Result<JoinOutcome, StoreError> {
        if self.is_subscribed(socket, channel) {
            self.leave(socket, channel);
        }

        self.socket_channels
            .entry(socket)
            .or_default()
            .insert(channel.clone());
        self.channel_sockets
            .entry(channel.clone())
            .or_default()
            .insert(socket);

        if channel.kind() != ChannelKind::Presence {
            return Ok(JoinOutcome::default());
        }

        let data = channel_data.ok_or(StoreError::MissingUserId)?;
        let user_id = data
            .get("user_id")
            .and_then(|v| v.as_str())
            .ok_or(StoreError::MissingUserId)?
            .to_string();

        self.channel_socket_data
            .insert((channel.clone(), socket), data.clone());

        let info = self.presence.entry(channel.clone()).or_default();
        let is_new_member = !info.users.contains_key(&user_id) || info
            .users
            .get(&user_id)
            .map(|s| s.is_empty())
            .unwrap_or(true);
        info.users.entry(user_id.clone()).or_default().insert(socket);
        info.members.insert(user_id.clone(), data);

        Ok(JoinOutcome {
            is_new_member,
            user_id: Some(user_id),
        })
    }

    /// Removes `socket` from `channel`. A no-op (returns `left = false`) if
    /// the socket was not in the channel.
    pub fn leave(&mut self, socket: SocketId, channel: &ChannelName) -> LeaveOutcome {
        let was_present = self
            .channel_sockets
            .get(channel)
            .map(|s| s.contains(&socket))
            .unwrap_or(false);
        if !was_present {
            return LeaveOutcome::default();
        }

        if let Some(sockets) = self.channel_sockets.get_mut(channel) {
            sockets.remove(&socket);
            if sockets.is_empty() {
                self.channel_sockets.remove(channel);
            }
        }
        if let Some(channels) = self.socket_channels.get_mut(&socket) {
            channels.remove(channel);
            if channels.is_empty() {
                self.socket_channels.remove(&socket);
            }
        }

        let data = self.channel_socket_data.remove(&(channel.clone(), socket));
        let user_id = data.as_ref().and_then(|d| d.get("user_id")).and_then(|v| v.as_str()).map(str::to_string);

        let mut was_last_member = false;
        if let (Some(user_id), Some(info)) = (&user_id, self.presence.get_mut(channel)) {
            if let Some(sockets) = info.users.get_mut(user_id) {
                sockets.remove(&socket);
                if sockets.is_empty() {
                    info.users.remove(user_id);
                    info.members.remove(user_id);
                    was_last_member = true;
                }
            }
            if info.is_empty() {
                self.presence.remove(channel);
            }
        }

        if !self.channel_sockets.contains_key(channel) {
            self.presence.remove(channel);
        }

        LeaveOutcome {
            left: true,
            was_last_member,
            user_id,
        }
    }

    /// Leaves every channel `socket` was subscribed to (connection close,
    /// `spec.md` §4.7). Returns `(channel, outcome)` pairs so the broker can
    /// broadcast `member_removed`/peer-teardown per channel.
    pub fn leave_all(&mut self, socket: SocketId) -> Vec<(ChannelName, LeaveOutcome)> {
        let channels: Vec<ChannelName> = self
            .socket_channels
            .get(&socket)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        channels
            .into_iter()
            .map(|ch| {
                let outcome = self.leave(socket, &ch);
                (ch, outcome)
            })
            .collect()
    }

    pub fn is_subscribed(&self, socket: SocketId, channel: &ChannelName) -> bool {
        self.socket_channels
            .get(&socket)
            .map(|s| s.contains(channel))
            .unwrap_or(false)
    }

    /// Sockets currently subscribed to `channel`.
    pub fn sockets(&self, channel: &ChannelName) -> Vec<SocketId> {
        self.channel_sockets
            .get(channel)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Channels `socket` currently has joined.
    pub fn channels_of(&self, socket: SocketId) -> Vec<ChannelName> {
        self.socket_channels
            .get(&socket)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Presence members of `channel`: `user_id -> channel_data`. Empty for
    /// non-presence channels.
    pub fn members(&self, channel: &ChannelName) -> HashMap<String, ChannelData> {
        self.presence
            .get(channel)
            .map(|info| info.members.clone())
            .unwrap_or_default()
    }

    /// Other distinct user ids currently present in a presence channel,
    /// used for peer auto-wiring (`spec.md` §4.2 step 7).
    pub fn other_user_ids(&self, channel: &ChannelName, excluding: &str) -> Vec<String> {
        self.presence
            .get(channel)
            .map(|info| {
                info.users
                    .keys()
                    .filter(|u| u.as_str() != excluding)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every socket currently registered under `user_id` in `channel`
    /// (there may be more than one, e.g. multiple tabs).
    pub fn sockets_for_user(&self, channel: &ChannelName, user_id: &str) -> Vec<SocketId> {
        self.presence
            .get(channel)
            .and_then(|info| info.users.get(user_id))
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn user_count(&self, channel: &ChannelName) -> usize {
        self.presence.get(channel).map(PresenceInfo::user_count).unwrap_or(0)
    }

    /// Appends a published event to the replay ring (`spec.md` §4.2
    /// "Recent events" — only persisted events participate; callers must
    /// only call this when `persist = true`).
    pub fn record_event(&mut self, channel: &ChannelName, event: RecentEvent) {
        let ring = self.recent_events.entry(channel.clone()).or_default();
        ring.push_back(event);
        while ring.len() > RING_CAPACITY {
            ring.pop_front();
        }
    }

    /// Fetches a page of recent events for `pusher:latest`
    /// (`spec.md` §4.1, §6).
    pub fn recent_events(&self, channel: &ChannelName, skip: usize, count: usize) -> Vec<RecentEvent> {
        let ring = match self.recent_events.get(channel) {
            Some(r) => r,
            None => return Vec::new(),
        };
        ring.iter().rev().skip(skip).take(count).cloned().collect()
    }

    /// Builds the subscription-success snapshot (`spec.md` §4.2 step 8).
    /// `alias` is attached by the caller (the broker), not here.
    pub fn snapshot(&self, channel: &ChannelName) -> ChannelSnapshot {
        let recent_events = self
            .recent_events
            .get(channel)
            .map(|ring| {
                ring.iter()
                    .rev()
                    .take(SNAPSHOT_EVENT_LIMIT)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        ChannelSnapshot {
            name: channel.as_str().to_string(),
            members: self.members(channel),
            recent_events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn socket() -> SocketId {
        SocketId(Uuid::new_v4())
    }

    fn presence_data(user_id: &str) -> ChannelData {
        let mut m = ChannelData::new();
        m.insert("user_id".to_string(), serde_json::json!(user_id));
        m
    }

    #[test]
    fn bidirectional_index_matches_on_join_and_leave() {
        let mut store = ChannelStore::new();
        let s = socket();
        let ch = ChannelName::new("news");
        store.join(s, &ch, None).unwrap();
        assert!(store.is_subscribed(s, &ch));
        assert_eq!(store.sockets(&ch), vec![s]);
        assert_eq!(store.channels_of(s), vec![ch.clone()]);

        store.leave(s, &ch);
        assert!(!store.is_subscribed(s, &ch));
        assert!(store.sockets(&ch).is_empty());
        assert!(store.channels_of(s).is_empty());
    }

    #[test]
    fn presence_join_requires_user_id() {
        let mut store = ChannelStore::new();
        let ch = ChannelName::new("presence-chat");
        let err = store.join(socket(), &ch, None).unwrap_err();
        assert!(matches!(err, StoreError::MissingUserId));

        let mut bad = ChannelData::new();
        bad.insert("foo".into(), serde_json::json!("bar"));
        let err = store.join(socket(), &ch, Some(bad)).unwrap_err();
        assert!(matches!(err, StoreError::MissingUserId));
    }

    #[test]
    fn presence_member_added_only_on_first_connection() {
        let mut store = ChannelStore::new();
        let ch = ChannelName::new("presence-chat");
        let s1 = socket();
        let s2 = socket();

        let outcome1 = store.join(s1, &ch, Some(presence_data("u1"))).unwrap();
        assert!(outcome1.is_new_member);

        // second tab for the same user: not a new member
        let outcome2 = store.join(s2, &ch, Some(presence_data("u1"))).unwrap();
        assert!(!outcome2.is_new_member);

        assert_eq!(store.user_count(&ch), 1);
    }

    #[test]
    fn presence_member_removed_only_on_last_disconnection() {
        let mut store = ChannelStore::new();
        let ch = ChannelName::new("presence-chat");
        let s1 = socket();
        let s2 = socket();
        store.join(s1, &ch, Some(presence_data("u1"))).unwrap();
        store.join(s2, &ch, Some(presence_data("u1"))).unwrap();

        let leave1 = store.leave(s1, &ch);
        assert!(!leave1.was_last_member);

        let leave2 = store.leave(s2, &ch);
        assert!(leave2.was_last_member);
        assert_eq!(store.user_count(&ch), 0);
    }

    #[test]
    fn channel_entry_is_removed_once_empty() {
        let mut store = ChannelStore::new();
        let ch = ChannelName::new("presence-chat");
        let s1 = socket();
        store.join(s1, &ch, Some(presence_data("u1"))).unwrap();
        store.leave(s1, &ch);
        assert_eq!(store.user_count(&ch), 0);
        assert!(store.members(&ch).is_empty());
    }

    #[test]
    fn idempotent_resubscribe_leaves_identical_state() {
        let mut store_a = ChannelStore::new();
        let mut store_b = ChannelStore::new();
        let ch = ChannelName::new("presence-chat");
        let s = socket();

        store_a.join(s, &ch, Some(presence_data("u1"))).unwrap();
        store_a.join(s, &ch, Some(presence_data("u1"))).unwrap();

        store_b.join(s, &ch, Some(presence_data("u1"))).unwrap();

        assert_eq!(store_a.sockets(&ch), store_b.sockets(&ch));
        assert_eq!(store_a.members(&ch), store_b.members(&ch));
        assert_eq!(store_a.user_count(&ch), store_b.user_count(&ch));
    }

    #[test]
    fn leave_all_removes_every_channel() {
        let mut store = ChannelStore::new();
        let s = socket();
        store.join(s, &ChannelName::new("news"), None).unwrap();
        store
            .join(s, &ChannelName::new("presence-chat"), Some(presence_data("u1")))
            .unwrap();

        let outcomes = store.leave_all(s);
        assert_eq!(outcomes.len(), 2);
        assert!(store.channels_of(s).is_empty());
    }

    #[test]
    fn recent_events_ring_bounds_snapshot_to_ten() {
        let mut store = ChannelStore::new();
        let ch = ChannelName::new("news");
        for i in 0..25 {
            store.record_event(
                &ch,
                RecentEvent {
                    event: "tick".into(),
                    data: i.to_string(),
                },
            );
        }
        let snap = store.snapshot(&ch);
        assert_eq!(snap.recent_events.len(), SNAPSHOT_EVENT_LIMIT);
        // most recent first
        assert_eq!(snap.recent_events[0].data, "24");
    }

    proptest! {
        #[test]
        fn bidirectional_invariant_holds_after_random_ops(
            ops in prop::collection::vec((0u8..3u8, 0usize..4usize, 0usize..3usize), 0..200)
        ) {
            let mut store = ChannelStore::new();
            let sockets: Vec<SocketId> = (0..4).map(|_| socket()).collect();
            let channels: Vec<ChannelName> = (0..3)
                .map(|i| ChannelName::new(format!("ch{i}")))
                .collect();

            for (op, socket_idx, channel_idx) in ops {
                let s = sockets[socket_idx];
                let ch = &channels[channel_idx];
                match op {
                    0 => { let _ = store.join(s, ch, None); }
                    1 => { store.leave(s, ch); }
                    _ => { store.leave_all(s); }
                }
            }

            for ch in &channels {
                for s in store.sockets(ch) {
                    prop_assert!(store.channels_of(s).contains(ch));
                }
            }
            for s in &sockets {
                for ch in store.channels_of(*s) {
                    prop_assert!(store.sockets(&ch).contains(s));
                }
            }
        }
    }
}
