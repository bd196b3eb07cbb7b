//! Channel name parsing and classification (`spec.md` §3).

use serde::{Deserialize, Serialize};

/// Admission semantics implied by a channel name's prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelKind {
    /// No prefix. Anyone may subscribe.
    Public,
    /// `private-…`. Requires a signed `auth` token.
    Private,
    /// `presence-…`. Private + per-member `channel_data`.
    Presence,
    /// `peer-…`. Private + pairwise, auto-created between presence members.
    Peer,
    /// `personal-<user_id>`. Virtual; expands via the `AliasMap`.
    Personal,
}

impl ChannelKind {
    /// Whether admission to this kind requires a verified `auth` token
    /// (i.e. everything except `Public`).
    pub fn requires_auth(self) -> bool {
        !matches!(self, ChannelKind::Public)
    }

    pub fn carries_presence_data(self) -> bool {
        matches!(self, ChannelKind::Presence)
    }
}

/// A validated, classified channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelName(String);

impl ChannelName {
    /// Wraps a raw channel name without validating character set — callers
    /// that need strict validation should use [`ChannelName::parse`].
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Parses and validates a channel name per `spec.md` §6
    /// (`[A-Za-z0-9:_-]+`, plus a `personal-` name must carry a non-empty
    /// user id).
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || raw.len() > 200 {
            return None;
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b':' | b'_' | b'-'))
        {
            return None;
        }
        if raw.starts_with("personal-") && raw.len() == "personal-".len() {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> ChannelKind {
        if self.0.starts_with("presence-") {
            ChannelKind::Presence
        } else if self.0.starts_with("peer-") {
            ChannelKind::Peer
        } else if self.0.starts_with("personal-") {
            ChannelKind::Personal
        } else if self.0.starts_with("private-") {
            ChannelKind::Private
        } else {
            ChannelKind::Public
        }
    }

    /// For a `personal-<user_id>` channel, the user id portion. `None` for
    /// every other kind.
    pub fn personal_user_id(&self) -> Option<&str> {
        if self.kind() == ChannelKind::Personal {
            self.0.strip_prefix("personal-")
        } else {
            None
        }
    }

    /// Builds the sorted-pair peer channel name for a presence channel and
    /// two member user ids, per `spec.md` §4.2: `peer-X:min(A,B)_max(A,B)`.
    pub fn peer_channel(presence_channel: &ChannelName, a: &str, b: &str) -> ChannelName {
        debug_assert_eq!(presence_channel.kind(), ChannelKind::Presence);
        let base = presence_channel
            .0
            .strip_prefix("presence-")
            .unwrap_or(presence_channel.0.as_str());
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        ChannelName(format!("peer-{base}:{lo}_{hi}"))
    }
}

impl std::fmt::Display for ChannelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_prefix() {
        assert_eq!(ChannelName::new("news").kind(), ChannelKind::Public);
        assert_eq!(
            ChannelName::new("private-room").kind(),
            ChannelKind::Private
        );
        assert_eq!(
            ChannelName::new("presence-chat").kind(),
            ChannelKind::Presence
        );
        assert_eq!(ChannelName::new("peer-game:a_b").kind(), ChannelKind::Peer);
        assert_eq!(
            ChannelName::new("personal-u1").kind(),
            ChannelKind::Personal
        );
    }

    #[test]
    fn peer_channel_naming_is_symmetric() {
        let presence = ChannelName::new("presence-game");
        let ab = ChannelName::peer_channel(&presence, "u1", "u2");
        let ba = ChannelName::peer_channel(&presence, "u2", "u1");
        assert_eq!(ab, ba);
        assert_eq!(ab.as_str(), "peer-game:u1_u2");
    }

    #[test]
    fn rejects_bad_names() {
        assert!(ChannelName::parse("").is_none());
        assert!(ChannelName::parse("has space").is_none());
        assert!(ChannelName::parse("personal-").is_none());
        assert!(ChannelName::parse(&"a".repeat(201)).is_none());
    }

    #[test]
    fn personal_user_id_extraction() {
        let ch = ChannelName::new("personal-u42");
        assert_eq!(ch.personal_user_id(), Some("u42"));
        assert_eq!(ChannelName::new("news").personal_user_id(), None);
    }
}
