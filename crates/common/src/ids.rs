//! Identifier newtypes. Kept distinct so `AppId` and `SocketId` can never
//! be swapped at a call site by the type checker.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Internal tenant identifier. Never sent on the wire to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppId(pub Uuid);

impl AppId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AppId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Public tenant identifier carried in the WebSocket URL and in HTTP auth.
/// Must be exactly 64 lowercase hex characters (`spec.md` §6).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppKey(String);

impl AppKey {
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() == 64 && raw.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        {
            Some(Self(raw.to_string()))
        } else {
            None
        }
    }

    /// Generates a fresh random key (used when creating an `App`).
    pub fn generate() -> Self {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        Self(format!("{}{}", a.simple(), b.simple())[..64].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned UUID v4 minted at WebSocket handshake (`spec.md` §3, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SocketId(pub Uuid);

impl SocketId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SocketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Application-level user identity carried in presence `channel_data` and
/// in personal channel names (`personal-<user_id>`).
pub type UserId = String;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_key_accepts_64_lowercase_hex() {
        let raw = "a".repeat(64);
        assert!(AppKey::parse(&raw).is_some());
    }

    #[test]
    fn app_key_rejects_uppercase_and_wrong_length() {
        assert!(AppKey::parse(&"A".repeat(64)).is_none());
        assert!(AppKey::parse(&"a".repeat(63)).is_none());
        assert!(AppKey::parse(&"a".repeat(65)).is_none());
    }

    #[test]
    fn generated_key_is_valid() {
        let key = AppKey::generate();
        assert!(AppKey::parse(key.as_str()).is_some());
    }
}
