//! HMAC-SHA256 signing and verification (`spec.md` §4.5).
//!
//! Two independent uses:
//! - Private/presence/peer/personal channel admission: the client presents
//!   `app_key:hex(hmac)` and the server recomputes it from the socket id and
//!   channel name.
//! - HTTP publish auth: machine publishers present `(app_id, app_key,
//!   app_secret)` and must match the `App` record exactly.

use hmac::{Hmac, Mac};
use pushi_common::{AppKey, SocketId};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Computes the hex-encoded `HMAC-SHA256(secret, socket_id + ":" + channel)`
/// digest (`spec.md` §4.5).
pub fn sign_channel(secret: &str, socket_id: SocketId, channel: &str) -> String {
    let message = format!("{socket_id}:{channel}");
    digest_hex(secret, message.as_bytes())
}

/// Builds the full auth token `app_key:digest` a client must present.
pub fn auth_token(secret: &str, app_key: &AppKey, socket_id: SocketId, channel: &str) -> String {
    let digest = sign_channel(secret, socket_id, channel);
    format!("{app_key}:{digest}")
}

/// Verifies a client-presented auth token against the expected value,
/// in constant time (timing-safe comparison; `spec.md` §4.5 just says "on
/// mismatch, fail", constant time is the idiomatic way to implement that).
pub fn verify_channel_auth(
    secret: &str,
    app_key: &AppKey,
    socket_id: SocketId,
    channel: &str,
    presented: &str,
) -> bool {
    let expected = auth_token(secret, app_key, socket_id, channel);
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

fn digest_hex(secret: &str, message: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a machine publisher's presented credentials against the `App`
/// record, in constant time (`spec.md` §4.5 "exact match").
pub fn verify_publisher_secret(app_secret: &str, presented_secret: &str) -> bool {
    app_secret
        .as_bytes()
        .ct_eq(presented_secret.as_bytes())
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn round_trip_succeeds() {
        let secret = "s3cr3t";
        let key = AppKey::generate();
        let socket_id = SocketId(Uuid::new_v4());
        let token = auth_token(secret, &key, socket_id, "private-room");
        assert!(verify_channel_auth(
            secret,
            &key,
            socket_id,
            "private-room",
            &token
        ));
    }

    #[test]
    fn bit_flip_fails() {
        let secret = "s3cr3t";
        let key = AppKey::generate();
        let socket_id = SocketId(Uuid::new_v4());
        let mut token = auth_token(secret, &key, socket_id, "private-room");
        token.push('f');
        assert!(!verify_channel_auth(
            secret,
            &key,
            socket_id,
            "private-room",
            &token
        ));
    }

    #[test]
    fn wrong_channel_fails() {
        let secret = "s3cr3t";
        let key = AppKey::generate();
        let socket_id = SocketId(Uuid::new_v4());
        let token = auth_token(secret, &key, socket_id, "private-room");
        assert!(!verify_channel_auth(
            secret,
            &key,
            socket_id,
            "private-other",
            &token
        ));
    }

    #[test]
    fn matches_scenario_3_signature() {
        // spec.md scenario 3: valid token = app_key + ":" + hex(HMAC-SHA256(s, "S:private-room"))
        let secret = "s";
        let key = AppKey::parse(&"0".repeat(64)).unwrap();
        let socket_id_str = "00000000-0000-4000-8000-000000000000";
        let socket_id = SocketId(Uuid::parse_str(socket_id_str).unwrap());
        let expected_digest = digest_hex(secret, format!("{socket_id_str}:private-room").as_bytes());
        let token = auth_token(secret, &key, socket_id, "private-room");
        assert_eq!(token, format!("{key}:{expected_digest}"));
    }
}
