//! HTTP publish auth (`spec.md` §4.5): machine publishers present
//! `(app_id, app_key, app_secret)` and must match the `App` record exactly.
//! `app_id` is the path segment every mutating route already carries; the
//! key/secret pair travels as headers so JSON bodies stay exactly the
//! `{event, channel, data}` shape `spec.md` §4.6 names.

use axum::http::HeaderMap;
use pushi_broker::Broker;
use pushi_common::{model::App, AppId, BrokerError, Result};

use crate::types::PublisherCredentials;

const KEY_HEADER: &str = "x-pushi-key";
const SECRET_HEADER: &str = "x-pushi-secret";

pub fn credentials_from_headers(headers: &HeaderMap) -> Option<PublisherCredentials> {
    let app_key = headers.get(KEY_HEADER)?.to_str().ok()?.to_string();
    let app_secret = headers.get(SECRET_HEADER)?.to_str().ok()?.to_string();
    Some(PublisherCredentials { app_key, app_secret })
}

/// Authorizes a machine publisher for `app_id`: the presented `app_key`
/// must resolve to `app_id` and the presented `app_secret` must match the
/// record exactly, constant-time (`spec.md` §4.5).
///
/// "Every mutation that names an `app_id` must equal the session's bound
/// `app_id`" — realized here as "the presented key's own app_id must equal
/// the path's app_id", since this control plane has no admin session of
/// its own (`spec.md` §9 admits "session-based admin login" and
/// machine-publisher auth as alternatives; this crate implements the
/// machine-publisher path, which is sufficient for the core event-routing
/// engine this spec covers).
pub fn authorize_publish(broker: &Broker, app_id: AppId, headers: &HeaderMap) -> Result<App> {
    let creds = credentials_from_headers(headers)
        .ok_or_else(|| BrokerError::Auth("missing publisher credentials".into()))?;
    let app = broker
        .app_by_id(app_id)
        .ok_or_else(|| BrokerError::NotFound("unknown app".into()))?;
    if app.key.as_str() != creds.app_key {
        return Err(BrokerError::Auth("app_key does not match app_id".into()));
    }
    if !pushi_auth::verify_publisher_secret(&app.secret, &creds.app_secret) {
        return Err(BrokerError::Auth("invalid app_secret".into()));
    }
    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use pushi_adapters::{EmailAdapter, WebPushAdapter};
    use pushi_broker::AppCache;
    use pushi_common::{AppKey, PushiConfig};
    use pushi_repository::memory::InMemoryRepository;
    use std::sync::Arc;

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

    async fn broker_with(app: &App) -> Broker {
        let repo = InMemoryRepository::new();
        repo.seed_app(app.clone());
        let cache = AppCache::new();
        let directory: Arc<dyn pushi_adapters::AppDirectory> = cache.clone();
        let broker = Broker::new(
            PushiConfig::default(),
            Arc::new(repo),
            vec![
                Arc::new(EmailAdapter::new(directory.clone(), None)),
                Arc::new(WebPushAdapter::new(directory)),
            ],
            cache,
        );
        broker.start().await.unwrap();
        broker
    }

    #[tokio::test]
    async fn correct_credentials_authorize() {
        let app = sample_app();
        let broker = broker_with(&app).await;
        let mut headers = HeaderMap::new();
        headers.insert(KEY_HEADER, HeaderValue::from_str(app.key.as_str()).unwrap());
        headers.insert(SECRET_HEADER, HeaderValue::from_str(&app.secret).unwrap());
        let resolved = authorize_publish(&broker, app.id, &headers).unwrap();
        assert_eq!(resolved.id, app.id);
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected() {
        let app = sample_app();
        let broker = broker_with(&app).await;
        let mut headers = HeaderMap::new();
        headers.insert(KEY_HEADER, HeaderValue::from_str(app.key.as_str()).unwrap());
        headers.insert(SECRET_HEADER, HeaderValue::from_static("wrong"));
        let err = authorize_publish(&broker, app.id, &headers).unwrap_err();
        assert!(matches!(err, BrokerError::Auth(_)));
    }

    #[tokio::test]
    async fn missing_headers_are_rejected() {
        let app = sample_app();
        let broker = broker_with(&app).await;
        let err = authorize_publish(&broker, app.id, &HeaderMap::new()).unwrap_err();
        assert!(matches!(err, BrokerError::Auth(_)));
    }
}
