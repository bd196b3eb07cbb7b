//! Web Push adapter (`spec.md` §4.4, RFC 8030 + VAPID): per-App VAPID
//! private key + contact email; payload encrypted to the subscription's
//! `{p256dh, auth}` via the `web-push` crate. A 404/410 response deletes
//! the subscription record.
//!
//! The ECIES/aes-gcm payload encryption math itself is delegated entirely
//! to `web-push` (`spec.md` §1 treats concrete adapter crypto as out of
//! scope) — what's implemented here is subscription indexing, dedup, VAPID
//! signature construction per App, and the 404/410 cleanup rule.

use std::sync::Arc;

use async_trait::async_trait;
use pushi_common::{model::SubscriptionRecord, AdapterError, AppId, Envelope};
use serde::{Deserialize, Serialize};
use tracing::warn;
use web_push::{
    ContentEncoding, HyperWebPushClient, SubscriptionInfo, VapidSignatureBuilder, WebPushClient,
    WebPushError, WebPushMessageBuilder,
};

use crate::{Adapter, AppDirectory, SendReport, SubscriptionIndex};

/// A target is the JSON-serialized form of the browser's push subscription
/// (`spec.md` §3 "target is adapter-specific ... Web-Push subscription").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebPushTarget {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
}

pub struct WebPushAdapter {
    client: HyperWebPushClient,
    index: SubscriptionIndex,
    directory: Arc<dyn AppDirectory>,
}

impl WebPushAdapter {
    pub fn new(directory: Arc<dyn AppDirectory>) -> Self {
        Self {
            client: HyperWebPushClient::new(),
            index: SubscriptionIndex::new(),
            directory,
        }
    }

    /// The VAPID public key derived from an App's private key, for the
    /// `/apps/vapid_key` endpoint (`spec.md` §4.6, §7 "OperationalError").
    pub async fn public_key(&self, app_id: AppId) -> Result<String, AdapterError> {
        let app = self
            .directory
            .get(app_id)
            .await
            .ok_or_else(|| AdapterError::MissingCredentials("unknown app".into()))?;
        let vapid = app
            .vapid
            .ok_or_else(|| AdapterError::MissingCredentials("no VAPID key configured".into()))?;
        let signature = VapidSignatureBuilder::from_base64_no_sub(&vapid.private_key, |_| {})
            .map_err(|e| AdapterError::MissingCredentials(e.to_string()))?;
        Ok(signature.get_public_key().map(|k| base64_url(&k)).unwrap_or_default())
    }
}

fn base64_url(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    URL_SAFE_NO_PAD.encode(bytes)
}

#[async_trait]
impl Adapter for WebPushAdapter {
    fn name(&self) -> &'static str {
        "web_push"
    }

    async fn send(
        &self,
        app_id: AppId,
        channels: &[String],
        envelope: &Envelope,
    ) -> Result<SendReport, AdapterError> {
        let targets = self.index.targets_for(app_id, channels);
        if targets.is_empty() {
            return Ok(SendReport::default());
        }

        let app = self
            .directory
            .get(app_id)
            .await
            .ok_or_else(|| AdapterError::MissingCredentials("unknown app".into()))?;
        let vapid = app
            .vapid
            .ok_or_else(|| AdapterError::MissingCredentials("no VAPID key configured".into()))?;

        let mut report = SendReport::default();
        for raw_target in targets {
            let target: WebPushTarget = match serde_json::from_str(&raw_target) {
                Ok(t) => t,
                Err(_) => {
                    report.failed.push((raw_target, "malformed subscription".to_string()));
                    continue;
                }
            };

            let subscription = SubscriptionInfo::new(&target.endpoint, &target.p256dh, &target.auth);
            let mut signature_builder =
                match VapidSignatureBuilder::from_base64(&vapid.private_key, &subscription) {
                    Ok(b) => b,
                    Err(e) => {
                        report.failed.push((raw_target, e.to_string()));
                        continue;
                    }
                };
            signature_builder.add_claim("sub", format!("mailto:{}", vapid.contact_email));
            let signature = match signature_builder.build() {
                Ok(sig) => sig,
                Err(e) => {
                    report.failed.push((raw_target, e.to_string()));
                    continue;
                }
            };

            let mut builder = WebPushMessageBuilder::new(&subscription);
            builder.set_payload(ContentEncoding::Aes128Gcm, envelope.data.as_bytes());
            builder.set_vapid_signature(signature);

            let message = match builder.build() {
                Ok(m) => m,
                Err(e) => {
                    report.failed.push((raw_target.clone(), e.to_string()));
                    continue;
                }
            };

            match self.client.send(message).await {
                Ok(_) => report.delivered.push(raw_target),
                Err(WebPushError::EndpointNotValid) | Err(WebPushError::EndpointNotFound) => {
                    warn!(target = raw_target, "web push subscription gone, dropping");
                    self.index.remove(app_id, &raw_target, None);
                    report.failed.push((raw_target, "subscription gone".to_string()));
                }
                Err(e) => {
                    warn!(target = raw_target, error = %e, "web push delivery failed");
                    report.failed.push((raw_target, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    async fn subscribe(&self, record: SubscriptionRecord) -> Result<SubscriptionRecord, AdapterError> {
        self.index.insert(record.app_id, record.event.clone(), record.target.clone());
        Ok(record)
    }

    async fn unsubscribe(
        &self,
        app_id: AppId,
        target: &str,
        event: Option<&str>,
    ) -> Result<Vec<SubscriptionRecord>, AdapterError> {
        Ok(self.index.remove(app_id, target, event))
    }

    async fn list(&self, app_id: AppId, event: Option<&str>) -> Vec<SubscriptionRecord> {
        self.index.list(app_id, event, self.name())
    }

    fn load(&self, records: &[SubscriptionRecord]) {
        self.index.load(records);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushi_common::model::App;

    struct StaticDirectory(Option<App>);

    #[async_trait]
    impl AppDirectory for StaticDirectory {
        async fn get(&self, _app_id: AppId) -> Option<App> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn send_with_no_subscribers_is_a_noop() {
        let adapter = WebPushAdapter::new(Arc::new(StaticDirectory(None)));
        let envelope = Envelope {
            channel: "orders".into(),
            event: "hello".into(),
            data: "{}".into(),
            overrides: None,
        };
        let report = adapter
            .send(AppId::new(), &["orders".to_string()], &envelope)
            .await
            .unwrap();
        assert!(report.delivered.is_empty());
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn send_without_vapid_credentials_errors() {
        let adapter = WebPushAdapter::new(Arc::new(StaticDirectory(None)));
        let app_id = AppId::new();
        adapter
            .subscribe(SubscriptionRecord {
                app_id,
                adapter: "web_push".into(),
                event: "orders".into(),
                target: serde_json::to_string(&WebPushTarget {
                    endpoint: "https://push.example/abc".into(),
                    p256dh: "key".into(),
                    auth: "auth".into(),
                })
                .unwrap(),
                user_id: None,
            })
            .await
            .unwrap();

        let envelope = Envelope {
            channel: "orders".into(),
            event: "hello".into(),
            data: "{}".into(),
            overrides: None,
        };
        let err = adapter.send(app_id, &["orders".to_string()], &envelope).await;
        assert!(err.is_err());
    }
}
