//! Webhook adapter (`spec.md` §4.4): HTTP POST of the envelope to a
//! registered URL.

use std::time::Duration;

use async_trait::async_trait;
use pushi_common::{model::SubscriptionRecord, AdapterError, AppId, Envelope};
use tracing::warn;

use crate::{Adapter, SendReport, SubscriptionIndex};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivers envelopes by POSTing them as JSON to each subscribed URL
/// (`spec.md` §4.4 "HTTP POST of the JSON envelope ... with
/// `Content-Type: application/json`").
pub struct WebhookAdapter {
    client: reqwest::Client,
    index: SubscriptionIndex,
}

impl WebhookAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .expect("reqwest client builds with static config"),
            index: SubscriptionIndex::new(),
        }
    }
}

impl Default for WebhookAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for WebhookAdapter {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(
        &self,
        app_id: AppId,
        channels: &[String],
        envelope: &Envelope,
    ) -> Result<SendReport, AdapterError> {
        let targets = self.index.targets_for(app_id, channels);
        let mut report = SendReport::default();

        for url in targets {
            let deadline = DEFAULT_TIMEOUT;
            let result = tokio::time::timeout(
                deadline,
                self.client
                    .post(&url)
                    .header("Content-Type", "application/json")
                    .json(envelope)
                    .send(),
            )
            .await;

            match result {
                Ok(Ok(resp)) if resp.status().is_success() => report.delivered.push(url),
                Ok(Ok(resp)) => {
                    let status = resp.status();
                    warn!(url, %status, "webhook delivery rejected");
                    report.failed.push((url, format!("HTTP {status}")));
                }
                Ok(Err(e)) => {
                    warn!(url, error = %e, "webhook delivery failed");
                    report.failed.push((url, e.to_string()));
                }
                Err(_) => {
                    warn!(url, "webhook delivery timed out");
                    report.failed.push((url, "timed out".to_string()));
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

    #[tokio::test]
    async fn subscribe_then_list_round_trips() {
        let adapter = WebhookAdapter::new();
        let app_id = AppId::new();
        let record = SubscriptionRecord {
            app_id,
            adapter: "webhook".into(),
            event: "orders".into(),
            target: "https://example.com/hook".into(),
            user_id: None,
        };
        adapter.subscribe(record.clone()).await.unwrap();
        let listed = adapter.list(app_id, Some("orders")).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].target, record.target);
    }

    #[tokio::test]
    async fn unsubscribe_removes_record() {
        let adapter = WebhookAdapter::new();
        let app_id = AppId::new();
        let record = SubscriptionRecord {
            app_id,
            adapter: "webhook".into(),
            event: "orders".into(),
            target: "https://example.com/hook".into(),
            user_id: None,
        };
        adapter.subscribe(record.clone()).await.unwrap();
        let removed = adapter.unsubscribe(app_id, &record.target, None).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert!(adapter.list(app_id, None).await.is_empty());
    }
}
