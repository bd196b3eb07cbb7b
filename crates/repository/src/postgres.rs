//! Postgres-backed `Repository`, against the table shapes `spec.md` §6
//! names (`app`, `subs_personal`, `subs_<adapter>`, `event`, `assoc`).
//!
//! Schema creation/migration is an external concern (`spec.md` §1 "Out of
//! scope"); this assumes the tables already exist.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pushi_common::model::{App, ApnCredentials, MessageRecord, SubscriptionRecord, VapidCredentials};
use pushi_common::{AppId, AppKey, RepositoryError};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::Repository;

pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub async fn connect(database_url: &str) -> crate::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(Self { pool })
    }

    fn row_to_app(row: &sqlx::postgres::PgRow) -> Result<App, sqlx::Error> {
        let apn = match (
            row.try_get::<Option<String>, _>("apn_key")?,
            row.try_get::<Option<String>, _>("apn_cer")?,
        ) {
            (Some(key_data), Some(cer_data)) => Some(ApnCredentials {
                key_data,
                cer_data,
                sandbox: row.try_get::<Option<bool>, _>("apn_sandbox")?.unwrap_or(false),
            }),
            _ => None,
        };
        let vapid = match (
            row.try_get::<Option<String>, _>("vapid_key")?,
            row.try_get::<Option<String>, _>("vapid_email")?,
        ) {
            (Some(private_key), Some(contact_email)) => Some(VapidCredentials {
                private_key,
                contact_email,
            }),
            _ => None,
        };
        Ok(App {
            id: AppId(row.try_get("id")?),
            key: AppKey::parse(row.try_get::<String, _>("key")?.as_str())
                .unwrap_or_else(|| AppKey::generate()),
            secret: row.try_get("secret")?,
            name: row.try_get("name")?,
            apn,
            vapid,
            smtp_url: row.try_get("smtp_url")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        })
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn load_apps(&self) -> crate::Result<Vec<App>> {
        self.list_apps().await
    }

    async fn get_app(&self, id: AppId) -> crate::Result<Option<App>> {
        let row = sqlx::query("SELECT * FROM app WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        row.as_ref()
            .map(Self::row_to_app)
            .transpose()
            .map_err(|e| RepositoryError::Storage(e.to_string()))
    }

    async fn get_app_by_key(&self, key: &AppKey) -> crate::Result<Option<App>> {
        let row = sqlx::query("SELECT * FROM app WHERE key = $1")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        row.as_ref()
            .map(Self::row_to_app)
            .transpose()
            .map_err(|e| RepositoryError::Storage(e.to_string()))
    }

    async fn create_app(&self, app: App) -> crate::Result<()> {
        sqlx::query(
            "INSERT INTO app (id, key, secret, name, smtp_url, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(app.id.0)
        .bind(app.key.as_str())
        .bind(&app.secret)
        .bind(&app.name)
        .bind(&app.smtp_url)
        .bind(app.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn update_app(&self, app: App) -> crate::Result<()> {
        let result = sqlx::query("UPDATE app SET name = $2, smtp_url = $3 WHERE id = $1")
            .bind(app.id.0)
            .bind(&app.name)
            .bind(&app.smtp_url)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(app.id.to_string()));
        }
        Ok(())
    }

    async fn list_apps(&self) -> crate::Result<Vec<App>> {
        let rows = sqlx::query("SELECT * FROM app")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        rows.iter()
            .map(Self::row_to_app)
            .collect::<Result<_, _>>()
            .map_err(|e| RepositoryError::Storage(e.to_string()))
    }

    async fn append_event(&self, record: MessageRecord) -> crate::Result<()> {
        sqlx::query(
            "INSERT INTO event (mid, app_id, channel, owner_id, timestamp, data) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(record.mid)
        .bind(record.app_id.0)
        .bind(&record.channel)
        .bind(&record.owner_id)
        .bind(record.timestamp)
        .bind(&record.data)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn append_assoc(&self, app_id: AppId, mid: uuid::Uuid, user_id: &str) -> crate::Result<()> {
        sqlx::query("INSERT INTO assoc (app_id, mid, user_id) VALUES ($1, $2, $3)")
            .bind(app_id.0)
            .bind(mid)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn add_subscription(&self, record: SubscriptionRecord) -> crate::Result<()> {
        let table = subs_table(&record.adapter)?;
        let query = format!(
            "INSERT INTO {table} (app_id, target, event, user_id) VALUES ($1, $2, $3, $4)"
        );
        sqlx::query(&query)
            .bind(record.app_id.0)
            .bind(&record.target)
            .bind(&record.event)
            .bind(&record.user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn remove_subscription(
        &self,
        app_id: AppId,
        adapter: &str,
        target: &str,
        event: Option<&str>,
    ) -> crate::Result<()> {
        let table = subs_table(adapter)?;
        let query = match event {
            Some(_) => format!(
                "DELETE FROM {table} WHERE app_id = $1 AND target = $2 AND event = $3"
            ),
            None => format!("DELETE FROM {table} WHERE app_id = $1 AND target = $2"),
        };
        let mut q = sqlx::query(&query).bind(app_id.0).bind(target);
        if let Some(event) = event {
            q = q.bind(event);
        }
        q.execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn list_subscriptions(
        &self,
        app_id: AppId,
        adapter: &str,
    ) -> crate::Result<Vec<SubscriptionRecord>> {
        let table = subs_table(adapter)?;
        let query = format!("SELECT target, event, user_id FROM {table} WHERE app_id = $1");
        let rows = sqlx::query(&query)
            .bind(app_id.0)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        rows.into_iter()
            .map(|row| {
                Ok(SubscriptionRecord {
                    app_id,
                    adapter: adapter.to_string(),
                    target: row.try_get("target").map_err(|e| RepositoryError::Storage(e.to_string()))?,
                    event: row.try_get("event").map_err(|e| RepositoryError::Storage(e.to_string()))?,
                    user_id: row
                        .try_get("user_id")
                        .map_err(|e| RepositoryError::Storage(e.to_string()))?,
                })
            })
            .collect()
    }

    async fn list_personal_subscriptions(&self, app_id: AppId) -> crate::Result<Vec<SubscriptionRecord>> {
        self.list_subscriptions(app_id, "personal").await
    }
}

/// Maps an adapter name to its `subs_<adapter>` table, per `spec.md` §6.
/// Restricted to a fixed allowlist so the name can be safely interpolated
/// into SQL — `adapter` ultimately comes from request data, so this must
/// never accept an arbitrary string.
fn subs_table(adapter: &str) -> crate::Result<&'static str> {
    match adapter {
        "personal" => Ok("subs_personal"),
        "apn" => Ok("subs_apn"),
        "webhook" => Ok("subs_webhook"),
        "email" => Ok("subs_email"),
        "web_push" => Ok("subs_web_push"),
        other => Err(RepositoryError::Storage(format!("unknown adapter: {other}"))),
    }
}
