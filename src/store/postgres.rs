use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool};

use super::{CachedAuthorization, TokenStore};
use crate::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS servicetoken (
    uuid            TEXT PRIMARY KEY,
    service_name    TEXT NOT NULL,
    service_token   TEXT NOT NULL,
    service_expires TIMESTAMPTZ NOT NULL,
    refresh_token   TEXT NOT NULL,
    refresh_expires TIMESTAMPTZ NOT NULL,
    CHECK (refresh_expires >= service_expires)
);
CREATE INDEX IF NOT EXISTS idx_servicetoken_service_name_refresh_expires
    ON servicetoken (service_name, refresh_expires);
"#;

/// A [`TokenStore`] backed by a Postgres `servicetoken` table.
#[derive(Clone)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `servicetoken` table and its lookup index, if they do not exist.
    pub async fn migrate(&self) -> Result<()> {
        (&self.pool).execute(SCHEMA).await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn select_refreshable(
        &self,
        service_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CachedAuthorization>> {
        let records = sqlx::query_as::<_, CachedAuthorization>(
            r#"
            SELECT uuid, service_name, service_token, service_expires,
                   refresh_token, refresh_expires
            FROM servicetoken
            WHERE refresh_expires > $1 AND service_name = $2
            "#,
        )
        .bind(now)
        .bind(service_name)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn insert(&self, record: &CachedAuthorization) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO servicetoken (
                uuid, service_name, service_token, service_expires,
                refresh_token, refresh_expires
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&record.jti)
        .bind(&record.service_name)
        .bind(&record.service_token)
        .bind(record.token_expires)
        .bind(&record.refresh_token)
        .bind(record.refresh_expires)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, jti: &str) -> Result<()> {
        sqlx::query("DELETE FROM servicetoken WHERE uuid = $1")
            .bind(jti)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
