//! Singleton storage configuration row.

use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::StorageConfig;

#[derive(Clone)]
pub struct ConfigRepository {
    db: Arc<SqlitePool>,
}

impl ConfigRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// The stored configuration, if one was ever saved.
    pub async fn find(&self) -> Result<Option<StorageConfig>, sqlx::Error> {
        sqlx::query_as::<_, StorageConfig>(
            "SELECT id, secret_id, secret_key, bucket_name, region, host, visibility
             FROM storage_config LIMIT 1",
        )
        .fetch_optional(&*self.db)
        .await
    }

    /// Insert or replace the single configuration row.
    ///
    /// A config without an id takes over the existing row's id, so there is
    /// never more than one row.
    pub async fn save(&self, config: &StorageConfig) -> Result<StorageConfig, sqlx::Error> {
        let id = match config.id {
            Some(id) => id,
            None => match self.find().await? {
                Some(existing) => existing.id.unwrap_or_else(Uuid::new_v4),
                None => Uuid::new_v4(),
            },
        };

        sqlx::query("DELETE FROM storage_config WHERE id <> ?")
            .bind(id)
            .execute(&*self.db)
            .await?;

        sqlx::query_as::<_, StorageConfig>(
            r#"
            INSERT INTO storage_config (id, secret_id, secret_key, bucket_name, region, host, visibility)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                secret_id = excluded.secret_id,
                secret_key = excluded.secret_key,
                bucket_name = excluded.bucket_name,
                region = excluded.region,
                host = excluded.host,
                visibility = excluded.visibility
            RETURNING id, secret_id, secret_key, bucket_name, region, host, visibility
            "#,
        )
        .bind(id)
        .bind(&config.secret_id)
        .bind(&config.secret_key)
        .bind(&config.bucket_name)
        .bind(&config.region)
        .bind(&config.host)
        .bind(config.visibility)
        .fetch_one(&*self.db)
        .await
    }
}
