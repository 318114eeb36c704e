//! Object metadata rows, keyed by id; `key` is unique within a bucket.

use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;
use uuid::Uuid;

use super::is_unique_violation;
use crate::models::{ObjectRecord, Page, RecordQuery, Visibility};

const SELECT_RECORD: &str = "SELECT id, key, file_name, file_size, suffix, bucket_name, \
                             visibility, updated_at, request_id, version_id, checksum \
                             FROM object_records";

#[derive(Clone)]
pub struct RecordRepository {
    db: Arc<SqlitePool>,
}

impl RecordRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn find_by_key(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectRecord>, sqlx::Error> {
        let sql = format!("{SELECT_RECORD} WHERE bucket_name = ? AND key = ?");
        sqlx::query_as::<_, ObjectRecord>(&sql)
            .bind(bucket)
            .bind(key)
            .fetch_optional(&*self.db)
            .await
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<ObjectRecord>, sqlx::Error> {
        let sql = format!("{SELECT_RECORD} WHERE id = ?");
        sqlx::query_as::<_, ObjectRecord>(&sql)
            .bind(id)
            .fetch_optional(&*self.db)
            .await
    }

    /// Insert a record unless the bucket already holds one with the same key.
    ///
    /// Returns `false` when the unique index rejected it.
    pub async fn insert_if_absent(&self, record: &ObjectRecord) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO object_records (
                id, key, file_name, file_size, suffix, bucket_name, visibility,
                updated_at, request_id, version_id, checksum
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(&record.key)
        .bind(&record.file_name)
        .bind(record.file_size)
        .bind(&record.suffix)
        .bind(&record.bucket_name)
        .bind(record.visibility)
        .bind(record.updated_at)
        .bind(&record.request_id)
        .bind(&record.version_id)
        .bind(&record.checksum)
        .execute(&*self.db)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() == 1),
            Err(err) if is_unique_violation(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Insert a record, replacing any row with the same bucket and key.
    ///
    /// The existing row keeps its id so links to it stay valid.
    pub async fn upsert(&self, record: &ObjectRecord) -> Result<ObjectRecord, sqlx::Error> {
        sqlx::query_as::<_, ObjectRecord>(
            r#"
            INSERT INTO object_records (
                id, key, file_name, file_size, suffix, bucket_name, visibility,
                updated_at, request_id, version_id, checksum
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_name, key) DO UPDATE SET
                file_name = excluded.file_name,
                file_size = excluded.file_size,
                suffix = excluded.suffix,
                visibility = excluded.visibility,
                updated_at = excluded.updated_at,
                request_id = excluded.request_id,
                version_id = excluded.version_id,
                checksum = excluded.checksum
            RETURNING id, key, file_name, file_size, suffix, bucket_name, visibility,
                      updated_at, request_id, version_id, checksum
            "#,
        )
        .bind(record.id)
        .bind(&record.key)
        .bind(&record.file_name)
        .bind(record.file_size)
        .bind(&record.suffix)
        .bind(&record.bucket_name)
        .bind(record.visibility)
        .bind(record.updated_at)
        .bind(&record.request_id)
        .bind(&record.version_id)
        .bind(&record.checksum)
        .fetch_one(&*self.db)
        .await
    }

    /// Returns `false` when no row had that id.
    pub async fn delete_by_id(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM object_records WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set the visibility of every record; returns the number of rows touched.
    pub async fn update_visibility(&self, visibility: Visibility) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE object_records SET visibility = ?")
            .bind(visibility)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }

    /// Newest-first page of records matching the filter.
    pub async fn query(&self, filter: &RecordQuery) -> Result<Page<ObjectRecord>, sqlx::Error> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM object_records");
        push_filter(&mut count, filter);
        let total_elements: i64 = count.build_query_scalar().fetch_one(&*self.db).await?;

        let mut select = QueryBuilder::<Sqlite>::new(SELECT_RECORD);
        push_filter(&mut select, filter);
        select.push(" ORDER BY updated_at DESC, key ASC LIMIT ");
        select.push_bind(i64::from(filter.limit()));
        select.push(" OFFSET ");
        select.push_bind(filter.offset() as i64);

        let content = select.build_query_as().fetch_all(&*self.db).await?;
        Ok(Page {
            content,
            total_elements,
        })
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &RecordQuery) {
    builder.push(" WHERE 1 = 1");
    if let Some(name) = filter.file_name.as_deref().filter(|n| !n.is_empty()) {
        builder.push(" AND file_name LIKE ");
        builder.push_bind(format!("%{}%", escape_like(name)));
        builder.push(" ESCAPE '\\'");
    }
    if let Some(from) = filter.updated_from {
        builder.push(" AND updated_at >= ");
        builder.push_bind(from.and_utc());
    }
    if let Some(to) = filter.updated_to {
        builder.push(" AND updated_at <= ");
        builder.push_bind(to.and_utc());
    }
}

/// Make `%`, `_` and `\` match literally under `ESCAPE '\'`.
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
