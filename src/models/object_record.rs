//! Represents one object known to live in the remote bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::Visibility;

/// Local metadata for a remote object.
///
/// `(bucket_name, key)` is unique and is the only link between this row and
/// the object in the bucket. Rows are inserted on upload or reconciliation
/// and removed together with the remote object.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRecord {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Full object key within the bucket (typically `<owner>/<file name>`).
    pub key: String,

    /// Display name, the last path segment of the key.
    pub file_name: String,

    /// Size in bytes.
    pub file_size: i64,

    /// File extension without the leading dot; empty when there is none.
    pub suffix: String,

    /// Bucket the object was found in.
    pub bucket_name: String,

    #[serde(rename = "type")]
    pub visibility: Visibility,

    /// Last-modified time reported by the provider.
    pub updated_at: DateTime<Utc>,

    pub request_id: Option<String>,
    pub version_id: Option<String>,

    /// Provider checksum (CRC64 or ETag, depending on backend).
    pub checksum: Option<String>,
}
