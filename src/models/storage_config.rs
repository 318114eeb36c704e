//! Bucket credentials and access settings.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Whether objects in the bucket are publicly readable.
#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

/// Connection settings for the remote bucket.
///
/// Only one row is ever kept. An instance with `id == None` has never been
/// persisted; every remote operation refuses to run against it.
#[derive(Serialize, Deserialize, Clone, FromRow, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Generated on first save.
    #[serde(default)]
    pub id: Option<Uuid>,

    /// Access key id issued by the provider.
    pub secret_id: String,

    /// Access key secret. Redacted from `Debug` output.
    pub secret_key: String,

    /// Bucket name, including the provider's app-id suffix.
    pub bucket_name: String,

    /// Provider region (e.g. `ap-guangzhou`).
    pub region: String,

    /// Public URL prefix objects are served from. Must carry an http(s) scheme.
    pub host: String,

    #[serde(default, rename = "type")]
    pub visibility: Visibility,
}

impl StorageConfig {
    /// True once the config has been saved at least once.
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Check that `host` begins with `http://` or `https://`.
    pub fn has_valid_host(&self) -> bool {
        let host = self.host.to_ascii_lowercase();
        host.starts_with("http://") || host.starts_with("https://")
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("id", &self.id)
            .field("secret_id", &self.secret_id)
            .field("secret_key", &"<redacted>")
            .field("bucket_name", &self.bucket_name)
            .field("region", &self.region)
            .field("host", &self.host)
            .field("visibility", &self.visibility)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_host(host: &str) -> StorageConfig {
        StorageConfig {
            host: host.into(),
            ..StorageConfig::default()
        }
    }

    #[test]
    fn host_scheme_is_checked_case_insensitively() {
        assert!(with_host("https://x").has_valid_host());
        assert!(with_host("HTTP://cdn.example.com").has_valid_host());
        assert!(!with_host("ftp://x").has_valid_host());
        assert!(!with_host("cdn.example.com").has_valid_host());
    }

    #[test]
    fn debug_output_hides_secret_key() {
        let cfg = StorageConfig {
            secret_key: "top-secret".into(),
            ..StorageConfig::default()
        };
        let rendered = format!("{:?}", cfg);
        assert!(!rendered.contains("top-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn visibility_serializes_as_type_field() {
        let cfg = StorageConfig {
            visibility: Visibility::Private,
            ..StorageConfig::default()
        };
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["type"], "private");
        assert!(json["id"].is_null());
    }
}
