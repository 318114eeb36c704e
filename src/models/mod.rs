//! Core data models for the COS administration service.
//!
//! These entities mirror the two persisted tables (`storage_config` and
//! `object_records`). They map to rows via `sqlx::FromRow` and serialize
//! as camelCase JSON for the admin API.

pub mod object_record;
pub mod page;
pub mod storage_config;

pub use object_record::ObjectRecord;
pub use page::{Page, RecordQuery};
pub use storage_config::{StorageConfig, Visibility};
