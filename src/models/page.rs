//! Paging envelope and filter for record queries.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::dates;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 500;

/// One page of results plus the total row count for the filter.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub total_elements: i64,
}

/// Filter accepted by the record listing endpoint.
///
/// `page` is zero-based. Time bounds use `yyyy-MM-dd HH:mm:ss` in UTC.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RecordQuery {
    pub file_name: Option<String>,
    #[serde(default, deserialize_with = "dates::deserialize_ymd_hms_opt")]
    pub updated_from: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "dates::deserialize_ymd_hms_opt")]
    pub updated_to: Option<NaiveDateTime>,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

impl RecordQuery {
    pub fn limit(&self) -> u32 {
        self.size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.unwrap_or(0)) * u64::from(self.limit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_defaults_and_clamps() {
        let q = RecordQuery::default();
        assert_eq!(q.limit(), DEFAULT_PAGE_SIZE);
        assert_eq!(q.offset(), 0);

        let q = RecordQuery {
            page: Some(3),
            size: Some(10_000),
            ..RecordQuery::default()
        };
        assert_eq!(q.limit(), MAX_PAGE_SIZE);
        assert_eq!(q.offset(), 3 * u64::from(MAX_PAGE_SIZE));
    }

    #[test]
    fn time_bounds_parse_from_query_json() {
        let q: RecordQuery = serde_json::from_value(serde_json::json!({
            "fileName": "cat",
            "updatedFrom": "2024-05-01 00:00:00",
        }))
        .unwrap();
        assert_eq!(q.file_name.as_deref(), Some("cat"));
        assert_eq!(
            q.updated_from.map(|t| t.to_string()).as_deref(),
            Some("2024-05-01 00:00:00")
        );
        assert!(q.updated_to.is_none());
    }
}
