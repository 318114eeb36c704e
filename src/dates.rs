//! Date formatting helpers shared by the API and the signing code.
//!
//! All timestamps are handled in UTC. Formats:
//! - RFC 822: `Tue, 07 May 2024 08:00:00 GMT` (HTTP `Expires` header)
//! - `yyyy-MM-dd HH:mm:ss` and `yyyy-MM-dd` (admin API filters)

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, Utc};
use thiserror::Error;

pub const RFC822_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";
pub const YMD_HMS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const YMD_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
#[error("invalid date `{input}`: {source}")]
pub struct DateError {
    input: String,
    #[source]
    source: chrono::ParseError,
}

impl DateError {
    fn new(input: &str, source: chrono::ParseError) -> Self {
        Self {
            input: input.to_string(),
            source,
        }
    }
}

pub fn format_rfc822(at: DateTime<Utc>) -> String {
    at.format(RFC822_FORMAT).to_string()
}

pub fn parse_rfc822(input: &str) -> Result<DateTime<Utc>, DateError> {
    NaiveDateTime::parse_from_str(input.trim(), RFC822_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|err| DateError::new(input, err))
}

pub fn parse_ymd_hms(input: &str) -> Result<NaiveDateTime, DateError> {
    NaiveDateTime::parse_from_str(input.trim(), YMD_HMS_FORMAT)
        .map_err(|err| DateError::new(input, err))
}

pub fn parse_ymd(input: &str) -> Result<NaiveDate, DateError> {
    NaiveDate::parse_from_str(input.trim(), YMD_FORMAT).map_err(|err| DateError::new(input, err))
}

/// Parse either `yyyy-MM-dd HH:mm:ss` or a bare `yyyy-MM-dd` (midnight).
pub fn parse_date_or_datetime(input: &str) -> Result<NaiveDateTime, DateError> {
    match parse_ymd_hms(input) {
        Ok(at) => Ok(at),
        Err(full_err) => parse_ymd(input)
            .ok()
            .and_then(|day| day.and_hms_opt(0, 0, 0))
            .ok_or(full_err),
    }
}

/// Drop sub-second precision so stored timestamps compare predictably.
pub fn truncate_to_seconds(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(0)
}

/// Serde `deserialize_with` for optional `yyyy-MM-dd HH:mm:ss` (or bare date) fields.
///
/// Missing, null and blank values all become `None`.
pub fn deserialize_ymd_hms_opt<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => parse_date_or_datetime(text)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rfc822_uses_gmt_and_english_names() {
        let at = Utc.with_ymd_and_hms(2024, 5, 7, 8, 0, 9).unwrap();
        assert_eq!(format_rfc822(at), "Tue, 07 May 2024 08:00:09 GMT");
        assert_eq!(parse_rfc822("Tue, 07 May 2024 08:00:09 GMT").unwrap(), at);
    }

    #[test]
    fn rfc822_rejects_other_layouts() {
        assert!(parse_rfc822("2024-05-07T08:00:09Z").is_err());
    }

    #[test]
    fn ymd_hms_and_bare_dates() {
        let day = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        let at = parse_date_or_datetime("2023-12-31 23:59:58").unwrap();
        assert_eq!(at, day.and_hms_opt(23, 59, 58).unwrap());

        let midnight = parse_date_or_datetime("2023-12-31").unwrap();
        assert_eq!(midnight, day.and_hms_opt(0, 0, 0).unwrap());

        let err = parse_date_or_datetime("31/12/2023").unwrap_err();
        assert!(err.to_string().contains("31/12/2023"));
    }

    #[test]
    fn truncation_drops_fraction() {
        let at = Utc.timestamp_opt(1_700_000_000, 987_654_321).unwrap();
        let truncated = truncate_to_seconds(at);
        assert_eq!(truncated.timestamp(), 1_700_000_000);
        assert_eq!(truncated.timestamp_subsec_nanos(), 0);
    }
}
