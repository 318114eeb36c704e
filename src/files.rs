//! File-name helpers for object keys and uploads.

/// One mebibyte, the unit of the configured upload ceiling.
pub const MIB: u64 = 1024 * 1024;

/// Last path segment of a key (`alice/cat.png` -> `cat.png`).
///
/// Both `/` and `\` count as separators.
pub fn file_name_of(key: &str) -> &str {
    key.rsplit(['/', '\\']).next().unwrap_or(key)
}

/// Extension without the dot (`cat.png` -> `png`), empty when absent.
pub fn suffix_of(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(pos) if pos + 1 < file_name.len() => &file_name[pos + 1..],
        _ => "",
    }
}

/// True when `size` bytes fit under a ceiling of `max_mb` MiB (inclusive).
pub fn within_limit(max_mb: u64, size: u64) -> bool {
    size <= max_mb.saturating_mul(MIB)
}
