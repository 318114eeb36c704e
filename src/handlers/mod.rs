pub mod cos_handlers;
pub mod health_handlers;
pub mod object_handlers;

/// Header carrying the acting user's name; it prefixes upload keys.
pub const USER_HEADER: &str = "x-user-name";
