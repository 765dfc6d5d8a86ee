//! UTF-8 boundary-safe truncation for log fields.
//!
//! Statement text and argument lists can be arbitrarily large; these helpers
//! cap them to a byte budget before they reach a log line while keeping the
//! result valid UTF-8.

use std::borrow::Cow;
use std::fmt::Debug;

/// Byte budget used when the caller passes `None`.
pub const DEFAULT_TRUNCATE_LIMIT: usize = 1024;

/// Marker appended to truncated output.
pub const TRUNCATED_SUFFIX: &str = "...";

/// Truncate a `&str` to a byte budget at a character boundary (prefix).
///
/// # Examples
///
/// ```
/// use dm_utils_string::take_bytes_at_char_boundary;
///
/// assert_eq!(take_bytes_at_char_boundary("hello world", 5), "hello");
/// assert_eq!(take_bytes_at_char_boundary("héllo", 2), "h"); // é is 2 bytes
/// assert_eq!(take_bytes_at_char_boundary("😀abc", 3), "");
/// ```
#[inline]
pub fn take_bytes_at_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Cap `s` at `limit` bytes (default [`DEFAULT_TRUNCATE_LIMIT`]), appending
/// [`TRUNCATED_SUFFIX`] when anything was cut.
///
/// ```
/// use dm_utils_string::truncate_string;
///
/// assert_eq!(truncate_string("SELECT 1", None), "SELECT 1");
/// assert_eq!(truncate_string("INSERT INTO t VALUES (1)", Some(6)), "INSERT...");
/// ```
pub fn truncate_string(s: &str, limit: Option<usize>) -> Cow<'_, str> {
    let limit = limit.unwrap_or(DEFAULT_TRUNCATE_LIMIT);
    if s.len() <= limit {
        return Cow::Borrowed(s);
    }
    let head = take_bytes_at_char_boundary(s, limit);
    Cow::Owned(format!("{head}{TRUNCATED_SUFFIX}"))
}

/// Render `value` with its `Debug` impl and truncate the result.
///
/// Used for argument lists, which are logged as a single field.
pub fn truncate_debug<T: Debug + ?Sized>(value: &T, limit: Option<usize>) -> String {
    let rendered = format!("{value:?}");
    match truncate_string(&rendered, limit) {
        Cow::Borrowed(_) => rendered,
        Cow::Owned(truncated) => truncated,
    }
}
