//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Logs are safe to share for debugging; these functions keep resume token
//! values and local directory layouts out of them.

use std::path::Path;

/// Characters of a token kept in logs.
const TOKEN_PREFIX_LEN: usize = 6;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Shows a short prefix of a resume token so log lines can be correlated
/// without making the token usable.
///
/// - `Zk3v9Qx0...` (43 chars) → `Zk3v9Q…`
/// - anything of prefix length or shorter → `****`
pub fn redact_token(token: &str) -> String {
    match token.char_indices().nth(TOKEN_PREFIX_LEN) {
        Some((end, _)) => format!("{}…", &token[..end]),
        None => "****".to_string(),
    }
}
