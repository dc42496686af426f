pub mod checkpoints;
pub mod process;
pub mod resume;

use serde::Serialize;

/// Prints one JSON object per line on stdout.
pub(crate) fn emit<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{}", json),
        Err(e) => tracing::error!(error = %e, "Failed to serialize output"),
    }
}
