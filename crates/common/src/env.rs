//! Environment helpers
//!
//! Small readers shared by the binaries and the perf driver so that empty
//! variables behave like unset ones.

use std::str::FromStr;

use tracing::warn;

/// Read a variable, treating empty or whitespace-only values as unset.
pub fn var_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a variable into `T`; unparsable values are logged and ignored.
pub fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    let raw = var_non_empty(name)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(%name, value = %raw, "ignoring unparsable environment variable");
            None
        }
    }
}

/// Parse a boolean flag such as `VERIFY_TLS=false`.
pub fn flag(name: &str) -> Option<bool> {
    let raw = var_non_empty(name)?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(%name, value = %raw, "ignoring unparsable boolean flag");
            None
        }
    }
}

/// Split a comma separated variable into trimmed, non-empty items.
pub fn list(name: &str) -> Vec<String> {
    var_non_empty(name)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
