// Payload logging helpers for outbound collaborator calls

use serde::Serialize;

/// Longest payload body written to the debug log
pub const MAX_LOGGED_PAYLOAD_CHARS: usize = 2000;

/// Safely truncate a string to a maximum number of characters
pub fn safe_truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        // Reserve space for "..." suffix
        let trunc_chars = max_chars.saturating_sub(3);
        format!("{}...", s.chars().take(trunc_chars).collect::<String>())
    }
}

/// Log an outbound request body at debug level
pub fn log_payload<T: Serialize>(label: &str, payload: &T) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }
    match serde_json::to_string(payload) {
        Ok(json) => {
            if json.chars().count() > MAX_LOGGED_PAYLOAD_CHARS {
                log::debug!(
                    "{} payload: {} (truncated, total {} bytes)",
                    label,
                    safe_truncate(&json, MAX_LOGGED_PAYLOAD_CHARS),
                    json.len()
                );
            } else {
                log::debug!("{} payload: {}", label, json);
            }
        }
        Err(e) => log::debug!("{} payload could not be serialized: {}", label, e),
    }
}
