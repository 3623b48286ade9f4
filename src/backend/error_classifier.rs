//! Pattern-based classification of backend failure messages.
//!
//! Used when a failure only surfaces as text (a transport error without a
//! structured kind, a proxy error page). Checks patterns in priority order:
//! timeout > http status > transport. Falls back to `GenericError`.

use crate::error::ErrorKind;

/// Classify an error message string into an [`ErrorKind`].
pub fn classify_error_message(msg: &str) -> ErrorKind {
    let lower = msg.to_lowercase();

    // Timeout first: "504 gateway timeout" is a timeout, not an HTTP error
    if contains_any(
        &lower,
        &[
            "timeout",
            "timed out",
            "deadline exceeded",
            "gateway time-out",
        ],
    ) {
        return ErrorKind::Timeout;
    }

    if let Some(status) = extract_http_status(&lower) {
        return ErrorKind::HttpError(status);
    }

    if contains_any(
        &lower,
        &[
            "connection refused",
            "connection reset",
            "connection closed",
            "connection aborted",
            "broken pipe",
            "dns error",
            "failed to lookup address",
            "no route to host",
            "network unreachable",
            "error sending request",
            "error trying to connect",
            "tcp connect error",
        ],
    ) {
        return ErrorKind::TransportError;
    }

    ErrorKind::GenericError
}

fn contains_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack.contains(p))
}

/// Pull a status out of "http 503", "status 503" or "status code: 503".
fn extract_http_status(lower: &str) -> Option<u16> {
    for marker in ["http ", "status code: ", "status code ", "status "] {
        if let Some(idx) = lower.find(marker) {
            let digits: String = lower[idx + marker.len()..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if digits.len() == 3 {
                if let Ok(status) = digits.parse::<u16>() {
                    if (400..=599).contains(&status) {
                        return Some(status);
                    }
                }
            }
        }
    }
    None
}
