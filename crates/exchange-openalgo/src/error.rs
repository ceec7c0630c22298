//! Broker error taxonomy.

use thiserror::Error;

/// Substrings that mark an error as transient regardless of its source.
const TRANSIENT_MARKERS: &[&str] = &[
    "winerror 10035",
    "http 500",
    "timeout",
    "timed out",
    "connection reset",
    "temporarily unavailable",
];

/// Replies meaning the order already reached a terminal state.
const TERMINAL_MARKERS: &[&str] = &["not a pending order", "already executed"];

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Non-2xx HTTP response.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Well-formed envelope with `status: error`.
    #[error("API error: {message}")]
    Api { message: String },

    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    /// Response did not match any known shape.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl BrokerError {
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
        }
    }

    pub fn decode(detail: impl Into<String>) -> Self {
        Self::Decode(detail.into())
    }

    /// Whether a retry has a reasonable chance of succeeding.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Http { status, body } => *status >= 500 || has_marker(body, TRANSIENT_MARKERS),
            Self::Api { message } => has_marker(message, TRANSIENT_MARKERS),
            Self::Transport(message) => has_marker(message, TRANSIENT_MARKERS),
            Self::Decode(_) => false,
        }
    }

    /// Modify/cancel rejected because the order already filled or closed.
    #[must_use]
    pub fn is_already_terminal(&self) -> bool {
        match self {
            Self::Api { message } | Self::Http { body: message, .. } => {
                has_marker(message, TERMINAL_MARKERS)
            }
            Self::Transport(_) | Self::Timeout | Self::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if let Some(status) = e.status() {
            Self::Http {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

fn has_marker(text: &str, markers: &[&str]) -> bool {
    let lower = text.to_ascii_lowercase();
    markers.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transient_errors() {
        assert!(BrokerError::Timeout.is_transient());
        assert!(BrokerError::Http {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(BrokerError::api("HTTP 500 Internal Server Error").is_transient());
        assert!(BrokerError::Transport("[WinError 10035] socket busy".into()).is_transient());
    }

    #[test]
    fn validation_errors_are_not_transient() {
        assert!(!BrokerError::api("Invalid symbol").is_transient());
        assert!(!BrokerError::Http {
            status: 400,
            body: "bad request".into()
        }
        .is_transient());
        assert!(!BrokerError::decode("no ltp").is_transient());
    }

    #[test]
    fn already_terminal_replies() {
        assert!(BrokerError::api("Order 123 is not a pending order").is_already_terminal());
        assert!(BrokerError::api("Order Already Executed").is_already_terminal());
        assert!(!BrokerError::api("Insufficient margin").is_already_terminal());
    }
}
