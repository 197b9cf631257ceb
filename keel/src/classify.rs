//! Error classification by message content.
//!
//! Upstream failures (scrapers, model providers, HTTP clients) share no
//! error-code scheme, so classification inspects the lower-cased message
//! text. Everything goes through [`classify_error`] so a structured scheme
//! can replace it without touching the executor.

use std::fmt::Display;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Failure taxonomy. Only [`ErrorKind::Client`] is terminal by default.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    RateLimit,
    Server,
    Client,
    Content,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Server => "server",
            ErrorKind::Client => "client",
            ErrorKind::Content => "content",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Base delay suggested for this kind of failure.
    pub fn suggested_delay(&self) -> Duration {
        let ms = match self {
            ErrorKind::Network => 2000,
            ErrorKind::RateLimit => 5000,
            ErrorKind::Server => 3000,
            ErrorKind::Timeout => 1000,
            ErrorKind::Content => 1500,
            ErrorKind::Client => 0,
            ErrorKind::Unknown => 2000,
        };
        Duration::from_millis(ms)
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::Client)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one failure. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub suggested_delay: Duration,
    pub message: String,
}

const CLIENT_SIGNALS: &[&str] = &["not found", "unauthorized", "forbidden", "bad request"];

// Checked in order: infrastructure signals win over generic timeout wording,
// so "connection timeout" is a network failure.
const RETRYABLE_SIGNALS: &[(ErrorKind, &[&str])] = &[
    (
        ErrorKind::Network,
        &["network", "connection", "econnreset", "enotfound"],
    ),
    (
        ErrorKind::RateLimit,
        &["rate limit", "too many requests", "429"],
    ),
    (
        ErrorKind::Server,
        &[
            "server error",
            "bad gateway",
            "service unavailable",
            "gateway timeout",
        ],
    ),
    (ErrorKind::Timeout, &["timeout", "timed out"]),
    (
        ErrorKind::Content,
        &["insufficient content", "content validation", "empty response"],
    ),
];

/// Classify an error message.
///
/// Client signals (`not found`, `unauthorized`, `forbidden`, `bad request`)
/// make the failure terminal whatever else the message mentions.
pub fn classify_error(message: &str) -> ClassifiedError {
    let lowered = message.to_lowercase();

    let kind = if contains_any(&lowered, CLIENT_SIGNALS) {
        ErrorKind::Client
    } else {
        RETRYABLE_SIGNALS
            .iter()
            .find(|(_, needles)| contains_any(&lowered, needles))
            .map(|(kind, _)| *kind)
            .unwrap_or(ErrorKind::Unknown)
    };

    ClassifiedError {
        kind,
        retryable: kind.is_retryable(),
        suggested_delay: kind.suggested_delay(),
        message: message.to_string(),
    }
}

/// Classify an `anyhow` error using its full context chain.
pub fn classify_anyhow(error: &anyhow::Error) -> ClassifiedError {
    classify_error(&format!("{error:#}"))
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_signals() {
        for message in [
            "Rate limit exceeded",
            "HTTP 429",
            "upstream said: Too Many Requests",
        ] {
            let classified = classify_error(message);
            assert_eq!(classified.kind, ErrorKind::RateLimit, "{message}");
            assert!(classified.retryable);
            assert_eq!(classified.suggested_delay, Duration::from_millis(5000));
        }
    }

    #[test]
    fn test_client_signals_are_terminal_regardless_of_other_words() {
        for message in [
            "Page not found",
            "401 Unauthorized",
            "network error: 404 not found",
            "connection timeout while unauthorized",
            "429 forbidden",
            "Bad Request: missing field",
        ] {
            let classified = classify_error(message);
            assert_eq!(classified.kind, ErrorKind::Client, "{message}");
            assert!(!classified.retryable, "{message}");
            assert_eq!(classified.suggested_delay, Duration::ZERO);
        }
    }

    #[test]
    fn test_connection_timeout_is_network() {
        let classified = classify_error("Connection timeout after 30s");
        assert_eq!(classified.kind, ErrorKind::Network);
        assert_eq!(classified.suggested_delay, Duration::from_millis(2000));
    }

    #[test]
    fn test_econnreset_and_enotfound_are_network() {
        assert_eq!(
            classify_error("Network error: ECONNRESET").kind,
            ErrorKind::Network
        );
        assert_eq!(
            classify_error("getaddrinfo ENOTFOUND example.com").kind,
            ErrorKind::Network
        );
    }

    #[test]
    fn test_gateway_timeout_is_server() {
        let classified = classify_error("504 Gateway Timeout");
        assert_eq!(classified.kind, ErrorKind::Server);
        assert_eq!(classified.suggested_delay, Duration::from_millis(3000));
    }

    #[test]
    fn test_synthetic_timeout_message() {
        let classified = classify_error("Operation timed out after 30000ms");
        assert_eq!(classified.kind, ErrorKind::Timeout);
        assert!(classified.retryable);
        assert_eq!(classified.suggested_delay, Duration::from_millis(1000));
    }

    #[test]
    fn test_content_signals() {
        let classified = classify_error("Insufficient content extracted from page");
        assert_eq!(classified.kind, ErrorKind::Content);
        assert_eq!(classified.suggested_delay, Duration::from_millis(1500));
        assert_eq!(classify_error("empty response body").kind, ErrorKind::Content);
    }

    #[test]
    fn test_unknown_fallback_is_retryable() {
        let classified = classify_error("something odd happened");
        assert_eq!(classified.kind, ErrorKind::Unknown);
        assert!(classified.retryable);
        assert_eq!(classified.suggested_delay, Duration::from_millis(2000));
        assert_eq!(classified.message, "something odd happened");
    }

    #[test]
    fn test_classify_anyhow_uses_context_chain() {
        let err = anyhow::anyhow!("ECONNRESET").context("fetching competitor page");
        assert_eq!(classify_anyhow(&err).kind, ErrorKind::Network);
    }
}
