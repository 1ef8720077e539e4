//! Mapping of HTTP-level failures into [`TransportError`].

use std::error::Error as _;
use std::io::ErrorKind;

use serde::Deserialize;

use crate::upload::TransportError;

/// Longest slice of a non-JSON error body kept in the message.
const MAX_BODY_EXCERPT: usize = 500;

/// Google API error envelope: `{"error": {"code", "message", "errors": [...]}}`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ErrorItem {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Build a `Status` error from a non-success response body.
pub(crate) fn status_error(status: u16, body: &str) -> TransportError {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        let first = envelope.error.errors.into_iter().next();
        let reason = first.as_ref().and_then(|e| e.reason.clone());
        let message = if envelope.error.message.is_empty() {
            first.and_then(|e| e.message).unwrap_or_default()
        } else {
            envelope.error.message
        };
        return TransportError::Status {
            status,
            reason,
            message,
        };
    }

    let trimmed = body.trim();
    let message = if trimmed.is_empty() {
        reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("no response body")
            .to_string()
    } else {
        trimmed.chars().take(MAX_BODY_EXCERPT).collect()
    };
    TransportError::Status {
        status,
        reason: None,
        message,
    }
}

/// Drain a failed response into a `Status` error.
pub(crate) async fn response_error(resp: reqwest::Response) -> TransportError {
    let status = resp.status().as_u16();
    match resp.text().await {
        Ok(body) => status_error(status, &body),
        Err(e) => {
            tracing::debug!(status, error = %e, "failed to read error body");
            status_error(status, "")
        }
    }
}

/// Typed classification of a `reqwest` failure. Only errors with no
/// recognizable shape fall through to [`TransportError::Other`].
pub(crate) fn from_reqwest(e: &reqwest::Error) -> TransportError {
    let text = error_chain(e);
    if e.is_timeout() {
        return TransportError::Timeout(text);
    }
    if let Some(status) = e.status() {
        return status_error(status.as_u16(), "");
    }
    if e.is_connect() {
        let lower = text.to_ascii_lowercase();
        if lower.contains("dns error") || lower.contains("failed to lookup address") {
            return TransportError::Dns(text);
        }
        return TransportError::Connection(text);
    }
    if e.is_decode() {
        return TransportError::Malformed(text);
    }
    match io_error_kind(e) {
        Some(ErrorKind::TimedOut) => return TransportError::Timeout(text),
        Some(
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::NotConnected,
        ) => return TransportError::Connection(text),
        _ => {}
    }
    TransportError::Other(text)
}

/// "outer: inner: innermost", so nothing is lost when the error is flattened.
fn error_chain(e: &reqwest::Error) -> String {
    let mut text = e.to_string();
    let mut source = e.source();
    while let Some(inner) = source {
        let inner_text = inner.to_string();
        if !text.contains(&inner_text) {
            text.push_str(": ");
            text.push_str(&inner_text);
        }
        source = inner.source();
    }
    text
}

fn io_error_kind(e: &reqwest::Error) -> Option<ErrorKind> {
    let mut source = e.source();
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            return Some(io.kind());
        }
        source = inner.source();
    }
    None
}
