use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Raw failure surfaced by a [`ChunkTransport`](super::ChunkTransport) call.
///
/// The transport reports what happened; it never decides whether the
/// failure is worth retrying. That is the Retry Policy's job.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The platform answered with a non-success HTTP status.
    #[error("HTTP {status}{}: {message}", .reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default())]
    Status {
        status: u16,
        reason: Option<String>,
        message: String,
    },

    /// No response (or no data) within the per-call socket timeout.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Connection refused, reset or closed mid-request.
    #[error("connection error: {0}")]
    Connection(String),

    /// Host name could not be resolved.
    #[error("DNS resolution failed: {0}")]
    Dns(String),

    /// The platform answered but the response could not be understood.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Anything the transport could not put a type on. Classified by text.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Closed set of failure classes the Retry Policy maps every error into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 4xx-class: the request itself is wrong. Never retried.
    Construction,
    /// Timeouts, resets, broken pipes, DNS.
    TransientNetwork,
    /// 5xx-class responses.
    TransientServer,
    /// No progress within the stall timeout.
    Stall,
    /// Transport error the policy could not place. Treated as fatal.
    Unclassified,
    /// User-initiated abort.
    Cancelled,
    /// Local failure reading the payload or a protocol violation by the peer.
    Local,
}

impl FailureKind {
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            FailureKind::TransientNetwork | FailureKind::TransientServer
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Construction => "construction",
            FailureKind::TransientNetwork => "transient_network",
            FailureKind::TransientServer => "transient_server",
            FailureKind::Stall => "stall",
            FailureKind::Unclassified => "unclassified",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Local => "local",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of one upload session.
///
/// Every variant keeps the original platform error plus the classification and
/// attempt count, so the terminal event never loses the underlying cause.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("could not open upload session ({kind}): {source}")]
    SessionOpen {
        kind: FailureKind,
        source: TransportError,
    },

    #[error("chunk at offset {offset} rejected ({kind}) after {attempts} attempt(s): {source}")]
    Rejected {
        offset: u64,
        attempts: u32,
        kind: FailureKind,
        source: TransportError,
    },

    #[error("retries exhausted for chunk at offset {offset} ({kind}) after {retries} retries ({attempts} attempts): {source}")]
    RetriesExhausted {
        offset: u64,
        attempts: u32,
        retries: u32,
        kind: FailureKind,
        source: TransportError,
    },

    #[error("upload stalled at offset {offset}: no progress for {}s (limit {}s) over {attempts} attempt(s){}", .idle.as_secs(), .limit.as_secs(), .last_error.as_ref().map(|e| format!(", last error: {e}")).unwrap_or_default())]
    Stalled {
        offset: u64,
        attempts: u32,
        idle: Duration,
        limit: Duration,
        last_error: Option<TransportError>,
    },

    #[error("platform acknowledged {acked} bytes but the payload is only {total} bytes")]
    Protocol { acked: u64, total: u64 },

    #[error("platform finished the transfer without returning a resource id")]
    MissingResource,

    #[error("failed to read payload at offset {offset}: {source}")]
    Source {
        offset: u64,
        source: std::io::Error,
    },

    #[error("upload cancelled")]
    Cancelled { offset: u64, attempts: u32 },
}

impl UploadError {
    pub fn kind(&self) -> FailureKind {
        match self {
            UploadError::SessionOpen { kind, .. }
            | UploadError::Rejected { kind, .. }
            | UploadError::RetriesExhausted { kind, .. } => *kind,
            UploadError::Stalled { .. } => FailureKind::Stall,
            UploadError::Protocol { .. }
            | UploadError::MissingResource
            | UploadError::Source { .. } => FailureKind::Local,
            UploadError::Cancelled { .. } => FailureKind::Cancelled,
        }
    }

    /// Attempts made at the offset where the session died.
    pub fn attempts(&self) -> u32 {
        match self {
            UploadError::SessionOpen { .. } => 1,
            UploadError::Rejected { attempts, .. }
            | UploadError::RetriesExhausted { attempts, .. }
            | UploadError::Stalled { attempts, .. }
            | UploadError::Cancelled { attempts, .. } => *attempts,
            UploadError::Protocol { .. }
            | UploadError::MissingResource
            | UploadError::Source { .. } => 0,
        }
    }

    /// Retries spent at the offset where the session died.
    pub fn retries(&self) -> u32 {
        match self {
            UploadError::RetriesExhausted { retries, .. } => *retries,
            other => other.attempts().saturating_sub(1),
        }
    }

    pub fn offset(&self) -> Option<u64> {
        match self {
            UploadError::SessionOpen { .. }
            | UploadError::Protocol { .. }
            | UploadError::MissingResource => None,
            UploadError::Rejected { offset, .. }
            | UploadError::RetriesExhausted { offset, .. }
            | UploadError::Stalled { offset, .. }
            | UploadError::Source { offset, .. }
            | UploadError::Cancelled { offset, .. } => Some(*offset),
        }
    }

    pub fn platform_error(&self) -> Option<&TransportError> {
        match self {
            UploadError::SessionOpen { source, .. }
            | UploadError::Rejected { source, .. }
            | UploadError::RetriesExhausted { source, .. } => Some(source),
            UploadError::Stalled { last_error, .. } => last_error.as_ref(),
            _ => None,
        }
    }

    /// Flatten into the serializable form carried by the terminal event.
    pub fn report(&self) -> FailureReport {
        FailureReport {
            kind: self.kind(),
            message: self.to_string(),
            platform_status: self.platform_error().and_then(TransportError::status),
            platform_message: self.platform_error().map(ToString::to_string),
            offset: self.offset(),
            attempts: self.attempts(),
            retries: self.retries(),
        }
    }
}

/// Causal chain of a failed upload, as reported to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub kind: FailureKind,
    pub message: String,
    pub platform_status: Option<u16>,
    pub platform_message: Option<String>,
    pub offset: Option<u64>,
    pub attempts: u32,
    pub retries: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_includes_reason() {
        let e = TransportError::Status {
            status: 400,
            reason: Some("invalidParameter".into()),
            message: "Invalid value for categoryId".into(),
        };
        assert_eq!(
            e.to_string(),
            "HTTP 400 (invalidParameter): Invalid value for categoryId"
        );
    }

    #[test]
    fn test_status_display_without_reason() {
        let e = TransportError::Status {
            status: 503,
            reason: None,
            message: "Backend Error".into(),
        };
        assert_eq!(e.to_string(), "HTTP 503: Backend Error");
    }

    #[test]
    fn test_recoverable_kinds() {
        assert!(FailureKind::TransientNetwork.is_recoverable());
        assert!(FailureKind::TransientServer.is_recoverable());
        assert!(!FailureKind::Construction.is_recoverable());
        assert!(!FailureKind::Stall.is_recoverable());
        assert!(!FailureKind::Unclassified.is_recoverable());
        assert!(!FailureKind::Cancelled.is_recoverable());
    }

    #[test]
    fn test_report_keeps_platform_message() {
        let e = UploadError::Rejected {
            offset: 5_242_880,
            attempts: 1,
            kind: FailureKind::Construction,
            source: TransportError::Status {
                status: 400,
                reason: Some("invalidParameter".into()),
                message: "unexpected parameter".into(),
            },
        };
        let report = e.report();
        assert_eq!(report.kind, FailureKind::Construction);
        assert_eq!(report.platform_status, Some(400));
        assert_eq!(report.retries, 0);
        assert_eq!(report.offset, Some(5_242_880));
        assert!(report
            .platform_message
            .as_deref()
            .unwrap()
            .contains("unexpected parameter"));
        assert!(report.message.contains("after 1 attempt(s)"));
    }

    #[test]
    fn test_stall_report_carries_last_error() {
        let e = UploadError::Stalled {
            offset: 10,
            attempts: 3,
            idle: Duration::from_secs(130),
            limit: Duration::from_secs(120),
            last_error: Some(TransportError::Timeout("no response in 60s".into())),
        };
        let report = e.report();
        assert_eq!(report.kind, FailureKind::Stall);
        assert_eq!(report.attempts, 3);
        assert!(report.message.contains("no progress for 130s"));
        assert!(report.message.contains("no response in 60s"));
    }

    #[test]
    fn test_exhausted_report_counts_retries_and_sends() {
        let e = UploadError::RetriesExhausted {
            offset: 0,
            attempts: 6,
            retries: 5,
            kind: FailureKind::TransientServer,
            source: TransportError::Status {
                status: 503,
                reason: None,
                message: "Backend Error".into(),
            },
        };
        let report = e.report();
        assert_eq!(report.retries, 5);
        assert_eq!(report.attempts, 6);
        assert!(report.message.contains("after 5 retries (6 attempts)"));
    }

    #[test]
    fn test_cancelled_kind() {
        let e = UploadError::Cancelled {
            offset: 0,
            attempts: 0,
        };
        assert_eq!(e.kind(), FailureKind::Cancelled);
        assert_eq!(e.to_string(), "upload cancelled");
    }
}
