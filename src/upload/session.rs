use serde::Serialize;
use tokio::time::Instant;

use super::error::UploadError;

/// Lifecycle of one upload.
///
/// `Initiating → Transferring → Finalizing → Completed | CompletedWithWarnings`,
/// with `Failed` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Initiating,
    Transferring,
    Finalizing,
    Completed,
    CompletedWithWarnings,
    Failed,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadState::Completed | UploadState::CompletedWithWarnings | UploadState::Failed
        )
    }

    fn can_transition_to(self, next: UploadState) -> bool {
        use UploadState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Initiating, Transferring)
            | (Transferring, Finalizing)
            | (Finalizing, Completed)
            | (Finalizing, CompletedWithWarnings) => true,
            _ => false,
        }
    }
}

/// One in-flight transfer. Owned and mutated only by the orchestrator's
/// chunk loop; dropped when the upload reaches a terminal state.
#[derive(Debug)]
pub struct UploadSession {
    pub session_id: String,
    pub total_bytes: u64,
    bytes_transferred: u64,
    pub chunk_size: u64,
    state: UploadState,
    pub started_at: Instant,
    pub last_progress_at: Instant,
}

impl UploadSession {
    pub fn new(total_bytes: u64, chunk_size: u64) -> Self {
        let now = Instant::now();
        Self {
            session_id: String::new(),
            total_bytes,
            bytes_transferred: 0,
            chunk_size: chunk_size.max(1),
            state: UploadState::Initiating,
            started_at: now,
            last_progress_at: now,
        }
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_transferred == self.total_bytes
    }

    /// Offset and length of the next chunk to send.
    pub fn next_range(&self) -> (u64, usize) {
        let remaining = self.total_bytes - self.bytes_transferred;
        let len = remaining.min(self.chunk_size);
        (self.bytes_transferred, len as usize)
    }

    /// Move to `next`. Illegal transitions are ignored and logged; the state
    /// machine never leaves a terminal state.
    pub fn transition(&mut self, next: UploadState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = ?self.state, to = ?next, "ignoring illegal upload state transition");
            return;
        }
        tracing::debug!(session = %self.session_id, from = ?self.state, to = ?next, "upload state");
        self.state = next;
    }

    /// Record the platform's acknowledged total.
    ///
    /// Returns the number of newly transferred bytes. Re-acknowledging an
    /// offset already counted returns 0 and leaves the counter unchanged;
    /// a smaller value is ignored so the counter never decreases.
    pub fn advance(&mut self, bytes_acked: u64) -> Result<u64, UploadError> {
        if bytes_acked > self.total_bytes {
            return Err(UploadError::Protocol {
                acked: bytes_acked,
                total: self.total_bytes,
            });
        }
        if bytes_acked <= self.bytes_transferred {
            return Ok(0);
        }
        let delta = bytes_acked - self.bytes_transferred;
        self.bytes_transferred = bytes_acked;
        self.last_progress_at = Instant::now();
        Ok(delta)
    }

    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        self.bytes_transferred as f64 * 100.0 / self.total_bytes as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_range_last_chunk_is_short() {
        let mut s = UploadSession::new(12, 5);
        assert_eq!(s.next_range(), (0, 5));
        s.advance(10).unwrap();
        assert_eq!(s.next_range(), (10, 2));
    }

    #[test]
    fn test_advance_is_idempotent() {
        let mut s = UploadSession::new(100, 10);
        assert_eq!(s.advance(10).unwrap(), 10);
        assert_eq!(s.advance(10).unwrap(), 0);
        assert_eq!(s.bytes_transferred(), 10);
    }

    #[test]
    fn test_advance_never_decreases() {
        let mut s = UploadSession::new(100, 10);
        s.advance(30).unwrap();
        assert_eq!(s.advance(20).unwrap(), 0);
        assert_eq!(s.bytes_transferred(), 30);
    }

    #[test]
    fn test_advance_beyond_total_is_protocol_error() {
        let mut s = UploadSession::new(100, 10);
        assert!(matches!(
            s.advance(101),
            Err(UploadError::Protocol {
                acked: 101,
                total: 100
            })
        ));
        assert_eq!(s.bytes_transferred(), 0);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut s = UploadSession::new(1, 1);
        s.transition(UploadState::Transferring);
        s.transition(UploadState::Finalizing);
        s.transition(UploadState::Completed);
        assert_eq!(s.state(), UploadState::Completed);
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let mut s = UploadSession::new(1, 1);
        s.transition(UploadState::Failed);
        s.transition(UploadState::Transferring);
        assert_eq!(s.state(), UploadState::Failed);
    }

    #[test]
    fn test_cannot_skip_transferring() {
        let mut s = UploadSession::new(1, 1);
        s.transition(UploadState::Finalizing);
        assert_eq!(s.state(), UploadState::Initiating);
    }

    #[test]
    fn test_percent_empty_payload() {
        let s = UploadSession::new(0, 5);
        assert!(s.is_complete());
        assert_eq!(s.percent(), 100.0);
    }
}
