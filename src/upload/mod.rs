//! Resumable chunked upload engine.
//!
//! The orchestrator drives a [`ChunkTransport`] one chunk at a time, wraps
//! every call in a [`StallDetector`], lets the [`RetryPolicy`] classify
//! failures, and reports through a [`ProgressReporter`].

pub mod error;
pub mod handle;
pub mod orchestrator;
pub mod policy;
pub mod progress;
pub mod report;
pub mod session;
pub mod source;
pub mod stall;
pub mod transport;

pub use error::{FailureKind, FailureReport, TransportError, UploadError};
pub use handle::{spawn_upload, SessionStore, UploadHandle, UploadStatus};
pub use orchestrator::{UploadConfig, UploadRequest, Uploader};
pub use policy::{AttemptOutcome, DefaultRetryPolicy, RetryPolicy};
pub use progress::{ProgressEvent, ProgressReporter, TerminalEvent, TerminalOutcome, UploadEvent};
pub use session::{UploadSession, UploadState};
pub use source::{ChunkSource, FileSource, MemorySource};
pub use stall::{Probe, ProgressSample, StallDetector};
pub use transport::{ChunkAck, ChunkTransport, FinalizeStep, ResourceMetadata, SessionHandle};
