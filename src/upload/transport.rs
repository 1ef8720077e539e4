use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;

use super::error::TransportError;

/// What the platform needs to know before it hands out a session.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceMetadata {
    /// Human-readable label used in logs and events.
    pub title: String,
    pub content_type: String,
    /// Platform-specific create body, passed through untouched.
    pub body: serde_json::Value,
}

/// Opaque handle for one in-flight resumable transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: String,
    pub total_bytes: u64,
}

/// Platform acknowledgement of a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkAck {
    /// Total bytes the platform has persisted for this session.
    pub bytes_acked: u64,
    pub is_final: bool,
    /// Identifier of the created resource, present on the final chunk.
    pub resource_id: Option<String>,
}

/// Post-upload step the create call does not accept directly.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FinalizeStep {
    AttachThumbnail { path: PathBuf },
    /// Update-only fields, applied to `part` of the created resource.
    Patch {
        part: String,
        body: serde_json::Value,
    },
    AddToCollection { collection_id: String },
}

impl FinalizeStep {
    pub fn name(&self) -> String {
        match self {
            FinalizeStep::AttachThumbnail { .. } => "thumbnail".to_string(),
            FinalizeStep::Patch { part, .. } => format!("patch:{part}"),
            FinalizeStep::AddToCollection { .. } => "playlist".to_string(),
        }
    }
}

/// Single-attempt access to the remote platform.
///
/// Implementations perform exactly one network exchange per call and surface
/// errors raw. They do no retrying, progress bookkeeping or timeouts beyond
/// what the underlying client enforces.
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    /// Acquire a session handle for `total_bytes` of payload.
    async fn open_session(
        &self,
        metadata: &ResourceMetadata,
        total_bytes: u64,
    ) -> Result<SessionHandle, TransportError>;

    /// Send `payload` starting at `offset`. The ack reports the platform's
    /// view of the total persisted so far, which may be less than
    /// `offset + payload.len()`.
    async fn send_chunk(
        &self,
        session: &SessionHandle,
        offset: u64,
        payload: Vec<u8>,
    ) -> Result<ChunkAck, TransportError>;

    /// Apply one finalize step to the created resource.
    async fn finalize(&self, resource_id: &str, step: &FinalizeStep) -> Result<(), TransportError>;

    /// Public location of a created resource, if the platform has one.
    fn resource_url(&self, _resource_id: &str) -> Option<String> {
        None
    }
}
