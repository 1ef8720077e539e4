//! YouTube Data API v3 resumable upload protocol over `reqwest`.
//!
//! One HTTP exchange per trait call. Retrying and progress belong to the
//! orchestrator. The transport only enforces the socket idle bound: a request
//! may take as long as it needs while bytes keep moving, and fails with
//! [`TransportError::Timeout`] once nothing has moved for `idle_timeout`.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::{Body, Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use tokio::sync::watch;

use super::error::{from_reqwest, response_error};
use super::metadata::image_mime_type;
use crate::upload::{
    ChunkAck, ChunkTransport, FinalizeStep, ResourceMetadata, SessionHandle, TransportError,
};

const USER_AGENT: &str = concat!("ytmgr-rs/", env!("CARGO_PKG_VERSION"));

/// Chunk bodies are streamed in frames of this size; each frame pulled by
/// the connection counts as data movement.
const BODY_FRAME_BYTES: usize = 256 * 1024;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Base URLs for the API. Overridable so tests can point at a local server.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub upload: String,
    pub api: String,
    pub watch: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::with_base("https://www.googleapis.com")
    }
}

impl Endpoints {
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            upload: format!("{base}/upload/youtube/v3"),
            api: format!("{base}/youtube/v3"),
            watch: "https://www.youtube.com/watch?v=".to_string(),
        }
    }
}

pub struct YouTubeTransport {
    client: Client,
    access_token: String,
    endpoints: Endpoints,
    idle_timeout: Duration,
}

impl std::fmt::Debug for YouTubeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YouTubeTransport")
            .field("access_token", &"<redacted>")
            .field("endpoints", &self.endpoints)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl YouTubeTransport {
    /// Uses a pre-authorized OAuth bearer token. `idle_timeout` bounds how
    /// long one request may go without moving any data in either direction.
    pub fn new(access_token: impl Into<String>, idle_timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .read_timeout(idle_timeout)
            // 308 is "resume incomplete" here, not a redirect.
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self::with_client(client, access_token).with_idle_timeout(idle_timeout))
    }

    /// The client must not follow redirects.
    pub fn with_client(client: Client, access_token: impl Into<String>) -> Self {
        Self {
            client,
            access_token: access_token.into(),
            endpoints: Endpoints::default(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, TransportError> {
        request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| from_reqwest(&e))
    }

    async fn send_expecting_success(&self, request: RequestBuilder) -> Result<Response, TransportError> {
        let resp = self.send(request).await?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(response_error(resp).await)
        }
    }
}

/// `part` query value: the top-level keys of the resource body.
fn parts(body: &Value) -> String {
    body.as_object()
        .map(|o| o.keys().map(String::as_str).collect::<Vec<_>>().join(","))
        .unwrap_or_default()
}

/// `Range: bytes=0-N` means bytes `0..=N` are persisted.
fn parse_range_header(value: &str) -> Result<u64, TransportError> {
    let malformed = || TransportError::Malformed(format!("unexpected Range header: {value}"));
    let range = value.trim().strip_prefix("bytes=").ok_or_else(malformed)?;
    let (start, end) = range.split_once('-').ok_or_else(malformed)?;
    if start.trim() != "0" {
        return Err(malformed());
    }
    let last: u64 = end.trim().parse().map_err(|_| malformed())?;
    Ok(last + 1)
}

/// Stream `payload` in frames, bumping `moved` each time the connection
/// pulls one. The sender is dropped once the whole body has been handed over.
fn metered_body(payload: Vec<u8>, moved: watch::Sender<u64>) -> Body {
    let frames: Vec<Vec<u8>> = payload
        .chunks(BODY_FRAME_BYTES)
        .map(<[u8]>::to_vec)
        .collect();
    let frames = stream::iter(frames).map(move |frame| {
        moved.send_modify(|n| *n += frame.len() as u64);
        Ok::<_, std::io::Error>(frame)
    });
    Body::wrap_stream(frames)
}

/// Resolves with a timeout error once `moved` has not changed for `limit`.
/// Never resolves after the body is fully sent; waiting for the response is
/// bounded by the client's read timeout instead.
async fn idle_watchdog(mut moved: watch::Receiver<u64>, limit: Duration) -> TransportError {
    loop {
        match tokio::time::timeout(limit, moved.changed()).await {
            Ok(Ok(())) => continue,
            Ok(Err(_)) => std::future::pending::<()>().await,
            Err(_) => {
                return TransportError::Timeout(format!(
                    "no data moved for {}s",
                    limit.as_secs()
                ))
            }
        }
    }
}

fn content_range(offset: u64, len: usize, total: u64) -> String {
    if len == 0 {
        format!("bytes */{total}")
    } else {
        format!("bytes {}-{}/{}", offset, offset + len as u64 - 1, total)
    }
}

#[async_trait]
impl ChunkTransport for YouTubeTransport {
    async fn open_session(
        &self,
        metadata: &ResourceMetadata,
        total_bytes: u64,
    ) -> Result<SessionHandle, TransportError> {
        let part = parts(&metadata.body);
        let request = self
            .client
            .post(format!("{}/videos", self.endpoints.upload))
            .query(&[("uploadType", "resumable"), ("part", part.as_str())])
            .header("X-Upload-Content-Length", total_bytes)
            .header("X-Upload-Content-Type", &metadata.content_type)
            .json(&metadata.body);
        let resp = self.send_expecting_success(request).await?;

        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                TransportError::Malformed("session response has no Location header".into())
            })?;
        tracing::debug!(title = %metadata.title, "opened resumable upload session");
        Ok(SessionHandle {
            id: location.to_string(),
            total_bytes,
        })
    }

    async fn send_chunk(
        &self,
        session: &SessionHandle,
        offset: u64,
        payload: Vec<u8>,
    ) -> Result<ChunkAck, TransportError> {
        let (moved, watch_moved) = watch::channel(0u64);
        let request = self
            .client
            .put(&session.id)
            .header(
                CONTENT_RANGE,
                content_range(offset, payload.len(), session.total_bytes),
            )
            .header(reqwest::header::CONTENT_LENGTH, payload.len())
            .body(metered_body(payload, moved));
        let resp = tokio::select! {
            resp = self.send(request) => resp?,
            e = idle_watchdog(watch_moved, self.idle_timeout) => return Err(e),
        };

        match resp.status() {
            StatusCode::PERMANENT_REDIRECT => {
                let bytes_acked = match resp.headers().get(RANGE) {
                    Some(v) => parse_range_header(v.to_str().unwrap_or_default())?,
                    None => 0,
                };
                Ok(ChunkAck {
                    bytes_acked,
                    is_final: false,
                    resource_id: None,
                })
            }
            StatusCode::OK | StatusCode::CREATED => {
                let body: Value = resp.json().await.map_err(|e| from_reqwest(&e))?;
                let id = body
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        TransportError::Malformed("final response has no video id".into())
                    })?;
                Ok(ChunkAck {
                    bytes_acked: session.total_bytes,
                    is_final: true,
                    resource_id: Some(id.to_string()),
                })
            }
            _ => Err(response_error(resp).await),
        }
    }

    async fn finalize(&self, resource_id: &str, step: &FinalizeStep) -> Result<(), TransportError> {
        let request = match step {
            FinalizeStep::AttachThumbnail { path } => {
                let bytes = tokio::fs::read(path).await.map_err(|e| {
                    TransportError::Other(format!("cannot read thumbnail {}: {e}", path.display()))
                })?;
                self.client
                    .post(format!("{}/thumbnails/set", self.endpoints.upload))
                    .query(&[("videoId", resource_id)])
                    .header(CONTENT_TYPE, image_mime_type(path))
                    .body(bytes)
            }
            FinalizeStep::Patch { part, body } => {
                let mut body = body.clone();
                if let Some(obj) = body.as_object_mut() {
                    obj.insert("id".into(), json!(resource_id));
                }
                self.client
                    .put(format!("{}/videos", self.endpoints.api))
                    .query(&[("part", part.as_str())])
                    .json(&body)
            }
            FinalizeStep::AddToCollection { collection_id } => self
                .client
                .post(format!("{}/playlistItems", self.endpoints.api))
                .query(&[("part", "snippet")])
                .json(&json!({
                    "snippet": {
                        "playlistId": collection_id,
                        "resourceId": { "kind": "youtube#video", "videoId": resource_id },
                    }
                })),
        };
        self.send_expecting_success(request).await?;
        Ok(())
    }

    fn resource_url(&self, resource_id: &str) -> Option<String> {
        Some(format!("{}{}", self.endpoints.watch, resource_id))
    }
}
