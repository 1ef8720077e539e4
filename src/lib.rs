//! ytmgr-rs: resumable YouTube uploads.
//!
//! Videos are sent in fixed-size chunks over the resumable upload protocol.
//! Transient failures are retried with exponential backoff at the same
//! offset, a stall detector aborts sessions that stop making progress, and
//! every upload ends with exactly one terminal event describing the outcome.
//!
//! The [`upload`] module is platform-independent: it drives any
//! [`upload::ChunkTransport`]. The [`youtube`] module provides the YouTube
//! Data API implementation and the video metadata model.

#![warn(clippy::all)]

pub mod cli;
pub mod config;
pub mod retry;
pub mod shutdown;
pub mod types;
pub mod upload;
pub mod youtube;
