//! YouTube as an upload target: the resumable-upload transport and the
//! video metadata it carries.

mod error;
pub mod metadata;
pub mod transport;

pub use metadata::{Localization, MetadataError, VideoDetails};
pub use transport::{Endpoints, YouTubeTransport};
