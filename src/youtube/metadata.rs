//! Video metadata: validation, the `videos.insert` body, and the finalize
//! steps that run after the bytes are in.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::types::PrivacyStatus;
use crate::upload::{FinalizeStep, ResourceMetadata, UploadRequest};

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm"];
pub const THUMBNAIL_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

const MAX_TITLE_CHARS: usize = 100;
const MAX_DESCRIPTION_BYTES: usize = 5000;
/// Only the first few hashtags are shown above the title.
const MAX_HASHTAGS: usize = 5;
/// Travel & Events.
pub const DEFAULT_CATEGORY_ID: &str = "19";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("title is required")]
    MissingTitle,

    #[error("title is {0} characters, the limit is {max}", max = MAX_TITLE_CHARS)]
    TitleTooLong(usize),

    #[error("description is required")]
    MissingDescription,

    #[error("description is {0} bytes (hashtags included), the limit is {max}", max = MAX_DESCRIPTION_BYTES)]
    DescriptionTooLong(usize),

    #[error("unsupported video format '{0}' (expected one of: mp4, mov, avi, mkv, webm)")]
    UnsupportedVideo(String),

    #[error("unsupported thumbnail format '{0}' (expected one of: jpg, jpeg, png, webp)")]
    UnsupportedThumbnail(String),

    #[error("localizations require a default language")]
    LocalizationsWithoutDefaultLanguage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Localization {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Everything the user can say about a video.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoDetails {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub hashtags: Vec<String>,
    pub category_id: Option<String>,
    pub privacy: PrivacyStatus,
    /// Scheduled publication. Forces the video to private until then.
    pub publish_at: Option<DateTime<Utc>>,
    pub recording_date: Option<NaiveDate>,
    pub default_language: Option<String>,
    /// Keyed by BCP-47 language code.
    pub localizations: BTreeMap<String, Localization>,
    pub thumbnail: Option<PathBuf>,
    pub playlist_id: Option<String>,
}

impl VideoDetails {
    /// Description with up to five hashtags prepended, separated by a blank
    /// line.
    pub fn full_description(&self) -> String {
        let hashtags: Vec<String> = self
            .hashtags
            .iter()
            .map(|h| h.trim())
            .filter(|h| !h.is_empty())
            .take(MAX_HASHTAGS)
            .map(|h| {
                if h.starts_with('#') {
                    h.to_string()
                } else {
                    format!("#{h}")
                }
            })
            .collect();
        if hashtags.is_empty() {
            self.description.clone()
        } else {
            format!("{}\n\n{}", hashtags.join(" "), self.description)
        }
    }

    pub fn effective_privacy(&self) -> PrivacyStatus {
        if self.publish_at.is_some() {
            PrivacyStatus::Private
        } else {
            self.privacy
        }
    }

    pub fn validate(&self) -> Result<(), MetadataError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(MetadataError::MissingTitle);
        }
        let chars = title.chars().count();
        if chars > MAX_TITLE_CHARS {
            return Err(MetadataError::TitleTooLong(chars));
        }
        if self.description.trim().is_empty() {
            return Err(MetadataError::MissingDescription);
        }
        let bytes = self.full_description().len();
        if bytes > MAX_DESCRIPTION_BYTES {
            return Err(MetadataError::DescriptionTooLong(bytes));
        }
        if let Some(thumb) = &self.thumbnail {
            let ext = extension(thumb);
            if !THUMBNAIL_EXTENSIONS.contains(&ext.as_str()) {
                return Err(MetadataError::UnsupportedThumbnail(ext));
            }
        }
        if !self.localizations.is_empty() && self.default_language.is_none() {
            return Err(MetadataError::LocalizationsWithoutDefaultLanguage);
        }
        Ok(())
    }

    /// `videos.insert` resource body. Its top-level keys double as the
    /// `part` list.
    pub fn insert_body(&self) -> Value {
        let mut snippet = json!({
            "title": self.title.trim(),
            "description": self.full_description(),
            "tags": self.tags,
            "categoryId": self.category_id.as_deref().unwrap_or(DEFAULT_CATEGORY_ID),
        });
        if let Some(lang) = &self.default_language {
            snippet["defaultLanguage"] = json!(lang);
        }

        let mut status = json!({
            "privacyStatus": self.effective_privacy().as_str(),
            "selfDeclaredMadeForKids": false,
        });
        if let Some(at) = self.publish_at {
            status["publishAt"] = json!(at.to_rfc3339_opts(SecondsFormat::Secs, true));
        }

        let mut body = Map::new();
        body.insert("snippet".into(), snippet);
        body.insert("status".into(), status);
        if let Some(date) = self.recording_date {
            body.insert(
                "recordingDetails".into(),
                json!({ "recordingDate": format!("{}T12:00:00.0Z", date.format("%Y-%m-%d")) }),
            );
        }
        Value::Object(body)
    }

    /// Post-transfer steps, in the order they must run.
    pub fn finalize_steps(&self) -> Vec<FinalizeStep> {
        let mut steps = Vec::new();
        if let Some(path) = &self.thumbnail {
            steps.push(FinalizeStep::AttachThumbnail { path: path.clone() });
        }
        if !self.localizations.is_empty() {
            // Not accepted by videos.insert, so it goes in as an update.
            steps.push(FinalizeStep::Patch {
                part: "localizations".into(),
                body: json!({ "localizations": self.localizations }),
            });
        }
        if let Some(playlist) = &self.playlist_id {
            steps.push(FinalizeStep::AddToCollection {
                collection_id: playlist.clone(),
            });
        }
        steps
    }

    /// Validate and build the request for uploading `video`.
    pub fn upload_request(&self, video: &Path) -> Result<UploadRequest, MetadataError> {
        check_video_path(video)?;
        self.validate()?;
        Ok(UploadRequest {
            metadata: ResourceMetadata {
                title: self.title.trim().to_string(),
                content_type: video_mime_type(video).to_string(),
                body: self.insert_body(),
            },
            finalize: self.finalize_steps(),
        })
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

pub fn check_video_path(path: &Path) -> Result<(), MetadataError> {
    let ext = extension(path);
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Ok(())
    } else {
        Err(MetadataError::UnsupportedVideo(ext))
    }
}

/// MIME type for the upload, falling back to the generic `video/*`.
pub fn video_mime_type(path: &Path) -> &'static str {
    match extension(path).as_str() {
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        _ => "video/*",
    }
}

pub fn image_mime_type(path: &Path) -> &'static str {
    match extension(path).as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn details() -> VideoDetails {
        VideoDetails {
            title: "Sunrise over Kyoto".into(),
            description: "Timelapse from the hills.".into(),
            tags: vec!["travel".into(), "japan".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_hashtags_prepended() {
        let mut d = details();
        d.hashtags = ["#a", "b", " ", "#c", "#d", "#e", "#f"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            d.full_description(),
            "#a #b #c #d #e\n\nTimelapse from the hills."
        );
    }

    #[test]
    fn test_no_hashtags_leaves_description_alone() {
        assert_eq!(details().full_description(), "Timelapse from the hills.");
    }

    #[test]
    fn test_insert_body_defaults() {
        let body = details().insert_body();
        assert_eq!(body["snippet"]["categoryId"], "19");
        assert_eq!(body["snippet"]["tags"], json!(["travel", "japan"]));
        assert_eq!(body["status"]["privacyStatus"], "private");
        assert_eq!(body["status"]["selfDeclaredMadeForKids"], false);
        assert!(body.get("recordingDetails").is_none());
        assert!(body["status"].get("publishAt").is_none());
        assert!(body["snippet"].get("defaultLanguage").is_none());
    }

    #[test]
    fn test_scheduled_publish_forces_private() {
        let mut d = details();
        d.privacy = PrivacyStatus::Public;
        d.publish_at = Some(Utc.with_ymd_and_hms(2026, 11, 1, 9, 30, 0).unwrap());
        let body = d.insert_body();
        assert_eq!(body["status"]["privacyStatus"], "private");
        assert_eq!(body["status"]["publishAt"], "2026-11-01T09:30:00Z");
    }

    #[test]
    fn test_recording_date_noon_utc() {
        let mut d = details();
        d.recording_date = NaiveDate::from_ymd_opt(2025, 3, 14);
        assert_eq!(
            d.insert_body()["recordingDetails"]["recordingDate"],
            "2025-03-14T12:00:00.0Z"
        );
    }

    #[test]
    fn test_validation_limits() {
        let mut d = details();
        d.title = "   ".into();
        assert_eq!(d.validate(), Err(MetadataError::MissingTitle));

        d.title = "x".repeat(101);
        assert_eq!(d.validate(), Err(MetadataError::TitleTooLong(101)));

        // Counted in characters, not bytes
        d.title = "é".repeat(100);
        assert!(d.validate().is_ok());

        d.description = String::new();
        assert_eq!(d.validate(), Err(MetadataError::MissingDescription));

        d.description = "y".repeat(4995);
        d.hashtags = vec!["#abc".into()];
        assert_eq!(d.validate(), Err(MetadataError::DescriptionTooLong(5001)));
    }

    #[test]
    fn test_thumbnail_and_localization_checks() {
        let mut d = details();
        d.thumbnail = Some("cover.gif".into());
        assert_eq!(
            d.validate(),
            Err(MetadataError::UnsupportedThumbnail("gif".into()))
        );

        d.thumbnail = Some("cover.JPG".into());
        d.localizations.insert(
            "fr".into(),
            Localization {
                title: "Lever de soleil".into(),
                description: String::new(),
            },
        );
        assert_eq!(
            d.validate(),
            Err(MetadataError::LocalizationsWithoutDefaultLanguage)
        );
        d.default_language = Some("en".into());
        assert!(d.validate().is_ok());
    }

    #[test]
    fn test_finalize_step_order() {
        let mut d = details();
        d.playlist_id = Some("PL123".into());
        d.thumbnail = Some("cover.png".into());
        d.default_language = Some("en".into());
        d.localizations.insert(
            "de".into(),
            Localization {
                title: "Sonnenaufgang".into(),
                description: "Zeitraffer".into(),
            },
        );
        let names: Vec<String> = d.finalize_steps().iter().map(FinalizeStep::name).collect();
        assert_eq!(names, vec!["thumbnail", "patch:localizations", "playlist"]);

        match &d.finalize_steps()[1] {
            FinalizeStep::Patch { body, .. } => {
                assert_eq!(body["localizations"]["de"]["title"], "Sonnenaufgang");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_upload_request_checks_video_extension() {
        let d = details();
        assert_eq!(
            d.upload_request(Path::new("clip.gif")).unwrap_err(),
            MetadataError::UnsupportedVideo("gif".into())
        );
        let req = d.upload_request(Path::new("/tmp/Clip.MOV")).unwrap();
        assert_eq!(req.metadata.content_type, "video/quicktime");
        assert!(req.finalize.is_empty());
    }

    #[test]
    fn test_mime_fallbacks() {
        assert_eq!(video_mime_type(Path::new("a.webm")), "video/webm");
        assert_eq!(video_mime_type(Path::new("noext")), "video/*");
        assert_eq!(image_mime_type(Path::new("t.jpeg")), "image/jpeg");
    }

    #[test]
    fn test_manifest_entry_deserializes_with_defaults() {
        let d: VideoDetails = serde_json::from_str(
            r#"{"title": "T", "description": "D", "privacy": "unlisted", "recording_date": "2024-05-01"}"#,
        )
        .unwrap();
        assert_eq!(d.privacy, PrivacyStatus::Unlisted);
        assert_eq!(d.recording_date, NaiveDate::from_ymd_opt(2024, 5, 1));
        assert!(d.tags.is_empty());
    }
}
