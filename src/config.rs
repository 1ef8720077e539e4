use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::cli::{GlobalArgs, UploadArgs};
use crate::retry::RetryConfig;
use crate::upload::UploadConfig;
use crate::youtube::{Localization, VideoDetails};

/// Chunk size bounds. The platform needs chunks in multiples of 256 KiB,
/// which any whole number of MiB satisfies.
const MIN_CHUNK_MIB: u64 = 1;
const MAX_CHUNK_MIB: u64 = 1024;

/// Application configuration shared by every subcommand.
pub struct Config {
    pub access_token: String,
    pub upload: UploadConfig,
    pub no_progress_bar: bool,
    pub json: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("access_token", &"<redacted>")
            .field("upload", &self.upload)
            .field("no_progress_bar", &self.no_progress_bar)
            .finish_non_exhaustive()
    }
}

/// One video to upload, validated and ready to go.
#[derive(Debug, Clone)]
pub struct UploadJob {
    /// Short name used in logs and progress bars.
    pub label: String,
    pub video: PathBuf,
    pub details: VideoDetails,
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

fn expand_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => expand_tilde(s),
        None => path.to_path_buf(),
    }
}

impl Config {
    pub fn from_cli(args: &GlobalArgs) -> Result<Self> {
        let access_token = args
            .access_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .context("missing access token: pass --access-token or set YOUTUBE_ACCESS_TOKEN")?;

        if !(MIN_CHUNK_MIB..=MAX_CHUNK_MIB).contains(&args.chunk_size_mib) {
            anyhow::bail!(
                "--chunk-size-mib must be between {} and {}",
                MIN_CHUNK_MIB,
                MAX_CHUNK_MIB
            );
        }
        let chunk_size = args.chunk_size_mib * 1024 * 1024;
        if args.socket_timeout == 0 || args.stall_timeout == 0 {
            anyhow::bail!("--socket-timeout and --stall-timeout must be greater than zero");
        }
        if args.max_retry_delay < args.retry_delay {
            anyhow::bail!(
                "--max-retry-delay ({}s) is shorter than --retry-delay ({}s)",
                args.max_retry_delay,
                args.retry_delay
            );
        }
        if args.stall_timeout < args.socket_timeout {
            tracing::warn!(
                stall_timeout = args.stall_timeout,
                socket_timeout = args.socket_timeout,
                "Stall timeout is shorter than the socket timeout; one slow request will stall the upload"
            );
        }

        Ok(Self {
            access_token,
            upload: UploadConfig {
                chunk_size,
                socket_timeout: Duration::from_secs(args.socket_timeout),
                stall_timeout: Duration::from_secs(args.stall_timeout),
                retry: RetryConfig {
                    max_retries: args.max_retries,
                    base_delay_secs: args.retry_delay,
                    max_delay_secs: args.max_retry_delay,
                    jitter_secs: args.retry_jitter,
                },
            },
            no_progress_bar: args.no_progress_bar,
            json: args.json,
        })
    }
}

/// Build and validate a job from `upload` arguments.
pub fn upload_job(args: UploadArgs) -> Result<UploadJob> {
    upload_job_at(args, Utc::now())
}

fn upload_job_at(args: UploadArgs, now: DateTime<Utc>) -> Result<UploadJob> {
    let video = expand_path(&args.file);

    let description = match (&args.description, &args.description_file) {
        (Some(d), _) => d.clone(),
        (None, Some(path)) => {
            let path = expand_path(path);
            std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read description file: {}", path.display()))?
        }
        (None, None) => String::new(),
    };

    let localizations = match &args.localizations {
        Some(path) => load_localizations(&expand_path(path))?,
        None => BTreeMap::new(),
    };

    let details = VideoDetails {
        title: args.title,
        description,
        tags: args.tags,
        hashtags: args.hashtags,
        category_id: args.category_id,
        privacy: args.privacy,
        publish_at: args
            .publish_at
            .as_deref()
            .map(|s| parse_publish_at(s, now))
            .transpose()?,
        recording_date: args
            .recording_date
            .as_deref()
            .map(parse_recording_date)
            .transpose()?,
        default_language: args.default_language,
        localizations,
        thumbnail: args.thumbnail.as_deref().map(expand_path),
        playlist_id: args.playlist,
    };

    finish_job(video, details)
}

fn finish_job(video: PathBuf, details: VideoDetails) -> Result<UploadJob> {
    let meta = std::fs::metadata(&video)
        .with_context(|| format!("Cannot read video file: {}", video.display()))?;
    if !meta.is_file() {
        anyhow::bail!("{} is not a file", video.display());
    }
    if meta.len() == 0 {
        anyhow::bail!("{} is empty", video.display());
    }
    if let Some(thumb) = &details.thumbnail {
        if !thumb.is_file() {
            anyhow::bail!("Thumbnail not found: {}", thumb.display());
        }
    }
    details
        .upload_request(&video)
        .with_context(|| format!("Invalid metadata for {}", video.display()))?;

    let label = video
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| video.display().to_string());
    Ok(UploadJob {
        label,
        video,
        details,
    })
}

fn load_localizations(path: &Path) -> Result<BTreeMap<String, Localization>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read localizations: {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Invalid localizations JSON: {}", path.display()))
}

#[derive(Debug, Deserialize)]
struct Manifest {
    videos: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    file: String,
    #[serde(flatten)]
    details: VideoDetails,
}

/// Read a batch manifest. Relative video and thumbnail paths are resolved
/// against the manifest's directory.
pub fn load_manifest(path: &Path) -> Result<Vec<UploadJob>> {
    let path = expand_path(path);
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
    let manifest: Manifest = serde_json::from_str(&text)
        .with_context(|| format!("Invalid manifest JSON: {}", path.display()))?;
    if manifest.videos.is_empty() {
        anyhow::bail!("Manifest {} lists no videos", path.display());
    }

    let base = path.parent().unwrap_or(Path::new("."));
    let resolve = |p: &Path| -> PathBuf {
        let p = expand_path(p);
        if p.is_absolute() {
            p
        } else {
            base.join(p)
        }
    };

    manifest
        .videos
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            let mut details = entry.details;
            details.thumbnail = details.thumbnail.as_deref().map(resolve);
            finish_job(resolve(Path::new(&entry.file)), details)
                .with_context(|| format!("Manifest entry {} ({})", i + 1, entry.file))
        })
        .collect()
}

/// Parse a publish time.
///
/// Accepts:
/// - Interval from now: `"12h"`, `"3d"`
/// - RFC 3339: `"2026-01-02T14:30:00Z"`, `"2026-01-02T14:30:00+09:00"`
/// - ISO datetime: `"2026-01-02T14:30:00"` (local time)
///
/// The result must lie in the future.
pub(crate) fn parse_publish_at(s: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let parsed = parse_time_spec(s, now).with_context(|| {
        format!(
            "Cannot parse '{}' as a publish time. Expected RFC 3339 (2026-01-02T14:30:00Z), \
             local datetime (2026-01-02T14:30:00), or interval (12h, 3d)",
            s
        )
    })?;
    if parsed <= now {
        anyhow::bail!("Publish time {} is in the past", parsed.to_rfc3339());
    }
    Ok(parsed)
}

fn parse_time_spec(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Some(days) = s.strip_suffix('d').and_then(|d| d.parse::<i64>().ok()) {
        return Some(now + chrono::Duration::days(days));
    }
    if let Some(hours) = s.strip_suffix('h').and_then(|h| h.parse::<i64>().ok()) {
        return Some(now + chrono::Duration::hours(hours));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return dt
            .and_local_timezone(Local)
            .single()
            .map(|local| local.with_timezone(&Utc));
    }
    None
}

pub(crate) fn parse_recording_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .with_context(|| format!("Cannot parse '{}' as a recording date (expected YYYY-MM-DD)", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LogLevel, PrivacyStatus};
    use chrono::TimeZone;
    use std::io::Write;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
    }

    fn global(token: Option<&str>) -> GlobalArgs {
        GlobalArgs {
            access_token: token.map(String::from),
            log_level: LogLevel::Info,
            no_progress_bar: true,
            json: false,
            chunk_size_mib: 5,
            socket_timeout: 60,
            stall_timeout: 120,
            max_retries: 5,
            retry_delay: 2,
            max_retry_delay: 32,
            retry_jitter: 0,
        }
    }

    fn upload_args(file: &Path) -> UploadArgs {
        UploadArgs {
            file: file.to_path_buf(),
            title: "Clip".into(),
            description: Some("Desc".into()),
            description_file: None,
            tags: Vec::new(),
            hashtags: Vec::new(),
            category_id: None,
            privacy: PrivacyStatus::Public,
            publish_at: None,
            recording_date: None,
            default_language: None,
            localizations: None,
            thumbnail: None,
            playlist: None,
        }
    }

    fn video_in(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"not really a video").unwrap();
        path
    }

    #[test]
    fn test_expand_tilde_with_home() {
        let result = expand_tilde("~/Videos");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(result, home.join("Videos"));
        }
    }

    #[test]
    fn test_expand_tilde_no_prefix() {
        assert_eq!(expand_tilde("/abs/clip.mp4"), PathBuf::from("/abs/clip.mp4"));
        assert_eq!(expand_tilde("rel/clip.mp4"), PathBuf::from("rel/clip.mp4"));
    }

    #[test]
    fn test_from_cli_defaults() {
        let cfg = Config::from_cli(&global(Some("tok"))).unwrap();
        assert_eq!(cfg.upload.chunk_size, 5 * 1024 * 1024);
        assert_eq!(cfg.upload.socket_timeout, Duration::from_secs(60));
        assert_eq!(cfg.upload.stall_timeout, Duration::from_secs(120));
        assert_eq!(cfg.upload.retry.max_retries, 5);
        assert_eq!(cfg.upload.retry.base_delay_secs, 2);
        assert_eq!(cfg.upload.retry.max_delay_secs, 32);
        assert!(!format!("{cfg:?}").contains("tok"));
    }

    #[test]
    fn test_from_cli_requires_token() {
        assert!(Config::from_cli(&global(None)).is_err());
        assert!(Config::from_cli(&global(Some("  "))).is_err());
    }

    #[test]
    fn test_from_cli_rejects_bad_tunables() {
        let mut args = global(Some("tok"));
        args.chunk_size_mib = 0;
        assert!(Config::from_cli(&args).is_err());

        let mut args = global(Some("tok"));
        args.chunk_size_mib = u64::MAX;
        let err = Config::from_cli(&args).unwrap_err();
        assert!(err.to_string().contains("--chunk-size-mib"));

        let mut args = global(Some("tok"));
        args.chunk_size_mib = MAX_CHUNK_MIB + 1;
        assert!(Config::from_cli(&args).is_err());

        let mut args = global(Some("tok"));
        args.retry_delay = 40;
        assert!(Config::from_cli(&args).is_err());
    }

    #[test]
    fn test_from_cli_allows_disabling_retries() {
        let mut args = global(Some("tok"));
        args.max_retries = 0;
        args.chunk_size_mib = MAX_CHUNK_MIB;
        let cfg = Config::from_cli(&args).unwrap();
        assert_eq!(cfg.upload.retry.max_retries, 0);
        assert_eq!(cfg.upload.chunk_size, MAX_CHUNK_MIB * 1024 * 1024);
    }

    #[test]
    fn test_publish_at_formats() {
        assert_eq!(
            parse_publish_at("3d", now()).unwrap(),
            now() + chrono::Duration::days(3)
        );
        assert_eq!(
            parse_publish_at("12h", now()).unwrap(),
            now() + chrono::Duration::hours(12)
        );
        assert_eq!(
            parse_publish_at("2026-11-01T09:00:00+09:00", now()).unwrap(),
            Utc.with_ymd_and_hms(2026, 11, 1, 0, 0, 0).unwrap()
        );
        assert!(parse_publish_at("2026-12-24T18:00:00", now()).is_ok());
    }

    #[test]
    fn test_publish_at_must_be_future() {
        let err = parse_publish_at("2020-01-01T00:00:00Z", now()).unwrap_err();
        assert!(err.to_string().contains("in the past"));
        assert!(parse_publish_at("tomorrow", now()).is_err());
    }

    #[test]
    fn test_recording_date() {
        assert_eq!(
            parse_recording_date("2025-03-14").unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
        );
        assert!(parse_recording_date("14/03/2025").is_err());
    }

    #[test]
    fn test_upload_job_builds_details() {
        let dir = tempfile::tempdir().unwrap();
        let video = video_in(dir.path(), "trip.mp4");
        let mut args = upload_args(&video);
        args.publish_at = Some("2d".into());
        args.recording_date = Some("2026-09-30".into());
        let job = upload_job_at(args, now()).unwrap();

        assert_eq!(job.label, "trip.mp4");
        assert_eq!(job.details.effective_privacy(), PrivacyStatus::Private);
        assert_eq!(job.details.recording_date, NaiveDate::from_ymd_opt(2026, 9, 30));
    }

    #[test]
    fn test_upload_job_description_file_and_localizations() {
        let dir = tempfile::tempdir().unwrap();
        let video = video_in(dir.path(), "trip.mkv");
        let desc = dir.path().join("desc.txt");
        std::fs::write(&desc, "From a file").unwrap();
        let locs = dir.path().join("locs.json");
        std::fs::write(&locs, r#"{"fr": {"title": "Voyage", "description": "Depuis un fichier"}}"#)
            .unwrap();

        let mut args = upload_args(&video);
        args.description = None;
        args.description_file = Some(desc);
        args.localizations = Some(locs);
        args.default_language = Some("en".into());
        let job = upload_job_at(args, now()).unwrap();

        assert_eq!(job.details.description, "From a file");
        assert_eq!(job.details.localizations["fr"].title, "Voyage");
    }

    #[test]
    fn test_upload_job_rejects_bad_inputs() {
        let dir = tempfile::tempdir().unwrap();

        let missing = upload_job_at(upload_args(&dir.path().join("nope.mp4")), now());
        assert!(missing.is_err());

        let gif = video_in(dir.path(), "anim.gif");
        assert!(upload_job_at(upload_args(&gif), now()).is_err());

        let empty = dir.path().join("empty.mp4");
        std::fs::File::create(&empty).unwrap();
        let err = upload_job_at(upload_args(&empty), now()).unwrap_err();
        assert!(err.to_string().contains("is empty"));

        let video = video_in(dir.path(), "ok.mp4");
        let mut args = upload_args(&video);
        args.description = None;
        assert!(upload_job_at(args, now()).is_err());
    }

    #[test]
    fn test_load_manifest_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        video_in(dir.path(), "a.mp4");
        video_in(dir.path(), "b.webm");
        std::fs::write(dir.path().join("cover.png"), b"png").unwrap();

        let manifest = dir.path().join("videos.json");
        let mut f = std::fs::File::create(&manifest).unwrap();
        write!(
            f,
            r#"{{"videos": [
                {{"file": "a.mp4", "title": "A", "description": "first", "thumbnail": "cover.png"}},
                {{"file": "b.webm", "title": "B", "description": "second", "privacy": "unlisted",
                  "playlist_id": "PL1", "tags": ["x"]}}
            ]}}"#
        )
        .unwrap();

        let jobs = load_manifest(&manifest).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].video, dir.path().join("a.mp4"));
        assert_eq!(jobs[0].details.thumbnail, Some(dir.path().join("cover.png")));
        assert_eq!(jobs[1].details.privacy, PrivacyStatus::Unlisted);
        assert_eq!(jobs[1].details.playlist_id.as_deref(), Some("PL1"));
    }

    #[test]
    fn test_load_manifest_reports_bad_entry() {
        let dir = tempfile::tempdir().unwrap();
        video_in(dir.path(), "a.mp4");
        let manifest = dir.path().join("videos.json");
        std::fs::write(
            &manifest,
            r#"{"videos": [{"file": "a.mp4", "title": "A", "description": "d"},
                           {"file": "missing.mp4", "title": "B", "description": "d"}]}"#,
        )
        .unwrap();
        let err = load_manifest(&manifest).unwrap_err();
        assert!(format!("{err:#}").contains("Manifest entry 2"));
    }

    #[test]
    fn test_load_manifest_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("videos.json");
        std::fs::write(&manifest, r#"{"videos": []}"#).unwrap();
        assert!(load_manifest(&manifest).is_err());
    }
}
