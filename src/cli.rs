use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::types::*;

#[derive(Parser, Debug)]
#[command(
    name = "ytmgr-rs",
    version,
    about = "Resumable YouTube uploads with stall detection and retry"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub global: GlobalArgs,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload a single video
    Upload(UploadArgs),

    /// Upload every video listed in a JSON manifest
    Batch(BatchArgs),
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// OAuth 2.0 access token with the youtube.upload scope.
    /// Prefer the YOUTUBE_ACCESS_TOKEN environment variable: command-line
    /// values are visible in process listings.
    #[arg(long, env = "YOUTUBE_ACCESS_TOKEN", hide_env_values = true, global = true)]
    pub access_token: Option<String>,

    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Disable progress bar
    #[arg(long, global = true)]
    pub no_progress_bar: bool,

    /// Print terminal events as JSON lines on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Chunk size in MiB
    #[arg(long, default_value_t = 5, global = true)]
    pub chunk_size_mib: u64,

    /// Seconds a request may go without moving any data before it is abandoned
    #[arg(long, default_value_t = 60, global = true)]
    pub socket_timeout: u64,

    /// Seconds without upload progress before the session is declared stalled
    #[arg(long, default_value_t = 120, global = true)]
    pub stall_timeout: u64,

    /// Retries per chunk offset after the first attempt
    #[arg(long, default_value_t = 5, global = true)]
    pub max_retries: u32,

    /// Base delay in seconds before the first retry (doubles each time)
    #[arg(long, default_value_t = 2, global = true)]
    pub retry_delay: u64,

    /// Upper bound in seconds for any single retry delay
    #[arg(long, default_value_t = 32, global = true)]
    pub max_retry_delay: u64,

    /// Random extra delay of up to N seconds added to each retry
    #[arg(long, default_value_t = 0, global = true)]
    pub retry_jitter: u64,
}

#[derive(Args, Debug, Clone)]
pub struct UploadArgs {
    /// Video file (mp4, mov, avi, mkv, webm)
    pub file: PathBuf,

    /// Video title (max 100 characters)
    #[arg(short = 't', long)]
    pub title: String,

    /// Video description
    #[arg(short = 'd', long, conflicts_with = "description_file")]
    pub description: Option<String>,

    /// Read the description from a file
    #[arg(long)]
    pub description_file: Option<PathBuf>,

    /// Tag (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Hashtag shown above the description (repeatable, first 5 are used)
    #[arg(long = "hashtag")]
    pub hashtags: Vec<String>,

    /// YouTube category id (default: 19, Travel & Events)
    #[arg(long)]
    pub category_id: Option<String>,

    /// Privacy status
    #[arg(long, value_enum, default_value = "private")]
    pub privacy: PrivacyStatus,

    /// Scheduled publish time: ISO datetime (2026-01-02T14:30:00, local time),
    /// RFC 3339 with offset, or an interval from now (12h, 3d).
    /// Forces the video to private until then.
    #[arg(long)]
    pub publish_at: Option<String>,

    /// Recording date (YYYY-MM-DD)
    #[arg(long)]
    pub recording_date: Option<String>,

    /// Language of the title and description (e.g. en)
    #[arg(long)]
    pub default_language: Option<String>,

    /// JSON file of localized titles/descriptions keyed by language code
    #[arg(long)]
    pub localizations: Option<PathBuf>,

    /// Thumbnail image (jpg, jpeg, png, webp)
    #[arg(long)]
    pub thumbnail: Option<PathBuf>,

    /// Playlist to add the video to
    #[arg(long)]
    pub playlist: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    /// JSON manifest: {"videos": [{"file": "...", "title": "...", ...}]}
    pub manifest: PathBuf,

    /// Number of uploads running at the same time
    #[arg(long, default_value_t = 2)]
    pub concurrency: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_defaults() {
        let cli = Cli::try_parse_from([
            "ytmgr-rs",
            "upload",
            "clip.mp4",
            "--title",
            "Clip",
            "--description",
            "Desc",
        ])
        .unwrap();
        assert_eq!(cli.global.chunk_size_mib, 5);
        assert_eq!(cli.global.socket_timeout, 60);
        assert_eq!(cli.global.stall_timeout, 120);
        assert_eq!(cli.global.max_retries, 5);
        assert_eq!(cli.global.log_level, LogLevel::Info);
        match cli.command {
            Command::Upload(args) => {
                assert_eq!(args.file, PathBuf::from("clip.mp4"));
                assert_eq!(args.privacy, PrivacyStatus::Private);
                assert!(args.tags.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "ytmgr-rs",
            "batch",
            "videos.json",
            "--concurrency",
            "4",
            "--stall-timeout",
            "300",
            "--no-progress-bar",
        ])
        .unwrap();
        assert_eq!(cli.global.stall_timeout, 300);
        assert!(cli.global.no_progress_bar);
        match cli.command {
            Command::Batch(args) => assert_eq!(args.concurrency, 4),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_repeatable_tags() {
        let cli = Cli::try_parse_from([
            "ytmgr-rs", "upload", "a.mp4", "-t", "T", "-d", "D", "--tag", "x", "--tag", "y",
            "--hashtag", "#z",
        ])
        .unwrap();
        let Command::Upload(args) = cli.command else {
            panic!("expected upload");
        };
        assert_eq!(args.tags, vec!["x", "y"]);
        assert_eq!(args.hashtags, vec!["#z"]);
    }

    #[test]
    fn test_description_sources_conflict() {
        let result = Cli::try_parse_from([
            "ytmgr-rs",
            "upload",
            "a.mp4",
            "-t",
            "T",
            "-d",
            "D",
            "--description-file",
            "d.txt",
        ]);
        assert!(result.is_err());
    }
}
