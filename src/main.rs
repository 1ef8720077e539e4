use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures_util::stream::{self, StreamExt};
use indicatif::MultiProgress;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use ytmgr_rs::cli::{self, Command};
use ytmgr_rs::config::{self, Config, UploadJob};
use ytmgr_rs::shutdown;
use ytmgr_rs::upload::progress::format_bytes;
use ytmgr_rs::upload::report::{create_progress_bar, BarReporter};
use ytmgr_rs::upload::{
    spawn_upload, ChunkSource, FileSource, SessionStore, TerminalEvent, Uploader,
};
use ytmgr_rs::youtube::YouTubeTransport;

/// Upload a single video in the foreground.
async fn run_upload(
    config: &Config,
    uploader: &Uploader,
    job: UploadJob,
    shutdown_token: &CancellationToken,
) -> anyhow::Result<TerminalEvent> {
    let request = job.details.upload_request(&job.video)?;
    let mut source = FileSource::open(&job.video)
        .await
        .with_context(|| format!("Failed to open {}", job.video.display()))?;
    let total = source.total_bytes();

    tracing::info!(
        file = %job.video.display(),
        size = %format_bytes(total),
        "Uploading {}",
        job.label
    );

    let pb = create_progress_bar(config.no_progress_bar, total);
    pb.set_prefix(job.label.clone());
    let reporter = BarReporter::new(pb);

    Ok(uploader
        .upload(&request, &mut source, &reporter, &shutdown_token.child_token())
        .await)
}

/// Upload every manifest entry, at most `concurrency` at a time.
///
/// Entries that cannot be started (unreadable file, task panic) are logged and
/// counted as failures; the rest of the batch keeps going.
async fn run_batch(
    config: &Config,
    uploader: Arc<Uploader>,
    jobs: Vec<UploadJob>,
    concurrency: usize,
    shutdown_token: &CancellationToken,
) -> (Vec<TerminalEvent>, usize) {
    let store = SessionStore::new();
    let group = MultiProgress::new();
    let total_jobs = jobs.len();

    tracing::info!(videos = total_jobs, concurrency, "Starting batch upload");

    // On shutdown, report which uploads were still in flight.
    let watcher = {
        let store = store.clone();
        let token = shutdown_token.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            for (_, label, status) in store.snapshot().await {
                if !status.is_finished() {
                    tracing::info!(
                        state = ?status.state,
                        "Cancelling {} at {:.0}%",
                        label,
                        status.percent
                    );
                }
            }
        })
    };

    let results: Vec<Option<TerminalEvent>> = stream::iter(jobs)
        .map(|job| {
            let uploader = Arc::clone(&uploader);
            let store = store.clone();
            let group = group.clone();
            async move {
                let label = job.label.clone();
                let request = match job.details.upload_request(&job.video) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::error!("Skipping {}: {}", label, e);
                        return None;
                    }
                };
                let source = match FileSource::open(&job.video).await {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!(
                            "Skipping {}: cannot open {}: {}",
                            label,
                            job.video.display(),
                            e
                        );
                        return None;
                    }
                };
                let total = source.total_bytes();
                let reporter =
                    BarReporter::in_group(&group, config.no_progress_bar, total, &label);
                let handle = spawn_upload(
                    uploader,
                    request,
                    Box::new(source),
                    Arc::new(reporter),
                    shutdown_token,
                );
                let id = handle.id();
                store.register(label.clone(), &handle).await;
                tracing::debug!(upload = %id, size = %format_bytes(total), "Started {}", label);

                let outcome = handle.wait().await;
                store.remove(id).await;
                match outcome {
                    Ok(event) => Some(event),
                    Err(e) => {
                        tracing::error!("Upload task for {} failed: {}", label, e);
                        None
                    }
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    watcher.abort();

    let not_started = results.iter().filter(|r| r.is_none()).count();
    (results.into_iter().flatten().collect(), not_started)
}

fn print_summary(events: &[TerminalEvent], not_started: usize) {
    let completed = events
        .iter()
        .filter(|e| e.is_success() && e.warnings.is_empty())
        .count();
    let with_warnings = events
        .iter()
        .filter(|e| e.is_success() && !e.warnings.is_empty())
        .count();
    let cancelled = events.iter().filter(|e| e.is_cancelled()).count();
    let failed = events.len() - completed - with_warnings - cancelled + not_started;

    println!();
    println!("Results:");
    println!("  Completed:     {}", completed);
    if with_warnings > 0 {
        println!("  With warnings: {}", with_warnings);
    }
    if cancelled > 0 {
        println!("  Cancelled:     {}", cancelled);
    }
    println!("  Failed:        {}", failed);

    for event in events.iter().filter(|e| e.is_success()) {
        if let Some(url) = &event.resource_url {
            println!("  {}", url);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.global.log_level.as_filter())),
        )
        .init();

    let config = Config::from_cli(&cli.global)?;
    tracing::debug!(?config, "Loaded configuration");

    let transport = Arc::new(YouTubeTransport::new(
        config.access_token.clone(),
        config.upload.socket_timeout,
    )?);
    let uploader = Arc::new(Uploader::new(transport, config.upload.clone()));
    let shutdown_token = shutdown::install_signal_handler()?;

    let (events, not_started) = match cli.command {
        Command::Upload(args) => {
            let job = config::upload_job(args)?;
            let event = run_upload(&config, &uploader, job, &shutdown_token).await?;
            (vec![event], 0)
        }
        Command::Batch(args) => {
            let jobs = config::load_manifest(&args.manifest)?;
            let (events, not_started) = run_batch(
                &config,
                Arc::clone(&uploader),
                jobs,
                args.concurrency,
                &shutdown_token,
            )
            .await;
            print_summary(&events, not_started);
            (events, not_started)
        }
    };

    if config.json {
        for event in &events {
            println!("{}", serde_json::to_string(event)?);
        }
    }

    if shutdown_token.is_cancelled() && events.iter().any(TerminalEvent::is_cancelled) {
        std::process::exit(130);
    }
    if not_started > 0 || events.iter().any(|e| !e.is_success()) {
        std::process::exit(1);
    }
    Ok(())
}
