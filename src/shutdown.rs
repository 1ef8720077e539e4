//! Turns the first termination signal into upload cancellation.
//!
//! Uploads never get killed mid-session by a signal. Each one runs on a
//! child of the returned token and drains on its own: an in-flight chunk
//! call or backoff wait is abandoned, the session ends `Failed` with kind
//! `cancelled`, and its terminal event is still delivered so batch
//! summaries and `--json` output stay complete. Only a second signal skips
//! the drain and exits with status 130.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Register SIGINT, SIGTERM and SIGHUP (Ctrl+C only off unix) and return
/// the parent token for every upload of this run.
pub fn install_signal_handler() -> anyhow::Result<CancellationToken> {
    let token = CancellationToken::new();
    let count = Arc::new(AtomicU32::new(0));

    // Registered up front so a failure surfaces to the caller.
    #[cfg(unix)]
    let (mut sigterm, mut sighup) = {
        use anyhow::Context;
        use tokio::signal::unix::{signal, SignalKind};
        (
            signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?,
            signal(SignalKind::hangup()).context("failed to register SIGHUP handler")?,
        )
    };

    let handler_token = token.clone();
    tokio::spawn(async move {
        loop {
            #[cfg(unix)]
            {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                    _ = sighup.recv() => {}
                }
            }

            #[cfg(not(unix))]
            {
                if tokio::signal::ctrl_c().await.is_err() {
                    tracing::warn!("Ctrl+C listener unavailable, shutdown signals are ignored");
                    return;
                }
            }

            let prev = count.fetch_add(1, Ordering::SeqCst);
            if prev == 0 {
                tracing::info!("Received shutdown signal, cancelling uploads in flight");
                tracing::info!("Press Ctrl+C again to exit without waiting for them");
                handler_token.cancel();
            } else {
                tracing::warn!("Force exit requested");
                std::process::exit(130);
            }
        }
    });

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_upload_tokens_follow_shutdown_but_not_each_other() {
        let shutdown = CancellationToken::new();
        let a = shutdown.child_token();
        let b = shutdown.child_token();
        a.cancel();
        assert!(!b.is_cancelled());
        assert!(!shutdown.is_cancelled());
        shutdown.cancel();
        assert!(b.is_cancelled());
    }

    /// Verify that `install_signal_handler` returns a live, uncancelled token
    /// (signal delivery can't be safely tested in a shared test binary).
    #[tokio::test]
    async fn install_returns_live_token() {
        let token = install_signal_handler().unwrap();
        assert!(!token.is_cancelled());
    }
}
