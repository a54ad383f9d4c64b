//! # reddit-dl
//!
//! Typed Reddit API client focused on comment trees.
//!
//! ## Design Philosophy
//!
//! reddit-dl is designed to be:
//! - **Safe on hostile input** - Any byte sequence parses to a value or a typed error, never a panic or a stack overflow
//! - **Bounded** - Reply trees are cut at a configurable depth and batches never exceed their concurrency ceiling
//! - **Cancellable** - Every wait honors a [`CancellationToken`](tokio_util::sync::CancellationToken)
//! - **Library-first** - No CLI, no logging subscriber; bring your own
//!
//! ## Quick Start
//!
//! ```no_run
//! use reddit_dl::{CommentsFetcher, CommentsRequest, Config, cancel_on_signal};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fetcher = CommentsFetcher::from_config(&Config::default())?;
//!
//!     let cancel = CancellationToken::new();
//!     cancel_on_signal(cancel.clone());
//!
//!     let requests = vec![
//!         CommentsRequest::new("abc123").in_subreddit("rust"),
//!         CommentsRequest::new("def456"),
//!     ];
//!     let results = fetcher.fetch_many(&cancel, requests).await?;
//!
//!     for (index, tree) in results.successes() {
//!         println!("{index}: {} ({} comments)", tree.post.title, tree.walk().count());
//!     }
//!     for (index, error) in results.errors() {
//!         eprintln!("{index}: {error}");
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

use tokio_util::sync::CancellationToken;

/// Bearer-token providers
pub mod auth;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Single and batched comment fetching
pub mod fetcher;
/// Envelope parsing
pub mod parser;
/// Request rate limiting
pub mod rate_limiter;
/// Retry logic with exponential backoff
pub mod retry;
/// HTTP transport
pub mod transport;
/// Core types
pub mod types;
/// Request field validation
pub mod validation;

// Re-export commonly used types
pub use config::{Config, FailurePolicy};
pub use error::{Error, ErrorKind, ParseError, Result};
pub use fetcher::{BatchResults, CommentsFetcher, CommentsFetcherBuilder};
pub use parser::Parser;
pub use transport::{ApiRequest, HttpTransport, Transport};
pub use types::{
    Comment, CommentSort, CommentsRequest, CommentsResult, Envelope, Kind, Listing, More, Post,
    Reply, Thing,
};

/// Cancel `token` when the process receives a termination signal
///
/// - **Unix:** SIGTERM and SIGINT, falling back to whichever can be registered.
/// - **Windows/other:** Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// The listener runs on its own task and also stops when `token` is
/// cancelled for any other reason.
pub fn cancel_on_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => {
                tracing::info!("Cancelling in-flight fetches");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signal_listener_stops_with_its_token() {
        let token = CancellationToken::new();
        let listener = cancel_on_signal(token.clone());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .expect("listener did not stop")
            .unwrap();
    }
}
