//! Batch runner: repeated games per (model, mode) with bounded concurrency.
//!
//! ```text
//! BatchSpec ──> BatchRunner ──> [Game 0] [Game 1] ... [Game n-1]   (≤ workers at once)
//!                    │                 │
//!                    │                 └──> ResultSink (per-game records)
//!                    └──> BatchSummary ──> ResultSink (summary record)
//! ```
//!
//! Games share nothing but the model client and the sink. A failed game is
//! recorded and skipped; cancellation stops new games from starting and makes
//! in-flight games stop at their next model call without committing a
//! partial round.

mod runner;
mod stats;

pub use runner::{BatchRunner, BatchSpec};
pub use stats::{BatchSummary, FailedRun, ModelStats, RoleStats};

use std::sync::Arc;

use tokio::sync::watch;

/// Owner side of a cancellation signal
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Fresh, not yet cancelled
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal every token derived from this handle
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Token observed by games
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation signal
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Token that is never cancelled
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; pends forever if it never can be
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
