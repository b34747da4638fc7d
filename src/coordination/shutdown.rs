//! Shutdown signalling for the trading loops
//!
//! A single `GracefulShutdown` owns a watch channel; every loop and every
//! gateway call holds a cloned `ShutdownToken` and races its work against
//! `cancelled()`, so a Ctrl+C interrupts price lookups, order submission,
//! fill polling, retry sleeps and stream reads alike.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::{PairbotError, Result};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Normal graceful shutdown (SIGTERM, SIGINT)
    Graceful,
    /// Loop reached its own terminal condition
    Completed,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Completed => write!(f, "completed"),
        }
    }
}

/// Graceful shutdown coordinator
pub struct GracefulShutdown {
    shutdown_requested: AtomicBool,
    signal_tx: watch::Sender<Option<ShutdownSignal>>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (signal_tx, _) = watch::channel(None);
        Self {
            shutdown_requested: AtomicBool::new(false),
            signal_tx,
        }
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Request shutdown with specified signal type
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already requested, ignoring duplicate signal: {}", signal);
            return;
        }

        info!("Shutdown requested: {}", signal);
        self.signal_tx.send_replace(Some(signal));
    }

    /// Create a token that observes this coordinator
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            signal_rx: self.signal_tx.subscribe(),
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable cancellation handle for async tasks
#[derive(Clone)]
pub struct ShutdownToken {
    signal_rx: watch::Receiver<Option<ShutdownSignal>>,
}

impl ShutdownToken {
    /// Token that is never cancelled
    pub fn never() -> Self {
        let (_, signal_rx) = watch::channel(None);
        Self { signal_rx }
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal_rx.borrow().is_some()
    }

    /// Resolves once shutdown is requested
    pub async fn cancelled(&self) {
        let mut rx = self.signal_rx.clone();
        loop {
            if rx.borrow_and_update().is_some() {
                return;
            }
            if rx.changed().await.is_err() {
                // Coordinator dropped without signalling: never resolves
                std::future::pending::<()>().await;
            }
        }
    }

    /// Run `fut` unless shutdown wins the race
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(PairbotError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(PairbotError::Cancelled),
            result = fut => result,
        }
    }

    /// Sleep that ends early with `Cancelled` on shutdown
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}

/// Helper to install OS signal handlers
pub fn install_signal_handlers(shutdown: Arc<GracefulShutdown>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C");
                shutdown.request_shutdown(ShutdownSignal::Graceful);
            }
            Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_signal_display() {
        assert_eq!(ShutdownSignal::Graceful.to_string(), "graceful");
        assert_eq!(ShutdownSignal::Completed.to_string(), "completed");
    }

    #[tokio::test]
    async fn test_shutdown_request() {
        let shutdown = GracefulShutdown::new();
        let token = shutdown.token();
        assert!(!token.is_cancelled());

        shutdown.request_shutdown(ShutdownSignal::Graceful);
        assert!(shutdown.is_shutdown_requested());
        assert!(token.is_cancelled());

        // A token created after the fact sees the same state
        assert!(shutdown.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_run_is_interrupted() {
        let shutdown = Arc::new(GracefulShutdown::new());
        let token = shutdown.token();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.request_shutdown(ShutdownSignal::Graceful);
        });

        let result: Result<()> = token
            .run(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(PairbotError::Cancelled)));
    }

    #[tokio::test]
    async fn test_never_token_runs_to_completion() {
        let token = ShutdownToken::never();
        let value = token.run(async { Ok(5) }).await.unwrap();
        assert_eq!(value, 5);
        assert!(token.sleep(Duration::from_millis(1)).await.is_ok());
    }
}
