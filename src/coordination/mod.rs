//! Coordination primitives shared by the trading loops
//!
//! - Graceful shutdown / cancellation tokens
//! - Bounded retry with backoff for retryable gateway failures

pub mod retry;
pub mod shutdown;

pub use retry::RetryPolicy;
pub use shutdown::{install_signal_handlers, GracefulShutdown, ShutdownSignal, ShutdownToken};
