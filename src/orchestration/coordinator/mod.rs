//! # Concurrency and Resource Coordination
//!
//! Primitives shared by the dispatcher, the poller and the forecast executor.
//!
//! ## Key Components
//!
//! - [`ConcurrencyLimiter`] - bounds the number of remote calls in flight
//! - [`ResourceReservation`] - exclusive, time-limited access to a resource
//!   that must not be used from two tasks at once
//! - [`pause`] - a wait that ends early when the activation is cancelled

pub mod limiter;
pub mod reservation;

use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use limiter::ConcurrencyLimiter;
pub use reservation::{ReservationGuard, ResourceReservation};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("Timed out after {waited:?} waiting for resource '{resource}'")]
    Timeout { resource: String, waited: Duration },

    #[error("Resource '{0}' is closed")]
    Closed(String),

    #[error("Exclusive task failed: {0}")]
    Join(String),
}

/// Sleep for `duration` unless `cancel` fires first.
///
/// Returns `false` when the wait was cut short by cancellation.
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
