use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use super::CoordinatorError;

/// Exclusive access to a named resource, released when the guard drops
#[derive(Debug)]
pub struct ReservationGuard {
    resource: Arc<str>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        debug!(resource = %self.resource, "Released reservation");
    }
}

/// Semaphore of size one with a bounded wait
#[derive(Debug, Clone)]
pub struct ResourceReservation {
    name: Arc<str>,
    semaphore: Arc<Semaphore>,
    default_timeout: Duration,
}

impl ResourceReservation {
    pub fn new(name: impl Into<String>, default_timeout: Duration) -> Self {
        Self {
            name: Arc::from(name.into()),
            semaphore: Arc::new(Semaphore::new(1)),
            default_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn reserve(&self) -> Result<ReservationGuard, CoordinatorError> {
        self.reserve_with_timeout(self.default_timeout).await
    }

    pub async fn reserve_with_timeout(
        &self,
        timeout: Duration,
    ) -> Result<ReservationGuard, CoordinatorError> {
        let permit = tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| {
                warn!(resource = %self.name, waited_ms = timeout.as_millis() as u64, "Reservation timed out");
                CoordinatorError::Timeout {
                    resource: self.name.to_string(),
                    waited: timeout,
                }
            })?
            .map_err(|_| CoordinatorError::Closed(self.name.to_string()))?;

        debug!(resource = %self.name, "Acquired reservation");
        Ok(ReservationGuard {
            resource: self.name.clone(),
            _permit: permit,
        })
    }

    /// Run `work` on the blocking pool while holding the reservation.
    ///
    /// The guard moves into the blocking task, so the reservation outlives a
    /// dropped caller until `work` has actually returned.
    pub async fn run_exclusive<F, T>(&self, work: F) -> Result<T, CoordinatorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.reserve().await?;
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            work()
        })
        .await
        .map_err(|e| CoordinatorError::Join(e.to_string()))
    }

    pub fn is_reserved(&self) -> bool {
        self.semaphore.available_permits() == 0
    }
}
