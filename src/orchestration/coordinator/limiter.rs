use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::CoordinatorError;

/// Fixed-size pool of permits for remote calls
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a permit; the slot frees when the permit drops
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, CoordinatorError> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CoordinatorError::Closed("remote call limiter".to_string()))
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
