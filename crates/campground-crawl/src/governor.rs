use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Caps the number of cells queried at the same time.
///
/// Waiters are served in FIFO order by the underlying semaphore, so a
/// waiting cell is never starved by later ones.
#[derive(Debug, Clone)]
pub struct ConcurrencyGovernor {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl ConcurrencyGovernor {
    /// Creates a governor with `limit` slots, at least one
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Configured number of slots
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots currently held by running cells
    pub fn in_flight(&self) -> usize {
        self.limit - self.semaphore.available_permits()
    }

    /// Waits for a free slot.
    ///
    /// Returns `None` once `cancel` fires, so no new cell starts after
    /// cancellation even if a slot frees up at the same moment.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Option<OwnedSemaphorePermit> {
        if cancel.is_cancelled() {
            return None;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = self.semaphore.clone().acquire_owned() => permit.ok(),
        }
    }
}
