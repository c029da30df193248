use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// The global cap on simultaneously running containers.
///
/// A run holds a [`ContainerSlot`] for its whole duration; dropping the slot
/// (normal return, error or panic unwinding) gives the permit back.
#[derive(Debug, Clone)]
pub struct ContainerBudget {
    max: usize,
    permits: Arc<Semaphore>,
}

#[derive(Debug)]
pub struct ContainerSlot {
    _permit: OwnedSemaphorePermit,
}

impl ContainerBudget {
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            max,
            permits: Arc::new(Semaphore::new(max)),
        }
    }

    pub async fn acquire(&self) -> Result<ContainerSlot, AcquireError> {
        let permit = self.permits.clone().acquire_owned().await?;
        Ok(ContainerSlot { _permit: permit })
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn active(&self) -> usize {
        self.max - self.permits.available_permits()
    }

    pub fn is_exhausted(&self) -> bool {
        self.permits.available_permits() == 0
    }
}
