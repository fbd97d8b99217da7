//! Global cap on concurrently running executions

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, instrument, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LimiterError {
    #[error("no execution slot became free within {waited:?}")]
    Overloaded { waited: Duration },

    /// The limiter was shut down with [`ConcurrencyLimiter::close`]
    #[error("limiter is closed")]
    Closed,
}

/// Counting limiter over a fixed number of execution slots
///
/// Cloning shares the same pool of permits.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held execution slot, released on drop
#[derive(Debug)]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    /// Create a limiter with `capacity` slots
    ///
    /// A capacity of zero is rejected when the configuration is loaded; here it
    /// would make every `acquire` wait forever.
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot
    ///
    /// With a `timeout`, gives up with [`LimiterError::Overloaded`] once it
    /// expires; without one, waits indefinitely. Waiters are served in FIFO order.
    #[instrument(skip(self))]
    pub async fn acquire(&self, timeout: Option<Duration>) -> Result<Permit, LimiterError> {
        let acquire = Arc::clone(&self.semaphore).acquire_owned();
        let permit = match timeout {
            Some(waited) => match tokio::time::timeout(waited, acquire).await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(?waited, capacity = self.capacity, "no execution slot available");
                    return Err(LimiterError::Overloaded { waited });
                }
            },
            None => acquire.await,
        }
        .map_err(|_| LimiterError::Closed)?;

        debug!(available = self.available(), "acquired execution slot");
        Ok(Permit { _permit: permit })
    }

    /// Take a slot only if one is free right now
    pub fn try_acquire(&self) -> Option<Permit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| Permit { _permit: permit })
    }

    /// Stop handing out slots
    ///
    /// Current and future waiters fail with [`LimiterError::Closed`]; permits
    /// already held stay valid until dropped.
    pub fn close(&self) {
        self.semaphore.close();
        debug!("limiter closed");
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Number of free slots
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
