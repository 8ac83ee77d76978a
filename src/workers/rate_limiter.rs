//! Process-wide cap on concurrent outbound gateway calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;

pub const DEFAULT_GATEWAY_CONCURRENCY: usize = 10;

struct Inner {
    semaphore: Semaphore,
    capacity: usize,
    in_use: AtomicUsize,
}

/// Bounded counting semaphore shared by every reconciliation loop.
///
/// Cloning hands out another handle to the same budget. A release with no
/// matching acquire is dropped, so the budget never grows past `capacity`.
#[derive(Clone)]
pub struct GatewayRateLimiter {
    inner: Arc<Inner>,
}

/// One acquired slot. Dropping it returns the slot.
#[must_use = "dropping the slot releases it immediately"]
pub struct GatewaySlot {
    limiter: GatewayRateLimiter,
    released: bool,
}

impl GatewayRateLimiter {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                semaphore: Semaphore::new(capacity),
                capacity,
                in_use: AtomicUsize::new(0),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::SeqCst)
    }

    /// Waits for a free slot. Cancel-safe: dropping the future before it
    /// resolves takes nothing from the budget.
    pub async fn acquire(&self) -> GatewaySlot {
        match self.inner.semaphore.acquire().await {
            Ok(permit) => permit.forget(),
            // the semaphore is never closed
            Err(_) => warn!("gateway rate limiter semaphore closed"),
        }
        self.inner.in_use.fetch_add(1, Ordering::SeqCst);
        GatewaySlot {
            limiter: self.clone(),
            released: false,
        }
    }

    /// Returns one slot. Returns `false` when nothing is outstanding.
    pub fn release(&self) -> bool {
        let released = self
            .inner
            .in_use
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if released {
            self.inner.semaphore.add_permits(1);
        } else {
            warn!("gateway rate limiter release beyond capacity ignored");
        }
        released
    }
}

impl Default for GatewayRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_GATEWAY_CONCURRENCY)
    }
}

impl std::fmt::Debug for GatewayRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRateLimiter")
            .field("capacity", &self.capacity())
            .field("in_use", &self.in_use())
            .finish()
    }
}

impl GatewaySlot {
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.limiter.release();
        }
    }
}

impl Drop for GatewaySlot {
    fn drop(&mut self) {
        self.release_once();
    }
}
