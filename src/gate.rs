//! Per-backend concurrency gate.
//!
//! A fair (FIFO) semaphore bounds how many upstream calls a backend has in
//! flight. Callers over the limit wait in arrival order instead of being
//! rejected; an optional queue bound turns excess waiters into `QueueFull`.

use crate::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

pub struct ConcurrencyGate {
    name: String,
    capacity: usize,
    semaphore: Arc<Semaphore>,
    max_queued: Option<usize>,
    queued: Arc<AtomicUsize>,
}

impl ConcurrencyGate {
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        max_queued: Option<usize>,
    ) -> Result<Self, Error> {
        let name = name.into();
        if capacity == 0 {
            return Err(Error::config(format!(
                "{name} max_concurrency must be at least 1"
            )));
        }

        Ok(Self {
            name,
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
            max_queued,
            queued: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Wait for a slot. Waiters are admitted in the order they arrived.
    ///
    /// Dropping the returned future before it resolves gives up the place in
    /// line without consuming a slot.
    pub async fn acquire(&self) -> Result<GatePermit, Error> {
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(self.admit(permit, None));
        }

        let mut slot = self.enter_queue()?;
        debug!(gate = %self.name, queued = self.queued(), "Waiting for concurrency slot");

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Shutdown)?;

        slot.admitted = true;
        Ok(self.admit(permit, Some(slot.entered_at)))
    }

    fn enter_queue(&self) -> Result<QueueSlot, Error> {
        let limit = self.max_queued;
        self.queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |waiting| match limit {
                Some(limit) if waiting >= limit => None,
                _ => Some(waiting + 1),
            })
            .map_err(|_| Error::QueueFull {
                backend: self.name.clone(),
                limit: limit.unwrap_or_default(),
            })?;

        Ok(QueueSlot {
            gate: self.name.clone(),
            queued: Arc::clone(&self.queued),
            entered_at: Instant::now(),
            admitted: false,
        })
    }

    fn admit(&self, permit: OwnedSemaphorePermit, queued_since: Option<Instant>) -> GatePermit {
        let wait_ms = queued_since.map(|since| since.elapsed().as_millis());
        debug!(gate = %self.name, in_use = self.in_use(), wait_ms, "Concurrency slot acquired");
        GatePermit {
            _permit: permit,
            gate: self.name.clone(),
            acquired_at: Instant::now(),
        }
    }

    /// Stop admitting requests. Current and future waiters fail with `Shutdown`;
    /// permits already handed out stay valid until released.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of permits currently held.
    pub fn in_use(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    /// Number of callers waiting for a permit.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ConcurrencyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyGate")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("in_use", &self.in_use())
            .field("queued", &self.queued())
            .finish()
    }
}

/// A caller's place in line; leaves the line on drop.
struct QueueSlot {
    gate: String,
    queued: Arc<AtomicUsize>,
    entered_at: Instant,
    admitted: bool,
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        self.queued.fetch_sub(1, Ordering::SeqCst);
        if !self.admitted {
            debug!(
                gate = %self.gate,
                waited_ms = self.entered_at.elapsed().as_millis(),
                "Caller left queue before admission"
            );
        }
    }
}

/// One unit of a backend's capacity.
///
/// The slot goes back to the gate when the permit is dropped, whichever way
/// the request ends.
#[must_use = "the concurrency slot is released as soon as the permit is dropped"]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    gate: String,
    acquired_at: Instant,
}

impl GatePermit {
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        debug!(
            gate = %self.gate,
            held_ms = self.acquired_at.elapsed().as_millis(),
            "Concurrency slot released"
        );
    }
}

impl std::fmt::Debug for GatePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatePermit").field("gate", &self.gate).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_err, assert_ready_ok, task};

    #[test]
    fn test_zero_capacity_rejected() {
        let error = ConcurrencyGate::new("text", 0, None).unwrap_err();
        assert!(matches!(error, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_counts_follow_permits() {
        let gate = ConcurrencyGate::new("text", 2, None).unwrap();
        assert_eq!(gate.in_use(), 0);

        let first = gate.acquire().await.unwrap();
        let second = gate.acquire().await.unwrap();
        assert_eq!(gate.in_use(), 2);
        assert_eq!(gate.queued(), 0);

        first.release();
        assert_eq!(gate.in_use(), 1);
        drop(second);
        assert_eq!(gate.in_use(), 0);
    }

    #[tokio::test]
    async fn test_waiters_admitted_in_arrival_order() {
        let gate = ConcurrencyGate::new("text", 1, None).unwrap();
        let held = gate.acquire().await.unwrap();

        let mut second = task::spawn(gate.acquire());
        let mut third = task::spawn(gate.acquire());
        assert_pending!(second.poll());
        assert_pending!(third.poll());
        assert_eq!(gate.queued(), 2);

        drop(held);
        assert_pending!(third.poll());
        let second_permit = assert_ready_ok!(second.poll());
        assert_eq!(gate.queued(), 1);
        assert_eq!(gate.in_use(), 1);

        drop(second_permit);
        let third_permit = assert_ready_ok!(third.poll());
        assert_eq!(gate.queued(), 0);
        drop(third_permit);
        assert_eq!(gate.in_use(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_gives_up_its_place() {
        let gate = ConcurrencyGate::new("text", 1, None).unwrap();
        let held = gate.acquire().await.unwrap();

        let mut abandoned = task::spawn(gate.acquire());
        let mut patient = task::spawn(gate.acquire());
        assert_pending!(abandoned.poll());
        assert_pending!(patient.poll());

        drop(abandoned);
        assert_eq!(gate.queued(), 1);

        drop(held);
        let permit = assert_ready_ok!(patient.poll());
        assert_eq!(gate.in_use(), 1);
        drop(permit);
        assert_eq!(gate.in_use(), 0);
        assert_eq!(gate.queued(), 0);
    }

    #[tokio::test]
    async fn test_queue_bound() {
        let gate = ConcurrencyGate::new("image", 1, Some(1)).unwrap();
        let _held = gate.acquire().await.unwrap();

        let mut waiting = task::spawn(gate.acquire());
        assert_pending!(waiting.poll());

        let error = gate.acquire().await.unwrap_err();
        assert!(matches!(error, Error::QueueFull { limit: 1, .. }));
        assert_eq!(gate.queued(), 1);
    }

    #[tokio::test]
    async fn test_close_fails_waiters() {
        let gate = ConcurrencyGate::new("text", 1, None).unwrap();
        let held = gate.acquire().await.unwrap();

        let mut waiting = task::spawn(gate.acquire());
        assert_pending!(waiting.poll());

        gate.close();
        let error = assert_ready_err!(waiting.poll());
        assert!(matches!(error, Error::Shutdown));
        assert_eq!(gate.queued(), 0);

        drop(held);
    }
}
