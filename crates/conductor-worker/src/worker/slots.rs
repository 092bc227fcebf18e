//! Per-task-type execution slots
//!
//! Bounds how many poll/execute/report cycles of one task type run at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Execution slots for a single task type
///
/// Uses a semaphore for admission and an atomic for load tracking, so
/// [`TaskSlots::in_flight`] can be read without touching the semaphore.
#[derive(Debug)]
pub struct TaskSlots {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
}

impl TaskSlots {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Take a slot without waiting; `None` when every slot is busy
    pub fn try_acquire(&self) -> Option<SlotGuard> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        Some(SlotGuard {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Cycles currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Get the number of free slots
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Stop handing out slots; later `try_acquire` calls return `None`
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// A held execution slot, released on drop
#[derive(Debug)]
pub struct SlotGuard {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_up_to_capacity() {
        let slots = TaskSlots::new(2);

        let first = slots.try_acquire();
        let second = slots.try_acquire();
        assert!(first.is_some());
        assert!(second.is_some());
        assert!(slots.try_acquire().is_none());
        assert_eq!(slots.in_flight(), 2);
        assert_eq!(slots.available(), 0);

        drop(first);
        assert_eq!(slots.in_flight(), 1);
        assert!(slots.try_acquire().is_some());
    }

    #[test]
    fn test_zero_capacity_never_admits() {
        let slots = TaskSlots::new(0);
        assert!(slots.try_acquire().is_none());
        assert_eq!(slots.capacity(), 0);
    }

    #[test]
    fn test_closed_slots_refuse() {
        let slots = TaskSlots::new(3);
        let held = slots.try_acquire();
        slots.close();

        assert!(slots.try_acquire().is_none());
        drop(held);
        assert_eq!(slots.in_flight(), 0);
    }
}
