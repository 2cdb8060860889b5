//! Synchronization primitives
//!
//! The scheduler's blocking primitives live with the scheduler; the one
//! piece the process core owns is [`Completion`], a fulfilled-once value.
//! A parent reaping a child awaits the child's exit completion, which
//! replaces the dead-flag / mutex / condition-variable pattern and its
//! spurious-wakeup loop.

use spin::Mutex;

/// A value that is produced exactly once and can be awaited.
pub struct Completion<T> {
    slot: Mutex<Option<T>>,
}

impl<T: Clone> Completion<T> {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Fulfill the completion. The first value wins; later calls are
    /// ignored (the producer side is single-shot by construction).
    pub fn complete(&self, value: T) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    /// The value, if already fulfilled.
    pub fn poll(&self) -> Option<T> {
        self.slot.lock().clone()
    }

    /// Block until fulfilled, yielding to the scheduler between polls.
    pub fn wait(&self) -> T {
        loop {
            if let Some(value) = self.poll() {
                return value;
            }
            crate::kthread::yield_now();
        }
    }
}

impl<T: Clone> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;

    #[test]
    fn test_poll_before_and_after_complete() {
        let c: Completion<i32> = Completion::new();
        assert_eq!(c.poll(), None);
        c.complete(9);
        assert_eq!(c.poll(), Some(9));
        assert_eq!(c.wait(), 9);
    }

    #[test]
    fn test_first_value_wins() {
        let c: Completion<i32> = Completion::new();
        c.complete(1);
        c.complete(2);
        assert_eq!(c.poll(), Some(1));
    }

    #[test]
    fn test_wait_across_threads() {
        let c = Arc::new(Completion::<i32>::new());
        let producer = Arc::clone(&c);
        let handle = std::thread::spawn(move || {
            std::thread::yield_now();
            producer.complete(55);
        });
        assert_eq!(c.wait(), 55);
        handle.join().unwrap();
    }
}
