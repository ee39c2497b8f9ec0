//! Reader slot accounting.

use parking_lot::{Condvar, Mutex};

/// Counting semaphore limiting concurrent read transactions.
#[derive(Debug)]
pub(crate) struct ReadPermits {
    available: Mutex<usize>,
    released: Condvar,
    max: usize,
}

impl ReadPermits {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            available: Mutex::new(max),
            released: Condvar::new(),
            max,
        }
    }

    /// Blocks until a slot is free.
    pub(crate) fn acquire(&self) -> ReadPermit<'_> {
        let mut available = self.available.lock();
        while *available == 0 {
            self.released.wait(&mut available);
        }
        *available -= 1;
        ReadPermit { permits: self }
    }

    pub(crate) fn available(&self) -> usize {
        *self.available.lock()
    }

    pub(crate) fn max(&self) -> usize {
        self.max
    }
}

/// A held reader slot, freed on drop.
#[derive(Debug)]
pub(crate) struct ReadPermit<'a> {
    permits: &'a ReadPermits,
}

impl Drop for ReadPermit<'_> {
    fn drop(&mut self) {
        *self.permits.available.lock() += 1;
        self.permits.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn acquire_waits_for_release() {
        let permits = Arc::new(ReadPermits::new(1));
        let held = permits.acquire();
        assert_eq!(permits.available(), 0);

        let waiter = {
            let permits = Arc::clone(&permits);
            thread::spawn(move || {
                let _permit = permits.acquire();
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        drop(held);
        waiter.join().unwrap();
        assert_eq!(permits.available(), 1);
    }
}
