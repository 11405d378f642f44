//! Pending-item queue between source callbacks and the flush.
//!
//! Any thread may append. Draining is not locked here: only the caller that
//! holds the write slot in [`StateCell`](crate::streaming::state::StateCell)
//! drains.

use crossbeam_channel::{unbounded, Receiver, Sender};

pub struct PendingQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> PendingQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn push(&self, item: T) {
        // Both ends live in `self`, so the channel cannot be disconnected
        let _ = self.tx.send(item);
    }

    /// Take everything queued so far, in arrival order.
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }

    /// Drop everything queued so far. Returns how many items were discarded.
    pub fn discard(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> Default for PendingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
