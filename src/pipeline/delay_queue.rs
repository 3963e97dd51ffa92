use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Mutex;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::models::RetryDelivery;

struct Entry {
    due: Instant,
    delivery: RetryDelivery,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due.cmp(&other.due)
    }
}

/// Min-heap of retry deliveries ordered by due time.
///
/// The worker awaits `next_due` in its select loop; a newly scheduled
/// entry that is due earlier than the current head wakes the waiter so
/// it re-arms its timer.
#[derive(Default)]
pub struct RetryQueue {
    heap: Mutex<BinaryHeap<Reverse<Entry>>>,
    notify: Notify,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&self, delivery: RetryDelivery, due: Instant) {
        self.heap
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Reverse(Entry { due, delivery }));
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.heap
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for the next delivery to come due. Cancel-safe: dropping the
    /// future between polls never loses an entry.
    pub async fn next_due(&self) -> RetryDelivery {
        loop {
            let head_due = {
                let mut heap = self
                    .heap
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                match heap.peek() {
                    Some(Reverse(entry)) if entry.due <= Instant::now() => {
                        let Reverse(entry) = heap.pop().unwrap();
                        return entry.delivery;
                    }
                    Some(Reverse(entry)) => Some(entry.due),
                    None => None,
                }
            };

            match head_due {
                Some(due) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(due) => {}
                        _ = self.notify.notified() => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }
}
