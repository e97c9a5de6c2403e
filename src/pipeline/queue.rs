//! Bounded queue with item-count and byte-size backpressure

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// How often a blocked `put` or `get` re-checks the queue without a wakeup
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Estimated in-memory footprint of a queued item
pub trait SizeEstimate {
    fn estimated_size(&self) -> usize;
}

enum Entry<T> {
    Item { item: T, size: usize },
    PoisonPill,
}

struct QueueState<T> {
    entries: VecDeque<Entry<T>>,
    bytes: usize,
    peak_items: usize,
    peak_bytes: usize,
}

/// Multi-consumer queue bounded by both item count and estimated bytes
///
/// `put` waits while adding the item would exceed either bound. An item larger
/// than the whole byte budget is still admitted once the queue is empty, so it
/// cannot block forever. Poison pills skip both bounds.
pub struct MemoryAwareQueue<T> {
    state: Mutex<QueueState<T>>,
    max_items: usize,
    max_bytes: usize,
    item_added: Notify,
    space_freed: Notify,
}

impl<T: SizeEstimate> MemoryAwareQueue<T> {
    pub fn new(max_items: usize, max_bytes: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: VecDeque::new(),
                bytes: 0,
                peak_items: 0,
                peak_bytes: 0,
            }),
            max_items: max_items.max(1),
            max_bytes,
            item_added: Notify::new(),
            space_freed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, state: &mut QueueState<T>, entry: Entry<T>) {
        if let Entry::Item { size, .. } = &entry {
            state.bytes += size;
        }
        state.entries.push_back(entry);
        state.peak_items = state.peak_items.max(state.entries.len());
        state.peak_bytes = state.peak_bytes.max(state.bytes);
        self.item_added.notify_one();
    }

    /// Adds `item`, waiting while the queue is over either bound
    pub async fn put(&self, item: T) {
        let size = item.estimated_size();
        let mut pending = Some(item);

        loop {
            let freed = self.space_freed.notified();
            {
                let mut state = self.lock();
                let fits_count = state.entries.len() < self.max_items;
                let fits_bytes = state.entries.is_empty() || state.bytes + size <= self.max_bytes;
                if fits_count && fits_bytes {
                    if let Some(item) = pending.take() {
                        self.push(&mut state, Entry::Item { item, size });
                    }
                    return;
                }
            }
            let _ = tokio::time::timeout(POLL_INTERVAL, freed).await;
        }
    }

    /// Adds a stop signal for one consumer; never waits
    pub fn put_poison_pill(&self) {
        let mut state = self.lock();
        self.push(&mut state, Entry::PoisonPill);
    }

    /// Removes the oldest entry, waiting while the queue is empty
    ///
    /// Returns `None` for a poison pill.
    pub async fn get(&self) -> Option<T> {
        loop {
            let added = self.item_added.notified();
            {
                let mut state = self.lock();
                if let Some(entry) = state.entries.pop_front() {
                    let item = match entry {
                        Entry::Item { item, size } => {
                            state.bytes = state.bytes.saturating_sub(size);
                            Some(item)
                        }
                        Entry::PoisonPill => None,
                    };
                    drop(state);
                    self.space_freed.notify_waiters();
                    return item;
                }
            }
            let _ = tokio::time::timeout(POLL_INTERVAL, added).await;
        }
    }

    /// Entries currently queued, poison pills included
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimated bytes of queued items
    pub fn current_bytes(&self) -> usize {
        self.lock().bytes
    }

    pub fn peak_items(&self) -> usize {
        self.lock().peak_items
    }

    pub fn peak_bytes(&self) -> usize {
        self.lock().peak_bytes
    }
}
