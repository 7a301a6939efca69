//! Bounded, thread-safe set of already-processed alert ids.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 4096;

struct Inner {
    members: HashSet<Uuid>,
    order: VecDeque<Uuid>,
    capacity: usize,
}

/// De-duplication memory. `insert` is safe to call concurrently from
/// multiple transport-callback dispatches; once capacity is exceeded the
/// oldest id (by insertion order) is evicted to make room.
pub struct SeenSet {
    inner: Mutex<Inner>,
}

impl SeenSet {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        SeenSet {
            inner: Mutex::new(Inner {
                members: HashSet::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
                capacity,
            }),
        }
    }

    /// Returns `true` iff `id` was not already present.
    pub fn insert(&self, id: Uuid) -> bool {
        let mut inner = self.inner.lock();
        if !inner.members.insert(id) {
            return false;
        }
        inner.order.push_back(id);
        if inner.order.len() > inner.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.members.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SeenSet {
    fn default() -> Self {
        SeenSet::new(DEFAULT_CAPACITY)
    }
}
