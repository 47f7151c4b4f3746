//! Subscriber registry shared by the hub, the notification manager and the
//! network monitor.
//!
//! Listeners are stored in subscription order and removed explicitly through
//! the [`SubscriptionId`] returned by `insert`.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Handle returned by `subscribe`; pass it back to `unsubscribe`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Ordered listener list.
pub struct Subscribers<L: ?Sized> {
    next_id: u64,
    entries: Vec<(SubscriptionId, Arc<L>)>,
}

impl<L: ?Sized> Default for Subscribers<L> {
    fn default() -> Self {
        Self {
            next_id: 1,
            entries: Vec::new(),
        }
    }
}

impl<L: ?Sized> Subscribers<L> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, listener: Arc<L>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    /// Removes a listener. Returns false if the id was unknown.
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    /// Clones the listener list so it can be invoked without holding a lock.
    pub fn snapshot(&self) -> Vec<(SubscriptionId, Arc<L>)> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
