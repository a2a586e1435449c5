//! Per-key semaphores, e.g. a connection cap per client address.
//!
//! Semaphores are created on first use. Once the number of live keys reaches
//! the size hint, creating another key first sweeps out every semaphore that
//! has no permit taken, so churny key spaces do not grow without bound.

use std::hash::Hash;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::sync::semaphore::{Semaphore, DEFAULT_CAPACITY};

/// Keyed semaphores sharing one per-key capacity.
#[derive(Debug)]
pub struct KeyedSemaphore<K>
where
    K: Eq + Hash,
{
    capacity: usize,
    size_hint: usize,
    sems: DashMap<K, Arc<Semaphore>>,
    /// Live entries. Guards the create path.
    size: Mutex<usize>,
}

impl<K> KeyedSemaphore<K>
where
    K: Eq + Hash + Clone,
{
    /// `capacity` applies to every key's semaphore; a `size_hint` below 1
    /// disables reclamation.
    pub fn new(capacity: usize, size_hint: usize) -> Self {
        let size_hint = if size_hint < 1 { usize::MAX } else { size_hint };
        Self {
            capacity: capacity.max(DEFAULT_CAPACITY),
            size_hint,
            sems: DashMap::new(),
            size: Mutex::new(0),
        }
    }

    /// Get the semaphore of `key`, creating it if absent.
    pub fn get(&self, key: &K) -> Arc<Semaphore> {
        if let Some(sem) = self.sems.get(key) {
            return Arc::clone(sem.value());
        }

        let mut size = self.size.lock().expect("keyed semaphore mutex poisoned");

        // May have been created while we waited for the lock.
        if let Some(sem) = self.sems.get(key) {
            return Arc::clone(sem.value());
        }

        if *size >= self.size_hint {
            self.shrink(&mut size);
        }

        let sem = Arc::new(Semaphore::new(self.capacity));
        self.sems.insert(key.clone(), Arc::clone(&sem));
        *size += 1;

        sem
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        *self.size.lock().expect("keyed semaphore mutex poisoned")
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-key capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn shrink(&self, size: &mut usize) {
        let before = *size;
        self.sems.retain(|_, sem| {
            if sem.available() == self.capacity {
                *size -= 1;
                false
            } else {
                true
            }
        });
        tracing::debug!(before, after = *size, "Reclaimed idle keyed semaphores");
    }
}
