//! Thread-safe id → record map shared by the operator and accept loops.
//!
//! Both the process-wide host map and each host's bot map are a
//! [`Registry`]. All access goes through its methods; the map itself is
//! never handed out. Records are stored behind `Arc` so callers can keep
//! using a record after releasing the lock (for example while awaiting a
//! bot's response).
//!
//! # Ordering
//!
//! Every insert receives a sequence number. [`Registry::snapshot`] returns
//! records in insertion order, which is the deterministic order used for
//! listing and for broadcast dispatch.
//!
//! # Sealing
//!
//! [`Registry::drain`] empties the map and seals it: later inserts are
//! refused. A host's bot map is drained when the host closes, so a
//! handshake that completes after the host went away cannot resurrect a
//! bot under a dead host.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Generate a fresh, never-reused record id.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug)]
struct Inner<T> {
    entries: HashMap<String, (u64, Arc<T>)>,
    next_seq: u64,
    sealed: bool,
}

/// Mutex-guarded map from id to shared record.
#[derive(Debug)]
pub struct Registry<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    /// Create an empty, unsealed registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                next_seq: 0,
                sealed: false,
            }),
        }
    }

    // A panic while holding the lock cannot leave the map half-updated:
    // every critical section is a single HashMap call.
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a record under `id`.
    ///
    /// Returns `false` (and drops nothing) if the registry is sealed or the
    /// id is already present.
    pub fn insert(&self, id: impl Into<String>, record: Arc<T>) -> bool {
        let mut inner = self.lock();
        if inner.sealed {
            return false;
        }
        let id = id.into();
        if inner.entries.contains_key(&id) {
            return false;
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(id, (seq, record));
        true
    }

    /// Remove and return the record under `id`.
    pub fn remove(&self, id: &str) -> Option<Arc<T>> {
        self.lock().entries.remove(id).map(|(_, record)| record)
    }

    /// Look up the record under `id`.
    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.lock()
            .entries
            .get(id)
            .map(|(_, record)| Arc::clone(record))
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.lock().entries.contains_key(id)
    }

    /// All records in insertion order.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        let inner = self.lock();
        let mut entries: Vec<_> = inner.entries.values().collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries
            .into_iter()
            .map(|(_, record)| Arc::clone(record))
            .collect()
    }

    /// Remove every record, in insertion order, and refuse later inserts.
    pub fn drain(&self) -> Vec<Arc<T>> {
        let mut inner = self.lock();
        inner.sealed = true;
        let mut entries: Vec<_> = inner.entries.drain().map(|(_, entry)| entry).collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, record)| record).collect()
    }

    /// Whether [`drain`](Self::drain) has been called.
    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_keeps_insertion_order() {
        let registry = Registry::new();
        for name in ["c", "a", "b", "z", "m"] {
            assert!(registry.insert(name, Arc::new(name.to_string())));
        }
        let order: Vec<String> = registry.snapshot().iter().map(|s| s.to_string()).collect();
        assert_eq!(order, vec!["c", "a", "b", "z", "m"]);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let registry = Registry::new();
        assert!(registry.insert("x", Arc::new(1)));
        assert!(!registry.insert("x", Arc::new(2)));
        assert_eq!(*registry.get("x").unwrap(), 1);
    }

    #[test]
    fn test_remove_and_contains() {
        let registry = Registry::new();
        registry.insert("x", Arc::new(1));
        assert!(registry.contains("x"));
        assert_eq!(*registry.remove("x").unwrap(), 1);
        assert!(!registry.contains("x"));
        assert!(registry.remove("x").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_drain_seals() {
        let registry = Registry::new();
        registry.insert("a", Arc::new(1));
        registry.insert("b", Arc::new(2));

        let drained: Vec<i32> = registry.drain().iter().map(|v| **v).collect();
        assert_eq!(drained, vec![1, 2]);
        assert!(registry.is_sealed());
        assert!(!registry.insert("c", Arc::new(3)));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_concurrent_inserts() {
        let registry = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        registry.insert(format!("{t}-{i}"), Arc::new(i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 800);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }
}
