//! In-memory versioned key/value store with optimistic compare-and-swap.
//!
//! Stands in for the persistence collaborator: every row carries a version,
//! writers read a snapshot, compute outside the lock and commit only if the
//! version has not moved.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

use parking_lot::RwLock;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<V> {
    pub version: u64,
    pub value: V,
}

#[derive(Debug)]
pub struct VersionedStore<K, V> {
    rows: RwLock<HashMap<K, Versioned<V>>>,
}

impl<K, V> Default for VersionedStore<K, V> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> VersionedStore<K, V>
where
    K: Eq + Hash + Clone + Display,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<Versioned<V>> {
        self.rows.read().get(key).cloned()
    }

    /// Current version of `key`, 0 when absent.
    pub fn version(&self, key: &K) -> u64 {
        self.rows.read().get(key).map(|row| row.version).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Snapshot of every value whose key passes `keep`.
    pub fn values_where<P>(&self, keep: P) -> Vec<V>
    where
        P: Fn(&K) -> bool,
    {
        self.rows
            .read()
            .iter()
            .filter(|(key, _)| keep(key))
            .map(|(_, row)| row.value.clone())
            .collect()
    }

    /// Unconditional write. Returns the new version.
    pub fn insert(&self, key: K, value: V) -> u64 {
        let mut rows = self.rows.write();
        let version = rows.get(&key).map(|row| row.version).unwrap_or(0) + 1;
        rows.insert(key, Versioned { version, value });
        version
    }

    /// Writes `value` only if the stored version still equals `expected`
    /// (0 meaning "not yet stored"). Returns the new version.
    pub fn compare_and_swap(&self, key: K, expected: u64, value: V) -> Result<u64> {
        let mut rows = self.rows.write();
        let found = rows.get(&key).map(|row| row.version).unwrap_or(0);
        if found != expected {
            return Err(EngineError::Conflict {
                key: key.to_string(),
                expected,
                found,
            });
        }
        let version = found + 1;
        rows.insert(key, Versioned { version, value });
        Ok(version)
    }

    /// Read-modify-write with retries on conflict.
    ///
    /// `f` receives the current value (`None` when absent) and returns the
    /// value to store plus anything the caller wants back. Errors from `f`
    /// abort immediately; only version conflicts are retried.
    pub fn update<T, F>(&self, key: &K, max_retries: u32, mut f: F) -> Result<(V, T)>
    where
        F: FnMut(Option<&V>) -> Result<(V, T)>,
    {
        let attempts = max_retries.max(1);
        for attempt in 1..=attempts {
            let current = self.get(key);
            let expected = current.as_ref().map(|row| row.version).unwrap_or(0);
            let (next, extra) = f(current.as_ref().map(|row| &row.value))?;
            match self.compare_and_swap(key.clone(), expected, next.clone()) {
                Ok(_) => return Ok((next, extra)),
                Err(err) if err.is_conflict() => {
                    tracing::warn!(error = %err, attempt, "optimistic update conflict, retrying");
                }
                Err(err) => return Err(err),
            }
        }
        Err(EngineError::RetriesExhausted {
            key: key.to_string(),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_cas_rejects_stale_version() {
        let store: VersionedStore<String, u32> = VersionedStore::new();
        assert_eq!(store.compare_and_swap("a".into(), 0, 1), Ok(1));
        assert_eq!(store.compare_and_swap("a".into(), 1, 2), Ok(2));
        let err = store.compare_and_swap("a".into(), 1, 3).unwrap_err();
        assert_eq!(
            err,
            EngineError::Conflict {
                key: "a".into(),
                expected: 1,
                found: 2
            }
        );
        assert_eq!(store.get(&"a".to_string()).map(|r| r.value), Some(2));
    }

    #[test]
    fn test_insert_bumps_version() {
        let store: VersionedStore<String, &str> = VersionedStore::new();
        assert!(store.is_empty());
        assert_eq!(store.insert("k".into(), "x"), 1);
        assert_eq!(store.insert("k".into(), "y"), 2);
        assert_eq!(store.version(&"k".to_string()), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.values_where(|k| k == "k"), vec!["y"]);
        assert!(store.values_where(|k| k == "other").is_empty());
    }

    #[test]
    fn test_update_propagates_closure_error() {
        let store: VersionedStore<String, u32> = VersionedStore::new();
        let result: Result<(u32, ())> = store.update(&"k".to_string(), 3, |_| {
            Err(EngineError::InvalidAttempt("bad".into()))
        });
        assert_eq!(result, Err(EngineError::InvalidAttempt("bad".into())));
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_gives_up_when_always_raced() {
        let store: VersionedStore<String, u32> = VersionedStore::new();
        let key = "k".to_string();
        let result = store.update(&key, 3, |current| {
            let v = current.copied().unwrap_or(0);
            // a competing writer lands between read and commit every time
            store.insert(key.clone(), v + 100);
            Ok((v + 1, ()))
        });
        assert_eq!(
            result,
            Err(EngineError::RetriesExhausted {
                key: "k".into(),
                attempts: 3
            })
        );
    }

    #[test]
    fn test_concurrent_updates_lose_nothing() {
        let store: Arc<VersionedStore<String, u64>> = Arc::new(VersionedStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..100 {
                        store
                            .update(&"counter".to_string(), 1_000, |v| {
                                Ok((v.copied().unwrap_or(0) + 1, ()))
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let row = store.get(&"counter".to_string()).unwrap();
        assert_eq!(row.value, 800);
        assert_eq!(row.version, 800);
    }
}
