//! In-process key-value provider
//!
//! Mirrors the subset of Redis semantics the state store relies on: string
//! keys, set keys, per-key expiry and atomic compare-and-delete. Expiry is
//! evaluated lazily against `tokio::time::Instant`, so tests can drive it with
//! a paused clock.
//!
//! **Important**: state is NOT shared between processes. Locks taken here only
//! exclude holders inside the same process.

use crate::state_store::errors::{KvError, KvResult};
use crate::state_store::traits::KeyValueStore;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Entry<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Entry<T> {
    fn persistent(value: T) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    strings: HashMap<String, Entry<String>>,
    sets: HashMap<String, Entry<BTreeSet<String>>>,
}

impl MemoryState {
    fn purge_expired(&mut self, key: &str, now: Instant) {
        if self.strings.get(key).is_some_and(|e| e.is_expired(now)) {
            self.strings.remove(key);
        }
        if self.sets.get(key).is_some_and(|e| e.is_expired(now)) {
            self.sets.remove(key);
        }
    }
}

/// In-memory key-value store
#[derive(Debug, Clone)]
pub struct MemoryKeyValueStore {
    state: Arc<Mutex<MemoryState>>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate a transport outage; every operation fails while unavailable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> KvResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(KvError::Connection("in-memory store is offline".to_string()))
        }
    }

    /// Run `f` against the state after dropping an expired `key`
    fn with_key<T>(&self, key: &str, f: impl FnOnce(&mut MemoryState) -> T) -> KvResult<T> {
        self.check_available()?;
        let mut state = self.state.lock();
        state.purge_expired(key, Instant::now());
        Ok(f(&mut state))
    }
}

/// Glob match supporting `*` only, which is all the store's key scans use
fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let (first, rest) = (parts[0], &parts[1..]);
    let Some(mut remaining) = key.strip_prefix(first) else {
        return false;
    };
    let last = rest[rest.len() - 1];

    for part in &rest[..rest.len() - 1] {
        match remaining.find(part) {
            Some(pos) => remaining = &remaining[pos + part.len()..],
            None => return false,
        }
    }
    remaining.len() >= last.len() && remaining.ends_with(last)
}

impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        self.with_key(key, |state| state.strings.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        self.with_key(key, |state| {
            state.sets.remove(key);
            state
                .strings
                .insert(key.to_string(), Entry::persistent(value.to_string()));
        })
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> KvResult<bool> {
        self.with_key(key, |state| {
            if state.strings.contains_key(key) || state.sets.contains_key(key) {
                return false;
            }
            state.strings.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            true
        })
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        self.with_key(key, |state| {
            let removed_string = state.strings.remove(key).is_some();
            let removed_set = state.sets.remove(key).is_some();
            removed_string || removed_set
        })
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> KvResult<bool> {
        self.with_key(key, |state| match state.strings.get(key) {
            Some(entry) if entry.value == expected => {
                state.strings.remove(key);
                true
            }
            _ => false,
        })
    }

    async fn set_add(&self, key: &str, member: &str) -> KvResult<bool> {
        self.with_key(key, |state| {
            state.strings.remove(key);
            state
                .sets
                .entry(key.to_string())
                .or_insert_with(|| Entry::persistent(BTreeSet::new()))
                .value
                .insert(member.to_string())
        })
    }

    async fn set_remove(&self, key: &str, member: &str) -> KvResult<bool> {
        self.with_key(key, |state| {
            let Some(entry) = state.sets.get_mut(key) else {
                return false;
            };
            let removed = entry.value.remove(member);
            // Redis drops empty sets
            if entry.value.is_empty() {
                state.sets.remove(key);
            }
            removed
        })
    }

    async fn set_members(&self, key: &str) -> KvResult<Vec<String>> {
        self.with_key(key, |state| {
            state
                .sets
                .get(key)
                .map(|e| e.value.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> KvResult<()> {
        self.with_key(key, |state| {
            let deadline = Some(Instant::now() + ttl);
            if let Some(entry) = state.strings.get_mut(key) {
                entry.expires_at = deadline;
            }
            if let Some(entry) = state.sets.get_mut(key) {
                entry.expires_at = deadline;
            }
        })
    }

    async fn scan_keys(&self, pattern: &str) -> KvResult<Vec<String>> {
        self.check_available()?;
        let now = Instant::now();
        let mut state = self.state.lock();
        state.strings.retain(|_, e| !e.is_expired(now));
        state.sets.retain(|_, e| !e.is_expired(now));

        let keys: BTreeSet<String> = state
            .strings
            .keys()
            .chain(state.sets.keys())
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        Ok(keys.into_iter().collect())
    }

    async fn health_check(&self) -> KvResult<bool> {
        self.check_available()?;
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}
