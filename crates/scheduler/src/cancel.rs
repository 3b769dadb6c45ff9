//! Cancellation tokens and generation counters
//!
//! Running jobs observe cancellation cooperatively through a
//! [`CancellationToken`]. A [`GenerationCounter`] scopes all work started
//! for one loaded document: advancing it makes every older generation stale.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};

/// Cancellation token for cooperative job cancellation
///
/// Clones share the same underlying state.
///
/// # Example
///
/// ```
/// use pdf_viewer_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Clone, Debug)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)) }
    }

    /// Cancel this token and every clone of it. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// True when both tokens share state.
    pub fn same(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation token registry keyed by job, page, or any other key.
///
/// Used to guarantee at most one in-flight job per key: a second request
/// for a key that is still registered is rejected.
pub struct CancellationRegistry<K> {
    tokens: Arc<Mutex<HashMap<K, CancellationToken>>>,
}

impl<K> Clone for CancellationRegistry<K> {
    fn clone(&self) -> Self {
        Self { tokens: Arc::clone(&self.tokens) }
    }
}

impl<K: Eq + Hash + Clone> CancellationRegistry<K> {
    pub fn new() -> Self {
        Self { tokens: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Register a fresh token for `key`, cancelling any token it replaces.
    pub fn register(&self, key: K) -> CancellationToken {
        let token = CancellationToken::new();
        let mut tokens = self.tokens.lock().unwrap();
        if let Some(previous) = tokens.insert(key, token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Register a token for `key` unless one is already in flight.
    pub fn register_if_absent(&self, key: K) -> Option<CancellationToken> {
        let mut tokens = self.tokens.lock().unwrap();
        if tokens.contains_key(&key) {
            return None;
        }
        let token = CancellationToken::new();
        tokens.insert(key, token.clone());
        Some(token)
    }

    /// Cancel and forget every registered token. Returns how many were
    /// cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut tokens = self.tokens.lock().unwrap();
        let count = tokens.len();
        for (_, token) in tokens.drain() {
            token.cancel();
        }
        count
    }

    pub fn unregister(&self, key: &K) -> bool {
        self.tokens.lock().unwrap().remove(key).is_some()
    }

    /// Remove `key` only if it still maps to `token`. A job finishing after
    /// its key was re-registered must not drop the newer registration.
    pub fn unregister_if(&self, key: &K, token: &CancellationToken) -> bool {
        let mut tokens = self.tokens.lock().unwrap();
        match tokens.get(key) {
            Some(current) if current.same(token) => {
                tokens.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.tokens.lock().unwrap().contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<CancellationToken> {
        self.tokens.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().unwrap().is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for CancellationRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Value of a [`GenerationCounter`] at the time work was started.
pub type Generation = u64;

/// Monotonic counter invalidating work tied to a superseded document.
#[derive(Clone, Debug, Default)]
pub struct GenerationCounter {
    current: Arc<AtomicU64>,
}

impl GenerationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation and return it.
    pub fn advance(&self) -> Generation {
        self.current.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn current(&self) -> Generation {
        self.current.load(Ordering::Acquire)
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        self.current() == generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_cancellation_token_basic() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());

        token.cancel();
        assert!(token.is_cancelled());

        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancellation_token_clone_shares_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        let other = CancellationToken::new();

        assert!(token.same(&clone));
        assert!(!token.same(&other));

        clone.cancel();
        assert!(token.is_cancelled());
        assert!(!other.is_cancelled());
    }

    #[test]
    fn test_cancellation_token_across_threads() {
        let token = CancellationToken::new();
        let worker = token.clone();

        let handle = thread::spawn(move || {
            while !worker.is_cancelled() {
                thread::yield_now();
            }
            true
        });

        token.cancel();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_registry_register_if_absent_dedups() {
        let registry: CancellationRegistry<u32> = CancellationRegistry::new();

        let first = registry.register_if_absent(3).expect("first registration");
        assert!(registry.register_if_absent(3).is_none());
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister_if(&3, &first));
        assert!(registry.register_if_absent(3).is_some());
    }

    #[test]
    fn test_registry_register_replaces_and_cancels() {
        let registry: CancellationRegistry<u32> = CancellationRegistry::new();
        let old = registry.register(1);
        let new = registry.register(1);

        assert!(old.is_cancelled());
        assert!(!new.is_cancelled());
        assert!(!registry.unregister_if(&1, &old));
        assert!(registry.contains(&1));
    }

    #[test]
    fn test_registry_cancel_all() {
        let registry: CancellationRegistry<&'static str> = CancellationRegistry::new();
        let a = registry.register("a");
        let b = registry.register("b");

        assert_eq!(registry.cancel_all(), 2);
        assert!(a.is_cancelled() && b.is_cancelled());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_generation_counter() {
        let counter = GenerationCounter::new();
        assert_eq!(counter.current(), 0);

        let first = counter.advance();
        assert!(counter.is_current(first));

        let shared = counter.clone();
        let second = shared.advance();
        assert!(second > first);
        assert!(!counter.is_current(first));
        assert!(counter.is_current(second));
    }
}
