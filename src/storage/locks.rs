//! Striped Lock Registry
//!
//! Every backend serializes access per key through a [`LockRegistry`]. Instead
//! of one lock per key (which would grow forever), the registry owns a fixed
//! number of stripes and maps each key onto one of them by hash.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      LockRegistry<T>                        │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │Stripe 0 │ │Stripe 1 │ │Stripe 2 │ │Stripe N │           │
//! │  │Mutex<T> │ │Mutex<T> │ │Mutex<T> │ │Mutex<T> │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//!        ▲ lock(key): one stripe      ▲ lock_all(): every stripe,
//!                                       in index order
//! ```
//!
//! Each stripe guards a `T`. The file backend uses `T = ()` (pure locking);
//! the memory backend stores its table shards directly inside the stripes.
//!
//! Stripes are all created up front, so `lock_all` can never miss a lock that
//! is being created concurrently. Acquiring in ascending index order, and never
//! calling `lock_all` while holding a single stripe, keeps it deadlock free.

use parking_lot::{Mutex, MutexGuard};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Default number of stripes.
pub const DEFAULT_STRIPES: usize = 64;

/// A fixed pool of mutexes addressed by key.
pub struct LockRegistry<T = ()> {
    stripes: Box<[Mutex<T>]>,
}

impl<T> std::fmt::Debug for LockRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockRegistry")
            .field("stripes", &self.stripes.len())
            .finish()
    }
}

impl<T: Default> LockRegistry<T> {
    /// Creates a registry with `stripes` default-initialized stripes (at least one).
    pub fn new(stripes: usize) -> Self {
        Self::with_init(stripes, |_| T::default())
    }
}

impl<T: Default> Default for LockRegistry<T> {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}

impl<T> LockRegistry<T> {
    /// Creates a registry, building each stripe's contents from its index.
    pub fn with_init(stripes: usize, mut init: impl FnMut(usize) -> T) -> Self {
        let stripes = (0..stripes.max(1)).map(|i| Mutex::new(init(i))).collect();
        Self { stripes }
    }

    /// Number of stripes.
    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Determines which stripe a key belongs to.
    #[inline]
    pub fn stripe_index(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.stripes.len()
    }

    /// Locks the stripe owning `key`.
    pub fn lock(&self, key: &str) -> MutexGuard<'_, T> {
        self.stripes[self.stripe_index(key)].lock()
    }

    /// Locks every stripe, in index order.
    ///
    /// Must not be called while the same thread holds a single-key guard.
    pub fn lock_all(&self) -> LockAllGuard<'_, T> {
        LockAllGuard {
            guards: self.stripes.iter().map(|stripe| stripe.lock()).collect(),
        }
    }
}

/// Holds every stripe of a [`LockRegistry`] until dropped.
pub struct LockAllGuard<'a, T> {
    guards: Vec<MutexGuard<'a, T>>,
}

impl<'a, T> LockAllGuard<'a, T> {
    /// The guard of every stripe, in index order.
    pub fn stripes(&self) -> &[MutexGuard<'a, T>] {
        &self.guards
    }

    /// Mutable access to every stripe, in index order.
    pub fn stripes_mut(&mut self) -> &mut [MutexGuard<'a, T>] {
        &mut self.guards
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// Finds two keys that land on different stripes.
    fn keys_on_distinct_stripes(registry: &LockRegistry) -> (String, String) {
        let first = "key-0".to_string();
        let stripe = registry.stripe_index(&first);
        let second = (1..)
            .map(|i| format!("key-{}", i))
            .find(|k| registry.stripe_index(k) != stripe)
            .unwrap();
        (first, second)
    }

    #[test]
    fn test_zero_stripes_clamped() {
        let registry: LockRegistry = LockRegistry::new(0);
        assert_eq!(registry.stripe_count(), 1);
        let _guard = registry.lock("anything");
    }

    #[test]
    fn test_stripe_index_is_stable() {
        let registry: LockRegistry = LockRegistry::new(16);
        let idx = registry.stripe_index("session");
        assert!(idx < 16);
        assert_eq!(registry.stripe_index("session"), idx);
    }

    #[test]
    fn test_distinct_stripes_do_not_block() {
        let registry: LockRegistry = LockRegistry::new(DEFAULT_STRIPES);
        let (a, b) = keys_on_distinct_stripes(&registry);

        let _held = registry.lock(&a);
        let stripe = registry.stripe_index(&b);
        assert!(registry.stripes[stripe].try_lock().is_some());
    }

    #[test]
    fn test_same_key_is_exclusive() {
        let registry: LockRegistry = LockRegistry::new(8);
        let _held = registry.lock("k");
        let stripe = registry.stripe_index("k");
        assert!(registry.stripes[stripe].try_lock().is_none());
    }

    #[test]
    fn test_lock_all_excludes_single_key_ops() {
        let registry = Arc::new(LockRegistry::<()>::new(8));
        let entered = Arc::new(AtomicBool::new(false));

        let all = registry.lock_all();

        let handle = {
            let registry = Arc::clone(&registry);
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                let _guard = registry.lock("some key");
                entered.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!entered.load(Ordering::SeqCst));

        drop(all);
        handle.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stripe_contents() {
        let registry = LockRegistry::with_init(4, |i| i * 10);
        let total: usize = registry.lock_all().stripes().iter().map(|v| **v).sum();
        assert_eq!(total, 60);

        {
            let mut all = registry.lock_all();
            for value in all.stripes_mut() {
                **value += 1;
            }
        }
        let total: usize = registry.lock_all().stripes().iter().map(|v| **v).sum();
        assert_eq!(total, 64);
    }
}
