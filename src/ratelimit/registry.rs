//! Client registry guarded by a single reader/writer lock.

use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::bucket::BucketConfig;
use super::clock::{Clock, MonotonicClock};
use super::entry::{BucketRef, ClientEntry};
use super::store::ClientStore;

/// Bucket handle returned by [`ClientRegistry::get_or_create`].
pub type RegistryBucket<'a> = BucketRef<'a, MappedRwLockReadGuard<'a, ClientEntry>>;

/// Maps client identities to their token buckets.
///
/// Lookups of known clients share the lock; inserting a new client and
/// sweeping take it exclusively. Concurrent checks of the same client are
/// serialized by the entry's own bucket lock.
pub struct ClientRegistry {
    /// Client entries indexed by identity
    entries: RwLock<HashMap<String, ClientEntry>>,
    /// Applied to every new bucket
    config: BucketConfig,
    clock: Arc<dyn Clock>,
}

impl ClientRegistry {
    /// Create an empty registry using the monotonic system clock.
    pub fn new(config: BucketConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock))
    }

    /// Create an empty registry reading time from `clock`.
    pub fn with_clock(config: BucketConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            clock,
        }
    }

    /// Get the bucket for `identity`, creating a full one on first sight.
    ///
    /// The client's last-seen time is refreshed either way. The returned
    /// handle keeps a shared claim on the registry, so drop it as soon as the
    /// check is done.
    pub fn get_or_create(&self, identity: &str) -> RegistryBucket<'_> {
        let now = self.clock.now();

        trace!(identity = %identity, "Looking up client");

        match RwLockReadGuard::try_map(self.entries.read(), |entries| entries.get(identity)) {
            Ok(entry) => {
                entry.touch(now);
                return BucketRef::new(entry, &*self.clock);
            }
            Err(entries) => drop(entries),
        }

        // Another caller may have inserted the client since the read lock was
        // released; the entry API keeps the first one.
        let mut entries = self.entries.write();
        entries
            .entry(identity.to_owned())
            .or_insert_with(|| {
                debug!(
                    identity = %identity,
                    capacity = self.config.capacity(),
                    refill_rate = self.config.refill_rate(),
                    "Creating bucket for new client"
                );
                ClientEntry::new(self.config, now)
            })
            .touch(now);

        let entries = RwLockWriteGuard::downgrade(entries);
        let entry = RwLockReadGuard::map(entries, |entries| &entries[identity]);
        BucketRef::new(entry, &*self.clock)
    }

    /// Remove every client idle for longer than `max_idle`.
    ///
    /// Returns the number of evicted clients.
    pub fn sweep(&self, max_idle: Duration) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();

        let before = entries.len();
        entries.retain(|_, entry| !entry.is_idle(now, max_idle));
        let evicted = before - entries.len();

        if evicted > 0 {
            debug!(
                evicted,
                remaining = entries.len(),
                "Evicted idle clients"
            );
        }
        evicted
    }

    /// The bucket configuration shared by all clients.
    pub fn config(&self) -> BucketConfig {
        self.config
    }

    /// Whether `identity` currently has an entry.
    pub fn contains(&self, identity: &str) -> bool {
        self.entries.read().contains_key(identity)
    }

    /// Get the number of tracked clients.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no client is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Forget every client.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl ClientStore for ClientRegistry {
    fn admit(&self, identity: &str) -> bool {
        self.get_or_create(identity).allow()
    }

    fn sweep(&self, max_idle: Duration) -> usize {
        ClientRegistry::sweep(self, max_idle)
    }

    fn len(&self) -> usize {
        ClientRegistry::len(self)
    }

    fn contains(&self, identity: &str) -> bool {
        ClientRegistry::contains(self, identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn registry(rate: f64, capacity: u32) -> (ClientRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = BucketConfig::new(rate, capacity).unwrap();
        (ClientRegistry::with_clock(config, clock.clone()), clock)
    }

    #[test]
    fn test_registry_creation() {
        let (registry, _) = registry(1.0, 5);
        assert!(registry.is_empty());
        assert_eq!(registry.config().capacity(), 5);
    }

    #[test]
    fn test_get_or_create_inserts_full_bucket() {
        let (registry, _) = registry(1.0, 5);

        let bucket = registry.get_or_create("10.0.0.1");
        assert_eq!(bucket.tokens(), 5.0);
        drop(bucket);

        assert_eq!(registry.len(), 1);
        assert!(registry.contains("10.0.0.1"));
    }

    #[test]
    fn test_get_or_create_reuses_entry() {
        let (registry, _) = registry(1.0, 5);

        assert!(registry.get_or_create("10.0.0.1").allow());
        assert!(registry.get_or_create("10.0.0.1").allow());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_or_create("10.0.0.1").tokens(), 3.0);
    }

    #[test]
    fn test_burst_and_refill_sequence() {
        let (registry, clock) = registry(1.0, 5);

        for i in 1..=5 {
            assert!(registry.admit("10.0.0.1"), "Request {} should be allowed", i);
        }
        assert!(!registry.admit("10.0.0.1"));

        clock.advance(Duration::from_secs(1));
        assert!(registry.admit("10.0.0.1"));
        assert!(!registry.admit("10.0.0.1"));
    }

    #[test]
    fn test_clients_have_separate_buckets() {
        let (registry, _) = registry(1.0, 2);

        assert!(registry.admit("a"));
        assert!(registry.admit("a"));
        assert!(!registry.admit("a"));

        assert!(registry.admit("b"));
        assert!(registry.admit("b"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_get_or_create_refreshes_last_seen() {
        let (registry, clock) = registry(1.0, 5);
        let first = registry.get_or_create("a").last_seen();

        clock.advance(Duration::from_secs(30));
        let second = registry.get_or_create("a").last_seen();

        assert_eq!(second - first, Duration::from_secs(30));
    }

    #[test]
    fn test_sweep_evicts_only_idle_clients() {
        let (registry, clock) = registry(1.0, 5);
        let max_idle = Duration::from_secs(180);

        registry.admit("A");
        clock.advance(Duration::from_secs(170));
        registry.admit("B");
        clock.advance(Duration::from_secs(11));

        let evicted = registry.sweep(max_idle);

        assert_eq!(evicted, 1);
        assert!(!registry.contains("A"));
        assert!(registry.contains("B"));
    }

    #[test]
    fn test_sweep_keeps_client_idle_exactly_max_idle() {
        let (registry, clock) = registry(1.0, 5);
        registry.admit("A");

        clock.advance(Duration::from_secs(180));
        assert_eq!(registry.sweep(Duration::from_secs(180)), 0);
        assert!(registry.contains("A"));
    }

    #[test]
    fn test_evicted_client_starts_with_full_bucket() {
        let (registry, clock) = registry(1.0, 2);
        registry.admit("A");
        registry.admit("A");
        assert!(!registry.admit("A"));

        clock.advance(Duration::from_secs(200));
        registry.sweep(Duration::from_secs(180));

        assert_eq!(registry.get_or_create("A").tokens(), 2.0);
    }

    #[test]
    fn test_concurrent_first_sight_creates_one_entry() {
        let (registry, _) = registry(1.0, 100);

        thread::scope(|s| {
            for _ in 0..16 {
                s.spawn(|| {
                    registry.get_or_create("10.0.0.1").allow();
                });
            }
        });

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_or_create("10.0.0.1").tokens(), 84.0);
    }

    #[test]
    fn test_concurrent_checks_never_overspend() {
        let (registry, _) = registry(1.0, 5);
        let allowed = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..10 {
                        if registry.admit("10.0.0.1") {
                            allowed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(allowed.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_sweep_concurrent_with_checks() {
        let (registry, clock) = registry(1.0, 1000);
        registry.admit("idle");
        clock.advance(Duration::from_secs(600));

        thread::scope(|s| {
            for t in 0..4 {
                let registry = &registry;
                s.spawn(move || {
                    for i in 0..50 {
                        registry.admit(&format!("client-{}-{}", t, i % 5));
                    }
                });
            }
            s.spawn(|| registry.sweep(Duration::from_secs(180)));
        });

        assert!(!registry.contains("idle"));
        assert_eq!(registry.len(), 20);
    }

    #[test]
    fn test_clear() {
        let (registry, _) = registry(1.0, 5);
        registry.admit("a");
        registry.admit("b");
        assert_eq!(registry.len(), 2);

        registry.clear();
        assert!(registry.is_empty());
    }
}
