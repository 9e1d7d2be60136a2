//! Client registry sharded by identity hash.
//!
//! Same contract as [`ClientRegistry`](super::ClientRegistry), but the map is
//! a `DashMap`, so inserting or sweeping one shard does not stall checks
//! against the others.

use dashmap::mapref::one::Ref;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::bucket::BucketConfig;
use super::clock::{Clock, MonotonicClock};
use super::entry::{BucketRef, ClientEntry};
use super::store::ClientStore;

/// Bucket handle returned by [`ShardedRegistry::get_or_create`].
pub type ShardedBucket<'a> = BucketRef<'a, Ref<'a, String, ClientEntry>>;

/// A client registry backed by a sharded concurrent map.
pub struct ShardedRegistry {
    entries: DashMap<String, ClientEntry>,
    config: BucketConfig,
    clock: Arc<dyn Clock>,
}

impl ShardedRegistry {
    /// Create an empty registry using the monotonic system clock.
    pub fn new(config: BucketConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock))
    }

    /// Create an empty registry reading time from `clock`.
    pub fn with_clock(config: BucketConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            clock,
        }
    }

    /// Get the bucket for `identity`, creating a full one on first sight.
    ///
    /// The handle holds a read lock on the client's shard.
    pub fn get_or_create(&self, identity: &str) -> ShardedBucket<'_> {
        let now = self.clock.now();

        trace!(identity = %identity, "Looking up client");

        if let Some(entry) = self.entries.get(identity) {
            entry.touch(now);
            return BucketRef::new(entry, &*self.clock);
        }

        let entry = self
            .entries
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
            .downgrade();
        entry.touch(now);

        BucketRef::new(entry, &*self.clock)
    }

    /// Remove every client idle for longer than `max_idle`.
    pub fn sweep(&self, max_idle: Duration) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        let mut evicted = 0;

        self.entries.retain(|_, entry| {
            let keep = !entry.is_idle(now, max_idle);
            if !keep {
                evicted += 1;
            }
            keep
        });

        if evicted > 0 {
            debug!(
                evicted,
                before,
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
        self.entries.contains_key(identity)
    }

    /// Get the number of tracked clients.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no client is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every client.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl ClientStore for ShardedRegistry {
    fn admit(&self, identity: &str) -> bool {
        self.get_or_create(identity).allow()
    }

    fn sweep(&self, max_idle: Duration) -> usize {
        ShardedRegistry::sweep(self, max_idle)
    }

    fn len(&self) -> usize {
        ShardedRegistry::len(self)
    }

    fn contains(&self, identity: &str) -> bool {
        ShardedRegistry::contains(self, identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn registry(rate: f64, capacity: u32) -> (ShardedRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = BucketConfig::new(rate, capacity).unwrap();
        (ShardedRegistry::with_clock(config, clock.clone()), clock)
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
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_clients_have_separate_buckets() {
        let (registry, _) = registry(1.0, 1);

        assert!(registry.admit("a"));
        assert!(!registry.admit("a"));
        assert!(registry.admit("b"));
    }

    #[test]
    fn test_sweep_evicts_only_idle_clients() {
        let (registry, clock) = registry(1.0, 5);

        registry.admit("A");
        clock.advance(Duration::from_secs(170));
        registry.admit("B");
        clock.advance(Duration::from_secs(11));

        assert_eq!(registry.sweep(Duration::from_secs(180)), 1);
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
    fn test_clear() {
        let (registry, _) = registry(1.0, 5);
        registry.admit("a");
        assert!(!registry.is_empty());

        registry.clear();
        assert!(registry.is_empty());
    }
}
