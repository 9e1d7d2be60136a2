//! Client store trait for abstracting the locked and sharded registries.

use std::time::Duration;

/// Trait for per-client state tables.
///
/// This trait abstracts over `ClientRegistry` and `ShardedRegistry` so the
/// admission gate and the reclaimer can work with either.
pub trait ClientStore: Send + Sync {
    /// Fetch or create the client's bucket and try to take one token from it.
    fn admit(&self, identity: &str) -> bool;

    /// Remove clients that have gone unchecked for longer than `max_idle`.
    ///
    /// Returns the number of evicted clients.
    fn sweep(&self, max_idle: Duration) -> usize;

    /// Number of tracked clients.
    fn len(&self) -> usize;

    /// Whether no client is tracked.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the client currently has an entry.
    fn contains(&self, identity: &str) -> bool;
}
