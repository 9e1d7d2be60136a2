//! Per-client state held by a store.

use parking_lot::Mutex;
use std::ops::Deref;
use std::time::{Duration, Instant};

use super::bucket::{BucketConfig, TokenBucket};
use super::clock::Clock;

/// The bucket and last-seen time of one client.
///
/// Both fields sit behind their own mutex so that they can be updated while
/// the owning map is only share-locked.
#[derive(Debug)]
pub struct ClientEntry {
    bucket: Mutex<TokenBucket>,
    last_seen: Mutex<Instant>,
}

impl ClientEntry {
    pub(crate) fn new(config: BucketConfig, now: Instant) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(config, now)),
            last_seen: Mutex::new(now),
        }
    }

    /// Record an admission check at `now`.
    pub(crate) fn touch(&self, now: Instant) {
        let mut last_seen = self.last_seen.lock();
        if now > *last_seen {
            *last_seen = now;
        }
    }

    /// When this client was last checked.
    pub fn last_seen(&self) -> Instant {
        *self.last_seen.lock()
    }

    /// How long the client has gone unchecked as of `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen())
    }

    pub(crate) fn is_idle(&self, now: Instant, max_idle: Duration) -> bool {
        self.idle_for(now) > max_idle
    }

    /// Take a token if one is available at `now`.
    pub fn allow_at(&self, now: Instant) -> bool {
        self.bucket.lock().allow_at(now)
    }

    /// Fill level of the bucket as of `now`.
    pub fn tokens_at(&self, now: Instant) -> f64 {
        self.bucket.lock().tokens_at(now)
    }
}

/// A borrowed client entry, valid for the duration of one check.
///
/// `G` is the map guard that keeps the entry alive; while a `BucketRef`
/// exists the entry cannot be swept.
pub struct BucketRef<'a, G>
where
    G: Deref<Target = ClientEntry>,
{
    entry: G,
    clock: &'a dyn Clock,
}

impl<'a, G> BucketRef<'a, G>
where
    G: Deref<Target = ClientEntry>,
{
    pub(crate) fn new(entry: G, clock: &'a dyn Clock) -> Self {
        Self { entry, clock }
    }

    /// Take a token if one is available now.
    pub fn allow(&self) -> bool {
        self.entry.allow_at(self.clock.now())
    }

    /// Current fill level of the bucket.
    pub fn tokens(&self) -> f64 {
        self.entry.tokens_at(self.clock.now())
    }
}

impl<G> Deref for BucketRef<'_, G>
where
    G: Deref<Target = ClientEntry>,
{
    type Target = ClientEntry;

    fn deref(&self) -> &ClientEntry {
        &self.entry
    }
}
