//! Request-facing admission checks.

use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, trace};

use super::bucket::BucketConfig;
use super::registry::ClientRegistry;
use super::sharded::ShardedRegistry;
use super::store::ClientStore;
use crate::config::LimiterConfig;
use crate::error::Result;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// The request may proceed to the protected handler
    Allow,
    /// The request must be rejected as rate limited
    Deny,
}

impl AdmissionDecision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, AdmissionDecision::Allow)
    }
}

impl From<bool> for AdmissionDecision {
    fn from(allowed: bool) -> Self {
        if allowed {
            AdmissionDecision::Allow
        } else {
            AdmissionDecision::Deny
        }
    }
}

impl fmt::Display for AdmissionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionDecision::Allow => write!(f, "allow"),
            AdmissionDecision::Deny => write!(f, "deny"),
        }
    }
}

/// Decides whether a client's request may proceed.
///
/// Identities must already be resolved and non-empty; resolution failures
/// are handled before a request ever reaches the gate.
pub struct AdmissionGate {
    store: Arc<dyn ClientStore>,
}

impl AdmissionGate {
    /// Create a gate over an existing store.
    pub fn new(store: Arc<dyn ClientStore>) -> Self {
        Self { store }
    }

    /// Build the store described by `config` and wrap it in a gate.
    pub fn from_config(config: &LimiterConfig) -> Result<Self> {
        Ok(Self::build(config.bucket()?, config.sharded))
    }

    fn build(bucket: BucketConfig, sharded: bool) -> Self {
        let store: Arc<dyn ClientStore> = if sharded {
            Arc::new(ShardedRegistry::new(bucket))
        } else {
            Arc::new(ClientRegistry::new(bucket))
        };

        info!(
            refill_rate = bucket.refill_rate(),
            burst = bucket.capacity(),
            sharded,
            "Admission gate initialized"
        );

        Self::new(store)
    }

    /// Check one request from `identity`.
    pub fn check(&self, identity: &str) -> AdmissionDecision {
        debug_assert!(!identity.is_empty(), "client identity must be resolved");

        let decision = AdmissionDecision::from(self.store.admit(identity));

        match decision {
            AdmissionDecision::Allow => {
                trace!(identity = %identity, "Request admitted");
            }
            AdmissionDecision::Deny => {
                debug!(identity = %identity, "Rate limit exceeded");
            }
        }
        decision
    }

    /// The store backing this gate, for wiring up the reclaimer.
    pub fn store(&self) -> Arc<dyn ClientStore> {
        Arc::clone(&self.store)
    }

    /// Get the number of tracked clients.
    pub fn tracked_clients(&self) -> usize {
        self.store.len()
    }
}

/// Holds the process-wide gate and builds it at most once.
///
/// Every caller of [`get_or_init`](GateCell::get_or_init) receives the same
/// gate; the configuration of the first successful call wins and later
/// configurations are ignored.
#[derive(Default)]
pub struct GateCell {
    gate: OnceLock<Arc<AdmissionGate>>,
}

impl GateCell {
    /// Create an empty cell.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the shared gate, building it from `config` if this is the
    /// first call.
    ///
    /// An invalid configuration is rejected even when the gate already exists.
    pub fn get_or_init(&self, config: &LimiterConfig) -> Result<Arc<AdmissionGate>> {
        let bucket = config.bucket()?;
        let gate = self
            .gate
            .get_or_init(|| Arc::new(AdmissionGate::build(bucket, config.sharded)));
        Ok(Arc::clone(gate))
    }

    /// The shared gate, if it has been built.
    pub fn get(&self) -> Option<Arc<AdmissionGate>> {
        self.gate.get().cloned()
    }
}
