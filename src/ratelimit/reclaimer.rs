//! Background eviction of idle clients.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::store::ClientStore;
use crate::error::{Result, TollgateError};

/// How often to sweep and how long a client may stay idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimPolicy {
    sweep_interval: Duration,
    max_idle: Duration,
}

impl ReclaimPolicy {
    /// Create a validated policy. The sweep interval must be non-zero.
    ///
    /// An interval that is not shorter than `max_idle` is accepted; the
    /// reclaimer warns about it once when it starts.
    pub fn new(sweep_interval: Duration, max_idle: Duration) -> Result<Self> {
        if sweep_interval.is_zero() {
            return Err(TollgateError::Config(
                "sweep interval must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            sweep_interval,
            max_idle,
        })
    }

    /// Time between sweeps.
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Idle time after which a client is evicted.
    pub fn max_idle(&self) -> Duration {
        self.max_idle
    }
}

impl Default for ReclaimPolicy {
    /// Sweep every minute, evict after three idle minutes.
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            max_idle: Duration::from_secs(180),
        }
    }
}

/// Handle to the task that periodically sweeps a client store.
///
/// The task stops when [`shutdown`](Reclaimer::shutdown) is called or the
/// handle is dropped.
pub struct Reclaimer {
    stop: watch::Sender<()>,
    task: JoinHandle<()>,
}

impl Reclaimer {
    /// Spawn the sweep loop on the current tokio runtime.
    ///
    /// The first sweep happens one interval after spawning.
    pub fn spawn(store: Arc<dyn ClientStore>, policy: ReclaimPolicy) -> Self {
        let (stop, mut stopped) = watch::channel(());

        if policy.sweep_interval >= policy.max_idle {
            warn!(
                sweep_interval_secs = policy.sweep_interval.as_secs_f64(),
                max_idle_secs = policy.max_idle.as_secs_f64(),
                "Sweep interval is not shorter than the idle threshold; idle clients will linger"
            );
        }

        info!(
            sweep_interval_secs = policy.sweep_interval.as_secs_f64(),
            max_idle_secs = policy.max_idle.as_secs_f64(),
            "Starting idle client reclaimer"
        );

        let task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(policy.sweep_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick.tick().await;

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let evicted = store.sweep(policy.max_idle);
                        debug!(
                            evicted,
                            tracked = store.len(),
                            "Reclaimer sweep finished"
                        );
                    }
                    // Fires on an explicit stop and when the handle is dropped.
                    _ = stopped.changed() => {
                        debug!("Reclaimer shutting down");
                        break;
                    }
                }
            }
        });

        Self { stop, task }
    }

    /// Stop the sweep loop and wait for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Reclaimer task ended abnormally");
        }
        info!("Idle client reclaimer stopped");
    }
}
