//! Rate limiting logic and state management.

mod bucket;
mod clock;
mod entry;
mod gate;
mod reclaimer;
mod registry;
mod sharded;
mod store;

pub use bucket::{BucketConfig, TokenBucket};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use entry::{BucketRef, ClientEntry};
pub use gate::{AdmissionDecision, AdmissionGate, GateCell};
pub use reclaimer::{ReclaimPolicy, Reclaimer};
pub use registry::{ClientRegistry, RegistryBucket};
pub use sharded::{ShardedBucket, ShardedRegistry};
pub use store::ClientStore;
