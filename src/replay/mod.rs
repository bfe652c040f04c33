//! Replay State Machine
//!
//! Re-emits a snapshot's events under a brand-new fixture identity, in stored
//! order, aborting on the first event that cannot be decoded or published.

pub mod cancel;
pub mod engine;
pub mod error;
pub mod session;

use std::time::Duration;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use engine::{FailedEvent, ReplayEngine, ReplayFailure, ReplayPlan, ReplayReport};
pub use error::ReplayError;
pub use session::{PublishedEvent, ReplaySession};

/// Tuning and identity values stamped onto every replay.
#[derive(Debug, Clone)]
pub struct ReplaySettings {
    pub topic: String,
    pub producer_name: String,
    pub external_id_system: String,
    pub remap_initial_delay: Duration,
    pub remap_poll_interval: Duration,
    pub remap_timeout: Duration,
    pub opinion_settle: Duration,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            topic: "afl.gameui.events".to_string(),
            producer_name: "fixture-replay".to_string(),
            external_id_system: "ramp".to_string(),
            remap_initial_delay: Duration::from_millis(5_000),
            remap_poll_interval: Duration::from_millis(1_000),
            remap_timeout: Duration::from_millis(30_000),
            opinion_settle: Duration::from_millis(1_000),
        }
    }
}
