//! Fixture Replay Library
//!
//! Captures a fixture's domain-event history from the production event log
//! into local snapshots and replays snapshots onto the message bus under a
//! brand-new fixture identity.

pub mod api;
pub mod bus;
pub mod codec;
pub mod extractor;
pub mod identity;
pub mod middleware;
pub mod models;
pub mod replay;
pub mod service;
pub mod snapshot;

pub use models::Config;
pub use service::ReplayService;
