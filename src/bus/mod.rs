//! Event Publisher
//!
//! Outward events leave the engine through [`EventPublisher`]. Records sharing
//! a key are assumed to keep their relative order on the bus; delivery is
//! at-least-once and a returned `Ok` is the only acknowledgement awaited.

pub mod rest_proxy;

use anyhow::Result;
use bytes::Bytes;

pub use rest_proxy::RestProxyPublisher;

/// A fully encoded record ready for the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    /// Partition/ordering key: the replayed fixture id.
    pub key: String,
    pub correlation_id: String,
    pub payload_type: &'static str,
    pub payload: Bytes,
}

#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, message: &OutboundMessage) -> Result<()>;
}
