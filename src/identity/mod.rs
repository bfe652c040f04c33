//! Identity Remapper
//!
//! Resolves a freshly scheduled fixture id to the identifier a downstream
//! system assigned to it. Resolution only succeeds once the scheduling event
//! has propagated, so callers poll.

pub mod http;

use anyhow::Result;

pub use http::HttpIdentityRemapper;

#[async_trait::async_trait]
pub trait IdentityRemapper: Send + Sync {
    /// `Ok(None)` means "not known yet"; errors are transport or protocol failures.
    async fn resolve_external_id(&self, fixture_id: &str) -> Result<Option<String>>;
}
