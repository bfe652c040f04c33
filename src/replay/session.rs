//! Per-run replay state. One session per replay call, never shared.

use crate::codec::PayloadKind;
use serde::Serialize;

/// An outward event that actually reached the publisher.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedEvent {
    pub sequence: String,
    pub source_kind: &'static str,
    pub payload_type: &'static str,
    pub correlation_id: String,
    pub logical_clock: i64,
}

#[derive(Debug)]
pub struct ReplaySession {
    pub dry_run: bool,
    /// Set once the first fixture-scheduled event has been handled.
    pub new_fixture_id: Option<String>,
    /// Downstream identifier of the new fixture, resolved after scheduling.
    pub external_id: Option<String>,
    logical_clock: i64,
    pub processed: usize,
    pub skipped: usize,
    pub published: Vec<PublishedEvent>,
}

impl ReplaySession {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            new_fixture_id: None,
            external_id: None,
            logical_clock: 0,
            processed: 0,
            skipped: 0,
            published: Vec::new(),
        }
    }

    /// Next logical clock value; the first event gets 1.
    pub fn tick(&mut self) -> i64 {
        self.logical_clock += 1;
        self.logical_clock
    }

    pub fn logical_clock(&self) -> i64 {
        self.logical_clock
    }

    /// Fixture and external ids, if scheduling has completed.
    pub fn established(&self) -> Option<(&str, &str)> {
        match (&self.new_fixture_id, &self.external_id) {
            (Some(f), Some(e)) => Some((f.as_str(), e.as_str())),
            _ => None,
        }
    }

    pub fn record_published(
        &mut self,
        sequence: &str,
        source: PayloadKind,
        payload_type: &'static str,
        correlation_id: String,
        logical_clock: i64,
    ) {
        self.published.push(PublishedEvent {
            sequence: sequence.to_string(),
            source_kind: source.label(),
            payload_type,
            correlation_id,
            logical_clock,
        });
    }
}
