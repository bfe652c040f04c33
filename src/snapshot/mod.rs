//! Fixture snapshots: the locally persisted, ordered copy of a fixture's
//! captured domain events.

pub mod store;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;

pub use store::{CreateOutcome, SnapshotStore};

/// An event ready to be persisted under a new snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSnapshotEvent {
    pub event_identifier: String,
    pub sequence: String,
    pub payload: Vec<u8>,
    pub payload_type: String,
}

#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub source_fixture_id: String,
    pub display_name: String,
    pub fetched_at: DateTime<Utc>,
    pub fetched_by: Option<String>,
    pub notes: Option<String>,
    pub events: Vec<NewSnapshotEvent>,
}

/// Metadata-only view used by listings and detail lookups.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotSummary {
    pub id: i64,
    pub source_fixture_id: String,
    pub display_name: String,
    pub fetched_at: DateTime<Utc>,
    pub fetched_by: Option<String>,
    pub total_events: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEvent {
    pub id: i64,
    pub snapshot_id: i64,
    pub event_identifier: String,
    pub sequence: String,
    pub payload: Vec<u8>,
    pub payload_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SnapshotWithEvents {
    pub summary: SnapshotSummary,
    pub events: Vec<SnapshotEvent>,
}

// ============================================================================
// SEQUENCE ORDERING
// ============================================================================

/// Compare two string-typed sequence values.
///
/// Numeric-looking values sort by value and before everything else;
/// non-numeric values sort lexically. Numeric ties (`"01"` vs `"1"`) fall back
/// to the raw text so the order stays total.
pub fn compare_sequence(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<i64>(), b.trim().parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Stable sort by sequence; equal sequences keep their existing relative order.
pub fn sort_by_sequence<T>(items: &mut [T], sequence: impl Fn(&T) -> &str) {
    items.sort_by(|a, b| compare_sequence(sequence(a), sequence(b)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_sequences_sort_by_value() {
        let mut seqs = vec!["2", "10", "1"];
        sort_by_sequence(&mut seqs, |s| s);
        assert_eq!(seqs, vec!["1", "2", "10"]);
    }

    #[test]
    fn test_non_numeric_sequences_follow_numeric() {
        let mut seqs = vec!["b-2", "7", "a-9", "-3"];
        sort_by_sequence(&mut seqs, |s| s);
        assert_eq!(seqs, vec!["-3", "7", "a-9", "b-2"]);
    }

    #[test]
    fn test_ties_keep_stored_order() {
        let mut items = vec![("5", "first"), ("1", "x"), ("5", "second"), ("5", "third")];
        sort_by_sequence(&mut items, |(seq, _)| seq);
        let labels: Vec<_> = items.iter().map(|(_, l)| *l).collect();
        assert_eq!(labels, vec!["x", "first", "second", "third"]);
    }
}
