//! Production Extractor
//!
//! Pulls the captured history of one fixture out of the upstream event log,
//! bounded by the first fixture-started marker, and shapes it into snapshot
//! events ready for persistence. Payloads are copied raw, never decoded here.

pub mod sqlite_log;

use crate::codec::tags;
use crate::snapshot::{sort_by_sequence, NewSnapshotEvent};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use sqlite_log::SqliteEventLog;

/// One row of the upstream event log.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamEventRow {
    pub event_identifier: String,
    pub sequence: String,
    pub payload: Vec<u8>,
    pub payload_type: String,
    pub created_at: DateTime<Utc>,
}

/// Read access to the upstream event store.
#[async_trait::async_trait]
pub trait EventLogSource: Send + Sync {
    /// Creation time of the earliest event of `marker_type` for the identifier.
    async fn cutoff_time(
        &self,
        event_identifier: &str,
        marker_type: &str,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Events for the identifier created at or before `cutoff` (all when `None`),
    /// ordered by sequence then creation time.
    async fn events_until(
        &self,
        event_identifier: &str,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<Vec<UpstreamEventRow>>;

    async fn ping(&self) -> Result<()>;

    fn describe(&self) -> String;
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum ExtractError {
    /// No upstream event log is configured.
    NotConfigured,
    Query(anyhow::Error),
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured => {
                write!(f, "production event log is not configured (set PRODUCTION_EVENT_LOG)")
            }
            Self::Query(e) => write!(f, "production event log query failed: {:#}", e),
        }
    }
}

impl std::error::Error for ExtractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Query(e) => Some(&**e),
            Self::NotConfigured => None,
        }
    }
}

// ============================================================================
// EXTRACTOR
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub configured: bool,
    pub reachable: bool,
    pub source: Option<String>,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct ProductionExtractor {
    source: Option<Arc<dyn EventLogSource>>,
}

impl ProductionExtractor {
    pub fn new(source: Arc<dyn EventLogSource>) -> Self {
        Self {
            source: Some(source),
        }
    }

    pub fn unconfigured() -> Self {
        Self { source: None }
    }

    pub fn is_configured(&self) -> bool {
        self.source.is_some()
    }

    /// Ordered, cutoff-bounded events for one fixture.
    ///
    /// Any query failure fails the whole extraction; no partial list is returned.
    pub async fn extract(
        &self,
        event_identifier: &str,
    ) -> Result<Vec<NewSnapshotEvent>, ExtractError> {
        let source = self.source.as_ref().ok_or(ExtractError::NotConfigured)?;

        let cutoff = source
            .cutoff_time(event_identifier, tags::FIXTURE_STARTED)
            .await
            .map_err(ExtractError::Query)?;

        match cutoff {
            Some(ts) => info!(event_identifier, cutoff = %ts, "⏱️ Production cutoff found"),
            None => info!(event_identifier, "No fixture-started marker; extracting all events"),
        }

        let rows = source
            .events_until(event_identifier, cutoff)
            .await
            .map_err(ExtractError::Query)?;

        let fetched = rows.len();
        let mut events: Vec<NewSnapshotEvent> = rows
            .into_iter()
            .filter(|row| row.payload_type != tags::FIXTURE_STARTED)
            .map(|row| NewSnapshotEvent {
                event_identifier: row.event_identifier,
                sequence: row.sequence,
                payload: row.payload,
                payload_type: row.payload_type,
            })
            .collect();

        sort_by_sequence(&mut events, |e| e.sequence.as_str());

        debug!(
            event_identifier,
            "Extracted {} events ({} cutoff markers dropped)",
            events.len(),
            fetched - events.len()
        );
        Ok(events)
    }

    pub async fn validate_connection(&self) -> ConnectionStatus {
        let Some(source) = self.source.as_ref() else {
            return ConnectionStatus {
                configured: false,
                reachable: false,
                source: None,
                error: Some(ExtractError::NotConfigured.to_string()),
            };
        };

        match source.ping().await {
            Ok(()) => ConnectionStatus {
                configured: true,
                reachable: true,
                source: Some(source.describe()),
                error: None,
            },
            Err(e) => {
                warn!("Production event log unreachable: {:#}", e);
                ConnectionStatus {
                    configured: true,
                    reachable: false,
                    source: Some(source.describe()),
                    error: Some(format!("{:#}", e)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use chrono::TimeZone;
    use parking_lot::Mutex;

    struct FakeLog {
        rows: Vec<UpstreamEventRow>,
        fail_events: bool,
        seen_cutoff: Mutex<Option<Option<DateTime<Utc>>>>,
    }

    #[async_trait::async_trait]
    impl EventLogSource for FakeLog {
        async fn cutoff_time(&self, id: &str, marker: &str) -> Result<Option<DateTime<Utc>>> {
            Ok(self
                .rows
                .iter()
                .filter(|r| r.event_identifier == id && r.payload_type == marker)
                .map(|r| r.created_at)
                .min())
        }

        async fn events_until(
            &self,
            id: &str,
            cutoff: Option<DateTime<Utc>>,
        ) -> Result<Vec<UpstreamEventRow>> {
            *self.seen_cutoff.lock() = Some(cutoff);
            if self.fail_events {
                return Err(anyhow!("connection reset"));
            }
            Ok(self
                .rows
                .iter()
                .filter(|r| r.event_identifier == id)
                .filter(|r| cutoff.map_or(true, |c| r.created_at <= c))
                .cloned()
                .collect())
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        fn describe(&self) -> String {
            "fake".to_string()
        }
    }

    fn row(seq: &str, payload_type: &str, minute: u32) -> UpstreamEventRow {
        UpstreamEventRow {
            event_identifier: "G1".to_string(),
            sequence: seq.to_string(),
            payload: vec![9, 9, 9, 9, 9, 1],
            payload_type: payload_type.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 6, 1, 10, minute, 0).unwrap(),
        }
    }

    fn fake(rows: Vec<UpstreamEventRow>) -> Arc<FakeLog> {
        Arc::new(FakeLog {
            rows,
            fail_events: false,
            seen_cutoff: Mutex::new(None),
        })
    }

    #[tokio::test]
    async fn test_cutoff_bounds_and_marker_dropped() {
        let log = fake(vec![
            row("1", tags::FIXTURE_SCHEDULED, 0),
            row("2", tags::TRADING_OPINION_CREATED, 1),
            row("3", tags::FIXTURE_STARTED, 2),
            row("4", tags::TRADING_OPINION_UPDATED, 3),
        ]);
        let extractor = ProductionExtractor::new(log.clone());

        let events = extractor.extract("G1").await.unwrap();
        let types: Vec<_> = events.iter().map(|e| e.payload_type.as_str()).collect();
        assert_eq!(types, vec![tags::FIXTURE_SCHEDULED, tags::TRADING_OPINION_CREATED]);
        assert_eq!(events[0].payload, vec![9, 9, 9, 9, 9, 1]);
        let seen = *log.seen_cutoff.lock();
        assert!(matches!(seen, Some(Some(_))));
    }

    #[tokio::test]
    async fn test_no_marker_extracts_everything() {
        let log = fake(vec![
            row("10", tags::TRADING_OPINION_UPDATED, 5),
            row("2", tags::TRADING_OPINION_CREATED, 1),
            row("1", tags::FIXTURE_SCHEDULED, 0),
        ]);
        let extractor = ProductionExtractor::new(log.clone());

        let events = extractor.extract("G1").await.unwrap();
        let seqs: Vec<_> = events.iter().map(|e| e.sequence.as_str()).collect();
        assert_eq!(seqs, vec!["1", "2", "10"]);
        assert_eq!(*log.seen_cutoff.lock(), Some(None));
    }

    #[tokio::test]
    async fn test_unconfigured_is_configuration_error() {
        let extractor = ProductionExtractor::unconfigured();
        let err = extractor.extract("G1").await.unwrap_err();
        assert!(matches!(err, ExtractError::NotConfigured));

        let status = extractor.validate_connection().await;
        assert!(!status.configured);
        assert!(!status.reachable);
    }

    #[tokio::test]
    async fn test_query_failure_fails_whole_extraction() {
        let log = Arc::new(FakeLog {
            rows: vec![row("1", tags::FIXTURE_SCHEDULED, 0)],
            fail_events: true,
            seen_cutoff: Mutex::new(None),
        });
        let extractor = ProductionExtractor::new(log);
        let err = extractor.extract("G1").await.unwrap_err();
        assert!(matches!(err, ExtractError::Query(_)));
        assert!(err.to_string().contains("connection reset"));
    }
}
