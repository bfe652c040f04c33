use crate::replay::{PublishedEvent, ReplaySettings};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Configuration
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    /// Upstream event log; `None` surfaces as a configuration error on ingest.
    pub production_event_log: Option<String>,
    pub port: u16,
    pub identity_management_url: String,
    pub bus_rest_url: String,
    pub bus_cluster_id: String,
    pub replay_topic: String,
    pub producer_name: String,
    pub external_id_system: String,
    pub remap_initial_delay_ms: u64,
    pub remap_poll_interval_ms: u64,
    pub remap_timeout_ms: u64,
    pub opinion_settle_ms: u64,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_millis(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let production_event_log = std::env::var("PRODUCTION_EVENT_LOG")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        Ok(Self {
            database_path: env_or("REPLAY_DB_PATH", "./replay_snapshots.db"),
            production_event_log,
            port,
            identity_management_url: env_or("IDENTITY_MANAGEMENT_URL", "http://localhost:5000"),
            bus_rest_url: env_or("BUS_REST_URL", "http://localhost:8082"),
            bus_cluster_id: env_or("BUS_CLUSTER_ID", "local"),
            replay_topic: env_or("REPLAY_TOPIC", "afl.gameui.events"),
            producer_name: env_or("REPLAY_PRODUCER_NAME", "fixture-replay"),
            external_id_system: env_or("EXTERNAL_ID_SYSTEM", "ramp"),
            remap_initial_delay_ms: env_millis("REMAP_INITIAL_DELAY_MS", 5_000),
            remap_poll_interval_ms: env_millis("REMAP_POLL_INTERVAL_MS", 1_000),
            remap_timeout_ms: env_millis("REMAP_TIMEOUT_MS", 30_000),
            opinion_settle_ms: env_millis("OPINION_SETTLE_MS", 1_000),
        })
    }

    pub fn replay_settings(&self) -> ReplaySettings {
        ReplaySettings {
            topic: self.replay_topic.clone(),
            producer_name: self.producer_name.clone(),
            external_id_system: self.external_id_system.clone(),
            remap_initial_delay: Duration::from_millis(self.remap_initial_delay_ms),
            remap_poll_interval: Duration::from_millis(self.remap_poll_interval_ms.max(1)),
            remap_timeout: Duration::from_millis(self.remap_timeout_ms),
            opinion_settle: Duration::from_millis(self.opinion_settle_ms),
        }
    }
}

// ============================================================================
// Ingestion
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub source_fixture_id: String,
    pub display_name: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    pub message: String,
    /// Newly assigned id, or the existing snapshot's id for a duplicate.
    pub snapshot_id: Option<i64>,
    pub event_count: i64,
}

impl IngestResponse {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            snapshot_id: None,
            event_count: 0,
        }
    }
}

// ============================================================================
// Replay
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayRequest {
    pub snapshot_id: i64,
    pub environment: String,
    pub target_start: DateTime<Utc>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayResponse {
    pub success: bool,
    pub message: String,
    pub events_processed: usize,
    pub events_failed: usize,
    pub events_skipped: usize,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub new_fixture_id: Option<String>,
    /// Machine-readable failure kind (`remap_timeout`, `decode`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Events that reached the bus, in order, even when the replay later failed.
    #[serde(default)]
    pub published: Vec<PublishedEventDto>,
}

impl ReplayResponse {
    pub fn rejected(
        message: impl Into<String>,
        error_kind: &str,
        started_at: DateTime<Utc>,
    ) -> Self {
        let message = message.into();
        Self {
            success: false,
            errors: vec![message.clone()],
            message,
            events_processed: 0,
            events_failed: 0,
            events_skipped: 0,
            started_at,
            completed_at: Utc::now(),
            new_fixture_id: None,
            error_kind: Some(error_kind.to_string()),
            published: Vec::new(),
        }
    }
}

/// Owned, deserializable mirror of [`PublishedEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedEventDto {
    pub sequence: String,
    pub source_kind: String,
    pub payload_type: String,
    pub correlation_id: String,
    pub logical_clock: i64,
}

impl From<PublishedEvent> for PublishedEventDto {
    fn from(p: PublishedEvent) -> Self {
        Self {
            sequence: p.sequence,
            source_kind: p.source_kind.to_string(),
            payload_type: p.payload_type.to_string(),
            correlation_id: p.correlation_id,
            logical_clock: p.logical_clock,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}
