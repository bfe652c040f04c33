//! Replay service: the boundary the HTTP API and CLI talk to.
//!
//! Every failure leaving this layer is a structured response, never a raw
//! error, except plain storage failures on list/get/delete.

use crate::bus::{EventPublisher, RestProxyPublisher};
use crate::extractor::{ConnectionStatus, ProductionExtractor, SqliteEventLog};
use crate::identity::{HttpIdentityRemapper, IdentityRemapper};
use crate::models::{Config, IngestRequest, IngestResponse, ReplayRequest, ReplayResponse};
use crate::replay::{
    cancel_pair, CancelHandle, CancelSignal, ReplayEngine, ReplayPlan, ReplayReport,
};
use crate::snapshot::{CreateOutcome, NewSnapshot, SnapshotStore, SnapshotSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// `error_kind` values produced by the service itself (engine kinds come from `ReplayError`).
pub mod kinds {
    pub const NOT_FOUND: &str = "not_found";
    pub const CONFLICT: &str = "conflict";
    pub const STORAGE: &str = "storage";
    pub const INTERNAL: &str = "internal";
}

#[derive(Clone)]
pub struct ReplayService {
    store: SnapshotStore,
    extractor: ProductionExtractor,
    engine: ReplayEngine,
    active: Arc<Mutex<HashMap<i64, CancelHandle>>>,
}

/// Removes the in-flight entry when the replay call returns.
struct ActiveReplay {
    snapshot_id: i64,
    active: Arc<Mutex<HashMap<i64, CancelHandle>>>,
}

impl Drop for ActiveReplay {
    fn drop(&mut self) {
        self.active.lock().remove(&self.snapshot_id);
    }
}

impl ReplayService {
    pub fn new(store: SnapshotStore, extractor: ProductionExtractor, engine: ReplayEngine) -> Self {
        Self {
            store,
            extractor,
            engine,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wire the production adapters described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = SnapshotStore::new(&config.database_path)?;

        let extractor = match config.production_event_log.as_deref() {
            Some(path) => ProductionExtractor::new(Arc::new(
                SqliteEventLog::open_read_only(path).context("open production event log")?,
            )),
            None => {
                warn!("⚠️ PRODUCTION_EVENT_LOG not set; ingestion will be unavailable");
                ProductionExtractor::unconfigured()
            }
        };

        let publisher: Arc<dyn EventPublisher> = Arc::new(RestProxyPublisher::new(
            &config.bus_rest_url,
            &config.bus_cluster_id,
        )?);
        let remapper: Arc<dyn IdentityRemapper> =
            Arc::new(HttpIdentityRemapper::new(&config.identity_management_url)?);
        let engine = ReplayEngine::new(publisher, remapper, config.replay_settings());

        Ok(Self::new(store, extractor, engine))
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    // ==================== INGESTION ====================

    /// Capture a fixture's upstream history as a new snapshot.
    pub async fn ingest(&self, req: IngestRequest, operator: Option<&str>) -> IngestResponse {
        let source_fixture_id = req.source_fixture_id.trim().to_string();
        if source_fixture_id.is_empty() {
            return IngestResponse::failed("source_fixture_id is required");
        }

        match self.store.find_by_source(&source_fixture_id) {
            Ok(Some(existing)) => {
                return duplicate_response(&source_fixture_id, existing.id, existing.total_events)
            }
            Ok(None) => {}
            Err(e) => {
                error!("Snapshot lookup failed: {:#}", e);
                return IngestResponse::failed(format!("Error fetching game data: {:#}", e));
            }
        }

        let events = match self.extractor.extract(&source_fixture_id).await {
            Ok(events) => events,
            Err(e) => {
                error!(source_fixture_id = %source_fixture_id, "Extraction failed: {}", e);
                return IngestResponse::failed(format!("Error fetching game data: {}", e));
            }
        };
        if events.is_empty() {
            return IngestResponse::failed(format!(
                "No events found for fixture {}",
                source_fixture_id
            ));
        }

        let display_name = if req.display_name.trim().is_empty() {
            source_fixture_id.clone()
        } else {
            req.display_name.trim().to_string()
        };
        let snapshot = NewSnapshot {
            source_fixture_id: source_fixture_id.clone(),
            display_name,
            fetched_at: Utc::now(),
            fetched_by: operator.map(str::to_string),
            notes: req.notes.filter(|n| !n.trim().is_empty()),
            events,
        };

        match self.store.create(&snapshot) {
            Ok(CreateOutcome::Created { id, event_count }) => IngestResponse {
                success: true,
                message: format!(
                    "Fetched {} events for fixture {}",
                    event_count, source_fixture_id
                ),
                snapshot_id: Some(id),
                event_count,
            },
            Ok(CreateOutcome::Duplicate {
                existing_id,
                event_count,
            }) => duplicate_response(&source_fixture_id, existing_id, event_count),
            Err(e) => {
                error!("Snapshot create failed: {:#}", e);
                IngestResponse::failed(format!("Error fetching game data: {:#}", e))
            }
        }
    }

    pub fn list(&self) -> Result<Vec<SnapshotSummary>> {
        self.store.list()
    }

    pub fn get(&self, id: i64) -> Result<Option<SnapshotSummary>> {
        self.store.get_by_id(id)
    }

    pub fn delete(&self, id: i64) -> Result<bool> {
        self.store.delete(id)
    }

    pub async fn validate_connection(&self) -> ConnectionStatus {
        self.extractor.validate_connection().await
    }

    // ==================== REPLAY ====================

    /// Replay a snapshot. Replays of the same snapshot are serialized: a second
    /// concurrent request is refused rather than queued.
    ///
    /// The run happens on its own task, so dropping the returned future (a
    /// disconnected HTTP client) does not stop it; only [`Self::cancel`] does.
    pub async fn replay(&self, req: ReplayRequest) -> ReplayResponse {
        let started_at = Utc::now();
        let snapshot_id = req.snapshot_id;

        let (handle, signal) = cancel_pair();
        let active = {
            let mut active = self.active.lock();
            if active.contains_key(&snapshot_id) {
                warn!(snapshot_id, "Replay already running");
                return ReplayResponse::rejected(
                    format!("Snapshot {} is already being replayed", snapshot_id),
                    kinds::CONFLICT,
                    started_at,
                );
            }
            active.insert(snapshot_id, handle);
            ActiveReplay {
                snapshot_id,
                active: self.active.clone(),
            }
        };

        let store = self.store.clone();
        let engine = self.engine.clone();
        let task = tokio::spawn(async move {
            let _active = active;
            run_replay(store, engine, req, signal, started_at).await
        });

        match task.await {
            Ok(response) => response,
            Err(e) => {
                error!(snapshot_id, "Replay task failed: {}", e);
                ReplayResponse::rejected(
                    format!("Error executing replay: {}", e),
                    kinds::INTERNAL,
                    started_at,
                )
            }
        }
    }

    /// Request cancellation of an in-flight replay. False if none is running.
    pub fn cancel(&self, snapshot_id: i64) -> bool {
        match self.active.lock().get(&snapshot_id) {
            Some(handle) => {
                handle.cancel();
                info!(snapshot_id, "🛑 Replay cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn is_replaying(&self, snapshot_id: i64) -> bool {
        self.active.lock().contains_key(&snapshot_id)
    }
}

async fn run_replay(
    store: SnapshotStore,
    engine: ReplayEngine,
    req: ReplayRequest,
    signal: CancelSignal,
    started_at: DateTime<Utc>,
) -> ReplayResponse {
    let snapshot = match store.get_with_events(req.snapshot_id) {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => {
            return ReplayResponse::rejected(
                format!("Snapshot {} not found", req.snapshot_id),
                kinds::NOT_FOUND,
                started_at,
            )
        }
        Err(e) => {
            error!(snapshot_id = req.snapshot_id, "Snapshot load failed: {:#}", e);
            return ReplayResponse::rejected(
                format!("Error executing replay: {:#}", e),
                kinds::STORAGE,
                started_at,
            );
        }
    };

    info!(
        snapshot_id = req.snapshot_id,
        source_fixture_id = %snapshot.summary.source_fixture_id,
        "🎬 Starting replay of {} events",
        snapshot.events.len()
    );

    let plan = ReplayPlan {
        target_start: req.target_start,
        environment: req.environment,
        dry_run: req.dry_run,
    };
    let report = engine.run(&snapshot.events, &plan, &signal).await;
    response_from_report(report, started_at)
}

fn duplicate_response(
    source_fixture_id: &str,
    existing_id: i64,
    event_count: i64,
) -> IngestResponse {
    IngestResponse {
        success: false,
        message: format!(
            "A snapshot for fixture {} already exists (id {})",
            source_fixture_id, existing_id
        ),
        snapshot_id: Some(existing_id),
        event_count,
    }
}

fn response_from_report(report: ReplayReport, started_at: DateTime<Utc>) -> ReplayResponse {
    let completed_at = Utc::now();
    let published_count = report.published.len();
    let published: Vec<_> = report.published.into_iter().map(Into::into).collect();

    match report.failure {
        None => {
            let message = if report.dry_run {
                format!("Dry run completed. Would process {} events.", report.processed)
            } else {
                format!(
                    "Replay completed. Processed {} events, {} skipped.",
                    report.processed, report.skipped
                )
            };
            ReplayResponse {
                success: true,
                message,
                events_processed: report.processed,
                events_failed: 0,
                events_skipped: report.skipped,
                errors: Vec::new(),
                started_at,
                completed_at,
                new_fixture_id: report.new_fixture_id,
                error_kind: None,
                published,
            }
        }
        Some(failure) => {
            let error = failure.error.to_string();
            let mut message = format!("Error executing replay: {}", error);
            if published_count > 0 {
                message.push_str(&format!(
                    " ({} events were already published for fixture {})",
                    published_count,
                    report.new_fixture_id.as_deref().unwrap_or("-")
                ));
            }
            ReplayResponse {
                success: false,
                message,
                events_processed: report.processed,
                events_failed: usize::from(failure.event.is_some()),
                events_skipped: report.skipped,
                errors: vec![error],
                started_at,
                completed_at,
                new_fixture_id: None,
                error_kind: Some(failure.error.kind().to_string()),
                published,
            }
        }
    }
}
