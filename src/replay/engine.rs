//! Replay engine: precondition check, per-event dispatch and publication.

use super::{CancelSignal, ReplayError, ReplaySession, ReplaySettings};
use crate::bus::{EventPublisher, OutboundMessage};
use crate::codec::messages::{
    Competition, EventHeaders, Fixture, Handicap, Identifier, OfferingType,
    PlayersTradingOpinionUpdated, ProductOfferingLevel, ProductOfferingType, RecordHeaders,
    Source, SourceId, Team, TeamDesignation, Timestamp, TotalPoints, TradingOpinionCreated,
    TradingOpinionUpdate, TradingOpinionUpdated, Venue,
};
use crate::codec::{self, DomainEvent, FixtureScheduled, OutboundEvent, PayloadKind};
use crate::identity::IdentityRemapper;
use crate::snapshot::SnapshotEvent;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Offering level stamped on newly created trading opinions.
const CREATED_OFFERING_LEVEL: i32 = 2;
/// Offering level forced onto every replayed opinion update.
const UPDATED_OFFERING_LEVEL: i32 = 5;
const REPLAY_VENUE: &str = "Replay Venue";
/// External id used when a dry run skips identity resolution.
const DRY_RUN_EXTERNAL_ID: &str = "dry-run";

#[derive(Debug, Clone)]
pub struct ReplayPlan {
    pub target_start: DateTime<Utc>,
    pub environment: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedEvent {
    pub sequence: String,
    pub payload_type: String,
}

#[derive(Debug)]
pub struct ReplayFailure {
    pub error: ReplayError,
    /// The event being handled when the replay aborted; `None` for precondition failures.
    pub event: Option<FailedEvent>,
}

#[derive(Debug)]
pub struct ReplayReport {
    pub dry_run: bool,
    pub processed: usize,
    pub skipped: usize,
    pub published: Vec<super::PublishedEvent>,
    /// New fixture id; only reported for live runs that established one.
    pub new_fixture_id: Option<String>,
    pub external_id: Option<String>,
    pub failure: Option<ReplayFailure>,
}

impl ReplayReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    fn from_session(session: ReplaySession, failure: Option<ReplayFailure>) -> Self {
        let dry_run = session.dry_run;
        Self {
            dry_run,
            processed: session.processed,
            skipped: session.skipped,
            published: session.published,
            new_fixture_id: if dry_run { None } else { session.new_fixture_id },
            external_id: if dry_run { None } else { session.external_id },
            failure,
        }
    }
}

#[derive(Clone)]
pub struct ReplayEngine {
    publisher: Arc<dyn EventPublisher>,
    remapper: Arc<dyn IdentityRemapper>,
    settings: ReplaySettings,
}

/// The event currently being handled.
struct Cursor<'a> {
    sequence: &'a str,
    kind: PayloadKind,
}

impl ReplayEngine {
    pub fn new(
        publisher: Arc<dyn EventPublisher>,
        remapper: Arc<dyn IdentityRemapper>,
        settings: ReplaySettings,
    ) -> Self {
        Self {
            publisher,
            remapper,
            settings,
        }
    }

    pub fn settings(&self) -> &ReplaySettings {
        &self.settings
    }

    /// Replay `events` (already in stored order) under a new fixture identity.
    pub async fn run(
        &self,
        events: &[SnapshotEvent],
        plan: &ReplayPlan,
        cancel: &CancelSignal,
    ) -> ReplayReport {
        let mut session = ReplaySession::new(plan.dry_run);

        if let Err(error) = check_preconditions(events) {
            warn!("🚫 Replay refused: {}", error);
            return ReplayReport::from_session(session, Some(ReplayFailure { error, event: None }));
        }

        info!(
            environment = %plan.environment,
            dry_run = plan.dry_run,
            target_start = %plan.target_start,
            "▶️ Replaying {} events",
            events.len()
        );

        for event in events {
            if let Err(error) = self.step(&mut session, plan, event, cancel).await {
                error!(
                    sequence = %event.sequence,
                    payload_type = %event.payload_type,
                    published = session.published.len(),
                    "❌ Replay aborted: {}",
                    error
                );
                let failure = ReplayFailure {
                    error,
                    event: Some(FailedEvent {
                        sequence: event.sequence.clone(),
                        payload_type: event.payload_type.clone(),
                    }),
                };
                return ReplayReport::from_session(session, Some(failure));
            }
        }

        info!(
            fixture_id = session.new_fixture_id.as_deref().unwrap_or("-"),
            "✅ Replay finished: {} processed, {} skipped, {} published",
            session.processed,
            session.skipped,
            session.published.len()
        );
        ReplayReport::from_session(session, None)
    }

    async fn step(
        &self,
        session: &mut ReplaySession,
        plan: &ReplayPlan,
        event: &SnapshotEvent,
        cancel: &CancelSignal,
    ) -> Result<(), ReplayError> {
        cancel.check()?;

        let decoded = codec::decode(&event.payload, &event.payload_type).map_err(|source| {
            ReplayError::Decode {
                sequence: event.sequence.clone(),
                source,
            }
        })?;
        let cursor = Cursor {
            sequence: &event.sequence,
            kind: decoded.kind(),
        };

        match decoded {
            DomainEvent::FixtureScheduled(msg) => {
                self.on_fixture_scheduled(session, plan, &cursor, &msg, cancel)
                    .await?
            }
            DomainEvent::TradingOpinionCreated(msg) => {
                self.on_opinion_created(session, &cursor, &msg, cancel).await?
            }
            DomainEvent::TradingOpinionUpdated(msg) => {
                self.on_opinion_updated(session, &cursor, &msg, cancel).await?
            }
            DomainEvent::PlayersTradingOpinionUpdated(msg) => {
                self.on_players_updated(session, &cursor, &msg, cancel).await?
            }
            DomainEvent::Unrecognized { payload_type } => {
                info!(
                    sequence = %event.sequence,
                    "⏭️ Skipping unrecognized event {}",
                    payload_type
                );
                session.skipped += 1;
                return Ok(());
            }
        }

        session.processed += 1;
        Ok(())
    }

    // ==================== HANDLERS ====================

    async fn on_fixture_scheduled(
        &self,
        session: &mut ReplaySession,
        plan: &ReplayPlan,
        cursor: &Cursor<'_>,
        source: &FixtureScheduled,
        cancel: &CancelSignal,
    ) -> Result<(), ReplayError> {
        let participants = source
            .participants()
            .map_err(|source| ReplayError::Decode {
                sequence: cursor.sequence.to_string(),
                source,
            })?;

        // A repeated scheduling event reuses the fixture established by the first
        let fixture_id = session
            .new_fixture_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let team = |uid: &str, designation: TeamDesignation| Team {
            id: Some(Identifier::uid(uid)),
            designation: designation as i32,
        };
        let (headers, correlation_id, clock) = self.headers(session, SourceId::Ui);
        let outbound = OutboundEvent::FixtureScheduled(FixtureScheduled {
            fixture: Some(Fixture {
                id: Some(Identifier::uid(fixture_id.as_str())),
                teams: vec![
                    team(&participants.home_team_id, TeamDesignation::Home),
                    team(&participants.away_team_id, TeamDesignation::Away),
                ],
                competition: Some(Competition {
                    id: Some(Identifier::uid(participants.competition_id.as_str())),
                }),
                start_time: Some(Timestamp::from_datetime(plan.target_start)),
                venue: Some(Venue {
                    name: REPLAY_VENUE.to_string(),
                }),
            }),
            headers: Some(headers),
        });

        self.emit(session, cursor, &fixture_id, outbound, correlation_id, clock, cancel)
            .await?;

        if session.new_fixture_id.is_some() {
            debug!(fixture_id = %fixture_id, "Fixture already established; skipping remap");
            return Ok(());
        }
        session.new_fixture_id = Some(fixture_id.clone());
        info!(
            fixture_id = %fixture_id,
            home = %participants.home_team_id,
            away = %participants.away_team_id,
            "🆕 New fixture scheduled"
        );

        let external_id = if session.dry_run {
            DRY_RUN_EXTERNAL_ID.to_string()
        } else {
            self.await_external_id(&fixture_id, cancel).await?
        };
        session.external_id = Some(external_id);
        Ok(())
    }

    async fn on_opinion_created(
        &self,
        session: &mut ReplaySession,
        cursor: &Cursor<'_>,
        source: &TradingOpinionCreated,
        cancel: &CancelSignal,
    ) -> Result<(), ReplayError> {
        let (fixture_id, fixture_ref) = self.established(session, cursor)?;
        let (headers, correlation_id, clock) = self.headers(session, SourceId::Ui);

        let outbound = OutboundEvent::TradingOpinionCreated(TradingOpinionCreated {
            fixture_id: Some(fixture_ref),
            handicap: source.handicap.as_ref().map(|h| Handicap { line: h.line }),
            total_points: source
                .total_points
                .as_ref()
                .map(|t| TotalPoints { line: t.line }),
            offering_level: Some(ProductOfferingLevel {
                level: CREATED_OFFERING_LEVEL,
            }),
            offering_type: Some(ProductOfferingType {
                offering_type: OfferingType::PrematchAndInRunning as i32,
            }),
            headers: Some(headers),
        });

        self.emit(session, cursor, &fixture_id, outbound, correlation_id, clock, cancel)
            .await?;

        if !session.dry_run {
            debug!(fixture_id = %fixture_id, "Waiting for trading opinion to settle");
            cancel.sleep(self.settings.opinion_settle).await?;
        }
        Ok(())
    }

    async fn on_opinion_updated(
        &self,
        session: &mut ReplaySession,
        cursor: &Cursor<'_>,
        source: &TradingOpinionUpdated,
        cancel: &CancelSignal,
    ) -> Result<(), ReplayError> {
        let (fixture_id, fixture_ref) = self.established(session, cursor)?;
        let (headers, correlation_id, clock) = self.headers(session, SourceId::Unspecified);

        let level = Some(ProductOfferingLevel {
            level: UPDATED_OFFERING_LEVEL,
        });
        let mut updates: Vec<TradingOpinionUpdate> = source
            .updates
            .iter()
            .cloned()
            .map(|mut u| {
                u.offering_level = level.clone();
                u
            })
            .collect();
        if updates.is_empty() {
            updates.push(TradingOpinionUpdate {
                offering_level: level,
                ..Default::default()
            });
        }

        let outbound = OutboundEvent::TradingOpinionUpdated(TradingOpinionUpdated {
            fixture_id: Some(fixture_ref),
            updates,
            headers: Some(headers),
        });

        self.emit(session, cursor, &fixture_id, outbound, correlation_id, clock, cancel)
            .await
    }

    async fn on_players_updated(
        &self,
        session: &mut ReplaySession,
        cursor: &Cursor<'_>,
        source: &PlayersTradingOpinionUpdated,
        cancel: &CancelSignal,
    ) -> Result<(), ReplayError> {
        let (fixture_id, fixture_ref) = self.established(session, cursor)?;
        let (headers, correlation_id, clock) = self.headers(session, SourceId::Unspecified);

        let outbound = OutboundEvent::PlayersTradingOpinionUpdated(PlayersTradingOpinionUpdated {
            fixture_id: Some(fixture_ref),
            players_offering_status: source.players_offering_status,
            player_updates: source.player_updates.clone(),
            headers: Some(headers),
        });

        self.emit(session, cursor, &fixture_id, outbound, correlation_id, clock, cancel)
            .await
    }

    // ==================== PLUMBING ====================

    /// New fixture id plus its identifier carrying the resolved external id.
    fn established(
        &self,
        session: &ReplaySession,
        cursor: &Cursor<'_>,
    ) -> Result<(String, Identifier), ReplayError> {
        let (fixture_id, external_id) = session
            .established()
            .ok_or(ReplayError::FixtureNotEstablished { event: cursor.kind })?;
        let identifier = Identifier::uid(fixture_id)
            .with_external(self.settings.external_id_system.as_str(), external_id);
        Ok((fixture_id.to_string(), identifier))
    }

    /// Fresh headers for one outward event: next clock tick, new correlation id,
    /// both timestamps at the current wall-clock time.
    fn headers(
        &self,
        session: &mut ReplaySession,
        origin: SourceId,
    ) -> (EventHeaders, String, i64) {
        let clock = session.tick();
        let correlation_id = Uuid::new_v4().to_string();
        let now = Timestamp::from_datetime(Utc::now());
        let headers = EventHeaders {
            record_headers: Some(RecordHeaders {
                logical_clock: clock,
                correlation_id: correlation_id.clone(),
                origin: Some(Source {
                    source_id: origin as i32,
                    name: self.settings.producer_name.clone(),
                }),
                produced_at: Some(now.clone()),
                origin_timestamp: Some(now),
            }),
            domain_event_id: Some(Identifier::uid(Uuid::new_v4().to_string())),
        };
        (headers, correlation_id, clock)
    }

    #[allow(clippy::too_many_arguments)]
    async fn emit(
        &self,
        session: &mut ReplaySession,
        cursor: &Cursor<'_>,
        fixture_id: &str,
        outbound: OutboundEvent,
        correlation_id: String,
        clock: i64,
        cancel: &CancelSignal,
    ) -> Result<(), ReplayError> {
        let payload_type = outbound.payload_type();
        let message = OutboundMessage {
            topic: self.settings.topic.clone(),
            key: fixture_id.to_string(),
            correlation_id: correlation_id.clone(),
            payload_type,
            payload: outbound.encode(),
        };

        if session.dry_run {
            debug!(
                sequence = cursor.sequence,
                "Dry run: would publish {} ({} bytes)",
                payload_type,
                message.payload.len()
            );
            return Ok(());
        }

        cancel.check()?;
        self.publisher
            .publish(&message)
            .await
            .map_err(|source| ReplayError::Publish {
                payload_type,
                source,
            })?;

        debug!(
            sequence = cursor.sequence,
            logical_clock = clock,
            correlation_id = %correlation_id,
            "📤 Published {}",
            payload_type
        );
        session.record_published(cursor.sequence, cursor.kind, payload_type, correlation_id, clock);
        Ok(())
    }

    /// Poll the remapper until it resolves the fixture, bounded by the remap timeout.
    async fn await_external_id(
        &self,
        fixture_id: &str,
        cancel: &CancelSignal,
    ) -> Result<String, ReplayError> {
        let started = Instant::now();
        let deadline = started + self.settings.remap_timeout;

        info!(
            fixture_id,
            "⏳ Waiting {}ms before first identity lookup",
            self.settings.remap_initial_delay.as_millis()
        );
        cancel.sleep(self.settings.remap_initial_delay).await?;

        let mut last_error: Option<String> = None;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let lookup = tokio::select! {
                res = self.remapper.resolve_external_id(fixture_id) => res,
                _ = cancel.cancelled() => return Err(ReplayError::Cancelled),
            };
            match lookup {
                Ok(Some(external_id)) => {
                    info!(
                        fixture_id,
                        external_id = %external_id,
                        attempts,
                        "🔗 External id resolved"
                    );
                    return Ok(external_id);
                }
                Ok(None) => debug!(fixture_id, attempts, "External id not propagated yet"),
                Err(e) => {
                    warn!(fixture_id, attempts, "Identity lookup failed: {:#}", e);
                    last_error = Some(format!("{:#}", e));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ReplayError::RemapTimeout {
                    fixture_id: fixture_id.to_string(),
                    waited: now - started,
                    last_error,
                });
            }
            let pause = self.settings.remap_poll_interval.min(deadline - now);
            cancel.sleep(pause).await?;
        }
    }
}

/// Both a fixture-scheduled and a trading-opinion-created event must be present.
fn check_preconditions(events: &[SnapshotEvent]) -> Result<(), ReplayError> {
    for required in [
        PayloadKind::FixtureScheduled,
        PayloadKind::TradingOpinionCreated,
    ] {
        let present = events
            .iter()
            .any(|e| PayloadKind::from_tag(&e.payload_type) == required);
        if !present {
            return Err(ReplayError::MissingRequiredEvent(required));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::messages::{PlayerTradingOpinionUpdate, PlayersOfferingStatus};
    use crate::codec::tags;
    use crate::replay::cancel_pair;
    use anyhow::{anyhow, Result};
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<OutboundMessage>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait::async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(&self, message: &OutboundMessage) -> Result<()> {
            if self.fail_on == Some(message.payload_type) {
                return Err(anyhow!("broker unavailable"));
            }
            self.sent.lock().push(message.clone());
            Ok(())
        }
    }

    /// Resolves after `pending` unresolved lookups.
    struct SlowRemapper {
        pending: usize,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl IdentityRemapper for SlowRemapper {
        async fn resolve_external_id(&self, fixture_id: &str) -> Result<Option<String>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.pending {
                Ok(None)
            } else {
                Ok(Some(format!("R-{}", &fixture_id[..8])))
            }
        }
    }

    fn fast_settings() -> ReplaySettings {
        ReplaySettings {
            remap_initial_delay: Duration::from_millis(1),
            remap_poll_interval: Duration::from_millis(1),
            remap_timeout: Duration::from_millis(200),
            opinion_settle: Duration::from_millis(1),
            ..ReplaySettings::default()
        }
    }

    fn engine(
        publisher: Arc<RecordingPublisher>,
        pending_lookups: usize,
        settings: ReplaySettings,
    ) -> ReplayEngine {
        let remapper = Arc::new(SlowRemapper {
            pending: pending_lookups,
            calls: AtomicUsize::new(0),
        });
        ReplayEngine::new(publisher, remapper, settings)
    }

    fn plan(dry_run: bool) -> ReplayPlan {
        ReplayPlan {
            target_start: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            environment: "test".to_string(),
            dry_run,
        }
    }

    fn snapshot_event(seq: &str, event: DomainEvent) -> SnapshotEvent {
        let (payload_type, payload) = codec::encode_domain(&event).expect("encodable event");
        SnapshotEvent {
            id: seq.parse().unwrap_or(0),
            snapshot_id: 1,
            event_identifier: "G1".to_string(),
            sequence: seq.to_string(),
            payload: payload.to_vec(),
            payload_type: payload_type.to_string(),
            created_at: Utc::now(),
        }
    }

    fn raw_event(seq: &str, payload_type: &str, payload: Vec<u8>) -> SnapshotEvent {
        SnapshotEvent {
            id: 0,
            snapshot_id: 1,
            event_identifier: "G1".to_string(),
            sequence: seq.to_string(),
            payload,
            payload_type: payload_type.to_string(),
            created_at: Utc::now(),
        }
    }

    fn scheduled() -> DomainEvent {
        DomainEvent::FixtureScheduled(FixtureScheduled {
            fixture: Some(Fixture {
                id: Some(Identifier::uid("source-fixture")),
                teams: vec![
                    Team {
                        id: Some(Identifier::uid("team-home")),
                        designation: TeamDesignation::Home as i32,
                    },
                    Team {
                        id: Some(Identifier::uid("team-away")),
                        designation: TeamDesignation::Away as i32,
                    },
                ],
                competition: Some(Competition {
                    id: Some(Identifier::uid("afl-2024")),
                }),
                start_time: None,
                venue: Some(Venue {
                    name: "MCG".to_string(),
                }),
            }),
            headers: None,
        })
    }

    fn opinion_created() -> DomainEvent {
        DomainEvent::TradingOpinionCreated(TradingOpinionCreated {
            fixture_id: Some(Identifier::uid("source-fixture")),
            handicap: Some(Handicap { line: -6.5 }),
            total_points: Some(TotalPoints { line: 170.5 }),
            offering_level: Some(ProductOfferingLevel { level: 9 }),
            offering_type: None,
            headers: None,
        })
    }

    fn opinion_updated(updates: Vec<TradingOpinionUpdate>) -> DomainEvent {
        DomainEvent::TradingOpinionUpdated(TradingOpinionUpdated {
            fixture_id: Some(Identifier::uid("source-fixture")),
            updates,
            headers: None,
        })
    }

    fn decode_sent(msg: &OutboundMessage) -> OutboundEvent {
        OutboundEvent::decode(msg.payload_type, &msg.payload).expect("decodable outbound")
    }

    #[tokio::test]
    async fn test_full_replay_publishes_in_order_with_one_fixture_id() {
        let publisher = Arc::new(RecordingPublisher::default());
        let engine = engine(publisher.clone(), 2, fast_settings());
        let events = vec![
            snapshot_event("1", scheduled()),
            snapshot_event("2", opinion_created()),
            snapshot_event(
                "3",
                opinion_updated(vec![TradingOpinionUpdate {
                    offering_level: Some(ProductOfferingLevel { level: 1 }),
                    handicap: Some(Handicap { line: -4.5 }),
                    total_points: None,
                    suspended: true,
                }]),
            ),
        ];

        let report = engine.run(&events, &plan(false), &CancelSignal::never()).await;
        assert!(report.succeeded(), "{:?}", report.failure);
        assert_eq!(report.processed, 3);

        let sent = publisher.sent.lock().clone();
        let types: Vec<_> = sent.iter().map(|m| m.payload_type).collect();
        assert_eq!(
            types,
            vec![
                tags::FEED_FIXTURE_SCHEDULED,
                tags::FEED_TRADING_OPINION_CREATED,
                tags::FEED_TRADING_OPINION_UPDATED
            ]
        );

        let fixture_id = report.new_fixture_id.clone().expect("new fixture id");
        assert!(sent.iter().all(|m| m.key == fixture_id));
        assert_ne!(fixture_id, "source-fixture");

        let OutboundEvent::FixtureScheduled(first) = decode_sent(&sent[0]) else {
            panic!("first event should schedule the fixture");
        };
        let fixture = first.fixture.expect("fixture");
        assert_eq!(fixture.id.unwrap().uid, fixture_id);
        assert_eq!(fixture.teams[0].id.as_ref().unwrap().uid, "team-home");
        assert_eq!(fixture.teams[1].id.as_ref().unwrap().uid, "team-away");
        assert_eq!(
            fixture.start_time.and_then(|t| t.to_datetime()),
            Some(plan(false).target_start)
        );
        assert_eq!(fixture.venue.unwrap().name, REPLAY_VENUE);

        let OutboundEvent::TradingOpinionCreated(created) = decode_sent(&sent[1]) else {
            panic!("second event should create the opinion");
        };
        let fixture_ref = created.fixture_id.expect("fixture ref");
        assert_eq!(fixture_ref.uid, fixture_id);
        assert_eq!(fixture_ref.external_ids[0].system, "ramp");
        assert_eq!(Some(fixture_ref.external_ids[0].id.clone()), report.external_id);
        assert_eq!(created.handicap.unwrap().line, -6.5);
        assert_eq!(created.offering_level.unwrap().level, CREATED_OFFERING_LEVEL);

        let OutboundEvent::TradingOpinionUpdated(updated) = decode_sent(&sent[2]) else {
            panic!("third event should update the opinion");
        };
        assert_eq!(updated.updates.len(), 1);
        assert!(updated.updates[0].suspended);
        assert_eq!(updated.updates[0].handicap.as_ref().unwrap().line, -4.5);
        assert_eq!(
            updated.updates[0].offering_level.as_ref().unwrap().level,
            UPDATED_OFFERING_LEVEL
        );

        let clocks: Vec<_> = report.published.iter().map(|p| p.logical_clock).collect();
        assert_eq!(clocks, vec![1, 2, 3]);
        let correlation_ids: std::collections::HashSet<_> =
            sent.iter().map(|m| m.correlation_id.clone()).collect();
        assert_eq!(correlation_ids.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_scheduled_publishes_nothing() {
        let publisher = Arc::new(RecordingPublisher::default());
        let engine = engine(publisher.clone(), 0, fast_settings());
        let events = vec![snapshot_event("1", opinion_updated(vec![]))];

        let report = engine.run(&events, &plan(false), &CancelSignal::never()).await;
        let failure = report.failure.expect("precondition failure");
        assert!(matches!(
            failure.error,
            ReplayError::MissingRequiredEvent(PayloadKind::FixtureScheduled)
        ));
        assert!(failure.event.is_none());
        assert!(publisher.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_opinion_created_publishes_nothing() {
        let publisher = Arc::new(RecordingPublisher::default());
        let engine = engine(publisher.clone(), 0, fast_settings());
        let events = vec![snapshot_event("1", scheduled())];

        let report = engine.run(&events, &plan(false), &CancelSignal::never()).await;
        let failure = report.failure.expect("precondition failure");
        assert!(failure.error.to_string().contains("trading-opinion-created"));
        assert!(publisher.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_publishes_nothing() {
        let publisher = Arc::new(RecordingPublisher::default());
        // A remapper that never resolves would time out if a dry run consulted it
        let engine = engine(publisher.clone(), usize::MAX, fast_settings());
        let events = vec![
            snapshot_event("1", scheduled()),
            snapshot_event("2", opinion_created()),
            snapshot_event("3", opinion_updated(vec![])),
        ];

        let report = engine.run(&events, &plan(true), &CancelSignal::never()).await;
        assert!(report.succeeded());
        assert_eq!(report.processed, 3);
        assert!(report.new_fixture_id.is_none());
        assert!(report.published.is_empty());
        assert!(publisher.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unrecognized_events_are_skipped() {
        let publisher = Arc::new(RecordingPublisher::default());
        let engine = engine(publisher.clone(), 0, fast_settings());
        let events = vec![
            snapshot_event("1", scheduled()),
            raw_event("2", "flutter.smf.se.game.afl.QuarterEnded", vec![7]),
            snapshot_event("3", opinion_created()),
        ];

        let report = engine.run(&events, &plan(false), &CancelSignal::never()).await;
        assert!(report.succeeded());
        assert_eq!(report.processed, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(publisher.sent.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_decode_failure_aborts_and_reports_published() {
        let publisher = Arc::new(RecordingPublisher::default());
        let engine = engine(publisher.clone(), 0, fast_settings());
        let events = vec![
            snapshot_event("1", scheduled()),
            snapshot_event("2", opinion_created()),
            raw_event("3", tags::TRADING_OPINION_UPDATED, vec![0, 0, 0, 0, 0, 0xff, 0xff]),
            snapshot_event("4", opinion_updated(vec![])),
        ];

        let report = engine.run(&events, &plan(false), &CancelSignal::never()).await;
        let failure = report.failure.as_ref().expect("decode failure");
        assert_eq!(failure.error.kind(), "decode");
        assert_eq!(failure.event.as_ref().unwrap().sequence, "3");
        assert_eq!(report.processed, 2);
        let published: Vec<_> = report.published.iter().map(|p| p.sequence.as_str()).collect();
        assert_eq!(published, vec!["1", "2"]);
        assert_eq!(publisher.sent.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_publish_failure_on_first_event_aborts() {
        let publisher = Arc::new(RecordingPublisher {
            sent: Mutex::new(Vec::new()),
            fail_on: Some(tags::FEED_FIXTURE_SCHEDULED),
        });
        let engine = engine(publisher.clone(), 0, fast_settings());
        let events = vec![
            snapshot_event("1", scheduled()),
            snapshot_event("2", opinion_created()),
        ];

        let report = engine.run(&events, &plan(false), &CancelSignal::never()).await;
        let failure = report.failure.as_ref().expect("publish failure");
        assert_eq!(failure.error.kind(), "publish");
        assert!(failure.error.to_string().contains("broker unavailable"));
        assert!(report.new_fixture_id.is_none());
        assert!(report.published.is_empty());
    }

    #[tokio::test]
    async fn test_remap_timeout_is_distinct_error() {
        let publisher = Arc::new(RecordingPublisher::default());
        let settings = ReplaySettings {
            remap_timeout: Duration::from_millis(20),
            ..fast_settings()
        };
        let engine = engine(publisher.clone(), usize::MAX, settings);
        let events = vec![
            snapshot_event("1", scheduled()),
            snapshot_event("2", opinion_created()),
        ];

        let report = engine.run(&events, &plan(false), &CancelSignal::never()).await;
        let failure = report.failure.as_ref().expect("remap timeout");
        assert!(matches!(failure.error, ReplayError::RemapTimeout { .. }));
        // The scheduling event did go out before the wait
        assert_eq!(report.published.len(), 1);
        assert_eq!(publisher.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_start_publishes_nothing() {
        let publisher = Arc::new(RecordingPublisher::default());
        let engine = engine(publisher.clone(), 0, fast_settings());
        let (handle, signal) = cancel_pair();
        handle.cancel();

        let events = vec![
            snapshot_event("1", scheduled()),
            snapshot_event("2", opinion_created()),
        ];
        let report = engine.run(&events, &plan(false), &signal).await;
        assert_eq!(report.failure.expect("cancelled").error.kind(), "cancelled");
        assert!(publisher.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_schedule_reuses_fixture() {
        let publisher = Arc::new(RecordingPublisher::default());
        let engine = engine(publisher.clone(), 0, fast_settings());
        let events = vec![
            snapshot_event("1", scheduled()),
            snapshot_event("2", opinion_created()),
            snapshot_event("3", scheduled()),
        ];

        let report = engine.run(&events, &plan(false), &CancelSignal::never()).await;
        assert!(report.succeeded());
        let sent = publisher.sent.lock().clone();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].key, sent[2].key);
    }

    #[tokio::test]
    async fn test_players_update_carries_status_through() {
        let publisher = Arc::new(RecordingPublisher::default());
        let engine = engine(publisher.clone(), 0, fast_settings());
        let players = DomainEvent::PlayersTradingOpinionUpdated(PlayersTradingOpinionUpdated {
            fixture_id: Some(Identifier::uid("source-fixture")),
            players_offering_status: PlayersOfferingStatus::Suspended as i32,
            player_updates: vec![PlayerTradingOpinionUpdate {
                player_id: Some(Identifier::uid("player-7")),
                offering_status: PlayersOfferingStatus::Offered as i32,
                line: 24.5,
            }],
            headers: None,
        });
        let events = vec![
            snapshot_event("1", scheduled()),
            snapshot_event("2", opinion_created()),
            snapshot_event("3", players),
        ];

        let report = engine.run(&events, &plan(false), &CancelSignal::never()).await;
        assert!(report.succeeded());
        let sent = publisher.sent.lock().clone();
        let OutboundEvent::PlayersTradingOpinionUpdated(msg) = decode_sent(&sent[2]) else {
            panic!("expected players update");
        };
        assert_eq!(
            msg.players_offering_status,
            PlayersOfferingStatus::Suspended as i32
        );
        assert_eq!(msg.player_updates.len(), 1);
        assert_eq!(msg.player_updates[0].line, 24.5);
        assert_eq!(msg.fixture_id.unwrap().uid, sent[0].key);
    }
}
