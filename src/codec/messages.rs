//! Protobuf shapes of the fixture feed.
//!
//! Upstream (captured) events and the outward events synthesized during a
//! replay share one schema family, so the same structs decode both sides.

use chrono::{DateTime, TimeZone, Utc};

use super::CodecError;

// ============================================================================
// Common envelope types
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Timestamp {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

impl Timestamp {
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self {
            seconds: dt.timestamp(),
            nanos: dt.timestamp_subsec_nanos() as i32,
        }
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.seconds, self.nanos.max(0) as u32)
            .single()
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExternalId {
    #[prost(string, tag = "1")]
    pub system: String,
    #[prost(string, tag = "2")]
    pub id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Identifier {
    #[prost(string, tag = "1")]
    pub uid: String,
    #[prost(message, repeated, tag = "2")]
    pub external_ids: Vec<ExternalId>,
}

impl Identifier {
    pub fn uid(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            external_ids: Vec::new(),
        }
    }

    pub fn with_external(mut self, system: impl Into<String>, id: impl Into<String>) -> Self {
        self.external_ids.push(ExternalId {
            system: system.into(),
            id: id.into(),
        });
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SourceId {
    Unspecified = 0,
    Ui = 1,
    Feed = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Source {
    #[prost(enumeration = "SourceId", tag = "1")]
    pub source_id: i32,
    #[prost(string, tag = "2")]
    pub name: String,
}

/// Per-record sequencing metadata read by downstream consumers.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RecordHeaders {
    #[prost(int64, tag = "1")]
    pub logical_clock: i64,
    #[prost(string, tag = "2")]
    pub correlation_id: String,
    #[prost(message, optional, tag = "3")]
    pub origin: Option<Source>,
    #[prost(message, optional, tag = "4")]
    pub produced_at: Option<Timestamp>,
    #[prost(message, optional, tag = "5")]
    pub origin_timestamp: Option<Timestamp>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EventHeaders {
    #[prost(message, optional, tag = "1")]
    pub record_headers: Option<RecordHeaders>,
    #[prost(message, optional, tag = "2")]
    pub domain_event_id: Option<Identifier>,
}

// ============================================================================
// Fixture scheduling
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TeamDesignation {
    Unspecified = 0,
    Home = 1,
    Away = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Team {
    #[prost(message, optional, tag = "1")]
    pub id: Option<Identifier>,
    #[prost(enumeration = "TeamDesignation", tag = "2")]
    pub designation: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Competition {
    #[prost(message, optional, tag = "1")]
    pub id: Option<Identifier>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Venue {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Fixture {
    #[prost(message, optional, tag = "1")]
    pub id: Option<Identifier>,
    #[prost(message, repeated, tag = "2")]
    pub teams: Vec<Team>,
    #[prost(message, optional, tag = "3")]
    pub competition: Option<Competition>,
    #[prost(message, optional, tag = "4")]
    pub start_time: Option<Timestamp>,
    #[prost(message, optional, tag = "5")]
    pub venue: Option<Venue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FixtureScheduled {
    #[prost(message, optional, tag = "1")]
    pub fixture: Option<Fixture>,
    #[prost(message, optional, tag = "2")]
    pub headers: Option<EventHeaders>,
}

/// The identities a replay carries over from a captured fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureParticipants {
    pub home_team_id: String,
    pub away_team_id: String,
    pub competition_id: String,
}

impl FixtureScheduled {
    /// Participants are positional: the first team is home, the second away.
    pub fn participants(&self) -> Result<FixtureParticipants, CodecError> {
        const TAG: &str = super::tags::FIXTURE_SCHEDULED;
        let fixture = self
            .fixture
            .as_ref()
            .ok_or(CodecError::MissingField { payload_type: TAG, field: "fixture" })?;

        let team_uid = |index: usize, field: &'static str| {
            fixture
                .teams
                .get(index)
                .and_then(|t| t.id.as_ref())
                .map(|id| id.uid.clone())
                .filter(|uid| !uid.is_empty())
                .ok_or(CodecError::MissingField { payload_type: TAG, field })
        };

        let competition_id = fixture
            .competition
            .as_ref()
            .and_then(|c| c.id.as_ref())
            .map(|id| id.uid.clone())
            .filter(|uid| !uid.is_empty())
            .ok_or(CodecError::MissingField {
                payload_type: TAG,
                field: "fixture.competition.id",
            })?;

        Ok(FixtureParticipants {
            home_team_id: team_uid(0, "fixture.teams[0].id")?,
            away_team_id: team_uid(1, "fixture.teams[1].id")?,
            competition_id,
        })
    }
}

// ============================================================================
// Trading opinions
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Handicap {
    #[prost(double, tag = "1")]
    pub line: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TotalPoints {
    #[prost(double, tag = "1")]
    pub line: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProductOfferingLevel {
    #[prost(int32, tag = "1")]
    pub level: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum OfferingType {
    Unspecified = 0,
    PrematchOnly = 1,
    PrematchAndInRunning = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProductOfferingType {
    #[prost(enumeration = "OfferingType", tag = "1")]
    pub offering_type: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TradingOpinionCreated {
    #[prost(message, optional, tag = "1")]
    pub fixture_id: Option<Identifier>,
    #[prost(message, optional, tag = "2")]
    pub handicap: Option<Handicap>,
    #[prost(message, optional, tag = "3")]
    pub total_points: Option<TotalPoints>,
    #[prost(message, optional, tag = "4")]
    pub offering_level: Option<ProductOfferingLevel>,
    #[prost(message, optional, tag = "5")]
    pub offering_type: Option<ProductOfferingType>,
    #[prost(message, optional, tag = "6")]
    pub headers: Option<EventHeaders>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TradingOpinionUpdate {
    #[prost(message, optional, tag = "1")]
    pub offering_level: Option<ProductOfferingLevel>,
    #[prost(message, optional, tag = "2")]
    pub handicap: Option<Handicap>,
    #[prost(message, optional, tag = "3")]
    pub total_points: Option<TotalPoints>,
    #[prost(bool, tag = "4")]
    pub suspended: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TradingOpinionUpdated {
    #[prost(message, optional, tag = "1")]
    pub fixture_id: Option<Identifier>,
    #[prost(message, repeated, tag = "2")]
    pub updates: Vec<TradingOpinionUpdate>,
    #[prost(message, optional, tag = "3")]
    pub headers: Option<EventHeaders>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PlayersOfferingStatus {
    Unspecified = 0,
    Offered = 1,
    Suspended = 2,
    Withdrawn = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlayerTradingOpinionUpdate {
    #[prost(message, optional, tag = "1")]
    pub player_id: Option<Identifier>,
    #[prost(enumeration = "PlayersOfferingStatus", tag = "2")]
    pub offering_status: i32,
    #[prost(double, tag = "3")]
    pub line: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlayersTradingOpinionUpdated {
    #[prost(message, optional, tag = "1")]
    pub fixture_id: Option<Identifier>,
    #[prost(enumeration = "PlayersOfferingStatus", tag = "2")]
    pub players_offering_status: i32,
    #[prost(message, repeated, tag = "3")]
    pub player_updates: Vec<PlayerTradingOpinionUpdate>,
    #[prost(message, optional, tag = "4")]
    pub headers: Option<EventHeaders>,
}
