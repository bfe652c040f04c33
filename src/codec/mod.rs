//! Event Codec
//!
//! Payloads on the bus and in the upstream event log are protobuf messages
//! behind a fixed 5-byte lead-in (a magic byte and a big-endian schema id).
//! The lead-in is skipped, never interpreted, when decoding; outward events
//! are written with an empty (all-zero) lead-in.

pub mod messages;

use bytes::{BufMut, Bytes, BytesMut};
use prost::Message;
use std::fmt;

pub use messages::{
    EventHeaders, FixtureParticipants, FixtureScheduled, PlayersTradingOpinionUpdated,
    TradingOpinionCreated, TradingOpinionUpdated,
};

/// Length of the framing prefix in front of every protobuf body.
pub const LEAD_IN_LEN: usize = 5;

/// Fully-qualified payload type tags.
pub mod tags {
    // Upstream domain events captured into snapshots
    pub const FIXTURE_SCHEDULED: &str = "flutter.smf.se.game.afl.AflGameScheduled";
    pub const TRADING_OPINION_CREATED: &str = "flutter.smf.se.game.afl.TradingOpinionCreated";
    pub const TRADING_OPINION_UPDATED: &str = "flutter.smf.se.game.afl.TradingOpinionUpdated";
    pub const PLAYERS_TRADING_OPINION_UPDATED: &str =
        "flutter.smf.se.game.afl.PlayersTradingOpinionUpdated";
    /// Cutoff marker: bounds ingestion, never stored or replayed.
    pub const FIXTURE_STARTED: &str = "flutter.smf.se.game.afl.GameStarted";

    // Outward feed events synthesized by a replay
    pub const FEED_FIXTURE_SCHEDULED: &str = "flutter.smf.feeds.afl.FeedsGameScheduled";
    pub const FEED_TRADING_OPINION_CREATED: &str =
        "flutter.smf.feeds.afl.FeedsTradingOpinionCreated";
    pub const FEED_TRADING_OPINION_UPDATED: &str =
        "flutter.smf.feeds.afl.FeedsTradingOpinionUpdated";
    pub const FEED_PLAYERS_TRADING_OPINION_UPDATED: &str =
        "flutter.smf.feeds.afl.FeedsPlayersTradingOpinionUpdated";
}

// ============================================================================
// PAYLOAD KINDS
// ============================================================================

/// Closed set of upstream payload types the replay engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    FixtureScheduled,
    TradingOpinionCreated,
    TradingOpinionUpdated,
    PlayersTradingOpinionUpdated,
    FixtureStarted,
    Unrecognized,
}

impl PayloadKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            tags::FIXTURE_SCHEDULED => Self::FixtureScheduled,
            tags::TRADING_OPINION_CREATED => Self::TradingOpinionCreated,
            tags::TRADING_OPINION_UPDATED => Self::TradingOpinionUpdated,
            tags::PLAYERS_TRADING_OPINION_UPDATED => Self::PlayersTradingOpinionUpdated,
            tags::FIXTURE_STARTED => Self::FixtureStarted,
            _ => Self::Unrecognized,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::FixtureScheduled => tags::FIXTURE_SCHEDULED,
            Self::TradingOpinionCreated => tags::TRADING_OPINION_CREATED,
            Self::TradingOpinionUpdated => tags::TRADING_OPINION_UPDATED,
            Self::PlayersTradingOpinionUpdated => tags::PLAYERS_TRADING_OPINION_UPDATED,
            Self::FixtureStarted => tags::FIXTURE_STARTED,
            Self::Unrecognized => "unrecognized",
        }
    }

    /// Short operator-facing name.
    pub fn label(&self) -> &'static str {
        match self {
            Self::FixtureScheduled => "fixture-scheduled",
            Self::TradingOpinionCreated => "trading-opinion-created",
            Self::TradingOpinionUpdated => "trading-opinion-updated",
            Self::PlayersTradingOpinionUpdated => "players-trading-opinion-updated",
            Self::FixtureStarted => "fixture-started",
            Self::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum CodecError {
    /// Payload is shorter than the framing lead-in.
    Truncated { len: usize },
    Malformed {
        payload_type: &'static str,
        source: prost::DecodeError,
    },
    MissingField {
        payload_type: &'static str,
        field: &'static str,
    },
    UnknownOutboundType(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { len } => write!(
                f,
                "payload of {} bytes is shorter than the {}-byte lead-in",
                len, LEAD_IN_LEN
            ),
            Self::Malformed {
                payload_type,
                source,
            } => write!(f, "malformed {} payload: {}", payload_type, source),
            Self::MissingField {
                payload_type,
                field,
            } => write!(f, "{} payload is missing {}", payload_type, field),
            Self::UnknownOutboundType(t) => write!(f, "unknown outbound payload type: {}", t),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Malformed { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ============================================================================
// FRAMING
// ============================================================================

fn strip_lead_in(payload: &[u8]) -> Result<&[u8], CodecError> {
    payload
        .get(LEAD_IN_LEN..)
        .ok_or(CodecError::Truncated { len: payload.len() })
}

fn frame(body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(LEAD_IN_LEN + body.len());
    buf.put_bytes(0, LEAD_IN_LEN);
    buf.put_slice(body);
    buf.freeze()
}

fn decode_body<M: Message + Default>(
    payload_type: &'static str,
    payload: &[u8],
) -> Result<M, CodecError> {
    let body = strip_lead_in(payload)?;
    M::decode(body).map_err(|source| CodecError::Malformed {
        payload_type,
        source,
    })
}

// ============================================================================
// UPSTREAM EVENTS
// ============================================================================

/// A decoded snapshot event.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    FixtureScheduled(FixtureScheduled),
    TradingOpinionCreated(TradingOpinionCreated),
    TradingOpinionUpdated(TradingOpinionUpdated),
    PlayersTradingOpinionUpdated(PlayersTradingOpinionUpdated),
    /// Passed through untouched; the replay treats it as a no-op.
    Unrecognized { payload_type: String },
}

impl DomainEvent {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::FixtureScheduled(_) => PayloadKind::FixtureScheduled,
            Self::TradingOpinionCreated(_) => PayloadKind::TradingOpinionCreated,
            Self::TradingOpinionUpdated(_) => PayloadKind::TradingOpinionUpdated,
            Self::PlayersTradingOpinionUpdated(_) => PayloadKind::PlayersTradingOpinionUpdated,
            Self::Unrecognized { .. } => PayloadKind::Unrecognized,
        }
    }
}

/// Decode a stored payload according to its declared type tag.
///
/// Unknown tags (and the cutoff marker) never touch the payload bytes.
pub fn decode(payload: &[u8], payload_type: &str) -> Result<DomainEvent, CodecError> {
    let kind = PayloadKind::from_tag(payload_type);
    let event = match kind {
        PayloadKind::FixtureScheduled => {
            DomainEvent::FixtureScheduled(decode_body(kind.tag(), payload)?)
        }
        PayloadKind::TradingOpinionCreated => {
            DomainEvent::TradingOpinionCreated(decode_body(kind.tag(), payload)?)
        }
        PayloadKind::TradingOpinionUpdated => {
            DomainEvent::TradingOpinionUpdated(decode_body(kind.tag(), payload)?)
        }
        PayloadKind::PlayersTradingOpinionUpdated => {
            DomainEvent::PlayersTradingOpinionUpdated(decode_body(kind.tag(), payload)?)
        }
        PayloadKind::FixtureStarted | PayloadKind::Unrecognized => DomainEvent::Unrecognized {
            payload_type: payload_type.to_string(),
        },
    };
    Ok(event)
}

/// Encode an upstream-shaped event with the framing lead-in (fixtures and tests).
pub fn encode_domain(event: &DomainEvent) -> Option<(&'static str, Bytes)> {
    let tag = event.kind().tag();
    let body = match event {
        DomainEvent::FixtureScheduled(m) => m.encode_to_vec(),
        DomainEvent::TradingOpinionCreated(m) => m.encode_to_vec(),
        DomainEvent::TradingOpinionUpdated(m) => m.encode_to_vec(),
        DomainEvent::PlayersTradingOpinionUpdated(m) => m.encode_to_vec(),
        DomainEvent::Unrecognized { .. } => return None,
    };
    Some((tag, frame(&body)))
}

// ============================================================================
// OUTWARD EVENTS
// ============================================================================

/// An event synthesized by a replay, ready for publication.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    FixtureScheduled(FixtureScheduled),
    TradingOpinionCreated(TradingOpinionCreated),
    TradingOpinionUpdated(TradingOpinionUpdated),
    PlayersTradingOpinionUpdated(PlayersTradingOpinionUpdated),
}

impl OutboundEvent {
    pub fn payload_type(&self) -> &'static str {
        match self {
            Self::FixtureScheduled(_) => tags::FEED_FIXTURE_SCHEDULED,
            Self::TradingOpinionCreated(_) => tags::FEED_TRADING_OPINION_CREATED,
            Self::TradingOpinionUpdated(_) => tags::FEED_TRADING_OPINION_UPDATED,
            Self::PlayersTradingOpinionUpdated(_) => tags::FEED_PLAYERS_TRADING_OPINION_UPDATED,
        }
    }

    pub fn headers(&self) -> Option<&EventHeaders> {
        match self {
            Self::FixtureScheduled(m) => m.headers.as_ref(),
            Self::TradingOpinionCreated(m) => m.headers.as_ref(),
            Self::TradingOpinionUpdated(m) => m.headers.as_ref(),
            Self::PlayersTradingOpinionUpdated(m) => m.headers.as_ref(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let body = match self {
            Self::FixtureScheduled(m) => m.encode_to_vec(),
            Self::TradingOpinionCreated(m) => m.encode_to_vec(),
            Self::TradingOpinionUpdated(m) => m.encode_to_vec(),
            Self::PlayersTradingOpinionUpdated(m) => m.encode_to_vec(),
        };
        frame(&body)
    }

    pub fn decode(payload_type: &str, payload: &[u8]) -> Result<Self, CodecError> {
        match payload_type {
            tags::FEED_FIXTURE_SCHEDULED => Ok(Self::FixtureScheduled(decode_body(
                tags::FEED_FIXTURE_SCHEDULED,
                payload,
            )?)),
            tags::FEED_TRADING_OPINION_CREATED => Ok(Self::TradingOpinionCreated(decode_body(
                tags::FEED_TRADING_OPINION_CREATED,
                payload,
            )?)),
            tags::FEED_TRADING_OPINION_UPDATED => Ok(Self::TradingOpinionUpdated(decode_body(
                tags::FEED_TRADING_OPINION_UPDATED,
                payload,
            )?)),
            tags::FEED_PLAYERS_TRADING_OPINION_UPDATED => Ok(Self::PlayersTradingOpinionUpdated(
                decode_body(tags::FEED_PLAYERS_TRADING_OPINION_UPDATED, payload)?,
            )),
            other => Err(CodecError::UnknownOutboundType(other.to_string())),
        }
    }
}
