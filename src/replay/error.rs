use crate::codec::{CodecError, PayloadKind};
use std::fmt;
use std::time::Duration;

/// Reasons a replay stops before reaching the end of its snapshot.
#[derive(Debug)]
pub enum ReplayError {
    /// The snapshot lacks an event type every replay needs; nothing was published.
    MissingRequiredEvent(PayloadKind),
    /// A handler ran before the fixture-scheduled event established the new fixture.
    FixtureNotEstablished { event: PayloadKind },
    Decode { sequence: String, source: CodecError },
    Publish {
        payload_type: &'static str,
        source: anyhow::Error,
    },
    RemapTimeout {
        fixture_id: String,
        waited: Duration,
        last_error: Option<String>,
    },
    Cancelled,
}

impl ReplayError {
    /// Stable machine-readable name used in API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingRequiredEvent(_) => "missing_required_event",
            Self::FixtureNotEstablished { .. } => "fixture_not_established",
            Self::Decode { .. } => "decode",
            Self::Publish { .. } => "publish",
            Self::RemapTimeout { .. } => "remap_timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRequiredEvent(kind) => write!(
                f,
                "snapshot has no {} event ({}); refusing to replay",
                kind,
                kind.tag()
            ),
            Self::FixtureNotEstablished { event } => write!(
                f,
                "{} event reached before a fixture-scheduled event established the new fixture",
                event
            ),
            Self::Decode { sequence, source } => {
                write!(f, "failed to decode event at sequence {}: {}", sequence, source)
            }
            Self::Publish {
                payload_type,
                source,
            } => write!(f, "failed to publish {}: {:#}", payload_type, source),
            Self::RemapTimeout {
                fixture_id,
                waited,
                last_error,
            } => {
                write!(
                    f,
                    "external id for fixture {} not resolved after {}ms",
                    fixture_id,
                    waited.as_millis()
                )?;
                if let Some(e) = last_error {
                    write!(f, " (last lookup error: {})", e)?;
                }
                Ok(())
            }
            Self::Cancelled => write!(f, "replay cancelled by operator"),
        }
    }
}

impl std::error::Error for ReplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode { source, .. } => Some(source),
            Self::Publish { source, .. } => Some(&**source),
            _ => None,
        }
    }
}
