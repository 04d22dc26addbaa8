//! Raw record decoding.
//!
//! The relay treats payload decoding as a pluggable collaborator: the store
//! hands back raw record bytes, and an [`EventDecoder`] turns them into a
//! structured [`Event`]. Production deployments plug in whatever envelope
//! format their trace log uses; [`JsonDecoder`] covers JSON-encoded records
//! and is what the in-memory store and the tests use.

use std::collections::HashSet;

use thiserror::Error;

use super::Event;

/// Decoding failure for one raw record.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The outer envelope could not be parsed.
    #[error("malformed event envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    /// The envelope parsed but named an event type with no known schema.
    #[error("no schema for event type {0}")]
    UnknownEventType(i32),
}

/// Turns one raw store record into a structured [`Event`].
pub trait EventDecoder: Send + Sync {
    fn decode(&self, raw: &[u8]) -> Result<Event, DecodeError>;
}

/// Decoder for JSON-encoded records.
///
/// Mirrors the two-stage shape of a schema registry: the envelope is decoded
/// first, then the event type selects the payload schema. Here every known
/// type shares the JSON representation, so the second stage reduces to a
/// membership check.
#[derive(Debug, Clone)]
pub struct JsonDecoder {
    event_types: HashSet<i32>,
}

impl JsonDecoder {
    pub fn new<I: IntoIterator<Item = i32>>(event_types: I) -> Self {
        Self {
            event_types: event_types.into_iter().collect(),
        }
    }
}

impl EventDecoder for JsonDecoder {
    fn decode(&self, raw: &[u8]) -> Result<Event, DecodeError> {
        let event: Event = serde_json::from_slice(raw)?;
        if !self.event_types.contains(&event.event_type) {
            return Err(DecodeError::UnknownEventType(event.event_type));
        }
        Ok(event)
    }
}
