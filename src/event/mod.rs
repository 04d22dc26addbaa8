//! Event data model and topic naming.
//!
//! An [`Event`] is one decoded entry of the upstream trace log. The store
//! assigns every entry a monotonically increasing offset; everything else is
//! carried opaquely from the decoded record. Events are immutable once
//! constructed and travel through the fan-out path as `Arc<Event>` so that
//! every subscriber shares one allocation.
//!
//! Topics follow the `event_<type>` convention: one topic per event type,
//! with the type recovered by splitting the topic name on its last `_`.

mod decoder;

pub use decoder::{DecodeError, EventDecoder, JsonDecoder};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One decoded trace-log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Store-assigned, monotonically increasing sequence number.
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub casino_id: u64,
    #[serde(default)]
    pub game_id: u64,
    #[serde(default)]
    pub req_id: u64,
    #[serde(default)]
    pub event_type: i32,
    /// Decoded payload, schema chosen by `event_type`.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Topic name did not end in a parsable event type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("topic {0} has no event type suffix")]
pub struct TopicParseError(pub String);

/// Topic name for an event type, e.g. `event_0`.
pub fn topic_for(event_type: i32) -> String {
    format!("event_{event_type}")
}

/// Recover the event type from a topic name by its last `_` segment.
pub fn event_type_from_topic(topic: &str) -> Result<i32, TopicParseError> {
    topic
        .rsplit('_')
        .next()
        .and_then(|suffix| suffix.parse().ok())
        .ok_or_else(|| TopicParseError(topic.to_string()))
}

/// Keep only events whose type appears in `event_types`, preserving order.
pub fn filter_by_event_types(events: &[Arc<Event>], event_types: &[i32]) -> Vec<Arc<Event>> {
    events
        .iter()
        .filter(|event| event_types.contains(&event.event_type))
        .cloned()
        .collect()
}

/// Keep only events strictly above `offset`, dropping duplicate offsets.
pub fn filter_from_offset(events: Vec<Arc<Event>>, offset: u64) -> Vec<Arc<Event>> {
    let mut last = offset;
    let mut out = Vec::with_capacity(events.len());
    for event in events {
        if event.offset > last {
            last = event.offset;
            out.push(event);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(offset: u64, event_type: i32) -> Arc<Event> {
        Arc::new(Event {
            offset,
            sender: "tester".into(),
            casino_id: 1,
            game_id: 2,
            req_id: 3,
            event_type,
            data: serde_json::Value::Null,
        })
    }

    #[test]
    fn topic_round_trip() {
        assert_eq!(topic_for(0), "event_0");
        assert_eq!(event_type_from_topic("event_0").unwrap(), 0);
        assert_eq!(event_type_from_topic("event_42").unwrap(), 42);
    }

    #[test]
    fn topic_last_separator_wins() {
        assert_eq!(event_type_from_topic("my_custom_7").unwrap(), 7);
    }

    #[test]
    fn topic_without_type_suffix_fails() {
        assert!(event_type_from_topic("event_x").is_err());
        assert!(event_type_from_topic("plain").is_err());
    }

    #[test]
    fn filter_by_types() {
        let events = vec![event(1, 0), event(2, 1), event(3, 0)];
        let kept = filter_by_event_types(&events, &[0]);
        assert_eq!(
            kept.iter().map(|e| e.offset).collect::<Vec<_>>(),
            vec![1, 3]
        );

        let kept = filter_by_event_types(&events, &[0, 1]);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn filter_from_offset_drops_older_and_duplicates() {
        let events = vec![event(1, 0), event(2, 0), event(2, 0), event(3, 0)];
        let kept = filter_from_offset(events, 1);
        assert_eq!(
            kept.iter().map(|e| e.offset).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[test]
    fn event_json_field_names() {
        let event = Event {
            offset: 7,
            sender: "alice".into(),
            casino_id: 1,
            game_id: 2,
            req_id: 3,
            event_type: 4,
            data: serde_json::json!({"win": true}),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["offset"], 7);
        assert_eq!(value["sender"], "alice");
        assert_eq!(value["casino_id"], 1);
        assert_eq!(value["game_id"], 2);
        assert_eq!(value["req_id"], 3);
        assert_eq!(value["event_type"], 4);
        assert_eq!(value["data"]["win"], true);
    }
}
