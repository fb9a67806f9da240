//! Realtime message types
//!
//! JSON text frames pushed by the realtime server:
//!
//! ```json
//! {"event": "report.created", "group": "site-3", "data": {"id": "M-42", ...}}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{EntityKind, ServerRecord};

/// Errors decoding a realtime frame
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Malformed realtime message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Event name '{0}' is not of the form <entity>.<kind>")]
    EventName(String),

    #[error("Unknown entity in event '{0}'")]
    Entity(String),

    #[error("Unknown event kind '{0}'")]
    Kind(String),
}

/// What happened to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
    StatusChanged,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
            EventKind::StatusChanged => "status_changed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(EventKind::Created),
            "updated" => Some(EventKind::Updated),
            "deleted" => Some(EventKind::Deleted),
            "status_changed" | "status-changed" => Some(EventKind::StatusChanged),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change pushed by the server
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeEvent {
    pub entity: EntityKind,
    pub kind: EventKind,
    /// Scope the event was broadcast to
    pub group: Option<String>,
    pub record: ServerRecord,
}

#[derive(Serialize, Deserialize)]
struct Frame {
    event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group: Option<String>,
    data: ServerRecord,
}

impl RealtimeEvent {
    pub fn new(entity: EntityKind, kind: EventKind, record: ServerRecord) -> Self {
        Self {
            entity,
            kind,
            group: None,
            record,
        }
    }

    /// Decode a text frame
    pub fn decode(text: &str) -> Result<Self, MessageError> {
        let frame: Frame = serde_json::from_str(text)?;

        let (entity, kind) = frame
            .event
            .split_once('.')
            .ok_or_else(|| MessageError::EventName(frame.event.clone()))?;
        let entity: EntityKind = entity
            .parse()
            .map_err(|_| MessageError::Entity(frame.event.clone()))?;
        let kind = EventKind::parse(kind).ok_or_else(|| MessageError::Kind(kind.to_string()))?;

        Ok(Self {
            entity,
            kind,
            group: frame.group,
            record: frame.data,
        })
    }

    /// Encode as a text frame
    pub fn encode(&self) -> Result<String, MessageError> {
        let frame = Frame {
            event: format!("{}.{}", self.entity, self.kind),
            group: self.group.clone(),
            data: self.record.clone(),
        };
        Ok(serde_json::to_string(&frame)?)
    }
}

/// Messages sent to the realtime server
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join the broadcast groups the client cares about
    Subscribe { groups: Vec<String> },
}

impl ClientMessage {
    pub fn subscribe(groups: &[String]) -> Self {
        ClientMessage::Subscribe {
            groups: groups.to_vec(),
        }
    }

    pub fn encode(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_created() {
        let event = RealtimeEvent::decode(
            r#"{"event":"report.created","group":"site-3","data":{"id":"M-42","title":"Leak"}}"#,
        )
        .unwrap();

        assert_eq!(event.entity, EntityKind::Report);
        assert_eq!(event.kind, EventKind::Created);
        assert_eq!(event.group.as_deref(), Some("site-3"));
        assert_eq!(event.record.id, "M-42");
        assert_eq!(event.record.get_str("title"), Some("Leak"));
    }

    #[test]
    fn test_decode_status_change_spellings() {
        for name in ["asset.status_changed", "asset.status-changed"] {
            let text = format!(r#"{{"event":"{}","data":{{"id":"A-1","status":"out"}}}}"#, name);
            let event = RealtimeEvent::decode(&text).unwrap();
            assert_eq!(event.kind, EventKind::StatusChanged);
            assert!(event.group.is_none());
        }
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            RealtimeEvent::decode("not json"),
            Err(MessageError::Json(_))
        ));
        assert!(matches!(
            RealtimeEvent::decode(r#"{"event":"created","data":{"id":"x"}}"#),
            Err(MessageError::EventName(_))
        ));
        assert!(matches!(
            RealtimeEvent::decode(r#"{"event":"vehicle.created","data":{"id":"x"}}"#),
            Err(MessageError::Entity(_))
        ));
        assert!(matches!(
            RealtimeEvent::decode(r#"{"event":"report.archived","data":{"id":"x"}}"#),
            Err(MessageError::Kind(_))
        ));
    }

    #[test]
    fn test_encode_uses_wire_names() {
        let event = RealtimeEvent::new(
            EntityKind::Asset,
            EventKind::StatusChanged,
            ServerRecord::new("A-1", Default::default()),
        );
        let text = event.encode().unwrap();
        assert!(text.contains(r#""event":"asset.status_changed""#));
        assert_eq!(RealtimeEvent::decode(&text).unwrap(), event);
    }

    #[test]
    fn test_subscribe_message() {
        let msg = ClientMessage::subscribe(&["site-3".to_string()]);
        assert_eq!(
            msg.encode().unwrap(),
            r#"{"action":"subscribe","groups":["site-3"]}"#
        );
    }
}
