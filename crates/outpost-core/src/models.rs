//! Data models for Outpost
//!
//! Defines the entity kinds, queued operations and server-confirmed
//! records that move through the queue, cache and views.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque key-value payload carried by operations and records
pub type Fields = serde_json::Map<String, Value>;

/// Payload field carrying the client-side idempotency key of a create
///
/// Set to the operation's temp id. A server that echoes it back gives
/// exact correlation between a provisional record and its confirmation.
pub const CLIENT_REF_FIELD: &str = "client_ref";

/// Prefix of locally generated ids for records the server has not confirmed
pub const TEMP_ID_PREFIX: &str = "tmp-";

/// Whether `id` was generated locally rather than by the server
pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Entity collections the client can mutate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Checkpoint equipment (bikes, radios, keys) checked in and out
    Asset,
    /// Incident and patrol reports
    Report,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Asset, EntityKind::Report];

    /// Wire and storage name
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Asset => "asset",
            EntityKind::Report => "report",
        }
    }

    /// Collection segment of REST paths
    pub fn plural(&self) -> &'static str {
        match self {
            EntityKind::Asset => "assets",
            EntityKind::Report => "reports",
        }
    }

    /// Business fields compared when matching a confirmed record
    /// against a provisional one
    pub fn discriminating_fields(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Asset => &["name", "category"],
            EntityKind::Report => &["title", "category", "author"],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for unrecognised entity names
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown entity kind '{0}' (expected asset or report)")]
pub struct UnknownEntity(pub String);

impl FromStr for EntityKind {
    type Err = UnknownEntity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asset" | "assets" => Ok(EntityKind::Asset),
            "report" | "reports" => Ok(EntityKind::Report),
            other => Err(UnknownEntity(other.to_string())),
        }
    }
}

/// The kind of mutation an operation carries
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "action", rename_all = "snake_case")]
pub enum OpType {
    Create,
    Update,
    Delete,
    /// Domain-specific action such as `check_in` or `check_out`
    Domain(String),
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpType::Create => f.write_str("create"),
            OpType::Update => f.write_str("update"),
            OpType::Delete => f.write_str("delete"),
            OpType::Domain(action) => f.write_str(action),
        }
    }
}

/// A mutation waiting in the queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingOperation {
    /// Unique within the queue
    pub id: String,
    pub entity: EntityKind,
    pub op_type: OpType,
    pub payload: Fields,
    /// Local-only identifier, set only for creates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    /// Server id (or temp id of a queued create) this operation acts on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    /// Monotonic sort key, strictly increasing in insertion order
    pub enqueued_at: u64,
    /// Wall-clock time of the user action
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl PendingOperation {
    pub fn is_create(&self) -> bool {
        self.op_type == OpType::Create
    }

    /// Identity of the logical object this operation touches
    pub fn object_key(&self) -> Option<(EntityKind, &str)> {
        self.target_id
            .as_deref()
            .or(self.temp_id.as_deref())
            .map(|key| (self.entity, key))
    }

    /// Target id, when it still names an unconfirmed local record
    pub fn temp_target(&self) -> Option<&str> {
        self.target_id.as_deref().filter(|id| is_temp_id(id))
    }

    /// Short id for logs and CLI output
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(8)]
    }
}

/// A mutation as requested by the user, before the queue stamps it
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub entity: EntityKind,
    pub op_type: OpType,
    pub payload: Fields,
    pub temp_id: Option<String>,
    pub target_id: Option<String>,
}

impl NewOperation {
    pub fn create(entity: EntityKind, payload: Fields) -> Self {
        Self {
            entity,
            op_type: OpType::Create,
            payload,
            temp_id: None,
            target_id: None,
        }
    }

    pub fn update(entity: EntityKind, target_id: impl Into<String>, payload: Fields) -> Self {
        Self {
            entity,
            op_type: OpType::Update,
            payload,
            temp_id: None,
            target_id: Some(target_id.into()),
        }
    }

    pub fn delete(entity: EntityKind, target_id: impl Into<String>) -> Self {
        Self {
            entity,
            op_type: OpType::Delete,
            payload: Fields::new(),
            temp_id: None,
            target_id: Some(target_id.into()),
        }
    }

    pub fn domain(
        entity: EntityKind,
        action: impl Into<String>,
        target_id: impl Into<String>,
        payload: Fields,
    ) -> Self {
        Self {
            entity,
            op_type: OpType::Domain(action.into()),
            payload,
            temp_id: None,
            target_id: Some(target_id.into()),
        }
    }

    /// Use a caller-chosen temp id for a create
    pub fn with_temp_id(mut self, temp_id: impl Into<String>) -> Self {
        self.temp_id = Some(temp_id.into());
        self
    }
}

/// A record confirmed by the server, carrying its authoritative id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerRecord {
    pub id: String,
    #[serde(flatten)]
    pub fields: Fields,
}

impl ServerRecord {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// String value of a field, if present and a string
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Echoed idempotency key, if the server returned one
    pub fn client_ref(&self) -> Option<&str> {
        self.get_str(CLIENT_REF_FIELD)
    }

    pub fn status(&self) -> Option<&str> {
        self.get_str("status")
    }

    /// Server creation time, when the record carries one
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.get_str("created_at")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Why an operation left the queue without being applied
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// Transient failures consumed the whole retry budget
    RetryExhausted { attempts: u32, last_error: String },
    /// The server rejected the payload
    Rejected { message: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::RetryExhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {} attempts: {}", attempts, last_error),
            FailureReason::Rejected { message } => write!(f, "rejected by server: {}", message),
        }
    }
}

/// An operation in the "failed, not synced" state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedOperation {
    pub operation: PendingOperation,
    pub reason: FailureReason,
    pub failed_at: DateTime<Utc>,
}

/// Build a [`Fields`] map from `(name, value)` pairs
pub fn fields<I, K, V>(pairs: I) -> Fields
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
