//! Wire shapes of inbound trigger requests and the records handlers receive.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use crate::session::Session;

/// Caller-asserted session variables as sent by the trigger source.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionVariables {
    #[serde(rename = "x-hasura-user-id", default)]
    pub user_id: Option<String>,
    #[serde(rename = "x-hasura-role", default)]
    pub role: Option<String>,
}

impl SessionVariables {
    pub fn to_session(&self) -> Session {
        Session::from_variables(
            self.user_id.as_deref(),
            self.role.as_deref().unwrap_or_default(),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionName {
    pub name: String,
}

/// `POST /actions` body.
#[derive(Debug, Deserialize)]
pub struct ActionEnvelope {
    pub action: ActionName,
    #[serde(default)]
    pub input: Option<Box<RawValue>>,
    #[serde(default)]
    pub session_variables: SessionVariables,
}

impl ActionEnvelope {
    pub fn name(&self) -> &str {
        &self.action.name
    }

    /// The raw `input` field, `null` when absent.
    pub fn input_bytes(&self) -> Bytes {
        match &self.input {
            Some(raw) => Bytes::copy_from_slice(raw.get().as_bytes()),
            None => Bytes::from_static(b"null"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

/// Row operation that fired an event trigger.
///
/// Operations without a variant of their own are kept verbatim in `Other`,
/// so a new kind of trigger still reaches its handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventOp {
    Insert,
    Update,
    Delete,
    Manual,
    Other(String),
}

impl EventOp {
    pub fn as_str(&self) -> &str {
        match self {
            EventOp::Insert => "INSERT",
            EventOp::Update => "UPDATE",
            EventOp::Delete => "DELETE",
            EventOp::Manual => "MANUAL",
            EventOp::Other(op) => op,
        }
    }
}

impl From<String> for EventOp {
    fn from(op: String) -> Self {
        match op.as_str() {
            "INSERT" => EventOp::Insert,
            "UPDATE" => EventOp::Update,
            "DELETE" => EventOp::Delete,
            "MANUAL" => EventOp::Manual,
            _ => EventOp::Other(op),
        }
    }
}

impl From<EventOp> for String {
    fn from(op: EventOp) -> Self {
        match op {
            EventOp::Other(op) => op,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for EventOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub old: Option<Value>,
    #[serde(default)]
    pub new: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventBody {
    #[serde(default)]
    pub session_variables: Option<SessionVariables>,
    pub op: EventOp,
    #[serde(default)]
    pub data: EventData,
}

/// `POST /events` body.
#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    #[serde(default, deserialize_with = "de_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    pub trigger: TriggerRef,
    pub table: TableRef,
    pub event: EventBody,
}

impl EventEnvelope {
    /// Name of the handler to dispatch to.
    pub fn trigger_name(&self) -> &str {
        &self.trigger.name
    }

    pub fn session(&self) -> Session {
        self.event
            .session_variables
            .as_ref()
            .map(SessionVariables::to_session)
            .unwrap_or_else(|| Session::new(None, ""))
    }

    /// Flatten into the record handed to event handlers.
    pub fn into_event(self) -> Event {
        Event {
            id: self.id,
            created_at: self.created_at,
            trigger: self.trigger.name,
            table: self.table,
            op: self.event.op,
            old: self.event.data.old,
            new: self.event.data.new,
        }
    }
}

/// Normalized row-change notification, without the outer trigger wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub trigger: String,
    pub table: TableRef,
    pub op: EventOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
}

/// Error body returned by the trigger endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: String,
}

impl ErrorBody {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: "400".to_owned(),
        }
    }
}

/// Accepts RFC 3339 or a zone-less timestamp, which is taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|n| n.and_utc())
        })
}

fn de_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| {
        parse_timestamp(&s).ok_or_else(|| de::Error::custom(format!("invalid timestamp '{s}'")))
    })
    .transpose()
}
