//! # Change Events
//!
//! Row-level change payloads delivered by the backend change feed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{RealtimeError, RealtimeResult};

/// Kind of row change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// New row inserted
    Insert,
    /// Existing row updated
    Update,
    /// Row deleted
    Delete,
}

impl ChangeKind {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(ChangeKind::Insert),
            "UPDATE" => Some(ChangeKind::Update),
            "DELETE" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which change kinds a subscription listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EventFilter {
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
    #[default]
    #[serde(rename = "*")]
    All,
}

impl EventFilter {
    /// Check whether a change kind passes this filter
    pub fn matches(&self, kind: ChangeKind) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Insert => kind == ChangeKind::Insert,
            EventFilter::Update => kind == ChangeKind::Update,
            EventFilter::Delete => kind == ChangeKind::Delete,
        }
    }

    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EventFilter::Insert => "INSERT",
            EventFilter::Update => "UPDATE",
            EventFilter::Delete => "DELETE",
            EventFilter::All => "*",
        }
    }
}

impl fmt::Display for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventFilter {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(EventFilter::Insert),
            "UPDATE" => Ok(EventFilter::Update),
            "DELETE" => Ok(EventFilter::Delete),
            "*" | "ALL" => Ok(EventFilter::All),
            other => Err(RealtimeError::ConfigError(format!(
                "unknown event filter: {}",
                other
            ))),
        }
    }
}

/// A single row change notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePayload {
    /// Schema name (default: "public")
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Table name
    pub table: String,

    /// Change kind
    pub kind: ChangeKind,

    /// Commit time reported by the backend
    pub commit_timestamp: DateTime<Utc>,

    /// Row image after the change (INSERT/UPDATE)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,

    /// Row image before the change (UPDATE/DELETE)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
}

pub(crate) fn default_schema() -> String {
    "public".to_string()
}

impl ChangePayload {
    /// Create an INSERT payload
    pub fn insert(table: impl Into<String>, record: Value) -> Self {
        Self {
            schema: default_schema(),
            table: table.into(),
            kind: ChangeKind::Insert,
            commit_timestamp: Utc::now(),
            new: Some(record),
            old: None,
        }
    }

    /// Create an UPDATE payload
    pub fn update(table: impl Into<String>, old: Value, new: Value) -> Self {
        Self {
            schema: default_schema(),
            table: table.into(),
            kind: ChangeKind::Update,
            commit_timestamp: Utc::now(),
            new: Some(new),
            old: Some(old),
        }
    }

    /// Create a DELETE payload
    pub fn delete(table: impl Into<String>, old: Value) -> Self {
        Self {
            schema: default_schema(),
            table: table.into(),
            kind: ChangeKind::Delete,
            commit_timestamp: Utc::now(),
            new: None,
            old: Some(old),
        }
    }

    /// The most relevant row image: new if present, else old
    pub fn record(&self) -> Option<&Value> {
        self.new.as_ref().or(self.old.as_ref())
    }

    /// Parse the `data` object of a `postgres_changes` frame
    pub fn from_wire(data: &Value) -> RealtimeResult<Self> {
        let field = |name: &str| {
            data.get(name)
                .and_then(Value::as_str)
                .ok_or_else(|| RealtimeError::InvalidMessage(format!("missing '{}'", name)))
        };

        let kind_str = field("type")?;
        let kind = ChangeKind::parse(kind_str).ok_or_else(|| {
            RealtimeError::InvalidMessage(format!("unknown change type '{}'", kind_str))
        })?;

        let commit_timestamp = data
            .get("commit_timestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        // Empty row images are sent as {} rather than omitted
        let image = |name: &str| {
            data.get(name)
                .filter(|v| v.as_object().map(|o| !o.is_empty()).unwrap_or(!v.is_null()))
                .cloned()
        };

        Ok(Self {
            schema: field("schema").map(str::to_string).unwrap_or_else(|_| default_schema()),
            table: field("table")?.to_string(),
            kind,
            commit_timestamp,
            new: image("record"),
            old: image("old_record"),
        })
    }

    /// Render as the `data` object of a `postgres_changes` frame
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "type": self.kind.as_str(),
            "schema": self.schema,
            "table": self.table,
            "commit_timestamp": self.commit_timestamp.to_rfc3339(),
            "record": self.new.clone().unwrap_or_else(|| serde_json::json!({})),
            "old_record": self.old.clone().unwrap_or_else(|| serde_json::json!({})),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_filter_matching() {
        assert!(EventFilter::All.matches(ChangeKind::Delete));
        assert!(EventFilter::Insert.matches(ChangeKind::Insert));
        assert!(!EventFilter::Insert.matches(ChangeKind::Update));
    }

    #[test]
    fn test_event_filter_parse() {
        assert_eq!("insert".parse::<EventFilter>().unwrap(), EventFilter::Insert);
        assert_eq!("*".parse::<EventFilter>().unwrap(), EventFilter::All);
        assert!("upsert".parse::<EventFilter>().is_err());
    }

    #[test]
    fn test_record_prefers_new_image() {
        let update = ChangePayload::update("workouts", json!({"v": 1}), json!({"v": 2}));
        assert_eq!(update.record(), Some(&json!({"v": 2})));

        let delete = ChangePayload::delete("workouts", json!({"v": 1}));
        assert_eq!(delete.record(), Some(&json!({"v": 1})));
    }

    #[test]
    fn test_from_wire() {
        let data = json!({
            "type": "UPDATE",
            "schema": "public",
            "table": "chat_messages",
            "commit_timestamp": "2024-05-01T10:00:00Z",
            "record": {"id": 7, "body": "hi"},
            "old_record": {"id": 7}
        });

        let payload = ChangePayload::from_wire(&data).unwrap();
        assert_eq!(payload.kind, ChangeKind::Update);
        assert_eq!(payload.table, "chat_messages");
        assert_eq!(payload.new, Some(json!({"id": 7, "body": "hi"})));
        assert_eq!(payload.old, Some(json!({"id": 7})));
        assert_eq!(payload.commit_timestamp.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_from_wire_empty_old_record() {
        let data = json!({
            "type": "INSERT",
            "schema": "public",
            "table": "workouts",
            "record": {"id": 1},
            "old_record": {}
        });

        let payload = ChangePayload::from_wire(&data).unwrap();
        assert_eq!(payload.old, None);
    }

    #[test]
    fn test_from_wire_rejects_unknown_type() {
        let data = json!({"type": "TRUNCATE", "table": "workouts"});
        assert!(matches!(
            ChangePayload::from_wire(&data),
            Err(RealtimeError::InvalidMessage(_))
        ));
    }
}
