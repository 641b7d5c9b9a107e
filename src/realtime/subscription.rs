//! # Subscription Descriptors
//!
//! What a caller listens to (table, event, optional row filter) and what
//! runs when a matching change is delivered.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{RealtimeError, RealtimeResult};
use super::event::{default_schema, ChangePayload, EventFilter};

/// Callback invoked with the latest payload of a debounce window
pub type ChangeCallback = Arc<dyn Fn(ChangePayload) + Send + Sync>;

/// Stable, caller-chosen identity of a subscription
///
/// Debounce state is keyed by this value, so reordering descriptors
/// between activations never changes which payloads collapse together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionKey(String);

impl SubscriptionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Filter operator for row filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

impl FilterOp {
    fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::In => "in",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(FilterOp::Eq),
            "neq" => Some(FilterOp::Neq),
            "gt" => Some(FilterOp::Gt),
            "gte" => Some(FilterOp::Gte),
            "lt" => Some(FilterOp::Lt),
            "lte" => Some(FilterOp::Lte),
            "in" => Some(FilterOp::In),
            _ => None,
        }
    }
}

/// Row-level filter in the backend's `column=op.value` syntax
///
/// The server applies the filter before sending; the client re-checks it
/// so that several descriptors on one table can share a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFilter {
    /// Column to filter on
    pub column: String,
    /// Operator
    pub op: FilterOp,
    /// Operand values (exactly one unless `op` is `In`)
    pub values: Vec<String>,
}

impl RowFilter {
    /// Shorthand for `column=eq.value`
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::Eq,
            values: vec![value.into()],
        }
    }

    /// Check if a payload's row image passes this filter
    pub fn matches(&self, payload: &ChangePayload) -> bool {
        let Some(field) = payload.record().and_then(|r| r.get(&self.column)) else {
            return false;
        };

        match self.op {
            FilterOp::Eq => self.values.first().is_some_and(|v| value_eq(field, v)),
            FilterOp::Neq => self.values.first().is_some_and(|v| !value_eq(field, v)),
            FilterOp::In => self.values.iter().any(|v| value_eq(field, v)),
            FilterOp::Gt => self.compare(field, |o| o.is_gt()),
            FilterOp::Gte => self.compare(field, |o| o.is_ge()),
            FilterOp::Lt => self.compare(field, |o| o.is_lt()),
            FilterOp::Lte => self.compare(field, |o| o.is_le()),
        }
    }

    fn compare(&self, field: &Value, pred: impl Fn(std::cmp::Ordering) -> bool) -> bool {
        let Some(operand) = self.values.first() else {
            return false;
        };

        let ordering = match (field.as_f64(), operand.parse::<f64>().ok()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => field.as_str().map(|s| s.cmp(operand.as_str())),
        };

        ordering.is_some_and(pred)
    }
}

/// Compare a JSON value with a filter operand given as text
fn value_eq(field: &Value, operand: &str) -> bool {
    match field {
        Value::String(s) => s == operand,
        Value::Number(n) => match (n.as_f64(), operand.parse::<f64>()) {
            (Some(a), Ok(b)) => a == b,
            _ => n.to_string() == operand,
        },
        Value::Bool(b) => operand.parse::<bool>().map(|o| o == *b).unwrap_or(false),
        Value::Null => operand == "null",
        _ => false,
    }
}

impl FromStr for RowFilter {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| RealtimeError::InvalidFilter(s.to_string(), reason.to_string());

        let (column, rest) = s.split_once('=').ok_or_else(|| invalid("missing '='"))?;
        let (op, operand) = rest.split_once('.').ok_or_else(|| invalid("missing operator"))?;

        let column = column.trim();
        if column.is_empty() {
            return Err(invalid("empty column"));
        }

        let op = FilterOp::parse(op).ok_or_else(|| invalid("unknown operator"))?;

        let values = if op == FilterOp::In {
            let list = operand
                .strip_prefix('(')
                .and_then(|l| l.strip_suffix(')'))
                .ok_or_else(|| invalid("in() list must be parenthesised"))?;
            list.split(',')
                .map(|v| v.trim().trim_matches('"').to_string())
                .filter(|v| !v.is_empty())
                .collect::<Vec<_>>()
        } else {
            vec![operand.to_string()]
        };

        if values.is_empty() {
            return Err(invalid("no operand"));
        }

        Ok(Self {
            column: column.to_string(),
            op,
            values,
        })
    }
}

impl fmt::Display for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.op == FilterOp::In {
            write!(f, "{}=in.({})", self.column, self.values.join(","))
        } else {
            let value = self.values.first().map(String::as_str).unwrap_or_default();
            write!(f, "{}={}.{}", self.column, self.op.as_str(), value)
        }
    }
}

/// Wire-level listener registration for one descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBinding {
    pub event: EventFilter,
    pub schema: String,
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// A caller-supplied subscription
#[derive(Clone)]
pub struct SubscriptionDescriptor {
    /// Stable debounce key
    pub key: SubscriptionKey,

    /// Schema name
    pub schema: String,

    /// Table name
    pub table: String,

    /// Change kinds to listen to
    pub event: EventFilter,

    /// Optional row filter
    pub filter: Option<RowFilter>,

    callback: ChangeCallback,
}

impl SubscriptionDescriptor {
    /// Create a descriptor listening to every change on `table`
    pub fn new<F>(key: impl Into<SubscriptionKey>, table: impl Into<String>, callback: F) -> Self
    where
        F: Fn(ChangePayload) + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            schema: default_schema(),
            table: table.into(),
            event: EventFilter::All,
            filter: None,
            callback: Arc::new(callback),
        }
    }

    /// Restrict to one change kind
    pub fn with_event(mut self, event: EventFilter) -> Self {
        self.event = event;
        self
    }

    /// Add a row filter
    pub fn with_filter(mut self, filter: RowFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Use a schema other than `public`
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Check if a payload belongs to this subscription
    pub fn matches(&self, payload: &ChangePayload) -> bool {
        if payload.table != self.table || payload.schema != self.schema {
            return false;
        }

        if !self.event.matches(payload.kind) {
            return false;
        }

        match &self.filter {
            Some(filter) => filter.matches(payload),
            None => true,
        }
    }

    /// Listener registration sent to the server
    pub fn binding(&self) -> ChannelBinding {
        ChannelBinding {
            event: self.event,
            schema: self.schema.clone(),
            table: self.table.clone(),
            filter: self.filter.as_ref().map(ToString::to_string),
        }
    }

    /// Invoke the wrapped callback
    pub(crate) fn deliver(&self, payload: ChangePayload) {
        (self.callback)(payload)
    }
}

impl fmt::Debug for SubscriptionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionDescriptor")
            .field("key", &self.key)
            .field("schema", &self.schema)
            .field("table", &self.table)
            .field("event", &self.event)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl From<String> for SubscriptionKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Validated set of descriptors for one activation
#[derive(Debug, Clone, Default)]
pub struct SubscriptionSet {
    descriptors: Vec<SubscriptionDescriptor>,
}

impl SubscriptionSet {
    /// Validate descriptors: keys must be unique and tables non-empty
    pub fn new(descriptors: Vec<SubscriptionDescriptor>) -> RealtimeResult<Self> {
        let mut seen = HashSet::new();
        for descriptor in &descriptors {
            if descriptor.table.trim().is_empty() {
                return Err(RealtimeError::MissingTable(descriptor.key.to_string()));
            }
            if !seen.insert(descriptor.key.clone()) {
                return Err(RealtimeError::DuplicateKey(descriptor.key.to_string()));
            }
        }

        Ok(Self { descriptors })
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubscriptionDescriptor> {
        self.descriptors.iter()
    }

    /// Look up a descriptor by key
    pub fn get(&self, key: &SubscriptionKey) -> Option<&SubscriptionDescriptor> {
        self.descriptors.iter().find(|d| &d.key == key)
    }

    /// Keys of every descriptor matching a payload
    pub fn matching(&self, payload: &ChangePayload) -> Vec<SubscriptionKey> {
        self.descriptors
            .iter()
            .filter(|d| d.matches(payload))
            .map(|d| d.key.clone())
            .collect()
    }

    /// Bindings for every descriptor, in declaration order
    pub fn bindings(&self) -> Vec<ChannelBinding> {
        self.descriptors.iter().map(SubscriptionDescriptor::binding).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop(_: ChangePayload) {}

    #[test]
    fn test_filter_parse_and_display() {
        let filter: RowFilter = "user_id=eq.42".parse().unwrap();
        assert_eq!(filter.column, "user_id");
        assert_eq!(filter.op, FilterOp::Eq);
        assert_eq!(filter.to_string(), "user_id=eq.42");

        let filter: RowFilter = "status=in.(active,paused)".parse().unwrap();
        assert_eq!(filter.values, vec!["active", "paused"]);
        assert_eq!(filter.to_string(), "status=in.(active,paused)");
    }

    #[test]
    fn test_filter_parse_errors() {
        assert!("user_id".parse::<RowFilter>().is_err());
        assert!("user_id=42".parse::<RowFilter>().is_err());
        assert!("user_id=like.4%".parse::<RowFilter>().is_err());
        assert!("status=in.active".parse::<RowFilter>().is_err());
        assert!("=eq.1".parse::<RowFilter>().is_err());
    }

    #[test]
    fn test_filter_eq_numeric_and_string() {
        let filter: RowFilter = "student_id=eq.7".parse().unwrap();
        assert!(filter.matches(&ChangePayload::insert("workouts", json!({"student_id": 7}))));
        assert!(filter.matches(&ChangePayload::insert("workouts", json!({"student_id": "7"}))));
        assert!(!filter.matches(&ChangePayload::insert("workouts", json!({"student_id": 8}))));
        assert!(!filter.matches(&ChangePayload::insert("workouts", json!({}))));
    }

    #[test]
    fn test_filter_ordering() {
        let filter: RowFilter = "points=gte.100".parse().unwrap();
        assert!(filter.matches(&ChangePayload::insert("user_goals", json!({"points": 100}))));
        assert!(!filter.matches(&ChangePayload::insert("user_goals", json!({"points": 99.5}))));
    }

    #[test]
    fn test_filter_uses_old_image_for_delete() {
        let filter = RowFilter::eq("conversation_id", "c1");
        let payload = ChangePayload::delete("chat_messages", json!({"conversation_id": "c1"}));
        assert!(filter.matches(&payload));
    }

    #[test]
    fn test_descriptor_matching() {
        let descriptor = SubscriptionDescriptor::new("msgs", "chat_messages", noop)
            .with_event(EventFilter::Insert)
            .with_filter(RowFilter::eq("conversation_id", "c1"));

        assert!(descriptor.matches(&ChangePayload::insert(
            "chat_messages",
            json!({"conversation_id": "c1"})
        )));
        assert!(!descriptor.matches(&ChangePayload::insert(
            "chat_messages",
            json!({"conversation_id": "c2"})
        )));
        assert!(!descriptor.matches(&ChangePayload::update(
            "chat_messages",
            json!({"conversation_id": "c1"}),
            json!({"conversation_id": "c1"})
        )));
        assert!(!descriptor.matches(&ChangePayload::insert("feedbacks", json!({}))));
    }

    #[test]
    fn test_binding() {
        let descriptor = SubscriptionDescriptor::new("w", "workouts", noop)
            .with_event(EventFilter::Update)
            .with_filter(RowFilter::eq("student_id", "s1"));

        let binding = descriptor.binding();
        assert_eq!(binding.event, EventFilter::Update);
        assert_eq!(binding.schema, "public");
        assert_eq!(binding.filter.as_deref(), Some("student_id=eq.s1"));
    }

    #[test]
    fn test_set_rejects_duplicate_keys() {
        let result = SubscriptionSet::new(vec![
            SubscriptionDescriptor::new("a", "workouts", noop),
            SubscriptionDescriptor::new("a", "feedbacks", noop),
        ]);
        assert!(matches!(result, Err(RealtimeError::DuplicateKey(k)) if k == "a"));
    }

    #[test]
    fn test_set_rejects_missing_table() {
        let result = SubscriptionSet::new(vec![SubscriptionDescriptor::new("a", " ", noop)]);
        assert!(matches!(result, Err(RealtimeError::MissingTable(_))));
    }

    #[test]
    fn test_set_matching_returns_all_keys() {
        let set = SubscriptionSet::new(vec![
            SubscriptionDescriptor::new("any", "workouts", noop),
            SubscriptionDescriptor::new("inserts", "workouts", noop).with_event(EventFilter::Insert),
            SubscriptionDescriptor::new("goals", "user_goals", noop),
        ])
        .unwrap();

        let keys = set.matching(&ChangePayload::insert("workouts", json!({})));
        assert_eq!(keys, vec![SubscriptionKey::new("any"), SubscriptionKey::new("inserts")]);
        assert_eq!(set.bindings().len(), 3);
    }
}
