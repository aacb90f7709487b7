//! Change-feed types and the Phoenix wire message

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Kind of row change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

/// Which change kinds a binding listens to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventMask {
    All,
    Only(Vec<ChangeKind>),
}

impl EventMask {
    pub fn matches(&self, kind: ChangeKind) -> bool {
        match self {
            EventMask::All => true,
            EventMask::Only(kinds) => kinds.contains(&kind),
        }
    }

    /// Event names as the change feed expects them
    fn wire_events(&self) -> Vec<&'static str> {
        match self {
            EventMask::All => vec!["*"],
            EventMask::Only(kinds) => kinds.iter().map(ChangeKind::as_str).collect(),
        }
    }
}

/// Interest in changes of one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableBinding {
    pub schema: String,
    pub table: String,
    pub events: EventMask,
}

impl TableBinding {
    /// Every change of `table` in the `public` schema
    pub fn all(table: &str) -> Self {
        Self {
            schema: "public".to_string(),
            table: table.to_string(),
            events: EventMask::All,
        }
    }

    pub fn with_events(mut self, events: EventMask) -> Self {
        self.events = events;
        self
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_string();
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        self.schema == event.schema && self.table == event.table && self.events.matches(event.kind)
    }
}

/// A named channel with one or more table bindings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: String,
    pub bindings: Vec<TableBinding>,
}

impl ChannelSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            bindings: Vec::new(),
        }
    }

    /// Add a binding
    pub fn on(mut self, binding: TableBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn topic(&self) -> String {
        format!("realtime:{}", self.name)
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        self.bindings.iter().any(|b| b.matches(event))
    }

    /// The `phx_join` payload announcing the bindings
    pub(crate) fn join_payload(&self, access_token: Option<&str>) -> Value {
        let changes: Vec<Value> = self
            .bindings
            .iter()
            .flat_map(|binding| {
                binding.events.wire_events().into_iter().map(move |event| {
                    json!({
                        "event": event,
                        "schema": binding.schema,
                        "table": binding.table,
                    })
                })
            })
            .collect();

        let mut payload = json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": changes,
            }
        });
        if let Some(token) = access_token {
            payload["access_token"] = json!(token);
        }
        payload
    }
}

/// One row change delivered by the change feed
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub schema: String,
    pub table: String,
    pub kind: ChangeKind,
    pub record: Option<Value>,
    pub old_record: Option<Value>,
    pub commit_timestamp: Option<String>,
}

impl ChangeEvent {
    pub fn new(table: &str, kind: ChangeKind) -> Self {
        Self {
            schema: "public".to_string(),
            table: table.to_string(),
            kind,
            record: None,
            old_record: None,
            commit_timestamp: None,
        }
    }

    /// Reads the `data` object of a `postgres_changes` payload.
    pub(crate) fn from_payload(payload: &Value) -> Option<Self> {
        #[derive(Deserialize)]
        struct Data {
            schema: String,
            table: String,
            #[serde(rename = "type")]
            kind: ChangeKind,
            #[serde(default)]
            record: Option<Value>,
            #[serde(default)]
            old_record: Option<Value>,
            #[serde(default)]
            commit_timestamp: Option<String>,
        }

        let data: Data = serde_json::from_value(payload.get("data")?.clone()).ok()?;
        Some(Self {
            schema: data.schema,
            table: data.table,
            kind: data.kind,
            record: data.record,
            old_record: data.old_record,
            commit_timestamp: data.commit_timestamp,
        })
    }
}

/// Callback invoked for each matching change
pub type ChangeCallback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Handle returned by a subscription; pass it back to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
    pub id: u64,
    pub topic: String,
}

/// A full message sent or received over the socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub message_ref: Option<String>,
}

impl PhoenixMessage {
    pub fn new(topic: &str, event: &str, payload: Value, message_ref: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            message_ref: Some(message_ref),
        }
    }
}
