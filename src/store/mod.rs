//! Entity/attribute store client.
//!
//! The store holds typed entities with individually addressable fields.
//! Every field remembers the time of its last write, and clients can
//! subscribe to write events on a field of an entity type.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::StoreError;

pub mod memory;
pub mod seed;

pub use memory::MemoryStore;

/// A field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    /// Signal value.  Only the write event is meaningful.
    Trigger,
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Renders the value as a string, empty for non-string values.
    pub fn into_string(self) -> String {
        match self {
            Value::String(s) => s,
            _ => String::new(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Timestamp(t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Always apply the write and notify subscribers.
    Always,
    /// Skip the write, and any notification, when the value is unchanged.
    IfChanged,
}

/// Result of a field read.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRead {
    pub value: Value,
    pub write_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldWrite {
    pub entity_id: String,
    pub field: String,
    pub value: Value,
    pub mode: WriteMode,
}

/// Writes collected for a single atomic commit.
#[derive(Debug, Default)]
pub struct Batch {
    writes: Vec<FieldWrite>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(
        &mut self,
        entity_id: &str,
        field: &str,
        value: impl Into<Value>,
        mode: WriteMode,
    ) -> &mut Self {
        self.writes.push(FieldWrite {
            entity_id: entity_id.to_string(),
            field: field.to_string(),
            value: value.into(),
            mode,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn into_writes(self) -> Vec<FieldWrite> {
        self.writes
    }
}

/// Which writes a subscriber wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub entity_type: String,
    pub field: String,
    /// Fields of the written entity whose values ride along in the
    /// notification, in this order.
    pub context_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub entity_id: String,
    pub field: String,
    /// The value just written.
    pub value: Value,
    pub context: Vec<Value>,
}

impl Notification {
    /// String value of the context field at `index`, or "".
    pub fn context_str(&self, index: usize) -> &str {
        self.context
            .get(index)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationToken(pub u64);

#[async_trait]
pub trait Store: Send + Sync {
    /// IDs of every entity of `entity_type`, sorted.
    async fn find_entities(&self, entity_type: &str) -> Result<Vec<String>, StoreError>;

    async fn read_field(&self, entity_id: &str, field: &str) -> Result<FieldRead, StoreError>;

    /// Applies every write of `batch` atomically, returning how many
    /// writes actually changed the store.
    async fn commit(&self, batch: Batch) -> Result<usize, StoreError>;

    async fn subscribe(
        &self,
        subscription: Subscription,
    ) -> Result<(NotificationToken, mpsc::UnboundedReceiver<Notification>), StoreError>;

    async fn unsubscribe(&self, token: NotificationToken) -> Result<(), StoreError>;

    /// Returns whether the write changed the store.
    async fn write_field(
        &self,
        entity_id: &str,
        field: &str,
        value: Value,
        mode: WriteMode,
    ) -> Result<bool, StoreError> {
        let mut batch = Batch::new();
        batch.write(entity_id, field, value, mode);
        Ok(self.commit(batch).await? > 0)
    }
}

/// Reads a string field, treating a never-written field as "".
pub async fn read_string(
    store: &dyn Store,
    entity_id: &str,
    field: &str,
) -> Result<String, StoreError> {
    match store.read_field(entity_id, field).await {
        Ok(read) => Ok(read.value.into_string()),
        Err(e) if e.is_field_not_found() => Ok(String::new()),
        Err(e) => Err(e),
    }
}
