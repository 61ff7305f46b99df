//! In-process store.
//!
//! Backs the daemon when no remote store is wired in, and serves as the
//! store double in tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use tokio::sync::mpsc;

use super::{
    Batch, FieldRead, Notification, NotificationToken, Store, Subscription, Value, WriteMode,
};
use crate::error::StoreError;

#[derive(Debug)]
struct Entity {
    entity_type: String,
    fields: BTreeMap<String, FieldRead>,
}

struct Subscriber {
    subscription: Subscription,
    tx: mpsc::UnboundedSender<Notification>,
}

#[derive(Default)]
struct Inner {
    entities: BTreeMap<String, Entity>,
    subscribers: HashMap<u64, Subscriber>,
    next_token: u64,
    applied_writes: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave an entity half-written.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Creates an entity, keeping its fields if it already exists.
    pub fn insert_entity(&self, entity_id: &str, entity_type: &str) {
        self.lock()
            .entities
            .entry(entity_id.to_string())
            .or_insert_with(|| Entity {
                entity_type: entity_type.to_string(),
                fields: BTreeMap::new(),
            });
    }

    /// Sets a field directly, without notifying subscribers or counting
    /// as an applied write.
    pub fn set(&self, entity_id: &str, field: &str, value: impl Into<Value>) -> Result<(), StoreError> {
        self.set_at(entity_id, field, value, Utc::now())
    }

    /// Like [`set`](Self::set), with an explicit write time.
    pub fn set_at(
        &self,
        entity_id: &str,
        field: &str,
        value: impl Into<Value>,
        write_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let entity = inner
            .entities
            .get_mut(entity_id)
            .ok_or_else(|| StoreError::EntityNotFound(entity_id.to_string()))?;
        entity.fields.insert(
            field.to_string(),
            FieldRead {
                value: value.into(),
                write_time,
            },
        );
        Ok(())
    }

    /// Number of writes that changed the store since creation.
    pub fn applied_writes(&self) -> u64 {
        self.lock().applied_writes
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_entities(&self, entity_type: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lock()
            .entities
            .iter()
            .filter(|(_, e)| e.entity_type == entity_type)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn read_field(&self, entity_id: &str, field: &str) -> Result<FieldRead, StoreError> {
        let inner = self.lock();
        let entity = inner
            .entities
            .get(entity_id)
            .ok_or_else(|| StoreError::EntityNotFound(entity_id.to_string()))?;
        entity
            .fields
            .get(field)
            .cloned()
            .ok_or_else(|| StoreError::field_not_found(entity_id, field))
    }

    async fn commit(&self, batch: Batch) -> Result<usize, StoreError> {
        let writes = batch.into_writes();
        let mut inner = self.lock();

        if let Some(missing) = writes
            .iter()
            .find(|w| !inner.entities.contains_key(&w.entity_id))
        {
            return Err(StoreError::EntityNotFound(missing.entity_id.clone()));
        }

        let now = Utc::now();
        let mut applied = 0;
        let mut outbox = Vec::new();

        for write in writes {
            let Some(entity) = inner.entities.get_mut(&write.entity_id) else {
                continue;
            };
            if write.mode == WriteMode::IfChanged
                && entity.fields.get(&write.field).map(|f| &f.value) == Some(&write.value)
            {
                continue;
            }
            entity.fields.insert(
                write.field.clone(),
                FieldRead {
                    value: write.value.clone(),
                    write_time: now,
                },
            );
            applied += 1;

            let entity_type = entity.entity_type.clone();
            for subscriber in inner.subscribers.values() {
                let sub = &subscriber.subscription;
                if sub.entity_type != entity_type || sub.field != write.field {
                    continue;
                }
                let entity = &inner.entities[&write.entity_id];
                let context = sub
                    .context_fields
                    .iter()
                    .map(|f| {
                        entity
                            .fields
                            .get(f)
                            .map(|r| r.value.clone())
                            .unwrap_or_else(|| Value::String(String::new()))
                    })
                    .collect();
                outbox.push((
                    subscriber.tx.clone(),
                    Notification {
                        entity_id: write.entity_id.clone(),
                        field: write.field.clone(),
                        value: write.value.clone(),
                        context,
                    },
                ));
            }
        }

        inner.applied_writes += applied as u64;
        drop(inner);

        for (tx, notification) in outbox {
            // A receiver dropped without unsubscribing is not an error.
            let _ = tx.send(notification);
        }
        Ok(applied)
    }

    async fn subscribe(
        &self,
        subscription: Subscription,
    ) -> Result<(NotificationToken, mpsc::UnboundedReceiver<Notification>), StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        inner.next_token += 1;
        let token = inner.next_token;
        debug!(
            "Subscribed token {} to {}.{}",
            token, subscription.entity_type, subscription.field
        );
        inner
            .subscribers
            .insert(token, Subscriber { subscription, tx });
        Ok((NotificationToken(token), rx))
    }

    async fn unsubscribe(&self, token: NotificationToken) -> Result<(), StoreError> {
        self.lock()
            .subscribers
            .remove(&token.0)
            .map(|_| ())
            .ok_or(StoreError::UnknownToken(token.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::read_string;

    fn store_with_container() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_entity("c1", "Container");
        store.set("c1", "ContainerName", "web-1").unwrap();
        store.set("c1", "ContainerId", "abc123").unwrap();
        store
    }

    #[tokio::test]
    async fn if_changed_skips_equal_values() {
        let store = store_with_container();
        assert!(store
            .write_field("c1", "ContainerState", "running".into(), WriteMode::IfChanged)
            .await
            .unwrap());
        assert!(!store
            .write_field("c1", "ContainerState", "running".into(), WriteMode::IfChanged)
            .await
            .unwrap());
        assert!(store
            .write_field("c1", "ContainerState", "running".into(), WriteMode::Always)
            .await
            .unwrap());
        assert_eq!(store.applied_writes(), 2);
    }

    #[tokio::test]
    async fn commit_rejects_unknown_entity_without_partial_writes() {
        let store = store_with_container();
        let mut batch = Batch::new();
        batch
            .write("c1", "ContainerState", "running", WriteMode::IfChanged)
            .write("missing", "ContainerState", "running", WriteMode::IfChanged);

        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::EntityNotFound(id) if id == "missing"));
        assert_eq!(read_string(&store, "c1", "ContainerState").await.unwrap(), "");
        assert_eq!(store.applied_writes(), 0);
    }

    #[tokio::test]
    async fn notifications_carry_context_fields() {
        let store = store_with_container();
        let (token, mut rx) = store
            .subscribe(Subscription {
                entity_type: "Container".into(),
                field: "ResetTrigger".into(),
                context_fields: vec!["ContainerName".into(), "ContainerId".into()],
            })
            .await
            .unwrap();

        store
            .write_field("c1", "ResetTrigger", Value::Trigger, WriteMode::Always)
            .await
            .unwrap();

        let n = rx.recv().await.unwrap();
        assert_eq!(n.entity_id, "c1");
        assert_eq!(n.value, Value::Trigger);
        assert_eq!(n.context_str(0), "web-1");
        assert_eq!(n.context_str(1), "abc123");

        store.unsubscribe(token).await.unwrap();
        assert!(rx.recv().await.is_none());
        assert!(matches!(
            store.unsubscribe(token).await,
            Err(StoreError::UnknownToken(_))
        ));
    }

    #[tokio::test]
    async fn unchanged_write_does_not_notify() {
        let store = store_with_container();
        let (_token, mut rx) = store
            .subscribe(Subscription {
                entity_type: "Container".into(),
                field: "ContainerName".into(),
                context_fields: vec![],
            })
            .await
            .unwrap();

        store
            .write_field("c1", "ContainerName", "web-1".into(), WriteMode::IfChanged)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn never_written_field_reads_as_not_found() {
        let store = store_with_container();
        let err = store.read_field("c1", "IPAddress").await.unwrap_err();
        assert!(err.is_field_not_found());
        assert_eq!(read_string(&store, "c1", "IPAddress").await.unwrap(), "");
        assert!(read_string(&store, "nope", "IPAddress").await.is_err());
    }
}
