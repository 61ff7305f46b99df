//! Loads an initial entity set into a [`MemoryStore`].
//!
//! ```json
//! { "entities": [
//!     { "id": "svc-db", "type": "Service", "fields": { "Leader": "" } },
//!     { "id": "db-1", "type": "Container",
//!       "fields": { "ContainerName": "db-1", "ServiceReference": "svc-db" } }
//! ] }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use super::{MemoryStore, Value};

#[derive(Debug, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub entities: Vec<SeedEntity>,
}

#[derive(Debug, Deserialize)]
pub struct SeedEntity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl Seed {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid seed file {}", path.display()))
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Inserts every entity into `store`, returning how many were loaded.
    pub fn apply(self, store: &MemoryStore) -> anyhow::Result<usize> {
        let count = self.entities.len();
        for entity in self.entities {
            store.insert_entity(&entity.id, &entity.entity_type);
            for (field, raw) in entity.fields {
                let value = match raw {
                    serde_json::Value::String(s) => Value::String(s),
                    serde_json::Value::Bool(b) => Value::Bool(b),
                    serde_json::Value::Number(n) => Value::Float(n.as_f64().unwrap_or_default()),
                    other => anyhow::bail!(
                        "Unsupported value {} for {}.{}",
                        other,
                        entity.id,
                        field
                    ),
                };
                store.set(&entity.id, &field, value)?;
            }
        }
        Ok(count)
    }
}
