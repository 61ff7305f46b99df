//! Reconciliation writer.
//!
//! Pushes a poll cycle's snapshots into the matching `Container`
//! entities as a single batch.  Every mirrored field is written
//! if-changed; a lifecycle state transition also records the start time
//! and fans a `ResetTrigger` out to the entities listed in
//! `RestartContainers`.  A new container ID under the same name counts as
//! a transition even when the state reads the same.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::error::StoreError;
use crate::store::{read_string, Batch, Store, Value, WriteMode};
use crate::types::{field, split_list, ContainerSnapshot, Snapshots, CONTAINER_TYPE};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Entities that matched a snapshot by name.
    pub matched: usize,
    pub transitions: usize,
    pub resets: usize,
    /// Writes that changed the store.
    pub applied: usize,
}

pub struct Reconciler {
    store: Arc<dyn Store>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn reconcile(&self, snapshots: &Snapshots) -> Result<ReconcileReport, StoreError> {
        let store = self.store.as_ref();
        let entity_ids: BTreeSet<String> = store
            .find_entities(CONTAINER_TYPE)
            .await?
            .into_iter()
            .collect();

        let mut by_name: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for id in &entity_ids {
            match read_string(store, id, field::CONTAINER_NAME).await {
                Ok(name) => by_name.entry(name).or_default().push(id.clone()),
                Err(e) => warn!("Skipping container entity {}: {}", id, e),
            }
        }

        let mut report = ReconcileReport::default();
        let mut batch = Batch::new();

        for (name, snapshot) in snapshots {
            let Some(ids) = by_name.get(name) else {
                debug!("No container entity named {}", name);
                continue;
            };

            for id in ids {
                let previous_state = match read_string(store, id, field::CONTAINER_STATE).await {
                    Ok(state) => state,
                    Err(e) => {
                        warn!("Skipping container entity {}: {}", id, e);
                        continue;
                    }
                };
                let previous_id = match read_string(store, id, field::CONTAINER_ID).await {
                    Ok(container_id) => container_id,
                    Err(e) => {
                        warn!("Skipping container entity {}: {}", id, e);
                        continue;
                    }
                };
                report.matched += 1;
                mirror_fields(&mut batch, id, snapshot);

                let replaced = !previous_id.is_empty() && previous_id != snapshot.id;
                if previous_state == snapshot.state && !replaced {
                    continue;
                }
                report.transitions += 1;
                if replaced {
                    info!(
                        "Container {} replaced: '{}' -> '{}'",
                        name, previous_id, snapshot.id
                    );
                } else {
                    info!(
                        "Container {} changed state: '{}' -> '{}'",
                        name, previous_state, snapshot.state
                    );
                }
                if let Some(started) = snapshot.started {
                    batch.write(id, field::START_TIME, started, WriteMode::IfChanged);
                }

                let dependents = read_string(store, id, field::RESTART_CONTAINERS)
                    .await
                    .unwrap_or_else(|e| {
                        warn!("Failed to read restart list of {}: {}", id, e);
                        String::new()
                    });
                for target in split_list(&dependents) {
                    let targets = resolve_target(target, &entity_ids, &by_name);
                    if targets.is_empty() {
                        warn!("Container {} lists unknown dependent '{}'", name, target);
                    }
                    for target_id in targets {
                        batch.write(target_id, field::RESET_TRIGGER, Value::Trigger, WriteMode::Always);
                        report.resets += 1;
                    }
                }
            }
        }

        if !batch.is_empty() {
            report.applied = store.commit(batch).await?;
        }
        Ok(report)
    }
}

fn mirror_fields(batch: &mut Batch, id: &str, snapshot: &ContainerSnapshot) {
    let mode = WriteMode::IfChanged;
    batch
        .write(id, field::CONTAINER_ID, snapshot.id.as_str(), mode)
        .write(id, field::CONTAINER_IMAGE, snapshot.image.as_str(), mode)
        .write(id, field::CONTAINER_STATE, snapshot.state.as_str(), mode)
        .write(id, field::CONTAINER_STATUS, snapshot.status.as_str(), mode)
        .write(id, field::CREATE_TIME, snapshot.created, mode)
        .write(id, field::CPU_USAGE, snapshot.cpu_percent, mode)
        .write(id, field::MEMORY_USAGE, snapshot.memory_mib, mode)
        .write(id, field::IP_ADDRESS, snapshot.ip_address.as_str(), mode)
        .write(id, field::MAC_ADDRESS, snapshot.mac_address.as_str(), mode);
}

/// A dependent is named by entity ID, or failing that by container name.
fn resolve_target<'a>(
    target: &'a str,
    entity_ids: &'a BTreeSet<String>,
    by_name: &'a BTreeMap<String, Vec<String>>,
) -> Vec<&'a str> {
    if let Some(id) = entity_ids.get(target) {
        return vec![id.as_str()];
    }
    by_name
        .get(target)
        .map(|ids| ids.iter().map(String::as_str).collect())
        .unwrap_or_default()
}
