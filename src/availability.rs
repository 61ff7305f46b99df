//! Availability evaluator.
//!
//! Recomputes `IsLeader` and `IsAvailable` on every `Container` entity
//! from the `Leader` and `Candidates` of the service it references.  A
//! container counts as the leader, or as a candidate, when its container
//! ID contains the service's identifier as a substring.
//!
//! The same pass reports IP or MAC addresses claimed by more than one
//! container.  Entities are visited in name order, so the first claimant
//! of an address is deterministic.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::warn;

use crate::error::StoreError;
use crate::store::{read_string, Batch, Store, WriteMode};
use crate::types::{field, split_list, CONTAINER_TYPE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    Ip,
    Mac,
}

impl fmt::Display for AddressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressKind::Ip => f.write_str("IP"),
            AddressKind::Mac => f.write_str("MAC"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateAddress {
    pub kind: AddressKind,
    pub address: String,
    /// Container that claimed the address first.
    pub owner: String,
    pub duplicate: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AvailabilityReport {
    pub evaluated: usize,
    pub duplicates: Vec<DuplicateAddress>,
    pub applied: usize,
}

struct ContainerRow {
    id: String,
    name: String,
    container_id: String,
    ip_address: String,
    mac_address: String,
    service: String,
}

pub struct AvailabilityEvaluator {
    store: Arc<dyn Store>,
}

impl AvailabilityEvaluator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn evaluate(&self) -> Result<AvailabilityReport, StoreError> {
        let store = self.store.as_ref();
        let mut rows = Vec::new();
        for id in store.find_entities(CONTAINER_TYPE).await? {
            match read_row(store, &id).await {
                Ok(row) => rows.push(row),
                Err(e) => warn!("Skipping availability of container entity {}: {}", id, e),
            }
        }
        rows.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        let mut report = AvailabilityReport::default();
        let mut owners: HashMap<(AddressKind, String), String> = HashMap::new();
        let mut batch = Batch::new();

        for row in rows {
            for (kind, address) in [
                (AddressKind::Ip, &row.ip_address),
                (AddressKind::Mac, &row.mac_address),
            ] {
                if let Some(dup) = claim_address(&mut owners, kind, address, &row.name) {
                    warn!(
                        "Duplicate {} address '{}' found for containers '{}' and '{}'",
                        dup.kind, dup.address, dup.owner, dup.duplicate
                    );
                    report.duplicates.push(dup);
                }
            }

            let (leader, available) = if row.service.is_empty() {
                (false, false)
            } else {
                let flags = async {
                    let leader = read_string(store, &row.service, field::LEADER).await?;
                    let candidates = read_string(store, &row.service, field::CANDIDATES).await?;
                    Ok::<_, StoreError>((
                        is_leader(&row.container_id, &leader),
                        is_available(&row.container_id, &candidates),
                    ))
                };
                match flags.await {
                    Ok(flags) => flags,
                    Err(e) => {
                        warn!("Failed to read service {} of {}: {}", row.service, row.name, e);
                        continue;
                    }
                }
            };

            batch
                .write(&row.id, field::IS_LEADER, leader, WriteMode::IfChanged)
                .write(&row.id, field::IS_AVAILABLE, available, WriteMode::IfChanged);
            report.evaluated += 1;
        }

        if !batch.is_empty() {
            report.applied = store.commit(batch).await?;
        }
        Ok(report)
    }
}

async fn read_row(store: &dyn Store, id: &str) -> Result<ContainerRow, StoreError> {
    Ok(ContainerRow {
        id: id.to_string(),
        name: read_string(store, id, field::CONTAINER_NAME).await?,
        container_id: read_string(store, id, field::CONTAINER_ID).await?,
        ip_address: read_string(store, id, field::IP_ADDRESS).await?,
        mac_address: read_string(store, id, field::MAC_ADDRESS).await?,
        service: read_string(store, id, field::SERVICE_REFERENCE).await?,
    })
}

/// Records `name` as the owner of `address`, returning the clash when a
/// different container already owns it.  Empty addresses are ignored.
fn claim_address(
    owners: &mut HashMap<(AddressKind, String), String>,
    kind: AddressKind,
    address: &str,
    name: &str,
) -> Option<DuplicateAddress> {
    if address.is_empty() {
        return None;
    }
    match owners.get(&(kind, address.to_string())) {
        Some(owner) if owner != name => Some(DuplicateAddress {
            kind,
            address: address.to_string(),
            owner: owner.clone(),
            duplicate: name.to_string(),
        }),
        Some(_) => None,
        None => {
            owners.insert((kind, address.to_string()), name.to_string());
            None
        }
    }
}

/// Whether `container_id` contains the service's leader identifier.  An
/// empty leader matches nothing, so a cleared lease names no leader.
pub fn is_leader(container_id: &str, leader: &str) -> bool {
    !leader.is_empty() && container_id.contains(leader)
}

/// Whether `container_id` contains any of the comma separated candidates.
pub fn is_available(container_id: &str, candidates: &str) -> bool {
    split_list(candidates).any(|candidate| container_id.contains(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Value};
    use crate::types::SERVICE_TYPE;

    fn add_container(store: &MemoryStore, id: &str, name: &str, container_id: &str, ip: &str, mac: &str) {
        store.insert_entity(id, CONTAINER_TYPE);
        store.set(id, field::CONTAINER_NAME, name).unwrap();
        store.set(id, field::CONTAINER_ID, container_id).unwrap();
        store.set(id, field::IP_ADDRESS, ip).unwrap();
        store.set(id, field::MAC_ADDRESS, mac).unwrap();
    }

    async fn flag(store: &MemoryStore, id: &str, f: &str) -> Value {
        store.read_field(id, f).await.unwrap().value
    }

    #[test]
    fn leader_and_candidate_matching_is_substring_based() {
        assert!(is_leader("svc-7-abcdef", "svc-7"));
        assert!(!is_leader("svc-7-abcdef", "svc-9"));
        assert!(!is_leader("svc-7-abcdef", ""));
        assert!(is_available("svc-9-123", "svc-7,svc-9"));
        assert!(!is_available("svc-8-123", "svc-7,svc-9"));
        assert!(!is_available("svc-8-123", ""));
        assert!(!is_available("svc-8-123", ",,"));
    }

    #[tokio::test]
    async fn flags_follow_service_reference() {
        let store = Arc::new(MemoryStore::new());
        store.insert_entity("svc", SERVICE_TYPE);
        store.set("svc", field::LEADER, "svc-7").unwrap();
        store.set("svc", field::CANDIDATES, "svc-7,svc-9").unwrap();

        add_container(&store, "c7", "web-7", "svc-7-abcdef", "10.0.0.7", "aa:07");
        add_container(&store, "c9", "web-9", "svc-9-abcdef", "10.0.0.9", "aa:09");
        add_container(&store, "cx", "web-x", "svc-7-zzz", "10.0.0.10", "aa:10");
        store.set("c7", field::SERVICE_REFERENCE, "svc").unwrap();
        store.set("c9", field::SERVICE_REFERENCE, "svc").unwrap();
        store.set("cx", field::IS_LEADER, true).unwrap();

        let report = AvailabilityEvaluator::new(store.clone()).evaluate().await.unwrap();
        assert_eq!(report.evaluated, 3);
        assert!(report.duplicates.is_empty());

        assert_eq!(flag(&store, "c7", field::IS_LEADER).await, Value::Bool(true));
        assert_eq!(flag(&store, "c7", field::IS_AVAILABLE).await, Value::Bool(true));
        assert_eq!(flag(&store, "c9", field::IS_LEADER).await, Value::Bool(false));
        assert_eq!(flag(&store, "c9", field::IS_AVAILABLE).await, Value::Bool(true));
        // No service reference: both flags false, whatever the ID says.
        assert_eq!(flag(&store, "cx", field::IS_LEADER).await, Value::Bool(false));
        assert_eq!(flag(&store, "cx", field::IS_AVAILABLE).await, Value::Bool(false));
    }

    #[tokio::test]
    async fn empty_candidates_make_nothing_available() {
        let store = Arc::new(MemoryStore::new());
        store.insert_entity("svc", SERVICE_TYPE);
        store.set("svc", field::CANDIDATES, "").unwrap();
        add_container(&store, "c1", "web-1", "svc-1-abc", "10.0.0.1", "aa:01");
        store.set("c1", field::SERVICE_REFERENCE, "svc").unwrap();

        AvailabilityEvaluator::new(store.clone()).evaluate().await.unwrap();
        assert_eq!(flag(&store, "c1", field::IS_AVAILABLE).await, Value::Bool(false));
        assert_eq!(flag(&store, "c1", field::IS_LEADER).await, Value::Bool(false));
    }

    #[tokio::test]
    async fn duplicate_ip_is_reported_once_without_touching_fields() {
        let store = Arc::new(MemoryStore::new());
        add_container(&store, "c2", "web-2", "id-2", "10.0.0.5", "aa:02");
        add_container(&store, "c1", "web-1", "id-1", "10.0.0.5", "aa:01");

        let report = AvailabilityEvaluator::new(store.clone()).evaluate().await.unwrap();
        assert_eq!(
            report.duplicates,
            vec![DuplicateAddress {
                kind: AddressKind::Ip,
                address: "10.0.0.5".into(),
                owner: "web-1".into(),
                duplicate: "web-2".into(),
            }]
        );
        for id in ["c1", "c2"] {
            assert_eq!(flag(&store, id, field::IP_ADDRESS).await, Value::from("10.0.0.5"));
        }
        assert_eq!(flag(&store, "c1", field::MAC_ADDRESS).await, Value::from("aa:01"));
        assert_eq!(flag(&store, "c2", field::MAC_ADDRESS).await, Value::from("aa:02"));
    }

    #[tokio::test]
    async fn second_pass_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        add_container(&store, "c1", "web-1", "id-1", "10.0.0.1", "aa:01");
        let evaluator = AvailabilityEvaluator::new(store.clone());

        assert_eq!(evaluator.evaluate().await.unwrap().applied, 2);
        assert_eq!(evaluator.evaluate().await.unwrap().applied, 0);
    }
}
