//! Lease monitor.
//!
//! A service's `HeartbeatTrigger` is rewritten by its live leader.  When
//! the last write is older than the lease timeout, the leader and
//! candidate claims are cleared so a new election can start.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::error::StoreError;
use crate::store::{Batch, Store, WriteMode};
use crate::types::{field, SERVICE_TYPE};

pub struct LeaseMonitor {
    store: Arc<dyn Store>,
    lease_timeout: Duration,
}

impl LeaseMonitor {
    pub fn new(store: Arc<dyn Store>, lease_timeout: Duration) -> Self {
        Self {
            store,
            lease_timeout,
        }
    }

    /// Clears `Leader` and `Candidates` on every service whose heartbeat
    /// is older than the lease.  Returns the number of stale services.
    pub async fn expire_stale_leases(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut batch = Batch::new();
        let mut stale = 0;

        for service in self.store.find_entities(SERVICE_TYPE).await? {
            let last_beat = match self.store.read_field(&service, field::HEARTBEAT_TRIGGER).await {
                Ok(read) => Some(read.write_time),
                Err(e) if e.is_field_not_found() => None,
                Err(e) => {
                    warn!("Skipping lease check of service {}: {}", service, e);
                    continue;
                }
            };
            if !self.is_expired(last_beat, now) {
                continue;
            }

            stale += 1;
            batch
                .write(&service, field::LEADER, "", WriteMode::IfChanged)
                .write(&service, field::CANDIDATES, "", WriteMode::IfChanged);
        }

        if !batch.is_empty() {
            let cleared = self.store.commit(batch).await?;
            if cleared > 0 {
                info!("Expired leases on {} services ({} fields cleared)", stale, cleared);
            }
        }
        Ok(stale)
    }

    /// A service that never wrote a heartbeat holds no valid lease.
    fn is_expired(&self, last_beat: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_beat {
            // Negative elapsed time (heartbeat from the future) fails to_std.
            Some(at) => (now - at)
                .to_std()
                .map(|elapsed| elapsed > self.lease_timeout)
                .unwrap_or(false),
            None => true,
        }
    }
}
