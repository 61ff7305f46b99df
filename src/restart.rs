//! Restart-trigger handler.
//!
//! Listens for `ResetTrigger` writes on `Container` entities.  Each write
//! seen while leader schedules a restart of that container after a grace
//! delay.  Scheduled restarts are detached tasks: unsubscribing, or
//! losing leadership, does not cancel a restart that is already waiting.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::error::StoreError;
use crate::runtime::ContainerRuntime;
use crate::store::{Notification, NotificationToken, Store, Subscription};
use crate::types::{field, LeaderGate, CONTAINER_TYPE};

/// Everything a listener needs to act on a notification.
#[derive(Clone)]
struct Restarter {
    runtime: Arc<dyn ContainerRuntime>,
    gate: LeaderGate,
    grace: Duration,
    stop_timeout: Duration,
}

impl Restarter {
    fn on_notification(&self, notification: Notification) {
        if !self.gate.is_leader() {
            return;
        }
        debug!("Received notification: {:?}", notification);
        if notification.field != field::RESET_TRIGGER {
            return;
        }

        let name = notification.context_str(0).to_string();
        let id = notification.context_str(1).to_string();
        if id.is_empty() {
            warn!(
                "Reset requested for entity {} without a container ID",
                notification.entity_id
            );
            return;
        }

        info!("Restart of container {} scheduled in {:?}", name, self.grace);
        let runtime = Arc::clone(&self.runtime);
        let (grace, stop_timeout) = (self.grace, self.stop_timeout);
        tokio::spawn(async move {
            sleep(grace).await;
            match runtime.restart(&id, stop_timeout).await {
                Ok(()) => info!("Container restarted: {}", name),
                Err(e) => error!("Failed to restart container {}: {}", name, e),
            }
        });
    }
}

pub struct RestartTriggerHandler {
    store: Arc<dyn Store>,
    restarter: Restarter,
    active: Option<(NotificationToken, JoinHandle<()>)>,
}

impl RestartTriggerHandler {
    pub fn new(
        store: Arc<dyn Store>,
        runtime: Arc<dyn ContainerRuntime>,
        gate: LeaderGate,
        grace: Duration,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            store,
            restarter: Restarter {
                runtime,
                gate,
                grace,
                stop_timeout,
            },
            active: None,
        }
    }

    /// Subscribes to `ResetTrigger` writes.  Subscribing twice is a no-op.
    pub async fn subscribe(&mut self) -> Result<(), StoreError> {
        if self.active.is_some() {
            return Ok(());
        }

        let (token, mut notifications) = self
            .store
            .subscribe(Subscription {
                entity_type: CONTAINER_TYPE.to_string(),
                field: field::RESET_TRIGGER.to_string(),
                context_fields: vec![
                    field::CONTAINER_NAME.to_string(),
                    field::CONTAINER_ID.to_string(),
                ],
            })
            .await?;

        let restarter = self.restarter.clone();
        let listener = tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                restarter.on_notification(notification);
            }
            debug!("Reset trigger subscription closed");
        });

        info!("Subscribed to {} writes", field::RESET_TRIGGER);
        self.active = Some((token, listener));
        Ok(())
    }

    /// Drops the subscription.  Restarts already scheduled still run.
    pub async fn unsubscribe(&mut self) {
        let Some((token, listener)) = self.active.take() else {
            return;
        };
        listener.abort();
        match self.store.unsubscribe(token).await {
            Ok(()) => info!("Unsubscribed from {} writes", field::RESET_TRIGGER),
            Err(e) => warn!("Failed to unsubscribe token {:?}: {}", token, e),
        }
    }
}
