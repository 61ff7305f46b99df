//! In-memory runtime for tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{ContainerDetails, ContainerRuntime, ContainerSummary, ResourceSample};
use crate::error::RuntimeError;

#[derive(Default)]
pub struct FakeRuntime {
    pub containers: Mutex<Vec<ContainerSummary>>,
    pub details: Mutex<HashMap<String, ContainerDetails>>,
    pub samples: Mutex<HashMap<String, ResourceSample>>,
    pub fail_list: Mutex<bool>,
    pub fail_restart: Mutex<HashSet<String>>,
    pub restarts: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, summary: ContainerSummary, details: ContainerDetails, sample: Option<ResourceSample>) {
        let id = summary.id.clone();
        self.containers.lock().unwrap().push(summary);
        self.details.lock().unwrap().insert(id.clone(), details);
        if let Some(sample) = sample {
            self.samples.lock().unwrap().insert(id, sample);
        }
    }

    pub fn restarts(&self) -> Vec<String> {
        self.restarts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        if *self.fail_list.lock().unwrap() {
            return Err(RuntimeError::ContainerNotFound("<list>".into()));
        }
        Ok(self.containers.lock().unwrap().clone())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetails, RuntimeError> {
        self.details
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::ContainerNotFound(id.to_string()))
    }

    async fn stats_once(&self, id: &str) -> Result<ResourceSample, RuntimeError> {
        self.samples
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::NoStatsSample(id.to_string()))
    }

    async fn restart(&self, id: &str, _stop_timeout: Duration) -> Result<(), RuntimeError> {
        if self.fail_restart.lock().unwrap().contains(id) {
            return Err(RuntimeError::ContainerNotFound(id.to_string()));
        }
        self.restarts.lock().unwrap().push(id.to_string());
        Ok(())
    }
}
