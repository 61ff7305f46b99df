//! Leader-gated scheduler.
//!
//! The host calls [`Scheduler::tick`] repeatedly.  Each call does at most
//! one unit of work and never waits for work to become ready:
//!
//! 1. poll timer due: start a poll cycle on its own task, then run the
//!    availability pass;
//! 2. poll result queued: reconcile it into the store;
//! 3. lease timer due: expire stale service leases;
//! 4. otherwise nothing.
//!
//! Polling and reconciliation are therefore pipelined across ticks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::availability::AvailabilityEvaluator;
use crate::config::Config;
use crate::lease::LeaseMonitor;
use crate::poller::StatePoller;
use crate::reconcile::Reconciler;
use crate::restart::RestartTriggerHandler;
use crate::runtime::ContainerRuntime;
use crate::store::Store;
use crate::types::{LeaderGate, Snapshots};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Polled,
    Reconciled,
    LeasesChecked,
}

/// Periodic deadline checked without waiting.  Missed periods collapse
/// into a single firing.
#[derive(Debug)]
struct Timer {
    period: Duration,
    next: Instant,
}

impl Timer {
    fn armed(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now() + period,
        }
    }

    fn fired(&mut self) -> bool {
        let now = Instant::now();
        if now < self.next {
            return false;
        }
        self.next = now + self.period;
        true
    }
}

fn fired(timer: &mut Option<Timer>) -> bool {
    timer.as_mut().is_some_and(Timer::fired)
}

pub struct Scheduler {
    gate: LeaderGate,
    poller: Arc<StatePoller>,
    reconciler: Reconciler,
    availability: AvailabilityEvaluator,
    leases: LeaseMonitor,
    restarts: RestartTriggerHandler,
    poll_interval: Duration,
    lease_interval: Duration,
    poll_timer: Option<Timer>,
    lease_timer: Option<Timer>,
    results_tx: mpsc::Sender<Snapshots>,
    results_rx: mpsc::Receiver<Snapshots>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        runtime: Arc<dyn ContainerRuntime>,
        gate: LeaderGate,
        cfg: &Config,
    ) -> Self {
        let (results_tx, results_rx) = mpsc::channel(cfg.snapshot_queue_capacity);
        Self {
            poller: Arc::new(StatePoller::new(
                Arc::clone(&runtime),
                cfg.network_name.clone(),
            )),
            reconciler: Reconciler::new(Arc::clone(&store)),
            availability: AvailabilityEvaluator::new(Arc::clone(&store)),
            leases: LeaseMonitor::new(Arc::clone(&store), cfg.lease_timeout()),
            restarts: RestartTriggerHandler::new(
                store,
                runtime,
                gate.clone(),
                cfg.restart_grace(),
                cfg.restart_stop_timeout(),
            ),
            gate,
            poll_interval: cfg.poll_interval(),
            lease_interval: cfg.lease_check_interval(),
            poll_timer: None,
            lease_timer: None,
            results_tx,
            results_rx,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.gate.is_leader()
    }

    pub async fn became_leader(&mut self) {
        info!("Became leader");
        self.gate.set(true);
        if let Err(e) = self.restarts.subscribe().await {
            error!("Failed to subscribe to reset triggers: {}", e);
        }
    }

    /// Stops future work.  Poll cycles and restarts already dispatched
    /// run to completion.
    pub async fn lost_leadership(&mut self) {
        info!("Lost leadership");
        self.gate.set(false);
        self.restarts.unsubscribe().await;
    }

    pub fn start(&mut self) {
        debug!(
            "Arming timers: poll every {:?}, lease check every {:?}",
            self.poll_interval, self.lease_interval
        );
        self.poll_timer = Some(Timer::armed(self.poll_interval));
        self.lease_timer = Some(Timer::armed(self.lease_interval));
    }

    pub async fn stop(&mut self) {
        self.poll_timer = None;
        self.lease_timer = None;
        self.restarts.unsubscribe().await;
    }

    pub async fn tick(&mut self) -> TickOutcome {
        if !self.gate.is_leader() {
            return TickOutcome::Idle;
        }

        if fired(&mut self.poll_timer) {
            self.poller.spawn_cycle(self.results_tx.clone());
            match self.availability.evaluate().await {
                Ok(report) => debug!(
                    "Availability pass: {} containers, {} duplicate addresses, {} writes",
                    report.evaluated,
                    report.duplicates.len(),
                    report.applied
                ),
                Err(e) => error!("Availability pass failed: {}", e),
            }
            return TickOutcome::Polled;
        }

        if let Ok(snapshots) = self.results_rx.try_recv() {
            match self.reconciler.reconcile(&snapshots).await {
                Ok(report) => debug!(
                    "Reconciled {} snapshots: {} matched, {} transitions, {} resets, {} writes",
                    snapshots.len(),
                    report.matched,
                    report.transitions,
                    report.resets,
                    report.applied
                ),
                Err(e) => error!("Reconciliation failed: {}", e),
            }
            return TickOutcome::Reconciled;
        }

        if fired(&mut self.lease_timer) {
            if let Err(e) = self.leases.expire_stale_leases(Utc::now()).await {
                error!("Lease check failed: {}", e);
            }
            return TickOutcome::LeasesChecked;
        }

        TickOutcome::Idle
    }
}
