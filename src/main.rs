//! Steward daemon entry point.

use std::sync::Arc;

use anyhow::Context;
use log::{error, info};
use tokio::signal;
use tokio::time::{interval, MissedTickBehavior};

mod availability;
mod config;
mod error;
mod lease;
mod poller;
mod reconcile;
mod restart;
mod runtime;
mod scheduler;
mod store;
mod types;

use config::Config;
use runtime::DockerRuntime;
use scheduler::Scheduler;
use store::seed::Seed;
use store::MemoryStore;
use types::LeaderGate;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting steward with config: {:?}", cfg);

    // Entity store
    let store = Arc::new(MemoryStore::new());
    if let Some(path) = &cfg.seed_file {
        let loaded = Seed::from_file(path)?.apply(&store)?;
        info!("Loaded {} entities from {}", loaded, path.display());
    }

    // Container Runtime (Docker)
    let runtime = DockerRuntime::connect().context("Failed to create Docker client")?;

    let mut scheduler = Scheduler::new(store.clone(), Arc::new(runtime), LeaderGate::new(), &cfg);
    scheduler.start();
    // Standalone: this instance is the only candidate.
    scheduler.became_leader().await;

    let mut ticker = interval(cfg.tick());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            res = &mut shutdown => {
                match res {
                    Ok(()) => info!("Received Ctrl+C, shutting down..."),
                    Err(err) => error!("Unable to listen for shutdown signal: {}", err),
                }
                break;
            }
            _ = ticker.tick() => {
                scheduler.tick().await;
            }
        }
    }

    // Graceful Shutdown
    if scheduler.is_leader() {
        scheduler.lost_leadership().await;
    }
    scheduler.stop().await;

    info!("Shutdown complete ({} store writes applied).", store.applied_writes());
    Ok(())
}
