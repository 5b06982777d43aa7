//! Scavenger sweep: periodic background cleanup of zombie agent records and
//! TTL'd list entries.
//!
//! Adapted from the teacher's `spawn_retention_task` — a `tokio::spawn`
//! loop on a fixed interval — but against the single shared `Store` handle
//! rather than opening a second sqlite connection, since this service has
//! no connection pool to avoid contending with.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::registry::AgentRegistry;
use crate::store::Store;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const INITIAL_DELAY: Duration = Duration::from_secs(30);

pub fn spawn_scavenger(store: Arc<Store>, registry: Arc<AgentRegistry>) {
    tokio::spawn(async move {
        tokio::time::sleep(INITIAL_DELAY).await;
        loop {
            run_sweep(&store, &registry);
            tokio::time::sleep(SWEEP_INTERVAL).await;
        }
    });
}

fn run_sweep(store: &Store, registry: &AgentRegistry) {
    let pruned_agents = registry.scavenge_stale().unwrap_or_else(|e| {
        eprintln!("scavenger: agent sweep failed: {e:?}");
        0
    });
    let pruned_lists = store.prune_expired_lists(Utc::now()).unwrap_or_else(|e| {
        eprintln!("scavenger: list TTL sweep failed: {e:?}");
        0
    });
    if pruned_agents > 0 || pruned_lists > 0 {
        eprintln!("scavenger: pruned {pruned_agents} stale agents, {pruned_lists} expired list entries");
    }
}
