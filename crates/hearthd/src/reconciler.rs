//! Periodic location reconciliation.
//!
//! Each tick mirrors live container state into the location rows and
//! refreshes this node's `last_seen` so peers keep it as a placement target.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use hearth_orchestrator::{GameServerOrchestrator, ReconcileReport};
use hearth_state::{NodeInfo, StateStore, epoch_secs};

pub struct Reconciler {
    orchestrator: Arc<GameServerOrchestrator>,
    store: StateStore,
    node: NodeInfo,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        orchestrator: Arc<GameServerOrchestrator>,
        store: StateStore,
        node: NodeInfo,
        interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            store,
            node,
            interval,
        }
    }

    /// Run until the shutdown flag flips.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "reconciler started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    info!("reconciler shutting down");
                    break;
                }
            }
        }
    }

    /// One pass. Failures are logged and retried on the next tick.
    pub async fn tick(&mut self) -> Option<ReconcileReport> {
        self.node.last_seen = epoch_secs();
        if let Err(e) = self.store.put_node(&self.node) {
            warn!(node = %self.node.id, error = %e, "failed to refresh node heartbeat");
        }

        match self.orchestrator.reconcile_locations().await {
            Ok(report) => {
                debug!(
                    seen = report.seen,
                    updated = report.updated,
                    adopted = report.adopted,
                    removed = report.removed,
                    orphans = report.orphans,
                    "reconcile pass complete"
                );
                Some(report)
            }
            Err(e) => {
                warn!(error = %e, "reconcile pass failed");
                None
            }
        }
    }
}
