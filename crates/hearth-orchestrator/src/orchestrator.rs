//! GameServerOrchestrator: drives game-server containers through their
//! lifecycle and keeps the persisted record and location rows in step with
//! what the container runtime actually reports.
//!
//! Three sources of truth can disagree: the runtime, the `GameServer`
//! record, and the location table. Every operation re-inspects the container
//! before acting on a recorded ID, repairs drift by recreating the
//! container (its data directory survives), and is the only writer of
//! `status`, `container_id` and `container_name`.
//!
//! Each public operation holds the game server's lock for its whole run.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use hearth_engine::{
    BindMount, ContainerRuntime, ContainerSpec, EngineResult, LogOptions, LogStream, PortBinding,
    Protocol, RestartPolicy,
};
use hearth_placement::{NodeSelector, cpu_shares, game_server_requirements};
use hearth_state::{
    GameServer, GameServerLocation, GameServerStatus, GameServerStore, LocationStatus,
    LocationTracker, epoch_secs,
};

use crate::config::{NodeConfig, OrchestratorConfig};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::forward::{ForwardError, ForwardRequest, ForwardedOp, GameServerView, NodeForwarder};
use crate::lock::KeyedLocks;
use crate::provision::{
    GAME_SERVER_ID_LABEL, MANAGED_LABEL, container_name, ensure_image, ensure_network,
    ensure_volume, managed_labels,
};

/// Injected so game servers listen on every interface unless told otherwise.
const BIND_ALL_DEFAULTS: [&str; 3] = ["SERVER_IP", "HOST", "BIND_ADDRESS"];

const LOG_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether a create may be placed on another node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Routing {
    Place,
    Local,
}

/// Outcome of one [`GameServerOrchestrator::reconcile_locations`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Managed containers found on this node.
    pub seen: usize,
    /// Rows whose status changed to match the container.
    pub updated: usize,
    /// Rows written for containers that had none.
    pub adopted: usize,
    /// Rows deleted because their container is gone.
    pub removed: usize,
    /// Managed containers with no game server record.
    pub orphans: usize,
}

pub struct GameServerOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn GameServerStore>,
    locations: Arc<dyn LocationTracker>,
    selector: Arc<dyn NodeSelector>,
    forwarder: Option<Arc<dyn NodeForwarder>>,
    node: NodeConfig,
    config: OrchestratorConfig,
    locks: KeyedLocks,
}

impl GameServerOrchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn GameServerStore>,
        locations: Arc<dyn LocationTracker>,
        selector: Arc<dyn NodeSelector>,
        forwarder: Option<Arc<dyn NodeForwarder>>,
        node: NodeConfig,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            runtime,
            store,
            locations,
            selector,
            forwarder,
            node,
            config,
            locks: KeyedLocks::new(),
        }
    }

    pub fn node(&self) -> &NodeConfig {
        &self.node
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // ── Public operations ─────────────────────────────────────────

    /// Create the container for a game server, on the node placement picks.
    ///
    /// The record is persisted as given, then ends in `Created` with its
    /// container recorded.
    pub async fn create_game_server(&self, gs: &GameServer) -> OrchestratorResult<GameServer> {
        let _guard = self.locks.lock(&gs.id).await;
        self.store.put_game_server(gs)?;
        self.create_locked(gs, Routing::Place).await
    }

    /// Start a game server, creating or recreating its container as needed.
    pub async fn start_game_server(&self, id: &str) -> OrchestratorResult<GameServer> {
        let _guard = self.locks.lock(id).await;
        let gs = self.load(id)?;
        if let Some((fwd, node_id)) = self.remote_owner(id)? {
            return self.forward(fwd.as_ref(), &node_id, ForwardedOp::Start, &gs).await;
        }
        self.start_locked(gs).await
    }

    /// Stop a game server. Stopping a stopped server succeeds.
    pub async fn stop_game_server(&self, id: &str) -> OrchestratorResult<GameServer> {
        let _guard = self.locks.lock(id).await;
        let gs = self.load(id)?;
        if let Some((fwd, node_id)) = self.remote_owner(id)? {
            return self.forward(fwd.as_ref(), &node_id, ForwardedOp::Stop, &gs).await;
        }
        self.stop_locked(&gs).await
    }

    pub async fn restart_game_server(&self, id: &str) -> OrchestratorResult<GameServer> {
        let _guard = self.locks.lock(id).await;
        let gs = self.load(id)?;
        if let Some((fwd, node_id)) = self.remote_owner(id)? {
            return self.forward(fwd.as_ref(), &node_id, ForwardedOp::Restart, &gs).await;
        }
        self.restart_locked(gs).await
    }

    /// Remove a game server's container. The record itself is left to the
    /// owning layer.
    pub async fn delete_game_server(&self, id: &str) -> OrchestratorResult<()> {
        let _guard = self.locks.lock(id).await;
        let gs = self.load(id)?;
        if let Some((fwd, node_id)) = self.remote_owner(id)? {
            self.forward(fwd.as_ref(), &node_id, ForwardedOp::Delete, &gs).await?;
            return Ok(());
        }
        self.delete_locked(&gs).await
    }

    pub async fn game_server_logs(
        &self,
        id: &str,
        options: &LogOptions,
    ) -> OrchestratorResult<LogStream> {
        let container_id = {
            let _guard = self.locks.lock(id).await;
            let gs = self.load(id)?;
            self.ensure_local(&gs)?;
            gs.container_id
                .ok_or_else(|| OrchestratorError::NoContainer(id.to_string()))?
        };
        Ok(self.runtime.container_logs(&container_id, options).await?)
    }

    /// Write one line to the game server's console.
    pub async fn send_command(&self, id: &str, command: &str) -> OrchestratorResult<()> {
        let _guard = self.locks.lock(id).await;
        let gs = self.load(id)?;
        self.ensure_local(&gs)?;
        let container_id = gs
            .container_id
            .ok_or_else(|| OrchestratorError::NoContainer(id.to_string()))?;

        match self.runtime.inspect_container(&container_id).await {
            Ok(info) if info.running => {}
            Ok(_) => return Err(OrchestratorError::NotRunning(id.to_string())),
            Err(e) if e.is_not_found() => return Err(OrchestratorError::NotRunning(id.to_string())),
            Err(e) => return Err(e.into()),
        }

        let runtime = self.runtime.clone();
        let line = format!("{command}\n");
        self.config
            .attach
            .run("console attach", async move {
                let mut stdin = runtime.attach_stdin(&container_id).await?;
                stdin.write_all(line.as_bytes()).await?;
                if let Err(e) = stdin.flush().await {
                    debug!(error = %e, "stdin flush failed");
                }
                Ok::<(), OrchestratorError>(())
            })
            .await?;
        debug!(game_server_id = %id, %command, "console command sent");
        Ok(())
    }

    /// The game server with its current location row.
    pub async fn get_game_server(&self, id: &str) -> OrchestratorResult<GameServerView> {
        self.view(id)
    }

    /// Run a call forwarded from another node on this node.
    pub async fn handle_forwarded(&self, req: ForwardRequest) -> OrchestratorResult<GameServerView> {
        let gs = req.game_server;
        let _guard = self.locks.lock(&gs.id).await;
        info!(game_server_id = %gs.id, op = %req.op, "handling forwarded call");
        self.store.put_game_server(&gs)?;
        match req.op {
            ForwardedOp::Create => {
                self.create_locked(&gs, Routing::Local).await?;
            }
            ForwardedOp::Start => {
                self.start_locked(gs.clone()).await?;
            }
            ForwardedOp::Stop => {
                self.stop_locked(&gs).await?;
            }
            ForwardedOp::Restart => {
                self.restart_locked(gs.clone()).await?;
            }
            ForwardedOp::Delete => self.delete_locked(&gs).await?,
        }
        self.view(&gs.id)
    }

    /// Mirror live container state into this node's location rows.
    ///
    /// Never touches `GameServer.status`.
    pub async fn reconcile_locations(&self) -> OrchestratorResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let containers = self.runtime.list_containers(&managed_labels(), true).await?;
        let mut live = HashSet::new();

        for summary in &containers {
            let Some(gs_id) = summary.labels.get(GAME_SERVER_ID_LABEL) else {
                continue;
            };
            report.seen += 1;
            live.insert(summary.id.clone());

            let _guard = self.locks.lock(gs_id).await;
            // Re-inspect under the lock; the listing may be stale.
            let running = match self.runtime.inspect_container(&summary.id).await {
                Ok(info) => info.running,
                Err(e) if e.is_not_found() => {
                    live.remove(&summary.id);
                    continue;
                }
                Err(e) => {
                    warn!(container_id = %summary.id, error = %e, "inspect failed during reconcile");
                    continue;
                }
            };
            let status = if running {
                LocationStatus::Running
            } else {
                LocationStatus::Stopped
            };

            match self.locations.get_location(&summary.id)? {
                Some(mut row) => {
                    if row.status != status {
                        debug!(
                            container_id = %summary.id,
                            from = %row.status,
                            to = %status,
                            "location status drifted"
                        );
                        row.status = status;
                        row.updated_at = epoch_secs();
                        self.locations.upsert_location(&row)?;
                        report.updated += 1;
                    }
                }
                None => match self.store.get_game_server(gs_id)? {
                    Some(gs) => {
                        info!(game_server_id = %gs_id, container_id = %summary.id, "adopting container");
                        self.locations
                            .upsert_location(&self.location_row(&gs, &summary.id, status))?;
                        report.adopted += 1;
                    }
                    None => {
                        warn!(
                            game_server_id = %gs_id,
                            container_id = %summary.id,
                            "managed container has no game server record"
                        );
                        report.orphans += 1;
                    }
                },
            }
        }

        for row in self.locations.list_locations_for_node(&self.node.id)? {
            if live.contains(&row.container_id) {
                continue;
            }
            let _guard = self.locks.lock(&row.game_server_id).await;
            match self.runtime.inspect_container(&row.container_id).await {
                Err(e) if e.is_not_found() => {
                    if self.locations.delete_location(&row.container_id)? {
                        info!(
                            game_server_id = %row.game_server_id,
                            container_id = %row.container_id,
                            "removed location for vanished container"
                        );
                        report.removed += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(container_id = %row.container_id, error = %e, "inspect failed during reconcile");
                }
            }
        }

        if report.updated + report.adopted + report.removed > 0 {
            info!(?report, "locations reconciled");
        } else {
            debug!(seen = report.seen, "locations in sync");
        }
        Ok(report)
    }

    // ── Lifecycle internals (lock held) ───────────────────────────

    async fn create_locked(&self, gs: &GameServer, routing: Routing) -> OrchestratorResult<GameServer> {
        let id = gs.id.as_str();
        ensure_network(self.runtime.as_ref(), &self.config.network_name).await?;

        if routing == Routing::Place {
            let target = self.selector.select_node(&game_server_requirements(gs))?;
            self.evict_elsewhere(gs, &target.id).await?;
            if target.id != self.node.id {
                match &self.forwarder {
                    Some(fwd) => {
                        info!(game_server_id = %id, node = %target.id, "forwarding create");
                        return self.forward(fwd.as_ref(), &target.id, ForwardedOp::Create, gs).await;
                    }
                    None => warn!(
                        game_server_id = %id,
                        node = %target.id,
                        "no node forwarder configured; creating on this node"
                    ),
                }
            }
        }

        let name = container_name(id);
        self.remove_existing(&name).await?;
        ensure_image(self.runtime.clone(), &gs.image, &self.config.pull).await?;
        let dir = ensure_volume(&self.config.data_root, id).await?;

        let spec = self.container_spec(gs, &name, &dir);
        let container_id = self.runtime.create_container(&spec).await?;
        info!(game_server_id = %id, container_id = %container_id, image = %gs.image, "container created");

        self.record_location(gs, &container_id, LocationStatus::Created);
        self.store.set_container(id, &container_id, &name)?;
        self.store.update_status(id, GameServerStatus::Created)?;
        self.load(id)
    }

    async fn start_locked(&self, gs: GameServer) -> OrchestratorResult<GameServer> {
        let id = gs.id.clone();
        match self.start_inner(gs).await {
            Ok(gs) => Ok(gs),
            // These already recorded their outcome.
            Err(e @ (OrchestratorError::ExitedImmediately { .. } | OrchestratorError::StartFailed { .. })) => {
                Err(e)
            }
            Err(e) => {
                error!(game_server_id = %id, error = %e, "start failed");
                if let Err(se) = self.store.update_status(&id, GameServerStatus::Failed) {
                    warn!(game_server_id = %id, error = %se, "failed to record failed status");
                }
                Err(e)
            }
        }
    }

    async fn start_inner(&self, gs: GameServer) -> OrchestratorResult<GameServer> {
        let id = gs.id.clone();
        self.store.update_status(&id, GameServerStatus::Starting)?;

        let mut container_id = match gs.container_id.clone() {
            Some(cid) => cid,
            None => {
                info!(game_server_id = %id, "no container recorded; creating one");
                self.recreate(&gs).await?
            }
        };

        let running = match self.runtime.inspect_container(&container_id).await {
            Ok(info) => info.running,
            Err(e) if e.is_not_found() => {
                warn!(game_server_id = %id, container_id = %container_id, "container vanished; recreating");
                self.forget_location(&container_id);
                container_id = self.recreate(&gs).await?;
                false
            }
            Err(e) => return Err(e.into()),
        };

        if running {
            // Nothing was started, so last_started_at keeps its value.
            debug!(game_server_id = %id, container_id = %container_id, "container already running");
            self.record_location(&gs, &container_id, LocationStatus::Running);
            self.store.update_status(&id, GameServerStatus::Running)?;
            return self.load(&id);
        }

        if let Err(e) = self.runtime.start_container(&container_id).await {
            if !e.is_network_not_found() {
                return Err(self.fail_start(&gs, &container_id, e));
            }
            warn!(
                game_server_id = %id,
                container_id = %container_id,
                error = %e,
                "container network missing; recreating container"
            );
            self.discard_container(&id, &container_id).await?;
            container_id = self.recreate(&gs).await?;
            if let Err(e) = self.runtime.start_container(&container_id).await {
                return Err(self.fail_start(&gs, &container_id, e));
            }
        }
        debug!(game_server_id = %id, container_id = %container_id, "start issued; waiting out grace period");

        tokio::time::sleep(self.config.start_grace()).await;
        let after = self.runtime.inspect_container(&container_id).await?;
        if !after.running {
            let logs = self.capture_logs(&container_id).await;
            warn!(
                game_server_id = %id,
                container_id = %container_id,
                exit_code = after.exit_code,
                "container exited immediately"
            );
            self.record_location(&gs, &container_id, LocationStatus::Stopped);
            self.store.update_status(&id, GameServerStatus::Stopped)?;
            return Err(OrchestratorError::ExitedImmediately {
                exit_code: after.exit_code,
                logs,
            });
        }

        self.record_location(&gs, &container_id, LocationStatus::Running);
        self.store.mark_started(&id, epoch_secs())?;
        info!(game_server_id = %id, container_id = %container_id, "game server running");
        self.load(&id)
    }

    async fn stop_locked(&self, gs: &GameServer) -> OrchestratorResult<GameServer> {
        let id = gs.id.as_str();
        let container_id = gs
            .container_id
            .clone()
            .ok_or_else(|| OrchestratorError::NoContainer(id.to_string()))?;
        self.store.update_status(id, GameServerStatus::Stopping)?;

        let stopped = match self.runtime.inspect_container(&container_id).await {
            Ok(info) if info.running => self
                .runtime
                .stop_container(&container_id, self.config.stop_timeout())
                .await
                .map(|()| info!(game_server_id = %id, container_id = %container_id, "container stopped")),
            Ok(_) => {
                debug!(game_server_id = %id, "container already stopped");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                warn!(game_server_id = %id, container_id = %container_id, "container missing; marking stopped");
                Ok(())
            }
            Err(e) => Err(e),
        };

        if let Err(e) = stopped {
            warn!(game_server_id = %id, error = %e, "stop failed");
            if let Err(se) = self.store.update_status(id, gs.status) {
                warn!(game_server_id = %id, error = %se, "failed to restore status");
            }
            return Err(e.into());
        }

        // The reconciler drops the row if the container stays missing.
        self.record_location(gs, &container_id, LocationStatus::Stopped);
        self.store.update_status(id, GameServerStatus::Stopped)?;
        self.load(id)
    }

    async fn restart_locked(&self, gs: GameServer) -> OrchestratorResult<GameServer> {
        let Some(container_id) = gs.container_id.clone() else {
            debug!(game_server_id = %gs.id, "no container recorded; restarting means starting");
            return self.start_locked(gs).await;
        };
        match self.runtime.inspect_container(&container_id).await {
            Ok(info) if info.running => {}
            Ok(_) => {
                debug!(game_server_id = %gs.id, "container not running; starting instead");
                return self.start_locked(gs).await;
            }
            Err(e) => {
                debug!(game_server_id = %gs.id, error = %e, "inspect failed; starting instead");
                return self.start_locked(gs).await;
            }
        }

        let timeout = self.config.stop_timeout();
        match self.runtime.restart_container(&container_id, timeout).await {
            Ok(()) => info!(game_server_id = %gs.id, container_id = %container_id, "container restarted"),
            Err(e) => {
                warn!(game_server_id = %gs.id, error = %e, "in-place restart failed; trying stop then start");
                if let Err(e) = self.stop_then_start(&container_id, timeout).await {
                    warn!(game_server_id = %gs.id, error = %e, "stop then start failed; running full start");
                    let gs = self.load(&gs.id)?;
                    return self.start_locked(gs).await;
                }
                info!(game_server_id = %gs.id, container_id = %container_id, "container stopped and started");
            }
        }

        self.record_location(&gs, &container_id, LocationStatus::Running);
        self.store.mark_started(&gs.id, epoch_secs())?;
        self.load(&gs.id)
    }

    async fn delete_locked(&self, gs: &GameServer) -> OrchestratorResult<()> {
        let id = gs.id.as_str();
        let Some(container_id) = gs.container_id.clone() else {
            debug!(game_server_id = %id, "no container recorded; nothing to delete");
            return Ok(());
        };

        let existing = match self.runtime.inspect_container(&container_id).await {
            Ok(info) => Some(info),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };
        if let Some(info) = existing.as_ref().filter(|i| !i.has_label(MANAGED_LABEL, "true")) {
            error!(game_server_id = %id, container = %info.name, "refusing to delete unmanaged container");
            return Err(OrchestratorError::Unmanaged(info.name.clone()));
        }
        self.store.update_status(id, GameServerStatus::Deleting)?;

        let mut stopped_here = false;
        let gone = match existing {
            None => {
                info!(game_server_id = %id, container_id = %container_id, "container already gone");
                true
            }
            Some(info) => {
                if info.running {
                    if let Err(e) = self
                        .runtime
                        .stop_container(&container_id, self.config.stop_timeout())
                        .await
                    {
                        warn!(game_server_id = %id, error = %e, "stop before removal failed");
                    } else {
                        stopped_here = true;
                    }
                }
                match self.runtime.remove_container(&container_id, true).await {
                    Ok(()) => {
                        info!(game_server_id = %id, container_id = %container_id, "container removed");
                        true
                    }
                    Err(e) if e.is_not_found() => true,
                    Err(e) => {
                        warn!(
                            game_server_id = %id,
                            container_id = %container_id,
                            error = %e,
                            "container removal failed; keeping it recorded for a later delete"
                        );
                        false
                    }
                }
            }
        };

        if !gone {
            let status = if stopped_here {
                self.record_location(gs, &container_id, LocationStatus::Stopped);
                GameServerStatus::Stopped
            } else {
                gs.status
            };
            if let Err(e) = self.store.update_status(id, status) {
                warn!(game_server_id = %id, error = %e, "failed to restore status");
            }
            return Ok(());
        }
        self.forget_location(&container_id);
        self.store.clear_container(id)?;
        self.store.update_status(id, GameServerStatus::Provisioning)?;
        Ok(())
    }

    // ── Helpers ───────────────────────────────────────────────────

    fn load(&self, id: &str) -> OrchestratorResult<GameServer> {
        self.store
            .get_game_server(id)?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }

    fn view(&self, id: &str) -> OrchestratorResult<GameServerView> {
        Ok(GameServerView {
            game_server: self.load(id)?,
            location: self.locations.location_for_game_server(id)?,
        })
    }

    /// The forwarder and node to use when the container lives elsewhere.
    fn remote_owner(&self, id: &str) -> OrchestratorResult<Option<(Arc<dyn NodeForwarder>, String)>> {
        let Some(loc) = self.locations.location_for_game_server(id)? else {
            return Ok(None);
        };
        if loc.node_id == self.node.id {
            return Ok(None);
        }
        match &self.forwarder {
            Some(fwd) => Ok(Some((fwd.clone(), loc.node_id))),
            None => {
                warn!(game_server_id = %id, node = %loc.node_id, "no node forwarder configured; running locally");
                Ok(None)
            }
        }
    }

    fn ensure_local(&self, gs: &GameServer) -> OrchestratorResult<()> {
        match self.locations.location_for_game_server(&gs.id)? {
            Some(loc) if loc.node_id != self.node.id => Err(OrchestratorError::NotLocal {
                id: gs.id.clone(),
                node_id: loc.node_id,
            }),
            _ => Ok(()),
        }
    }

    /// Send `op` to `node_id` and persist the view it returns.
    async fn forward(
        &self,
        fwd: &dyn NodeForwarder,
        node_id: &str,
        op: ForwardedOp,
        gs: &GameServer,
    ) -> OrchestratorResult<GameServer> {
        let previous = self.locations.location_for_game_server(&gs.id)?;
        let view = match fwd.forward(node_id, op, gs).await {
            Ok(view) => view,
            Err(e) => return Err(self.forward_failed(&gs.id, op, previous, e)),
        };

        self.store.put_game_server(&view.game_server)?;
        let replaced = previous.filter(|prev| {
            view.location
                .as_ref()
                .is_none_or(|l| l.container_id != prev.container_id)
        });
        if let Some(prev) = replaced {
            self.forget_location(&prev.container_id);
        }
        if let Some(loc) = &view.location {
            if let Err(e) = self.locations.upsert_location(loc) {
                warn!(game_server_id = %gs.id, error = %e, "failed to record forwarded location");
            }
        }
        info!(game_server_id = %gs.id, node = %node_id, %op, "forwarded call completed");
        Ok(view.game_server)
    }

    /// Record the outcome of a failed forwarded start or restart here.
    ///
    /// An immediate exit marks the game server `Stopped` and comes back as
    /// [`OrchestratorError::ExitedImmediately`]; any other failure marks it
    /// `Failed`. Other operations leave the record untouched.
    fn forward_failed(
        &self,
        id: &str,
        op: ForwardedOp,
        previous: Option<GameServerLocation>,
        err: ForwardError,
    ) -> OrchestratorError {
        if !matches!(op, ForwardedOp::Start | ForwardedOp::Restart) {
            return err.into();
        }
        let (status, location_status, result) = match err {
            ForwardError::ExitedImmediately {
                node_id,
                exit_code,
                logs,
            } => {
                warn!(game_server_id = %id, node = %node_id, exit_code, "forwarded start exited immediately");
                (
                    GameServerStatus::Stopped,
                    LocationStatus::Stopped,
                    OrchestratorError::ExitedImmediately { exit_code, logs },
                )
            }
            other => {
                error!(game_server_id = %id, %op, error = %other, "forwarded start failed");
                (GameServerStatus::Failed, LocationStatus::Failed, other.into())
            }
        };

        if let Err(e) = self.store.update_status(id, status) {
            warn!(game_server_id = %id, error = %e, "failed to record forwarded start outcome");
        }
        if let Some(mut row) = previous {
            row.status = location_status;
            row.updated_at = epoch_secs();
            if let Err(e) = self.locations.upsert_location(&row) {
                warn!(game_server_id = %id, error = %e, "failed to record forwarded location");
            }
        }
        result
    }

    /// Remove the game server's previous container when it lives on a node
    /// other than `target`.
    async fn evict_elsewhere(&self, gs: &GameServer, target: &str) -> OrchestratorResult<()> {
        let Some(prev) = self.locations.location_for_game_server(&gs.id)? else {
            return Ok(());
        };
        if prev.node_id == target {
            return Ok(());
        }

        if prev.node_id == self.node.id {
            info!(
                game_server_id = %gs.id,
                container_id = %prev.container_id,
                node = %target,
                "game server moving; removing container on this node"
            );
            self.remove_existing(&prev.container_id).await?;
            self.forget_location(&prev.container_id);
            return Ok(());
        }

        let Some(fwd) = &self.forwarder else {
            warn!(
                game_server_id = %gs.id,
                node = %prev.node_id,
                "no node forwarder configured; previous container left in place"
            );
            return Ok(());
        };
        let mut previous = gs.clone();
        previous.container_id = Some(prev.container_id.clone());
        previous.container_name = Some(container_name(&gs.id));
        info!(
            game_server_id = %gs.id,
            from = %prev.node_id,
            to = %target,
            "game server moving; deleting container on previous node"
        );
        match fwd.forward(&prev.node_id, ForwardedOp::Delete, &previous).await {
            Ok(view) if view.location.is_some() => {
                return Err(ForwardError::Rejected {
                    node_id: prev.node_id.clone(),
                    op: ForwardedOp::Delete,
                    status: 409,
                    message: format!("container {} is still present", prev.container_id),
                }
                .into());
            }
            Ok(_) => {}
            Err(ForwardError::UnknownNode(node)) => {
                warn!(game_server_id = %gs.id, %node, "previous node no longer registered; dropping its row");
            }
            Err(e) => return Err(e.into()),
        }
        self.forget_location(&prev.container_id);
        Ok(())
    }

    /// Remove a stale container that blocks the deterministic name.
    ///
    /// Only containers carrying the ownership label are touched.
    async fn remove_existing(&self, name: &str) -> OrchestratorResult<()> {
        let existing = match self.runtime.inspect_container(name).await {
            Ok(info) => info,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if !existing.has_label(MANAGED_LABEL, "true") {
            error!(container = %name, "refusing to remove container without ownership label");
            return Err(OrchestratorError::Unmanaged(name.to_string()));
        }

        info!(container = %name, container_id = %existing.id, "removing existing container");
        match self.runtime.remove_container(&existing.id, true).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        self.forget_location(&existing.id);
        Ok(())
    }

    /// Remove a container whose network vanished and forget it.
    async fn discard_container(&self, id: &str, container_id: &str) -> OrchestratorResult<()> {
        match self.runtime.remove_container(container_id, true).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        self.forget_location(container_id);
        self.store.clear_container(id)?;
        Ok(())
    }

    /// Create a fresh container here and put the record back to `Starting`.
    async fn recreate(&self, gs: &GameServer) -> OrchestratorResult<String> {
        let created = self.create_locked(gs, Routing::Local).await?;
        self.store.update_status(&gs.id, GameServerStatus::Starting)?;
        created
            .container_id
            .ok_or_else(|| OrchestratorError::NoContainer(gs.id.clone()))
    }

    async fn stop_then_start(&self, container_id: &str, timeout: Duration) -> EngineResult<()> {
        self.runtime.stop_container(container_id, timeout).await?;
        self.runtime.start_container(container_id).await
    }

    fn fail_start(
        &self,
        gs: &GameServer,
        container_id: &str,
        source: hearth_engine::EngineError,
    ) -> OrchestratorError {
        error!(game_server_id = %gs.id, container_id = %container_id, error = %source, "container failed to start");
        self.record_location(gs, container_id, LocationStatus::Failed);
        if let Err(e) = self.store.update_status(&gs.id, GameServerStatus::Failed) {
            warn!(game_server_id = %gs.id, error = %e, "failed to record failed status");
        }
        OrchestratorError::StartFailed {
            id: gs.id.clone(),
            source,
        }
    }

    /// Last lines of output, for diagnosing a fast exit. Best effort.
    async fn capture_logs(&self, container_id: &str) -> Vec<String> {
        let options = LogOptions {
            tail: Some(self.config.log_capture_lines),
            ..Default::default()
        };
        let stream = match self.runtime.container_logs(container_id, &options).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(container_id = %container_id, error = %e, "could not read logs");
                return Vec::new();
            }
        };
        let lines = stream
            .filter_map(|line| futures_util::future::ready(line.ok().map(|l| l.message)))
            .collect::<Vec<_>>();
        tokio::time::timeout(LOG_CAPTURE_TIMEOUT, lines)
            .await
            .unwrap_or_else(|_| {
                warn!(container_id = %container_id, "timed out reading logs");
                Vec::new()
            })
    }

    fn container_spec(&self, gs: &GameServer, name: &str, data_dir: &Path) -> ContainerSpec {
        let mut env: BTreeMap<String, String> = gs
            .env_vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for key in BIND_ALL_DEFAULTS {
            env.entry(key.to_string())
                .or_insert_with(|| "0.0.0.0".to_string());
        }

        let mut labels = managed_labels();
        labels.insert(GAME_SERVER_ID_LABEL.to_string(), gs.id.clone());

        ContainerSpec {
            name: name.to_string(),
            image: gs.image.clone(),
            env: env.into_iter().map(|(k, v)| format!("{k}={v}")).collect(),
            cmd: gs
                .start_command
                .as_deref()
                .filter(|c| !c.trim().is_empty())
                .map(|c| vec!["/bin/sh".to_string(), "-c".to_string(), c.to_string()]),
            labels,
            ports: [Protocol::Tcp, Protocol::Udp]
                .into_iter()
                .map(|protocol| PortBinding {
                    host_port: gs.port,
                    container_port: gs.port,
                    protocol,
                })
                .collect(),
            binds: vec![BindMount {
                host_path: data_dir.display().to_string(),
                container_path: self.config.data_mount_target.clone(),
            }],
            memory_bytes: gs.memory_bytes,
            cpu_shares: cpu_shares(gs.cpu_cores),
            restart_policy: RestartPolicy::UnlessStopped,
            network: self.config.network_name.clone(),
            privileged: false,
            open_stdin: true,
        }
    }

    fn location_row(&self, gs: &GameServer, container_id: &str, status: LocationStatus) -> GameServerLocation {
        let now = epoch_secs();
        GameServerLocation {
            id: GameServerLocation::id_for(container_id),
            game_server_id: gs.id.clone(),
            node_id: self.node.id.clone(),
            node_hostname: self.node.hostname.clone(),
            node_ip: self.node.ip.clone(),
            container_id: container_id.to_string(),
            status,
            port: gs.port,
            created_at: now,
            updated_at: now,
        }
    }

    /// Upsert the location row. Failures are logged, never returned.
    fn record_location(&self, gs: &GameServer, container_id: &str, status: LocationStatus) {
        let row = self.location_row(gs, container_id, status);
        if let Err(e) = self.locations.upsert_location(&row) {
            warn!(game_server_id = %gs.id, container_id = %container_id, error = %e, "failed to record location");
        }
    }

    fn forget_location(&self, container_id: &str) {
        if let Err(e) = self.locations.delete_location(container_id) {
            warn!(container_id = %container_id, error = %e, "failed to delete location");
        }
    }
}
