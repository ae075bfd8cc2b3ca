//! Idempotent provisioning of what a game-server container needs:
//! the shared network, its host data directory, and its image.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use hearth_engine::{ContainerRuntime, EngineError, NetworkSpec};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::policy::TimeoutPolicy;

/// Ownership label carried by every object hearth creates.
pub const MANAGED_LABEL: &str = "hearth.managed";
/// Label naming the game server a container belongs to.
pub const GAME_SERVER_ID_LABEL: &str = "hearth.game-server-id";

pub fn managed_labels() -> HashMap<String, String> {
    HashMap::from([(MANAGED_LABEL.to_string(), "true".to_string())])
}

/// Deterministic container name for a game server.
pub fn container_name(id: &str) -> String {
    format!("gameserver-{id}")
}

/// Host data directory for a game server.
pub fn data_dir(data_root: &Path, id: &str) -> PathBuf {
    data_root.join("gameservers").join(id)
}

/// Make sure the bridge network exists, creating it when missing.
/// Returns the network ID.
pub async fn ensure_network(runtime: &dyn ContainerRuntime, name: &str) -> OrchestratorResult<String> {
    if let Some(existing) = find_network(runtime, name).await? {
        debug!(network = %name, "network present");
        return Ok(existing);
    }

    let spec = NetworkSpec {
        name: name.to_string(),
        driver: "bridge".to_string(),
        labels: managed_labels(),
    };
    match runtime.create_network(&spec).await {
        Ok(id) => {
            info!(network = %name, network_id = %id, "network created");
            Ok(id)
        }
        // Lost a race with another caller creating the same network.
        Err(EngineError::Conflict(msg)) => {
            debug!(network = %name, %msg, "network created concurrently");
            match find_network(runtime, name).await? {
                Some(id) => Ok(id),
                None => Err(EngineError::Conflict(msg).into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

async fn find_network(runtime: &dyn ContainerRuntime, name: &str) -> OrchestratorResult<Option<String>> {
    let networks = runtime.list_networks(name).await?;
    Ok(networks.into_iter().find(|n| n.name == name).map(|n| {
        if n.labels.get(MANAGED_LABEL).is_none_or(|v| v != "true") {
            warn!(network = %name, "reusing network without ownership label");
        }
        n.id
    }))
}

/// Create the host data directory for a game server if needed.
///
/// This is a plain host directory bind-mounted into the container, so the
/// control plane can read and write game files without the engine.
pub async fn ensure_volume(data_root: &Path, id: &str) -> OrchestratorResult<PathBuf> {
    let dir = data_dir(data_root, id);
    tokio::fs::create_dir_all(&dir).await?;
    debug!(game_server_id = %id, path = %dir.display(), "data directory ready");
    Ok(dir)
}

/// Pull `image` unless it is already present locally.
pub async fn ensure_image(
    runtime: Arc<dyn ContainerRuntime>,
    image: &str,
    policy: &TimeoutPolicy,
) -> OrchestratorResult<()> {
    if !runtime.list_images(image).await?.is_empty() {
        debug!(%image, "image present");
        return Ok(());
    }

    info!(%image, timeout = ?policy.timeout, detached = policy.detached, "pulling image");
    let reference = image.to_string();
    policy
        .run("image pull", async move {
            runtime.pull_image(&reference).await?;
            Ok::<(), OrchestratorError>(())
        })
        .await?;
    info!(%image, "image pulled");
    Ok(())
}
