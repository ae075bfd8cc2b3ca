//! The container runtime seam.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::types::*;

/// Operations the orchestrator needs from a local container engine.
///
/// Every call is a single request to the engine; nothing is retried here.
/// Implementations must report a vanished container as
/// `EngineError::NotFound` and a start that fails because the container's
/// network is gone as `EngineError::NetworkNotFound`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn inspect_container(&self, id: &str) -> EngineResult<ContainerInspect>;

    /// Create a container and return its engine ID.
    async fn create_container(&self, spec: &ContainerSpec) -> EngineResult<String>;

    /// Start a container. Starting a running container succeeds.
    async fn start_container(&self, id: &str) -> EngineResult<()>;

    /// Stop a container, killing it after `timeout`. Stopping a stopped
    /// container succeeds.
    async fn stop_container(&self, id: &str, timeout: Duration) -> EngineResult<()>;

    async fn restart_container(&self, id: &str, timeout: Duration) -> EngineResult<()>;

    async fn remove_container(&self, id: &str, force: bool) -> EngineResult<()>;

    /// List containers carrying every given label.
    async fn list_containers(
        &self,
        labels: &HashMap<String, String>,
        all: bool,
    ) -> EngineResult<Vec<ContainerSummary>>;

    async fn container_logs(&self, id: &str, options: &LogOptions) -> EngineResult<LogStream>;

    /// Open a stdin-only attach session to the container's primary process.
    async fn attach_stdin(&self, id: &str) -> EngineResult<StdinWriter>;

    /// List networks with exactly this name.
    async fn list_networks(&self, name: &str) -> EngineResult<Vec<NetworkSummary>>;

    /// Create a network and return its engine ID.
    async fn create_network(&self, spec: &NetworkSpec) -> EngineResult<String>;

    /// List local images matching a reference.
    async fn list_images(&self, reference: &str) -> EngineResult<Vec<ImageSummary>>;

    /// Pull an image, returning once the engine reports completion.
    async fn pull_image(&self, reference: &str) -> EngineResult<()>;
}
