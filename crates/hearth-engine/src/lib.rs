//! hearth-engine: container runtime gateway for Hearth.
//!
//! Defines the [`ContainerRuntime`] trait the orchestrator drives, and
//! [`DockerEngine`], an implementation speaking the Docker Engine HTTP API
//! over the local unix socket.
//!
//! # Architecture
//!
//! ```text
//! GameServerOrchestrator
//!   └── Arc<dyn ContainerRuntime>
//!       └── DockerEngine
//!           ├── one HTTP/1.1 connection per call (hyper, UnixStream)
//!           ├── logs: multiplexed frame decoder → LogStream
//!           └── attach: HTTP upgrade → raw stdin writer
//! ```
//!
//! Engine error text is classified in exactly one place
//! ([`error::classify`]); everything above sees typed [`EngineError`]s.

pub mod docker;
pub mod error;
pub mod logs;
pub mod runtime;
pub mod types;

pub use docker::DockerEngine;
pub use error::{EngineError, EngineResult};
pub use logs::LogDecoder;
pub use runtime::ContainerRuntime;
pub use types::*;
