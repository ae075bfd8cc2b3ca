//! hearth-state: embedded state store for Hearth.
//!
//! Backed by [redb](https://docs.rs/redb), persists the three records the
//! orchestrator reconciles against the container runtime:
//!
//! - `GameServer` aggregates (spec + observed status), keyed by ID
//! - `GameServerLocation` placement rows, keyed by container ID
//! - `NodeInfo` cluster members, keyed by node ID
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! The orchestrator talks to the store through the [`GameServerStore`] and
//! [`LocationTracker`] traits so tests and alternative backends can be
//! substituted. [`CachedStore`] layers an invalidate-on-write read cache over
//! any `GameServerStore`.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod cache;
pub mod error;
pub mod repo;
pub mod store;
pub mod tables;
pub mod types;

pub use cache::CachedStore;
pub use error::{StateError, StateResult};
pub use repo::{GameServerStore, LocationTracker};
pub use store::StateStore;
pub use types::*;
