//! redb table definitions for the Hearth state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Game server aggregates keyed by `{game_server_id}`.
pub const GAME_SERVERS: TableDefinition<&str, &[u8]> = TableDefinition::new("game_servers");

/// Placement rows keyed by `{container_id}`.
pub const LOCATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("locations");

/// Node info keyed by `{node_id}`.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");
