//! Repository traits the orchestrator depends on.
//!
//! `StateStore` implements both; `CachedStore` decorates any
//! `GameServerStore`. Keeping the orchestrator on these traits means every
//! dependency is injected and tests can swap in their own.

use crate::error::StateResult;
use crate::store::StateStore;
use crate::types::*;

/// Keyed CRUD plus targeted mutations on the `GameServer` aggregate.
///
/// Mutators fail with `StateError::NotFound` when the record is missing.
pub trait GameServerStore: Send + Sync {
    fn get_game_server(&self, id: &str) -> StateResult<Option<GameServer>>;

    fn put_game_server(&self, gs: &GameServer) -> StateResult<()>;

    fn list_game_servers(&self) -> StateResult<Vec<GameServer>>;

    fn delete_game_server(&self, id: &str) -> StateResult<bool>;

    fn update_status(&self, id: &str, status: GameServerStatus) -> StateResult<()>;

    /// Record the container backing this game server.
    fn set_container(&self, id: &str, container_id: &str, container_name: &str) -> StateResult<()>;

    /// Forget the recorded container (it was removed).
    fn clear_container(&self, id: &str) -> StateResult<()>;

    /// Mark the game server `Running` and stamp `last_started_at`.
    fn mark_started(&self, id: &str, started_at: u64) -> StateResult<()>;
}

/// Placement rows, keyed by container ID.
pub trait LocationTracker: Send + Sync {
    fn upsert_location(&self, location: &GameServerLocation) -> StateResult<()>;

    fn get_location(&self, container_id: &str) -> StateResult<Option<GameServerLocation>>;

    /// The most recently updated row for a game server, if any.
    fn location_for_game_server(&self, game_server_id: &str)
    -> StateResult<Option<GameServerLocation>>;

    fn list_locations_for_node(&self, node_id: &str) -> StateResult<Vec<GameServerLocation>>;

    fn delete_location(&self, container_id: &str) -> StateResult<bool>;
}

impl GameServerStore for StateStore {
    fn get_game_server(&self, id: &str) -> StateResult<Option<GameServer>> {
        StateStore::get_game_server(self, id)
    }

    fn put_game_server(&self, gs: &GameServer) -> StateResult<()> {
        StateStore::put_game_server(self, gs)
    }

    fn list_game_servers(&self) -> StateResult<Vec<GameServer>> {
        StateStore::list_game_servers(self)
    }

    fn delete_game_server(&self, id: &str) -> StateResult<bool> {
        StateStore::delete_game_server(self, id)
    }

    fn update_status(&self, id: &str, status: GameServerStatus) -> StateResult<()> {
        self.modify_game_server(id, |gs| gs.status = status)?;
        Ok(())
    }

    fn set_container(&self, id: &str, container_id: &str, container_name: &str) -> StateResult<()> {
        self.modify_game_server(id, |gs| {
            gs.container_id = Some(container_id.to_string());
            gs.container_name = Some(container_name.to_string());
        })?;
        Ok(())
    }

    fn clear_container(&self, id: &str) -> StateResult<()> {
        self.modify_game_server(id, |gs| {
            gs.container_id = None;
            gs.container_name = None;
        })?;
        Ok(())
    }

    fn mark_started(&self, id: &str, started_at: u64) -> StateResult<()> {
        self.modify_game_server(id, |gs| {
            gs.status = GameServerStatus::Running;
            gs.last_started_at = Some(started_at);
        })?;
        Ok(())
    }
}

impl LocationTracker for StateStore {
    fn upsert_location(&self, location: &GameServerLocation) -> StateResult<()> {
        self.put_location(location)
    }

    fn get_location(&self, container_id: &str) -> StateResult<Option<GameServerLocation>> {
        StateStore::get_location(self, container_id)
    }

    fn location_for_game_server(
        &self,
        game_server_id: &str,
    ) -> StateResult<Option<GameServerLocation>> {
        Ok(self
            .list_locations_for_game_server(game_server_id)?
            .into_iter()
            .next())
    }

    fn list_locations_for_node(&self, node_id: &str) -> StateResult<Vec<GameServerLocation>> {
        StateStore::list_locations_for_node(self, node_id)
    }

    fn delete_location(&self, container_id: &str) -> StateResult<bool> {
        StateStore::delete_location(self, container_id)
    }
}
