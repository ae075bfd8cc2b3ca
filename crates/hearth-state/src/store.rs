//! StateStore: redb-backed state persistence for Hearth.
//!
//! Provides typed CRUD operations over game servers, locations, and nodes.
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(GAME_SERVERS).map_err(map_err!(Table))?;
        txn.open_table(LOCATIONS).map_err(map_err!(Table))?;
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn put<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list<T: DeserializeOwned>(&self, table: Table) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(results)
    }

    fn delete(&self, table: Table, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Game servers ───────────────────────────────────────────────

    /// Insert or update a game server record.
    pub fn put_game_server(&self, gs: &GameServer) -> StateResult<()> {
        self.put(GAME_SERVERS, &gs.id, gs)?;
        debug!(game_server_id = %gs.id, status = %gs.status, "game server stored");
        Ok(())
    }

    /// Get a game server by ID.
    pub fn get_game_server(&self, id: &str) -> StateResult<Option<GameServer>> {
        self.get(GAME_SERVERS, id)
    }

    /// List all game servers.
    pub fn list_game_servers(&self) -> StateResult<Vec<GameServer>> {
        self.list(GAME_SERVERS)
    }

    /// Delete a game server by ID. Returns true if it existed.
    pub fn delete_game_server(&self, id: &str) -> StateResult<bool> {
        let existed = self.delete(GAME_SERVERS, id)?;
        debug!(game_server_id = %id, existed, "game server deleted");
        Ok(existed)
    }

    /// Read-modify-write a game server inside one write transaction.
    ///
    /// Fails with `NotFound` when no record exists; the transaction is
    /// aborted and nothing is written.
    pub fn modify_game_server<F>(&self, id: &str, f: F) -> StateResult<GameServer>
    where
        F: FnOnce(&mut GameServer),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(GAME_SERVERS).map_err(map_err!(Table))?;
            let mut gs: GameServer = {
                let guard = table
                    .get(id)
                    .map_err(map_err!(Read))?
                    .ok_or_else(|| StateError::NotFound(format!("game server {id}")))?;
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
            };
            f(&mut gs);
            gs.updated_at = epoch_secs();
            let value = serde_json::to_vec(&gs).map_err(map_err!(Serialize))?;
            table.insert(id, value.as_slice()).map_err(map_err!(Write))?;
            gs
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    // ── Locations ──────────────────────────────────────────────────

    /// Insert or update a location row, keyed by container ID.
    ///
    /// An existing row keeps its original `created_at`.
    pub fn put_location(&self, location: &GameServerLocation) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(LOCATIONS).map_err(map_err!(Table))?;
            let existing: Option<GameServerLocation> = match table
                .get(location.container_id.as_str())
                .map_err(map_err!(Read))?
            {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            let mut row = location.clone();
            if let Some(existing) = existing {
                row.created_at = existing.created_at;
            }
            let value = serde_json::to_vec(&row).map_err(map_err!(Serialize))?;
            table
                .insert(row.container_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            container_id = %location.container_id,
            game_server_id = %location.game_server_id,
            status = %location.status,
            "location stored"
        );
        Ok(())
    }

    /// Get a location row by container ID.
    pub fn get_location(&self, container_id: &str) -> StateResult<Option<GameServerLocation>> {
        self.get(LOCATIONS, container_id)
    }

    /// List all location rows.
    pub fn list_locations(&self) -> StateResult<Vec<GameServerLocation>> {
        self.list(LOCATIONS)
    }

    /// List all location rows for a game server, most recently updated first.
    pub fn list_locations_for_game_server(
        &self,
        game_server_id: &str,
    ) -> StateResult<Vec<GameServerLocation>> {
        let mut rows: Vec<GameServerLocation> = self
            .list_locations()?
            .into_iter()
            .filter(|l| l.game_server_id == game_server_id)
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rows)
    }

    /// List all location rows placed on a node.
    pub fn list_locations_for_node(&self, node_id: &str) -> StateResult<Vec<GameServerLocation>> {
        Ok(self
            .list_locations()?
            .into_iter()
            .filter(|l| l.node_id == node_id)
            .collect())
    }

    /// Delete a location row by container ID. Returns true if it existed.
    pub fn delete_location(&self, container_id: &str) -> StateResult<bool> {
        let existed = self.delete(LOCATIONS, container_id)?;
        debug!(%container_id, existed, "location deleted");
        Ok(existed)
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert or update a node info.
    pub fn put_node(&self, node: &NodeInfo) -> StateResult<()> {
        self.put(NODES, &node.id, node)
    }

    /// Get a node by ID.
    pub fn get_node(&self, node_id: &str) -> StateResult<Option<NodeInfo>> {
        self.get(NODES, node_id)
    }

    /// List all nodes.
    pub fn list_nodes(&self) -> StateResult<Vec<NodeInfo>> {
        self.list(NODES)
    }

    /// Delete a node by ID. Returns true if it existed.
    pub fn delete_node(&self, node_id: &str) -> StateResult<bool> {
        self.delete(NODES, node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_game_server(id: &str) -> GameServer {
        GameServer::new(id, "itzg/minecraft-server", 25565, 2 << 30, 2.0)
    }

    fn test_location(gs: &str, container: &str, node: &str, updated_at: u64) -> GameServerLocation {
        GameServerLocation {
            id: GameServerLocation::id_for(container),
            game_server_id: gs.to_string(),
            node_id: node.to_string(),
            node_hostname: format!("{node}.local"),
            node_ip: None,
            container_id: container.to_string(),
            status: LocationStatus::Created,
            port: 25565,
            created_at: 1000,
            updated_at,
        }
    }

    fn test_node(id: &str) -> NodeInfo {
        NodeInfo {
            id: id.to_string(),
            hostname: format!("{id}.local"),
            address: "10.0.0.1".to_string(),
            api_port: 7600,
            capacity_memory_bytes: 16 << 30,
            capacity_cpu_shares: 8 * 1024,
            labels: HashMap::new(),
            draining: false,
            last_seen: 1000,
        }
    }

    // ── Game server CRUD ───────────────────────────────────────────

    #[test]
    fn game_server_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let gs = test_game_server("gs-1");

        store.put_game_server(&gs).unwrap();
        let retrieved = store.get_game_server("gs-1").unwrap();

        assert_eq!(retrieved, Some(gs));
    }

    #[test]
    fn game_server_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_game_server("nope").unwrap().is_none());
    }

    #[test]
    fn game_server_modify_in_place() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_game_server(&test_game_server("gs-1")).unwrap();

        let updated = store
            .modify_game_server("gs-1", |gs| {
                gs.status = GameServerStatus::Running;
                gs.container_id = Some("abc".to_string());
            })
            .unwrap();
        assert_eq!(updated.status, GameServerStatus::Running);

        let retrieved = store.get_game_server("gs-1").unwrap().unwrap();
        assert_eq!(retrieved.status, GameServerStatus::Running);
        assert_eq!(retrieved.container_id.as_deref(), Some("abc"));
    }

    #[test]
    fn game_server_modify_missing_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let result = store.modify_game_server("ghost", |gs| gs.port = 1);
        assert!(matches!(result, Err(StateError::NotFound(_))));
        assert!(store.get_game_server("ghost").unwrap().is_none());
    }

    #[test]
    fn game_server_list_and_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_game_server(&test_game_server("a")).unwrap();
        store.put_game_server(&test_game_server("b")).unwrap();
        assert_eq!(store.list_game_servers().unwrap().len(), 2);

        assert!(store.delete_game_server("a").unwrap());
        assert!(!store.delete_game_server("a").unwrap());
        assert_eq!(store.list_game_servers().unwrap().len(), 1);
    }

    // ── Location CRUD ──────────────────────────────────────────────

    #[test]
    fn location_upsert_keeps_created_at() {
        let store = StateStore::open_in_memory().unwrap();
        let mut loc = test_location("gs-1", "c1", "node-1", 1000);
        store.put_location(&loc).unwrap();

        loc.status = LocationStatus::Running;
        loc.created_at = 5000;
        loc.updated_at = 5000;
        store.put_location(&loc).unwrap();

        let retrieved = store.get_location("c1").unwrap().unwrap();
        assert_eq!(retrieved.status, LocationStatus::Running);
        assert_eq!(retrieved.created_at, 1000);
        assert_eq!(retrieved.updated_at, 5000);
        assert_eq!(store.list_locations().unwrap().len(), 1);
    }

    #[test]
    fn locations_for_game_server_newest_first() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_location(&test_location("gs-1", "old", "node-1", 1000)).unwrap();
        store.put_location(&test_location("gs-1", "new", "node-1", 2000)).unwrap();
        store.put_location(&test_location("gs-2", "other", "node-1", 3000)).unwrap();

        let rows = store.list_locations_for_game_server("gs-1").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].container_id, "new");
    }

    #[test]
    fn locations_for_node() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_location(&test_location("gs-1", "c1", "node-1", 1000)).unwrap();
        store.put_location(&test_location("gs-2", "c2", "node-2", 1000)).unwrap();
        store.put_location(&test_location("gs-3", "c3", "node-1", 1000)).unwrap();

        assert_eq!(store.list_locations_for_node("node-1").unwrap().len(), 2);
        assert_eq!(store.list_locations_for_node("node-2").unwrap().len(), 1);
    }

    #[test]
    fn location_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_location(&test_location("gs-1", "c1", "node-1", 1000)).unwrap();

        assert!(store.delete_location("c1").unwrap());
        assert!(!store.delete_location("c1").unwrap());
        assert!(store.get_location("c1").unwrap().is_none());
    }

    // ── Node CRUD ──────────────────────────────────────────────────

    #[test]
    fn node_put_get_delete() {
        let store = StateStore::open_in_memory().unwrap();
        let node = test_node("node-1");

        store.put_node(&node).unwrap();
        assert_eq!(store.get_node("node-1").unwrap(), Some(node));
        assert_eq!(store.list_nodes().unwrap().len(), 1);

        assert!(store.delete_node("node-1").unwrap());
        assert!(store.get_node("node-1").unwrap().is_none());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_game_server(&test_game_server("gs-1")).unwrap();
            store.put_location(&test_location("gs-1", "c1", "node-1", 1000)).unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        assert!(store.get_game_server("gs-1").unwrap().is_some());
        assert!(store.get_location("c1").unwrap().is_some());
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_game_servers().unwrap().is_empty());
        assert!(store.list_locations().unwrap().is_empty());
        assert!(store.list_nodes().unwrap().is_empty());
        assert!(store.list_locations_for_game_server("any").unwrap().is_empty());
        assert!(!store.delete_game_server("nope").unwrap());
        assert!(!store.delete_location("nope").unwrap());
        assert!(!store.delete_node("nope").unwrap());
    }
}
