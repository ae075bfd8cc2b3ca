//! Read-through side cache over a `GameServerStore`.
//!
//! Reads populate the cache; writes go to the inner store first and only
//! invalidate the entry once the inner write has committed. A failed write
//! leaves the cached entry untouched. Entries expire after a TTL, so reads
//! may be stale by at most that long when another writer bypasses the cache.
//!
//! Every invalidation bumps a generation counter. A read only populates the
//! cache if no invalidation happened between its inner load and the insert,
//! so a read racing a write never caches the pre-write value.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::StateResult;
use crate::repo::GameServerStore;
use crate::types::*;

struct Entry {
    value: GameServer,
    inserted_at: Instant,
}

/// Caching decorator for any [`GameServerStore`].
pub struct CachedStore<S> {
    inner: S,
    ttl: Duration,
    entries: RwLock<HashMap<String, Entry>>,
    generation: AtomicU64,
}

impl<S: GameServerStore> CachedStore<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Number of live cache entries.
    pub fn cached_len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .values()
            .filter(|e| e.inserted_at.elapsed() < self.ttl)
            .count()
    }

    fn cached(&self, id: &str) -> Option<GameServer> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(id)
            .filter(|e| e.inserted_at.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Cache `gs` unless an invalidation happened since `seen` was taken.
    fn populate(&self, gs: &GameServer, seen: u64) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if self.generation() != seen {
            trace!(game_server_id = %gs.id, "skipping populate after concurrent write");
            return;
        }
        entries.insert(
            gs.id.clone(),
            Entry {
                value: gs.clone(),
                inserted_at: Instant::now(),
            },
        );
    }

    fn invalidate(&self, id: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        self.generation.fetch_add(1, Ordering::SeqCst);
        if entries.remove(id).is_some() {
            trace!(game_server_id = %id, "cache entry invalidated");
        }
    }

    /// Run a write against the inner store and invalidate `id` on success.
    fn write_through<T>(&self, id: &str, op: impl FnOnce(&S) -> StateResult<T>) -> StateResult<T> {
        let result = op(&self.inner)?;
        self.invalidate(id);
        Ok(result)
    }
}

impl<S: GameServerStore> GameServerStore for CachedStore<S> {
    fn get_game_server(&self, id: &str) -> StateResult<Option<GameServer>> {
        if let Some(hit) = self.cached(id) {
            trace!(game_server_id = %id, "cache hit");
            return Ok(Some(hit));
        }
        let seen = self.generation();
        let loaded = self.inner.get_game_server(id)?;
        if let Some(gs) = &loaded {
            self.populate(gs, seen);
        }
        Ok(loaded)
    }

    fn put_game_server(&self, gs: &GameServer) -> StateResult<()> {
        self.write_through(&gs.id, |s| s.put_game_server(gs))
    }

    fn list_game_servers(&self) -> StateResult<Vec<GameServer>> {
        self.inner.list_game_servers()
    }

    fn delete_game_server(&self, id: &str) -> StateResult<bool> {
        self.write_through(id, |s| s.delete_game_server(id))
    }

    fn update_status(&self, id: &str, status: GameServerStatus) -> StateResult<()> {
        self.write_through(id, |s| s.update_status(id, status))
    }

    fn set_container(&self, id: &str, container_id: &str, container_name: &str) -> StateResult<()> {
        self.write_through(id, |s| s.set_container(id, container_id, container_name))
    }

    fn clear_container(&self, id: &str) -> StateResult<()> {
        self.write_through(id, |s| s.clear_container(id))
    }

    fn mark_started(&self, id: &str, started_at: u64) -> StateResult<()> {
        self.write_through(id, |s| s.mark_started(id, started_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StateError;
    use crate::store::StateStore;

    fn cached_store() -> CachedStore<StateStore> {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_game_server(&GameServer::new("gs-1", "img", 27015, 1 << 30, 1.0))
            .unwrap();
        CachedStore::new(store, Duration::from_secs(60))
    }

    #[test]
    fn read_populates_cache() {
        let cache = cached_store();
        assert_eq!(cache.cached_len(), 0);

        cache.get_game_server("gs-1").unwrap().unwrap();
        assert_eq!(cache.cached_len(), 1);
    }

    #[test]
    fn write_invalidates_after_commit() {
        let cache = cached_store();
        cache.get_game_server("gs-1").unwrap();

        cache.update_status("gs-1", GameServerStatus::Running).unwrap();
        assert_eq!(cache.cached_len(), 0);

        let gs = cache.get_game_server("gs-1").unwrap().unwrap();
        assert_eq!(gs.status, GameServerStatus::Running);
    }

    #[test]
    fn failed_write_keeps_entry() {
        let cache = cached_store();
        cache.get_game_server("gs-1").unwrap();

        let result = cache.update_status("ghost", GameServerStatus::Running);
        assert!(matches!(result, Err(StateError::NotFound(_))));
        assert_eq!(cache.cached_len(), 1);
    }

    #[test]
    fn bypassing_writer_is_visible_after_ttl() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_game_server(&GameServer::new("gs-1", "img", 27015, 1 << 30, 1.0))
            .unwrap();
        let cache = CachedStore::new(store.clone(), Duration::ZERO);
        cache.get_game_server("gs-1").unwrap();

        store.modify_game_server("gs-1", |gs| gs.port = 27016).unwrap();

        let gs = cache.get_game_server("gs-1").unwrap().unwrap();
        assert_eq!(gs.port, 27016);
    }

    #[test]
    fn read_racing_a_write_is_not_cached() {
        let cache = cached_store();

        // A reader loads the record, then a writer commits and invalidates
        // before the reader gets to populate.
        let seen = cache.generation();
        let stale = cache.inner.get_game_server("gs-1").unwrap().unwrap();
        cache.update_status("gs-1", GameServerStatus::Running).unwrap();
        cache.populate(&stale, seen);

        assert_eq!(cache.cached_len(), 0);
        let gs = cache.get_game_server("gs-1").unwrap().unwrap();
        assert_eq!(gs.status, GameServerStatus::Running);
        assert_eq!(cache.cached_len(), 1);
    }

    #[test]
    fn miss_is_not_cached() {
        let cache = cached_store();
        assert!(cache.get_game_server("nope").unwrap().is_none());
        assert_eq!(cache.cached_len(), 0);
    }
}
