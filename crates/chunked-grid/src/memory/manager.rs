//! Memory-bounded arena of resident chunks shared by every open grid.
//!
//! Each grid registers with a manager and keeps none of its chunks itself:
//! resident chunks live here, keyed by `(grid, chunk)` in least-recently-used
//! order. Bringing a chunk into memory and growing a chunk are allocations
//! against a byte budget. When an allocation does not fit, the manager
//! reclaims by swapping chunks out through the owning grid's [`ChunkStore`]
//! until it does:
//!
//! ```text
//! Normal ──(allocation does not fit)──► Reclaiming ──(fits)──► Normal
//!                                            │
//!                                            └──(nothing evictable)──► Exhausted
//! ```
//!
//! `Exhausted` surfaces as [`GridStoreError::ResourceExhausted`] and aborts
//! the operation that asked for memory before it changes anything.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::chunk::{Chunk, ChunkKind};
use crate::config::GridStoreConfig;
use crate::error::{GridStoreError, Result};
use crate::layout::ChunkLayout;
use crate::store::ChunkStore;
use crate::types::{ChunkId, ChunkKey, GridId, MemoryStats};

struct ResidentChunk {
    chunk: Chunk,
    bytes: usize,
    /// Changed since it was last stored.
    dirty: bool,
}

struct GridEntry {
    store: Arc<dyn ChunkStore>,
    layout: ChunkLayout,
    /// Chunks with a persisted copy in `store`.
    swapped: BTreeSet<ChunkId>,
}

struct ManagerState {
    resident: LruCache<ChunkKey, ResidentChunk>,
    grids: HashMap<GridId, GridEntry>,
    budget_bytes: usize,
    used_bytes: usize,
    hits: u64,
    loads: u64,
    evictions: u64,
    stores: u64,
}

/// Shared handle to the chunk arena. Cloning shares the same arena.
///
/// All bookkeeping sits behind one lock; grid operations hold it for the
/// whole of a chunk access, so a chunk is never evicted while it is being
/// read or changed.
#[derive(Clone)]
pub struct MemoryManager {
    state: Arc<Mutex<ManagerState>>,
}

impl MemoryManager {
    /// Create a manager with the given memory budget in bytes.
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManagerState {
                resident: LruCache::unbounded(),
                grids: HashMap::new(),
                budget_bytes,
                used_bytes: 0,
                hits: 0,
                loads: 0,
                evictions: 0,
                stores: 0,
            })),
        }
    }

    /// Create a manager sized from configuration.
    pub fn from_config(config: &GridStoreConfig) -> Self {
        Self::new(config.memory_budget_bytes())
    }

    /// A manager that never needs to evict.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Get residency statistics.
    pub fn stats(&self) -> MemoryStats {
        self.state.lock().stats()
    }

    /// Change the budget. Shrinking does not evict until the next allocation.
    pub fn set_budget(&self, budget_bytes: usize) {
        self.state.lock().budget_bytes = budget_bytes;
    }

    /// Swap out one resident chunk that is not in `excluding`.
    ///
    /// Returns `false` when there is nothing left to evict.
    pub fn try_free_one_chunk(&self, excluding: &HashSet<ChunkKey>) -> Result<bool> {
        self.state.lock().evict_one(excluding)
    }

    /// Evict chunks until `predicate` holds.
    ///
    /// Fails with [`GridStoreError::ResourceExhausted`] if the predicate still
    /// does not hold once nothing evictable remains. Returns how many chunks
    /// were evicted.
    pub fn free_until<P>(&self, mut predicate: P, excluding: &HashSet<ChunkKey>) -> Result<usize>
    where
        P: FnMut(&MemoryStats) -> bool,
    {
        self.state
            .lock()
            .free_until(|s| predicate(&s.stats()), excluding, 0)
    }

    /// Check whether a chunk is in memory.
    pub fn is_resident(&self, grid: GridId, id: ChunkId) -> bool {
        self.state.lock().resident.contains(&(grid, id))
    }

    /// Resident chunk ids of one grid, in order.
    pub fn resident_chunk_ids(&self, grid: GridId) -> Vec<ChunkId> {
        let state = self.state.lock();
        let mut ids: Vec<ChunkId> = state
            .resident
            .iter()
            .filter(|((g, _), _)| *g == grid)
            .map(|((_, id), _)| *id)
            .collect();
        ids.sort();
        ids
    }

    pub(crate) fn register_grid(&self, store: Arc<dyn ChunkStore>, layout: ChunkLayout) -> GridId {
        let mut state = self.state.lock();
        let id = GridId::next();
        state.grids.insert(
            id,
            GridEntry {
                store,
                layout,
                swapped: BTreeSet::new(),
            },
        );
        tracing::debug!(grid = %id, "registered grid");
        id
    }

    /// Forget a grid: drop its resident chunks and its persisted copies.
    pub(crate) fn unregister_grid(&self, grid: GridId) {
        let mut state = self.state.lock();
        for key in state.keys_of(grid) {
            if let Some(resident) = state.resident.pop(&key) {
                state.used_bytes -= resident.bytes;
            }
        }
        if let Some(entry) = state.grids.remove(&grid) {
            if let Err(e) = entry.store.remove_grid(grid) {
                tracing::warn!(%grid, error = %e, "failed to remove persisted chunks");
            }
        }
        tracing::debug!(%grid, "unregistered grid");
    }

    pub(crate) fn store_metadata(&self, grid: GridId, metadata: &serde_json::Value) -> Result<()> {
        let state = self.state.lock();
        let entry = state.grids.get(&grid).ok_or(GridStoreError::UnknownGrid(grid.0))?;
        entry.store.store_metadata(grid, metadata)
    }

    /// Run `f` on a chunk, loading it if it was swapped out.
    ///
    /// Returns `None` for a chunk that has never been written.
    pub(crate) fn read<R>(
        &self,
        grid: GridId,
        id: ChunkId,
        f: impl FnOnce(&Chunk) -> R,
    ) -> Result<Option<R>> {
        let mut state = self.state.lock();
        let key = (grid, id);
        if !state.make_resident(key)? {
            return Ok(None);
        }
        Ok(state.resident.peek(&key).map(|r| f(&r.chunk)))
    }

    /// Run `f` on a chunk for mutation, creating it with `create` on first
    /// touch.
    ///
    /// Memory for the worst-case growth of a single `set` is reserved before
    /// `f` runs, so an exhausted budget aborts without a partial change.
    pub(crate) fn write<R>(
        &self,
        grid: GridId,
        id: ChunkId,
        create: impl FnOnce() -> Chunk,
        f: impl FnOnce(&mut Chunk) -> Result<R>,
    ) -> Result<R> {
        let mut state = self.state.lock();
        let key = (grid, id);
        let excluding = HashSet::from([key]);

        if !state.make_resident(key)? {
            let chunk = create();
            let bytes = chunk.estimated_bytes();
            state.reserve(bytes, &excluding)?;
            state.insert(key, chunk, bytes, true);
        }

        let growth = state
            .resident
            .peek(&key)
            .map(|r| r.chunk.set_growth_bound())
            .unwrap_or(0);
        state.reserve(growth, &excluding)?;

        let result = state.update(key, f)?;
        state.settle(&excluding);
        Ok(result)
    }

    /// Replace a chunk wholesale.
    pub(crate) fn replace(&self, grid: GridId, id: ChunkId, chunk: Chunk) -> Result<()> {
        let mut state = self.state.lock();
        let key = (grid, id);
        let excluding = HashSet::from([key]);
        let old_bytes = state.resident.peek(&key).map(|r| r.bytes).unwrap_or(0);
        let bytes = chunk.estimated_bytes();
        state.reserve(bytes.saturating_sub(old_bytes), &excluding)?;
        if let Some(old) = state.resident.pop(&key) {
            state.used_bytes -= old.bytes;
        }
        state.insert(key, chunk, bytes, true);
        Ok(())
    }

    /// Chunk ids of a grid that are resident or persisted.
    pub(crate) fn touched_chunk_ids(&self, grid: GridId) -> Result<BTreeSet<ChunkId>> {
        let state = self.state.lock();
        let entry = state.grids.get(&grid).ok_or(GridStoreError::UnknownGrid(grid.0))?;
        let mut ids = entry.swapped.clone();
        ids.extend(state.keys_of(grid).into_iter().map(|(_, id)| id));
        Ok(ids)
    }

    /// Store every changed resident chunk of a grid, keeping it resident.
    pub(crate) fn flush_grid(&self, grid: GridId) -> Result<usize> {
        let mut state = self.state.lock();
        let mut flushed = 0;
        for key in state.keys_of(grid) {
            if state.store_resident(key)? {
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Swap out every resident chunk of a grid.
    pub(crate) fn evict_grid(&self, grid: GridId) -> Result<usize> {
        let mut state = self.state.lock();
        let mut evicted = 0;
        for key in state.keys_of(grid) {
            state.evict(key)?;
            evicted += 1;
        }
        Ok(evicted)
    }
}

impl ManagerState {
    fn stats(&self) -> MemoryStats {
        MemoryStats {
            hits: self.hits,
            loads: self.loads,
            evictions: self.evictions,
            stores: self.stores,
            resident_chunks: self.resident.len(),
            used_bytes: self.used_bytes,
            budget_bytes: self.budget_bytes,
        }
    }

    fn keys_of(&self, grid: GridId) -> Vec<ChunkKey> {
        self.resident
            .iter()
            .filter(|((g, _), _)| *g == grid)
            .map(|(key, _)| *key)
            .collect()
    }

    fn insert(&mut self, key: ChunkKey, chunk: Chunk, bytes: usize, dirty: bool) {
        if let Some(old) = self.resident.put(key, ResidentChunk { chunk, bytes, dirty }) {
            self.used_bytes -= old.bytes;
        }
        self.used_bytes += bytes;
    }

    /// Ensure a chunk is resident. `false` means it has never been written.
    fn make_resident(&mut self, key: ChunkKey) -> Result<bool> {
        if self.resident.get(&key).is_some() {
            self.hits += 1;
            return Ok(true);
        }
        let (grid, id) = key;
        let entry = self.grids.get(&grid).ok_or(GridStoreError::UnknownGrid(grid.0))?;
        if !entry.swapped.contains(&id) {
            return Ok(false);
        }
        let store = Arc::clone(&entry.store);
        let expected = entry.layout.chunk_shape(id);
        let chunk = store.load(grid, id)?;
        if chunk.shape() != expected {
            return Err(GridStoreError::corrupt(format!(
                "{grid} chunk {id} loaded as {}x{}, expected {}x{}",
                chunk.shape().0,
                chunk.shape().1,
                expected.0,
                expected.1
            )));
        }
        let bytes = chunk.estimated_bytes();
        self.reserve(bytes, &HashSet::from([key]))?;
        self.loads += 1;
        tracing::debug!(%grid, chunk = %id, kind = %chunk.kind(), bytes, "loaded chunk");
        self.insert(key, chunk, bytes, false);
        Ok(true)
    }

    /// Apply `f` to a resident chunk and re-account its size.
    fn update<R>(&mut self, key: ChunkKey, f: impl FnOnce(&mut Chunk) -> Result<R>) -> Result<R> {
        let resident = self
            .resident
            .get_mut(&key)
            .ok_or(GridStoreError::UnknownGrid(key.0 .0))?;
        let result = f(&mut resident.chunk)?;
        let bytes = resident.chunk.estimated_bytes();
        let old = std::mem::replace(&mut resident.bytes, bytes);
        resident.dirty = true;
        self.used_bytes = self.used_bytes - old + bytes;
        Ok(result)
    }

    /// Make room for `bytes` more bytes.
    fn reserve(&mut self, bytes: usize, excluding: &HashSet<ChunkKey>) -> Result<()> {
        let evicted = self.free_until(
            |s| s.used_bytes.saturating_add(bytes) <= s.budget_bytes,
            excluding,
            bytes,
        )?;
        if evicted > 0 {
            tracing::debug!(evicted, requested = bytes, "reclaimed memory");
        }
        Ok(())
    }

    /// Bring usage back under budget after a mutation; overshoot is tolerated.
    fn settle(&mut self, excluding: &HashSet<ChunkKey>) {
        if self.used_bytes <= self.budget_bytes {
            return;
        }
        if let Err(e) = self.free_until(|s| s.used_bytes <= s.budget_bytes, excluding, 0) {
            tracing::warn!(
                used = self.used_bytes,
                budget = self.budget_bytes,
                error = %e,
                "memory budget exceeded after update"
            );
        }
    }

    fn free_until(
        &mut self,
        mut predicate: impl FnMut(&Self) -> bool,
        excluding: &HashSet<ChunkKey>,
        requested_bytes: usize,
    ) -> Result<usize> {
        let mut evicted = 0;
        while !predicate(self) {
            if !self.evict_one(excluding)? {
                return Err(GridStoreError::ResourceExhausted {
                    requested_bytes,
                    used_bytes: self.used_bytes,
                    budget_bytes: self.budget_bytes,
                });
            }
            evicted += 1;
        }
        Ok(evicted)
    }

    /// Least recently used chunk outside `excluding`, preferring chunks that
    /// are worth swapping (singletons cost next to nothing to keep).
    fn pick_victim(&self, excluding: &HashSet<ChunkKey>) -> Option<ChunkKey> {
        let mut fallback = None;
        for (key, resident) in self.resident.iter().rev() {
            if excluding.contains(key) {
                continue;
            }
            if resident.chunk.kind() != ChunkKind::Singleton {
                return Some(*key);
            }
            fallback.get_or_insert(*key);
        }
        fallback
    }

    fn evict_one(&mut self, excluding: &HashSet<ChunkKey>) -> Result<bool> {
        match self.pick_victim(excluding) {
            Some(key) => {
                self.evict(key)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Persist a resident chunk if its stored copy is out of date.
    /// Returns whether anything was written.
    fn store_resident(&mut self, key: ChunkKey) -> Result<bool> {
        let (grid, id) = key;
        let Some(resident) = self.resident.peek_mut(&key) else {
            return Ok(false);
        };
        let entry = self.grids.get_mut(&grid).ok_or(GridStoreError::UnknownGrid(grid.0))?;
        if !resident.dirty && entry.swapped.contains(&id) {
            return Ok(false);
        }
        entry.store.store(grid, id, &resident.chunk)?;
        entry.swapped.insert(id);
        resident.dirty = false;
        self.stores += 1;
        Ok(true)
    }

    /// Store (if needed) and drop one resident chunk.
    fn evict(&mut self, key: ChunkKey) -> Result<()> {
        self.store_resident(key)?;
        if let Some(resident) = self.resident.pop(&key) {
            self.used_bytes -= resident.bytes;
            self.evictions += 1;
            tracing::debug!(
                grid = %key.0,
                chunk = %key.1,
                kind = %resident.chunk.kind(),
                bytes = resident.bytes,
                "evicted chunk"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryChunkStore;

    fn dense_chunk(fill: f64) -> Chunk {
        Chunk::Dense(crate::chunk::DenseChunk::new(4, 4, fill))
    }

    /// Layout whose chunks all match `dense_chunk`.
    fn layout() -> ChunkLayout {
        ChunkLayout::new(16, 16, 4, 4).unwrap()
    }

    fn setup(budget: usize) -> (MemoryManager, Arc<InMemoryChunkStore>, GridId) {
        let manager = MemoryManager::new(budget);
        let store = Arc::new(InMemoryChunkStore::new());
        let grid = manager.register_grid(store.clone(), layout());
        (manager, store, grid)
    }

    #[test]
    fn test_write_then_read() {
        let (manager, _, grid) = setup(usize::MAX);
        let id = ChunkId::new(0, 0);
        assert_eq!(manager.read(grid, id, |c| c.get(0, 0)).unwrap().transpose().unwrap(), None);

        manager
            .write(grid, id, || dense_chunk(0.0), |c| c.set(1, 1, 5.0, -1.0))
            .unwrap();
        let value = manager.read(grid, id, |c| c.get(1, 1)).unwrap().unwrap().unwrap();
        assert_eq!(value, 5.0);
        assert_eq!(manager.stats().resident_chunks, 1);
    }

    #[test]
    fn test_budget_evicts_least_recently_used() {
        let one = dense_chunk(0.0).estimated_bytes();
        let (manager, store, grid) = setup(one * 2);

        for col in 0..3 {
            manager
                .write(grid, ChunkId::new(0, col), || dense_chunk(col as f64), |_| Ok(()))
                .unwrap();
        }

        assert!(!manager.is_resident(grid, ChunkId::new(0, 0)));
        assert!(manager.is_resident(grid, ChunkId::new(0, 2)));
        assert!(store.contains(grid, ChunkId::new(0, 0)));
        assert_eq!(manager.stats().evictions, 1);

        // Reading the evicted chunk brings it back with its values.
        let value = manager
            .read(grid, ChunkId::new(0, 0), |c| c.get(3, 3))
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(value, 0.0);
        assert_eq!(manager.stats().loads, 1);
    }

    #[test]
    fn test_exclusion_set_is_respected() {
        let (manager, _, grid) = setup(usize::MAX);
        let a = ChunkId::new(0, 0);
        let b = ChunkId::new(0, 1);
        for id in [a, b] {
            manager.write(grid, id, || dense_chunk(1.0), |_| Ok(())).unwrap();
        }

        let excluding = HashSet::from([(grid, a), (grid, b)]);
        assert!(!manager.try_free_one_chunk(&excluding).unwrap());

        let excluding = HashSet::from([(grid, a)]);
        assert!(manager.try_free_one_chunk(&excluding).unwrap());
        assert!(manager.is_resident(grid, a));
        assert!(!manager.is_resident(grid, b));
    }

    #[test]
    fn test_exhaustion_aborts_before_mutation() {
        let (manager, _, grid) = setup(16);
        let err = manager
            .write(grid, ChunkId::new(0, 0), || dense_chunk(0.0), |_| Ok(()))
            .unwrap_err();
        assert!(err.is_exhausted());
        assert_eq!(manager.stats().resident_chunks, 0);
        assert_eq!(manager.stats().used_bytes, 0);
    }

    #[test]
    fn test_free_until_reports_exhaustion() {
        let (manager, _, grid) = setup(usize::MAX);
        manager
            .write(grid, ChunkId::new(0, 0), || dense_chunk(1.0), |_| Ok(()))
            .unwrap();
        let evicted = manager
            .free_until(|s| s.resident_chunks == 0, &HashSet::new())
            .unwrap();
        assert_eq!(evicted, 1);

        let err = manager
            .free_until(|s| s.resident_chunks > 5, &HashSet::new())
            .unwrap_err();
        assert!(err.is_exhausted());
    }

    #[test]
    fn test_singletons_are_evicted_last() {
        let (manager, _, grid) = setup(usize::MAX);
        let single = ChunkId::new(0, 0);
        let dense = ChunkId::new(0, 1);
        manager
            .write(grid, single, || Chunk::singleton(4, 4, 1.0), |_| Ok(()))
            .unwrap();
        manager.write(grid, dense, || dense_chunk(1.0), |_| Ok(())).unwrap();

        assert!(manager.try_free_one_chunk(&HashSet::new()).unwrap());
        assert!(manager.is_resident(grid, single));
        assert!(manager.try_free_one_chunk(&HashSet::new()).unwrap());
        assert!(!manager.is_resident(grid, single));
    }

    #[test]
    fn test_clean_chunks_are_not_restored() {
        let (manager, _, grid) = setup(usize::MAX);
        let id = ChunkId::new(0, 0);
        manager.write(grid, id, || dense_chunk(2.0), |_| Ok(())).unwrap();
        manager.evict_grid(grid).unwrap();
        assert_eq!(manager.stats().stores, 1);

        manager.read(grid, id, |_| ()).unwrap();
        manager.evict_grid(grid).unwrap();
        assert_eq!(manager.stats().stores, 1);
        assert_eq!(manager.stats().evictions, 2);
    }

    #[test]
    fn test_loaded_chunk_with_wrong_shape_is_corrupt() {
        let (manager, store, grid) = setup(usize::MAX);
        let id = ChunkId::new(0, 0);
        manager.write(grid, id, || dense_chunk(2.0), |_| Ok(())).unwrap();
        manager.evict_grid(grid).unwrap();
        store.store(grid, id, &Chunk::singleton(2, 3, 2.0)).unwrap();

        assert!(matches!(
            manager.read(grid, id, |c| c.get(0, 0)),
            Err(GridStoreError::CorruptPersistedChunk(_))
        ));
        assert!(!manager.is_resident(grid, id));
    }

    #[test]
    fn test_unregister_releases_memory_and_store() {
        let (manager, store, grid) = setup(usize::MAX);
        manager
            .write(grid, ChunkId::new(0, 0), || dense_chunk(2.0), |_| Ok(()))
            .unwrap();
        manager.flush_grid(grid).unwrap();
        assert_eq!(store.len(), 1);

        manager.unregister_grid(grid);
        assert_eq!(manager.stats().used_bytes, 0);
        assert!(store.is_empty());
        assert!(matches!(
            manager.read(grid, ChunkId::new(0, 0), |_| ()),
            Err(GridStoreError::UnknownGrid(_))
        ));
    }

    #[test]
    fn test_eviction_spans_grids() {
        let one = dense_chunk(0.0).estimated_bytes();
        let manager = MemoryManager::new(one);
        let store = Arc::new(InMemoryChunkStore::new());
        let first = manager.register_grid(store.clone(), layout());
        let second = manager.register_grid(store.clone(), layout());

        manager
            .write(first, ChunkId::new(0, 0), || dense_chunk(1.0), |_| Ok(()))
            .unwrap();
        manager
            .write(second, ChunkId::new(0, 0), || dense_chunk(2.0), |_| Ok(()))
            .unwrap();

        assert!(!manager.is_resident(first, ChunkId::new(0, 0)));
        assert!(store.contains(first, ChunkId::new(0, 0)));
    }
}
