//! In-process chunk store holding encoded chunk bytes.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::chunk::{decode_chunk, encode_chunk, Chunk};
use crate::error::{GridStoreError, Result};
use crate::types::{ChunkId, GridId};

use super::ChunkStore;

/// Keeps persisted chunks in memory, in the same encoded form the
/// filesystem store writes.
#[derive(Debug, Default)]
pub struct InMemoryChunkStore {
    chunks: Mutex<HashMap<(GridId, ChunkId), Bytes>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks held.
    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }

    /// Check whether a chunk has been stored.
    pub fn contains(&self, grid: GridId, id: ChunkId) -> bool {
        self.chunks.lock().contains_key(&(grid, id))
    }

    /// Encoded bytes of a stored chunk.
    pub fn raw(&self, grid: GridId, id: ChunkId) -> Option<Bytes> {
        self.chunks.lock().get(&(grid, id)).cloned()
    }

    /// Overwrite the encoded bytes of a chunk.
    pub fn put_raw(&self, grid: GridId, id: ChunkId, bytes: Bytes) {
        self.chunks.lock().insert((grid, id), bytes);
    }
}

impl ChunkStore for InMemoryChunkStore {
    fn store(&self, grid: GridId, id: ChunkId, chunk: &Chunk) -> Result<()> {
        self.chunks.lock().insert((grid, id), encode_chunk(chunk));
        Ok(())
    }

    fn load(&self, grid: GridId, id: ChunkId) -> Result<Chunk> {
        let bytes = self
            .raw(grid, id)
            .ok_or_else(|| GridStoreError::ChunkNotFound(format!("{grid} chunk {id}")))?;
        decode_chunk(&bytes)
    }

    fn remove_grid(&self, grid: GridId) -> Result<()> {
        self.chunks.lock().retain(|(g, _), _| *g != grid);
        Ok(())
    }
}
