//! Chunk persistence providers.
//!
//! The memory manager swaps chunks out through a [`ChunkStore`] and reads
//! them back on the next touch. A store only ever sees whole chunks, keyed by
//! the owning grid and the chunk id.

mod filesystem;
mod memory;

pub use filesystem::FilesystemChunkStore;
pub use memory::InMemoryChunkStore;

use crate::chunk::Chunk;
use crate::error::Result;
use crate::types::{ChunkId, GridId};

/// Load/store one chunk by identifier.
///
/// `load` must return a chunk observably identical to the one last passed to
/// `store` for the same key.
pub trait ChunkStore: Send + Sync {
    /// Persist a chunk, replacing any earlier copy.
    fn store(&self, grid: GridId, id: ChunkId, chunk: &Chunk) -> Result<()>;

    /// Read a chunk back.
    fn load(&self, grid: GridId, id: ChunkId) -> Result<Chunk>;

    /// Record grid-level metadata next to the chunks.
    fn store_metadata(&self, _grid: GridId, _metadata: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    /// Drop everything persisted for a grid.
    fn remove_grid(&self, grid: GridId) -> Result<()>;
}
