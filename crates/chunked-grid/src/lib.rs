//! Out-of-core chunked raster grids.
//!
//! This crate stores large two-dimensional `f64` grids that need not fit in
//! memory. A grid is split into rectangular chunks; a shared
//! [`MemoryManager`] keeps a working set of chunks resident within a byte
//! budget and swaps the rest out through a [`ChunkStore`]. It enables:
//!
//! - **Compact chunks**: dense arrays, single-value chunks, and a sparse
//!   encoding keyed by value, converted as the data changes
//! - **Transparent paging**: evicted chunks reload on first touch
//! - **Incremental statistics**: count, sum, min and max without rescans
//! - **Nearest-value search**: ring expansion with exact tie handling
//!
//! # Architecture
//!
//! ```text
//! Grid::set_cell(row, col, v)
//!      │
//!      ├─► ChunkLayout::locate (O(1) arithmetic)
//!      │
//!      ├─► MemoryManager::write(grid, chunk)
//!      │         │
//!      │         ├─► Resident: use it
//!      │         ├─► Swapped: ChunkStore::load
//!      │         ├─► Never touched: new Singleton(no-data)
//!      │         │
//!      │         └─► Reserve growth, evicting LRU chunks via ChunkStore::store
//!      │
//!      └─► StatisticsTracker::record_set(previous, v)
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use chunked_grid::{Grid, GridSpec, InMemoryChunkStore, MemoryManager};
//!
//! let manager = MemoryManager::new(64 * 1024 * 1024);
//! let store = Arc::new(InMemoryChunkStore::new());
//! let mut grid = Grid::new(&manager, store, GridSpec::new(1000, 1000)).unwrap();
//!
//! grid.set_cell(10, 20, 4.5).unwrap();
//! assert_eq!(grid.get_cell(10, 20).unwrap(), 4.5);
//! assert_eq!(grid.statistics().unwrap().count, 1);
//! ```

pub mod chunk;
pub mod config;
pub mod error;
pub mod grid;
pub mod layout;
pub mod memory;
pub mod stats;
pub mod store;
pub mod types;

// Re-export commonly used types at crate root
pub use chunk::{Chunk, ChunkKind, DenseChunk, SingletonChunk, SparseChunk};
pub use config::GridStoreConfig;
pub use error::{GridStoreError, Result};
pub use grid::{CellValueSource, Grid, GridSpec, NearestValue, SourceHeader, VecSource};
pub use layout::{CellLocation, ChunkLayout};
pub use memory::MemoryManager;
pub use stats::{GridStatistics, StatisticsMode, StatisticsTracker};
pub use store::{ChunkStore, FilesystemChunkStore, InMemoryChunkStore};
pub use types::{
    CellId, ChunkId, ChunkKey, GridDimensions, GridId, MemoryStats, DEFAULT_NO_DATA_VALUE,
};
