//! Core types for chunked grids.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Default no-data sentinel, used when a grid is given none or an invalid one.
pub const DEFAULT_NO_DATA_VALUE: f64 = -f64::MAX;

/// Identifier of a grid registered with a [`MemoryManager`](crate::MemoryManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GridId(pub u64);

impl GridId {
    /// A fresh id, unique within the process across every manager.
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for GridId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "grid-{}", self.0)
    }
}

/// Position of a chunk in the chunk lattice: (chunk row, chunk column).
///
/// Ordered row-major so that eviction and reporting are deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkId {
    pub row: u32,
    pub col: u32,
}

impl ChunkId {
    /// Create a new chunk id.
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Cache key for resident chunks: which grid, which chunk.
pub type ChunkKey = (GridId, ChunkId);

/// Global cell position in a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellId {
    pub row: i64,
    pub col: i64,
}

impl CellId {
    /// Create a new cell id.
    pub fn new(row: i64, col: i64) -> Self {
        Self { row, col }
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.row, self.col)
    }
}

/// Spatial reference of a grid: square cell size and lower-left origin.
///
/// Row 0 is the bottom row, so y grows with the row index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridDimensions {
    pub cellsize: f64,
    pub xmin: f64,
    pub ymin: f64,
}

impl GridDimensions {
    /// Create a new spatial reference.
    pub fn new(cellsize: f64, xmin: f64, ymin: f64) -> Self {
        Self {
            cellsize,
            xmin,
            ymin,
        }
    }

    /// X coordinate of the centre of column `col`.
    pub fn cell_x(&self, col: i64) -> f64 {
        self.xmin + (col as f64 + 0.5) * self.cellsize
    }

    /// Y coordinate of the centre of row `row`.
    pub fn cell_y(&self, row: i64) -> f64 {
        self.ymin + (row as f64 + 0.5) * self.cellsize
    }

    /// Column containing `x`. May be negative or beyond the grid.
    pub fn col_of(&self, x: f64) -> i64 {
        ((x - self.xmin) / self.cellsize).floor() as i64
    }

    /// Row containing `y`. May be negative or beyond the grid.
    pub fn row_of(&self, y: f64) -> i64 {
        ((y - self.ymin) / self.cellsize).floor() as i64
    }

    /// Euclidean distance between two points.
    pub fn distance(x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
        (x1 - x2).hypot(y1 - y2)
    }
}

impl Default for GridDimensions {
    fn default() -> Self {
        Self::new(1.0, 0.0, 0.0)
    }
}

/// Statistics about chunk residency across all grids of a memory manager.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryStats {
    /// Reads and writes served by an already resident chunk.
    pub hits: u64,
    /// Chunks brought back from a store.
    pub loads: u64,
    /// Chunks removed from memory.
    pub evictions: u64,
    /// Chunks written to a store.
    pub stores: u64,
    pub resident_chunks: usize,
    pub used_bytes: usize,
    pub budget_bytes: usize,
}

impl MemoryStats {
    /// Fraction of chunk accesses that did not need a load (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.loads;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Bytes still available under the budget.
    pub fn headroom(&self) -> usize {
        self.budget_bytes.saturating_sub(self.used_bytes)
    }
}
