//! Mapping between global cell coordinates and chunk coordinates.
//!
//! All chunks share one extent except those in the last chunk row or column,
//! which are cut short by the grid boundary.

use serde::{Deserialize, Serialize};

use crate::error::{GridStoreError, Result};
use crate::types::{CellId, ChunkId};

/// Pure coordinate arithmetic for a grid split into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLayout {
    nrows: i64,
    ncols: i64,
    chunk_nrows: u32,
    chunk_ncols: u32,
    n_chunk_rows: u32,
    n_chunk_cols: u32,
}

/// A global cell resolved to its chunk and its position inside that chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellLocation {
    pub chunk: ChunkId,
    pub row: u32,
    pub col: u32,
}

impl ChunkLayout {
    /// Create a layout for an `nrows` x `ncols` grid of `chunk_nrows` x `chunk_ncols` chunks.
    pub fn new(nrows: i64, ncols: i64, chunk_nrows: u32, chunk_ncols: u32) -> Result<Self> {
        if nrows < 0 || ncols < 0 {
            return Err(GridStoreError::config(format!(
                "grid extent must be non-negative, got {nrows}x{ncols}"
            )));
        }
        if chunk_nrows == 0 || chunk_ncols == 0 {
            return Err(GridStoreError::config("chunk extent must be > 0"));
        }

        let n_chunk_rows = div_ceil(nrows, chunk_nrows as i64);
        let n_chunk_cols = div_ceil(ncols, chunk_ncols as i64);
        let n_chunk_rows = u32::try_from(n_chunk_rows).map_err(|_| {
            GridStoreError::config(format!("{n_chunk_rows} chunk rows exceed the chunk id range"))
        })?;
        let n_chunk_cols = u32::try_from(n_chunk_cols).map_err(|_| {
            GridStoreError::config(format!("{n_chunk_cols} chunk columns exceed the chunk id range"))
        })?;

        Ok(Self {
            nrows,
            ncols,
            chunk_nrows,
            chunk_ncols,
            n_chunk_rows,
            n_chunk_cols,
        })
    }

    pub fn nrows(&self) -> i64 {
        self.nrows
    }

    pub fn ncols(&self) -> i64 {
        self.ncols
    }

    /// Nominal chunk row count (all but the last chunk row).
    pub fn chunk_nrows(&self) -> u32 {
        self.chunk_nrows
    }

    /// Nominal chunk column count (all but the last chunk column).
    pub fn chunk_ncols(&self) -> u32 {
        self.chunk_ncols
    }

    pub fn n_chunk_rows(&self) -> u32 {
        self.n_chunk_rows
    }

    pub fn n_chunk_cols(&self) -> u32 {
        self.n_chunk_cols
    }

    /// Total number of cells.
    pub fn n_cells(&self) -> u128 {
        self.nrows as u128 * self.ncols as u128
    }

    /// Check whether a cell lies inside the grid.
    pub fn contains(&self, row: i64, col: i64) -> bool {
        (0..self.nrows).contains(&row) && (0..self.ncols).contains(&col)
    }

    fn check(&self, row: i64, col: i64) -> Result<()> {
        if self.contains(row, col) {
            Ok(())
        } else {
            Err(GridStoreError::out_of_range(row, col, self.nrows, self.ncols))
        }
    }

    /// Chunk row holding global row `row`.
    pub fn chunk_row(&self, row: i64) -> Result<u32> {
        self.check_row(row)?;
        Ok((row / self.chunk_nrows as i64) as u32)
    }

    /// Chunk column holding global column `col`.
    pub fn chunk_col(&self, col: i64) -> Result<u32> {
        self.check_col(col)?;
        Ok((col / self.chunk_ncols as i64) as u32)
    }

    /// Row of `row` inside its chunk.
    pub fn cell_row(&self, row: i64) -> Result<u32> {
        let chunk_row = self.chunk_row(row)?;
        Ok((row - chunk_row as i64 * self.chunk_nrows as i64) as u32)
    }

    /// Column of `col` inside its chunk.
    pub fn cell_col(&self, col: i64) -> Result<u32> {
        let chunk_col = self.chunk_col(col)?;
        Ok((col - chunk_col as i64 * self.chunk_ncols as i64) as u32)
    }

    fn check_row(&self, row: i64) -> Result<()> {
        if (0..self.nrows).contains(&row) {
            Ok(())
        } else {
            Err(GridStoreError::out_of_range(row, 0, self.nrows, self.ncols))
        }
    }

    fn check_col(&self, col: i64) -> Result<()> {
        if (0..self.ncols).contains(&col) {
            Ok(())
        } else {
            Err(GridStoreError::out_of_range(0, col, self.nrows, self.ncols))
        }
    }

    /// Resolve a global cell to its chunk and intra-chunk position.
    pub fn locate(&self, row: i64, col: i64) -> Result<CellLocation> {
        self.check(row, col)?;
        let chunk_row = (row / self.chunk_nrows as i64) as u32;
        let chunk_col = (col / self.chunk_ncols as i64) as u32;
        Ok(CellLocation {
            chunk: ChunkId::new(chunk_row, chunk_col),
            row: (row - chunk_row as i64 * self.chunk_nrows as i64) as u32,
            col: (col - chunk_col as i64 * self.chunk_ncols as i64) as u32,
        })
    }

    /// Inverse of [`locate`](Self::locate).
    pub fn global(&self, chunk: ChunkId, row: u32, col: u32) -> CellId {
        CellId::new(
            chunk.row as i64 * self.chunk_nrows as i64 + row as i64,
            chunk.col as i64 * self.chunk_ncols as i64 + col as i64,
        )
    }

    /// Check that a chunk id lies inside the chunk lattice.
    pub fn contains_chunk(&self, chunk: ChunkId) -> bool {
        chunk.row < self.n_chunk_rows && chunk.col < self.n_chunk_cols
    }

    /// Actual row count of chunks in chunk row `chunk_row` (short at the top edge).
    pub fn chunk_nrows_of(&self, chunk_row: u32) -> u32 {
        let start = chunk_row as i64 * self.chunk_nrows as i64;
        (self.nrows - start).clamp(0, self.chunk_nrows as i64) as u32
    }

    /// Actual column count of chunks in chunk column `chunk_col` (short at the right edge).
    pub fn chunk_ncols_of(&self, chunk_col: u32) -> u32 {
        let start = chunk_col as i64 * self.chunk_ncols as i64;
        (self.ncols - start).clamp(0, self.chunk_ncols as i64) as u32
    }

    /// Actual (rows, cols) extent of a chunk.
    pub fn chunk_shape(&self, chunk: ChunkId) -> (u32, u32) {
        (self.chunk_nrows_of(chunk.row), self.chunk_ncols_of(chunk.col))
    }

    /// All chunk ids in row-major order.
    pub fn chunk_ids(&self) -> impl Iterator<Item = ChunkId> + '_ {
        (0..self.n_chunk_rows)
            .flat_map(move |row| (0..self.n_chunk_cols).map(move |col| ChunkId::new(row, col)))
    }
}

fn div_ceil(n: i64, d: i64) -> i64 {
    n / d + i64::from(n % d != 0)
}
