//! Singleton chunk: every cell holds the same value.

use crate::error::Result;

use super::{position, SparseChunk};

#[derive(Debug, Clone, PartialEq)]
pub struct SingletonChunk {
    nrows: u32,
    ncols: u32,
    value: f64,
}

impl SingletonChunk {
    pub fn new(nrows: u32, ncols: u32, value: f64) -> Self {
        Self {
            nrows,
            ncols,
            value,
        }
    }

    pub fn shape(&self) -> (u32, u32) {
        (self.nrows, self.ncols)
    }

    pub fn n_cells(&self) -> usize {
        self.nrows as usize * self.ncols as usize
    }

    /// The value held by every cell.
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn get(&self, row: u32, col: u32) -> Result<f64> {
        position(self.nrows, self.ncols, row, col)?;
        Ok(self.value)
    }

    /// Sparse-mapped equivalent defaulting to the singleton value.
    pub(crate) fn to_sparse(&self, no_data_value: f64) -> SparseChunk {
        SparseChunk::new(self.nrows, self.ncols, self.value, no_data_value)
    }
}
