//! Dense chunk: one value per cell in a row-major array.

use crate::error::Result;

use super::position;

#[derive(Debug, Clone, PartialEq)]
pub struct DenseChunk {
    nrows: u32,
    ncols: u32,
    values: Vec<f64>,
}

impl DenseChunk {
    /// Create a chunk with every cell set to `fill`.
    pub fn new(nrows: u32, ncols: u32, fill: f64) -> Self {
        Self {
            nrows,
            ncols,
            values: vec![fill; nrows as usize * ncols as usize],
        }
    }

    /// Wrap row-major values. `values.len()` must equal `nrows * ncols`.
    pub(crate) fn from_vec(nrows: u32, ncols: u32, values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), nrows as usize * ncols as usize);
        Self {
            nrows,
            ncols,
            values,
        }
    }

    pub fn shape(&self) -> (u32, u32) {
        (self.nrows, self.ncols)
    }

    pub fn n_cells(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, row: u32, col: u32) -> Result<f64> {
        let pos = position(self.nrows, self.ncols, row, col)?;
        Ok(self.values[pos])
    }

    pub fn set(&mut self, row: u32, col: u32, value: f64) -> Result<f64> {
        let pos = position(self.nrows, self.ncols, row, col)?;
        Ok(std::mem::replace(&mut self.values[pos], value))
    }

    /// Row-major values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_row_major_layout() {
        let mut chunk = DenseChunk::new(2, 3, 0.0);
        chunk.set(1, 0, 4.0).unwrap();
        assert_eq!(chunk.values(), &[0.0, 0.0, 0.0, 4.0, 0.0, 0.0]);
        assert_eq!(chunk.shape(), (2, 3));
    }
}
