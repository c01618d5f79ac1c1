//! Bulk import from a stream of cell values.

use std::sync::Arc;

use crate::config::GridStoreConfig;
use crate::error::{GridStoreError, Result};
use crate::memory::MemoryManager;
use crate::store::ChunkStore;
use crate::types::GridDimensions;

use super::{Grid, GridSpec};

/// Shape and no-data value declared by a value source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceHeader {
    pub nrows: i64,
    pub ncols: i64,
    pub no_data_value: f64,
    pub dimensions: GridDimensions,
}

/// Producer of grid values for bulk import.
///
/// Values arrive bottom row first, left to right within a row, so the
/// `k`-th value belongs to row `k / ncols`, column `k % ncols`.
pub trait CellValueSource {
    fn header(&self) -> &SourceHeader;

    /// Next value, or `None` once the source is exhausted.
    fn next_value(&mut self) -> Result<Option<f64>>;
}

/// A value source backed by a vector.
#[derive(Debug, Clone)]
pub struct VecSource {
    header: SourceHeader,
    values: std::vec::IntoIter<f64>,
}

impl VecSource {
    pub fn new(header: SourceHeader, values: Vec<f64>) -> Self {
        Self {
            header,
            values: values.into_iter(),
        }
    }
}

impl CellValueSource for VecSource {
    fn header(&self) -> &SourceHeader {
        &self.header
    }

    fn next_value(&mut self) -> Result<Option<f64>> {
        Ok(self.values.next())
    }
}

impl Grid {
    /// Build a grid from a value source.
    ///
    /// Extent, no-data value and spatial reference come from the source
    /// header; chunk shape and statistics mode come from `config`. Source
    /// no-data values become the grid's no-data value. Statistics are
    /// computed once, after the last value.
    pub fn from_source<S>(
        manager: &MemoryManager,
        store: Arc<dyn ChunkStore>,
        source: &mut S,
        config: &GridStoreConfig,
    ) -> Result<Self>
    where
        S: CellValueSource + ?Sized,
    {
        let header = *source.header();
        let spec = GridSpec::from_config(header.nrows, header.ncols, config)
            .with_no_data_value(header.no_data_value)
            .with_dimensions(header.dimensions);
        let mut grid = Grid::new(manager, store, spec)?;
        let no_data_value = grid.no_data_value();

        let expected = u128::from(header.nrows.unsigned_abs()) * u128::from(header.ncols.unsigned_abs());
        let ncols = header.ncols;
        let mut row = 0;
        let mut col = 0;
        let mut read: u128 = 0;
        while read < expected {
            let Some(value) = source.next_value()? else {
                return Err(GridStoreError::import(format!(
                    "source ended after {read} of {expected} values"
                )));
            };
            // A fresh grid is all no-data already.
            if value != header.no_data_value && !value.is_nan() && value != no_data_value {
                grid.write_cell(row, col, value)?;
            }
            read += 1;
            col += 1;
            if col == ncols {
                col = 0;
                row += 1;
            }
        }

        if source.next_value()?.is_some() {
            tracing::warn!(grid = %grid.id(), expected, "source holds more values than its header declares");
        }

        grid.recompute_statistics()?;
        let stats = grid.statistics_snapshot();
        tracing::info!(
            grid = %grid.id(),
            nrows = header.nrows,
            ncols = header.ncols,
            data_cells = stats.count,
            "imported grid"
        );
        Ok(grid)
    }
}
