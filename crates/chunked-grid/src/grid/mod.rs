//! Chunked grids: cell access, statistics and paging through a shared
//! [`MemoryManager`].

mod import;
mod search;

pub use import::{CellValueSource, SourceHeader, VecSource};
pub use search::NearestValue;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chunk::{Chunk, ChunkKind};
use crate::config::GridStoreConfig;
use crate::error::{GridStoreError, Result};
use crate::layout::ChunkLayout;
use crate::memory::MemoryManager;
use crate::stats::{GridStatistics, StatisticsMode, StatisticsTracker};
use crate::store::ChunkStore;
use crate::types::{CellId, ChunkId, GridDimensions, GridId, DEFAULT_NO_DATA_VALUE};

/// Shape and settings of a grid. Written to the grid's store as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub nrows: i64,
    pub ncols: i64,
    pub chunk_nrows: u32,
    pub chunk_ncols: u32,
    pub no_data_value: f64,
    pub dimensions: GridDimensions,
    pub statistics: StatisticsMode,
}

impl GridSpec {
    /// An `nrows` x `ncols` grid with 256 x 256 chunks and default settings.
    pub fn new(nrows: i64, ncols: i64) -> Self {
        Self {
            nrows,
            ncols,
            chunk_nrows: 256,
            chunk_ncols: 256,
            no_data_value: DEFAULT_NO_DATA_VALUE,
            dimensions: GridDimensions::default(),
            statistics: StatisticsMode::Exact,
        }
    }

    /// An `nrows` x `ncols` grid using the chunk shape and statistics mode
    /// of `config`.
    pub fn from_config(nrows: i64, ncols: i64, config: &GridStoreConfig) -> Self {
        Self::new(nrows, ncols)
            .with_chunk_shape(config.chunk_nrows, config.chunk_ncols)
            .with_statistics(config.statistics)
    }

    pub fn with_chunk_shape(mut self, chunk_nrows: u32, chunk_ncols: u32) -> Self {
        self.chunk_nrows = chunk_nrows;
        self.chunk_ncols = chunk_ncols;
        self
    }

    pub fn with_no_data_value(mut self, no_data_value: f64) -> Self {
        self.no_data_value = no_data_value;
        self
    }

    pub fn with_dimensions(mut self, dimensions: GridDimensions) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn with_statistics(mut self, statistics: StatisticsMode) -> Self {
        self.statistics = statistics;
        self
    }
}

/// A two-dimensional grid of `f64` values split into chunks.
///
/// The grid owns no chunks itself. Every chunk lives in the memory manager
/// it was registered with, which may swap it out to the grid's store and
/// load it back at any time without the caller noticing. Chunks are created
/// on first write; cells in chunks that were never written read as no-data.
///
/// Reads take `&self`. Writes take `&mut self` because they update the
/// statistics tracker. Dropping the grid releases its chunks and removes
/// its persisted copies.
pub struct Grid {
    manager: MemoryManager,
    id: GridId,
    layout: ChunkLayout,
    no_data_value: f64,
    dimensions: GridDimensions,
    stats: StatisticsTracker,
}

impl Grid {
    /// Create an empty grid (every cell no-data).
    pub fn new(manager: &MemoryManager, store: Arc<dyn ChunkStore>, spec: GridSpec) -> Result<Self> {
        let layout = ChunkLayout::new(spec.nrows, spec.ncols, spec.chunk_nrows, spec.chunk_ncols)?;
        let no_data_value = checked_no_data_value(spec.no_data_value);
        let id = manager.register_grid(store, layout);
        let grid = Self {
            manager: manager.clone(),
            id,
            layout,
            no_data_value,
            dimensions: spec.dimensions,
            stats: StatisticsTracker::new(spec.statistics),
        };

        let metadata = serde_json::to_value(grid.spec())?;
        grid.manager.store_metadata(id, &metadata)?;

        tracing::debug!(
            grid = %id,
            nrows = spec.nrows,
            ncols = spec.ncols,
            chunk_nrows = spec.chunk_nrows,
            chunk_ncols = spec.chunk_ncols,
            "created grid"
        );
        Ok(grid)
    }

    /// Copy `source` into a new grid described by `spec`.
    ///
    /// `spec` may change the chunk shape, no-data value or statistics mode.
    /// Data cells outside the extent of `spec` are dropped.
    pub fn from_grid(
        manager: &MemoryManager,
        store: Arc<dyn ChunkStore>,
        source: &Grid,
        spec: GridSpec,
    ) -> Result<Self> {
        let mut grid = Self::new(manager, store, spec)?;
        source.try_for_each_data_value(|cell, value| {
            if grid.layout.contains(cell.row, cell.col) {
                grid.write_cell(cell.row, cell.col, value)?;
            }
            Ok(())
        })?;
        grid.recompute_statistics()?;
        Ok(grid)
    }

    pub fn id(&self) -> GridId {
        self.id
    }

    pub fn nrows(&self) -> i64 {
        self.layout.nrows()
    }

    pub fn ncols(&self) -> i64 {
        self.layout.ncols()
    }

    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    pub fn no_data_value(&self) -> f64 {
        self.no_data_value
    }

    pub fn dimensions(&self) -> &GridDimensions {
        &self.dimensions
    }

    pub fn manager(&self) -> &MemoryManager {
        &self.manager
    }

    /// Settings this grid was created with, after no-data substitution.
    pub fn spec(&self) -> GridSpec {
        GridSpec {
            nrows: self.layout.nrows(),
            ncols: self.layout.ncols(),
            chunk_nrows: self.layout.chunk_nrows(),
            chunk_ncols: self.layout.chunk_ncols(),
            no_data_value: self.no_data_value,
            dimensions: self.dimensions,
            statistics: self.stats.mode(),
        }
    }

    fn is_data(&self, value: f64) -> bool {
        value != self.no_data_value
    }

    /// Value of a cell. Fails with `OutOfRange` outside the grid.
    pub fn get_cell(&self, row: i64, col: i64) -> Result<f64> {
        let loc = self.layout.locate(row, col)?;
        let value = self
            .manager
            .read(self.id, loc.chunk, |chunk| chunk.get(loc.row, loc.col))?
            .transpose()?;
        Ok(value.unwrap_or(self.no_data_value))
    }

    /// Value of a cell, or no-data outside the grid.
    pub fn get_cell_or_no_data(&self, row: i64, col: i64) -> Result<f64> {
        if !self.layout.contains(row, col) {
            return Ok(self.no_data_value);
        }
        self.get_cell(row, col)
    }

    /// Set a cell and return its previous value. NaN stores no-data.
    pub fn set_cell(&mut self, row: i64, col: i64, value: f64) -> Result<f64> {
        let value = self.normalise(value);
        let previous = self.write_cell(row, col, value)?;
        self.stats.record_set(previous, value, self.no_data_value);
        Ok(previous)
    }

    /// Set a cell without statistics bookkeeping.
    ///
    /// The statistics go stale and are rebuilt by the next exact read.
    pub fn init_cell(&mut self, row: i64, col: i64, value: f64) -> Result<()> {
        let value = self.normalise(value);
        self.write_cell(row, col, value)?;
        self.stats.mark_stale();
        Ok(())
    }

    /// Add `delta` to a cell and return the new value. A no-data cell
    /// becomes `delta`.
    pub fn add_to_cell(&mut self, row: i64, col: i64, delta: f64) -> Result<f64> {
        let current = self.get_cell(row, col)?;
        let value = if self.is_data(current) { current + delta } else { delta };
        self.set_cell(row, col, value)?;
        Ok(self.normalise(value))
    }

    /// Set every cell to `value`. Every chunk becomes a singleton.
    pub fn init_cells(&mut self, value: f64) -> Result<()> {
        let value = self.normalise(value);
        // Partial failure leaves a mix of old and new chunks.
        self.stats.mark_stale();
        let ids: Vec<ChunkId> = self.layout.chunk_ids().collect();
        for id in ids {
            let (nrows, ncols) = self.layout.chunk_shape(id);
            self.manager.replace(self.id, id, Chunk::singleton(nrows, ncols, value))?;
        }
        let cells = u64::try_from(self.layout.n_cells()).unwrap_or(u64::MAX);
        self.stats.reset_uniform(value, cells, self.no_data_value);
        Ok(())
    }

    fn normalise(&self, value: f64) -> f64 {
        if value.is_nan() {
            self.no_data_value
        } else {
            value
        }
    }

    fn write_cell(&mut self, row: i64, col: i64, value: f64) -> Result<f64> {
        let loc = self.layout.locate(row, col)?;
        let (nrows, ncols) = self.layout.chunk_shape(loc.chunk);
        let no_data_value = self.no_data_value;
        self.manager.write(
            self.id,
            loc.chunk,
            || Chunk::singleton(nrows, ncols, no_data_value),
            |chunk| chunk.set(loc.row, loc.col, value, no_data_value),
        )
    }

    /// Value of the cell containing point `(x, y)`, or no-data outside the grid.
    pub fn get_cell_at_point(&self, x: f64, y: f64) -> Result<f64> {
        self.get_cell_or_no_data(self.dimensions.row_of(y), self.dimensions.col_of(x))
    }

    /// Set the cell containing point `(x, y)` and return its previous value.
    pub fn set_cell_at_point(&mut self, x: f64, y: f64, value: f64) -> Result<f64> {
        self.set_cell(self.dimensions.row_of(y), self.dimensions.col_of(x), value)
    }

    /// Visit every cell holding data, chunk by chunk in chunk-id order.
    pub fn for_each_data_value<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(CellId, f64),
    {
        self.try_for_each_data_value(|cell, value| {
            f(cell, value);
            Ok(())
        })
    }

    /// Like [`Grid::for_each_data_value`], stopping at the first error `f` returns.
    ///
    /// `f` runs without any chunk borrowed, so it may touch other grids
    /// sharing the same manager.
    pub fn try_for_each_data_value<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(CellId, f64) -> Result<()>,
    {
        for id in self.manager.touched_chunk_ids(self.id)? {
            let Some(values) = self.manager.read(self.id, id, |c| c.to_dense_array())? else {
                continue;
            };
            let ncols = self.layout.chunk_ncols_of(id.col) as usize;
            for (i, value) in values.into_iter().enumerate() {
                if !self.is_data(value) {
                    continue;
                }
                let cell = self.layout.global(id, (i / ncols) as u32, (i % ncols) as u32);
                f(cell, value)?;
            }
        }
        Ok(())
    }

    /// Exact statistics, rescanning the grid first if they are stale.
    pub fn statistics(&mut self) -> Result<GridStatistics> {
        if self.stats.is_stale() {
            self.recompute_statistics()?;
        }
        Ok(self.stats.snapshot())
    }

    /// Statistics as currently tracked; min and max are absent while stale.
    pub fn statistics_snapshot(&self) -> GridStatistics {
        self.stats.snapshot()
    }

    /// Arithmetic mean of all data values.
    pub fn mean(&mut self) -> Result<Option<f64>> {
        Ok(self.statistics()?.mean())
    }

    /// Rebuild the statistics by scanning every chunk.
    pub fn recompute_statistics(&mut self) -> Result<()> {
        let mut tracker = StatisticsTracker::new(self.stats.mode());
        let mut failure = None;
        let values = self
            .manager
            .touched_chunk_ids(self.id)?
            .into_iter()
            .map_while(|id| match self.manager.read(self.id, id, |c| c.to_dense_array()) {
                Ok(values) => Some(values.unwrap_or_default()),
                Err(e) => {
                    failure = Some(e);
                    None
                }
            })
            .flatten();
        tracker.recompute(values, self.no_data_value);
        if let Some(e) = failure {
            return Err(e);
        }
        self.stats = tracker;
        Ok(())
    }

    /// Representation of a chunk, or `None` if it was never written.
    pub fn chunk_kind(&self, id: ChunkId) -> Result<Option<ChunkKind>> {
        if !self.layout.contains_chunk(id) {
            return Err(GridStoreError::out_of_range(
                i64::from(id.row),
                i64::from(id.col),
                i64::from(self.layout.n_chunk_rows()),
                i64::from(self.layout.n_chunk_cols()),
            ));
        }
        self.manager.read(self.id, id, |c| c.kind())
    }

    /// Re-encode every chunk with its cheapest representation.
    ///
    /// Returns how many chunks changed.
    pub fn optimise_chunks(&mut self) -> Result<usize> {
        let no_data_value = self.no_data_value;
        let mut changed = 0;
        for id in self.manager.touched_chunk_ids(self.id)? {
            let optimised = self.manager.read(self.id, id, |chunk| {
                let optimised = chunk.optimised(no_data_value);
                let smaller = optimised.kind() != chunk.kind()
                    || optimised.estimated_bytes() < chunk.estimated_bytes();
                smaller.then_some(optimised)
            })?;
            if let Some(chunk) = optimised.flatten() {
                self.manager.replace(self.id, id, chunk)?;
                changed += 1;
            }
        }
        tracing::debug!(grid = %self.id, changed, "optimised chunks");
        Ok(changed)
    }

    /// Store every changed chunk, keeping it resident.
    pub fn flush(&self) -> Result<usize> {
        self.manager.flush_grid(self.id)
    }

    /// Swap out every resident chunk of this grid.
    pub fn swap_out(&self) -> Result<usize> {
        self.manager.evict_grid(self.id)
    }
}

impl Drop for Grid {
    fn drop(&mut self) {
        self.manager.unregister_grid(self.id);
    }
}

impl std::fmt::Debug for Grid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Grid")
            .field("id", &self.id)
            .field("layout", &self.layout)
            .field("no_data_value", &self.no_data_value)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

/// Replace a NaN or infinite no-data value with the default.
fn checked_no_data_value(value: f64) -> f64 {
    if value.is_finite() {
        return value;
    }
    tracing::warn!(
        error = %GridStoreError::InvalidNoDataValue(value),
        default = DEFAULT_NO_DATA_VALUE,
        "using default no-data value"
    );
    DEFAULT_NO_DATA_VALUE
}
