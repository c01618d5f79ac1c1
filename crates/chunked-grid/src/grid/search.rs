//! Distance queries: cells around a point and nearest data values.
//!
//! The nearest-value search expands square rings around the query cell
//! (its 8-connected neighbourhood, layer by layer) until a ring holds data.
//! A ring only bounds the answer: a cell in a later ring can be closer than
//! a diagonal hit in the first one. So every cell within the best distance
//! found is probed as well, and all cells at the final minimum distance are
//! returned as ties.

use crate::error::Result;
use crate::types::{CellId, GridDimensions};

use super::Grid;

/// Result of a nearest-data-value search.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestValue {
    /// Mean of the values of all tied nearest cells.
    pub value: f64,
    /// Tied nearest cells in row-major order.
    pub cells: Vec<CellId>,
    /// Distance from the query to the nearest cell centres.
    pub distance: f64,
}

/// Inclusive window of cells, clipped to the grid.
struct Window {
    rows: (i64, i64),
    cols: (i64, i64),
}

impl Grid {
    /// Cells whose centres lie within `distance` of point `(x, y)`, row-major.
    pub fn cell_ids_within_distance(&self, x: f64, y: f64, distance: f64) -> Vec<CellId> {
        if distance.is_nan() || distance < 0.0 {
            return Vec::new();
        }
        let dims = self.dimensions;
        let window = self.point_window(x, y, distance);
        let mut cells = Vec::new();
        for row in window.rows.0..=window.rows.1 {
            for col in window.cols.0..=window.cols.1 {
                if GridDimensions::distance(x, y, dims.cell_x(col), dims.cell_y(row)) <= distance {
                    cells.push(CellId::new(row, col));
                }
            }
        }
        cells
    }

    /// Data values of the cells whose centres lie within `distance` of `(x, y)`.
    pub fn values_within_distance(&self, x: f64, y: f64, distance: f64) -> Result<Vec<(CellId, f64)>> {
        let mut values = Vec::new();
        for cell in self.cell_ids_within_distance(x, y, distance) {
            let value = self.get_cell(cell.row, cell.col)?;
            if self.is_data(value) {
                values.push((cell, value));
            }
        }
        Ok(values)
    }

    /// Nearest data value to a cell, measured between cell centres.
    ///
    /// A cell holding data is its own nearest value at distance zero.
    /// Returns `None` if the grid holds no data at all.
    pub fn nearest(&self, row: i64, col: i64) -> Result<Option<NearestValue>> {
        self.layout.locate(row, col)?;
        let origin = CellId::new(row, col);
        let cellsize = self.dimensions.cellsize;
        // Squared offsets in cell units are exact, so ties compare exactly.
        let dist2 = |cell: CellId| {
            let dr = (cell.row - row) as f64;
            let dc = (cell.col - col) as f64;
            dr * dr + dc * dc
        };
        let window = |d2: f64| {
            let r = d2.sqrt().ceil() as i64;
            self.clip(row - r, row + r, col - r, col + r)
        };
        Ok(self
            .search(origin, dist2, window)?
            .map(|mut found| {
                found.distance *= cellsize;
                found
            }))
    }

    /// Nearest data value to point `(x, y)`, measured from the point itself.
    ///
    /// Fails with `OutOfRange` if the point lies outside the grid.
    pub fn nearest_at_point(&self, x: f64, y: f64) -> Result<Option<NearestValue>> {
        let dims = self.dimensions;
        let (row, col) = (dims.row_of(y), dims.col_of(x));
        self.layout.locate(row, col)?;
        let dist2 = |cell: CellId| {
            let dx = dims.cell_x(cell.col) - x;
            let dy = dims.cell_y(cell.row) - y;
            dx * dx + dy * dy
        };
        let window = |d2: f64| self.point_window(x, y, d2.sqrt());
        self.search(CellId::new(row, col), dist2, window)
    }

    /// Mean of the nearest data values to a cell.
    pub fn nearest_value(&self, row: i64, col: i64) -> Result<Option<f64>> {
        Ok(self.nearest(row, col)?.map(|found| found.value))
    }

    /// All cells tied for nearest data to a cell; empty if there is no data.
    pub fn nearest_cell_ids(&self, row: i64, col: i64) -> Result<Vec<CellId>> {
        Ok(self.nearest(row, col)?.map(|found| found.cells).unwrap_or_default())
    }

    /// Distance from a cell to its nearest data.
    pub fn nearest_value_distance(&self, row: i64, col: i64) -> Result<Option<f64>> {
        Ok(self.nearest(row, col)?.map(|found| found.distance))
    }

    /// Mean of the nearest data values to point `(x, y)`.
    pub fn nearest_value_at_point(&self, x: f64, y: f64) -> Result<Option<f64>> {
        Ok(self.nearest_at_point(x, y)?.map(|found| found.value))
    }

    fn search(
        &self,
        origin: CellId,
        dist2: impl Fn(CellId) -> f64,
        window: impl Fn(f64) -> Window,
    ) -> Result<Option<NearestValue>> {
        let value = self.get_cell(origin.row, origin.col)?;
        if self.is_data(value) {
            return Ok(Some(NearestValue {
                value,
                cells: vec![origin],
                distance: dist2(origin).sqrt(),
            }));
        }

        let max_ring = [
            origin.row,
            self.nrows() - 1 - origin.row,
            origin.col,
            self.ncols() - 1 - origin.col,
        ]
        .into_iter()
        .max()
        .unwrap_or(0);

        let mut best = None;
        for ring in 1..=max_ring {
            for cell in self.ring(origin, ring) {
                let value = self.get_cell(cell.row, cell.col)?;
                if self.is_data(value) {
                    let d2 = dist2(cell);
                    best = Some(best.map_or(d2, |b: f64| b.min(d2)));
                }
            }
            if best.is_some() {
                break;
            }
        }
        let Some(bound) = best else {
            return Ok(None);
        };

        let window = window(bound);
        let mut min_d2 = bound;
        let mut ties: Vec<(CellId, f64)> = Vec::new();
        for row in window.rows.0..=window.rows.1 {
            for col in window.cols.0..=window.cols.1 {
                let cell = CellId::new(row, col);
                let d2 = dist2(cell);
                if d2 > min_d2 {
                    continue;
                }
                let value = self.get_cell(row, col)?;
                if !self.is_data(value) {
                    continue;
                }
                if d2 < min_d2 {
                    min_d2 = d2;
                    ties.clear();
                }
                ties.push((cell, value));
            }
        }

        let value = ties.iter().map(|(_, v)| v).sum::<f64>() / ties.len() as f64;
        Ok(Some(NearestValue {
            value,
            cells: ties.into_iter().map(|(cell, _)| cell).collect(),
            distance: min_d2.sqrt(),
        }))
    }

    /// Cells at Chebyshev distance `ring` from `origin` that lie in the grid.
    ///
    /// Only in-grid rows and columns are walked, so a ring costs at most
    /// the cells it shares with the grid.
    fn ring(&self, origin: CellId, ring: i64) -> impl Iterator<Item = CellId> {
        let (r0, c0) = (origin.row, origin.col);
        let Window { rows, cols } = self.clip(r0 - ring, r0 + ring, c0 - ring, c0 + ring);
        let in_cols = move |col: &i64| (cols.0..=cols.1).contains(col);
        (rows.0..=rows.1).flat_map(move |row| {
            let edge = row == r0 - ring || row == r0 + ring;
            let ring_cols: Box<dyn Iterator<Item = i64>> = if edge {
                Box::new(cols.0..=cols.1)
            } else {
                Box::new([c0 - ring, c0 + ring].into_iter().filter(in_cols))
            };
            ring_cols.map(move |col| CellId::new(row, col))
        })
    }

    fn point_window(&self, x: f64, y: f64, distance: f64) -> Window {
        let dims = self.dimensions;
        self.clip(
            dims.row_of(y - distance),
            dims.row_of(y + distance),
            dims.col_of(x - distance),
            dims.col_of(x + distance),
        )
    }

    fn clip(&self, row_min: i64, row_max: i64, col_min: i64, col_max: i64) -> Window {
        Window {
            rows: (row_min.max(0), row_max.min(self.nrows() - 1)),
            cols: (col_min.max(0), col_max.min(self.ncols() - 1)),
        }
    }
}
