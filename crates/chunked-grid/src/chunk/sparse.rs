//! Sparse-mapped chunk.
//!
//! Cells are held in four mutually exclusive places:
//!
//! - the no-data bits (one bit per cell),
//! - the bit-indexed map: value → [`OffsetBits`] for values with many occurrences,
//! - the point map: (row, col) → value for rare values, with a count of
//!   cells per value,
//! - implicitly, the default value for every cell in none of the above.
//!
//! A value lives in at most one of the two maps. A value seen for the first
//! time goes to the point map while fewer than half the cells are tracked
//! explicitly, and to the bit-indexed map otherwise. The choice only affects
//! memory use; both maps can hold any value.
//!
//! Point-mapped cells are found in O(log n). Bit-mapped cells are found by
//! scanning the bit-mapped values; each costs `MAP_ENTRY_BYTES` plus its
//! bits, so the chunk turns dense before that list grows past a small
//! fraction of its cell count.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;

use super::offset_bits::{Bits, OffsetBits};
use super::{position, same_value, ValueKey, CHUNK_HEADER_BYTES};

/// Accounting cost of one entry in either value map.
const MAP_ENTRY_BYTES: usize = 48;
/// Accounting cost of one (row, col) in a point set.
const POINT_BYTES: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct SparseChunk {
    nrows: u32,
    ncols: u32,
    default_value: f64,
    no_data_value: f64,
    no_data: Bits,
    in_bit_map: Bits,
    in_point_map: Bits,
    bit_map: BTreeMap<ValueKey, OffsetBits>,
    points: BTreeMap<(u32, u32), ValueKey>,
    point_values: BTreeMap<ValueKey, usize>,
    explicit: usize,
}

impl SparseChunk {
    /// An empty chunk: every cell holds `default_value`.
    pub fn new(nrows: u32, ncols: u32, default_value: f64, no_data_value: f64) -> Self {
        let n = nrows as usize * ncols as usize;
        Self {
            nrows,
            ncols,
            default_value,
            no_data_value,
            no_data: Bits::repeat(false, n),
            in_bit_map: Bits::repeat(false, n),
            in_point_map: Bits::repeat(false, n),
            bit_map: BTreeMap::new(),
            points: BTreeMap::new(),
            point_values: BTreeMap::new(),
            explicit: 0,
        }
    }

    /// Build from row-major values.
    pub fn from_values(
        nrows: u32,
        ncols: u32,
        values: &[f64],
        default_value: f64,
        no_data_value: f64,
    ) -> Self {
        let mut chunk = Self::new(nrows, ncols, default_value, no_data_value);
        for (pos, value) in values.iter().enumerate() {
            let row = (pos / ncols as usize) as u32;
            let col = (pos % ncols as usize) as u32;
            chunk.place(pos, row, col, *value);
        }
        chunk
    }

    pub fn shape(&self) -> (u32, u32) {
        (self.nrows, self.ncols)
    }

    pub fn n_cells(&self) -> usize {
        self.nrows as usize * self.ncols as usize
    }

    pub fn default_value(&self) -> f64 {
        self.default_value
    }

    pub fn no_data_value(&self) -> f64 {
        self.no_data_value
    }

    /// Number of cells held in either value map.
    pub fn explicit_count(&self) -> usize {
        self.explicit
    }

    /// Number of distinct values in the bit-indexed map.
    pub fn bit_map_len(&self) -> usize {
        self.bit_map.len()
    }

    /// Number of distinct values in the point map.
    pub fn point_map_len(&self) -> usize {
        self.point_values.len()
    }

    pub fn get(&self, row: u32, col: u32) -> Result<f64> {
        let pos = position(self.nrows, self.ncols, row, col)?;
        Ok(self.value_at(pos, row, col))
    }

    pub fn set(&mut self, row: u32, col: u32, value: f64) -> Result<f64> {
        let pos = position(self.nrows, self.ncols, row, col)?;
        let previous = self.value_at(pos, row, col);
        if same_value(previous, value) {
            return Ok(previous);
        }
        self.clear(pos, row, col, previous);
        self.place(pos, row, col, value);
        Ok(previous)
    }

    fn value_at(&self, pos: usize, row: u32, col: u32) -> f64 {
        if self.no_data[pos] {
            return self.no_data_value;
        }
        if self.in_bit_map[pos] {
            let p = pos as u32;
            if let Some((value, _)) = self.bit_map.iter().find(|(_, bits)| bits.contains(p)) {
                return value.get();
            }
        } else if self.in_point_map[pos] {
            if let Some(value) = self.points.get(&(row, col)) {
                return value.get();
            }
        }
        self.default_value
    }

    /// Remove `pos` from wherever it is tracked. `current` is its value.
    fn clear(&mut self, pos: usize, row: u32, col: u32, current: f64) {
        let key = ValueKey::new(current);
        if self.no_data[pos] {
            self.no_data.set(pos, false);
        } else if self.in_bit_map[pos] {
            if let Some(bits) = self.bit_map.get_mut(&key) {
                if bits.remove(pos as u32) {
                    self.bit_map.remove(&key);
                }
            }
            self.in_bit_map.set(pos, false);
            self.explicit -= 1;
        } else if self.in_point_map[pos] {
            if let Some(stored) = self.points.remove(&(row, col)) {
                if let Some(n) = self.point_values.get_mut(&stored) {
                    *n -= 1;
                    if *n == 0 {
                        self.point_values.remove(&stored);
                    }
                }
            }
            self.in_point_map.set(pos, false);
            self.explicit -= 1;
        }
    }

    /// Track `value` at a position that is currently untracked.
    fn place(&mut self, pos: usize, row: u32, col: u32, value: f64) {
        if same_value(value, self.default_value) {
            return;
        }
        if same_value(value, self.no_data_value) {
            self.no_data.set(pos, true);
            return;
        }

        let key = ValueKey::new(value);
        if let Some(bits) = self.bit_map.get_mut(&key) {
            bits.insert(pos as u32);
            self.in_bit_map.set(pos, true);
        } else if let Some(n) = self.point_values.get_mut(&key) {
            *n += 1;
            self.points.insert((row, col), key);
            self.in_point_map.set(pos, true);
        } else if self.explicit * 2 < self.n_cells() {
            self.point_values.insert(key, 1);
            self.points.insert((row, col), key);
            self.in_point_map.set(pos, true);
        } else {
            self.bit_map.insert(key, OffsetBits::new(pos as u32));
            self.in_bit_map.set(pos, true);
        }
        self.explicit += 1;
    }

    /// Materialise all values in row-major order.
    pub fn to_dense_array(&self) -> Vec<f64> {
        let mut values = vec![self.default_value; self.n_cells()];
        for pos in self.no_data.iter_ones() {
            values[pos] = self.no_data_value;
        }
        for (value, bits) in &self.bit_map {
            for pos in bits.positions() {
                values[pos as usize] = value.get();
            }
        }
        let ncols = self.ncols as usize;
        for ((row, col), value) in &self.points {
            values[*row as usize * ncols + *col as usize] = value.get();
        }
        values
    }

    /// Bytes this chunk is accounted for.
    pub fn estimated_bytes(&self) -> usize {
        let bit_entries: usize = self
            .bit_map
            .values()
            .map(|bits| MAP_ENTRY_BYTES + bits.heap_bytes())
            .sum();
        let point_entries =
            self.point_values.len() * MAP_ENTRY_BYTES + self.points.len() * POINT_BYTES;
        Self::base_bytes(self.n_cells()) + bit_entries + point_entries
    }

    /// Size of an empty sparse chunk of `n_cells` cells.
    pub(crate) fn base_bytes(n_cells: usize) -> usize {
        CHUNK_HEADER_BYTES + 3 * bits_bytes(n_cells)
    }

    /// Most a single `set` can add to [`estimated_bytes`](Self::estimated_bytes).
    pub(crate) fn entry_growth_bound(n_cells: usize) -> usize {
        MAP_ENTRY_BYTES + POINT_BYTES.max(bits_bytes(n_cells))
    }

    pub(crate) fn no_data_bits(&self) -> &Bits {
        &self.no_data
    }

    pub(crate) fn bit_map_entries(&self) -> impl Iterator<Item = (f64, &OffsetBits)> {
        self.bit_map.iter().map(|(k, v)| (k.get(), v))
    }

    /// Point-mapped cells grouped by value, both in ascending order.
    pub(crate) fn point_map_entries(&self) -> Vec<(f64, Vec<(u32, u32)>)> {
        let mut grouped: BTreeMap<ValueKey, Vec<(u32, u32)>> = BTreeMap::new();
        for (cell, value) in &self.points {
            grouped.entry(*value).or_default().push(*cell);
        }
        grouped.into_iter().map(|(k, cells)| (k.get(), cells)).collect()
    }

    /// Reassemble from persisted parts. Callers validate that positions are
    /// in range and that the parts do not overlap.
    pub(crate) fn from_parts(
        nrows: u32,
        ncols: u32,
        default_value: f64,
        no_data_value: f64,
        no_data: Bits,
        bit_map: Vec<(f64, OffsetBits)>,
        point_map: Vec<(f64, BTreeSet<(u32, u32)>)>,
    ) -> Self {
        let mut chunk = Self::new(nrows, ncols, default_value, no_data_value);
        chunk.no_data = no_data;
        for (value, bits) in bit_map {
            for pos in bits.positions() {
                chunk.in_bit_map.set(pos as usize, true);
                chunk.explicit += 1;
            }
            chunk.bit_map.insert(ValueKey::new(value), bits);
        }
        for (value, cells) in point_map {
            let key = ValueKey::new(value);
            for (row, col) in cells {
                let pos = row as usize * ncols as usize + col as usize;
                chunk.in_point_map.set(pos, true);
                chunk.points.insert((row, col), key);
                *chunk.point_values.entry(key).or_default() += 1;
                chunk.explicit += 1;
            }
        }
        chunk
    }

    /// Check whether position `pos` is tracked anywhere other than as default.
    #[cfg(test)]
    fn is_tracked(&self, pos: usize) -> bool {
        self.no_data[pos] || self.in_bit_map[pos] || self.in_point_map[pos]
    }
}

fn bits_bytes(n_cells: usize) -> usize {
    n_cells.div_ceil(64) * std::mem::size_of::<u64>()
}
