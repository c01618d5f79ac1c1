//! Chunk encodings.
//!
//! A chunk owns the values of one rectangular piece of a grid. Three
//! encodings are available and a chunk moves between them at runtime:
//!
//! ```text
//!   Singleton ──(differing write)──► SparseMapped ──(outgrows dense)──► Dense
//!       ▲                                  ▲                              │
//!       └──────────────── optimise ────────┴──────────────────────────────┘
//! ```
//!
//! Every transition replaces the `Chunk` value as a whole; no variant is
//! mutated into another in place.

mod codec;
mod dense;
mod offset_bits;
mod singleton;
mod sparse;

pub use codec::{decode_chunk, encode_chunk};
pub use dense::DenseChunk;
pub use singleton::SingletonChunk;
pub use sparse::SparseChunk;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{GridStoreError, Result};

/// Fixed per-chunk bookkeeping cost used in memory accounting.
pub(crate) const CHUNK_HEADER_BYTES: usize = 64;

/// Which encoding a chunk currently uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChunkKind {
    /// Full row-major array.
    Dense,
    /// Every cell holds the same value.
    Singleton,
    /// Default value plus no-data bits and two value maps.
    SparseMapped,
}

impl ChunkKind {
    /// Tag byte used in the persisted form.
    pub fn tag(&self) -> u8 {
        match self {
            Self::Dense => 1,
            Self::Singleton => 2,
            Self::SparseMapped => 3,
        }
    }

    /// Inverse of [`tag`](Self::tag).
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Dense),
            2 => Some(Self::Singleton),
            3 => Some(Self::SparseMapped),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dense => write!(f, "dense"),
            Self::Singleton => write!(f, "singleton"),
            Self::SparseMapped => write!(f, "sparse-mapped"),
        }
    }
}

/// The values of one chunk in one of the three encodings.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    Dense(DenseChunk),
    Singleton(SingletonChunk),
    Sparse(SparseChunk),
}

impl Chunk {
    /// A chunk whose every cell holds `value`.
    pub fn singleton(nrows: u32, ncols: u32, value: f64) -> Self {
        Self::Singleton(SingletonChunk::new(nrows, ncols, value))
    }

    /// Current encoding.
    pub fn kind(&self) -> ChunkKind {
        match self {
            Self::Dense(_) => ChunkKind::Dense,
            Self::Singleton(_) => ChunkKind::Singleton,
            Self::Sparse(_) => ChunkKind::SparseMapped,
        }
    }

    /// (rows, cols) extent.
    pub fn shape(&self) -> (u32, u32) {
        match self {
            Self::Dense(c) => c.shape(),
            Self::Singleton(c) => c.shape(),
            Self::Sparse(c) => c.shape(),
        }
    }

    pub fn n_cells(&self) -> usize {
        let (nrows, ncols) = self.shape();
        nrows as usize * ncols as usize
    }

    /// Value at an intra-chunk position.
    pub fn get(&self, row: u32, col: u32) -> Result<f64> {
        match self {
            Self::Dense(c) => c.get(row, col),
            Self::Singleton(c) => c.get(row, col),
            Self::Sparse(c) => c.get(row, col),
        }
    }

    /// Set a value and return the one it replaced.
    ///
    /// This is the only operation that changes the encoding: a singleton
    /// receiving a differing value becomes sparse-mapped, and a sparse-mapped
    /// chunk that has grown as large as its dense form becomes dense.
    pub fn set(&mut self, row: u32, col: u32, value: f64, no_data_value: f64) -> Result<f64> {
        match self {
            Self::Dense(c) => c.set(row, col, value),
            Self::Singleton(c) => {
                let previous = c.get(row, col)?;
                if same_value(previous, value) {
                    return Ok(previous);
                }
                let mut sparse = c.to_sparse(no_data_value);
                sparse.set(row, col, value)?;
                tracing::debug!(
                    default = previous,
                    value,
                    "singleton chunk converted to sparse-mapped"
                );
                *self = Self::Sparse(sparse).densify_if_larger();
                Ok(previous)
            }
            Self::Sparse(c) => {
                let previous = c.set(row, col, value)?;
                if c.estimated_bytes() >= dense_bytes(c.n_cells()) {
                    let (nrows, ncols) = c.shape();
                    let values = c.to_dense_array();
                    tracing::debug!(nrows, ncols, "sparse-mapped chunk converted to dense");
                    *self = Self::Dense(DenseChunk::from_vec(nrows, ncols, values));
                }
                Ok(previous)
            }
        }
    }

    /// Like [`set`](Self::set) for bulk loading, where the caller takes care
    /// of statistics and does not need the previous value.
    pub fn init(&mut self, row: u32, col: u32, value: f64, no_data_value: f64) -> Result<()> {
        self.set(row, col, value, no_data_value).map(|_| ())
    }

    /// Materialise all values in row-major order.
    pub fn to_dense_array(&self) -> Vec<f64> {
        match self {
            Self::Dense(c) => c.values().to_vec(),
            Self::Singleton(c) => vec![c.value(); c.n_cells()],
            Self::Sparse(c) => c.to_dense_array(),
        }
    }

    /// Bytes this chunk is accounted for while resident.
    pub fn estimated_bytes(&self) -> usize {
        match self {
            Self::Dense(c) => dense_bytes(c.n_cells()),
            Self::Singleton(_) => CHUNK_HEADER_BYTES,
            Self::Sparse(c) => c.estimated_bytes(),
        }
    }

    /// Upper bound on the bytes a single `set` can add, including any
    /// change of encoding it triggers.
    pub fn set_growth_bound(&self) -> usize {
        match self {
            Self::Dense(_) => 0,
            Self::Singleton(c) => {
                SparseChunk::base_bytes(c.n_cells()) + SparseChunk::entry_growth_bound(c.n_cells())
                    - CHUNK_HEADER_BYTES
            }
            Self::Sparse(c) => SparseChunk::entry_growth_bound(c.n_cells()),
        }
    }

    /// Re-encode with the cheapest representation for the current values.
    ///
    /// All-equal chunks become singletons; otherwise a sparse-mapped chunk
    /// defaulting to the most common value is used if it is smaller than the
    /// dense array.
    pub fn optimised(&self, no_data_value: f64) -> Chunk {
        let (nrows, ncols) = self.shape();
        if let Self::Singleton(_) = self {
            return self.clone();
        }
        let values = self.to_dense_array();
        let Some(&first) = values.first() else {
            return self.clone();
        };
        if values.iter().all(|v| same_value(*v, first)) {
            return Chunk::singleton(nrows, ncols, first);
        }

        let mut counts: BTreeMap<ValueKey, usize> = BTreeMap::new();
        for v in &values {
            *counts.entry(ValueKey::new(*v)).or_default() += 1;
        }
        let mode = counts
            .iter()
            .max_by_key(|(_, n)| **n)
            .map(|(k, _)| k.get())
            .unwrap_or(first);

        let sparse = SparseChunk::from_values(nrows, ncols, &values, mode, no_data_value);
        if sparse.estimated_bytes() < dense_bytes(values.len()) {
            Chunk::Sparse(sparse)
        } else {
            Chunk::Dense(DenseChunk::from_vec(nrows, ncols, values))
        }
    }

    fn densify_if_larger(self) -> Self {
        match self {
            Self::Sparse(c) if c.estimated_bytes() >= dense_bytes(c.n_cells()) => {
                let (nrows, ncols) = c.shape();
                tracing::debug!(nrows, ncols, "sparse-mapped chunk converted to dense");
                Self::Dense(DenseChunk::from_vec(nrows, ncols, c.to_dense_array()))
            }
            other => other,
        }
    }
}

/// Accounting size of a dense chunk with `n_cells` cells.
pub(crate) fn dense_bytes(n_cells: usize) -> usize {
    CHUNK_HEADER_BYTES + n_cells * std::mem::size_of::<f64>()
}

/// Row-major position of an intra-chunk cell, bounds checked.
pub(crate) fn position(nrows: u32, ncols: u32, row: u32, col: u32) -> Result<usize> {
    if row >= nrows || col >= ncols {
        return Err(GridStoreError::out_of_range(
            row as i64,
            col as i64,
            nrows as i64,
            ncols as i64,
        ));
    }
    Ok(row as usize * ncols as usize + col as usize)
}

/// Value equality used for encoding decisions: total order, so `-0.0 == 0.0`
/// is normalised away and NaN equals itself.
pub(crate) fn same_value(a: f64, b: f64) -> bool {
    ValueKey::new(a) == ValueKey::new(b)
}

/// A cell value usable as an ordered map key.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ValueKey(f64);

impl ValueKey {
    pub(crate) fn new(value: f64) -> Self {
        if value == 0.0 {
            Self(0.0)
        } else {
            Self(value)
        }
    }

    pub(crate) fn get(self) -> f64 {
        self.0
    }
}

impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0).is_eq()
    }
}

impl Eq for ValueKey {}

impl PartialOrd for ValueKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ValueKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}
