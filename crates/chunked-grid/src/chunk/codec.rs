//! Persisted form of a chunk.
//!
//! ```text
//! "CGCK" | version u8 | tag u8 | nrows u32 | ncols u32 | payload
//!
//! Dense:        nrows*ncols f64 (native byte order)
//! Singleton:    value f64
//! SparseMapped: default f64 | no-data f64 | no-data bits
//!               | n u32 | n × (value f64 | offset u32 | bit len u32 | words u64…)
//!               | m u32 | m × (value f64 | k u32 | k × (row u32 | col u32))
//! ```
//!
//! Header integers and scalar values are little-endian. Persisted chunks are
//! swap files for the running process, not an interchange format.

use std::collections::BTreeSet;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{GridStoreError, Result};

use super::offset_bits::{Bits, OffsetBits};
use super::{Chunk, ChunkKind, DenseChunk, SingletonChunk, SparseChunk};

const MAGIC: &[u8; 4] = b"CGCK";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 1 + 4 + 4;

/// Encode a chunk to its persisted bytes.
pub fn encode_chunk(chunk: &Chunk) -> Bytes {
    let (nrows, ncols) = chunk.shape();
    let mut buf = BytesMut::with_capacity(HEADER_LEN + chunk.estimated_bytes());
    buf.put_slice(MAGIC);
    buf.put_u8(VERSION);
    buf.put_u8(chunk.kind().tag());
    buf.put_u32_le(nrows);
    buf.put_u32_le(ncols);

    match chunk {
        Chunk::Dense(c) => buf.put_slice(bytemuck::cast_slice(c.values())),
        Chunk::Singleton(c) => buf.put_f64_le(c.value()),
        Chunk::Sparse(c) => {
            buf.put_f64_le(c.default_value());
            buf.put_f64_le(c.no_data_value());
            put_words(&mut buf, c.no_data_bits());

            buf.put_u32_le(c.bit_map_len() as u32);
            for (value, bits) in c.bit_map_entries() {
                buf.put_f64_le(value);
                buf.put_u32_le(bits.offset());
                buf.put_u32_le(bits.rest().len() as u32);
                put_words(&mut buf, bits.rest());
            }

            buf.put_u32_le(c.point_map_len() as u32);
            for (value, cells) in c.point_map_entries() {
                buf.put_f64_le(value);
                buf.put_u32_le(cells.len() as u32);
                for (row, col) in cells {
                    buf.put_u32_le(row);
                    buf.put_u32_le(col);
                }
            }
        }
    }
    buf.freeze()
}

/// Decode persisted bytes back into a chunk.
///
/// Anything that is not a well-formed chunk of a known encoding is reported
/// as [`GridStoreError::CorruptPersistedChunk`].
pub fn decode_chunk(mut buf: &[u8]) -> Result<Chunk> {
    need(buf, HEADER_LEN, "header")?;
    if &buf[..4] != MAGIC {
        return Err(GridStoreError::corrupt("bad magic"));
    }
    buf.advance(4);
    let version = buf.get_u8();
    if version != VERSION {
        return Err(GridStoreError::corrupt(format!("unsupported version {version}")));
    }
    let tag = buf.get_u8();
    let kind = ChunkKind::from_tag(tag)
        .ok_or_else(|| GridStoreError::corrupt(format!("unknown chunk encoding tag {tag}")))?;
    let nrows = buf.get_u32_le();
    let ncols = buf.get_u32_le();
    let n_cells = cell_count(nrows, ncols)?;

    let chunk = match kind {
        ChunkKind::Dense => {
            let len = n_cells.checked_mul(std::mem::size_of::<f64>()).ok_or_else(|| {
                GridStoreError::corrupt(format!("{nrows}x{ncols} dense chunk is too large"))
            })?;
            need(buf, len, "dense values")?;
            let values: Vec<f64> = bytemuck::pod_collect_to_vec(&buf[..len]);
            buf.advance(len);
            Chunk::Dense(DenseChunk::from_vec(nrows, ncols, values))
        }
        ChunkKind::Singleton => {
            need(buf, 8, "singleton value")?;
            Chunk::Singleton(SingletonChunk::new(nrows, ncols, buf.get_f64_le()))
        }
        ChunkKind::SparseMapped => decode_sparse(&mut buf, nrows, ncols)?,
    };

    if buf.has_remaining() {
        return Err(GridStoreError::corrupt(format!(
            "{} trailing bytes after {} chunk",
            buf.remaining(),
            kind
        )));
    }
    Ok(chunk)
}

fn decode_sparse(buf: &mut &[u8], nrows: u32, ncols: u32) -> Result<Chunk> {
    let n_cells = cell_count(nrows, ncols)?;
    need(buf, 16, "sparse header")?;
    let default_value = buf.get_f64_le();
    let no_data_value = buf.get_f64_le();
    let no_data = get_words(buf, n_cells, "no-data bits")?;

    let mut seen = no_data.clone();

    need(buf, 4, "bit map length")?;
    let n_bit = buf.get_u32_le() as usize;
    let mut bit_map = Vec::with_capacity(n_bit.min(buf.remaining() / 16));
    for _ in 0..n_bit {
        need(buf, 16, "bit map entry")?;
        let value = buf.get_f64_le();
        let offset = buf.get_u32_le();
        let len = buf.get_u32_le() as usize;
        if (offset as usize).saturating_add(1).saturating_add(len) > n_cells {
            return Err(GridStoreError::corrupt(format!(
                "bit map entry at offset {offset} with {len} bits exceeds {n_cells} cells"
            )));
        }
        let rest = get_words(buf, len, "bit map words")?;
        let bits = OffsetBits::from_parts(offset, rest);
        for pos in bits.positions() {
            mark(&mut seen, pos as usize)?;
        }
        bit_map.push((value, bits));
    }

    need(buf, 4, "point map length")?;
    let n_point = buf.get_u32_le() as usize;
    let mut point_map = Vec::with_capacity(n_point.min(buf.remaining() / 12));
    for _ in 0..n_point {
        need(buf, 12, "point map entry")?;
        let value = buf.get_f64_le();
        let k = buf.get_u32_le() as usize;
        let len = k
            .checked_mul(8)
            .ok_or_else(|| GridStoreError::corrupt(format!("{k} point map cells")))?;
        need(buf, len, "point map cells")?;
        let mut cells = BTreeSet::new();
        for _ in 0..k {
            let row = buf.get_u32_le();
            let col = buf.get_u32_le();
            if row >= nrows || col >= ncols {
                return Err(GridStoreError::corrupt(format!(
                    "point ({row}, {col}) outside {nrows}x{ncols} chunk"
                )));
            }
            mark(&mut seen, row as usize * ncols as usize + col as usize)?;
            cells.insert((row, col));
        }
        point_map.push((value, cells));
    }

    Ok(Chunk::Sparse(SparseChunk::from_parts(
        nrows,
        ncols,
        default_value,
        no_data_value,
        no_data,
        bit_map,
        point_map,
    )))
}

fn cell_count(nrows: u32, ncols: u32) -> Result<usize> {
    (nrows as usize)
        .checked_mul(ncols as usize)
        .ok_or_else(|| GridStoreError::corrupt(format!("{nrows}x{ncols} chunk is too large")))
}

/// Write bits as whole words, with the dead bits of the last word cleared.
fn put_words(buf: &mut BytesMut, bits: &Bits) {
    let words = bits.as_raw_slice();
    let tail = bits.len() % 64;
    for (i, word) in words.iter().enumerate() {
        let word = if i + 1 == words.len() && tail != 0 {
            word & ((1u64 << tail) - 1)
        } else {
            *word
        };
        buf.put_u64_le(word);
    }
}

/// Read `len` bits stored as whole little-endian words.
fn get_words(buf: &mut &[u8], len: usize, what: &str) -> Result<Bits> {
    let n_words = len.div_ceil(64);
    need(buf, n_words.saturating_mul(8), what)?;
    let words: Vec<u64> = (0..n_words).map(|_| buf.get_u64_le()).collect();
    let mut bits = Bits::from_vec(words);
    if bits[len..].any() {
        return Err(GridStoreError::corrupt(format!("{what}: bits set past length {len}")));
    }
    bits.truncate(len);
    Ok(bits)
}

fn mark(seen: &mut Bits, pos: usize) -> Result<()> {
    if seen[pos] {
        return Err(GridStoreError::corrupt(format!(
            "position {pos} is stored more than once"
        )));
    }
    seen.set(pos, true);
    Ok(())
}

fn need(buf: &[u8], len: usize, what: &str) -> Result<()> {
    if buf.remaining() < len {
        return Err(GridStoreError::corrupt(format!(
            "truncated {what}: need {len} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}
