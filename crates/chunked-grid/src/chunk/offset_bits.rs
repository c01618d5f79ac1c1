//! Occurrence set of one value inside a chunk, stored as an offset plus bits.

use bitvec::prelude::*;

pub(crate) type Bits = BitVec<u64, Lsb0>;

/// Positions holding one value.
///
/// `offset` is the first occurrence. Bit `i` of `rest` marks position
/// `offset + 1 + i`; `rest` never ends in a zero bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OffsetBits {
    offset: u32,
    rest: Bits,
}

impl OffsetBits {
    pub(crate) fn new(position: u32) -> Self {
        Self {
            offset: position,
            rest: Bits::new(),
        }
    }

    /// Rebuild from persisted parts. `rest` is trimmed of trailing zeros.
    pub(crate) fn from_parts(offset: u32, mut rest: Bits) -> Self {
        trim(&mut rest);
        Self { offset, rest }
    }

    pub(crate) fn offset(&self) -> u32 {
        self.offset
    }

    pub(crate) fn rest(&self) -> &Bits {
        &self.rest
    }

    pub(crate) fn contains(&self, position: u32) -> bool {
        if position < self.offset {
            false
        } else if position == self.offset {
            true
        } else {
            let i = (position - self.offset - 1) as usize;
            self.rest.get(i).map(|b| *b).unwrap_or(false)
        }
    }

    pub(crate) fn insert(&mut self, position: u32) {
        if position == self.offset {
            return;
        }
        if position < self.offset {
            let gap = (self.offset - position) as usize;
            let mut rest = Bits::repeat(false, gap - 1);
            rest.push(true);
            rest.extend_from_bitslice(&self.rest);
            self.offset = position;
            self.rest = rest;
        } else {
            let i = (position - self.offset - 1) as usize;
            if i >= self.rest.len() {
                self.rest.resize(i + 1, false);
            }
            self.rest.set(i, true);
        }
    }

    /// Remove a position. Returns true when no occurrence remains.
    pub(crate) fn remove(&mut self, position: u32) -> bool {
        if position == self.offset {
            match self.rest.first_one() {
                None => return true,
                Some(i) => {
                    let tail = self.rest.split_off(i + 1);
                    self.offset += 1 + i as u32;
                    self.rest = tail;
                }
            }
        } else if position > self.offset {
            let i = (position - self.offset - 1) as usize;
            if i < self.rest.len() {
                self.rest.set(i, false);
                trim(&mut self.rest);
            }
        }
        false
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        1 + self.rest.count_ones()
    }

    pub(crate) fn positions(&self) -> impl Iterator<Item = u32> + '_ {
        let offset = self.offset;
        std::iter::once(offset).chain(self.rest.iter_ones().map(move |i| offset + 1 + i as u32))
    }

    /// Heap bytes used by the bit storage.
    pub(crate) fn heap_bytes(&self) -> usize {
        self.rest.as_raw_slice().len() * std::mem::size_of::<u64>()
    }
}

fn trim(bits: &mut Bits) {
    match bits.last_one() {
        Some(last) => bits.truncate(last + 1),
        None => bits.clear(),
    }
}
