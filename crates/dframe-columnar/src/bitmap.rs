#![forbid(unsafe_code)]

use crate::error::FrameError;
use serde::{Deserialize, Serialize};

/// A compact bit vector used for chunk validity.
///
/// Bits are stored little-endian within each `u64` word:
/// - bit 0 is the LSB of word 0
/// - bit 63 is the MSB of word 0
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BitVecParts")]
pub struct BitVec {
    words: Vec<u64>,
    len: usize,
    #[serde(skip)]
    ones: usize,
}

/// Serialized form of a [`BitVec`]; the popcount is recomputed on load.
#[derive(Deserialize)]
struct BitVecParts {
    words: Vec<u64>,
    len: usize,
}

impl BitVec {
    pub fn new() -> Self {
        Self {
            words: Vec::new(),
            len: 0,
            ones: 0,
        }
    }

    pub fn with_capacity_bits(bits: usize) -> Self {
        let words = bits.div_ceil(64);
        Self {
            words: Vec::with_capacity(words),
            len: 0,
            ones: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, value: bool) {
        let bit = self.len % 64;
        if bit == 0 {
            self.words.push(0);
        }

        if value {
            let word = self.len / 64;
            self.words[word] |= 1u64 << bit;
            self.ones += 1;
        }

        self.len += 1;
    }

    pub fn get(&self, index: usize) -> bool {
        debug_assert!(index < self.len, "BitVec index out of bounds");
        let word = self.words[index / 64];
        let bit = index % 64;
        ((word >> bit) & 1) == 1
    }

    pub fn count_ones(&self) -> usize {
        self.ones
    }

    pub fn all_true(&self) -> bool {
        self.ones == self.len
    }

    pub fn as_words(&self) -> &[u64] {
        &self.words
    }

    /// Reconstruct a [`BitVec`] from a raw word buffer and a bit length.
    ///
    /// Returns `None` unless `words` holds exactly `len.div_ceil(64)` words. Bits past `len` are
    /// cleared so equality stays structural.
    pub fn from_words(mut words: Vec<u64>, len: usize) -> Option<Self> {
        if words.len() != len.div_ceil(64) {
            return None;
        }

        let rem_bits = len % 64;
        if rem_bits != 0 {
            if let Some(last) = words.last_mut() {
                *last &= (1u64 << rem_bits) - 1;
            }
        }

        let ones = words.iter().map(|w| w.count_ones() as usize).sum();
        Some(Self { words, len, ones })
    }
}

impl TryFrom<BitVecParts> for BitVec {
    type Error = FrameError;

    fn try_from(parts: BitVecParts) -> Result<Self, FrameError> {
        let words = parts.words.len();
        Self::from_words(parts.words, parts.len).ok_or(FrameError::InvalidBitmap {
            bits: parts.len,
            words,
        })
    }
}

impl Default for BitVec {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<bool> for BitVec {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut out = Self::with_capacity_bits(iter.size_hint().0);
        for bit in iter {
            out.push(bit);
        }
        out
    }
}
