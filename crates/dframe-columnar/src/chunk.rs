#![forbid(unsafe_code)]

use crate::bitmap::BitVec;
use crate::error::{FrameError, FrameResult};
use crate::types::ColumnType;
use serde::{Deserialize, Serialize, Serializer};
use std::ops::Range;

/// Row boundaries shared by every column of a frame.
///
/// `offsets` always starts at 0 and has one more entry than there are chunks; chunk `i` covers
/// rows `offsets[i]..offsets[i + 1]`. Serialized as the list of chunk sizes.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Vec<usize>")]
pub struct ChunkLayout {
    offsets: Vec<usize>,
}

impl ChunkLayout {
    pub fn empty() -> Self {
        Self { offsets: vec![0] }
    }

    /// Layout from explicit chunk sizes, e.g. `[2, 1]` for a two-chunk, three-row frame.
    pub fn from_sizes(sizes: &[usize]) -> FrameResult<Self> {
        let mut offsets = Vec::with_capacity(sizes.len() + 1);
        offsets.push(0);
        let mut end = 0usize;
        for &size in sizes {
            end = end.checked_add(size).ok_or(FrameError::RowCountOverflow)?;
            offsets.push(end);
        }
        Ok(Self { offsets })
    }

    pub fn chunk_count(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn row_count(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    pub fn chunk_range(&self, chunk: usize) -> Option<Range<usize>> {
        let start = *self.offsets.get(chunk)?;
        let end = *self.offsets.get(chunk + 1)?;
        Some(start..end)
    }

    pub fn chunk_len(&self, chunk: usize) -> Option<usize> {
        self.chunk_range(chunk).map(|r| r.len())
    }

    pub fn sizes(&self) -> impl Iterator<Item = usize> + '_ {
        self.offsets.windows(2).map(|w| w[1] - w[0])
    }

    /// Locate `row` as `(chunk, row_in_chunk)`. Empty chunks never own a row.
    pub fn chunk_of_row(&self, row: usize) -> Option<(usize, usize)> {
        if row >= self.row_count() {
            return None;
        }
        // First offset strictly greater than `row`, minus one, is the owning chunk.
        let chunk = self.offsets.partition_point(|&start| start <= row) - 1;
        Some((chunk, row - self.offsets[chunk]))
    }
}

impl Default for ChunkLayout {
    fn default() -> Self {
        Self::empty()
    }
}

impl Serialize for ChunkLayout {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.sizes())
    }
}

impl TryFrom<Vec<usize>> for ChunkLayout {
    type Error = FrameError;

    fn try_from(sizes: Vec<usize>) -> FrameResult<Self> {
        Self::from_sizes(&sizes)
    }
}

/// Typed payload of one column chunk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ChunkData {
    Categorical(Vec<u32>),
    Number(Vec<f64>),
    Integer(Vec<i64>),
}

impl ChunkData {
    pub fn len(&self) -> usize {
        match self {
            ChunkData::Categorical(v) => v.len(),
            ChunkData::Number(v) => v.len(),
            ChunkData::Integer(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            ChunkData::Categorical(_) => ColumnType::Categorical,
            ChunkData::Number(_) => ColumnType::Number,
            ChunkData::Integer(_) => ColumnType::Integer,
        }
    }
}

/// A contiguous row slice of one column.
///
/// `validity` is `None` when every row is present; missing rows hold a zero placeholder in
/// `data`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    data: ChunkData,
    validity: Option<BitVec>,
}

impl Chunk {
    /// Assemble a chunk. The caller guarantees `validity.len() == data.len()`; see
    /// [`crate::Column::from_chunks`] for the checked path.
    pub fn new(data: ChunkData, validity: Option<BitVec>) -> Self {
        let validity = validity.filter(|v| !v.all_true());
        Self { data, validity }
    }

    pub fn data(&self) -> &ChunkData {
        &self.data
    }

    pub fn validity(&self) -> Option<&BitVec> {
        self.validity.as_ref()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_valid(&self, row: usize) -> bool {
        row < self.len() && self.validity.as_ref().map_or(true, |v| v.get(row))
    }

    pub fn null_count(&self) -> usize {
        self.validity
            .as_ref()
            .map_or(0, |v| v.len() - v.count_ones())
    }

    pub fn code(&self, row: usize) -> Option<u32> {
        match &self.data {
            ChunkData::Categorical(codes) if self.is_valid(row) => Some(codes[row]),
            _ => None,
        }
    }

    /// Numeric view; integer chunks widen to `f64`.
    pub fn number(&self, row: usize) -> Option<f64> {
        if !self.is_valid(row) {
            return None;
        }
        match &self.data {
            ChunkData::Number(values) => Some(values[row]),
            ChunkData::Integer(values) => Some(values[row] as f64),
            ChunkData::Categorical(_) => None,
        }
    }

    pub fn integer(&self, row: usize) -> Option<i64> {
        match &self.data {
            ChunkData::Integer(values) if self.is_valid(row) => Some(values[row]),
            _ => None,
        }
    }
}
