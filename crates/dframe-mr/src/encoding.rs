//! Per-key numerator/denominator aggregation.
//!
//! [`EncodingAggregator`] maps each chunk to a local [`EncodingTable`]; tables from different
//! chunks and nodes are combined with [`EncodingTable::merge`]. [`EncodingTable::to_frame`] turns
//! the final table into a right-hand frame for [`crate::broadcast_join`].

use crate::cluster::{Cluster, MapReduce, TaskContext};
use crate::error::{EngineError, EngineResult, TaskError};
use crate::key::{check_key_columns, check_numeric_column, load_key, CompositeKey, ScratchKey};
use ahash::AHashMap;
use dframe_columnar::{
    ChunkView, ColumnSchema, ColumnType, Frame, FrameBuilder, FrameError, FrameResult, Value,
};
use log::debug;
use serde::{Deserialize, Serialize, Serializer};

pub const NUMERATOR_COL: &str = "numerator";
pub const DENOMINATOR_COL: &str = "denominator";

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodingData {
    pub numerator: f64,
    pub denominator: f64,
}

impl EncodingData {
    pub fn new(numerator: f64, denominator: f64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    pub fn add(&mut self, numerator: f64, denominator: f64) {
        self.numerator += numerator;
        self.denominator += denominator;
    }

    pub fn merge(&mut self, other: &EncodingData) {
        self.add(other.numerator, other.denominator);
    }

    /// `numerator / denominator`, or `None` for a zero denominator.
    pub fn mean(&self) -> Option<f64> {
        (self.denominator != 0.0).then(|| self.numerator / self.denominator)
    }
}

/// Map from [`CompositeKey`] to its running [`EncodingData`].
///
/// Serialized as a list of `(key, data)` pairs in key order, so equal tables give equal bytes. A
/// list that repeats a key does not load.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(try_from = "Vec<(CompositeKey, EncodingData)>")]
pub struct EncodingTable {
    entries: AHashMap<CompositeKey, EncodingData>,
}

impl EncodingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one row's contribution under the key currently held by `key`.
    ///
    /// The scratch key is only copied when the entry is new.
    pub fn accumulate(&mut self, key: &ScratchKey, numerator: f64, denominator: f64) {
        match self.entries.get_mut(key.as_key()) {
            Some(data) => data.add(numerator, denominator),
            None => {
                self.entries
                    .insert(key.to_key(), EncodingData::new(numerator, denominator));
            }
        }
    }

    pub fn get(&self, key: &CompositeKey) -> Option<&EncodingData> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: CompositeKey, data: EncodingData) -> Option<EncodingData> {
        self.entries.insert(key, data)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CompositeKey, &EncodingData)> + '_ {
        self.entries.iter()
    }

    pub fn sorted_entries(&self) -> Vec<(&CompositeKey, &EncodingData)> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// Union of both tables, summing the data of shared keys.
    pub fn merge(mut self, mut other: EncodingTable) -> EncodingTable {
        if self.entries.len() < other.entries.len() {
            std::mem::swap(&mut self, &mut other);
        }
        for (key, data) in other.entries {
            self.entries
                .entry(key)
                .and_modify(|d| d.merge(&data))
                .or_insert(data);
        }
        self
    }

    /// Copy every entry of `other` over this table, replacing shared keys.
    pub fn put_all(&mut self, other: EncodingTable) {
        self.entries.extend(other.entries);
    }

    /// Materialize the table as a frame, one row per key in key order.
    pub fn to_frame(&self, names: &EncodingFrameNames) -> FrameResult<Frame> {
        let mut schema: Vec<ColumnSchema> = names
            .level_columns
            .iter()
            .map(|name| ColumnSchema::new(name.clone(), ColumnType::Categorical))
            .collect();
        if let Some(group) = &names.group_column {
            schema.push(ColumnSchema::new(group.clone(), ColumnType::Integer));
        }
        schema.push(ColumnSchema::new(names.numerator.clone(), ColumnType::Number));
        schema.push(ColumnSchema::new(names.denominator.clone(), ColumnType::Number));

        let width = schema.len();
        let mut builder = FrameBuilder::new(names.frame.clone(), schema);
        let mut row = Vec::with_capacity(width);
        for (key, data) in self.sorted_entries() {
            if key.arity() != names.level_columns.len() {
                return Err(FrameError::SchemaMismatch {
                    frame: names.frame.clone(),
                    expected: names.level_columns.len(),
                    actual: key.arity(),
                });
            }
            row.clear();
            row.extend(key.levels().iter().cloned().map(Value::Text));
            if names.group_column.is_some() {
                row.push(Value::from(key.group()));
            }
            row.push(Value::Number(data.numerator));
            row.push(Value::Number(data.denominator));
            builder.append_row(&row)?;
        }
        builder.finalize()
    }
}

impl FromIterator<(CompositeKey, EncodingData)> for EncodingTable {
    fn from_iter<I: IntoIterator<Item = (CompositeKey, EncodingData)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl Serialize for EncodingTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.sorted_entries())
    }
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("duplicate key {0} in encoded table")]
pub struct DuplicateKeyError(pub CompositeKey);

impl TryFrom<Vec<(CompositeKey, EncodingData)>> for EncodingTable {
    type Error = DuplicateKeyError;

    fn try_from(pairs: Vec<(CompositeKey, EncodingData)>) -> Result<Self, DuplicateKeyError> {
        let mut entries = AHashMap::with_capacity(pairs.len());
        for (key, data) in pairs {
            if entries.contains_key(&key) {
                return Err(DuplicateKeyError(key));
            }
            entries.insert(key, data);
        }
        Ok(Self { entries })
    }
}

/// Column names used by [`EncodingTable::to_frame`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodingFrameNames {
    pub frame: String,
    pub level_columns: Vec<String>,
    pub group_column: Option<String>,
    pub numerator: String,
    pub denominator: String,
}

impl EncodingFrameNames {
    pub fn new(
        frame: impl Into<String>,
        level_columns: Vec<String>,
        group_column: Option<String>,
    ) -> Self {
        Self {
            frame: frame.into(),
            level_columns,
            group_column,
            numerator: NUMERATOR_COL.to_string(),
            denominator: DENOMINATOR_COL.to_string(),
        }
    }
}

/// Column indices read by [`EncodingAggregator`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodingColumns {
    /// Categorical key columns.
    pub level_columns: Vec<usize>,
    /// Numeric group (fold) column; `None` keys every row with `NO_GROUP`.
    pub group_column: Option<usize>,
    pub numerator: usize,
    pub denominator: usize,
}

impl EncodingColumns {
    pub fn single(level: usize, group: Option<usize>, numerator: usize, denominator: usize) -> Self {
        Self {
            level_columns: vec![level],
            group_column: group,
            numerator,
            denominator,
        }
    }
}

/// Map task building a chunk-local [`EncodingTable`].
///
/// Rows with a missing key cell (label or group) are skipped. A missing numerator or denominator
/// contributes zero but still creates the key's entry. A group value outside the `i32` range fails
/// the chunk.
#[derive(Clone, Debug)]
pub struct EncodingAggregator {
    columns: EncodingColumns,
}

impl EncodingAggregator {
    /// Check `columns` against `frame` before any chunk runs.
    pub fn new(frame: &Frame, columns: EncodingColumns) -> EngineResult<Self> {
        if columns.level_columns.is_empty() {
            return Err(EngineError::EmptyKey);
        }
        check_key_columns(frame, &columns.level_columns)?;
        if let Some(group) = columns.group_column {
            check_numeric_column(frame, group)?;
        }
        check_numeric_column(frame, columns.numerator)?;
        check_numeric_column(frame, columns.denominator)?;
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &EncodingColumns {
        &self.columns
    }
}

impl MapReduce for EncodingAggregator {
    type Output = EncodingTable;

    fn empty(&self) -> EncodingTable {
        EncodingTable::new()
    }

    fn map(&self, _ctx: &TaskContext, chunk: &ChunkView<'_>) -> Result<EncodingTable, TaskError> {
        let cols = &self.columns;
        let mut table = EncodingTable::new();
        let mut scratch = ScratchKey::new();
        for row in 0..chunk.len() {
            if !load_key(&mut scratch, chunk, &cols.level_columns, cols.group_column, row)? {
                continue;
            }
            let numerator = chunk.number(cols.numerator, row).unwrap_or(0.0);
            let denominator = chunk.number(cols.denominator, row).unwrap_or(0.0);
            table.accumulate(&scratch, numerator, denominator);
        }
        Ok(table)
    }

    fn reduce(&self, left: EncodingTable, right: EncodingTable) -> EncodingTable {
        left.merge(right)
    }
}

/// Aggregate `frame` into one table across the cluster.
pub fn build_encoding_table(
    cluster: &Cluster,
    frame: &Frame,
    columns: &EncodingColumns,
) -> EngineResult<EncodingTable> {
    let task = EncodingAggregator::new(frame, columns.clone())?;
    let table = cluster.map_reduce(frame, &task)?;
    debug!("encoding table for {}: {} keys", frame.name(), table.len());
    Ok(table)
}
