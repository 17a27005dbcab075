use crate::error::{EngineError, EngineResult, TaskError};
use dframe_columnar::{ChunkView, ColumnType, Frame};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Group value used when a key has no group column.
pub const NO_GROUP: i32 = -1;

pub type KeyLevels = SmallVec<[Arc<str>; 2]>;

/// Aggregation and join key: one resolved label per key column plus a 32-bit group value.
///
/// Keys compare by label text, never by domain code, so keys built from frames with different
/// domains agree. A `CompositeKey` has no setters; reuse a [`ScratchKey`] for per-row probing.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompositeKey {
    levels: KeyLevels,
    group: i32,
}

impl CompositeKey {
    pub fn new(level: impl Into<Arc<str>>, group: i32) -> Self {
        let mut levels = KeyLevels::new();
        levels.push(level.into());
        Self { levels, group }
    }

    pub fn from_levels<I, S>(levels: I, group: i32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        Self {
            levels: levels.into_iter().map(Into::into).collect(),
            group,
        }
    }

    /// First label; the whole key for single-column keys.
    pub fn level(&self) -> Option<&str> {
        self.levels.first().map(|l| l.as_ref())
    }

    pub fn levels(&self) -> &[Arc<str>] {
        &self.levels
    }

    pub fn group(&self) -> i32 {
        self.group
    }

    pub fn arity(&self) -> usize {
        self.levels.len()
    }

    /// Process-independent 64-bit hash of the key fields.
    ///
    /// Unlike `Hash`, which feeds the map's seeded hasher, this value is identical on every node
    /// and every run.
    pub fn stable_hash(&self) -> u64 {
        let mut h = FNV_OFFSET;
        for level in &self.levels {
            h = fnv1a(h, &(level.len() as u64).to_le_bytes());
            h = fnv1a(h, level.as_bytes());
        }
        h = fnv1a(h, &self.group.to_le_bytes());
        splitmix64(h)
    }
}

impl Default for CompositeKey {
    fn default() -> Self {
        Self {
            levels: KeyLevels::new(),
            group: NO_GROUP,
        }
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for level in &self.levels {
            write!(f, "{level:?}, ")?;
        }
        write!(f, "{})", self.group)
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(mut h: u64, bytes: &[u8]) -> u64 {
    for b in bytes {
        h ^= *b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// A reusable probe key.
///
/// `update` overwrites the fields in place, so a scratch key must never be stored in a map. Use
/// [`ScratchKey::as_key`] for lookups and [`ScratchKey::to_key`] to take an owned copy on insert.
#[derive(Clone, Debug, Default)]
pub struct ScratchKey {
    key: CompositeKey,
}

impl ScratchKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, level: impl Into<Arc<str>>, group: i32) {
        self.key.levels.clear();
        self.key.levels.push(level.into());
        self.key.group = group;
    }

    pub fn update_levels<'a, I>(&mut self, levels: I, group: i32)
    where
        I: IntoIterator<Item = &'a Arc<str>>,
    {
        self.key.levels.clear();
        self.key.levels.extend(levels.into_iter().cloned());
        self.key.group = group;
    }

    pub fn as_key(&self) -> &CompositeKey {
        &self.key
    }

    pub fn to_key(&self) -> CompositeKey {
        self.key.clone()
    }

    pub fn stable_hash(&self) -> u64 {
        self.key.stable_hash()
    }
}

pub fn group_value_from_i64(column: &str, row: usize, value: i64) -> Result<i32, TaskError> {
    i32::try_from(value).map_err(|_| TaskError::KeyDomainOverflow {
        column: column.to_string(),
        row,
        value: value as f64,
    })
}

pub fn group_value_from_f64(column: &str, row: usize, value: f64) -> Result<i32, TaskError> {
    if value.is_nan() || (value.is_finite() && value.fract() != 0.0) {
        return Err(TaskError::NonIntegralGroupValue {
            column: column.to_string(),
            row,
            value,
        });
    }
    if value < i32::MIN as f64 || value > i32::MAX as f64 {
        return Err(TaskError::KeyDomainOverflow {
            column: column.to_string(),
            row,
            value,
        });
    }
    Ok(value as i32)
}

/// Key columns must be categorical.
pub(crate) fn check_key_columns(frame: &Frame, columns: &[usize]) -> EngineResult<()> {
    for &idx in columns {
        let column = frame.require_column(idx)?;
        if column.column_type() != ColumnType::Categorical {
            return Err(EngineError::UnsupportedColumn {
                frame: frame.name().to_string(),
                column: column.name().to_string(),
                expected: "categorical",
                actual: column.column_type(),
            });
        }
    }
    Ok(())
}

pub(crate) fn check_numeric_column(frame: &Frame, idx: usize) -> EngineResult<()> {
    let column = frame.require_column(idx)?;
    if !column.column_type().is_numeric() {
        return Err(EngineError::UnsupportedColumn {
            frame: frame.name().to_string(),
            column: column.name().to_string(),
            expected: "numeric",
            actual: column.column_type(),
        });
    }
    Ok(())
}

/// Group value of chunk-local `row`, `NO_GROUP` without a group column, `None` when missing.
pub(crate) fn read_group_value(
    chunk: &ChunkView<'_>,
    group_column: Option<usize>,
    row: usize,
) -> Result<Option<i32>, TaskError> {
    let Some(col) = group_column else {
        return Ok(Some(NO_GROUP));
    };
    let Some(column) = chunk.frame().column(col) else {
        return Ok(None);
    };
    let frame_row = chunk.start() + row;
    match column.column_type() {
        ColumnType::Integer => chunk
            .integer(col, row)
            .map(|v| group_value_from_i64(column.name(), frame_row, v))
            .transpose(),
        _ => chunk
            .number(col, row)
            .map(|v| group_value_from_f64(column.name(), frame_row, v))
            .transpose(),
    }
}

/// Load the key of chunk-local `row` into `scratch`.
///
/// Returns `Ok(false)` when any key cell is missing; such rows form no key.
pub(crate) fn load_key(
    scratch: &mut ScratchKey,
    chunk: &ChunkView<'_>,
    key_columns: &[usize],
    group_column: Option<usize>,
    row: usize,
) -> Result<bool, TaskError> {
    let mut levels: SmallVec<[&Arc<str>; 2]> = SmallVec::new();
    for &col in key_columns {
        match chunk.level(col, row) {
            Some(level) => levels.push(level),
            None => return Ok(false),
        }
    }
    let Some(group) = read_group_value(chunk, group_column, row)? else {
        return Ok(false);
    };
    scratch.update_levels(levels, group);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Wire;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn std_hash(key: &CompositeKey) -> u64 {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        h.finish()
    }

    #[test]
    fn equal_fields_hash_equal() {
        let a = CompositeKey::new("a", 1);
        let b = CompositeKey::from_levels(["a"], 1);
        assert_eq!(a, b);
        assert_eq!(a.stable_hash(), b.stable_hash());
        assert_eq!(std_hash(&a), std_hash(&b));
    }

    #[test]
    fn update_changes_identity() {
        let original = CompositeKey::new("a", 1);
        let mut scratch = ScratchKey::new();
        scratch.update("a", 1);
        assert_eq!(scratch.as_key(), &original);
        assert_eq!(scratch.stable_hash(), original.stable_hash());

        scratch.update("test", -1);
        assert_ne!(scratch.as_key(), &original);
        assert_ne!(scratch.stable_hash(), original.stable_hash());
        // The owned copy taken before the update is unaffected.
        assert_eq!(original.level(), Some("a"));
    }

    #[test]
    fn level_boundaries_do_not_alias() {
        let ab = CompositeKey::from_levels(["ab", "c"], 0);
        let a_bc = CompositeKey::from_levels(["a", "bc"], 0);
        assert_ne!(ab.stable_hash(), a_bc.stable_hash());
    }

    #[test]
    fn group_values_fit_or_fail() {
        assert_eq!(group_value_from_i64("fold", 0, i32::MAX as i64), Ok(i32::MAX));
        assert_eq!(group_value_from_i64("fold", 0, i32::MIN as i64), Ok(i32::MIN));
        assert!(matches!(
            group_value_from_i64("fold", 3, 2_147_483_648),
            Err(TaskError::KeyDomainOverflow { row: 3, .. })
        ));

        assert_eq!(group_value_from_f64("fold", 0, 2_147_483_647.0), Ok(i32::MAX));
        assert!(matches!(
            group_value_from_f64("fold", 0, 2_147_483_648.0),
            Err(TaskError::KeyDomainOverflow { .. })
        ));
        assert!(matches!(
            group_value_from_f64("fold", 0, f64::INFINITY),
            Err(TaskError::KeyDomainOverflow { .. })
        ));
        assert!(matches!(
            group_value_from_f64("fold", 0, 1.5),
            Err(TaskError::NonIntegralGroupValue { .. })
        ));
        assert!(matches!(
            group_value_from_f64("fold", 0, f64::NAN),
            Err(TaskError::NonIntegralGroupValue { .. })
        ));
    }

    #[test]
    fn keys_order_by_levels_then_group() {
        let mut keys = vec![
            CompositeKey::new("b", 0),
            CompositeKey::new("a", 2),
            CompositeKey::new("a", -1),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                CompositeKey::new("a", -1),
                CompositeKey::new("a", 2),
                CompositeKey::new("b", 0),
            ]
        );
    }

    #[test]
    fn key_wire_roundtrip() {
        let key = CompositeKey::from_levels(["x", ""], NO_GROUP);
        assert_eq!(CompositeKey::from_bytes(&key.to_bytes().unwrap()).unwrap(), key);
    }
}
