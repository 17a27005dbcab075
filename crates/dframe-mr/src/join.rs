//! Order-preserving broadcast join.
//!
//! The right frame is replicated to every node, where it is indexed by resolved key labels. Each
//! left chunk is probed on its home node and produces payload slices for exactly its own rows;
//! the driver stitches the slices back together by chunk position. Output row `i` is always left
//! row `i`.

use crate::cluster::{Cluster, MapReduce, TaskContext};
use crate::error::{EngineError, EngineResult, TaskError};
use crate::key::{check_key_columns, check_numeric_column, load_key, CompositeKey, ScratchKey};
use ahash::AHashMap;
use dframe_columnar::{ChunkView, ColumnSchema, Frame, Value};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Key columns of both sides of a join.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinSpec {
    pub left_keys: Vec<usize>,
    pub left_group: Option<usize>,
    pub right_keys: Vec<usize>,
    pub right_group: Option<usize>,
}

impl JoinSpec {
    pub fn new(
        left_keys: &[usize],
        left_group: Option<usize>,
        right_keys: &[usize],
        right_group: Option<usize>,
    ) -> Self {
        Self {
            left_keys: left_keys.to_vec(),
            left_group,
            right_keys: right_keys.to_vec(),
            right_group,
        }
    }

    /// Right columns carried into the output: everything that is not a key or the group.
    pub fn payload_columns(&self, right: &Frame) -> Vec<usize> {
        (0..right.column_count())
            .filter(|idx| !self.right_keys.contains(idx) && self.right_group != Some(*idx))
            .collect()
    }

    fn validate(&self, left: &Frame, right: &Frame) -> EngineResult<()> {
        if self.left_keys.is_empty() || self.right_keys.is_empty() {
            return Err(EngineError::EmptyKey);
        }
        if self.left_keys.len() != self.right_keys.len() {
            return Err(EngineError::KeyArityMismatch {
                left: self.left_keys.len(),
                right: self.right_keys.len(),
            });
        }
        // A group on one side only would key every row of the other side with `NO_GROUP`.
        if self.left_group.is_some() != self.right_group.is_some() {
            return Err(EngineError::GroupMismatch {
                left: self.left_group,
                right: self.right_group,
            });
        }
        check_key_columns(left, &self.left_keys)?;
        check_key_columns(right, &self.right_keys)?;
        if let Some(group) = self.left_group {
            check_numeric_column(left, group)?;
        }
        if let Some(group) = self.right_group {
            check_numeric_column(right, group)?;
        }
        Ok(())
    }
}

/// Join `right` onto `left` by (key labels, group value), keeping left row order.
///
/// Every right column that is not a key or group column becomes a payload column. A payload
/// column replaces the left column of the same name in place, otherwise it is appended. Left rows
/// without a match, including rows with a missing key cell, get missing payload values.
pub fn broadcast_join(
    cluster: &Cluster,
    left: &Frame,
    left_keys: &[usize],
    left_group: Option<usize>,
    right: &Frame,
    right_keys: &[usize],
    right_group: Option<usize>,
) -> EngineResult<Frame> {
    let spec = JoinSpec::new(left_keys, left_group, right_keys, right_group);
    broadcast_join_with(cluster, left, right, &spec)
}

pub fn broadcast_join_with(
    cluster: &Cluster,
    left: &Frame,
    right: &Frame,
    spec: &JoinSpec,
) -> EngineResult<Frame> {
    spec.validate(left, right)?;
    let payload = spec.payload_columns(right);
    debug!(
        "broadcast join {} ({} rows) with {} ({} rows, {} payload columns)",
        left.name(),
        left.row_count(),
        right.name(),
        right.row_count(),
        payload.len()
    );

    // Fail on bad right-side group values before anything leaves the driver.
    let driver_lookup = JoinLookup::build(right, &spec.right_keys, spec.right_group, &payload)
        .map_err(|source| EngineError::Distributed {
            node: 0,
            chunk: None,
            source,
        })?;
    if driver_lookup.duplicates() > 0 {
        warn!(
            "broadcast join: {} rows of {} repeat an earlier key and are ignored",
            driver_lookup.duplicates(),
            right.name()
        );
    }

    let replicas = cluster.broadcast(right.clone())?;
    let mut lookups = vec![driver_lookup];
    lookups.extend(
        cluster
            .map_nodes(|node| {
                if node == 0 {
                    return Ok(None);
                }
                let replica = replicas.on(node);
                JoinLookup::build(replica, &spec.right_keys, spec.right_group, &payload).map(Some)
            })?
            .into_iter()
            .flatten(),
    );

    let task = JoinTask {
        lookups,
        left_keys: spec.left_keys.clone(),
        left_group: spec.left_group,
        width: payload.len(),
    };
    let JoinedSlices(mut slices) = cluster.map_reduce(left, &task)?;
    slices.sort_unstable_by_key(|slice| slice.chunk);

    let mut out = left.clone();
    for (j, &col) in payload.iter().enumerate() {
        let right_column = right.require_column(col)?;
        let mut values = Vec::with_capacity(left.row_count());
        for slice in &mut slices {
            if let Some(part) = slice.columns.get_mut(j) {
                values.append(part);
            }
        }
        let domain = right_column.domain().map(|d| d.as_ref().clone());
        let schema = ColumnSchema::new(right_column.name(), right_column.column_type());
        let column = out.column_from_values(schema, domain, &values)?;
        out.set_column(column)?;
    }
    debug!("broadcast join {} finished", left.name());
    Ok(out)
}

/// Read-only index of a right frame: key labels to payload values of the first matching row.
#[derive(Clone, Debug)]
pub struct JoinLookup {
    rows: AHashMap<CompositeKey, usize>,
    payload: Vec<Vec<Value>>,
    duplicates: usize,
}

impl JoinLookup {
    pub fn build(
        right: &Frame,
        keys: &[usize],
        group: Option<usize>,
        payload_columns: &[usize],
    ) -> Result<Self, TaskError> {
        let mut rows = AHashMap::new();
        let mut payload = Vec::new();
        let mut duplicates = 0;
        let mut scratch = ScratchKey::new();

        for chunk in right.chunks() {
            for row in 0..chunk.len() {
                if !load_key(&mut scratch, &chunk, keys, group, row)? {
                    continue;
                }
                if rows.contains_key(scratch.as_key()) {
                    duplicates += 1;
                    continue;
                }
                rows.insert(scratch.to_key(), payload.len());
                payload.push(payload_columns.iter().map(|&col| chunk.value(col, row)).collect());
            }
        }

        Ok(Self {
            rows,
            payload,
            duplicates,
        })
    }

    pub fn get(&self, key: &CompositeKey) -> Option<&[Value]> {
        let idx = *self.rows.get(key)?;
        self.payload.get(idx).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Right rows skipped because an earlier row had the same key.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}

/// Payload values for the rows of one left chunk, column-major.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinedSlice {
    pub chunk: usize,
    pub columns: Vec<Vec<Value>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinedSlices(pub Vec<JoinedSlice>);

struct JoinTask {
    /// One lookup per node, indexed by node id.
    lookups: Vec<JoinLookup>,
    left_keys: Vec<usize>,
    left_group: Option<usize>,
    width: usize,
}

impl MapReduce for JoinTask {
    type Output = JoinedSlices;

    fn empty(&self) -> JoinedSlices {
        JoinedSlices::default()
    }

    fn map(&self, ctx: &TaskContext, chunk: &ChunkView<'_>) -> Result<JoinedSlices, TaskError> {
        let lookup = &self.lookups[ctx.node];
        let mut columns: Vec<Vec<Value>> = (0..self.width)
            .map(|_| Vec::with_capacity(chunk.len()))
            .collect();
        let mut scratch = ScratchKey::new();

        for row in 0..chunk.len() {
            let matched = if load_key(&mut scratch, chunk, &self.left_keys, self.left_group, row)? {
                lookup.get(scratch.as_key())
            } else {
                None
            };
            match matched {
                Some(values) => {
                    for (column, value) in columns.iter_mut().zip(values) {
                        column.push(value.clone());
                    }
                }
                None => columns.iter_mut().for_each(|column| column.push(Value::Null)),
            }
        }

        Ok(JoinedSlices(vec![JoinedSlice {
            chunk: ctx.chunk,
            columns,
        }]))
    }

    fn reduce(&self, mut left: JoinedSlices, right: JoinedSlices) -> JoinedSlices {
        left.0.extend(right.0);
        left
    }
}
