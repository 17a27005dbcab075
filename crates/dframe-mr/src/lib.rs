//! Distributed map/reduce over chunked frames.
//!
//! - [`Cluster`] owns chunk placement and runs [`MapReduce`] tasks with a fixed reduction order.
//! - [`EncodingAggregator`] / [`build_encoding_table`] aggregate numerator and denominator sums
//!   per ([`CompositeKey`]) label and group value.
//! - [`broadcast_join`] replicates a small frame to every node and joins it onto a large one
//!   without reordering the large frame's rows.
//! - [`Wire`] frames the bincode encoding of partial results and broadcast payloads.

#![forbid(unsafe_code)]

mod cluster;
mod encoding;
mod error;
mod join;
mod key;
mod parallel;
mod wire;

pub use crate::cluster::{
    Broadcast, Cluster, ClusterOptions, MapReduce, TaskContext, NODES_ENV, WIRE_TRANSPORT_ENV,
};
pub use crate::encoding::{
    build_encoding_table, DuplicateKeyError, EncodingAggregator, EncodingColumns, EncodingData,
    EncodingFrameNames, EncodingTable, DENOMINATOR_COL, NUMERATOR_COL,
};
pub use crate::error::{EngineError, EngineResult, TaskError};
pub use crate::join::{
    broadcast_join, broadcast_join_with, JoinLookup, JoinSpec, JoinedSlice, JoinedSlices,
};
pub use crate::key::{
    group_value_from_f64, group_value_from_i64, CompositeKey, KeyLevels, ScratchKey, NO_GROUP,
};
pub use crate::wire::{CodecError, Wire, WIRE_MAGIC, WIRE_VERSION};
