//! Chunked columnar frames.
//!
//! This crate focuses on:
//! - Typed columns split into row-range chunks that share one layout per frame.
//! - Categorical columns stored as codes into a per-column [`Domain`] of string levels.
//! - Row-local chunk access ([`ChunkView`]) for partition-at-a-time execution.
//! - Appending computed, constant and all-missing columns after the fact.
//! - serde support; deserialized frames pass the same checks as built ones.

#![forbid(unsafe_code)]

mod bitmap;
mod builder;
mod chunk;
mod domain;
mod error;
mod frame;
mod types;

pub use crate::bitmap::BitVec;
pub use crate::builder::{FrameBuilder, FrameOptions};
pub use crate::chunk::{Chunk, ChunkData, ChunkLayout};
pub use crate::domain::Domain;
pub use crate::error::{FrameError, FrameResult};
pub use crate::frame::{ChunkView, Column, Frame};
pub use crate::types::{ColumnSchema, ColumnType, Value};
