//! In-process cluster: chunk ownership, map/reduce execution and broadcast.
//!
//! A [`Cluster`] models `nodes` workers. Every chunk of a frame has exactly one home node
//! (`chunk % nodes`). A job maps each chunk once, reduces chunk results per node in chunk order,
//! ships each node's partial result to the driver (node 0) and reduces those in node order. Both
//! reductions follow a fixed pairwise tree, so results do not depend on thread scheduling.

use crate::error::{EngineError, EngineResult, TaskError};
use crate::parallel;
use crate::wire::Wire;
use dframe_columnar::{ChunkView, Frame};
use log::{debug, trace};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const NODES_ENV: &str = "DFRAME_NODES";
pub const WIRE_TRANSPORT_ENV: &str = "DFRAME_WIRE_TRANSPORT";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterOptions {
    /// Number of simulated nodes; must be at least 1.
    pub nodes: usize,
    /// Worker threads. `None` uses the shared pool sized by `RAYON_NUM_THREADS`; `Some(1)` runs
    /// every task on the calling thread.
    pub threads: Option<usize>,
    /// Round-trip partial results and broadcast replicas through the wire codec.
    pub wire_transport: bool,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            nodes: 1,
            threads: None,
            wire_transport: true,
        }
    }
}

impl ClusterOptions {
    /// Defaults overridden by `DFRAME_NODES` and `DFRAME_WIRE_TRANSPORT`.
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(nodes) = std::env::var(NODES_ENV)
            .ok()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
        {
            options.nodes = nodes;
        }
        if let Some(wire) = std::env::var(WIRE_TRANSPORT_ENV)
            .ok()
            .and_then(|s| parse_flag(&s))
        {
            options.wire_transport = wire;
        }
        options
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// Where a `map` call runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskContext {
    pub node: usize,
    pub nodes: usize,
    pub chunk: usize,
    /// Frame row of the chunk's first row.
    pub first_row: usize,
}

/// A distributed computation over the chunks of one frame.
///
/// `map` sees only the chunk it is given. `reduce` must be associative and commutative: the
/// runtime only promises that every chunk result is folded in exactly once.
pub trait MapReduce: Sync {
    type Output: Wire + Send;

    /// Identity of `reduce`; the result of a job over zero chunks.
    fn empty(&self) -> Self::Output;

    fn map(&self, ctx: &TaskContext, chunk: &ChunkView<'_>) -> Result<Self::Output, TaskError>;

    fn reduce(&self, left: Self::Output, right: Self::Output) -> Self::Output;
}

/// Read-only per-node copies of a broadcast value.
#[derive(Debug)]
pub struct Broadcast<T> {
    replicas: Vec<Arc<T>>,
    encoded_len: usize,
}

impl<T> Broadcast<T> {
    /// Replica held by `node`.
    ///
    /// # Panics
    ///
    /// Panics if `node` is not a node of the cluster that made the broadcast.
    pub fn on(&self, node: usize) -> &Arc<T> {
        &self.replicas[node]
    }

    pub fn nodes(&self) -> usize {
        self.replicas.len()
    }

    /// Encoded payload size; zero when the broadcast skipped the wire.
    pub fn encoded_len(&self) -> usize {
        self.encoded_len
    }
}

#[derive(Debug)]
pub struct Cluster {
    options: ClusterOptions,
    #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl Cluster {
    pub fn new(options: ClusterOptions) -> EngineResult<Self> {
        if options.nodes == 0 {
            return Err(EngineError::Config("a cluster needs at least one node".into()));
        }
        if options.threads == Some(0) {
            return Err(EngineError::Config("thread count must be positive".into()));
        }

        #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
        let pool = match options.threads {
            None => parallel::shared_pool(),
            Some(1) => None,
            Some(n) => parallel::build_pool(n).map(Arc::new),
        };

        debug!(
            "cluster: {} nodes, {} threads, wire transport {}",
            options.nodes,
            options.threads.unwrap_or_else(parallel::desired_threads),
            if options.wire_transport { "on" } else { "off" }
        );

        Ok(Self {
            options,
            #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
            pool,
        })
    }

    /// One node, one thread, no wire round trips.
    pub fn single_node() -> Self {
        Self {
            options: ClusterOptions {
                nodes: 1,
                threads: Some(1),
                wire_transport: false,
            },
            #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
            pool: None,
        }
    }

    pub fn options(&self) -> &ClusterOptions {
        &self.options
    }

    pub fn nodes(&self) -> usize {
        self.options.nodes
    }

    /// The only node allowed to process `chunk`.
    pub fn home_node(&self, chunk: usize) -> usize {
        chunk % self.options.nodes
    }

    /// Run `task` over every chunk of `frame`.
    ///
    /// The first failing chunk aborts the job: chunks that have not started are skipped and the
    /// error of the lowest failing chunk is returned as [`EngineError::Distributed`].
    pub fn map_reduce<T: MapReduce>(&self, frame: &Frame, task: &T) -> EngineResult<T::Output> {
        let chunks = frame.chunk_count();
        let nodes = self.nodes();
        debug!(
            "map_reduce over {}: {} rows in {} chunks on {} nodes",
            frame.name(),
            frame.row_count(),
            chunks,
            nodes
        );

        let abort = AtomicBool::new(false);
        let results = self.par_map(chunks, |chunk| {
            if abort.load(Ordering::Relaxed) {
                return None;
            }
            let result = self.map_chunk(frame, task, chunk);
            if result.is_err() {
                abort.store(true, Ordering::Relaxed);
            }
            Some(result)
        });

        let mut per_node: Vec<Vec<T::Output>> = (0..nodes).map(|_| Vec::new()).collect();
        for (chunk, result) in results.into_iter().enumerate() {
            match result {
                Some(Ok(output)) => per_node[self.home_node(chunk)].push(output),
                Some(Err(source)) => {
                    debug!("map_reduce over {} aborted at chunk {chunk}", frame.name());
                    return Err(EngineError::Distributed {
                        node: self.home_node(chunk),
                        chunk: Some(chunk),
                        source,
                    });
                }
                // Skipped after a failure; the failing chunk is reported when the loop reaches it.
                None => {}
            }
        }

        let mut partials = Vec::with_capacity(nodes);
        for (node, outputs) in per_node.into_iter().enumerate() {
            let partial = tree_reduce(task, outputs);
            partials.push(self.ship(node, partial)?);
        }
        let result = tree_reduce(task, partials);
        debug!("map_reduce over {} finished", frame.name());
        Ok(result)
    }

    fn map_chunk<T: MapReduce>(
        &self,
        frame: &Frame,
        task: &T,
        chunk: usize,
    ) -> Result<T::Output, TaskError> {
        let view = frame.chunk(chunk).ok_or_else(|| TaskError::MissingChunk {
            frame: frame.name().to_string(),
            chunk,
        })?;
        let ctx = TaskContext {
            node: self.home_node(chunk),
            nodes: self.nodes(),
            chunk,
            first_row: view.start(),
        };
        trace!("map chunk {chunk} ({} rows) on node {}", view.len(), ctx.node);
        task.map(&ctx, &view)
    }

    /// Replicate `value` to every node.
    ///
    /// With wire transport on, the value is encoded once and each non-driver node decodes its
    /// own replica; otherwise all nodes share the driver's copy.
    pub fn broadcast<T: Wire + Send + Sync>(&self, value: T) -> EngineResult<Broadcast<T>> {
        let driver = Arc::new(value);
        if !self.options.wire_transport || self.nodes() == 1 {
            return Ok(Broadcast {
                replicas: vec![driver; self.nodes()],
                encoded_len: 0,
            });
        }

        let bytes = T::to_bytes(&driver)?;
        debug!("broadcast {} bytes to {} nodes", bytes.len(), self.nodes());
        let remote = self.map_nodes(|node| {
            if node == 0 {
                return Ok(Arc::clone(&driver));
            }
            Ok(Arc::new(T::from_bytes(&bytes)?))
        })?;
        Ok(Broadcast {
            replicas: remote,
            encoded_len: bytes.len(),
        })
    }

    /// Run `f` once per node; a failure is reported against that node.
    pub fn map_nodes<R, F>(&self, f: F) -> EngineResult<Vec<R>>
    where
        R: Send,
        F: Fn(usize) -> Result<R, TaskError> + Sync + Send,
    {
        self.par_map(self.nodes(), &f)
            .into_iter()
            .enumerate()
            .map(|(node, result)| {
                result.map_err(|source| EngineError::Distributed {
                    node,
                    chunk: None,
                    source,
                })
            })
            .collect()
    }

    /// Move `node`'s partial result to the driver.
    fn ship<O: Wire>(&self, node: usize, partial: O) -> EngineResult<O> {
        if node == 0 || !self.options.wire_transport {
            return Ok(partial);
        }
        let shipped = partial.to_bytes().and_then(|bytes| {
            trace!("node {node} ships {} bytes", bytes.len());
            O::from_bytes(&bytes)
        });
        shipped.map_err(|err| EngineError::Distributed {
            node,
            chunk: None,
            source: err.into(),
        })
    }

    fn par_map<R, F>(&self, count: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync + Send,
    {
        #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
        {
            if let Some(pool) = &self.pool {
                use rayon::prelude::*;
                return pool.install(|| (0..count).into_par_iter().map(&f).collect());
            }
        }

        (0..count).map(f).collect()
    }
}

/// Reduce `parts` pairwise, level by level, keeping their order.
fn tree_reduce<T: MapReduce>(task: &T, mut parts: Vec<T::Output>) -> T::Output {
    while parts.len() > 1 {
        let mut next = Vec::with_capacity(parts.len().div_ceil(2));
        let mut iter = parts.into_iter();
        while let Some(left) = iter.next() {
            match iter.next() {
                Some(right) => next.push(task.reduce(left, right)),
                None => next.push(left),
            }
        }
        parts = next;
    }
    parts.pop().unwrap_or_else(|| task.empty())
}
