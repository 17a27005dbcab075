#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use rayon::ThreadPool;
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use std::sync::{Arc, OnceLock};

/// Worker threads used when a cluster does not ask for a specific count.
///
/// `RAYON_NUM_THREADS` wins when set to a positive number; otherwise the available parallelism.
pub(crate) fn desired_threads() -> usize {
    let from_env = std::env::var("RAYON_NUM_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|&n| n > 0);
    from_env.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    })
}

/// Pool shared by every cluster built with default thread settings.
///
/// The global rayon pool panics on first use when it cannot start its threads; a crate-local pool
/// lets us fall back to serial execution instead.
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
static SHARED_POOL: OnceLock<Option<Arc<ThreadPool>>> = OnceLock::new();

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
pub(crate) fn build_pool(threads: usize) -> Option<ThreadPool> {
    let requested = threads.max(1);
    let try_build = |n| {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .thread_name(|i| format!("dframe-mr-{i}"))
            .build()
    };

    match try_build(requested) {
        Ok(pool) => Some(pool),
        Err(err) if requested > 1 => {
            log::warn!("could not start {requested} worker threads ({err}); retrying with 1");
            try_build(1).ok()
        }
        Err(err) => {
            log::warn!("could not start a worker pool ({err}); running serially");
            None
        }
    }
}

/// Returns the shared pool, if one could be created.
#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
pub(crate) fn shared_pool() -> Option<Arc<ThreadPool>> {
    SHARED_POOL
        .get_or_init(|| build_pool(desired_threads()).map(Arc::new))
        .clone()
}
