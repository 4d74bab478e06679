// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The *Executor* external interface (spec.md §6): something `commit` can
//! hand a zero-argument callback to, so draining a `TRef`'s todos never
//! runs user wake-up code while the global lock is held (spec.md §4.3).
//! The teacher's own test suite already reaches for `threadpool` for
//! exactly this shape of work (`tests/test_stm.rs`); here it is promoted
//! from a dev-dependency to the crate's real dispatch mechanism.

use lazy_static::lazy_static;
use std::sync::Arc;
use threadpool::ThreadPool;

lazy_static! {
    static ref DEFAULT_POOL: Arc<ThreadPool> = Arc::new(ThreadPool::new(num_cpus_hint()));
}

fn num_cpus_hint() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// The process-wide pool used by [`crate::atomically`]. Override per call
/// with [`crate::atomically_on`] (e.g. in tests, to isolate pools per
/// scenario).
pub(crate) fn default_pool() -> Arc<ThreadPool> {
    DEFAULT_POOL.clone()
}
