//! Runs tasks as a parallel-for over the task indices on a dedicated `rayon` thread pool.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{Backend, RunContext, Task};
use crate::error::{MhrwError, Result};

pub struct RayonPool {
    pool: ThreadPool,
}

impl RayonPool {
    /// A pool of `num_threads` threads; zero lets `rayon` choose.
    pub fn new(num_threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|k| format!("mhrw-worker-{k}"))
            .build()
            .map_err(|e| MhrwError::config(format!("could not build the thread pool: {e}")))?;
        Ok(Self { pool })
    }
}

impl Backend for RayonPool {
    fn num_workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// A panicking task does not tear down the pool: the remaining tasks still run, and the
    /// panic is reported as [`MhrwError::WorkerPanicked`] afterwards.
    fn drive<T: Task>(&self, run: &RunContext<'_, T>) -> Result<()> {
        let panicked = AtomicUsize::new(usize::MAX);
        self.pool.install(|| {
            (0..run.num_tasks()).into_par_iter().for_each(|k| {
                let worker_id = rayon::current_thread_index().unwrap_or(0);
                if panic::catch_unwind(AssertUnwindSafe(|| run.run_task(worker_id, k))).is_err() {
                    let _ = panicked.compare_exchange(
                        usize::MAX,
                        worker_id,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    );
                }
            })
        });
        match panicked.into_inner() {
            usize::MAX => Ok(()),
            worker_id => Err(MhrwError::WorkerPanicked(worker_id)),
        }
    }
}
