//! Runs tasks on a fixed number of scoped OS threads.
//!
//! Each thread repeatedly takes the next task index which has not been handed out yet, so a
//! slow task does not hold back the others.

use std::thread;

use super::{default_num_threads, Backend, RunContext, Task};
use crate::error::{MhrwError, Result};

#[derive(Debug, Clone, Copy)]
pub struct Threads {
    num_threads: usize,
}

impl Threads {
    /// `num_threads` workers; zero means one worker per available core.
    pub fn new(num_threads: usize) -> Self {
        let num_threads = if num_threads == 0 {
            default_num_threads()
        } else {
            num_threads
        };
        Self { num_threads }
    }
}

impl Default for Threads {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Backend for Threads {
    fn num_workers(&self) -> usize {
        self.num_threads
    }

    fn drive<T: Task>(&self, run: &RunContext<'_, T>) -> Result<()> {
        thread::scope(|scope| {
            let handles: Vec<_> = (0..self.num_threads)
                .map(|worker_id| scope.spawn(move || run.worker_loop(worker_id)))
                .collect();

            let mut outcome = Ok(());
            for (worker_id, handle) in handles.into_iter().enumerate() {
                if handle.join().is_err() && outcome.is_ok() {
                    outcome = Err(MhrwError::WorkerPanicked(worker_id));
                }
            }
            outcome
        })
    }
}
