//! Runs all tasks one after the other on the calling thread.

use super::{Backend, RunContext, Task};
use crate::error::Result;

/// The single-worker backend. A panicking task unwinds straight through `run()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl Backend for Sequential {
    fn num_workers(&self) -> usize {
        1
    }

    fn drive<T: Task>(&self, run: &RunContext<'_, T>) -> Result<()> {
        run.worker_loop(0);
        Ok(())
    }
}
