/*!
# Task Dispatch

Runs a number of independent tasks, each constructed from its index through a shared,
read-only [`TaskCData`], on one of several interchangeable backends:

- [`sequential::Sequential`] runs every task on the calling thread;
- [`threads::Threads`] spawns a fixed number of scoped OS threads;
- [`rayon_pool::RayonPool`] runs a parallel-for over the task indices on a dedicated
  `rayon` pool.

A task sees none of this. It only gets a [`TaskManager`], which it polls at its checkpoints to
learn whether a status report was requested (and to notice interruption, which surfaces as
[`MhrwError::TasksInterrupted`]).

Status reports are collected in rounds. Whenever a report is due (requested through
[`DispatchSignals::request_status_report`], or periodically), the next worker reaching a
checkpoint opens a round. Every worker busy with a task at that moment answers at its own next
checkpoint, and the worker completing the round hands the [`FullStatusReport`] to the handler.
A worker finishing its task counts as having answered.

```rust
use mini_mhrw::dispatch::{sequential::Sequential, Dispatcher, Task, TaskCData, TaskDispatcher, TaskManager};
use mini_mhrw::logging::Logger;
use mini_mhrw::Result;

struct Squares;

impl TaskCData for Squares {
    type Input = u64;
    fn task_input(&self, k: usize) -> u64 {
        k as u64
    }
}

struct Square(u64);

impl Task for Square {
    type CData = Squares;
    type Output = u64;

    fn new(input: u64, _cdata: &Squares) -> Self {
        Square(input)
    }

    fn run(self, _cdata: &Squares, _logger: &Logger, _mgr: &mut dyn TaskManager) -> Result<u64> {
        Ok(self.0 * self.0)
    }
}

let mut dispatcher = Dispatcher::<Square, _>::new(&Squares, 4, Sequential);
dispatcher.run().unwrap();
let results: Vec<u64> = dispatcher.collected_task_results().iter().flatten().copied().collect();
assert_eq!(results, vec![0, 1, 4, 9]);
```
*/

pub mod rayon_pool;
pub mod sequential;
pub mod threads;

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{MhrwError, Result};
use crate::logging::Logger;

use self::rayon_pool::RayonPool;
use self::sequential::Sequential;
use self::threads::Threads;

/// Data shared read-only by all tasks of a run.
pub trait TaskCData: Sync {
    type Input;

    /// The input of the `k`-th task.
    fn task_input(&self, k: usize) -> Self::Input;
}

/// One independent unit of work.
pub trait Task: Sized {
    type CData: TaskCData;
    type Output: Send;

    fn new(input: <Self::CData as TaskCData>::Input, cdata: &Self::CData) -> Self;

    /// Runs the task to completion. `mgr` must be polled regularly, see [`TaskManager`].
    fn run(
        self,
        cdata: &Self::CData,
        logger: &Logger,
        mgr: &mut dyn TaskManager,
    ) -> Result<Self::Output>;
}

/// The interface a running task uses to talk back to its dispatcher.
pub trait TaskManager {
    /// Whether the dispatcher would like a status report from this task.
    ///
    /// Returns [`MhrwError::TasksInterrupted`] once an interruption was requested; the task
    /// should propagate it.
    fn status_report_requested(&mut self) -> Result<bool>;

    fn submit_status_report(&mut self, report: TaskStatusReport);
}

/// Progress of a single task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStatusReport {
    /// Between 0 and 1.
    pub fraction_done: f64,
    pub msg: String,
}

impl TaskStatusReport {
    pub fn new(fraction_done: f64, msg: impl Into<String>) -> Self {
        Self {
            fraction_done,
            msg: msg.into(),
        }
    }
}

impl Default for TaskStatusReport {
    fn default() -> Self {
        Self::new(0.0, "<unknown>")
    }
}

/// Progress of a whole run, as handed to the status report handler.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FullStatusReport {
    pub num_completed: usize,
    pub num_total_runs: usize,
    pub elapsed: Duration,
    /// One entry per worker: whether it was working on a task and answered this round.
    pub workers_running: Vec<bool>,
    pub workers_reports: Vec<Option<TaskStatusReport>>,
}

impl FullStatusReport {
    /// Completed tasks plus the fractions reported by running ones, over the number of tasks.
    pub fn total_fraction_done(&self) -> f64 {
        if self.num_total_runs == 0 {
            return 1.0;
        }
        let partial: f64 = self
            .workers_running
            .iter()
            .zip(&self.workers_reports)
            .filter(|(running, _)| **running)
            .filter_map(|(_, report)| report.as_ref().map(|r| r.fraction_done))
            .sum();
        (self.num_completed as f64 + partial) / self.num_total_runs as f64
    }

    /// A multi-line summary suitable for printing to a terminal.
    pub fn human_report(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(
            s,
            "=========================== Intermediate Progress Report ============================"
        );
        let _ = writeln!(
            s,
            "  {}s elapsed  -  {}/{} runs completed  -  {:5.2}% total done",
            fmt_duration(self.elapsed),
            self.num_completed,
            self.num_total_runs,
            self.total_fraction_done() * 100.0
        );
        match self.workers_running.len() {
            0 => {}
            1 => {
                if let (true, Some(report)) = (self.workers_running[0], &self.workers_reports[0]) {
                    let _ = writeln!(s, "--> {}", report.msg);
                }
            }
            n => {
                let working = self.workers_running.iter().filter(|r| **r).count();
                let _ = writeln!(
                    s,
                    "Current Run(s) information (workers working/spawned {working}/{n}):"
                );
                for (k, (running, report)) in
                    self.workers_running.iter().zip(&self.workers_reports).enumerate()
                {
                    match (running, report) {
                        (true, Some(report)) => {
                            let _ = writeln!(s, "=== {k:>2}: {}", report.msg);
                        }
                        _ => {
                            let _ = writeln!(s, "=== {k:>2}: <idle>");
                        }
                    }
                }
            }
        }
        let _ = writeln!(
            s,
            "====================================================================================="
        );
        s
    }
}

/// Formats a duration as `h:mm:ss.mmm`.
pub fn fmt_duration(d: Duration) -> String {
    let total_ms = d.as_millis();
    let secs = total_ms / 1000;
    format!(
        "{}:{:02}:{:02}.{:03}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        total_ms % 1000
    )
}

/// Flags through which a running dispatch can be poked from the outside.
///
/// Setting a flag is a single atomic store, so these may be used from any thread, including
/// from a signal-handling context. The flags are acted upon by the workers at their next
/// checkpoint.
#[derive(Debug, Clone, Default)]
pub struct DispatchSignals {
    inner: Arc<SignalFlags>,
}

#[derive(Debug, Default)]
struct SignalFlags {
    report_requests: AtomicU64,
    interrupt: AtomicBool,
}

impl DispatchSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_status_report(&self) {
        self.inner.report_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// The request stays in force until [`DispatchSignals::clear_interrupt`]: it also stops
    /// runs started later on, including a run started after the request was made.
    pub fn request_interrupt(&self) {
        self.inner.interrupt.store(true, Ordering::Relaxed);
    }

    /// Withdraws an interrupt request, e.g. to run the remaining tasks of an interrupted
    /// dispatch again.
    pub fn clear_interrupt(&self) {
        self.inner.interrupt.store(false, Ordering::Relaxed);
    }

    pub fn interrupt_requested(&self) -> bool {
        self.inner.interrupt.load(Ordering::Relaxed)
    }

    fn report_requests(&self) -> u64 {
        self.inner.report_requests.load(Ordering::Relaxed)
    }
}

/// What happens to the other tasks when one of them fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskErrorPolicy {
    /// Interrupt all tasks and make [`TaskDispatcher::run`] fail.
    #[default]
    #[serde(rename = "abort")]
    AbortAll,
    /// Record the failure and keep going with the other tasks.
    Isolate,
}

/// A task which returned an error other than interruption.
#[derive(Debug)]
pub struct TaskFailure {
    pub task: usize,
    pub error: MhrwError,
}

/// Receives the full status reports.
pub type StatusReportHandler = dyn FnMut(&FullStatusReport) + Send;

/// Common interface of the task dispatchers.
pub trait TaskDispatcher<T: Task> {
    /// Runs all tasks.
    ///
    /// Fails with [`MhrwError::TasksInterrupted`] if the run was interrupted before all tasks
    /// completed, and with [`MhrwError::TaskFailed`] when a task failed under
    /// [`TaskErrorPolicy::AbortAll`]. Results of the tasks which did complete are available
    /// either way.
    fn run(&mut self) -> Result<()>;

    /// A handle on the flags of this dispatcher, usable while [`TaskDispatcher::run`] executes.
    fn signals(&self) -> DispatchSignals;

    fn set_status_report_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&FullStatusReport) + Send + 'static;

    fn request_status_report(&self) {
        self.signals().request_status_report()
    }

    /// Requests a status report every `interval`, or stops doing so with `None`.
    fn request_periodic_status_report(&mut self, interval: Option<Duration>);

    fn request_interrupt(&self) {
        self.signals().request_interrupt()
    }

    /// One slot per task, `None` for tasks which did not complete.
    fn collected_task_results(&self) -> &[Option<T::Output>];

    fn collected_task_result(&self, k: usize) -> Option<&T::Output> {
        self.collected_task_results().get(k)?.as_ref()
    }

    fn task_failures(&self) -> &[TaskFailure];

    fn num_task_runs(&self) -> usize;
}

/// Where and how the tasks of a run are executed.
pub trait Backend {
    /// Number of workers, i.e. of entries in the status reports.
    fn num_workers(&self) -> usize;

    /// Executes every task of `run`, calling [`RunContext::run_task`] once per index (or
    /// [`RunContext::worker_loop`] once per worker).
    fn drive<T: Task>(&self, run: &RunContext<'_, T>) -> Result<()>;
}

/// Names of the backends, for choosing one at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sequential,
    #[default]
    Threads,
    Rayon,
}

impl BackendKind {
    /// Builds the backend with `num_threads` workers (ignored for `Sequential`, zero means one
    /// per core).
    pub fn build(self, num_threads: usize) -> Result<AnyBackend> {
        Ok(match self {
            BackendKind::Sequential => AnyBackend::Sequential(Sequential),
            BackendKind::Threads => AnyBackend::Threads(Threads::new(num_threads)),
            BackendKind::Rayon => AnyBackend::Rayon(RayonPool::new(num_threads)?),
        })
    }
}

/// A backend chosen at runtime.
pub enum AnyBackend {
    Sequential(Sequential),
    Threads(Threads),
    Rayon(RayonPool),
}

impl Backend for AnyBackend {
    fn num_workers(&self) -> usize {
        match self {
            AnyBackend::Sequential(b) => b.num_workers(),
            AnyBackend::Threads(b) => b.num_workers(),
            AnyBackend::Rayon(b) => b.num_workers(),
        }
    }

    fn drive<T: Task>(&self, run: &RunContext<'_, T>) -> Result<()> {
        match self {
            AnyBackend::Sequential(b) => b.drive(run),
            AnyBackend::Threads(b) => b.drive(run),
            AnyBackend::Rayon(b) => b.drive(run),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct PendingReport {
    generation: u64,
    waiting: usize,
    report: FullStatusReport,
}

struct Schedule {
    num_completed: usize,
    workers_running: Vec<bool>,
    handled_requests: u64,
    generation: u64,
    last_report: Instant,
    pending: Option<PendingReport>,
}

/// The state of a run, shared by all workers of a backend.
pub struct RunContext<'r, T: Task> {
    cdata: &'r T::CData,
    num_tasks: usize,
    num_workers: usize,
    signals: &'r DispatchSignals,
    policy: TaskErrorPolicy,
    logger: &'r Logger,
    periodic: Option<Duration>,
    has_handler: bool,
    start: Instant,
    next_task: AtomicUsize,
    aborting: AtomicBool,
    interrupted: AtomicBool,
    schedule: Mutex<Schedule>,
    handler: Mutex<Option<Box<StatusReportHandler>>>,
    results: Mutex<Vec<Option<T::Output>>>,
    failures: Mutex<Vec<TaskFailure>>,
}

impl<'r, T: Task> RunContext<'r, T> {
    pub fn num_tasks(&self) -> usize {
        self.num_tasks
    }

    /// Whether workers should stop picking up new tasks.
    pub fn should_stop(&self) -> bool {
        self.signals.interrupt_requested() || self.aborting.load(Ordering::Relaxed)
    }

    /// Runs tasks on behalf of `worker_id` until none are left or the run is interrupted.
    pub fn worker_loop(&self, worker_id: usize) {
        loop {
            let k = self.next_task.fetch_add(1, Ordering::Relaxed);
            if k >= self.num_tasks {
                break;
            }
            self.run_task(worker_id, k);
        }
    }

    /// Runs the `k`-th task on worker `worker_id` and stores its outcome.
    pub fn run_task(&self, worker_id: usize, k: usize) {
        if self.should_stop() {
            self.interrupted.store(true, Ordering::Relaxed);
            return;
        }

        let answered = self.task_started(worker_id);
        let mut mgr = WorkerManager {
            ctx: self,
            worker_id,
            answered,
        };

        self.logger
            .debug(format_args!("running task #{k} on worker #{worker_id}"));
        let input = self.cdata.task_input(k);
        let outcome = T::new(input, self.cdata).run(self.cdata, self.logger, &mut mgr);
        let answered = mgr.answered;
        self.task_finished(worker_id, answered);

        match outcome {
            Ok(output) => {
                if let Some(slot) = lock(&self.results).get_mut(k) {
                    *slot = Some(output);
                }
            }
            Err(err) if err.is_interrupted() => {
                self.logger.debug(format_args!("task #{k} interrupted"));
                self.interrupted.store(true, Ordering::Relaxed);
            }
            Err(err) => {
                self.logger.warn(format_args!("task #{k} failed: {err}"));
                if self.policy == TaskErrorPolicy::AbortAll {
                    self.aborting.store(true, Ordering::Relaxed);
                }
                lock(&self.failures).push(TaskFailure { task: k, error: err });
            }
        }
    }

    fn task_started(&self, worker_id: usize) -> u64 {
        let mut schedule = lock(&self.schedule);
        if let Some(running) = schedule.workers_running.get_mut(worker_id) {
            *running = true;
        }
        // a round opened before this task started does not wait for it
        schedule.generation
    }

    fn task_finished(&self, worker_id: usize, answered: u64) {
        let ready = {
            let mut schedule = lock(&self.schedule);
            schedule.num_completed += 1;
            if let Some(running) = schedule.workers_running.get_mut(worker_id) {
                *running = false;
            }
            let complete = match schedule.pending.as_mut() {
                Some(pending) if pending.generation != answered => {
                    pending.waiting = pending.waiting.saturating_sub(1);
                    pending.waiting == 0
                }
                _ => false,
            };
            if complete {
                schedule.pending.take()
            } else {
                None
            }
        };
        if let Some(pending) = ready {
            self.send_report(&pending.report);
        }
    }

    fn maybe_open_round(&self, schedule: &mut Schedule) {
        let requests = self.signals.report_requests();
        let requested = requests != schedule.handled_requests;
        schedule.handled_requests = requests;
        let periodic_due = self
            .periodic
            .is_some_and(|interval| schedule.last_report.elapsed() > interval);
        if !(requested || periodic_due) || schedule.pending.is_some() {
            return;
        }
        schedule.last_report = Instant::now();
        if !self.has_handler {
            self.logger.warn(format_args!(
                "status report requested, but no status report handler is set"
            ));
            return;
        }

        schedule.generation += 1;
        let waiting = schedule.workers_running.iter().filter(|r| **r).count();
        schedule.pending = Some(PendingReport {
            generation: schedule.generation,
            waiting,
            report: FullStatusReport {
                num_completed: schedule.num_completed,
                num_total_runs: self.num_tasks,
                elapsed: self.start.elapsed(),
                workers_running: vec![false; self.num_workers],
                workers_reports: vec![None; self.num_workers],
            },
        });
    }

    fn send_report(&self, report: &FullStatusReport) {
        if let Some(handler) = lock(&self.handler).as_mut() {
            handler(report);
        }
    }
}

struct WorkerManager<'c, 'r, T: Task> {
    ctx: &'c RunContext<'r, T>,
    worker_id: usize,
    /// Generation of the last round this worker answered.
    answered: u64,
}

impl<'c, 'r, T: Task> TaskManager for WorkerManager<'c, 'r, T> {
    fn status_report_requested(&mut self) -> Result<bool> {
        if self.ctx.should_stop() {
            return Err(MhrwError::TasksInterrupted);
        }
        let mut schedule = lock(&self.ctx.schedule);
        self.ctx.maybe_open_round(&mut schedule);
        Ok(schedule
            .pending
            .as_ref()
            .is_some_and(|pending| pending.generation != self.answered))
    }

    fn submit_status_report(&mut self, report: TaskStatusReport) {
        let ready = {
            let mut schedule = lock(&self.ctx.schedule);
            let complete = match schedule.pending.as_mut() {
                Some(pending) if pending.generation != self.answered => {
                    self.answered = pending.generation;
                    if let Some(running) = pending.report.workers_running.get_mut(self.worker_id) {
                        *running = true;
                    }
                    if let Some(slot) = pending.report.workers_reports.get_mut(self.worker_id) {
                        *slot = Some(report);
                    }
                    pending.waiting = pending.waiting.saturating_sub(1);
                    pending.waiting == 0
                }
                _ => false,
            };
            if complete {
                schedule.pending.take()
            } else {
                None
            }
        };
        if let Some(pending) = ready {
            self.ctx.send_report(&pending.report);
        }
    }
}

/// Runs `num_tasks` tasks of type `T` on the backend `B`.
pub struct Dispatcher<'a, T: Task, B> {
    cdata: &'a T::CData,
    num_tasks: usize,
    backend: B,
    policy: TaskErrorPolicy,
    logger: Logger,
    signals: DispatchSignals,
    periodic: Option<Duration>,
    handler: Option<Box<StatusReportHandler>>,
    results: Vec<Option<T::Output>>,
    failures: Vec<TaskFailure>,
}

impl<'a, T: Task, B: Backend> Dispatcher<'a, T, B> {
    pub fn new(cdata: &'a T::CData, num_tasks: usize, backend: B) -> Self {
        Self {
            cdata,
            num_tasks,
            backend,
            policy: TaskErrorPolicy::default(),
            logger: Logger::new("mini_mhrw::dispatch"),
            signals: DispatchSignals::new(),
            periodic: None,
            handler: None,
            results: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn with_error_policy(mut self, policy: TaskErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Uses existing signals, e.g. ones also known to the tasks or to a signal handler.
    pub fn with_signals(mut self, signals: DispatchSignals) -> Self {
        self.signals = signals;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn error_policy(&self) -> TaskErrorPolicy {
        self.policy
    }

    /// Moves the collected results out of the dispatcher.
    pub fn into_task_results(self) -> Vec<Option<T::Output>> {
        self.results
    }
}

impl<'a, T: Task, B: Backend> TaskDispatcher<T> for Dispatcher<'a, T, B> {
    fn run(&mut self) -> Result<()> {
        let num_workers = self.backend.num_workers().max(1);
        self.logger.debug(format_args!(
            "dispatching {} tasks to {} worker(s)",
            self.num_tasks, num_workers
        ));

        let start = Instant::now();
        let ctx = RunContext::<T> {
            cdata: self.cdata,
            num_tasks: self.num_tasks,
            num_workers,
            signals: &self.signals,
            policy: self.policy,
            logger: &self.logger,
            periodic: self.periodic,
            has_handler: self.handler.is_some(),
            start,
            next_task: AtomicUsize::new(0),
            aborting: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            schedule: Mutex::new(Schedule {
                num_completed: 0,
                workers_running: vec![false; num_workers],
                handled_requests: self.signals.report_requests(),
                generation: 0,
                last_report: start,
                pending: None,
            }),
            handler: Mutex::new(self.handler.take()),
            results: Mutex::new((0..self.num_tasks).map(|_| None).collect()),
            failures: Mutex::new(Vec::new()),
        };

        let driven = self.backend.drive(&ctx);

        let interrupted = ctx.interrupted.load(Ordering::Relaxed);
        self.handler = ctx.handler.into_inner().unwrap_or_else(PoisonError::into_inner);
        self.results = ctx.results.into_inner().unwrap_or_else(PoisonError::into_inner);
        self.failures = ctx.failures.into_inner().unwrap_or_else(PoisonError::into_inner);
        driven?;

        if self.policy == TaskErrorPolicy::AbortAll && !self.failures.is_empty() {
            let first = self.failures.remove(0);
            return Err(MhrwError::TaskFailed {
                task: first.task,
                source: Box::new(first.error),
            });
        }
        self.failures.sort_by_key(|f| f.task);
        if interrupted {
            return Err(MhrwError::TasksInterrupted);
        }
        self.logger.debug(format_args!(
            "all tasks done after {}",
            fmt_duration(start.elapsed())
        ));
        Ok(())
    }

    fn signals(&self) -> DispatchSignals {
        self.signals.clone()
    }

    fn set_status_report_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&FullStatusReport) + Send + 'static,
    {
        self.handler = Some(Box::new(handler));
    }

    fn request_periodic_status_report(&mut self, interval: Option<Duration>) {
        self.periodic = interval;
    }

    fn collected_task_results(&self) -> &[Option<T::Output>] {
        &self.results
    }

    fn task_failures(&self) -> &[TaskFailure] {
        &self.failures
    }

    fn num_task_runs(&self) -> usize {
        self.num_tasks
    }
}

/// Number of threads to use when none is configured.
pub fn default_num_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn report(running: Vec<bool>, msgs: Vec<Option<(f64, &str)>>) -> FullStatusReport {
        FullStatusReport {
            num_completed: 3,
            num_total_runs: 10,
            elapsed: Duration::from_millis(3_723_500),
            workers_running: running,
            workers_reports: msgs
                .into_iter()
                .map(|m| m.map(|(f, s)| TaskStatusReport::new(f, s)))
                .collect(),
        }
    }

    #[test]
    fn test_fmt_duration() {
        assert_eq!(fmt_duration(Duration::from_millis(3_723_500)), "1:02:03.500");
        assert_eq!(fmt_duration(Duration::from_millis(59_001)), "0:00:59.001");
    }

    #[test]
    fn test_total_fraction_done_counts_running_workers_only() {
        let r = report(
            vec![true, false],
            vec![Some((0.5, "a")), Some((0.9, "stale"))],
        );
        assert_abs_diff_eq!(r.total_fraction_done(), 0.35, epsilon = 1e-12);
        assert_eq!(FullStatusReport::default().total_fraction_done(), 1.0);
    }

    #[test]
    fn test_human_report_several_workers() {
        let r = report(vec![true, false], vec![Some((0.5, "run a")), None]);
        let expected = "\
=========================== Intermediate Progress Report ============================
  1:02:03.500s elapsed  -  3/10 runs completed  -  35.00% total done
Current Run(s) information (workers working/spawned 1/2):
===  0: run a
===  1: <idle>
=====================================================================================
";
        assert_eq!(r.human_report(), expected);
    }

    #[test]
    fn test_human_report_single_worker() {
        let r = report(vec![true], vec![Some((0.0, "only one"))]);
        let text = r.human_report();
        assert!(text.contains("\n--> only one\n"));
        assert!(text.contains("30.00% total done"));

        let idle = report(vec![false], vec![None]);
        assert!(!idle.human_report().contains("-->"));
    }

    #[test]
    fn test_signals_are_shared_between_clones() {
        let signals = DispatchSignals::new();
        let other = signals.clone();
        assert!(!signals.interrupt_requested());
        other.request_interrupt();
        assert!(signals.interrupt_requested());
        other.request_status_report();
        other.request_status_report();
        assert_eq!(signals.report_requests(), 2);
    }
}
