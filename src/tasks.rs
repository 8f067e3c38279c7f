/*!
# Random Walks as Dispatchable Tasks

[`MHRandomWalkTask`] runs one complete random walk per task. Everything a walk needs is built
from an [`MHRWTaskCData`], which is shared by all tasks; the only per-task input is the seed,
`base_seed + k` for the `k`-th task, so that a run is reproducible whatever the backend and
however the tasks are scheduled.

While walking, the task checks at every sweep end whether a status report is due (this is
also where interruption is noticed).
*/

use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::fmt::Write as _;
use std::marker::PhantomData;

use crate::controller::Controller;
use crate::core::{Checkpoint, MHRWParams, Phase, StatsCollector, SweepEnd, Walker};
use crate::dispatch::{Task, TaskCData, TaskManager, TaskStatusReport};
use crate::error::Result;
use crate::logging::Logger;
use crate::metropolis_hastings::MHRandomWalk;

/// Shared data from which each task assembles its random walk.
pub trait MHRWTaskCData: Sync {
    type Walker: Walker;
    type Stats: StatsCollector<<Self::Walker as Walker>::Point>;
    type Controller: Controller<Self::Walker, Self::Stats>;
    /// What is kept of the stats collector once the walk is over.
    type StatsResult: Send;

    fn mhrw_params(&self) -> MHRWParams<<Self::Walker as Walker>::Params>;

    fn base_seed(&self) -> u64;

    fn create_walker(&self, logger: &Logger) -> Result<Self::Walker>;

    fn create_stats(&self, logger: &Logger) -> Result<Self::Stats>;

    fn create_controller(&self, logger: &Logger) -> Result<Self::Controller>;

    fn stats_result(&self, stats: Self::Stats) -> Result<Self::StatsResult>;
}

impl<CD: MHRWTaskCData> TaskCData for CD {
    /// The seed of the task's random number generator.
    type Input = u64;

    fn task_input(&self, k: usize) -> u64 {
        self.base_seed().wrapping_add(k as u64)
    }
}

/// Outcome of one random walk.
#[derive(Debug, Clone, PartialEq)]
pub struct MHRandomWalkTaskResult<SR, WP> {
    pub stats_result: SR,
    /// Parameters at the end of the walk, after any adjustment by the controllers.
    pub mhrw_params: MHRWParams<WP>,
    /// Acceptance ratio over the whole running phase.
    pub acceptance_ratio: f64,
}

type WalkerParams<CD> = <<CD as MHRWTaskCData>::Walker as Walker>::Params;

/// Runs one random walk as a task.
pub struct MHRandomWalkTask<CD> {
    seed: u64,
    _cdata: PhantomData<fn() -> CD>,
}

impl<CD> MHRandomWalkTask<CD> {
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl<CD> Task for MHRandomWalkTask<CD>
where
    CD: MHRWTaskCData,
    WalkerParams<CD>: Send,
{
    type CData = CD;
    type Output = MHRandomWalkTaskResult<CD::StatsResult, WalkerParams<CD>>;

    fn new(seed: u64, _cdata: &CD) -> Self {
        Self {
            seed,
            _cdata: PhantomData,
        }
    }

    fn run(self, cdata: &CD, logger: &Logger, mgr: &mut dyn TaskManager) -> Result<Self::Output> {
        logger.debug(format_args!("starting random walk with seed {}", self.seed));

        let mut walker = cdata.create_walker(logger)?;
        let mut stats = cdata.create_stats(logger)?;
        let mut controller = cdata.create_controller(logger)?;
        let mut rng = SmallRng::seed_from_u64(self.seed);
        let mut check = StatusReportCheck::new(mgr);

        let (mhrw_params, acceptance_ratio) = {
            let mut rw = MHRandomWalk::new(
                cdata.mhrw_params(),
                &mut walker,
                &mut stats,
                &mut controller,
                &mut rng,
            )
            .with_checkpoint(&mut check)
            .with_logger(logger.sub_logger("mhrw"));
            rw.run()?;
            (rw.params().clone(), rw.acceptance_ratio())
        };

        logger.debug(format_args!(
            "random walk done, acceptance ratio = {:.4}",
            acceptance_ratio
        ));

        Ok(MHRandomWalkTaskResult {
            stats_result: cdata.stats_result(stats)?,
            mhrw_params,
            acceptance_ratio,
        })
    }
}

/// Answers status report requests of the task manager at sweep ends.
pub struct StatusReportCheck<'m> {
    mgr: &'m mut dyn TaskManager,
}

impl<'m> StatusReportCheck<'m> {
    pub fn new(mgr: &'m mut dyn TaskManager) -> Self {
        Self { mgr }
    }
}

impl<'m, WP> Checkpoint<WP> for StatusReportCheck<'m> {
    fn at_sweep_end(&mut self, sweep: &SweepEnd<'_, WP>) -> Result<()> {
        if self.mgr.status_report_requested()? {
            self.mgr.submit_status_report(walk_status_report(sweep));
        }
        Ok(())
    }
}

/// Progress of a walk at a sweep end: the fraction of sweeps done and a readable message with
/// the status lines of the collectors and controllers.
pub fn walk_status_report<WP>(sweep: &SweepEnd<'_, WP>) -> TaskStatusReport {
    let params = sweep.params;
    let walk = sweep.walk;
    let sweep_k = walk.iter_k / params.n_sweep.max(1) + 1;
    let total_sweeps = params.n_therm.saturating_add(params.n_run);

    let done_sweeps = match walk.phase {
        Phase::Init => 0,
        Phase::Thermalizing => sweep_k,
        Phase::Running => params.n_therm.saturating_add(sweep_k),
        Phase::Done => total_sweeps,
    };
    let fraction_done = if total_sweeps == 0 {
        1.0
    } else {
        (done_sweeps as f64 / total_sweeps as f64).min(1.0)
    };

    let mut msg = match walk.phase {
        Phase::Thermalizing => format!(
            "therm. sweep {} / {}  [+rn: {}]",
            sweep_k, params.n_therm, params.n_run
        ),
        Phase::Running => format!(
            "run sweep {} / {}  [+th: {}]",
            sweep_k, params.n_run, params.n_therm
        ),
        phase => phase.to_string(),
    };
    let _ = write!(msg, " : {:5.2}% done", fraction_done * 100.0);
    if walk.phase == Phase::Running {
        let _ = write!(msg, "  [ accept ratio = {:.2} ]", walk.acceptance_ratio());
    }
    if let Some(lines) = sweep.status_lines() {
        for line in lines.lines() {
            msg.push_str("\n    ");
            msg.push_str(line);
        }
    }

    TaskStatusReport::new(fraction_done, msg)
}
