/*!
# Random-Walk Contracts

The pieces a Metropolis–Hastings random walk is assembled from:

- a [`Walker`] proposes moves and evaluates the target function;
- [`StatsCollector`]s observe every raw move and every live sample;
- a [`Checkpoint`] is notified at the end of every sweep (status reports, interruption);
- [`MHRWParams`] fix the step size, sweep size and the number of thermalizing/running sweeps.

Controllers are defined in [`crate::controller`], the engine itself in
[`crate::metropolis_hastings`].
*/

use rand::RngCore;
use std::fmt;

use crate::error::{MhrwError, Result};

/// Whether a [`Walker`] reports plain target values or their logarithm.
///
/// The engine reads this once, when the walk is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnSyntax {
    /// [`Walker::fn_value`] returns the (positive) target value itself.
    Value,
    /// [`Walker::fn_value`] returns the logarithm of the target value.
    LogValue,
}

impl FnSyntax {
    /// The Metropolis acceptance ratio of a move from a point with value `cur_val` to a point
    /// with value `new_val`.
    pub fn acceptance(self, new_val: f64, cur_val: f64) -> f64 {
        match self {
            FnSyntax::LogValue => {
                if new_val > cur_val {
                    1.0
                } else {
                    (new_val - cur_val).exp()
                }
            }
            FnSyntax::Value => new_val / cur_val,
        }
    }
}

/**
Proposes moves and evaluates the function the random walk samples from.

Randomness is drawn from the generator the engine hands in, so that a walk is fully determined
by its seed.

# Examples

```rust
use mini_mhrw::core::{FnSyntax, StepSize, Walker};
use mini_mhrw::Result;
use rand::{Rng, RngCore};

/// Walks on the integers with a target density proportional to 2^-|x|.
struct Geometric;

impl Walker for Geometric {
    type Point = i64;
    type Params = StepSize;

    fn fn_syntax(&self) -> FnSyntax {
        FnSyntax::LogValue
    }

    fn start_point(&mut self, _rng: &mut dyn RngCore) -> Result<i64> {
        Ok(0)
    }

    fn jump_fn(&mut self, cur: &i64, _params: &StepSize, rng: &mut dyn RngCore) -> Result<i64> {
        Ok(if rng.gen::<bool>() { cur + 1 } else { cur - 1 })
    }

    fn fn_value(&mut self, pt: &i64) -> Result<f64> {
        Ok(-(pt.abs() as f64) * std::f64::consts::LN_2)
    }
}
```
*/
pub trait Walker {
    /// A point of the state space.
    type Point: Clone;
    /// Parameters of the proposal, e.g. a step size. Controllers may read and adjust them.
    type Params: Clone + fmt::Debug + PartialEq;

    fn fn_syntax(&self) -> FnSyntax;

    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// The point the walk starts from.
    fn start_point(&mut self, rng: &mut dyn RngCore) -> Result<Self::Point>;

    fn thermalizing_done(&mut self) -> Result<()> {
        Ok(())
    }

    fn done(&mut self) -> Result<()> {
        Ok(())
    }

    /// Proposes a candidate point given the current one.
    fn jump_fn(
        &mut self,
        cur: &Self::Point,
        params: &Self::Params,
        rng: &mut dyn RngCore,
    ) -> Result<Self::Point>;

    /// The target value at `pt`, plain or logarithmic according to [`Walker::fn_syntax`].
    fn fn_value(&mut self, pt: &Self::Point) -> Result<f64>;
}

/// Walker parameters which consist of (or contain) a step size.
pub trait StepSizeParams {
    fn step_size(&self) -> f64;
    fn set_step_size(&mut self, step_size: f64);
}

/// The most common walker parameters: just a step size.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StepSize(pub f64);

impl StepSizeParams for StepSize {
    fn step_size(&self) -> f64 {
        self.0
    }

    fn set_step_size(&mut self, step_size: f64) {
        self.0 = step_size;
    }
}

impl fmt::Display for StepSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step_size={}", self.0)
    }
}

impl From<f64> for StepSize {
    fn from(step_size: f64) -> Self {
        StepSize(step_size)
    }
}

/// Parameters of a random walk.
///
/// A walk runs `n_sweep * n_therm` thermalizing iterations followed by `n_sweep * n_run`
/// running iterations, unless a controller decides otherwise.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MHRWParams<WP> {
    pub walker_params: WP,
    /// Number of iterations per sweep. One live sample is taken per running sweep.
    pub n_sweep: u64,
    /// Number of thermalizing sweeps.
    pub n_therm: u64,
    /// Number of running sweeps, i.e. of live samples.
    pub n_run: u64,
}

impl<WP> MHRWParams<WP> {
    pub fn new(walker_params: impl Into<WP>, n_sweep: u64, n_therm: u64, n_run: u64) -> Self {
        Self {
            walker_params: walker_params.into(),
            n_sweep,
            n_therm,
            n_run,
        }
    }

    /// Total number of iterations, `n_sweep * (n_therm + n_run)`, if it fits in the counter type.
    pub fn n_total_iterations(&self) -> Result<u64> {
        self.n_therm
            .checked_add(self.n_run)
            .and_then(|n| n.checked_mul(self.n_sweep))
            .ok_or_else(|| {
                MhrwError::config(format!(
                    "n_sweep*(n_therm+n_run) = {}*({}+{}) overflows the iteration counter",
                    self.n_sweep, self.n_therm, self.n_run
                ))
            })
    }

    /// Checks the parameters before a walk is started.
    pub fn validate(&self) -> Result<()> {
        if self.n_sweep == 0 {
            return Err(MhrwError::config("n_sweep must be positive"));
        }
        self.n_total_iterations().map(|_| ())
    }
}

impl<WP: fmt::Display> fmt::Display for MHRWParams<WP> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MHRWParams({}, n_sweep={}, n_therm={}, n_run={})",
            self.walker_params, self.n_sweep, self.n_therm, self.n_run
        )
    }
}

/// Stage of a random walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Init,
    Thermalizing,
    Running,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Init => "init",
            Phase::Thermalizing => "therm.",
            Phase::Running => "run",
            Phase::Done => "done",
        };
        f.write_str(s)
    }
}

/// Snapshot of the bookkeeping of a running walk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WalkState {
    pub phase: Phase,
    /// Iteration index within the current phase.
    pub iter_k: u64,
    /// Number of live samples taken so far.
    pub n_live_samples: u64,
    /// Accepted moves while running.
    pub num_accepted: u64,
    /// Moves attempted while running.
    pub num_live_points: u64,
    /// Target value (plain or log) at the current point.
    pub current_value: f64,
}

impl Default for WalkState {
    fn default() -> Self {
        Self {
            phase: Phase::Init,
            iter_k: 0,
            n_live_samples: 0,
            num_accepted: 0,
            num_live_points: 0,
            current_value: f64::NAN,
        }
    }
}

impl WalkState {
    /// Fraction of accepted moves while running, or NaN before the first running iteration.
    pub fn acceptance_ratio(&self) -> f64 {
        if self.num_live_points == 0 {
            return f64::NAN;
        }
        self.num_accepted as f64 / self.num_live_points as f64
    }

    pub fn is_thermalizing(&self) -> bool {
        self.phase == Phase::Thermalizing
    }
}

/// One iteration of the walk, as reported to [`StatsCollector::raw_move`].
#[derive(Debug, Clone, Copy)]
pub struct RawMove<'a, P> {
    pub k: u64,
    pub is_thermalizing: bool,
    /// True exactly on the last iteration of each running sweep.
    pub is_live_iter: bool,
    pub accepted: bool,
    pub a: f64,
    pub new_pt: &'a P,
    pub new_val: f64,
    pub cur_pt: &'a P,
    pub cur_val: f64,
}

/// Observes a random walk.
///
/// All hooks default to doing nothing, so a collector only implements what it needs.
pub trait StatsCollector<P> {
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn thermalizing_done(&mut self) -> Result<()> {
        Ok(())
    }

    fn done(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called after every iteration, before the walk moves to the accepted point.
    fn raw_move(&mut self, _mv: &RawMove<'_, P>, _walk: &WalkState) -> Result<()> {
        Ok(())
    }

    /// Called once per running sweep with the `n`-th live sample.
    fn process_sample(&mut self, _k: u64, _n: u64, _pt: &P, _val: f64) -> Result<()> {
        Ok(())
    }

    /// A short human-readable line for status reports.
    fn status_line(&self) -> Option<String> {
        None
    }
}

/// A stats collector which collects nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoStats;

impl<P> StatsCollector<P> for NoStats {}

pub(crate) fn join_status_lines(lines: impl IntoIterator<Item = Option<String>>) -> Option<String> {
    let lines: Vec<String> = lines.into_iter().flatten().collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

macro_rules! impl_stats_collector_tuple {
    ($($name:ident . $idx:tt),+) => {
        impl<P, $($name: StatsCollector<P>),+> StatsCollector<P> for ($($name,)+) {
            fn init(&mut self) -> Result<()> {
                $(self.$idx.init()?;)+
                Ok(())
            }

            fn thermalizing_done(&mut self) -> Result<()> {
                $(self.$idx.thermalizing_done()?;)+
                Ok(())
            }

            fn done(&mut self) -> Result<()> {
                $(self.$idx.done()?;)+
                Ok(())
            }

            fn raw_move(&mut self, mv: &RawMove<'_, P>, walk: &WalkState) -> Result<()> {
                $(self.$idx.raw_move(mv, walk)?;)+
                Ok(())
            }

            fn process_sample(&mut self, k: u64, n: u64, pt: &P, val: f64) -> Result<()> {
                $(self.$idx.process_sample(k, n, pt, val)?;)+
                Ok(())
            }

            fn status_line(&self) -> Option<String> {
                join_status_lines([$(self.$idx.status_line()),+])
            }
        }
    };
}

impl_stats_collector_tuple!(A.0);
impl_stats_collector_tuple!(A.0, B.1);
impl_stats_collector_tuple!(A.0, B.1, C.2);
impl_stats_collector_tuple!(A.0, B.1, C.2, D.3);

impl<P> StatsCollector<P> for Vec<Box<dyn StatsCollector<P> + Send>> {
    fn init(&mut self) -> Result<()> {
        self.iter_mut().try_for_each(|s| s.init())
    }

    fn thermalizing_done(&mut self) -> Result<()> {
        self.iter_mut().try_for_each(|s| s.thermalizing_done())
    }

    fn done(&mut self) -> Result<()> {
        self.iter_mut().try_for_each(|s| s.done())
    }

    fn raw_move(&mut self, mv: &RawMove<'_, P>, walk: &WalkState) -> Result<()> {
        self.iter_mut().try_for_each(|s| s.raw_move(mv, walk))
    }

    fn process_sample(&mut self, k: u64, n: u64, pt: &P, val: f64) -> Result<()> {
        self.iter_mut()
            .try_for_each(|s| s.process_sample(k, n, pt, val))
    }

    fn status_line(&self) -> Option<String> {
        join_status_lines(self.iter().map(|s| s.status_line()))
    }
}

/// What a [`Checkpoint`] gets to see at the end of a sweep.
pub struct SweepEnd<'a, WP> {
    pub params: &'a MHRWParams<WP>,
    pub walk: &'a WalkState,
    status: &'a dyn Fn() -> Option<String>,
}

impl<'a, WP> SweepEnd<'a, WP> {
    pub(crate) fn new(
        params: &'a MHRWParams<WP>,
        walk: &'a WalkState,
        status: &'a dyn Fn() -> Option<String>,
    ) -> Self {
        Self {
            params,
            walk,
            status,
        }
    }

    /// Status lines of the walk's stats collectors and controllers, computed on demand.
    pub fn status_lines(&self) -> Option<String> {
        (self.status)()
    }
}

/// Invoked at the end of every sweep, both while thermalizing and while running.
///
/// This is the only place where a walk may be suspended or aborted from the outside: returning
/// an error aborts the walk.
pub trait Checkpoint<WP> {
    fn at_sweep_end(&mut self, sweep: &SweepEnd<'_, WP>) -> Result<()>;
}

impl<WP, F> Checkpoint<WP> for F
where
    F: FnMut(&SweepEnd<'_, WP>) -> Result<()>,
{
    fn at_sweep_end(&mut self, sweep: &SweepEnd<'_, WP>) -> Result<()> {
        self(sweep)
    }
}
