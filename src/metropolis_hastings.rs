/*!
# Metropolis–Hastings Random Walk

[`MHRandomWalk`] drives a [`Walker`] through the lifecycle

```text
INIT -> THERMALIZING -> RUNNING -> DONE
```

Each iteration proposes a move with [`Walker::jump_fn`], evaluates the target there, and
accepts it with the Metropolis rule. Every iteration is reported to the stats collectors; the
last iteration of each running sweep is a *live* iteration whose current point is recorded as a
sample. Controllers may adjust parameters and may extend either phase.

## Example

```rust
use mini_mhrw::controller::NoController;
use mini_mhrw::core::{FnSyntax, MHRWParams, NoStats, StepSize, Walker};
use mini_mhrw::metropolis_hastings::MHRandomWalk;
use mini_mhrw::Result;
use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};

struct Coin;

impl Walker for Coin {
    type Point = bool;
    type Params = StepSize;
    fn fn_syntax(&self) -> FnSyntax { FnSyntax::Value }
    fn start_point(&mut self, _rng: &mut dyn RngCore) -> Result<bool> { Ok(false) }
    fn jump_fn(&mut self, _cur: &bool, _p: &StepSize, rng: &mut dyn RngCore) -> Result<bool> {
        Ok(rng.gen())
    }
    fn fn_value(&mut self, _pt: &bool) -> Result<f64> { Ok(1.0) }
}

let (mut walker, mut stats, mut ctrl) = (Coin, NoStats, NoController);
let mut rng = SmallRng::seed_from_u64(42);
let mut rw = MHRandomWalk::new(
    MHRWParams::new(1.0, 3, 10, 100),
    &mut walker,
    &mut stats,
    &mut ctrl,
    &mut rng,
);
rw.run()?;
// flat target: every move is accepted
assert_eq!(rw.acceptance_ratio(), 1.0);
# Ok::<(), mini_mhrw::MhrwError>(())
```
*/

use rand::{Rng, RngCore};

use crate::controller::Controller;
use crate::core::{
    join_status_lines, Checkpoint, FnSyntax, MHRWParams, Phase, RawMove, StatsCollector,
    SweepEnd, Walker, WalkState,
};
use crate::error::{MhrwError, Result};
use crate::logging::Logger;

/// A single Metropolis–Hastings random walk.
///
/// The walk borrows its walker, stats collector, controller and random number generator; they
/// are owned by whoever sets the walk up (typically a task), who can inspect them afterwards.
pub struct MHRandomWalk<'a, W, S, C, R>
where
    W: Walker,
{
    params: MHRWParams<W::Params>,
    walker: &'a mut W,
    stats: &'a mut S,
    controller: &'a mut C,
    rng: &'a mut R,
    checkpoint: Option<&'a mut dyn Checkpoint<W::Params>>,
    fn_syntax: FnSyntax,
    state: WalkState,
    current_point: Option<W::Point>,
    logger: Logger,
}

impl<'a, W, S, C, R> MHRandomWalk<'a, W, S, C, R>
where
    W: Walker,
    S: StatsCollector<W::Point>,
    C: Controller<W, S>,
    R: RngCore,
{
    pub fn new(
        params: MHRWParams<W::Params>,
        walker: &'a mut W,
        stats: &'a mut S,
        controller: &'a mut C,
        rng: &'a mut R,
    ) -> Self {
        let fn_syntax = walker.fn_syntax();
        Self {
            params,
            walker,
            stats,
            controller,
            rng,
            checkpoint: None,
            fn_syntax,
            state: WalkState::default(),
            current_point: None,
            logger: Logger::new("mini_mhrw::metropolis_hastings"),
        }
    }

    /// Registers a checkpoint invoked at the end of every sweep.
    pub fn with_checkpoint(mut self, checkpoint: &'a mut dyn Checkpoint<W::Params>) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Current parameters, including any adjustment made by the controllers.
    pub fn params(&self) -> &MHRWParams<W::Params> {
        &self.params
    }

    pub fn walk_state(&self) -> &WalkState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    /// Fraction of accepted moves while running (NaN before the first running iteration).
    pub fn acceptance_ratio(&self) -> f64 {
        self.state.acceptance_ratio()
    }

    pub fn current_point(&self) -> Option<&W::Point> {
        self.current_point.as_ref()
    }

    pub fn current_value(&self) -> f64 {
        self.state.current_value
    }

    /// `n_sweep * (n_therm + n_run)` with the current parameters.
    pub fn n_total_iterations(&self) -> Result<u64> {
        self.params.n_total_iterations()
    }

    /// Runs the whole walk: initialization, thermalization, live runs and finalization.
    pub fn run(&mut self) -> Result<()> {
        self.params.validate()?;
        self.init()?;
        self.thermalize()?;
        self.thermalizing_done()?;
        self.live_runs()?;
        self.done()
    }

    fn init(&mut self) -> Result<()> {
        self.state = WalkState::default();
        self.walker.init()?;
        self.stats.init()?;

        let start = self.walker.start_point(&mut *self.rng)?;
        self.state.current_value = self.walker.fn_value(&start)?;
        self.current_point = Some(start);

        self.controller
            .init(&mut self.params, &*self.walker, &self.state)?;
        self.params.validate()?;

        self.logger.debug(format_args!(
            "starting random walk, n_total_iterations = {}",
            self.params.n_total_iterations()?
        ));
        Ok(())
    }

    fn sweep_size(&self) -> Result<u64> {
        match self.params.n_sweep {
            0 => Err(MhrwError::config("n_sweep was set to zero during the walk")),
            n => Ok(n),
        }
    }

    fn sweeps_to_iterations(&self, n_sweeps: u64) -> Result<u64> {
        self.sweep_size()?.checked_mul(n_sweeps).ok_or_else(|| {
            MhrwError::config(format!(
                "n_sweep*{} = {}*{} overflows the iteration counter",
                n_sweeps, self.params.n_sweep, n_sweeps
            ))
        })
    }

    fn thermalize(&mut self) -> Result<()> {
        self.state.phase = Phase::Thermalizing;
        let strategy = self.controller.adjustment_strategy();

        let mut k: u64 = 0;
        loop {
            let n_sweep = self.sweep_size()?;
            self.state.iter_k = k;
            if k % n_sweep == 0
                && k >= self.sweeps_to_iterations(self.params.n_therm)?
                && self.controller.allow_done_thermalization(
                    &self.params,
                    &*self.walker,
                    &*self.stats,
                    k,
                    &self.state,
                )
            {
                break;
            }

            self.iteration(k, true, false)?;

            if strategy.applies(Phase::Thermalizing, false) {
                self.controller.adjust_params(
                    &mut self.params,
                    &*self.walker,
                    &*self.stats,
                    k,
                    &self.state,
                    false,
                )?;
            }

            if (k + 1) % self.sweep_size()? == 0 {
                self.sweep_end()?;
            }
            k += 1;
        }

        self.logger.debug(format_args!(
            "thermalization done after {} iterations",
            k
        ));
        Ok(())
    }

    fn thermalizing_done(&mut self) -> Result<()> {
        self.walker.thermalizing_done()?;
        self.stats.thermalizing_done()?;
        self.controller
            .thermalizing_done(&mut self.params, &*self.walker, &self.state)
    }

    fn live_runs(&mut self) -> Result<()> {
        self.state.phase = Phase::Running;
        let strategy = self.controller.adjustment_strategy();

        let mut k: u64 = 0;
        loop {
            let n_sweep = self.sweep_size()?;
            self.state.iter_k = k;
            if k % n_sweep == 0
                && k >= self.sweeps_to_iterations(self.params.n_run)?
                && self.controller.allow_done_runs(
                    &self.params,
                    &*self.walker,
                    &*self.stats,
                    k,
                    &self.state,
                )
            {
                break;
            }

            let is_live_iter = (k + 1) % n_sweep == 0;
            self.iteration(k, false, is_live_iter)?;

            if is_live_iter && strategy.applies(Phase::Running, true) {
                self.controller.adjust_params(
                    &mut self.params,
                    &*self.walker,
                    &*self.stats,
                    k,
                    &self.state,
                    true,
                )?;
            }
            if strategy.applies(Phase::Running, false) {
                self.controller.adjust_params(
                    &mut self.params,
                    &*self.walker,
                    &*self.stats,
                    k,
                    &self.state,
                    false,
                )?;
            }

            if is_live_iter {
                self.sweep_end()?;
            }
            k += 1;
        }

        self.logger.debug(format_args!(
            "runs done after {} iterations, {} samples, acceptance ratio = {}",
            k,
            self.state.n_live_samples,
            self.acceptance_ratio()
        ));
        Ok(())
    }

    fn done(&mut self) -> Result<()> {
        self.state.phase = Phase::Done;
        self.walker.done()?;
        self.stats.done()?;
        self.controller
            .done(&mut self.params, &*self.walker, &self.state)
    }

    fn iteration(&mut self, k: u64, is_thermalizing: bool, is_live_iter: bool) -> Result<()> {
        let cur_pt = self
            .current_point
            .as_ref()
            .ok_or_else(|| MhrwError::config("random walk was not initialized"))?;
        let cur_val = self.state.current_value;

        let new_pt = self
            .walker
            .jump_fn(cur_pt, &self.params.walker_params, &mut *self.rng)?;
        let new_val = self.walker.fn_value(&new_pt)?;

        let a = self.fn_syntax.acceptance(new_val, cur_val);
        // no draw is consumed for moves that are accepted anyway
        let accepted = a >= 1.0 || self.rng.gen::<f64>() < a;

        if !is_thermalizing {
            self.state.num_live_points += 1;
            if accepted {
                self.state.num_accepted += 1;
            }
        }

        self.stats.raw_move(
            &RawMove {
                k,
                is_thermalizing,
                is_live_iter,
                accepted,
                a,
                new_pt: &new_pt,
                new_val,
                cur_pt,
                cur_val,
            },
            &self.state,
        )?;

        if accepted {
            self.current_point = Some(new_pt);
            self.state.current_value = new_val;
        }

        if is_live_iter {
            if let Some(pt) = self.current_point.as_ref() {
                self.stats
                    .process_sample(k, self.state.n_live_samples, pt, self.state.current_value)?;
            }
            self.state.n_live_samples += 1;
        }
        Ok(())
    }

    fn sweep_end(&mut self) -> Result<()> {
        if let Some(checkpoint) = self.checkpoint.as_mut() {
            let stats = &*self.stats;
            let controller = &*self.controller;
            let status = || join_status_lines([stats.status_line(), controller.status_line()]);
            checkpoint.at_sweep_end(&SweepEnd::new(&self.params, &self.state, &status))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{AdjustmentStrategy, NoController};
    use crate::core::{NoStats, StepSize};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    /// Deterministic walk on the integers modulo 10, with values cycling through a fixed table.
    struct Cycle {
        values: Vec<f64>,
        syntax: FnSyntax,
        calls: Vec<&'static str>,
    }

    impl Cycle {
        fn new(values: Vec<f64>, syntax: FnSyntax) -> Self {
            Self {
                values,
                syntax,
                calls: Vec::new(),
            }
        }
    }

    impl Walker for Cycle {
        type Point = usize;
        type Params = StepSize;

        fn fn_syntax(&self) -> FnSyntax {
            self.syntax
        }

        fn init(&mut self) -> Result<()> {
            self.calls.push("walker.init");
            Ok(())
        }

        fn thermalizing_done(&mut self) -> Result<()> {
            self.calls.push("walker.thermalizing_done");
            Ok(())
        }

        fn done(&mut self) -> Result<()> {
            self.calls.push("walker.done");
            Ok(())
        }

        fn start_point(&mut self, _rng: &mut dyn RngCore) -> Result<usize> {
            Ok(0)
        }

        fn jump_fn(&mut self, cur: &usize, _p: &StepSize, _rng: &mut dyn RngCore) -> Result<usize> {
            Ok((cur + 1) % self.values.len())
        }

        fn fn_value(&mut self, pt: &usize) -> Result<f64> {
            Ok(self.values[*pt])
        }
    }

    #[derive(Default)]
    struct Recorder {
        raw_moves: u64,
        therm_moves: u64,
        live_iters: Vec<u64>,
        samples: Vec<(u64, u64)>,
        bad_live_flags: u64,
        accepted_with_large_a: u64,
        large_a: u64,
        n_sweep: u64,
    }

    impl StatsCollector<usize> for Recorder {
        fn raw_move(&mut self, mv: &RawMove<'_, usize>, _walk: &WalkState) -> Result<()> {
            self.raw_moves += 1;
            if mv.is_thermalizing {
                self.therm_moves += 1;
            }
            let expect_live = !mv.is_thermalizing && (mv.k + 1) % self.n_sweep == 0;
            if expect_live != mv.is_live_iter {
                self.bad_live_flags += 1;
            }
            if mv.is_live_iter {
                self.live_iters.push(mv.k);
            }
            if mv.a + 1e-12 >= 1.0 {
                self.large_a += 1;
                if mv.accepted {
                    self.accepted_with_large_a += 1;
                }
            }
            Ok(())
        }

        fn process_sample(&mut self, k: u64, n: u64, _pt: &usize, _val: f64) -> Result<()> {
            self.samples.push((k, n));
            Ok(())
        }
    }

    #[test]
    fn test_iteration_counts_and_live_flags() {
        let mut walker = Cycle::new(vec![0.0, -0.5, -1.0, -3.0, -0.2], FnSyntax::LogValue);
        let mut stats = Recorder {
            n_sweep: 7,
            ..Default::default()
        };
        let mut rng = SmallRng::seed_from_u64(42);
        let mut no_ctrl = NoController;
        let mut rw = MHRandomWalk::new(
            MHRWParams::new(0.1, 7, 13, 50),
            &mut walker,
            &mut stats,
            &mut no_ctrl,
            &mut rng,
        );
        rw.run().unwrap();
        assert_eq!(rw.walk_state().n_live_samples, 50);
        assert_eq!(rw.walk_state().num_live_points, 7 * 50);
        assert_eq!(rw.phase(), Phase::Done);

        assert_eq!(stats.raw_moves, 7 * (13 + 50));
        assert_eq!(stats.therm_moves, 7 * 13);
        assert_eq!(stats.samples.len(), 50);
        assert_eq!(stats.bad_live_flags, 0);
        // k restarts at 0 for the running phase
        assert_eq!(stats.live_iters[0], 6);
        assert_eq!(stats.samples[3], (27, 3));
        assert_eq!(stats.large_a, stats.accepted_with_large_a);
    }

    #[test]
    fn test_plain_values_and_acceptance_ratio() {
        // the walk alternates between two points of equal value: always accepted
        let mut walker = Cycle::new(vec![2.0, 2.0], FnSyntax::Value);
        let mut stats = Recorder {
            n_sweep: 1,
            ..Default::default()
        };
        let mut rng = SmallRng::seed_from_u64(1);
        let mut no_ctrl = NoController;
        let mut rw = MHRandomWalk::new(
            MHRWParams::new(0.1, 1, 0, 10),
            &mut walker,
            &mut stats,
            &mut no_ctrl,
            &mut rng,
        );
        rw.run().unwrap();
        assert_eq!(rw.acceptance_ratio(), 1.0);
        assert_eq!(stats.therm_moves, 0);
        assert_eq!(stats.raw_moves, 10);
    }

    #[test]
    fn test_zero_valued_proposals_are_rejected() {
        let mut walker = Cycle::new(vec![1.0, 0.0], FnSyntax::Value);
        let mut rng = SmallRng::seed_from_u64(1);
        let mut no_stats = NoStats;
        let mut no_ctrl = NoController;
        let mut rw = MHRandomWalk::new(
            MHRWParams::new(0.1, 2, 0, 10),
            &mut walker,
            &mut no_stats,
            &mut no_ctrl,
            &mut rng,
        );
        rw.run().unwrap();
        assert_eq!(rw.acceptance_ratio(), 0.0);
        assert_eq!(rw.current_point(), Some(&0));
    }

    #[test]
    fn test_overflowing_params_fail_before_running() {
        let mut walker = Cycle::new(vec![1.0], FnSyntax::Value);
        let mut stats = Recorder::default();
        let mut rng = SmallRng::seed_from_u64(1);
        let mut no_ctrl = NoController;
        let mut rw = MHRandomWalk::new(
            MHRWParams::new(0.1, u64::MAX, 1, 1),
            &mut walker,
            &mut stats,
            &mut no_ctrl,
            &mut rng,
        );
        assert!(matches!(rw.run(), Err(MhrwError::Config(_))));
        drop(rw);
        assert!(walker.calls.is_empty());
        assert_eq!(stats.raw_moves, 0);
    }

    /// Holds back both phase transitions for a given number of extra sweeps.
    struct Extend {
        extra_therm: u64,
        extra_run: u64,
        adjusted: u64,
    }

    impl Controller<Cycle, Recorder> for Extend {
        fn adjustment_strategy(&self) -> AdjustmentStrategy {
            AdjustmentStrategy::EVERY_SAMPLE_WHILE_RUNNING
        }

        fn allow_done_thermalization(
            &mut self,
            _params: &MHRWParams<StepSize>,
            _walker: &Cycle,
            _stats: &Recorder,
            _iter_k: u64,
            _walk: &WalkState,
        ) -> bool {
            if self.extra_therm == 0 {
                return true;
            }
            self.extra_therm -= 1;
            false
        }

        fn allow_done_runs(
            &mut self,
            _params: &MHRWParams<StepSize>,
            _walker: &Cycle,
            stats: &Recorder,
            _iter_k: u64,
            walk: &WalkState,
        ) -> bool {
            assert_eq!(stats.samples.len() as u64, walk.n_live_samples);
            if self.extra_run == 0 {
                return true;
            }
            self.extra_run -= 1;
            false
        }

        fn adjust_params(
            &mut self,
            _params: &mut MHRWParams<StepSize>,
            _walker: &Cycle,
            _stats: &Recorder,
            _iter_k: u64,
            _walk: &WalkState,
            after_sample: bool,
        ) -> Result<()> {
            assert!(after_sample);
            self.adjusted += 1;
            Ok(())
        }
    }

    #[test]
    fn test_controller_extends_both_phases() {
        let mut walker = Cycle::new(vec![0.0, 0.0, 0.0], FnSyntax::LogValue);
        let mut stats = Recorder {
            n_sweep: 4,
            ..Default::default()
        };
        let mut ctrl = Extend {
            extra_therm: 2,
            extra_run: 3,
            adjusted: 0,
        };
        let mut rng = SmallRng::seed_from_u64(3);
        let mut sweeps_seen = 0;
        let mut checkpoint = |sweep: &SweepEnd<'_, StepSize>| -> Result<()> {
            assert_eq!(sweep.params.n_sweep, 4);
            sweeps_seen += 1;
            Ok(())
        };
        let mut rw = MHRandomWalk::new(
            MHRWParams::new(0.1, 4, 5, 10),
            &mut walker,
            &mut stats,
            &mut ctrl,
            &mut rng,
        )
        .with_checkpoint(&mut checkpoint);
        rw.run().unwrap();
        drop(rw);

        assert_eq!(stats.therm_moves, 4 * (5 + 2));
        assert_eq!(stats.samples.len(), 10 + 3);
        assert_eq!(ctrl.adjusted, 13);
        assert_eq!(sweeps_seen, 7 + 13);
    }

    /// Counts its adjustments, checking that each call matches what it asked for.
    struct Counter {
        strategy: AdjustmentStrategy,
        adjusted: u64,
    }

    impl Controller<Cycle, Recorder> for Counter {
        fn adjustment_strategy(&self) -> AdjustmentStrategy {
            self.strategy
        }

        fn adjust_params(
            &mut self,
            _params: &mut MHRWParams<StepSize>,
            _walker: &Cycle,
            _stats: &Recorder,
            _iter_k: u64,
            walk: &WalkState,
            after_sample: bool,
        ) -> Result<()> {
            assert!(self.strategy.applies(walk.phase, after_sample));
            self.adjusted += 1;
            Ok(())
        }
    }

    #[test]
    fn test_combined_controllers_adjust_at_their_own_frequency() {
        let mut walker = Cycle::new(vec![0.0, 0.0], FnSyntax::LogValue);
        let mut stats = Recorder {
            n_sweep: 4,
            ..Default::default()
        };
        let mut ctrl = (
            Counter {
                strategy: AdjustmentStrategy::EVERY_ITERATION_WHILE_THERMALIZING,
                adjusted: 0,
            },
            Counter {
                strategy: AdjustmentStrategy::EVERY_SAMPLE_WHILE_RUNNING,
                adjusted: 0,
            },
        );
        let mut rng = SmallRng::seed_from_u64(5);
        MHRandomWalk::new(
            MHRWParams::new(0.1, 4, 5, 10),
            &mut walker,
            &mut stats,
            &mut ctrl,
            &mut rng,
        )
        .run()
        .unwrap();

        assert_eq!(ctrl.0.adjusted, 4 * 5);
        assert_eq!(ctrl.1.adjusted, 10);
    }

    #[test]
    fn test_checkpoint_error_aborts_walk() {
        let mut walker = Cycle::new(vec![0.0, 0.0], FnSyntax::LogValue);
        let mut stats = Recorder {
            n_sweep: 2,
            ..Default::default()
        };
        let mut rng = SmallRng::seed_from_u64(3);
        let mut no_ctrl = NoController;
        let mut checkpoint = |sweep: &SweepEnd<'_, StepSize>| -> Result<()> {
            if sweep.walk.phase == Phase::Running {
                return Err(MhrwError::TasksInterrupted);
            }
            Ok(())
        };
        let mut rw = MHRandomWalk::new(
            MHRWParams::new(0.1, 2, 3, 10),
            &mut walker,
            &mut stats,
            &mut no_ctrl,
            &mut rng,
        )
        .with_checkpoint(&mut checkpoint);
        assert!(rw.run().unwrap_err().is_interrupted());
        drop(rw);
        assert_eq!(stats.samples.len(), 1);
        assert!(!walker.calls.contains(&"walker.done"));
    }

    #[test]
    fn test_lifecycle_hooks_order() {
        let mut walker = Cycle::new(vec![0.0], FnSyntax::LogValue);
        let mut rng = SmallRng::seed_from_u64(3);
        let mut no_stats = NoStats;
        let mut no_ctrl = NoController;
        MHRandomWalk::new(
            MHRWParams::new(0.1, 1, 1, 1),
            &mut walker,
            &mut no_stats,
            &mut no_ctrl,
            &mut rng,
        )
        .run()
        .unwrap();
        assert_eq!(
            walker.calls,
            vec!["walker.init", "walker.thermalizing_done", "walker.done"]
        );
    }
}
