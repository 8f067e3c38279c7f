/*!
# Step-Size Controller

Tunes the step size of a walk during thermalization so that the acceptance ratio ends up in a
desired range. When the step size changes, the sweep size is rescaled inversely, keeping
`step_size * n_sweep` (roughly the distance travelled between two samples) constant.

A too low acceptance ratio means the proposals land too far away, so the step size is
decreased; a too high acceptance ratio means the walk barely moves, so it is increased.

Thermalization is held back while the acceptance ratio is outside the desired range, and until
a fraction of the original number of thermalizing sweeps ran since the last correction of an
unacceptable acceptance ratio.
*/

use crate::controller::{AdjustmentStrategy, Controller};
use crate::core::{MHRWParams, StepSizeParams, Walker, WalkState};
use crate::error::Result;
use crate::logging::Logger;
use crate::stats::AcceptanceRatioSource;

/// Acceptance ratio bounds of the [`StepSizeController`].
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StepSizeControlParams {
    pub desired_accept_ratio_min: f64,
    pub desired_accept_ratio_max: f64,
    pub acceptable_accept_ratio_min: f64,
    pub acceptable_accept_ratio_max: f64,
    /// Fraction of the original thermalizing sweeps to run after the last correction.
    pub ensure_n_therm_fixed_params_fraction: f64,
}

impl StepSizeControlParams {
    pub const ACCEPTABLE_MIN: f64 = 0.2;
    pub const ACCEPTABLE_MAX: f64 = 0.4;
}

impl Default for StepSizeControlParams {
    fn default() -> Self {
        let (lo, hi) = (Self::ACCEPTABLE_MIN, Self::ACCEPTABLE_MAX);
        Self {
            desired_accept_ratio_min: 0.9 * lo + 0.1 * hi,
            desired_accept_ratio_max: 0.35 * lo + 0.65 * hi,
            acceptable_accept_ratio_min: lo,
            acceptable_accept_ratio_max: hi,
            ensure_n_therm_fixed_params_fraction: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepSizeController {
    params: StepSizeControlParams,
    last_corrected_unacceptable_iter_k: u64,
    last_set_step_size: f64,
    orig_n_therm: u64,
    orig_step_times_sweep: f64,
    logger: Logger,
}

impl Default for StepSizeController {
    fn default() -> Self {
        Self::new(StepSizeControlParams::default())
    }
}

impl StepSizeController {
    /// Step size used when the walk is started with an invalid one.
    pub const DEFAULT_START_STEP_SIZE: f64 = 0.01;

    pub fn new(params: StepSizeControlParams) -> Self {
        Self {
            params,
            last_corrected_unacceptable_iter_k: 0,
            last_set_step_size: f64::NAN,
            orig_n_therm: 0,
            orig_step_times_sweep: 0.0,
            logger: Logger::new("mini_mhrw::step_size"),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// The step size set by the last adjustment, NaN if none happened.
    pub fn last_set_step_size(&self) -> f64 {
        self.last_set_step_size
    }

    fn in_desired_range(&self, accept_ratio: f64) -> bool {
        accept_ratio >= self.params.desired_accept_ratio_min
            && accept_ratio <= self.params.desired_accept_ratio_max
    }

    fn guess_step_size(&self, accept_ratio: f64, step_size: f64) -> f64 {
        let (dmin, dmax) = (
            self.params.desired_accept_ratio_min,
            self.params.desired_accept_ratio_max,
        );
        let factor = if accept_ratio >= 2.0 * dmax {
            1.5
        } else if accept_ratio >= 1.3 * dmax {
            1.2
        } else if accept_ratio >= dmax {
            1.05
        } else if accept_ratio <= 0.5 * dmin {
            0.5
        } else if accept_ratio <= 0.75 * dmin {
            0.8
        } else {
            0.95
        };
        step_size * factor
    }

    fn set_step_size<WP: StepSizeParams>(
        &mut self,
        iter_k: u64,
        params: &mut MHRWParams<WP>,
        new_step_size: f64,
    ) {
        let cur = params.walker_params.step_size();
        let new_step_size = new_step_size.clamp(0.7 * cur, 1.5 * cur);
        params.walker_params.set_step_size(new_step_size);
        self.last_set_step_size = new_step_size;

        params.n_sweep = (self.orig_step_times_sweep / new_step_size + 1.0) as u64;

        let n_therm_min = (iter_k / params.n_sweep) as f64
            + 1.0
            + self.params.ensure_n_therm_fixed_params_fraction * self.orig_n_therm as f64;
        if params.n_therm < n_therm_min as u64 {
            self.logger.debug(format_args!(
                "not enough thermalizing sweeps left, setting n_therm = {}",
                n_therm_min as u64
            ));
            params.n_therm = n_therm_min as u64;
        }
    }
}

impl<W, S> Controller<W, S> for StepSizeController
where
    W: Walker,
    W::Params: StepSizeParams,
    S: AcceptanceRatioSource + ?Sized,
{
    fn adjustment_strategy(&self) -> AdjustmentStrategy {
        AdjustmentStrategy::EVERY_ITERATION_WHILE_THERMALIZING
    }

    fn init(
        &mut self,
        params: &mut MHRWParams<W::Params>,
        _walker: &W,
        _walk: &WalkState,
    ) -> Result<()> {
        self.orig_n_therm = params.n_therm;
        let step_size = params.walker_params.step_size();
        if step_size.is_finite() && step_size > 0.0 {
            self.orig_step_times_sweep = params.n_sweep as f64 * step_size;
        } else {
            let start = Self::DEFAULT_START_STEP_SIZE;
            self.logger.debug(format_args!(
                "invalid step size {}, starting from {}",
                step_size, start
            ));
            params.walker_params.set_step_size(start);
            params.n_sweep = (1.0 / start) as u64 + 1;
            self.orig_step_times_sweep = 1.0;
        }
        Ok(())
    }

    fn allow_done_thermalization(
        &mut self,
        params: &MHRWParams<W::Params>,
        _walker: &W,
        stats: &S,
        iter_k: u64,
        _walk: &WalkState,
    ) -> bool {
        let accept_ratio = stats.moving_average_acceptance_ratio();
        if !accept_ratio.is_finite() || !self.in_desired_range(accept_ratio) {
            self.logger.trace(format_args!(
                "not done thermalizing at iter_k={}, accept_ratio={}",
                iter_k, accept_ratio
            ));
            return false;
        }
        let since_correction = iter_k.saturating_sub(self.last_corrected_unacceptable_iter_k);
        let required = params.n_sweep as f64
            * (self.params.ensure_n_therm_fixed_params_fraction * self.orig_n_therm as f64);
        if (since_correction as f64) < required {
            self.logger.trace(format_args!(
                "not done thermalizing at iter_k={}, last correction at {}",
                iter_k, self.last_corrected_unacceptable_iter_k
            ));
            return false;
        }
        true
    }

    fn adjust_params(
        &mut self,
        params: &mut MHRWParams<W::Params>,
        _walker: &W,
        stats: &S,
        iter_k: u64,
        _walk: &WalkState,
        _after_sample: bool,
    ) -> Result<()> {
        let buffer_size = stats.buffer_size().max(1);
        if !stats.has_moving_average() || iter_k % buffer_size != 0 {
            return Ok(());
        }

        let accept_ratio = stats.moving_average_acceptance_ratio();
        if !accept_ratio.is_finite() || self.in_desired_range(accept_ratio) {
            return Ok(());
        }

        if accept_ratio < self.params.acceptable_accept_ratio_min
            || accept_ratio > self.params.acceptable_accept_ratio_max
        {
            self.last_corrected_unacceptable_iter_k = iter_k;
        }

        let new_step_size = self.guess_step_size(accept_ratio, params.walker_params.step_size());
        self.set_step_size(iter_k, params, new_step_size);
        self.logger.debug(format_args!(
            "acceptance ratio {:.3} at iter_k={}: step size -> {:.4e}, n_sweep -> {}, n_therm -> {}",
            accept_ratio,
            iter_k,
            params.walker_params.step_size(),
            params.n_sweep,
            params.n_therm
        ));
        Ok(())
    }

    fn status_line(&self) -> Option<String> {
        if self.last_set_step_size.is_nan() {
            return None;
        }
        Some(format!("step size = {:.3e}", self.last_set_step_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FnSyntax, StepSize};
    use rand::RngCore;

    struct FakeAcceptance {
        ratio: f64,
    }

    impl AcceptanceRatioSource for FakeAcceptance {
        fn buffer_size(&self) -> u64 {
            1024
        }
        fn has_moving_average(&self) -> bool {
            true
        }
        fn moving_average_acceptance_ratio(&self) -> f64 {
            self.ratio
        }
    }

    struct NoWalker;

    impl Walker for NoWalker {
        type Point = ();
        type Params = StepSize;
        fn fn_syntax(&self) -> FnSyntax {
            FnSyntax::LogValue
        }
        fn start_point(&mut self, _rng: &mut dyn RngCore) -> Result<()> {
            Ok(())
        }
        fn jump_fn(&mut self, _cur: &(), _p: &StepSize, _rng: &mut dyn RngCore) -> Result<()> {
            Ok(())
        }
        fn fn_value(&mut self, _pt: &()) -> Result<f64> {
            Ok(0.0)
        }
    }

    type Ctrl = dyn Controller<NoWalker, FakeAcceptance>;

    fn setup() -> (StepSizeController, MHRWParams<StepSize>, WalkState) {
        let mut ctrl = StepSizeController::default();
        let mut params = MHRWParams::new(0.01, 150, 2048, 32768);
        let walk = WalkState::default();
        (&mut ctrl as &mut Ctrl)
            .init(&mut params, &NoWalker, &walk)
            .unwrap();
        (ctrl, params, walk)
    }

    #[test]
    fn test_defaults_are_ordered() {
        let p = StepSizeControlParams::default();
        assert!(p.acceptable_accept_ratio_min <= p.desired_accept_ratio_min);
        assert!(p.desired_accept_ratio_min <= p.desired_accept_ratio_max);
        assert!(p.desired_accept_ratio_max <= p.acceptable_accept_ratio_max);
        assert!((0.1..=1.0).contains(&p.ensure_n_therm_fixed_params_fraction));
    }

    #[test]
    fn test_strategy_and_init_with_valid_params() {
        let (ctrl, params, _) = setup();
        assert_eq!(
            (&ctrl as &Ctrl).adjustment_strategy(),
            AdjustmentStrategy::EVERY_ITERATION_WHILE_THERMALIZING
        );
        assert_eq!(params, MHRWParams::new(0.01, 150, 2048, 32768));
    }

    #[test]
    fn test_init_with_invalid_step_size() {
        let mut ctrl = StepSizeController::default();
        let mut params = MHRWParams::<StepSize>::new(f64::NAN, 7, 10, 10);
        (&mut ctrl as &mut Ctrl)
            .init(&mut params, &NoWalker, &WalkState::default())
            .unwrap();
        assert_eq!(params.walker_params, StepSize(0.01));
        assert_eq!(params.n_sweep, 101);
    }

    fn check_correction(ratio: f64, expect_smaller: bool) {
        let (mut ctrl, mut params, walk) = setup();
        let mut stats = FakeAcceptance { ratio };
        let ctrl_dyn = &mut ctrl as &mut Ctrl;

        ctrl_dyn
            .adjust_params(&mut params, &NoWalker, &stats, 1024, &walk, false)
            .unwrap();
        let step = params.walker_params.0;
        if expect_smaller {
            assert!(step < 0.0095, "step = {}", step);
        } else {
            assert!(step > 0.0105, "step = {}", step);
        }
        let product = params.n_sweep as f64 * step;
        assert!((product - 1.5).abs() <= step, "n_sweep*step = {}", product);

        let iter_k = params.n_therm * params.n_sweep;
        assert!(!ctrl_dyn.allow_done_thermalization(&params, &NoWalker, &stats, iter_k, &walk));

        stats.ratio = 0.28;
        let iter_k = (params.n_therm + 1) * params.n_sweep;
        assert!(ctrl_dyn.allow_done_thermalization(&params, &NoWalker, &stats, iter_k, &walk));
    }

    #[test]
    fn test_corrects_low_acceptance_ratio() {
        check_correction(0.12, true);
    }

    #[test]
    fn test_corrects_high_acceptance_ratio() {
        check_correction(0.75, false);
    }

    #[test]
    fn test_waits_for_full_buffer_and_period() {
        let (mut ctrl, mut params, walk) = setup();
        let stats = FakeAcceptance { ratio: 0.05 };
        let ctrl_dyn = &mut ctrl as &mut Ctrl;
        ctrl_dyn
            .adjust_params(&mut params, &NoWalker, &stats, 1000, &walk, false)
            .unwrap();
        assert_eq!(params.walker_params, StepSize(0.01));

        let desired = FakeAcceptance { ratio: 0.3 };
        ctrl_dyn
            .adjust_params(&mut params, &NoWalker, &desired, 2048, &walk, false)
            .unwrap();
        assert_eq!(params.walker_params, StepSize(0.01));
        assert!(ctrl.last_set_step_size().is_nan());
    }

    #[test]
    fn test_step_change_is_clamped() {
        let (mut ctrl, mut params, walk) = setup();
        // 0.05 <= 0.5 * 0.22 asks for a factor 0.5, clamped to 0.7
        let stats = FakeAcceptance { ratio: 0.05 };
        (&mut ctrl as &mut Ctrl)
            .adjust_params(&mut params, &NoWalker, &stats, 1024, &walk, false)
            .unwrap();
        approx::assert_abs_diff_eq!(params.walker_params.0, 0.007, epsilon = 1e-12);
        assert_eq!(params.n_sweep, (1.5 / 0.007 + 1.0) as u64);
        assert_eq!(
            (&ctrl as &Ctrl).status_line().as_deref(),
            Some("step size = 7.000e-3")
        );
    }
}
