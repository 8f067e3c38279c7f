/*!
# Random-Walk Controllers

A [`Controller`] inspects a running walk and may adjust its parameters (step size, sweep size,
number of sweeps) or hold back the transitions from thermalizing to running and from running to
done. Several controllers are combined by putting them in a tuple; the tuple asks every member
and a phase transition only happens if all of them agree.

Each controller declares an [`AdjustmentStrategy`], so that the engine does not call
[`Controller::adjust_params`] when the controller has nothing to do.
*/

use crate::core::{MHRWParams, Phase, Walker, WalkState};
use crate::error::Result;

/**
When a controller wants [`Controller::adjust_params`] to be called.

The phase flags and the frequency flags are independent. A strategy may ask both for a call
after every iteration and for a call right after each live sample; there are no live samples
while thermalizing, so `after_sample` only ever applies while running.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdjustmentStrategy {
    pub while_thermalizing: bool,
    pub while_running: bool,
    pub every_iteration: bool,
    pub after_sample: bool,
}

impl AdjustmentStrategy {
    pub const DO_NOT_ADJUST: Self = Self {
        while_thermalizing: false,
        while_running: false,
        every_iteration: false,
        after_sample: false,
    };

    pub const EVERY_ITERATION_WHILE_THERMALIZING: Self = Self {
        while_thermalizing: true,
        while_running: false,
        every_iteration: true,
        after_sample: false,
    };

    pub const EVERY_SAMPLE_WHILE_RUNNING: Self = Self {
        while_thermalizing: false,
        while_running: true,
        every_iteration: false,
        after_sample: true,
    };

    pub const EVERY_ITERATION: Self = Self {
        while_thermalizing: true,
        while_running: true,
        every_iteration: true,
        after_sample: false,
    };

    /// The smallest strategy covering both `self` and `other`.
    pub fn union(self, other: Self) -> Self {
        Self {
            while_thermalizing: self.while_thermalizing || other.while_thermalizing,
            while_running: self.while_running || other.while_running,
            every_iteration: self.every_iteration || other.every_iteration,
            after_sample: self.after_sample || other.after_sample,
        }
    }

    pub fn is_active(&self) -> bool {
        (self.while_thermalizing || self.while_running) && (self.every_iteration || self.after_sample)
    }

    /// Whether an adjustment is wanted in `phase`, either right after a live sample
    /// (`after_sample`) or at the end of a plain iteration.
    pub fn applies(&self, phase: Phase, after_sample: bool) -> bool {
        let phase_ok = match phase {
            Phase::Thermalizing => self.while_thermalizing,
            Phase::Running => self.while_running,
            Phase::Init | Phase::Done => false,
        };
        if !phase_ok {
            return false;
        }
        if after_sample {
            self.after_sample && phase == Phase::Running
        } else {
            self.every_iteration
        }
    }
}

/**
Inspects a random walk and steers it.

`S` is the walk's stats collector, which the controller may read (for instance a moving-average
acceptance ratio, or the convergence of error bars).

Every hook has a neutral default: no adjustment, and consent to every phase transition.
*/
pub trait Controller<W: Walker, S: ?Sized> {
    fn adjustment_strategy(&self) -> AdjustmentStrategy {
        AdjustmentStrategy::DO_NOT_ADJUST
    }

    fn init(
        &mut self,
        _params: &mut MHRWParams<W::Params>,
        _walker: &W,
        _walk: &WalkState,
    ) -> Result<()> {
        Ok(())
    }

    fn thermalizing_done(
        &mut self,
        _params: &mut MHRWParams<W::Params>,
        _walker: &W,
        _walk: &WalkState,
    ) -> Result<()> {
        Ok(())
    }

    fn done(
        &mut self,
        _params: &mut MHRWParams<W::Params>,
        _walker: &W,
        _walk: &WalkState,
    ) -> Result<()> {
        Ok(())
    }

    /// Asked at sweep boundaries once the configured thermalizing sweeps have elapsed.
    fn allow_done_thermalization(
        &mut self,
        _params: &MHRWParams<W::Params>,
        _walker: &W,
        _stats: &S,
        _iter_k: u64,
        _walk: &WalkState,
    ) -> bool {
        true
    }

    /// Asked at sweep boundaries once the configured running sweeps have elapsed.
    fn allow_done_runs(
        &mut self,
        _params: &MHRWParams<W::Params>,
        _walker: &W,
        _stats: &S,
        _iter_k: u64,
        _walk: &WalkState,
    ) -> bool {
        true
    }

    /// Called according to [`Controller::adjustment_strategy`].
    fn adjust_params(
        &mut self,
        _params: &mut MHRWParams<W::Params>,
        _walker: &W,
        _stats: &S,
        _iter_k: u64,
        _walk: &WalkState,
        _after_sample: bool,
    ) -> Result<()> {
        Ok(())
    }

    fn status_line(&self) -> Option<String> {
        None
    }
}

/// A controller which never intervenes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoController;

impl<W: Walker, S: ?Sized> Controller<W, S> for NoController {}

/// A controller which can be switched off: `None` behaves like [`NoController`].
impl<W: Walker, S: ?Sized, C: Controller<W, S>> Controller<W, S> for Option<C> {
    fn adjustment_strategy(&self) -> AdjustmentStrategy {
        self.as_ref()
            .map_or(AdjustmentStrategy::DO_NOT_ADJUST, |c| c.adjustment_strategy())
    }

    fn init(
        &mut self,
        params: &mut MHRWParams<W::Params>,
        walker: &W,
        walk: &WalkState,
    ) -> Result<()> {
        match self {
            Some(c) => c.init(params, walker, walk),
            None => Ok(()),
        }
    }

    fn thermalizing_done(
        &mut self,
        params: &mut MHRWParams<W::Params>,
        walker: &W,
        walk: &WalkState,
    ) -> Result<()> {
        match self {
            Some(c) => c.thermalizing_done(params, walker, walk),
            None => Ok(()),
        }
    }

    fn done(
        &mut self,
        params: &mut MHRWParams<W::Params>,
        walker: &W,
        walk: &WalkState,
    ) -> Result<()> {
        match self {
            Some(c) => c.done(params, walker, walk),
            None => Ok(()),
        }
    }

    fn allow_done_thermalization(
        &mut self,
        params: &MHRWParams<W::Params>,
        walker: &W,
        stats: &S,
        iter_k: u64,
        walk: &WalkState,
    ) -> bool {
        self.as_mut().map_or(true, |c| {
            c.allow_done_thermalization(params, walker, stats, iter_k, walk)
        })
    }

    fn allow_done_runs(
        &mut self,
        params: &MHRWParams<W::Params>,
        walker: &W,
        stats: &S,
        iter_k: u64,
        walk: &WalkState,
    ) -> bool {
        self.as_mut()
            .map_or(true, |c| c.allow_done_runs(params, walker, stats, iter_k, walk))
    }

    fn adjust_params(
        &mut self,
        params: &mut MHRWParams<W::Params>,
        walker: &W,
        stats: &S,
        iter_k: u64,
        walk: &WalkState,
        after_sample: bool,
    ) -> Result<()> {
        match self {
            Some(c) => c.adjust_params(params, walker, stats, iter_k, walk, after_sample),
            None => Ok(()),
        }
    }

    fn status_line(&self) -> Option<String> {
        self.as_ref().and_then(|c| c.status_line())
    }
}

macro_rules! impl_controller_tuple {
    ($($name:ident . $idx:tt),+) => {
        impl<W: Walker, S: ?Sized, $($name: Controller<W, S>),+> Controller<W, S> for ($($name,)+) {
            fn adjustment_strategy(&self) -> AdjustmentStrategy {
                AdjustmentStrategy::DO_NOT_ADJUST$(.union(self.$idx.adjustment_strategy()))+
            }

            fn init(
                &mut self,
                params: &mut MHRWParams<W::Params>,
                walker: &W,
                walk: &WalkState,
            ) -> Result<()> {
                $(self.$idx.init(params, walker, walk)?;)+
                Ok(())
            }

            fn thermalizing_done(
                &mut self,
                params: &mut MHRWParams<W::Params>,
                walker: &W,
                walk: &WalkState,
            ) -> Result<()> {
                $(self.$idx.thermalizing_done(params, walker, walk)?;)+
                Ok(())
            }

            fn done(
                &mut self,
                params: &mut MHRWParams<W::Params>,
                walker: &W,
                walk: &WalkState,
            ) -> Result<()> {
                $(self.$idx.done(params, walker, walk)?;)+
                Ok(())
            }

            // every member is asked, so that each one sees every checkpoint
            fn allow_done_thermalization(
                &mut self,
                params: &MHRWParams<W::Params>,
                walker: &W,
                stats: &S,
                iter_k: u64,
                walk: &WalkState,
            ) -> bool {
                let mut ok = true;
                $(ok &= self.$idx.allow_done_thermalization(params, walker, stats, iter_k, walk);)+
                ok
            }

            fn allow_done_runs(
                &mut self,
                params: &MHRWParams<W::Params>,
                walker: &W,
                stats: &S,
                iter_k: u64,
                walk: &WalkState,
            ) -> bool {
                let mut ok = true;
                $(ok &= self.$idx.allow_done_runs(params, walker, stats, iter_k, walk);)+
                ok
            }

            fn adjust_params(
                &mut self,
                params: &mut MHRWParams<W::Params>,
                walker: &W,
                stats: &S,
                iter_k: u64,
                walk: &WalkState,
                after_sample: bool,
            ) -> Result<()> {
                $(
                    if self.$idx.adjustment_strategy().applies(walk.phase, after_sample) {
                        self.$idx.adjust_params(params, walker, stats, iter_k, walk, after_sample)?;
                    }
                )+
                Ok(())
            }

            fn status_line(&self) -> Option<String> {
                crate::core::join_status_lines([$(self.$idx.status_line()),+])
            }
        }
    };
}

impl_controller_tuple!(A.0);
impl_controller_tuple!(A.0, B.1);
impl_controller_tuple!(A.0, B.1, C.2);
impl_controller_tuple!(A.0, B.1, C.2, D.3);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FnSyntax, StepSize};
    use rand::RngCore;

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

        fn jump_fn(&mut self, _cur: &(), _params: &StepSize, _rng: &mut dyn RngCore) -> Result<()> {
            Ok(())
        }

        fn fn_value(&mut self, _pt: &()) -> Result<f64> {
            Ok(0.0)
        }
    }

    struct Vote {
        allow: bool,
        asked: usize,
        adjusted: usize,
        strategy: AdjustmentStrategy,
    }

    impl Vote {
        fn new(allow: bool, strategy: AdjustmentStrategy) -> Self {
            Self {
                allow,
                asked: 0,
                adjusted: 0,
                strategy,
            }
        }
    }

    impl Controller<NoWalker, ()> for Vote {
        fn adjustment_strategy(&self) -> AdjustmentStrategy {
            self.strategy
        }

        fn allow_done_runs(
            &mut self,
            _params: &MHRWParams<StepSize>,
            _walker: &NoWalker,
            _stats: &(),
            _iter_k: u64,
            _walk: &WalkState,
        ) -> bool {
            self.asked += 1;
            self.allow
        }

        fn adjust_params(
            &mut self,
            _params: &mut MHRWParams<StepSize>,
            _walker: &NoWalker,
            _stats: &(),
            _iter_k: u64,
            _walk: &WalkState,
            _after_sample: bool,
        ) -> Result<()> {
            self.adjusted += 1;
            Ok(())
        }
    }

    #[test]
    fn test_strategy_applies() {
        let s = AdjustmentStrategy::EVERY_ITERATION_WHILE_THERMALIZING;
        assert!(s.applies(Phase::Thermalizing, false));
        assert!(!s.applies(Phase::Running, false));
        let s = AdjustmentStrategy::EVERY_SAMPLE_WHILE_RUNNING;
        assert!(s.applies(Phase::Running, true));
        assert!(!s.applies(Phase::Running, false));
        assert!(!s.applies(Phase::Thermalizing, true));
        assert!(!AdjustmentStrategy::DO_NOT_ADJUST.applies(Phase::Running, false));
    }

    #[test]
    fn test_strategy_union_keeps_both_frequencies() {
        let u = AdjustmentStrategy::EVERY_ITERATION_WHILE_THERMALIZING
            .union(AdjustmentStrategy::EVERY_SAMPLE_WHILE_RUNNING);
        assert!(u.while_thermalizing && u.while_running);
        assert!(u.every_iteration && u.after_sample);
        assert!(u.applies(Phase::Thermalizing, false));
        assert!(u.applies(Phase::Running, true));
        assert!(!u.applies(Phase::Thermalizing, true));
        let u = AdjustmentStrategy::DO_NOT_ADJUST.union(AdjustmentStrategy::EVERY_SAMPLE_WHILE_RUNNING);
        assert_eq!(u, AdjustmentStrategy::EVERY_SAMPLE_WHILE_RUNNING);
        assert!(!AdjustmentStrategy::default().is_active());
    }

    #[test]
    fn test_tuple_requires_unanimous_consent_and_asks_everyone() {
        let mut ctrl = (
            Vote::new(false, AdjustmentStrategy::DO_NOT_ADJUST),
            Vote::new(true, AdjustmentStrategy::EVERY_SAMPLE_WHILE_RUNNING),
        );
        let params = MHRWParams::new(0.1, 1, 1, 1);
        let walk = WalkState {
            phase: Phase::Running,
            ..Default::default()
        };
        assert!(!ctrl.allow_done_runs(&params, &NoWalker, &(), 0, &walk));
        assert_eq!((ctrl.0.asked, ctrl.1.asked), (1, 1));

        ctrl.0.allow = true;
        assert!(ctrl.allow_done_runs(&params, &NoWalker, &(), 0, &walk));
    }

    #[test]
    fn test_tuple_only_adjusts_members_that_asked_for_it() {
        let mut ctrl = (
            Vote::new(true, AdjustmentStrategy::DO_NOT_ADJUST),
            Vote::new(true, AdjustmentStrategy::EVERY_SAMPLE_WHILE_RUNNING),
        );
        let mut params = MHRWParams::new(0.1, 1, 1, 1);
        let walk = WalkState {
            phase: Phase::Running,
            ..Default::default()
        };
        ctrl.adjust_params(&mut params, &NoWalker, &(), 0, &walk, true)
            .unwrap();
        ctrl.adjust_params(&mut params, &NoWalker, &(), 1, &walk, false)
            .unwrap();
        assert_eq!((ctrl.0.adjusted, ctrl.1.adjusted), (0, 1));
    }

    #[test]
    fn test_switched_off_controller_consents() {
        let mut off: Option<Vote> = None;
        let params = MHRWParams::new(0.1, 1, 1, 1);
        let walk = WalkState::default();
        assert!(!Controller::<NoWalker, ()>::adjustment_strategy(&off).is_active());
        assert!(off.allow_done_runs(&params, &NoWalker, &(), 0, &walk));

        let mut on = Some(Vote::new(false, AdjustmentStrategy::DO_NOT_ADJUST));
        assert!(!on.allow_done_runs(&params, &NoWalker, &(), 0, &walk));
        assert_eq!(on.as_ref().map(|v| v.asked), Some(1));
    }
}
