//! A controller which keeps the walk running until the binning-analysis error bars of a value
//! histogram have converged.

use serde::{Deserialize, Serialize};

use crate::binning::ConvergenceSummary;
use crate::controller::{AdjustmentStrategy, Controller};
use crate::core::{MHRWParams, Walker, WalkState};
use crate::logging::Logger;
use crate::stats::BinConvergenceSource;

/// Settings of the [`BinsConvergedController`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceControlParams {
    /// Minimum number of sweeps between two convergence checks. Zero disables the controller.
    pub check_frequency_sweeps: u64,
    pub max_allowed_unknown: usize,
    pub max_allowed_unknown_notisolated: usize,
    pub max_allowed_not_converged: usize,
    /// Never run longer than this multiple of the configured running iterations. A value `<= 0`
    /// removes the cap.
    pub max_add_run_iters: f64,
}

impl Default for ConvergenceControlParams {
    fn default() -> Self {
        Self {
            check_frequency_sweeps: 1024,
            max_allowed_unknown: 0,
            max_allowed_unknown_notisolated: 0,
            max_allowed_not_converged: 0,
            max_add_run_iters: 1.5,
        }
    }
}

impl ConvergenceControlParams {
    /// Whether `summary` is good enough to end the walk.
    pub fn accepts(&self, summary: &ConvergenceSummary) -> bool {
        summary.n_not_converged <= self.max_allowed_not_converged
            && summary.n_unknown <= self.max_allowed_unknown
            && summary.n_unknown - summary.n_unknown_isolated
                <= self.max_allowed_unknown_notisolated
    }
}

/// Holds back the end of the running phase while too many error bars have not converged.
///
/// Never adjusts parameters and never holds back thermalization. The check is repeated at most
/// every `check_frequency_sweeps` sweeps, and is skipped altogether once the walk ran for
/// `max_add_run_iters` times the configured number of running iterations.
#[derive(Debug, Clone)]
pub struct BinsConvergedController {
    params: ConvergenceControlParams,
    last_forbidden_iter_k: u64,
    /// Why the last convergence check could not be made, if it failed.
    check_failure: Option<String>,
    logger: Logger,
}

impl Default for BinsConvergedController {
    fn default() -> Self {
        Self::new(ConvergenceControlParams::default())
    }
}

impl BinsConvergedController {
    pub fn new(params: ConvergenceControlParams) -> Self {
        Self {
            params,
            last_forbidden_iter_k: 0,
            check_failure: None,
            logger: Logger::new("mini_mhrw::convergence"),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn params(&self) -> &ConvergenceControlParams {
        &self.params
    }
}

impl<W, S> Controller<W, S> for BinsConvergedController
where
    W: Walker,
    S: BinConvergenceSource + ?Sized,
{
    fn adjustment_strategy(&self) -> AdjustmentStrategy {
        AdjustmentStrategy::DO_NOT_ADJUST
    }

    fn allow_done_runs(
        &mut self,
        params: &MHRWParams<W::Params>,
        _walker: &W,
        stats: &S,
        iter_k: u64,
        _walk: &WalkState,
    ) -> bool {
        let check_frequency = self.params.check_frequency_sweeps;
        if check_frequency == 0 {
            return true;
        }

        let cap = self.params.max_add_run_iters;
        if cap > 0.0 && iter_k as f64 > cap * params.n_sweep as f64 * params.n_run as f64 {
            self.logger.debug(format_args!(
                "ending runs at iter_k={} regardless of error bar convergence",
                iter_k
            ));
            return true;
        }

        if self.last_forbidden_iter_k > 0
            && iter_k.saturating_sub(self.last_forbidden_iter_k)
                < params.n_sweep.saturating_mul(check_frequency)
        {
            return false;
        }

        let summary = match stats.bin_convergence_summary() {
            Ok(summary) => summary,
            Err(err) => {
                self.logger
                    .warn(format_args!("cannot check error bar convergence: {}", err));
                self.check_failure = Some(err.to_string());
                return true;
            }
        };
        self.check_failure = None;
        self.logger
            .trace(format_args!("iter_k={}: {}", iter_k, summary));

        if !self.params.accepts(&summary) {
            self.last_forbidden_iter_k = iter_k;
            return false;
        }
        true
    }

    fn status_line(&self) -> Option<String> {
        self.check_failure
            .as_ref()
            .map(|err| format!("error bar convergence unchecked, runs ended early: {err}"))
    }
}
