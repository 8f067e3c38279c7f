/*!
# Value-Histogram Tasks

The most common use of the crate: run many independent random walks, each recording a
histogram of some figure of merit with binning-analysis error bars, then average the histograms
into a final one.

- [`ValueHistogramTasksCData`] holds everything the walks share: how to create a walker, the
  value calculator, the histogram range, the walk parameters and the controller settings.
  Each walk records into [`ValueHistogramStats`] and is steered by a (possibly disabled)
  [`StepSizeController`] together with a [`BinsConvergedController`].
- [`ResultsCollectorWithBinning`] averages the per-task histograms. The error bars of the final
  histogram combine the per-task binning error bars; the spread of the per-task histograms is
  kept alongside as an independent check.
- [`ResultsCollectorSimple`] does the same for walks that recorded plain histograms.
*/

use ndarray::Array1;
use std::fmt::{self, Write as _};

use crate::binning::{ConvergenceSummary, ConvergenceThresholds};
use crate::convergence::{BinsConvergedController, ConvergenceControlParams};
use crate::core::{
    join_status_lines, MHRWParams, RawMove, StatsCollector, StepSizeParams, WalkState, Walker,
};
use crate::error::{MhrwError, Result};
use crate::histogram::{AveragedHistogram, Histogram, HistogramParams, HistogramWithErrorBars};
use crate::logging::Logger;
use crate::stats::{
    AcceptanceRatioSource, BinConvergenceSource, MovingAverageAcceptanceRatio, ValueCalculator,
    ValueHistogramWithBinning, ValueHistogramWithBinningResult, RECOMMENDED_ACCEPTANCE_RATIO,
};
use crate::step_size::{StepSizeControlParams, StepSizeController};
use crate::tasks::{MHRWTaskCData, MHRandomWalkTask, MHRandomWalkTaskResult};

/// Creates the walker of each task.
pub trait WalkerFactory {
    type Walker: Walker;

    fn create_walker(&self, logger: &Logger) -> Result<Self::Walker>;
}

impl<W, F> WalkerFactory for F
where
    W: Walker,
    F: Fn(&Logger) -> Result<W>,
{
    type Walker = W;

    fn create_walker(&self, logger: &Logger) -> Result<W> {
        self(logger)
    }
}

type WalkerParamsOf<WF> = <<WF as WalkerFactory>::Walker as Walker>::Params;

/// Stats collected by each value-histogram walk.
#[derive(Debug, Clone)]
pub struct ValueHistogramStats<VC> {
    pub histogram: ValueHistogramWithBinning<VC>,
    pub acceptance: MovingAverageAcceptanceRatio,
}

impl<P, VC: ValueCalculator<P>> StatsCollector<P> for ValueHistogramStats<VC> {
    fn init(&mut self) -> Result<()> {
        StatsCollector::<P>::init(&mut self.histogram)?;
        StatsCollector::<P>::init(&mut self.acceptance)
    }

    fn thermalizing_done(&mut self) -> Result<()> {
        StatsCollector::<P>::thermalizing_done(&mut self.histogram)?;
        StatsCollector::<P>::thermalizing_done(&mut self.acceptance)
    }

    fn done(&mut self) -> Result<()> {
        StatsCollector::<P>::done(&mut self.histogram)?;
        StatsCollector::<P>::done(&mut self.acceptance)
    }

    fn raw_move(&mut self, mv: &RawMove<'_, P>, walk: &WalkState) -> Result<()> {
        self.histogram.raw_move(mv, walk)?;
        self.acceptance.raw_move(mv, walk)
    }

    fn process_sample(&mut self, k: u64, n: u64, pt: &P, val: f64) -> Result<()> {
        self.histogram.process_sample(k, n, pt, val)?;
        self.acceptance.process_sample(k, n, pt, val)
    }

    fn status_line(&self) -> Option<String> {
        join_status_lines([
            StatsCollector::<P>::status_line(&self.histogram),
            StatsCollector::<P>::status_line(&self.acceptance),
        ])
    }
}

impl<VC> AcceptanceRatioSource for ValueHistogramStats<VC> {
    fn buffer_size(&self) -> u64 {
        self.acceptance.buffer_size()
    }

    fn has_moving_average(&self) -> bool {
        self.acceptance.has_moving_average()
    }

    fn moving_average_acceptance_ratio(&self) -> f64 {
        self.acceptance.moving_average_acceptance_ratio()
    }
}

impl<VC> BinConvergenceSource for ValueHistogramStats<VC> {
    fn bin_convergence_summary(&self) -> Result<ConvergenceSummary> {
        self.histogram.bin_convergence_summary()
    }
}

/// Shared data of value-histogram tasks.
pub struct ValueHistogramTasksCData<WF: WalkerFactory, VC> {
    walker_factory: WF,
    value_calculator: VC,
    histogram_params: HistogramParams,
    binning_num_levels: usize,
    binning_thresholds: ConvergenceThresholds,
    mhrw_params: MHRWParams<WalkerParamsOf<WF>>,
    base_seed: u64,
    step_size_control: Option<StepSizeControlParams>,
    convergence_control: ConvergenceControlParams,
    moving_average_buffer_size: usize,
}

/// The task type running value-histogram walks.
pub type ValueHistogramTask<WF, VC> = MHRandomWalkTask<ValueHistogramTasksCData<WF, VC>>;

/// The outcome of one value-histogram walk.
pub type ValueHistogramTaskResult<WP> = MHRandomWalkTaskResult<ValueHistogramWithBinningResult, WP>;

impl<WF: WalkerFactory, VC> ValueHistogramTasksCData<WF, VC> {
    /// Step-size control and convergence control are on, with their default settings.
    pub fn new(
        walker_factory: WF,
        value_calculator: VC,
        histogram_params: HistogramParams,
        binning_num_levels: usize,
        mhrw_params: MHRWParams<WalkerParamsOf<WF>>,
    ) -> Result<Self> {
        histogram_params.validate()?;
        mhrw_params.validate()?;
        if binning_num_levels == 0 {
            return Err(MhrwError::config("binning_num_levels must be positive"));
        }
        Ok(Self {
            walker_factory,
            value_calculator,
            histogram_params,
            binning_num_levels,
            binning_thresholds: ConvergenceThresholds::default(),
            mhrw_params,
            base_seed: 0,
            step_size_control: Some(StepSizeControlParams::default()),
            convergence_control: ConvergenceControlParams::default(),
            moving_average_buffer_size: MovingAverageAcceptanceRatio::DEFAULT_BUFFER_SIZE,
        })
    }

    pub fn with_base_seed(mut self, base_seed: u64) -> Self {
        self.base_seed = base_seed;
        self
    }

    /// `None` keeps the step size fixed.
    pub fn with_step_size_control(mut self, params: Option<StepSizeControlParams>) -> Self {
        self.step_size_control = params;
        self
    }

    pub fn with_convergence_control(mut self, params: ConvergenceControlParams) -> Self {
        self.convergence_control = params;
        self
    }

    pub fn with_moving_average_buffer_size(mut self, buffer_size: usize) -> Self {
        self.moving_average_buffer_size = buffer_size;
        self
    }

    pub fn with_binning_thresholds(mut self, thresholds: ConvergenceThresholds) -> Self {
        self.binning_thresholds = thresholds;
        self
    }

    pub fn histogram_params(&self) -> &HistogramParams {
        &self.histogram_params
    }

    pub fn binning_num_levels(&self) -> usize {
        self.binning_num_levels
    }

    pub fn initial_mhrw_params(&self) -> &MHRWParams<WalkerParamsOf<WF>> {
        &self.mhrw_params
    }

    /// The walk parameters, one per line.
    pub fn describe_mhrw_params(&self) -> String
    where
        WalkerParamsOf<WF>: fmt::Display,
    {
        let p = &self.mhrw_params;
        format!(
            "\tstep            : {}\n\t# iter. / sweep = {}\n\t# therm. sweeps = {}\n\t# run sweeps    = {}\n",
            p.walker_params, p.n_sweep, p.n_therm, p.n_run
        )
    }
}

impl<WF, VC> MHRWTaskCData for ValueHistogramTasksCData<WF, VC>
where
    WF: WalkerFactory + Sync,
    WalkerParamsOf<WF>: StepSizeParams + Sync,
    VC: ValueCalculator<<WF::Walker as Walker>::Point> + Clone + Sync,
{
    type Walker = WF::Walker;
    type Stats = ValueHistogramStats<VC>;
    type Controller = (Option<StepSizeController>, BinsConvergedController);
    type StatsResult = ValueHistogramWithBinningResult;

    fn mhrw_params(&self) -> MHRWParams<WalkerParamsOf<WF>> {
        self.mhrw_params.clone()
    }

    fn base_seed(&self) -> u64 {
        self.base_seed
    }

    fn create_walker(&self, logger: &Logger) -> Result<Self::Walker> {
        self.walker_factory.create_walker(&logger.sub_logger("walker"))
    }

    fn create_stats(&self, logger: &Logger) -> Result<Self::Stats> {
        let histogram = ValueHistogramWithBinning::new(
            self.histogram_params,
            self.value_calculator.clone(),
            self.binning_num_levels,
        )?
        .with_binning_thresholds(self.binning_thresholds)
        .with_logger(logger.sub_logger("value_histogram"));
        Ok(ValueHistogramStats {
            histogram,
            acceptance: MovingAverageAcceptanceRatio::new(self.moving_average_buffer_size),
        })
    }

    fn create_controller(&self, logger: &Logger) -> Result<Self::Controller> {
        let step_size = self
            .step_size_control
            .map(|p| StepSizeController::new(p).with_logger(logger.sub_logger("step_size")));
        let convergence = BinsConvergedController::new(self.convergence_control)
            .with_logger(logger.sub_logger("convergence"));
        Ok((step_size, convergence))
    }

    fn stats_result(&self, stats: Self::Stats) -> Result<ValueHistogramWithBinningResult> {
        stats.histogram.into_result().ok_or_else(|| {
            MhrwError::StatsCollector("the value histogram was not finalized".to_string())
        })
    }
}

/// What the final report shows of a single task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSummary {
    pub task: usize,
    pub acceptance_ratio: f64,
    /// The task's normalized histogram.
    pub histogram: HistogramWithErrorBars,
    /// Convergence of the task's error bars, when binning analysis was used.
    pub convergence: Option<ConvergenceSummary>,
}

impl TaskSummary {
    pub fn acceptance_ratio_in_range(&self) -> bool {
        (RECOMMENDED_ACCEPTANCE_RATIO.0..=RECOMMENDED_ACCEPTANCE_RATIO.1)
            .contains(&self.acceptance_ratio)
    }
}

/// Averages the histograms of value-histogram tasks with binning analysis.
#[derive(Debug, Clone)]
pub struct ResultsCollectorWithBinning {
    final_histogram: HistogramWithErrorBars,
    simple_final_histogram: HistogramWithErrorBars,
    tasks: Vec<TaskSummary>,
    num_tasks: usize,
}

impl ResultsCollectorWithBinning {
    /// Collects the results of a dispatch; tasks which did not complete are skipped.
    ///
    /// Fails if no task completed, or if the tasks used different histogram ranges.
    pub fn collect<WP>(results: &[Option<ValueHistogramTaskResult<WP>>]) -> Result<Self> {
        let mut averages: Option<(AveragedHistogram, AveragedHistogram)> = None;
        let mut tasks = Vec::with_capacity(results.len());

        for (task, result) in results.iter().enumerate() {
            let Some(result) = result else {
                continue;
            };
            let hist = &result.stats_result.hist;
            let (with_error_bars, simple) = averages.get_or_insert_with(|| {
                (
                    AveragedHistogram::new(hist.params),
                    AveragedHistogram::new(hist.params),
                )
            });
            with_error_bars.add_histogram_with_error_bars(hist)?;
            simple.add_histogram(&Histogram {
                params: hist.params,
                bins: hist.bins.clone(),
                off_chart: hist.off_chart,
            })?;
            tasks.push(TaskSummary {
                task,
                acceptance_ratio: result.acceptance_ratio,
                histogram: hist.clone(),
                convergence: Some(result.stats_result.convergence_summary()),
            });
        }

        let (with_error_bars, simple) = averages.ok_or_else(|| {
            MhrwError::StatsCollector("no task results to collect".to_string())
        })?;
        Ok(Self {
            final_histogram: with_error_bars.finalize()?,
            simple_final_histogram: simple.finalize()?,
            tasks,
            num_tasks: results.len(),
        })
    }

    /// Average histogram, with error bars combined from the per-task binning analyses.
    pub fn final_histogram(&self) -> &HistogramWithErrorBars {
        &self.final_histogram
    }

    /// Average histogram, with the standard deviation of the mean across tasks as error bars.
    pub fn simple_final_histogram(&self) -> &HistogramWithErrorBars {
        &self.simple_final_histogram
    }

    pub fn task_summaries(&self) -> &[TaskSummary] {
        &self.tasks
    }

    /// Number of tasks dispatched, completed or not.
    pub fn num_tasks(&self) -> usize {
        self.num_tasks
    }

    pub fn num_collected(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the error bars of every bin of every task converged.
    pub fn all_converged(&self) -> bool {
        self.tasks
            .iter()
            .all(|t| t.convergence.is_some_and(|c| c.all_converged()))
    }

    /// Writes the final histogram as a tab-separated table.
    #[cfg(feature = "csv")]
    pub fn print_histogram_csv<W: std::io::Write>(&self, writer: W) -> Result<()> {
        crate::io::csv::write_histogram_csv(
            writer,
            &self.final_histogram,
            Some(&self.simple_final_histogram.delta),
        )
    }

    /// A human-readable summary of all runs followed by the final histogram, `max_width`
    /// columns wide (zero picks a default width).
    pub fn final_report(&self, max_width: usize) -> String {
        let width = report_width(max_width);
        let mut s = String::new();
        write_runs_summary(&mut s, width, &self.tasks, self.num_tasks);

        let not_converged = self
            .tasks
            .iter()
            .filter(|t| t.convergence.is_some_and(|c| !c.all_converged()))
            .count();
        if not_converged > 0 {
            let _ = writeln!(
                s,
                "*** {} of {} task(s) have error bars which did not converge; consider longer runs ***",
                not_converged,
                self.tasks.len()
            );
        }
        let _ = writeln!(s);
        write_final_histogram(&mut s, width, &self.final_histogram);
        s
    }
}

/// Averages plain per-task histograms; the error bars are the spread across tasks.
#[derive(Debug, Clone)]
pub struct ResultsCollectorSimple {
    final_histogram: HistogramWithErrorBars,
    tasks: Vec<TaskSummary>,
    num_tasks: usize,
}

impl ResultsCollectorSimple {
    /// Collects the results of a dispatch; tasks which did not complete are skipped. Each
    /// histogram is normalized before averaging.
    pub fn collect<WP>(results: &[Option<MHRandomWalkTaskResult<Histogram, WP>>]) -> Result<Self> {
        let mut average: Option<AveragedHistogram> = None;
        let mut tasks = Vec::with_capacity(results.len());

        for (task, result) in results.iter().enumerate() {
            let Some(result) = result else {
                continue;
            };
            let normalized = result.stats_result.normalized();
            average
                .get_or_insert_with(|| AveragedHistogram::new(normalized.params))
                .add_histogram(&normalized)?;
            tasks.push(TaskSummary {
                task,
                acceptance_ratio: result.acceptance_ratio,
                histogram: HistogramWithErrorBars::from(normalized),
                convergence: None,
            });
        }

        let average = average.ok_or_else(|| {
            MhrwError::StatsCollector("no task results to collect".to_string())
        })?;
        Ok(Self {
            final_histogram: average.finalize()?,
            tasks,
            num_tasks: results.len(),
        })
    }

    pub fn final_histogram(&self) -> &HistogramWithErrorBars {
        &self.final_histogram
    }

    pub fn task_summaries(&self) -> &[TaskSummary] {
        &self.tasks
    }

    pub fn num_tasks(&self) -> usize {
        self.num_tasks
    }

    #[cfg(feature = "csv")]
    pub fn print_histogram_csv<W: std::io::Write>(&self, writer: W) -> Result<()> {
        crate::io::csv::write_histogram_csv(writer, &self.final_histogram, None)
    }

    pub fn final_report(&self, max_width: usize) -> String {
        let width = report_width(max_width);
        let mut s = String::new();
        write_runs_summary(&mut s, width, &self.tasks, self.num_tasks);
        let _ = writeln!(s);
        write_final_histogram(&mut s, width, &self.final_histogram);
        s
    }
}

const DEFAULT_REPORT_WIDTH: usize = 100;

fn report_width(max_width: usize) -> usize {
    if max_width == 0 {
        DEFAULT_REPORT_WIDTH
    } else {
        max_width
    }
}

fn center_line(s: &mut String, width: usize, text: &str) {
    let pad = width.saturating_sub(text.len());
    let left = pad / 2;
    let _ = writeln!(s, "{}{}{}", " ".repeat(left), text, " ".repeat(pad - left));
}

fn hrule(s: &mut String, width: usize) {
    let _ = writeln!(s, "{}", "-".repeat(width));
}

fn write_runs_summary(s: &mut String, width: usize, tasks: &[TaskSummary], num_tasks: usize) {
    let _ = writeln!(s);
    center_line(s, width, "Final Report of Runs");
    hrule(s, width);

    let digits = num_tasks.max(1).to_string().len();
    for t in tasks {
        let head = format!("#{:>digits$}: ", t.task);
        let tail = format!(" [accept ratio = {:.2}]", t.acceptance_ratio);
        // leave room for the range labels around the bar
        let bar_width = width
            .saturating_sub(head.len() + tail.len() + 16)
            .max(10);
        let _ = writeln!(s, "{}{}{}", head, t.histogram.short_bar(bar_width), tail);
        if !t.acceptance_ratio_in_range() {
            let _ = writeln!(
                s,
                "    *** Accept ratio out of recommended bounds [{}, {}] ! Adapt step size ***",
                RECOMMENDED_ACCEPTANCE_RATIO.0, RECOMMENDED_ACCEPTANCE_RATIO.1
            );
        }
        if let Some(summary) = &t.convergence {
            let _ = writeln!(s, "    error bars: {}", summary.describe());
        }
    }
    hrule(s, width);

    if tasks.len() < num_tasks {
        let _ = writeln!(
            s,
            "*** {} of {} task(s) did not complete and are not included ***",
            num_tasks - tasks.len(),
            num_tasks
        );
    }
}

fn write_final_histogram(s: &mut String, width: usize, hist: &HistogramWithErrorBars) {
    center_line(s, width, "Final Histogram");
    hrule(s, width);
    s.push_str(&hist.pretty_print(width));
    hrule(s, width);
}

/// The per-bin standard deviation across the given histograms' bins, divided by `sqrt(N)`.
pub fn spread_across(histograms: &[&HistogramWithErrorBars]) -> Result<Array1<f64>> {
    let first = histograms
        .first()
        .ok_or_else(|| MhrwError::StatsCollector("no histograms given".to_string()))?;
    let mut avg = AveragedHistogram::new(first.params);
    for h in histograms {
        avg.add_histogram(&Histogram {
            params: h.params,
            bins: h.bins.clone(),
            off_chart: h.off_chart,
        })?;
    }
    Ok(avg.finalize()?.delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binning::ConvergenceStatus;
    use crate::core::StepSize;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, Array2};

    fn binned_result(
        bins: [f64; 2],
        delta: [f64; 2],
        acceptance_ratio: f64,
        statuses: [ConvergenceStatus; 2],
    ) -> Option<ValueHistogramTaskResult<StepSize>> {
        let params = HistogramParams::new(0.0, 1.0, 2);
        Some(MHRandomWalkTaskResult {
            stats_result: ValueHistogramWithBinningResult {
                hist: HistogramWithErrorBars {
                    params,
                    bins: arr1(&bins),
                    delta: arr1(&delta),
                    off_chart: 0.0,
                },
                error_levels: Array2::zeros((2, 3)),
                converged_status: arr1(&statuses),
            },
            mhrw_params: MHRWParams::new(0.1, 10, 10, 100),
            acceptance_ratio,
        })
    }

    #[test]
    fn test_collect_with_binning_combines_error_bars() {
        use ConvergenceStatus::*;
        let results = vec![
            binned_result([0.2, 0.8], [0.03, 0.04], 0.25, [Converged, Converged]),
            None,
            binned_result([0.4, 0.6], [0.04, 0.03], 0.5, [Converged, NotConverged]),
        ];
        let collector = ResultsCollectorWithBinning::collect(&results).unwrap();
        assert_eq!(collector.num_tasks(), 3);
        assert_eq!(collector.num_collected(), 2);
        assert!(!collector.all_converged());

        let hist = collector.final_histogram();
        assert_abs_diff_eq!(hist.bins, arr1(&[0.3, 0.7]), epsilon = 1e-12);
        // sqrt(0.03^2 + 0.04^2) / 2
        assert_abs_diff_eq!(hist.delta, arr1(&[0.025, 0.025]), epsilon = 1e-12);

        // sqrt((mean(x^2) - mean(x)^2) / (N - 1)) = sqrt(0.01 / 1)
        let simple = collector.simple_final_histogram();
        assert_abs_diff_eq!(simple.delta, arr1(&[0.1, 0.1]), epsilon = 1e-12);
        assert_eq!(collector.task_summaries()[1].task, 2);
    }

    #[test]
    fn test_collect_without_results_fails() {
        let results: Vec<Option<ValueHistogramTaskResult<StepSize>>> = vec![None, None];
        assert!(ResultsCollectorWithBinning::collect(&results).is_err());
    }

    #[test]
    fn test_final_report_flags_problems() {
        use ConvergenceStatus::*;
        let results = vec![
            binned_result([0.2, 0.8], [0.03, 0.04], 0.25, [Converged, Converged]),
            binned_result([0.4, 0.6], [0.04, 0.03], 0.5, [Converged, Unknown]),
            None,
        ];
        let report = ResultsCollectorWithBinning::collect(&results)
            .unwrap()
            .final_report(80);
        assert!(report.contains("Final Report of Runs"));
        assert!(report.contains("#0: "));
        assert!(report.contains(" [accept ratio = 0.25]"));
        assert!(report.contains(
            "    error bars: Total 2 values: 2 converged / 0 maybe (0 isolated) / 0 not converged"
        ));
        assert!(report.contains("    *** Accept ratio out of recommended bounds [0.2, 0.4] ! Adapt step size ***"));
        assert!(report.contains("1 of 2 task(s) have error bars which did not converge"));
        assert!(report.contains("1 of 3 task(s) did not complete"));
        assert!(report.contains("Final Histogram"));
        assert_eq!(report.matches(&"-".repeat(80)).count(), 4);
    }

    #[test]
    fn test_collect_simple_normalizes_each_histogram() {
        let params = HistogramParams::new(0.0, 2.0, 2);
        let task = |counts: [u64; 2], off_chart: u64| {
            let mut h: Histogram = Histogram::new(params);
            h.bins.assign(&arr1(&counts));
            h.off_chart = off_chart;
            Some(MHRandomWalkTaskResult {
                stats_result: h,
                mhrw_params: MHRWParams::<StepSize>::new(0.1, 1, 1, 1),
                acceptance_ratio: 0.3,
            })
        };
        let results = vec![task([1, 3], 0), task([6, 2], 2)];
        let collector = ResultsCollectorSimple::collect(&results).unwrap();
        let hist = collector.final_histogram();
        assert_abs_diff_eq!(hist.bins, arr1(&[0.425, 0.475]), epsilon = 1e-12);
        assert_abs_diff_eq!(hist.off_chart, 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(hist.delta, arr1(&[0.175, 0.275]), epsilon = 1e-12);
        assert!(collector.task_summaries()[0].convergence.is_none());
        assert!(!collector.final_report(0).contains("error bars:"));
    }

    #[test]
    fn test_spread_across() {
        let params = HistogramParams::new(0.0, 1.0, 1);
        let a = HistogramWithErrorBars {
            params,
            bins: arr1(&[1.0]),
            delta: arr1(&[0.0]),
            off_chart: 0.0,
        };
        let b = HistogramWithErrorBars {
            bins: arr1(&[3.0]),
            ..a.clone()
        };
        let spread = spread_across(&[&a, &b]).unwrap();
        assert_abs_diff_eq!(spread[0], 1.0, epsilon = 1e-12);
    }
}
