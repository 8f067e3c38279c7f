//! Stats collectors: moving-average acceptance ratio, value histograms and value histograms with
//! binning-analysis error bars.

use ndarray::prelude::*;
use std::collections::VecDeque;
use std::fmt::Write as _;

use crate::binning::{BinningAnalysis, ConvergenceStatus, ConvergenceSummary, ConvergenceThresholds};
use crate::core::{RawMove, StatsCollector, WalkState};
use crate::error::Result;
use crate::histogram::{Histogram, HistogramParams, HistogramWithErrorBars};
use crate::logging::Logger;

/// Width of the histogram bars in status lines.
const STATUS_BAR_WIDTH: usize = 50;

/// Acceptance ratios a well-tuned walk should end up with.
pub const RECOMMENDED_ACCEPTANCE_RATIO: (f64, f64) = (0.2, 0.4);

/// Something that provides a moving-average acceptance ratio, e.g. for the step-size controller.
pub trait AcceptanceRatioSource {
    /// Number of moves the average is taken over.
    fn buffer_size(&self) -> u64;

    /// Whether enough moves were seen for the average to be meaningful.
    fn has_moving_average(&self) -> bool;

    fn moving_average_acceptance_ratio(&self) -> f64;
}

/// Something that can tell how well the error bars of its bins have converged.
pub trait BinConvergenceSource {
    fn bin_convergence_summary(&self) -> Result<ConvergenceSummary>;
}

impl<T: AcceptanceRatioSource + ?Sized> AcceptanceRatioSource for &T {
    fn buffer_size(&self) -> u64 {
        (**self).buffer_size()
    }

    fn has_moving_average(&self) -> bool {
        (**self).has_moving_average()
    }

    fn moving_average_acceptance_ratio(&self) -> f64 {
        (**self).moving_average_acceptance_ratio()
    }
}

impl<T: BinConvergenceSource + ?Sized> BinConvergenceSource for &T {
    fn bin_convergence_summary(&self) -> Result<ConvergenceSummary> {
        (**self).bin_convergence_summary()
    }
}

/// Fraction of accepted moves over the last `buffer_size` iterations, thermalizing ones
/// included.
#[derive(Debug, Clone, PartialEq)]
pub struct MovingAverageAcceptanceRatio {
    buffer_size: usize,
    accept_queue: VecDeque<bool>,
    n_accepted_in_queue: usize,
}

impl Default for MovingAverageAcceptanceRatio {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BUFFER_SIZE)
    }
}

impl MovingAverageAcceptanceRatio {
    pub const DEFAULT_BUFFER_SIZE: usize = 2048;

    pub fn new(buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            buffer_size,
            accept_queue: VecDeque::with_capacity(buffer_size),
            n_accepted_in_queue: 0,
        }
    }

    pub fn record(&mut self, accepted: bool) {
        if self.accept_queue.len() == self.buffer_size {
            if let Some(true) = self.accept_queue.pop_front() {
                self.n_accepted_in_queue -= 1;
            }
        }
        self.accept_queue.push_back(accepted);
        if accepted {
            self.n_accepted_in_queue += 1;
        }
    }

    /// NaN until the first move was recorded.
    pub fn ratio(&self) -> f64 {
        if self.accept_queue.is_empty() {
            return f64::NAN;
        }
        self.n_accepted_in_queue as f64 / self.accept_queue.len() as f64
    }
}

impl AcceptanceRatioSource for MovingAverageAcceptanceRatio {
    fn buffer_size(&self) -> u64 {
        self.buffer_size as u64
    }

    fn has_moving_average(&self) -> bool {
        self.accept_queue.len() == self.buffer_size
    }

    fn moving_average_acceptance_ratio(&self) -> f64 {
        self.ratio()
    }
}

impl<P> StatsCollector<P> for MovingAverageAcceptanceRatio {
    fn init(&mut self) -> Result<()> {
        self.accept_queue.clear();
        self.n_accepted_in_queue = 0;
        Ok(())
    }

    fn raw_move(&mut self, mv: &RawMove<'_, P>, _walk: &WalkState) -> Result<()> {
        self.record(mv.accepted);
        Ok(())
    }

    fn status_line(&self) -> Option<String> {
        let ratio = self.ratio();
        let marker = if !self.has_moving_average() {
            " [filling buffer]"
        } else if !(RECOMMENDED_ACCEPTANCE_RATIO.0..=RECOMMENDED_ACCEPTANCE_RATIO.1).contains(&ratio) {
            " !! out of recommended range"
        } else {
            ""
        };
        Some(format!(
            "acceptance ratio (moving avg.) = {:.3}{}",
            ratio, marker
        ))
    }
}

/// Computes the value recorded in a histogram from a point of the walk.
pub trait ValueCalculator<P> {
    fn value(&self, pt: &P) -> f64;
}

impl<P, F> ValueCalculator<P> for F
where
    F: Fn(&P) -> f64,
{
    fn value(&self, pt: &P) -> f64 {
        self(pt)
    }
}

/// Records a histogram of a value computed at each live sample.
#[derive(Debug, Clone)]
pub struct ValueHistogram<VC> {
    histogram: Histogram,
    calc: VC,
    logger: Logger,
}

impl<VC> ValueHistogram<VC> {
    pub fn new(params: HistogramParams, calc: VC) -> Self {
        Self {
            histogram: Histogram::new(params),
            calc,
            logger: Logger::new("mini_mhrw::stats::value_histogram"),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    pub fn into_histogram(self) -> Histogram {
        self.histogram
    }

    /// Records the value at `pt`, returning the index of its bin or `None` if off chart.
    pub fn record_point<P>(&mut self, pt: &P) -> Option<usize>
    where
        VC: ValueCalculator<P>,
    {
        let value = self.calc.value(pt);
        self.logger.trace(format_args!("recording value {}", value));
        self.histogram.record(value)
    }
}

impl<P, VC: ValueCalculator<P>> StatsCollector<P> for ValueHistogram<VC> {
    fn init(&mut self) -> Result<()> {
        self.histogram.reset();
        Ok(())
    }

    fn done(&mut self) -> Result<()> {
        if self.logger.enabled(log::Level::Trace) {
            let final_hist = HistogramWithErrorBars::from(self.histogram.normalized());
            self.logger.trace(format_args!(
                "done collecting, histogram:\n{}",
                final_hist.pretty_print(100)
            ));
        }
        Ok(())
    }

    fn process_sample(&mut self, _k: u64, _n: u64, pt: &P, _val: f64) -> Result<()> {
        self.record_point(pt);
        Ok(())
    }

    fn status_line(&self) -> Option<String> {
        Some(format!(
            "Histogram: {}",
            self.histogram.short_bar(STATUS_BAR_WIDTH)
        ))
    }
}

/// Final result of a [`ValueHistogramWithBinning`] collector.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueHistogramWithBinningResult {
    /// Normalized histogram, with error bars from the last binning level.
    pub hist: HistogramWithErrorBars,
    /// Error bars at every binning level, shape `(num_bins, num_levels + 1)`.
    pub error_levels: Array2<f64>,
    pub converged_status: Array1<ConvergenceStatus>,
}

impl ValueHistogramWithBinningResult {
    pub fn convergence_summary(&self) -> ConvergenceSummary {
        ConvergenceSummary::from_statuses(self.converged_status.view())
    }

    /// One line per bin: value, error bar and convergence status.
    pub fn dump_convergence_analysis(&self) -> String {
        let mut s = String::new();
        for (k, status) in self.converged_status.iter().enumerate() {
            let _ = writeln!(
                s,
                "\tval[{:>3}] = {:>12.6} +- {:>12.6}  [{}]",
                k, self.hist.bins[k], self.hist.delta[k], status
            );
        }
        s
    }
}

/// A [`ValueHistogram`] whose bins are also fed, as indicator functions, to a
/// [`BinningAnalysis`]. The binning analysis yields error bars on the normalized histogram
/// which account for the correlations between successive samples.
#[derive(Debug, Clone)]
pub struct ValueHistogramWithBinning<VC> {
    value_histogram: ValueHistogram<VC>,
    binning: BinningAnalysis,
    indicator: Array1<f64>,
    result: Option<ValueHistogramWithBinningResult>,
    logger: Logger,
}

impl<VC> ValueHistogramWithBinning<VC> {
    pub fn new(params: HistogramParams, calc: VC, num_levels: usize) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            value_histogram: ValueHistogram::new(params, calc),
            binning: BinningAnalysis::new(params.num_bins, num_levels)?,
            indicator: Array1::zeros(params.num_bins),
            result: None,
            logger: Logger::new("mini_mhrw::stats::value_histogram_with_binning"),
        })
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.value_histogram = self.value_histogram.with_logger(logger.sub_logger("hist"));
        self.binning = self.binning.with_logger(logger.sub_logger("binning"));
        self.logger = logger;
        self
    }

    pub fn with_binning_thresholds(mut self, thresholds: ConvergenceThresholds) -> Self {
        self.binning = self.binning.with_thresholds(thresholds);
        self
    }

    pub fn histogram(&self) -> &Histogram {
        self.value_histogram.histogram()
    }

    pub fn binning_analysis(&self) -> &BinningAnalysis {
        &self.binning
    }

    /// Fraction of samples in each bin, off-chart samples included in the total.
    pub fn bin_means(&self) -> Array1<f64> {
        let hist = self.value_histogram.histogram();
        let total = hist.total_counts();
        hist.bins.mapv(|c| c as f64 / total)
    }

    fn current_convergence(&self) -> Result<(Array1<f64>, Array2<f64>, Array1<ConvergenceStatus>)> {
        let means = self.bin_means();
        let error_levels = self.binning.calc_error_levels(means.view())?;
        let status = self.binning.determine_error_convergence(error_levels.view());
        Ok((means, error_levels, status))
    }

    /// The result, available once the walk is done.
    pub fn result(&self) -> Option<&ValueHistogramWithBinningResult> {
        self.result.as_ref()
    }

    pub fn into_result(self) -> Option<ValueHistogramWithBinningResult> {
        self.result
    }
}

impl<VC> BinConvergenceSource for ValueHistogramWithBinning<VC> {
    fn bin_convergence_summary(&self) -> Result<ConvergenceSummary> {
        let (_, _, status) = self.current_convergence()?;
        Ok(ConvergenceSummary::from_statuses(status.view()))
    }
}

impl<P, VC: ValueCalculator<P>> StatsCollector<P> for ValueHistogramWithBinning<VC> {
    fn init(&mut self) -> Result<()> {
        self.result = None;
        self.binning.reset();
        StatsCollector::<P>::init(&mut self.value_histogram)
    }

    fn done(&mut self) -> Result<()> {
        let (bins, error_levels, converged_status) = self.current_convergence()?;
        let hist = self.value_histogram.histogram();
        let total = hist.total_counts();
        let last_level = self.binning.num_levels();
        let result = ValueHistogramWithBinningResult {
            hist: HistogramWithErrorBars {
                params: hist.params,
                bins,
                delta: error_levels.column(last_level).to_owned(),
                off_chart: hist.off_chart as f64 / total,
            },
            error_levels,
            converged_status,
        };
        self.logger.debug(format_args!(
            "binning analysis done: {}\n{}",
            result.convergence_summary(),
            result.dump_convergence_analysis()
        ));
        self.result = Some(result);
        Ok(())
    }

    fn process_sample(&mut self, _k: u64, _n: u64, pt: &P, _val: f64) -> Result<()> {
        let index = self.value_histogram.record_point(pt);
        // off-chart samples count as zero for every indicator
        self.indicator.fill(0.0);
        if let Some(i) = index {
            self.indicator[i] = 1.0;
        }
        self.binning.process_new_values(self.indicator.view())
    }

    fn status_line(&self) -> Option<String> {
        let bar = self.value_histogram.histogram().short_bar(STATUS_BAR_WIDTH);
        let summary = match self.bin_convergence_summary() {
            Ok(s) => s,
            Err(_) => return Some(bar),
        };
        Some(format!(
            "{}   err: (cnvg/?/fail) {}/{}/{}",
            bar, summary.n_converged, summary.n_unknown, summary.n_not_converged
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn mv(accepted: bool) -> RawMove<'static, i32> {
        RawMove {
            k: 0,
            is_thermalizing: false,
            is_live_iter: false,
            accepted,
            a: 1.0,
            new_pt: &0,
            new_val: 0.0,
            cur_pt: &0,
            cur_val: 0.0,
        }
    }

    #[test]
    fn test_moving_average_window() {
        let mut avg = MovingAverageAcceptanceRatio::new(4);
        assert!(avg.ratio().is_nan());
        let walk = WalkState::default();
        for accepted in [true, true, false] {
            avg.raw_move(&mv(accepted), &walk).unwrap();
        }
        assert!(!avg.has_moving_average());
        assert_abs_diff_eq!(avg.ratio(), 2.0 / 3.0);
        for accepted in [false, false, false] {
            avg.raw_move(&mv(accepted), &walk).unwrap();
        }
        // window now holds [false, false, false, false]
        assert!(avg.has_moving_average());
        assert_abs_diff_eq!(avg.moving_average_acceptance_ratio(), 0.0);
        avg.raw_move(&mv(true), &walk).unwrap();
        assert_abs_diff_eq!(avg.ratio(), 0.25);
        assert_eq!(AcceptanceRatioSource::buffer_size(&avg), 4);

        let line = StatsCollector::<i32>::status_line(&avg).unwrap();
        assert_eq!(line, "acceptance ratio (moving avg.) = 0.250");
        avg.raw_move(&mv(true), &walk).unwrap();
        // [false, false, true, true]
        let line = StatsCollector::<i32>::status_line(&avg).unwrap();
        assert!(line.ends_with("!! out of recommended range"));

        StatsCollector::<i32>::init(&mut avg).unwrap();
        assert!(avg.ratio().is_nan());
    }

    #[test]
    fn test_value_histogram_records_samples() {
        let mut coll = ValueHistogram::new(HistogramParams::new(0.0, 4.0, 4), |x: &i32| {
            *x as f64
        });
        for x in [0, 1, 1, 3, 7] {
            coll.process_sample(0, 0, &x, 0.0).unwrap();
        }
        assert_eq!(coll.histogram().bins, arr1(&[1, 2, 0, 1]));
        assert_eq!(coll.histogram().off_chart, 1);
        let line = StatsCollector::<i32>::status_line(&coll).unwrap();
        assert!(line.starts_with("Histogram: 0.00 |"));
        StatsCollector::<i32>::init(&mut coll).unwrap();
        assert_eq!(coll.histogram().total_counts(), 0.0);
    }

    #[test]
    fn test_value_histogram_with_binning_result() {
        let mut coll =
            ValueHistogramWithBinning::new(HistogramParams::new(0.0, 2.0, 2), |x: &f64| *x, 2)
                .unwrap();
        StatsCollector::<f64>::init(&mut coll).unwrap();
        // 3 samples out of 4 in the first bin, one off chart
        for _ in 0..16 {
            for x in [0.5, 0.5, 1.5, 9.0] {
                coll.process_sample(0, 0, &x, 0.0).unwrap();
            }
        }
        assert_eq!(coll.binning_analysis().num_flushes(), 16);
        assert_abs_diff_eq!(coll.bin_means(), arr1(&[0.5, 0.25]), epsilon = 1e-12);
        assert!(coll.result().is_none());

        StatsCollector::<f64>::done(&mut coll).unwrap();
        let result = coll.result().unwrap();
        assert_abs_diff_eq!(result.hist.bins, arr1(&[0.5, 0.25]), epsilon = 1e-12);
        assert_abs_diff_eq!(result.hist.off_chart, 0.25, epsilon = 1e-12);
        assert_eq!(result.error_levels.dim(), (2, 3));
        // the period-4 pattern averages out exactly over blocks of 4
        assert_abs_diff_eq!(result.hist.delta, arr1(&[0.0, 0.0]), epsilon = 1e-9);
        assert_eq!(result.convergence_summary().n_bins, 2);
        assert!(result.dump_convergence_analysis().contains("val[  0]"));
    }

    #[test]
    fn test_binning_collector_starts_afresh_on_init() {
        let mut coll =
            ValueHistogramWithBinning::new(HistogramParams::new(0.0, 1.0, 2), |x: &f64| *x, 1)
                .unwrap();
        StatsCollector::<f64>::init(&mut coll).unwrap();
        for x in [0.2, 0.7, 0.2, 0.2] {
            coll.process_sample(0, 0, &x, 0.0).unwrap();
        }
        StatsCollector::<f64>::done(&mut coll).unwrap();
        assert_eq!(coll.binning_analysis().num_flushes(), 2);

        StatsCollector::<f64>::init(&mut coll).unwrap();
        assert!(coll.result().is_none());
        assert_eq!(coll.binning_analysis().num_flushes(), 0);
        assert_eq!(coll.binning_analysis().num_samples(), 0);
        assert_eq!(coll.binning_analysis().bin_sum(), &arr1(&[0.0, 0.0]));
        assert_eq!(coll.histogram().total_counts(), 0.0);
    }

    #[test]
    fn test_short_walk_has_no_converged_error_bars() {
        let mut coll =
            ValueHistogramWithBinning::new(HistogramParams::new(0.0, 4.0, 4), |x: &f64| *x, 4)
                .unwrap();
        StatsCollector::<f64>::init(&mut coll).unwrap();
        for k in 0..10 {
            coll.process_sample(0, 0, &(k as f64 * 0.4), 0.0).unwrap();
        }
        StatsCollector::<f64>::done(&mut coll).unwrap();
        let result = coll.result().unwrap();
        assert!(result.hist.delta.iter().all(|d| d.is_nan()));
        let summary = result.convergence_summary();
        assert_eq!(summary.n_converged, 0);
        assert_eq!(summary.n_unknown, 4);
    }

    #[test]
    fn test_binning_status_line_reports_convergence_counts() {
        let mut coll =
            ValueHistogramWithBinning::new(HistogramParams::new(0.0, 1.0, 3), |x: &f64| *x, 4)
                .unwrap();
        coll.process_sample(0, 0, &0.5, 0.0).unwrap();
        let line = StatsCollector::<f64>::status_line(&coll).unwrap();
        // not enough samples for any error bar
        assert!(line.ends_with("err: (cnvg/?/fail) 0/3/0"), "{}", line);
    }
}
