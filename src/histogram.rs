/*!
# Histograms with Uniform Bins

[`Histogram`] counts values falling in `num_bins` equal bins over `[min, max)`; values outside
that range (or not finite) are counted as *off chart*. [`HistogramWithErrorBars`] additionally
carries one error bar per bin, and [`AveragedHistogram`] averages several histograms of identical
binning into one with error bars.

```rust
use mini_mhrw::histogram::{Histogram, HistogramParams};

let mut hist: Histogram = Histogram::new(HistogramParams::new(0.0, 1.0, 4));
assert_eq!(hist.record(0.3), Some(1));
assert_eq!(hist.record(1.0), None);
assert_eq!(hist.off_chart, 1);
assert_eq!(hist.params.bin_center_value(1), 0.375);
```
*/

use ndarray::Array1;
use num_traits::{One, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::ops::AddAssign;

use crate::error::{MhrwError, Result};

/// Range and number of bins of a histogram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistogramParams {
    pub min: f64,
    pub max: f64,
    pub num_bins: usize,
}

impl Default for HistogramParams {
    fn default() -> Self {
        Self::new(0.0, 1.0, 50)
    }
}

impl HistogramParams {
    pub fn new(min: f64, max: f64, num_bins: usize) -> Self {
        Self { min, max, num_bins }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.min.is_finite() && self.max.is_finite() && self.min < self.max) {
            return Err(MhrwError::config(format!(
                "invalid histogram range [{}, {})",
                self.min, self.max
            )));
        }
        if self.num_bins == 0 {
            return Err(MhrwError::config("histogram needs at least one bin"));
        }
        Ok(())
    }

    /// Whether `value` is finite and lies in `[min, max)`.
    pub fn is_within_bounds(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value < self.max
    }

    /// Index of the bin holding `value`, or `None` if it is off chart.
    pub fn bin_index(&self, value: f64) -> Option<usize> {
        if !self.is_within_bounds(value) {
            return None;
        }
        let index = ((value - self.min) / (self.max - self.min) * self.num_bins as f64) as usize;
        // guard against rounding just below `max`
        Some(index.min(self.num_bins - 1))
    }

    pub fn bin_lower_value(&self, index: usize) -> f64 {
        self.min + index as f64 * (self.max - self.min) / self.num_bins as f64
    }

    pub fn bin_center_value(&self, index: usize) -> f64 {
        self.min + (index as f64 + 0.5) * (self.max - self.min) / self.num_bins as f64
    }

    pub fn bin_upper_value(&self, index: usize) -> f64 {
        self.min + (index + 1) as f64 * (self.max - self.min) / self.num_bins as f64
    }

    /// Width of a bin.
    pub fn bin_resolution(&self) -> f64 {
        (self.max - self.min) / self.num_bins as f64
    }

    pub fn values_lower(&self) -> Array1<f64> {
        (0..self.num_bins).map(|i| self.bin_lower_value(i)).collect()
    }

    pub fn values_center(&self) -> Array1<f64> {
        (0..self.num_bins).map(|i| self.bin_center_value(i)).collect()
    }
}

/// A histogram of counts of type `C`.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram<C = u64> {
    pub params: HistogramParams,
    pub bins: Array1<C>,
    pub off_chart: C,
}

impl<C> Histogram<C>
where
    C: Copy + Zero + One + AddAssign + ToPrimitive,
{
    pub fn new(params: HistogramParams) -> Self {
        Self {
            params,
            bins: Array1::from_elem(params.num_bins, C::zero()),
            off_chart: C::zero(),
        }
    }

    pub fn reset(&mut self) {
        self.bins.fill(C::zero());
        self.off_chart = C::zero();
    }

    pub fn num_bins(&self) -> usize {
        self.bins.len()
    }

    pub fn count(&self, index: usize) -> C {
        self.bins[index]
    }

    /// Records `value`, returning the index of the bin it fell into.
    pub fn record(&mut self, value: f64) -> Option<usize> {
        self.record_weighted(value, C::one())
    }

    pub fn record_weighted(&mut self, value: f64, weight: C) -> Option<usize> {
        match self.params.bin_index(value) {
            Some(index) => {
                self.bins[index] += weight;
                Some(index)
            }
            None => {
                self.off_chart += weight;
                None
            }
        }
    }

    /// Sum of all bins plus the off-chart counts.
    pub fn total_counts(&self) -> f64 {
        self.bins.iter().fold(0.0, |acc, c| acc + as_f64(*c)) + as_f64(self.off_chart)
    }

    /// This histogram divided by its total counts (including off-chart counts).
    pub fn normalized(&self) -> Histogram<f64> {
        let total = self.total_counts();
        Histogram {
            params: self.params,
            bins: self.bins.mapv(|c| as_f64(c) / total),
            off_chart: as_f64(self.off_chart) / total,
        }
    }

    /// A one-line rendering of the bin heights, `width` characters between the bars.
    pub fn short_bar(&self, width: usize) -> String {
        let values: Vec<f64> = self.bins.iter().map(|c| as_f64(*c)).collect();
        render_short_bar(&self.params, &values, as_f64(self.off_chart), width)
    }
}

fn as_f64<C: ToPrimitive>(c: C) -> f64 {
    c.to_f64().unwrap_or(f64::NAN)
}

const BAR_LEVELS: &[char] = &[' ', '.', ':', '-', '=', '+', '*', '#', '%', '@'];

fn render_short_bar(params: &HistogramParams, values: &[f64], off_chart: f64, width: usize) -> String {
    let width = width.max(1);
    let n = values.len();
    let max = values.iter().copied().fold(0.0f64, f64::max);
    let mut bar = String::with_capacity(width + 32);
    let _ = write!(bar, "{:.2} |", params.min);
    for col in 0..width {
        // average the bins falling in this column
        let lo = col * n / width;
        let hi = ((col + 1) * n / width).max(lo + 1).min(n);
        let v = if lo < n {
            values[lo..hi].iter().sum::<f64>() / (hi - lo) as f64
        } else {
            0.0
        };
        let level = if max > 0.0 {
            ((v / max) * (BAR_LEVELS.len() - 1) as f64).round() as usize
        } else {
            0
        };
        bar.push(BAR_LEVELS[level.min(BAR_LEVELS.len() - 1)]);
    }
    let _ = write!(bar, "| {:.2}", params.max);
    if off_chart > 0.0 {
        let _ = write!(bar, "  [+off chart: {}]", off_chart);
    }
    bar
}

/// A histogram with real-valued bins and one error bar per bin.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramWithErrorBars {
    pub params: HistogramParams,
    pub bins: Array1<f64>,
    pub delta: Array1<f64>,
    pub off_chart: f64,
}

impl HistogramWithErrorBars {
    pub fn new(params: HistogramParams) -> Self {
        Self {
            params,
            bins: Array1::zeros(params.num_bins),
            delta: Array1::zeros(params.num_bins),
            off_chart: 0.0,
        }
    }

    pub fn num_bins(&self) -> usize {
        self.bins.len()
    }

    pub fn count(&self, index: usize) -> f64 {
        self.bins[index]
    }

    pub fn error_bar(&self, index: usize) -> f64 {
        self.delta[index]
    }

    pub fn short_bar(&self, width: usize) -> String {
        render_short_bar(
            &self.params,
            self.bins.as_slice().unwrap_or(&[]),
            self.off_chart,
            width,
        )
    }

    /// A multi-line table: bin center, value, error bar and a bar proportional to the value.
    pub fn pretty_print(&self, max_width: usize) -> String {
        let max = self.bins.iter().copied().fold(0.0f64, f64::max);
        let bar_width = max_width.saturating_sub(40).max(10);
        let mut s = String::new();
        for i in 0..self.num_bins() {
            let len = if max > 0.0 {
                (self.bins[i] / max * bar_width as f64).round() as usize
            } else {
                0
            };
            let _ = writeln!(
                s,
                "{:>10.4} | {:>10.4e} +- {:>9.2e} {}",
                self.params.bin_center_value(i),
                self.bins[i],
                self.delta[i],
                "#".repeat(len)
            );
        }
        if self.off_chart > 0.0 {
            let _ = writeln!(s, "   off chart: {:.4e}", self.off_chart);
        }
        s
    }
}

impl From<Histogram<f64>> for HistogramWithErrorBars {
    fn from(hist: Histogram<f64>) -> Self {
        let n = hist.bins.len();
        Self {
            params: hist.params,
            bins: hist.bins,
            delta: Array1::zeros(n),
            off_chart: hist.off_chart,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AverageMode {
    /// Bins are averaged; the spread across histograms gives the error bars.
    Simple,
    /// Error bars of the added histograms are combined in quadrature.
    ErrorBars,
}

/**
Averages histograms of identical binning.

Histograms without error bars are added with [`AveragedHistogram::add_histogram`]: the final
error bar of a bin is the standard deviation of the mean across histograms,
`sqrt((<x^2> - <x>^2) / (N - 1))`. Histograms with error bars are added with
[`AveragedHistogram::add_histogram_with_error_bars`]: their error bars are combined as
`sqrt(sum delta_i^2) / N`. The two kinds cannot be mixed.

# Examples

```rust
use mini_mhrw::histogram::{AveragedHistogram, Histogram, HistogramParams};

let params = HistogramParams::new(0.0, 2.0, 2);
let mut avg = AveragedHistogram::new(params);
for counts in [[1.0, 3.0], [3.0, 1.0]] {
    let mut h = Histogram::<f64>::new(params);
    h.bins.assign(&ndarray::arr1(&counts));
    avg.add_histogram(&h)?;
}
let final_hist = avg.finalize()?;
assert_eq!(final_hist.bins[0], 2.0);
assert_eq!(final_hist.delta[0], 1.0);
# Ok::<(), mini_mhrw::MhrwError>(())
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct AveragedHistogram {
    params: HistogramParams,
    sum: Array1<f64>,
    sum_delta: Array1<f64>,
    off_chart: f64,
    num_histograms: usize,
    mode: Option<AverageMode>,
}

impl AveragedHistogram {
    pub fn new(params: HistogramParams) -> Self {
        Self {
            params,
            sum: Array1::zeros(params.num_bins),
            sum_delta: Array1::zeros(params.num_bins),
            off_chart: 0.0,
            num_histograms: 0,
            mode: None,
        }
    }

    pub fn num_histograms(&self) -> usize {
        self.num_histograms
    }

    fn check(&mut self, params: &HistogramParams, mode: AverageMode) -> Result<()> {
        if *params != self.params {
            return Err(MhrwError::StatsCollector(format!(
                "cannot average histograms with different binning: {:?} vs {:?}",
                params, self.params
            )));
        }
        match self.mode {
            Some(m) if m != mode => Err(MhrwError::StatsCollector(
                "cannot average histograms with and without error bars together".to_string(),
            )),
            _ => {
                self.mode = Some(mode);
                Ok(())
            }
        }
    }

    pub fn add_histogram<C>(&mut self, hist: &Histogram<C>) -> Result<()>
    where
        C: Copy + Zero + One + AddAssign + ToPrimitive,
    {
        self.check(&hist.params, AverageMode::Simple)?;
        for (k, c) in hist.bins.iter().enumerate() {
            let v = as_f64(*c);
            self.sum[k] += v;
            self.sum_delta[k] += v * v;
        }
        self.off_chart += as_f64(hist.off_chart);
        self.num_histograms += 1;
        Ok(())
    }

    pub fn add_histogram_with_error_bars(&mut self, hist: &HistogramWithErrorBars) -> Result<()> {
        self.check(&hist.params, AverageMode::ErrorBars)?;
        self.sum += &hist.bins;
        self.sum_delta += &hist.delta.mapv(|d| d * d);
        self.off_chart += hist.off_chart;
        self.num_histograms += 1;
        Ok(())
    }

    /// The averaged histogram. Fails if no histogram was added.
    pub fn finalize(self) -> Result<HistogramWithErrorBars> {
        if self.num_histograms == 0 {
            return Err(MhrwError::StatsCollector(
                "no histograms to average".to_string(),
            ));
        }
        let n = self.num_histograms as f64;
        let bins = &self.sum / n;
        let delta = match self.mode {
            Some(AverageMode::ErrorBars) => self.sum_delta.mapv(f64::sqrt) / n,
            // a single histogram has no spread to speak of: NaN
            _ => {
                let mean_sq = &self.sum_delta / n;
                (mean_sq - &bins * &bins).mapv(|v| (v.max(0.0) / (n - 1.0)).sqrt())
            }
        };
        Ok(HistogramWithErrorBars {
            params: self.params,
            bins,
            delta,
            off_chart: self.off_chart / n,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    #[test]
    fn test_bin_geometry() {
        let p = HistogramParams::new(0.0, 10.0, 10);
        for v in 0..10 {
            assert_eq!(p.bin_index(v as f64), Some(v));
        }
        assert_eq!(p.bin_index(10.0), None);
        assert_eq!(p.bin_index(-1e-9), None);
        assert_eq!(p.bin_index(f64::NAN), None);
        assert_eq!(p.bin_index(f64::INFINITY), None);
        assert_abs_diff_eq!(p.bin_resolution(), 1.0);
        assert_abs_diff_eq!(p.bin_lower_value(3), 3.0);
        assert_abs_diff_eq!(p.bin_center_value(3), 3.5);
        assert_abs_diff_eq!(p.bin_upper_value(3), 4.0);
        assert_eq!(p.values_center().len(), 10);
    }

    #[test]
    fn test_validate() {
        assert!(HistogramParams::new(0.0, 1.0, 3).validate().is_ok());
        assert!(HistogramParams::new(1.0, 1.0, 3).validate().is_err());
        assert!(HistogramParams::new(0.0, f64::INFINITY, 3).validate().is_err());
        assert!(HistogramParams::new(0.0, 1.0, 0).validate().is_err());
    }

    #[test]
    fn test_record_and_normalize() {
        let mut h: Histogram = Histogram::new(HistogramParams::new(0.0, 1.0, 2));
        h.record(0.1);
        h.record(0.2);
        h.record(0.7);
        h.record(3.0);
        assert_eq!(h.bins, arr1(&[2, 1]));
        assert_eq!(h.off_chart, 1);
        assert_abs_diff_eq!(h.total_counts(), 4.0);
        let n = h.normalized();
        assert_abs_diff_eq!(n.bins[0], 0.5);
        assert_abs_diff_eq!(n.off_chart, 0.25);
        h.reset();
        assert_abs_diff_eq!(h.total_counts(), 0.0);
    }

    #[test]
    fn test_short_bar() {
        let mut h: Histogram = Histogram::new(HistogramParams::new(0.0, 1.0, 4));
        for v in [0.1, 0.1, 0.9] {
            h.record(v);
        }
        let bar = h.short_bar(4);
        assert_eq!(bar, "0.00 |@  +| 1.00");
        h.record(2.0);
        assert!(h.short_bar(4).ends_with("[+off chart: 1]"));
    }

    #[test]
    fn test_average_with_error_bars() {
        let params = HistogramParams::new(0.0, 1.0, 2);
        let mut avg = AveragedHistogram::new(params);
        for (bins, delta) in [([0.4, 0.6], [0.3, 0.0]), ([0.6, 0.4], [0.4, 0.0])] {
            let h = HistogramWithErrorBars {
                params,
                bins: arr1(&bins),
                delta: arr1(&delta),
                off_chart: 0.1,
            };
            avg.add_histogram_with_error_bars(&h).unwrap();
        }
        let f = avg.finalize().unwrap();
        assert_abs_diff_eq!(f.bins, arr1(&[0.5, 0.5]), epsilon = 1e-12);
        // sqrt(0.3^2 + 0.4^2) / 2
        assert_abs_diff_eq!(f.delta[0], 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(f.delta[1], 0.0);
        assert_abs_diff_eq!(f.off_chart, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_average_rejects_mixed_inputs() {
        let params = HistogramParams::new(0.0, 1.0, 2);
        let mut avg = AveragedHistogram::new(params);
        avg.add_histogram(&Histogram::<u64>::new(params)).unwrap();
        assert!(avg
            .add_histogram_with_error_bars(&HistogramWithErrorBars::new(params))
            .is_err());
        assert!(avg
            .add_histogram(&Histogram::<u64>::new(HistogramParams::new(0.0, 2.0, 2)))
            .is_err());
        assert!(AveragedHistogram::new(params).finalize().is_err());
    }

    #[test]
    fn test_simple_average_std_of_mean() {
        let params = HistogramParams::new(0.0, 1.0, 1);
        let mut avg = AveragedHistogram::new(params);
        for c in [1.0, 2.0, 3.0, 6.0] {
            let mut h = Histogram::<f64>::new(params);
            h.bins[0] = c;
            avg.add_histogram(&h).unwrap();
        }
        let f = avg.finalize().unwrap();
        assert_abs_diff_eq!(f.bins[0], 3.0);
        // population variance 3.5, divided by N-1 = 3
        assert_abs_diff_eq!(f.delta[0], (3.5f64 / 3.0).sqrt(), epsilon = 1e-12);
    }
}
