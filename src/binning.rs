/*!
# Binning Analysis

Estimates error bars of means computed from correlated samples. Samples are grouped in
consecutive blocks of size `2^level` for every `level` in `0..=num_levels`; the naive standard
error of the block averages grows with the level until the blocks become effectively
independent, at which point it levels off. The error at the last level is then a reliable error
bar, and comparing it against the previous levels tells whether it has converged.

Several functions are tracked simultaneously: each sample is a vector of `num_track_values`
values.

```rust
use mini_mhrw::binning::{BinningAnalysis, ConvergenceStatus};
use ndarray::arr1;

let mut binning = BinningAnalysis::new(1, 3)?;
for k in 0..64 {
    binning.process_new_values(arr1(&[(k % 2) as f64]).view())?;
}
assert_eq!(binning.num_flushes(), 8);
let errors = binning.calc_error_levels(binning.bin_means().view())?;
// alternating values cancel exactly once averaged in pairs
assert_eq!(errors[[0, 3]], 0.0);
let status = binning.determine_error_convergence(errors.view());
assert_eq!(status[0], ConvergenceStatus::Converged);
# Ok::<(), mini_mhrw::MhrwError>(())
```
*/

use ndarray::prelude::*;
use ndarray::Zip;
use std::fmt;

use crate::error::{MhrwError, Result};
use crate::logging::Logger;

/// Convergence status of the error bar of one tracked value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvergenceStatus {
    Unknown,
    Converged,
    NotConverged,
}

impl fmt::Display for ConvergenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConvergenceStatus::Unknown => "UNKNOWN",
            ConvergenceStatus::Converged => "CONVERGED",
            ConvergenceStatus::NotConverged => "NOT CONVERGED",
        })
    }
}

/// Thresholds of the error convergence test.
///
/// Let `e_L` be the error at the last level. Over the `range - 1` levels preceding it, a value
/// is not converged as soon as one level has an error below `not_converged_ratio * e_L`, and is
/// only unknown if an error is below `unknown_ratio * e_L`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ConvergenceThresholds {
    pub not_converged_ratio: f64,
    pub unknown_ratio: f64,
    pub range: usize,
}

impl Default for ConvergenceThresholds {
    fn default() -> Self {
        Self {
            not_converged_ratio: 0.824,
            unknown_ratio: 0.9,
            range: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BinningAnalysis {
    num_track_values: usize,
    num_levels: usize,
    thresholds: ConvergenceThresholds,
    /// Raw samples of the current block, one column per sample. Reused in place while flushing.
    samples: Array2<f64>,
    n_samples: u64,
    n_flushes: u64,
    bin_sum: Array1<f64>,
    /// Sums of squares, one column per binning level.
    bin_sumsq: Array2<f64>,
    logger: Logger,
}

impl BinningAnalysis {
    /// Largest supported number of levels; the sample buffer holds `2^num_levels` samples.
    pub const MAX_LEVELS: usize = 30;

    pub fn new(num_track_values: usize, num_levels: usize) -> Result<Self> {
        if num_track_values == 0 {
            return Err(MhrwError::config(
                "binning analysis needs at least one tracked value",
            ));
        }
        if num_levels == 0 || num_levels > Self::MAX_LEVELS {
            return Err(MhrwError::config(format!(
                "binning analysis needs between 1 and {} levels, got {}",
                Self::MAX_LEVELS,
                num_levels
            )));
        }
        let samples_size = 1usize << num_levels;
        Ok(Self {
            num_track_values,
            num_levels,
            thresholds: ConvergenceThresholds::default(),
            samples: Array2::zeros((num_track_values, samples_size)),
            n_samples: 0,
            n_flushes: 0,
            bin_sum: Array1::zeros(num_track_values),
            bin_sumsq: Array2::zeros((num_track_values, num_levels + 1)),
            logger: Logger::new("mini_mhrw::binning"),
        })
    }

    pub fn with_thresholds(mut self, thresholds: ConvergenceThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn num_track_values(&self) -> usize {
        self.num_track_values
    }

    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    pub fn samples_size(&self) -> usize {
        1 << self.num_levels
    }

    pub fn num_samples(&self) -> u64 {
        self.n_samples
    }

    /// Number of completed blocks of `2^num_levels` samples.
    pub fn num_flushes(&self) -> u64 {
        self.n_flushes
    }

    pub fn reset(&mut self) {
        self.n_samples = 0;
        self.n_flushes = 0;
        self.bin_sum.fill(0.0);
        self.bin_sumsq.fill(0.0);
    }

    /// Adds one sample. Once `2^num_levels` samples are buffered, they are folded into the
    /// per-level sums of squares.
    pub fn process_new_values(&mut self, values: ArrayView1<'_, f64>) -> Result<()> {
        if values.len() != self.num_track_values {
            return Err(MhrwError::StatsCollector(format!(
                "binning analysis expects {} values per sample, got {}",
                self.num_track_values,
                values.len()
            )));
        }
        let samples_size = self.samples_size();
        let ninbin = (self.n_samples % samples_size as u64) as usize;
        self.n_samples += 1;

        self.samples.column_mut(ninbin).assign(&values);
        self.bin_sum += &values;

        if ninbin == samples_size - 1 {
            self.flush();
        }
        Ok(())
    }

    /// Shorthand for a single tracked value.
    pub fn process_new_value(&mut self, value: f64) -> Result<()> {
        self.process_new_values(aview1(&[value]))
    }

    fn flush(&mut self) {
        self.logger.trace(format_args!(
            "n_samples is now {}; flushing bins",
            self.n_samples
        ));
        for level in 0..=self.num_levels {
            let binned_size = 1usize << (self.num_levels - level);
            for ks in 0..binned_size {
                let col = self.samples.column(ks).to_owned();
                let mut sumsq = self.bin_sumsq.column_mut(level);
                sumsq += &(&col * &col);
                if ks % 2 == 0 && binned_size > 1 {
                    let pair = (&col + &self.samples.column(ks + 1)) * 0.5;
                    self.samples.column_mut(ks / 2).assign(&pair);
                }
            }
        }
        self.n_flushes += 1;
    }

    /// Mean of every tracked value over all samples seen so far.
    pub fn bin_means(&self) -> Array1<f64> {
        &self.bin_sum / self.n_samples as f64
    }

    pub fn bin_sum(&self) -> &Array1<f64> {
        &self.bin_sum
    }

    pub fn bin_sumsq(&self) -> &Array2<f64> {
        &self.bin_sumsq
    }

    /// Number of block averages that went into level `level`.
    fn num_blocks(&self, level: usize) -> f64 {
        self.n_flushes as f64 * (1u64 << (self.num_levels - level)) as f64
    }

    /// Mean of the squared block averages, shape `(num_track_values, num_levels + 1)`.
    pub fn bin_sqmeans(&self) -> Array2<f64> {
        let mut sqmeans = self.bin_sumsq.clone();
        for (level, mut col) in sqmeans.columns_mut().into_iter().enumerate() {
            col /= self.num_blocks(level);
        }
        sqmeans
    }

    /// Error bars of the `means` at each binning level, shape
    /// `(num_track_values, num_levels + 1)`. Level 0 is the naive standard error.
    ///
    /// Before the first flush all errors are NaN, and so is the error of any level which holds
    /// a single block.
    pub fn calc_error_levels(&self, means: ArrayView1<'_, f64>) -> Result<Array2<f64>> {
        self.check_means(&means)?;
        let mut errors = self.bin_sqmeans();
        for (level, mut col) in errors.columns_mut().into_iter().enumerate() {
            let num_blocks = self.num_blocks(level);
            col.zip_mut_with(&means, |e, m| *e = standard_error(*e, *m, num_blocks));
        }
        Ok(errors)
    }

    /// Error bars from the last binning level only.
    pub fn calc_error_last_level(&self, means: ArrayView1<'_, f64>) -> Result<Array1<f64>> {
        self.check_means(&means)?;
        let n = self.n_flushes as f64;
        let last = self.bin_sumsq.column(self.num_levels);
        Ok(Zip::from(&last)
            .and(&means)
            .map_collect(|s, m| standard_error(s / n, *m, n)))
    }

    fn check_means(&self, means: &ArrayView1<'_, f64>) -> Result<()> {
        if means.len() != self.num_track_values {
            return Err(MhrwError::StatsCollector(format!(
                "expected {} means, got {}",
                self.num_track_values,
                means.len()
            )));
        }
        Ok(())
    }

    /// Convergence status of each tracked value, given the output of
    /// [`BinningAnalysis::calc_error_levels`].
    ///
    /// Values whose error bars are not finite (e.g. before enough samples were flushed) are
    /// reported as [`ConvergenceStatus::Unknown`].
    pub fn determine_error_convergence(
        &self,
        error_levels: ArrayView2<'_, f64>,
    ) -> Array1<ConvergenceStatus> {
        let ConvergenceThresholds {
            not_converged_ratio,
            unknown_ratio,
            range,
        } = self.thresholds;
        let n_values = error_levels.nrows();
        let last_level = error_levels.ncols().saturating_sub(1);

        if last_level + 1 < range || range == 0 {
            return Array1::from_elem(n_values, ConvergenceStatus::Unknown);
        }

        let mut status = Array1::from_elem(n_values, ConvergenceStatus::Converged);
        let errors = error_levels.column(last_level);
        for level in (last_level + 1 - range)..last_level {
            let this_level = error_levels.column(level);
            for i in 0..n_values {
                let (e, e_last) = (this_level[i], errors[i]);
                if e >= e_last && status[i] != ConvergenceStatus::NotConverged {
                    status[i] = ConvergenceStatus::Converged;
                } else if e < not_converged_ratio * e_last {
                    status[i] = ConvergenceStatus::NotConverged;
                } else if e < unknown_ratio * e_last && status[i] != ConvergenceStatus::NotConverged
                {
                    status[i] = ConvergenceStatus::Unknown;
                }
            }
        }
        for i in 0..n_values {
            let all_finite = error_levels.row(i).iter().all(|e| e.is_finite());
            if !all_finite {
                status[i] = ConvergenceStatus::Unknown;
            }
        }
        self.logger.trace(format_args!(
            "error convergence: {}",
            ConvergenceSummary::from_statuses(status.view())
        ));
        status
    }
}

/// Standard error of a mean over `num_blocks` blocks whose squares average to `sqmean`.
/// NaN unless there are at least two blocks.
fn standard_error(sqmean: f64, mean: f64, num_blocks: f64) -> f64 {
    let variance = sqmean - mean * mean;
    if num_blocks < 2.0 || variance.is_nan() {
        return f64::NAN;
    }
    // rounding may leave a tiny negative variance
    (variance.max(0.0) / (num_blocks - 1.0)).sqrt()
}

/// Counts of convergence statuses over a set of tracked values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvergenceSummary {
    pub n_bins: usize,
    pub n_converged: usize,
    pub n_unknown: usize,
    /// Unknown values whose neighbours are all converged.
    pub n_unknown_isolated: usize,
    pub n_not_converged: usize,
}

impl ConvergenceSummary {
    pub fn from_statuses(statuses: ArrayView1<'_, ConvergenceStatus>) -> Self {
        let count = |status: ConvergenceStatus| statuses.iter().filter(|s| **s == status).count();
        let n = statuses.len();
        let converged = |i: usize| statuses[i] == ConvergenceStatus::Converged;
        let n_unknown_isolated = (0..n)
            .filter(|&i| {
                statuses[i] == ConvergenceStatus::Unknown
                    && (i == 0 || converged(i - 1))
                    && (i + 1 == n || converged(i + 1))
            })
            .count();
        Self {
            n_bins: n,
            n_converged: count(ConvergenceStatus::Converged),
            n_unknown: count(ConvergenceStatus::Unknown),
            n_unknown_isolated,
            n_not_converged: count(ConvergenceStatus::NotConverged),
        }
    }

    pub fn all_converged(&self) -> bool {
        self.n_converged == self.n_bins
    }

    /// Spelled-out form of the summary, for reports.
    pub fn describe(&self) -> String {
        format!(
            "Total {} values: {} converged / {} maybe ({} isolated) / {} not converged",
            self.n_bins,
            self.n_converged,
            self.n_unknown,
            self.n_unknown_isolated,
            self.n_not_converged
        )
    }
}

/// Compact form `n_bins/converged/unknown(isolated)/not_converged`.
impl fmt::Display for ConvergenceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}({})/{}",
            self.n_bins,
            self.n_converged,
            self.n_unknown,
            self.n_unknown_isolated,
            self.n_not_converged
        )
    }
}
