/*!
# Run Configuration

A [`RunConfig`] describes a complete value-histogram run: walk parameters, how many walks to run
and where, the histogram, and the settings of both controllers and of the binning analysis.
It is read from TOML. Every section and every key is optional.

```toml
[walk]
step_size = 0.1
n_sweep = 10
n_therm = 256
n_run = 4096

[run]
n_repeats = 8
base_seed = 0
num_threads = 0              # zero: one thread per core
backend = "threads"          # "sequential", "threads" or "rayon"
periodic_status_report_ms = 2000
error_policy = "abort"       # or "isolate"

[histogram]
min = 0.0
max = 1.0
num_bins = 50
binning_num_levels = 8

[step_size_control]
enabled = true
desired_accept_ratio_min = 0.22
desired_accept_ratio_max = 0.33

[convergence_control]
enabled = true
check_frequency_sweeps = 1024

[binning]
not_converged_ratio = 0.824
unknown_ratio = 0.9
```

```rust
use mini_mhrw::config::RunConfig;

let config = RunConfig::from_toml_str("[walk]\nn_run = 100\n")?;
assert_eq!(config.mhrw_params().n_run, 100);
assert_eq!(config.mhrw_params().n_sweep, 10);
# Ok::<(), mini_mhrw::MhrwError>(())
```
*/

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::binning::ConvergenceThresholds;
use crate::convergence::ConvergenceControlParams;
use crate::core::{MHRWParams, StepSize, Walker};
use crate::dispatch::{AnyBackend, BackendKind, TaskErrorPolicy};
use crate::error::{MhrwError, Result};
use crate::histogram::HistogramParams;
use crate::stats::MovingAverageAcceptanceRatio;
use crate::step_size::StepSizeControlParams;
use crate::valuehist::{ValueHistogramTasksCData, WalkerFactory};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub walk: WalkConfig,
    pub run: RunSection,
    pub histogram: HistogramConfig,
    pub step_size_control: StepSizeControlConfig,
    pub convergence_control: ConvergenceControlConfig,
    pub binning: ConvergenceThresholds,
}

/// The `[walk]` section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkConfig {
    pub step_size: f64,
    pub n_sweep: u64,
    pub n_therm: u64,
    pub n_run: u64,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            step_size: 0.1,
            n_sweep: 10,
            n_therm: 256,
            n_run: 4096,
        }
    }
}

/// The `[run]` section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// Number of independent walks.
    pub n_repeats: usize,
    pub base_seed: u64,
    pub num_threads: usize,
    pub backend: BackendKind,
    /// Absent: no periodic status reports.
    pub periodic_status_report_ms: Option<u64>,
    pub error_policy: TaskErrorPolicy,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            n_repeats: 8,
            base_seed: 0,
            num_threads: 0,
            backend: BackendKind::default(),
            periodic_status_report_ms: None,
            error_policy: TaskErrorPolicy::default(),
        }
    }
}

/// The `[histogram]` section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramConfig {
    pub min: f64,
    pub max: f64,
    pub num_bins: usize,
    pub binning_num_levels: usize,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        let params = HistogramParams::default();
        Self {
            min: params.min,
            max: params.max,
            num_bins: params.num_bins,
            binning_num_levels: 8,
        }
    }
}

/// The `[step_size_control]` section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepSizeControlConfig {
    pub enabled: bool,
    #[serde(flatten)]
    pub params: StepSizeControlParams,
    pub moving_average_buffer_size: usize,
}

impl Default for StepSizeControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            params: StepSizeControlParams::default(),
            moving_average_buffer_size: MovingAverageAcceptanceRatio::DEFAULT_BUFFER_SIZE,
        }
    }
}

/// The `[convergence_control]` section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceControlConfig {
    pub enabled: bool,
    #[serde(flatten)]
    pub params: ConvergenceControlParams,
}

impl Default for ConvergenceControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            params: ConvergenceControlParams::default(),
        }
    }
}

impl RunConfig {
    /// Parses and validates a configuration.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: RunConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        let step = self.walk.step_size;
        if !(step.is_finite() && step > 0.0) {
            return Err(MhrwError::config(format!(
                "walk.step_size must be positive, got {step}"
            )));
        }
        self.mhrw_params().validate()?;

        if self.run.n_repeats == 0 {
            return Err(MhrwError::config("run.n_repeats must be positive"));
        }

        self.histogram_params().validate()?;
        if self.histogram.binning_num_levels == 0 {
            return Err(MhrwError::config(
                "histogram.binning_num_levels must be positive",
            ));
        }

        let ssc = &self.step_size_control;
        if ssc.enabled {
            let p = &ssc.params;
            let bounds = [
                p.acceptable_accept_ratio_min,
                p.desired_accept_ratio_min,
                p.desired_accept_ratio_max,
                p.acceptable_accept_ratio_max,
            ];
            if bounds.iter().any(|b| !(0.0..=1.0).contains(b))
                || bounds.windows(2).any(|w| w[0] > w[1])
            {
                return Err(MhrwError::config(format!(
                    "step_size_control needs 0 <= acceptable_min <= desired_min <= desired_max \
                     <= acceptable_max <= 1, got {bounds:?}"
                )));
            }
        }
        if ssc.moving_average_buffer_size == 0 {
            return Err(MhrwError::config(
                "step_size_control.moving_average_buffer_size must be positive",
            ));
        }

        let b = &self.binning;
        if !(b.not_converged_ratio.is_finite() && b.unknown_ratio.is_finite()) || b.range == 0 {
            return Err(MhrwError::config(format!(
                "invalid binning convergence thresholds {b:?}"
            )));
        }
        Ok(())
    }

    pub fn mhrw_params(&self) -> MHRWParams<StepSize> {
        let w = &self.walk;
        MHRWParams::new(w.step_size, w.n_sweep, w.n_therm, w.n_run)
    }

    pub fn histogram_params(&self) -> HistogramParams {
        let h = &self.histogram;
        HistogramParams::new(h.min, h.max, h.num_bins)
    }

    /// `None` when step-size control is disabled.
    pub fn step_size_control_params(&self) -> Option<StepSizeControlParams> {
        self.step_size_control
            .enabled
            .then_some(self.step_size_control.params)
    }

    /// A disabled convergence control never checks, i.e. it has a zero check frequency.
    pub fn convergence_control_params(&self) -> ConvergenceControlParams {
        let mut params = self.convergence_control.params;
        if !self.convergence_control.enabled {
            params.check_frequency_sweeps = 0;
        }
        params
    }

    pub fn periodic_status_report(&self) -> Option<Duration> {
        self.run.periodic_status_report_ms.map(Duration::from_millis)
    }

    pub fn build_backend(&self) -> Result<AnyBackend> {
        self.run.backend.build(self.run.num_threads)
    }

    /// Shared task data for value-histogram walks following this configuration.
    pub fn value_histogram_cdata<WF, VC>(
        &self,
        walker_factory: WF,
        value_calculator: VC,
    ) -> Result<ValueHistogramTasksCData<WF, VC>>
    where
        WF: WalkerFactory,
        WF::Walker: Walker<Params = StepSize>,
    {
        Ok(ValueHistogramTasksCData::new(
            walker_factory,
            value_calculator,
            self.histogram_params(),
            self.histogram.binning_num_levels,
            self.mhrw_params(),
        )?
        .with_base_seed(self.run.base_seed)
        .with_step_size_control(self.step_size_control_params())
        .with_convergence_control(self.convergence_control_params())
        .with_moving_average_buffer_size(self.step_size_control.moving_average_buffer_size)
        .with_binning_thresholds(self.binning))
    }
}
