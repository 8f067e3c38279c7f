/*!
# Reference Walkers

Ready-made random walks, useful for demos and for checking the machinery against known
distributions.

[`IsotropicGaussianWalker`] samples an isotropic Gaussian `N(mean, sigma^2 I)` in any number of
dimensions with Gaussian proposals of standard deviation `step_size`. With zero mean and unit
`sigma` in two dimensions, the [`DistanceToOrigin`] of the samples follows a Rayleigh
distribution, `P(a <= r < b) = exp(-a^2/2) - exp(-b^2/2)`.

```rust
use mini_mhrw::core::{MHRWParams, NoStats, StepSize};
use mini_mhrw::controller::NoController;
use mini_mhrw::metropolis_hastings::MHRandomWalk;
use mini_mhrw::walkers::IsotropicGaussianWalker;
use rand::rngs::SmallRng;
use rand::SeedableRng;

let mut walker = IsotropicGaussianWalker::standard(2);
let mut rng = SmallRng::seed_from_u64(42);
let (mut stats, mut ctrl) = (NoStats, NoController);
let mut rw = MHRandomWalk::new(
    MHRWParams::<StepSize>::new(1.0, 5, 20, 100),
    &mut walker,
    &mut stats,
    &mut ctrl,
    &mut rng,
);
rw.run()?;
assert!(rw.acceptance_ratio() > 0.0);
# Ok::<(), mini_mhrw::MhrwError>(())
```
*/

use ndarray::Array1;
use rand::RngCore;
use rand_distr::{Distribution, Normal, StandardNormal};

use crate::core::{FnSyntax, StepSize, Walker};
use crate::error::{MhrwError, Result};
use crate::stats::ValueCalculator;

/**
Random walk over `R^d` with target density proportional to `exp(-|x - mean|^2 / (2 sigma^2))`.

The start point is drawn from the target itself, unless one is given with
[`IsotropicGaussianWalker::with_start_point`].
*/
#[derive(Debug, Clone)]
pub struct IsotropicGaussianWalker {
    mean: Array1<f64>,
    sigma: f64,
    start_point: Option<Array1<f64>>,
}

impl IsotropicGaussianWalker {
    pub fn new(mean: Array1<f64>, sigma: f64) -> Result<Self> {
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(MhrwError::Walker(format!(
                "sigma must be positive, got {sigma}"
            )));
        }
        if mean.is_empty() {
            return Err(MhrwError::Walker("need at least one dimension".into()));
        }
        Ok(Self {
            mean,
            sigma,
            start_point: None,
        })
    }

    /// Zero mean and unit variance in `dim` dimensions.
    pub fn standard(dim: usize) -> Self {
        Self {
            mean: Array1::zeros(dim.max(1)),
            sigma: 1.0,
            start_point: None,
        }
    }

    pub fn with_start_point(mut self, start_point: Array1<f64>) -> Result<Self> {
        if start_point.len() != self.dim() {
            return Err(MhrwError::Walker(format!(
                "start point has {} coordinates, expected {}",
                start_point.len(),
                self.dim()
            )));
        }
        self.start_point = Some(start_point);
        Ok(self)
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }
}

impl Walker for IsotropicGaussianWalker {
    type Point = Array1<f64>;
    type Params = StepSize;

    fn fn_syntax(&self) -> FnSyntax {
        FnSyntax::LogValue
    }

    fn start_point(&mut self, rng: &mut dyn RngCore) -> Result<Array1<f64>> {
        if let Some(pt) = &self.start_point {
            return Ok(pt.clone());
        }
        let normal = Normal::new(0.0, self.sigma)
            .map_err(|e| MhrwError::Walker(format!("invalid sigma: {e}")))?;
        Ok(self.mean.mapv(|m| m + normal.sample(&mut *rng)))
    }

    fn jump_fn(
        &mut self,
        cur: &Array1<f64>,
        params: &StepSize,
        rng: &mut dyn RngCore,
    ) -> Result<Array1<f64>> {
        let step = params.0;
        Ok(cur.mapv(|x| {
            let z: f64 = StandardNormal.sample(&mut *rng);
            x + step * z
        }))
    }

    fn fn_value(&mut self, pt: &Array1<f64>) -> Result<f64> {
        let sq: f64 = pt
            .iter()
            .zip(self.mean.iter())
            .map(|(x, m)| (x - m) * (x - m))
            .sum();
        Ok(-0.5 * sq / (self.sigma * self.sigma))
    }
}

/// Euclidean norm of a point.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistanceToOrigin;

impl ValueCalculator<Array1<f64>> for DistanceToOrigin {
    fn value(&self, pt: &Array1<f64>) -> f64 {
        pt.dot(pt).sqrt()
    }
}

/// One coordinate of a point.
#[derive(Debug, Clone, Copy)]
pub struct Coordinate(pub usize);

impl ValueCalculator<Array1<f64>> for Coordinate {
    fn value(&self, pt: &Array1<f64>) -> f64 {
        pt.get(self.0).copied().unwrap_or(f64::NAN)
    }
}

/// Probability that a 2D standard Gaussian sample lies at a distance in `[a, b)` from the origin.
pub fn rayleigh_probability(a: f64, b: f64) -> f64 {
    (-0.5 * a * a).exp() - (-0.5 * b * b).exp()
}
