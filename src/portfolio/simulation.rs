//! # Random Portfolios
//!
//! $$
//! \mathbf w = l\,\mathbf 1 + (1-nl)\,\frac{\mathbf u}{\mathbf 1^\top\mathbf u},\qquad
//! u_i\sim\mathcal U(0,1)
//! $$
//!
//! Monte Carlo cloud of feasible portfolios to set against the optimum.

use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Distribution;
use rand_distr::Uniform;
use rayon::prelude::*;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use super::moments::MomentEstimate;
use super::optimizers::PortfolioOptimizer;
use super::types::Bounds;
use super::types::PortfolioCloud;
use crate::error::PortfolioError;
use crate::error::Result;

/// Rejected draws allowed per sample before giving up on the bounds.
const MAX_DRAWS: usize = 1000;

/// Seeded random-portfolio sampler.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomPortfolios {
  pub portfolios: usize,
  pub seed: u64,
}

impl Default for RandomPortfolios {
  fn default() -> Self {
    Self {
      portfolios: 10_000,
      seed: 42,
    }
  }
}

impl RandomPortfolios {
  pub fn new(portfolios: usize, seed: u64) -> Self {
    Self { portfolios, seed }
  }

  /// Prepare the problem from moments and sample it.
  pub fn generate(&self, moments: &MomentEstimate, risk_free: f64, bounds: Bounds) -> Result<PortfolioCloud> {
    let optimizer = PortfolioOptimizer::new(moments, risk_free, bounds)?;
    self.sample(&optimizer)
  }

  /// Draw the cloud in parallel. Sample `k` uses its own generator seeded
  /// with `seed + k`, so the cloud does not depend on the thread count.
  pub fn sample(&self, optimizer: &PortfolioOptimizer) -> Result<PortfolioCloud> {
    if self.portfolios == 0 {
      return Err(PortfolioError::InvalidInput(
        "random portfolio cloud needs at least one sample".into(),
      ));
    }

    let n = optimizer.assets().len();
    let bounds = optimizer.bounds();
    let samples = (0..self.portfolios)
      .into_par_iter()
      .map(|k| {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(k as u64));
        let w = draw(&mut rng, n, bounds)?;
        optimizer.result(&w)
      })
      .collect::<Result<Vec<_>>>()?;

    debug!(samples = samples.len(), seed = self.seed, "sampled random portfolios");
    Ok(PortfolioCloud { samples })
  }
}

/// Uniform weights scaled onto the budget above the lower bound, redrawn
/// until they clear the upper bound.
fn draw(rng: &mut StdRng, n: usize, bounds: Bounds) -> Result<DVector<f64>> {
  let uniform = Uniform::new(0.0, 1.0);
  let slack = 1.0 - bounds.lower * n as f64;

  for _ in 0..MAX_DRAWS {
    let u = DVector::from_fn(n, |_, _| uniform.sample(&mut *rng));
    let total = u.sum();
    if total <= 0.0 {
      continue;
    }
    let w = u.map(|x| bounds.lower + slack * x / total);
    if w.iter().all(|x| *x <= bounds.upper + 1e-12) {
      return Ok(w);
    }
  }

  Err(PortfolioError::ConvergenceError(format!(
    "no random portfolio inside [{}, {}] after {MAX_DRAWS} draws",
    bounds.lower, bounds.upper
  )))
}
