//! # Efficient Frontier
//!
//! $$
//! \mathcal F=\{(\sigma(r),r)\ :\ \sigma(r)=\min_{\mathbf w^\top\mu=r}\sqrt{\mathbf w^\top\Sigma\mathbf w}\}
//! $$
//!
//! Samples the frontier by sweeping target returns or target risks. A risk
//! sweep runs up to the riskiest feasible portfolio; points past the
//! maximum-return volatility are flagged as dominated.

use rayon::prelude::*;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::error;

use super::moments::MomentEstimate;
use super::optimizers::PortfolioOptimizer;
use super::types::Bounds;
use super::types::Frontier;
use super::types::FrontierMetric;
use super::types::FrontierPoint;
use super::types::PortfolioResult;
use crate::error::PortfolioError;
use crate::error::Result;

/// Frontier sampling configuration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontierGenerator {
  /// Number of samples, at least one.
  pub points: usize,
  pub metric: FrontierMetric,
  /// Start the return sweep at the lowest achievable return instead of the
  /// minimum-variance return.
  pub include_inefficient: bool,
}

impl Default for FrontierGenerator {
  fn default() -> Self {
    Self {
      points: 50,
      metric: FrontierMetric::Return,
      include_inefficient: false,
    }
  }
}

/// `n` evenly spaced values from `start` to `end` inclusive.
fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
  if n == 1 {
    return vec![start];
  }
  let step = (end - start) / (n - 1) as f64;
  (0..n)
    .map(|k| if k == n - 1 { end } else { start + step * k as f64 })
    .collect()
}

impl FrontierGenerator {
  pub fn new(points: usize, metric: FrontierMetric) -> Self {
    Self {
      points,
      metric,
      ..Self::default()
    }
  }

  pub fn with_inefficient(mut self, include: bool) -> Self {
    self.include_inefficient = include;
    self
  }

  /// Prepare the problem from moments and sweep it.
  pub fn generate(&self, moments: &MomentEstimate, risk_free: f64, bounds: Bounds) -> Result<Frontier> {
    let optimizer = PortfolioOptimizer::new(moments, risk_free, bounds)?;
    self.sweep(&optimizer)
  }

  /// Sweep an already prepared problem.
  pub fn sweep(&self, optimizer: &PortfolioOptimizer) -> Result<Frontier> {
    if self.points == 0 {
      return Err(PortfolioError::InvalidInput(
        "frontier needs at least one point".into(),
      ));
    }

    let r_mv = optimizer.min_variance_return();
    let (r_lo, r_hi) = optimizer.return_range();
    let targets = match self.metric {
      FrontierMetric::Return => {
        let start = if self.include_inefficient { r_lo } else { r_mv };
        linspace(start, r_hi, self.points)
      }
      FrontierMetric::Risk => {
        let (s_lo, s_hi) = optimizer.risk_range();
        linspace(s_lo, s_hi, self.points)
      }
    };
    debug!(
      metric = ?self.metric,
      points = self.points,
      first = targets[0],
      last = targets[targets.len() - 1],
      "sweeping frontier"
    );

    let efficient_floor = r_mv - 1e-10 * r_mv.abs().max(1.0);
    let s_ret = optimizer.max_return_risk();
    let efficient_ceiling = s_ret + 1e-10 * s_ret.max(f64::MIN_POSITIVE);
    let points = targets
      .par_iter()
      .map(|&target| {
        let solved = match self.metric {
          FrontierMetric::Return => optimizer.target_return(target),
          FrontierMetric::Risk => optimizer.target_risk(target),
        };
        let result = solved.map_err(|e| {
          error!(target, error = %e, "frontier sample failed");
          e
        })?;
        let efficient = match self.metric {
          FrontierMetric::Return => target >= efficient_floor,
          FrontierMetric::Risk => target <= efficient_ceiling,
        };
        Ok(point(target, result, efficient))
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(Frontier {
      metric: self.metric,
      points,
    })
  }
}

fn point(target: f64, result: PortfolioResult, efficient: bool) -> FrontierPoint {
  FrontierPoint {
    target,
    risk: result.volatility,
    expected_return: result.expected_return,
    sharpe: result.sharpe,
    weights: result.weights,
    efficient,
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_relative_eq;
  use ndarray::array;

  use super::*;

  fn moments() -> MomentEstimate {
    MomentEstimate::new(
      vec!["A".into(), "B".into(), "C".into()],
      array![0.08, 0.10, 0.12],
      array![[0.04, 0.01, 0.0], [0.01, 0.09, 0.02], [0.0, 0.02, 0.16]],
    )
    .unwrap()
  }

  #[test]
  fn return_sweep_is_monotone_in_risk() {
    let frontier = FrontierGenerator::new(20, FrontierMetric::Return)
      .generate(&moments(), 0.0, Bounds::default())
      .unwrap();
    assert_eq!(frontier.len(), 20);
    assert!(frontier.points.iter().all(|p| p.efficient));
    for pair in frontier.points.windows(2) {
      assert!(pair[1].target > pair[0].target);
      assert!(pair[1].risk >= pair[0].risk - 1e-12);
    }
    assert_relative_eq!(frontier.points[19].expected_return, 0.12, epsilon = 1e-10);
  }

  #[test]
  fn inefficient_points_are_flagged() {
    let frontier = FrontierGenerator::new(21, FrontierMetric::Return)
      .with_inefficient(true)
      .generate(&moments(), 0.0, Bounds::default())
      .unwrap();
    assert_relative_eq!(frontier.points[0].expected_return, 0.08, epsilon = 1e-10);
    assert!(!frontier.points[0].efficient);
    assert!(frontier.points[20].efficient);

    let efficient: Vec<_> = frontier.efficient().collect();
    for pair in efficient.windows(2) {
      assert!(pair[1].risk >= pair[0].risk - 1e-12);
    }
    // dominated half: risk falls towards the minimum-variance point
    let first_efficient = frontier.points.iter().position(|p| p.efficient).unwrap();
    assert!(frontier.points[0].risk >= frontier.points[first_efficient].risk);
  }

  #[test]
  fn risk_sweep_hits_each_target() {
    let frontier = FrontierGenerator::new(10, FrontierMetric::Risk)
      .generate(&moments(), 0.0, Bounds::default())
      .unwrap();
    for p in &frontier.points {
      assert_relative_eq!(p.risk, p.target, max_relative = 1e-8);
    }
    for pair in frontier.points.windows(2) {
      assert!(pair[1].expected_return >= pair[0].expected_return - 1e-12);
    }
  }

  #[test]
  fn risk_sweep_reaches_riskiest_asset() {
    let m = MomentEstimate::new(
      vec!["A".into(), "B".into(), "C".into()],
      array![0.08, 0.12, 0.05],
      array![[0.04, 0.0, 0.0], [0.0, 0.09, 0.0], [0.0, 0.0, 0.25]],
    )
    .unwrap();
    let frontier = FrontierGenerator::new(11, FrontierMetric::Risk)
      .generate(&m, 0.0, Bounds::default())
      .unwrap();

    let last = &frontier.points[10];
    assert_relative_eq!(last.risk, 0.5, epsilon = 1e-10);
    assert_relative_eq!(last.weights.values()[2], 1.0, epsilon = 1e-9);
    assert!(!last.efficient);
    for p in &frontier.points {
      assert_relative_eq!(p.risk, p.target, max_relative = 1e-8);
      assert_eq!(p.efficient, p.risk <= 0.3 + 1e-9);
    }
    for pair in frontier.efficient().collect::<Vec<_>>().windows(2) {
      assert!(pair[1].expected_return >= pair[0].expected_return - 1e-12);
    }
  }

  #[test]
  fn single_point_is_min_variance() {
    let m = moments();
    let frontier = FrontierGenerator::new(1, FrontierMetric::Return)
      .generate(&m, 0.0, Bounds::default())
      .unwrap();
    let mv = PortfolioOptimizer::new(&m, 0.0, Bounds::default())
      .unwrap()
      .min_variance()
      .unwrap();
    assert_relative_eq!(frontier.points[0].risk, mv.volatility, epsilon = 1e-10);
  }

  #[test]
  fn zero_points_is_rejected() {
    assert!(matches!(
      FrontierGenerator::new(0, FrontierMetric::Return).generate(&moments(), 0.0, Bounds::default()),
      Err(PortfolioError::InvalidInput(_))
    ));
  }

  #[test]
  fn max_sharpe_point_is_close_to_optimizer() {
    let m = moments();
    let frontier = FrontierGenerator::new(200, FrontierMetric::Return)
      .generate(&m, 0.02, Bounds::default())
      .unwrap();
    let best = PortfolioOptimizer::new(&m, 0.02, Bounds::default())
      .unwrap()
      .max_sharpe()
      .unwrap();
    let sampled = frontier.max_sharpe().unwrap();
    assert!(sampled.sharpe <= best.sharpe + 1e-9);
    assert_relative_eq!(sampled.sharpe, best.sharpe, max_relative = 1e-3);
  }
}
