//! # Portfolio Optimizers
//!
//! $$
//! \min_{\mathbf{w}} \ \mathbf w^\top\Sigma\mathbf w
//! \quad\text{s.t.}\quad \mathbf 1^\top\mathbf w=1,\ \ \mathbf w^\top\mu=r^\*,\ \ l\le w_i\le u
//! $$
//!
//! Mean-variance allocation under box bounds and a full-investment budget.

use nalgebra::DMatrix;
use nalgebra::DVector;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use super::moments::MomentEstimate;
use super::qp::ActiveSetQp;
use super::qp::Constraints;
use super::types::Bounds;
use super::types::Objective;
use super::types::PortfolioResult;
use super::types::PortfolioWeights;
use crate::error::PortfolioError;
use crate::error::Result;

const TARGET_TOL: f64 = 1e-10;
const MAX_SEARCH_ITER: usize = 200;
/// Largest vertex count searched exhaustively for the riskiest portfolio.
const MAX_VERTICES: f64 = 1e5;

/// Objective, risk-free rate and bounds of a single optimization.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
  pub objective: Objective,
  pub risk_free: f64,
  pub bounds: Bounds,
}

impl Default for OptimizerConfig {
  fn default() -> Self {
    Self {
      objective: Objective::MaxSharpe,
      risk_free: 0.0,
      bounds: Bounds::default(),
    }
  }
}

/// Greedy LP solution of `max/min w'mu` under the budget and box bounds.
///
/// Every weight starts at the lower bound and the remaining budget goes to
/// the best assets first. Ties keep the lower index first.
fn extreme_portfolio(mu: &DVector<f64>, bounds: Bounds, maximize: bool) -> DVector<f64> {
  let n = mu.len();
  let mut order: Vec<usize> = (0..n).collect();
  order.sort_by(|&i, &j| {
    let ord = mu[i].total_cmp(&mu[j]);
    if maximize {
      ord.reverse()
    } else {
      ord
    }
  });

  let mut w = DVector::from_element(n, bounds.lower);
  let mut remaining = 1.0 - bounds.lower * n as f64;
  for i in order {
    if remaining <= 0.0 {
      break;
    }
    let add = (bounds.upper - bounds.lower).min(remaining);
    w[i] += add;
    remaining -= add;
  }
  w
}

fn binomial(n: usize, k: usize) -> f64 {
  (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
}

/// Advance `idx` to the next `k`-combination of `0..n` in lexicographic order.
fn next_combination(idx: &mut [usize], n: usize) -> bool {
  let k = idx.len();
  for pos in (0..k).rev() {
    if idx[pos] < n - k + pos {
      idx[pos] += 1;
      for next in pos + 1..k {
        idx[next] = idx[next - 1] + 1;
      }
      return true;
    }
  }
  false
}

/// Vertex of `{l <= w <= u, 1'w = 1}` with the largest variance.
///
/// Every vertex holds all weights at a bound except at most one. Vertices
/// are enumerated when there are at most [`MAX_VERTICES`] of them; beyond
/// that a pairwise exchange search climbs from the greedy fill of the most
/// volatile assets.
fn max_risk_vertex(cov: &DMatrix<f64>, bounds: Bounds) -> DVector<f64> {
  let n = cov.nrows();
  let (l, span) = (bounds.lower, bounds.upper - bounds.lower);
  if span <= f64::EPSILON {
    return DVector::from_element(n, l);
  }

  let slack = 1.0 - l * n as f64;
  let at_upper = ((slack / span + 1e-12).floor() as usize).min(n);
  let remainder = (slack - at_upper as f64 * span).max(0.0);
  let partial = at_upper < n && remainder > 1e-12;

  // w = l 1 + z with sparse z: w'Σw = l^2 1'Σ1 + 2 l (Σ1)'z + z'Σz
  let row_sums = cov.column_sum();
  let total = row_sums.sum();
  let variance = |z: &[(usize, f64)]| {
    let mut v = l * l * total;
    for &(i, zi) in z {
      v += 2.0 * l * row_sums[i] * zi;
      for &(j, zj) in z {
        v += zi * cov[(i, j)] * zj;
      }
    }
    v
  };
  let vertex = |z: &[(usize, f64)]| {
    let mut w = DVector::from_element(n, l);
    for &(i, zi) in z {
      w[i] += zi;
    }
    w
  };

  let count = if partial {
    n as f64 * binomial(n - 1, at_upper)
  } else {
    binomial(n, at_upper)
  };

  if count <= MAX_VERTICES {
    let mut best = Vec::new();
    let mut best_var = f64::NEG_INFINITY;
    let mut idx: Vec<usize> = (0..at_upper).collect();
    loop {
      let mut z: Vec<(usize, f64)> = idx.iter().map(|&i| (i, span)).collect();
      let parts: Vec<Option<usize>> = if partial {
        (0..n).filter(|p| !idx.contains(p)).map(Some).collect()
      } else {
        vec![None]
      };
      for part in parts {
        if let Some(p) = part {
          z.push((p, remainder));
        }
        let v = variance(&z);
        if v > best_var {
          best_var = v;
          best = z.clone();
        }
        if part.is_some() {
          z.pop();
        }
      }
      if !next_combination(&mut idx, n) {
        break;
      }
    }
    return vertex(&best);
  }

  let mut order: Vec<usize> = (0..n).collect();
  order.sort_by(|&i, &j| cov[(j, j)].total_cmp(&cov[(i, i)]));
  let mut z: Vec<(usize, f64)> = order[..at_upper].iter().map(|&i| (i, span)).collect();
  if partial {
    z.push((order[at_upper], remainder));
  }
  let mut w = vertex(&z);
  let mut sw = cov * &w;
  let mut current = w.dot(&sw);

  loop {
    let mut improved = false;
    for i in 0..n {
      for j in 0..n {
        let shift = (w[i] - l).min(bounds.upper - w[j]);
        if i == j || shift <= 1e-15 {
          continue;
        }
        let gain = shift * shift * (cov[(i, i)] + cov[(j, j)] - 2.0 * cov[(i, j)])
          + 2.0 * shift * (sw[j] - sw[i]);
        if gain > 1e-12 * current.abs().max(f64::MIN_POSITIVE) {
          w[i] -= shift;
          w[j] += shift;
          for k in 0..n {
            sw[k] += shift * (cov[(k, j)] - cov[(k, i)]);
          }
          current += gain;
          improved = true;
        }
      }
    }
    if !improved {
      return w;
    }
  }
}

/// Mean-variance problem prepared for repeated solves.
///
/// Σ is factorized once on construction; every objective and every frontier
/// sample reuses that factor, as do the cached minimum-variance,
/// maximum-return and riskiest portfolios. The struct is immutable and can
/// be shared across threads.
#[derive(Clone, Debug)]
pub struct PortfolioOptimizer {
  assets: Vec<String>,
  mu: DVector<f64>,
  cov: DMatrix<f64>,
  risk_free: f64,
  bounds: Bounds,
  lower: DVector<f64>,
  upper: DVector<f64>,
  qp: ActiveSetQp,
  w_lo: DVector<f64>,
  w_hi: DVector<f64>,
  r_lo: f64,
  r_hi: f64,
  w_mv: DVector<f64>,
  w_max: DVector<f64>,
  w_risky: DVector<f64>,
}

impl PortfolioOptimizer {
  pub fn new(moments: &MomentEstimate, risk_free: f64, bounds: Bounds) -> Result<Self> {
    let n = moments.n_assets();
    if !risk_free.is_finite() {
      return Err(PortfolioError::InvalidInput(format!(
        "risk-free rate must be finite, got {risk_free}"
      )));
    }
    bounds.validate(n)?;

    let mu = DVector::from_iterator(n, moments.mean().iter().copied());
    let cov = DMatrix::from_fn(n, n, |i, j| moments.covariance()[[i, j]]);
    let qp = ActiveSetQp::new(&cov)?;

    let w_risky = max_risk_vertex(&cov, bounds);
    let w_lo = extreme_portfolio(&mu, bounds, false);
    let w_hi = extreme_portfolio(&mu, bounds, true);
    let r_lo = mu.dot(&w_lo);
    let r_hi = mu.dot(&w_hi);

    let mut optimizer = Self {
      assets: moments.assets().to_vec(),
      mu,
      cov,
      risk_free,
      bounds,
      lower: DVector::from_element(n, bounds.lower),
      upper: DVector::from_element(n, bounds.upper),
      qp,
      w_mv: w_lo.clone(),
      w_max: w_hi.clone(),
      w_risky,
      w_lo,
      w_hi,
      r_lo,
      r_hi,
    };
    optimizer.w_mv = optimizer.solve_budget_only(&DVector::zeros(n))?;
    optimizer.w_max = optimizer.solve_target_return(r_hi)?;

    debug!(
      assets = n,
      r_lo,
      r_hi,
      r_mv = optimizer.min_variance_return(),
      max_risk = optimizer.risk_range().1,
      "prepared mean-variance problem"
    );
    Ok(optimizer)
  }

  /// Prepare from an [`OptimizerConfig`].
  pub fn from_config(moments: &MomentEstimate, config: &OptimizerConfig) -> Result<Self> {
    Self::new(moments, config.risk_free, config.bounds)
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn risk_free(&self) -> f64 {
    self.risk_free
  }

  pub fn bounds(&self) -> Bounds {
    self.bounds
  }

  /// Lowest and highest expected return reachable under the bounds.
  pub fn return_range(&self) -> (f64, f64) {
    (self.r_lo, self.r_hi)
  }

  pub fn min_variance_return(&self) -> f64 {
    self.mu.dot(&self.w_mv)
  }

  pub fn min_variance_risk(&self) -> f64 {
    self.risk(&self.w_mv)
  }

  /// Volatility of the maximum-return portfolio, the end of the efficient branch.
  pub fn max_return_risk(&self) -> f64 {
    self.risk(&self.w_max)
  }

  /// Reachable volatilities, from the minimum-variance portfolio to the
  /// riskiest vertex of the feasible set.
  pub fn risk_range(&self) -> (f64, f64) {
    let s_max = self.risk(&self.w_risky).max(self.max_return_risk());
    (self.min_variance_risk(), s_max)
  }

  pub fn optimize(&self, objective: Objective) -> Result<PortfolioResult> {
    match objective {
      Objective::MaxSharpe => self.max_sharpe(),
      Objective::MinVariance => self.min_variance(),
      Objective::TargetReturn { target } => self.target_return(target),
      Objective::TargetRisk { target } => self.target_risk(target),
      Objective::MaxReturn => self.max_return(),
      Objective::Utility { risk_aversion } => self.utility(risk_aversion),
    }
  }

  pub fn min_variance(&self) -> Result<PortfolioResult> {
    self.result(&self.w_mv)
  }

  pub fn target_return(&self, target: f64) -> Result<PortfolioResult> {
    let w = self.solve_target_return(target)?;
    self.result(&w)
  }

  pub fn max_return(&self) -> Result<PortfolioResult> {
    self.result(&self.w_max)
  }

  /// Highest return whose volatility equals `target`.
  ///
  /// Targets past the maximum-return volatility are met on the segment from
  /// the maximum-return portfolio to the riskiest vertex.
  pub fn target_risk(&self, target: f64) -> Result<PortfolioResult> {
    if !target.is_finite() {
      return Err(PortfolioError::InfeasibleTarget(format!(
        "target risk {target} is not finite"
      )));
    }

    let (s_lo, s_hi) = self.risk_range();
    let tol = TARGET_TOL * s_hi.max(f64::MIN_POSITIVE);
    if target < s_lo - tol || target > s_hi + tol {
      return Err(PortfolioError::InfeasibleTarget(format!(
        "target risk {target} outside achievable range [{s_lo}, {s_hi}]"
      )));
    }
    if target <= s_lo + tol {
      return self.min_variance();
    }
    let s_ret = self.max_return_risk();
    if (target - s_ret).abs() <= tol {
      return self.max_return();
    }
    if target > s_ret {
      return self.past_max_return(target.min(s_hi));
    }

    let (mut a, mut b) = (self.min_variance_return(), self.r_hi);
    for _ in 0..MAX_SEARCH_ITER {
      let mid = 0.5 * (a + b);
      let w = self.solve_target_return(mid)?;
      let risk = self.risk(&w);
      if (risk - target).abs() <= 1e-12 * target || b - a <= 1e-15 * b.abs().max(1.0) {
        return self.result(&w);
      }
      if risk < target {
        a = mid;
      } else {
        b = mid;
      }
    }

    Err(PortfolioError::ConvergenceError(format!(
      "bisection for target risk {target} did not converge"
    )))
  }

  /// Tangency portfolio by golden-section search over the efficient branch.
  pub fn max_sharpe(&self) -> Result<PortfolioResult> {
    if self.r_hi <= self.risk_free + TARGET_TOL * self.r_hi.abs().max(1.0) {
      return Err(PortfolioError::InfeasibleTarget(format!(
        "no portfolio earns more than the risk-free rate {} (best return {})",
        self.risk_free, self.r_hi
      )));
    }

    let r_mv = self.min_variance_return();
    let tol = 1e-12 * self.r_hi.abs().max(r_mv.abs()).max(1.0);
    if self.r_hi - r_mv <= tol {
      return self.min_variance();
    }

    let sharpe = |r: f64| -> Result<f64> {
      let w = self.solve_target_return(r)?;
      Ok((r - self.risk_free) / self.risk(&w))
    };

    let inv_phi = (5.0_f64.sqrt() - 1.0) / 2.0;
    let (mut a, mut b) = (r_mv, self.r_hi);
    let mut c = b - inv_phi * (b - a);
    let mut d = a + inv_phi * (b - a);
    let mut fc = sharpe(c)?;
    let mut fd = sharpe(d)?;

    let mut converged = false;
    for _ in 0..MAX_SEARCH_ITER {
      if b - a <= tol {
        converged = true;
        break;
      }
      if fc >= fd {
        b = d;
        d = c;
        fd = fc;
        c = b - inv_phi * (b - a);
        fc = sharpe(c)?;
      } else {
        a = c;
        c = d;
        fc = fd;
        d = a + inv_phi * (b - a);
        fd = sharpe(d)?;
      }
    }
    if !converged {
      return Err(PortfolioError::ConvergenceError(
        "golden-section search for the tangency portfolio did not converge".into(),
      ));
    }

    self.target_return(0.5 * (a + b))
  }

  /// Maximize `w'mu - risk_aversion / 2 * w' Sigma w`.
  pub fn utility(&self, risk_aversion: f64) -> Result<PortfolioResult> {
    if !(risk_aversion > 0.0) || !risk_aversion.is_finite() {
      return Err(PortfolioError::InvalidInput(format!(
        "risk aversion must be positive and finite, got {risk_aversion}"
      )));
    }
    let c = -&self.mu / risk_aversion;
    let w = self.solve_budget_only(&c)?;
    self.result(&w)
  }

  /// Point of `w_max + t (w_risky - w_max)`, `t` in `[0, 1]`, with volatility
  /// `target`. The variance is a convex quadratic in `t` starting below
  /// `target^2`, so the crossing is unique.
  fn past_max_return(&self, target: f64) -> Result<PortfolioResult> {
    let d = &self.w_risky - &self.w_max;
    let sd = &self.cov * &d;
    let a = d.dot(&sd);
    if a <= 0.0 {
      return Err(PortfolioError::ConvergenceError(format!(
        "no direction past the maximum-return portfolio reaches risk {target}"
      )));
    }
    let b = self.w_max.dot(&sd);
    let c = self.w_max.dot(&(&self.cov * &self.w_max)) - target * target;
    let t = ((-b + (b * b - a * c).max(0.0).sqrt()) / a).clamp(0.0, 1.0);
    let w = &self.w_max + d * t;
    self.result(&w)
  }

  fn solve_budget_only(&self, c: &DVector<f64>) -> Result<DVector<f64>> {
    let n = self.mu.len();
    let a = DMatrix::from_element(1, n, 1.0);
    let b = DVector::from_element(1, 1.0);
    let cons = Constraints {
      a: &a,
      b: &b,
      lower: &self.lower,
      upper: &self.upper,
    };
    Ok(self.qp.solve(c, &cons, self.w_lo.clone())?.x)
  }

  fn solve_target_return(&self, target: f64) -> Result<DVector<f64>> {
    let tol = TARGET_TOL * self.r_hi.abs().max(self.r_lo.abs()).max(1.0);
    if !target.is_finite() || target < self.r_lo - tol || target > self.r_hi + tol {
      return Err(PortfolioError::InfeasibleTarget(format!(
        "target return {target} outside achievable range [{}, {}]",
        self.r_lo, self.r_hi
      )));
    }
    if self.r_hi - self.r_lo <= tol {
      return Ok(self.w_mv.clone());
    }

    let target = target.clamp(self.r_lo, self.r_hi);
    let theta = (target - self.r_lo) / (self.r_hi - self.r_lo);
    let x0 = &self.w_hi * theta + &self.w_lo * (1.0 - theta);

    let n = self.mu.len();
    let mut a = DMatrix::from_element(2, n, 1.0);
    a.set_row(1, &self.mu.transpose());
    let b = DVector::from_vec(vec![1.0, target]);
    let cons = Constraints {
      a: &a,
      b: &b,
      lower: &self.lower,
      upper: &self.upper,
    };
    let sol = self.qp.solve(&DVector::zeros(n), &cons, x0)?;
    debug!(target, iterations = sol.iterations, "target return solved");
    Ok(sol.x)
  }

  fn risk(&self, w: &DVector<f64>) -> f64 {
    w.dot(&(&self.cov * w)).max(0.0).sqrt()
  }

  /// Model return, volatility and Sharpe ratio of the weights `w`.
  pub(super) fn result(&self, w: &DVector<f64>) -> Result<PortfolioResult> {
    let expected_return = self.mu.dot(w);
    let volatility = self.risk(w);
    let weights = PortfolioWeights::new(self.assets.clone(), w.iter().copied().collect())?;
    Ok(PortfolioResult {
      weights,
      expected_return,
      volatility,
      sharpe: (expected_return - self.risk_free) / volatility,
    })
  }
}

/// Prepare the problem and solve a single objective.
pub fn optimize(moments: &MomentEstimate, config: &OptimizerConfig) -> Result<PortfolioResult> {
  PortfolioOptimizer::from_config(moments, config)?.optimize(config.objective)
}

#[cfg(test)]
mod tests {
  use approx::assert_relative_eq;
  use ndarray::array;
  use ndarray::Array1;
  use ndarray::Array2;
  use rand::rngs::StdRng;
  use rand::Rng;
  use rand::SeedableRng;
  use rand_distr::Distribution;
  use rand_distr::Normal;

  use super::*;

  fn names(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("A{i}")).collect()
  }

  fn two_assets() -> MomentEstimate {
    MomentEstimate::new(
      names(2),
      array![0.08, 0.12],
      array![[0.04, 0.01], [0.01, 0.09]],
    )
    .unwrap()
  }

  fn three_assets() -> MomentEstimate {
    MomentEstimate::new(
      names(3),
      array![0.08, 0.10, 0.12],
      array![[0.04, 0.01, 0.0], [0.01, 0.09, 0.02], [0.0, 0.02, 0.16]],
    )
    .unwrap()
  }

  fn random_moments(n: usize, seed: u64) -> MomentEstimate {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 0.2).unwrap();
    let factors = Array2::from_shape_fn((n + 3, n), |_| normal.sample(&mut rng));
    let cov = factors.t().dot(&factors) / (n + 3) as f64 + Array2::<f64>::eye(n) * 1e-3;
    let mu = Array1::from_shape_fn(n, |_| rng.gen_range(0.02..0.15));
    MomentEstimate::new(names(n), mu, cov).unwrap()
  }

  fn check_feasible(result: &PortfolioResult, bounds: Bounds) {
    assert_relative_eq!(result.weights.sum(), 1.0, epsilon = 1e-8);
    for (_, w) in result.weights.iter() {
      assert!(w >= bounds.lower - 1e-8 && w <= bounds.upper + 1e-8);
    }
  }

  #[test]
  fn two_asset_min_variance_matches_formula() {
    let opt = PortfolioOptimizer::new(&two_assets(), 0.0, Bounds::default()).unwrap();
    let result = opt.min_variance().unwrap();
    let w1 = (0.09 - 0.01) / (0.04 + 0.09 - 2.0 * 0.01);
    assert_relative_eq!(result.weights.values()[0], w1, epsilon = 1e-8);
    assert_relative_eq!(result.weights.values()[1], 1.0 - w1, epsilon = 1e-8);
    assert_relative_eq!(result.weights.values()[0], 0.7273, epsilon = 1e-4);
  }

  #[test]
  fn unreachable_target_return_is_infeasible() {
    let opt = PortfolioOptimizer::new(&two_assets(), 0.0, Bounds::default()).unwrap();
    assert!(matches!(
      opt.target_return(0.5),
      Err(PortfolioError::InfeasibleTarget(_))
    ));
    assert!(matches!(
      opt.target_return(0.05),
      Err(PortfolioError::InfeasibleTarget(_))
    ));
  }

  #[test]
  fn target_return_hits_target() {
    let opt = PortfolioOptimizer::new(&three_assets(), 0.0, Bounds::default()).unwrap();
    let result = opt.target_return(0.105).unwrap();
    assert_relative_eq!(result.expected_return, 0.105, epsilon = 1e-9);
    check_feasible(&result, Bounds::default());
  }

  #[test]
  fn every_objective_returns_feasible_weights() {
    let moments = random_moments(8, 7);
    let bounds = Bounds {
      lower: 0.0,
      upper: 0.4,
    };
    let opt = PortfolioOptimizer::new(&moments, 0.01, bounds).unwrap();
    let (lo, hi) = opt.return_range();
    let (s_lo, s_hi) = opt.risk_range();

    let objectives = [
      Objective::MaxSharpe,
      Objective::MinVariance,
      Objective::TargetReturn {
        target: 0.5 * (lo + hi),
      },
      Objective::TargetRisk {
        target: 0.5 * (s_lo + s_hi),
      },
      Objective::MaxReturn,
      Objective::Utility { risk_aversion: 3.0 },
    ];
    for objective in objectives {
      let result = opt.optimize(objective).unwrap();
      check_feasible(&result, bounds);
    }
  }

  #[test]
  fn min_variance_beats_random_feasible_perturbations() {
    let moments = random_moments(6, 11);
    let opt = PortfolioOptimizer::new(&moments, 0.0, Bounds::default()).unwrap();
    let best = opt.min_variance().unwrap();
    let w = Array1::from(best.weights.values().to_vec());
    let var = |v: &Array1<f64>| v.dot(&moments.covariance().dot(v));

    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..500 {
      let (i, j) = (rng.gen_range(0..6), rng.gen_range(0..6));
      if i == j {
        continue;
      }
      // shift mass between two assets, staying inside [0, 1]
      let step = rng.gen_range(0.0..1.0) * w[i].min(1.0 - w[j]);
      let mut v = w.clone();
      v[i] -= step;
      v[j] += step;
      assert!(var(&v) >= var(&w) - 1e-12);
    }
  }

  #[test]
  fn target_risk_returns_requested_volatility() {
    let opt = PortfolioOptimizer::new(&three_assets(), 0.0, Bounds::default()).unwrap();
    let (s_lo, s_hi) = opt.risk_range();
    assert_relative_eq!(s_hi, opt.max_return_risk(), epsilon = 1e-12);
    let target = s_lo + 0.3 * (s_hi - s_lo);
    let result = opt.target_risk(target).unwrap();
    assert_relative_eq!(result.volatility, target, max_relative = 1e-8);
    assert!(result.expected_return >= opt.min_variance_return() - 1e-12);

    assert!(matches!(
      opt.target_risk(s_hi * 2.0),
      Err(PortfolioError::InfeasibleTarget(_))
    ));
  }

  fn riskiest_asset_trails() -> MomentEstimate {
    MomentEstimate::new(
      names(3),
      array![0.08, 0.12, 0.05],
      array![[0.04, 0.0, 0.0], [0.0, 0.09, 0.0], [0.0, 0.0, 0.25]],
    )
    .unwrap()
  }

  #[test]
  fn risk_range_reaches_riskiest_asset() {
    let opt = PortfolioOptimizer::new(&riskiest_asset_trails(), 0.0, Bounds::default()).unwrap();
    let (_, s_hi) = opt.risk_range();
    assert_relative_eq!(opt.max_return_risk(), 0.3, epsilon = 1e-10);
    assert_relative_eq!(s_hi, 0.5, epsilon = 1e-12);
  }

  #[test]
  fn target_risk_past_max_return_mixes_towards_riskiest_asset() {
    let opt = PortfolioOptimizer::new(&riskiest_asset_trails(), 0.0, Bounds::default()).unwrap();
    let result = opt.target_risk(0.4).unwrap();
    assert_relative_eq!(result.volatility, 0.4, max_relative = 1e-10);
    check_feasible(&result, Bounds::default());

    // 0.09 (1 - t)^2 + 0.25 t^2 = 0.16 on the segment from B to C
    let t = (0.09 + (0.09_f64 * 0.09 + 0.34 * 0.07).sqrt()) / 0.34;
    let w = result.weights.values();
    assert_relative_eq!(w[0], 0.0, epsilon = 1e-10);
    assert_relative_eq!(w[1], 1.0 - t, epsilon = 1e-9);
    assert_relative_eq!(w[2], t, epsilon = 1e-9);
    assert!(result.expected_return < 0.12);

    let riskiest = opt.target_risk(0.5).unwrap();
    assert_relative_eq!(riskiest.weights.values()[2], 1.0, epsilon = 1e-9);
    assert!(matches!(
      opt.target_risk(0.51),
      Err(PortfolioError::InfeasibleTarget(_))
    ));
  }

  #[test]
  fn riskiest_vertex_respects_upper_bound() {
    let bounds = Bounds {
      lower: 0.0,
      upper: 0.6,
    };
    let opt = PortfolioOptimizer::new(&riskiest_asset_trails(), 0.0, bounds).unwrap();
    let (_, s_hi) = opt.risk_range();
    // 0.6 in C and the remaining 0.4 in B
    let expected = (0.36_f64 * 0.25 + 0.16 * 0.09).sqrt();
    assert_relative_eq!(s_hi, expected, epsilon = 1e-12);
    let result = opt.target_risk(s_hi).unwrap();
    check_feasible(&result, bounds);
  }

  #[test]
  fn riskiest_vertex_beats_every_vertex() {
    let moments = random_moments(12, 5);
    let cov = DMatrix::from_fn(12, 12, |i, j| moments.covariance()[[i, j]]);
    let bounds = Bounds {
      lower: 0.0,
      upper: 0.25,
    };
    let w = max_risk_vertex(&cov, bounds);
    assert_relative_eq!(w.sum(), 1.0, epsilon = 1e-12);
    assert!(w.iter().all(|x| *x >= -1e-12 && *x <= 0.25 + 1e-12));

    // every vertex beaten by the enumerated one
    let var = |v: &DVector<f64>| v.dot(&(&cov * v));
    let mut idx: Vec<usize> = (0..4).collect();
    loop {
      let mut v = DVector::zeros(12);
      for &i in &idx {
        v[i] = 0.25;
      }
      assert!(var(&v) <= var(&w) + 1e-12);
      if !next_combination(&mut idx, 12) {
        break;
      }
    }
  }

  #[test]
  fn exchange_search_is_locally_maximal() {
    // C(30, 10) vertices, too many to enumerate
    let moments = random_moments(30, 9);
    let cov = DMatrix::from_fn(30, 30, |i, j| moments.covariance()[[i, j]]);
    let bounds = Bounds {
      lower: 0.0,
      upper: 0.1,
    };
    let w = max_risk_vertex(&cov, bounds);
    assert_relative_eq!(w.sum(), 1.0, epsilon = 1e-12);
    assert!(w.iter().all(|x| *x >= -1e-12 && *x <= 0.1 + 1e-12));

    let var = |v: &DVector<f64>| v.dot(&(&cov * v));
    let best = var(&w);
    for i in 0..30 {
      for j in 0..30 {
        let shift = w[i].min(0.1 - w[j]);
        if i == j || shift <= 1e-15 {
          continue;
        }
        let mut v = w.clone();
        v[i] -= shift;
        v[j] += shift;
        assert!(var(&v) <= best * (1.0 + 1e-10));
      }
    }
  }

  #[test]
  fn max_sharpe_matches_tangency_portfolio() {
    // interior tangency portfolio: Sigma^-1 (mu - rf), normalized
    let moments = three_assets();
    let rf = 0.02;
    let opt = PortfolioOptimizer::new(&moments, rf, Bounds::default()).unwrap();
    let result = opt.max_sharpe().unwrap();

    let cov = DMatrix::from_fn(3, 3, |i, j| moments.covariance()[[i, j]]);
    let excess = DVector::from_iterator(3, moments.mean().iter().map(|m| m - rf));
    let raw = cov.cholesky().unwrap().solve(&excess);
    let tangency = &raw / raw.sum();

    for (k, w) in result.weights.values().iter().enumerate() {
      assert_relative_eq!(*w, tangency[k], epsilon = 1e-5);
    }
    let best = (moments.expected_return(Array1::from(tangency.as_slice().to_vec()).view()) - rf)
      / moments.volatility(Array1::from(tangency.as_slice().to_vec()).view());
    assert_relative_eq!(result.sharpe, best, max_relative = 1e-9);
  }

  #[test]
  fn max_sharpe_requires_excess_return() {
    let opt = PortfolioOptimizer::new(&two_assets(), 0.2, Bounds::default()).unwrap();
    assert!(matches!(
      opt.max_sharpe(),
      Err(PortfolioError::InfeasibleTarget(_))
    ));
  }

  #[test]
  fn max_return_picks_best_asset() {
    let opt = PortfolioOptimizer::new(&three_assets(), 0.0, Bounds::default()).unwrap();
    let result = opt.max_return().unwrap();
    assert_relative_eq!(result.weights.values()[2], 1.0, epsilon = 1e-10);
    assert_relative_eq!(result.expected_return, 0.12, epsilon = 1e-10);
  }

  #[test]
  fn utility_interpolates_between_extremes() {
    let opt = PortfolioOptimizer::new(&three_assets(), 0.0, Bounds::default()).unwrap();
    let cautious = opt.utility(1e4).unwrap();
    let mv = opt.min_variance().unwrap();
    assert_relative_eq!(cautious.volatility, mv.volatility, epsilon = 1e-4);

    let bold = opt.utility(1e-4).unwrap();
    assert_relative_eq!(bold.expected_return, 0.12, epsilon = 1e-8);

    assert!(matches!(opt.utility(0.0), Err(PortfolioError::InvalidInput(_))));
  }

  #[test]
  fn collinear_covariance_is_singular() {
    let moments = MomentEstimate::new(
      names(2),
      array![0.1, 0.1],
      array![[0.04, 0.04], [0.04, 0.04]],
    )
    .unwrap();
    assert!(matches!(
      PortfolioOptimizer::new(&moments, 0.0, Bounds::default()),
      Err(PortfolioError::SingularCovariance(_))
    ));
  }

  #[test]
  fn inconsistent_bounds_are_rejected() {
    let bounds = Bounds {
      lower: 0.6,
      upper: 1.0,
    };
    assert!(matches!(
      PortfolioOptimizer::new(&three_assets(), 0.0, bounds),
      Err(PortfolioError::InvalidInput(_))
    ));
  }

  #[test]
  fn equal_expected_returns_reduce_to_min_variance() {
    let moments = MomentEstimate::new(
      names(2),
      array![0.1, 0.1],
      array![[0.04, 0.01], [0.01, 0.09]],
    )
    .unwrap();
    let opt = PortfolioOptimizer::new(&moments, 0.0, Bounds::default()).unwrap();
    let mv = opt.min_variance().unwrap();
    let tr = opt.target_return(0.1).unwrap();
    assert_relative_eq!(tr.weights.values()[0], mv.weights.values()[0], epsilon = 1e-12);
  }
}
