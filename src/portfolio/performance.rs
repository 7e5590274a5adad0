//! # Performance Evaluation
//!
//! $$
//! \text{SR}=\frac{(1+\bar p)^P-1-r_f}{\sigma_p\sqrt P},\qquad
//! \text{Sortino}=\frac{(1+\bar p)^P-1-r_f}{\sigma_{p<\tau}\sqrt P}
//! $$
//!
//! Realized metrics of a weighted portfolio over a returns panel.

use ndarray::Array1;
use ndarray::ArrayView1;
use serde::Deserialize;
use serde::Serialize;
use statrs::statistics::Statistics;

use super::data::ReturnsPanel;
use super::types::Frequency;
use super::types::PerformanceSummary;
use super::types::PortfolioWeights;
use crate::error::PortfolioError;
use crate::error::Result;

/// Standard deviations below this (relative to the largest return) count as zero.
const ZERO_STD_TOL: f64 = 1e-14;

/// Per-period returns of a fixed-weight portfolio, `p_t = sum_i w_i r_{i,t}`.
///
/// Weights and panel must cover exactly the same assets.
pub fn portfolio_returns(weights: &PortfolioWeights, panel: &ReturnsPanel) -> Result<Array1<f64>> {
  let w = weights.aligned_to(panel.assets())?;
  Ok(panel.returns().dot(&w))
}

fn population_std(values: &[f64]) -> f64 {
  values.iter().population_std_dev()
}

fn is_zero_std(std: f64, values: &[f64]) -> bool {
  let scale = values.iter().fold(0.0_f64, |m, v| m.max(v.abs())).max(1.0);
  std <= ZERO_STD_TOL * scale
}

/// Annualized performance metrics.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceEvaluator {
  /// Annual risk-free rate.
  pub risk_free: f64,
  pub frequency: Frequency,
  /// Returns strictly below this threshold count as downside.
  pub sortino_target: f64,
}

impl Default for PerformanceEvaluator {
  fn default() -> Self {
    Self {
      risk_free: 0.0,
      frequency: Frequency::Daily,
      sortino_target: 0.0,
    }
  }
}

impl PerformanceEvaluator {
  pub fn new(risk_free: f64, frequency: Frequency) -> Self {
    Self {
      risk_free,
      frequency,
      ..Self::default()
    }
  }

  pub fn with_sortino_target(mut self, target: f64) -> Self {
    self.sortino_target = target;
    self
  }

  fn periods(&self) -> f64 {
    self.frequency.periods_per_year()
  }

  /// `(1 + mean)^P - 1`.
  pub fn annualized_return(&self, returns: ArrayView1<'_, f64>) -> Result<f64> {
    let values = non_empty(returns)?;
    let mean = values.iter().mean();
    Ok((1.0 + mean).powf(self.periods()) - 1.0)
  }

  /// Population standard deviation scaled by `sqrt(P)`.
  pub fn annualized_volatility(&self, returns: ArrayView1<'_, f64>) -> Result<f64> {
    let values = non_empty(returns)?;
    Ok(population_std(&values) * self.periods().sqrt())
  }

  pub fn sharpe_ratio(&self, returns: ArrayView1<'_, f64>) -> Result<f64> {
    let values = non_empty(returns)?;
    let std = population_std(&values);
    if is_zero_std(std, &values) {
      return Err(PortfolioError::UndefinedRatio(
        "Sharpe ratio of a series with zero volatility".into(),
      ));
    }
    let excess = self.annualized_return(returns)? - self.risk_free;
    Ok(excess / (std * self.periods().sqrt()))
  }

  pub fn sortino_ratio(&self, returns: ArrayView1<'_, f64>) -> Result<f64> {
    let values = non_empty(returns)?;
    let downside: Vec<f64> = values
      .iter()
      .copied()
      .filter(|r| *r < self.sortino_target)
      .collect();
    if downside.is_empty() {
      return Err(PortfolioError::UndefinedRatio(format!(
        "Sortino ratio without returns below {}",
        self.sortino_target
      )));
    }

    let std = population_std(&downside);
    if is_zero_std(std, &downside) {
      return Err(PortfolioError::UndefinedRatio(
        "Sortino ratio with zero downside deviation".into(),
      ));
    }
    let excess = self.annualized_return(returns)? - self.risk_free;
    Ok(excess / (std * self.periods().sqrt()))
  }

  pub fn summary(&self, returns: ArrayView1<'_, f64>) -> Result<PerformanceSummary> {
    Ok(PerformanceSummary {
      annualized_return: self.annualized_return(returns)?,
      annualized_volatility: self.annualized_volatility(returns)?,
      sharpe_ratio: self.sharpe_ratio(returns)?,
      sortino_ratio: self.sortino_ratio(returns)?,
    })
  }

  /// Apply `weights` to `panel` and summarize the resulting series.
  pub fn evaluate(&self, weights: &PortfolioWeights, panel: &ReturnsPanel) -> Result<PerformanceSummary> {
    let returns = portfolio_returns(weights, panel)?;
    self.summary(returns.view())
  }
}

fn non_empty(returns: ArrayView1<'_, f64>) -> Result<Vec<f64>> {
  if returns.is_empty() {
    return Err(PortfolioError::InsufficientData(
      "performance metrics need at least one return".into(),
    ));
  }
  Ok(returns.to_vec())
}
