//! # Portfolio Engine
//!
//! $$
//! \mathbf{w}^\* = \operatorname{Optimize}(\hat\mu, \hat\Sigma),\qquad
//! (\hat\mu,\hat\Sigma)=\operatorname{Estimate}(r),\qquad r=\operatorname{Returns}(p)
//! $$
//!
//! High-level orchestration of the returns, moments, optimization, frontier
//! and performance stages under one explicit configuration.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use tracing::info;

use super::data::log_returns;
use super::data::simple_returns;
use super::data::PricePanel;
use super::data::ReturnsPanel;
use super::frontier::FrontierGenerator;
use super::moments::CovarianceMethod;
use super::moments::MeanMethod;
use super::moments::MomentEstimate;
use super::moments::MomentEstimator;
use super::moments::DEFAULT_DECAY;
use super::optimizers::OptimizerConfig;
use super::optimizers::PortfolioOptimizer;
use super::performance::PerformanceEvaluator;
use super::simulation::RandomPortfolios;
use super::types::Frontier;
use super::types::PerformanceSummary;
use super::types::PortfolioCloud;
use super::types::PortfolioResult;
use super::types::PortfolioWeights;
use crate::error::PortfolioError;
use crate::error::Result;

/// Returns and moment estimation settings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
  pub mean: MeanMethod,
  pub covariance: CovarianceMethod,
  /// EWMA decay, used by the `ewma` methods only.
  pub decay: f64,
  /// Use log returns instead of simple returns.
  pub log_returns: bool,
  /// Scale moments to annual figures using the performance frequency.
  pub annualize: bool,
}

impl Default for EstimatorConfig {
  fn default() -> Self {
    Self {
      mean: MeanMethod::Mean,
      covariance: CovarianceMethod::Sample,
      decay: DEFAULT_DECAY,
      log_returns: false,
      annualize: false,
    }
  }
}

impl EstimatorConfig {
  pub fn estimator(&self) -> MomentEstimator {
    MomentEstimator::new(self.mean, self.covariance).with_decay(self.decay)
  }
}

/// Runtime configuration for [`PortfolioEngine`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub estimator: EstimatorConfig,
  pub optimizer: OptimizerConfig,
  pub frontier: FrontierGenerator,
  pub simulation: RandomPortfolios,
  pub performance: PerformanceEvaluator,
}

impl EngineConfig {
  /// Parse a TOML document; missing sections and keys take their defaults.
  pub fn from_toml_str(raw: &str) -> Result<Self> {
    toml::from_str(raw).map_err(|e| PortfolioError::Parse(format!("engine config: {e}")))
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self> {
    Self::from_toml_str(&fs::read_to_string(path)?)
  }

  pub fn to_toml_string(&self) -> Result<String> {
    toml::to_string_pretty(self).map_err(|e| PortfolioError::Parse(format!("engine config: {e}")))
  }
}

/// Everything one pipeline run produces.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineReport {
  pub returns: ReturnsPanel,
  pub moments: MomentEstimate,
  pub portfolio: PortfolioResult,
  /// In-sample realized performance of the optimal weights.
  pub performance: PerformanceSummary,
}

impl PipelineReport {
  pub fn weights(&self) -> &PortfolioWeights {
    &self.portfolio.weights
  }
}

/// Single entry point for the mean-variance pipeline.
#[derive(Clone, Debug, Default)]
pub struct PortfolioEngine {
  config: EngineConfig,
}

impl PortfolioEngine {
  pub fn new(config: EngineConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn returns(&self, prices: &PricePanel) -> Result<ReturnsPanel> {
    if self.config.estimator.log_returns {
      log_returns(prices)
    } else {
      simple_returns(prices)
    }
  }

  pub fn moments(&self, returns: &ReturnsPanel) -> Result<MomentEstimate> {
    let moments = self.config.estimator.estimator().estimate(returns)?;
    if self.config.estimator.annualize {
      Ok(moments.annualize(self.config.performance.frequency))
    } else {
      Ok(moments)
    }
  }

  /// Factorize the problem once for several objectives or a frontier.
  pub fn prepare(&self, moments: &MomentEstimate) -> Result<PortfolioOptimizer> {
    PortfolioOptimizer::from_config(moments, &self.config.optimizer)
  }

  pub fn optimize(&self, moments: &MomentEstimate) -> Result<PortfolioResult> {
    self.prepare(moments)?.optimize(self.config.optimizer.objective)
  }

  pub fn frontier(&self, moments: &MomentEstimate) -> Result<Frontier> {
    self.config.frontier.sweep(&self.prepare(moments)?)
  }

  /// Random feasible portfolios under the configured bounds.
  pub fn simulate(&self, moments: &MomentEstimate) -> Result<PortfolioCloud> {
    self.config.simulation.sample(&self.prepare(moments)?)
  }

  pub fn evaluate(&self, weights: &PortfolioWeights, returns: &ReturnsPanel) -> Result<PerformanceSummary> {
    self.config.performance.evaluate(weights, returns)
  }

  /// Prices to returns, moments, optimal weights and their realized metrics.
  pub fn run(&self, prices: &PricePanel) -> Result<PipelineReport> {
    let returns = self.returns(prices)?;
    let moments = self.moments(&returns)?;
    let portfolio = self.optimize(&moments)?;
    let performance = self.evaluate(&portfolio.weights, &returns)?;

    info!(
      assets = moments.n_assets(),
      periods = returns.n_periods(),
      objective = ?self.config.optimizer.objective,
      expected_return = portfolio.expected_return,
      volatility = portfolio.volatility,
      "pipeline finished"
    );

    Ok(PipelineReport {
      returns,
      moments,
      portfolio,
      performance,
    })
  }
}
