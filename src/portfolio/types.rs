//! # Portfolio Types
//!
//! $$
//! \mathbf{w}^\*=\arg\max_{\mathbf{w}} \frac{\mathbb E[R_p]-r_f}{\sigma_p}
//! $$
//!
//! Shared enums and value types passed between the pipeline stages.

use std::collections::HashSet;
use std::fmt::Display;
use std::str::FromStr;

use ndarray::Array1;
use serde::Deserialize;
use serde::Serialize;

use crate::error::PortfolioError;
use crate::error::Result;

/// Optimization objective.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Objective {
  /// Maximize `(w'mu - rf) / sqrt(w' Sigma w)`.
  #[default]
  MaxSharpe,
  /// Minimize `w' Sigma w`.
  MinVariance,
  /// Minimize variance subject to `w'mu = target`.
  TargetReturn { target: f64 },
  /// Maximize return subject to `sqrt(w' Sigma w) = target`.
  TargetRisk { target: f64 },
  /// Maximize `w'mu`, ties resolved towards lower variance.
  MaxReturn,
  /// Maximize `w'mu - risk_aversion / 2 * w' Sigma w`.
  Utility { risk_aversion: f64 },
}

impl FromStr for Objective {
  type Err = PortfolioError;

  /// Parses `max_sharpe`, `min_variance`, `max_return`, `target_return=<x>`,
  /// `target_risk=<x>` and `utility=<lambda>`.
  fn from_str(s: &str) -> Result<Self> {
    let lower = s.trim().to_lowercase();
    let (name, arg) = match lower.split_once('=') {
      Some((name, arg)) => (name.trim().to_string(), Some(arg.trim().to_string())),
      None => (lower.clone(), None),
    };

    let parse_arg = |arg: Option<String>| -> Result<f64> {
      let raw = arg.ok_or_else(|| {
        PortfolioError::InvalidMethod(format!("objective '{name}' needs a value, e.g. {name}=0.1"))
      })?;
      raw
        .parse::<f64>()
        .map_err(|_| PortfolioError::InvalidMethod(format!("bad objective value '{raw}'")))
    };

    match name.as_str() {
      "max_sharpe" | "sharpe" => Ok(Self::MaxSharpe),
      "min_variance" | "minrisk" | "min_risk" => Ok(Self::MinVariance),
      "max_return" | "maxret" => Ok(Self::MaxReturn),
      "target_return" => Ok(Self::TargetReturn {
        target: parse_arg(arg)?,
      }),
      "target_risk" => Ok(Self::TargetRisk {
        target: parse_arg(arg)?,
      }),
      "utility" => Ok(Self::Utility {
        risk_aversion: parse_arg(arg)?,
      }),
      _ => Err(PortfolioError::InvalidMethod(format!(
        "unknown objective '{s}'"
      ))),
    }
  }
}

/// Per-asset weight bounds applied uniformly to every asset.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
  pub lower: f64,
  pub upper: f64,
}

impl Default for Bounds {
  /// Long-only, no leverage.
  fn default() -> Self {
    Self {
      lower: 0.0,
      upper: 1.0,
    }
  }
}

impl Bounds {
  /// Checks that some weight vector summing to one fits inside the box.
  pub fn validate(&self, n_assets: usize) -> Result<()> {
    if !self.lower.is_finite() || !self.upper.is_finite() {
      return Err(PortfolioError::InvalidInput(
        "weight bounds must be finite".into(),
      ));
    }
    if self.lower > self.upper {
      return Err(PortfolioError::InvalidInput(format!(
        "lower bound {} exceeds upper bound {}",
        self.lower, self.upper
      )));
    }

    let n = n_assets as f64;
    if self.lower * n > 1.0 + 1e-12 || self.upper * n < 1.0 - 1e-12 {
      return Err(PortfolioError::InvalidInput(format!(
        "bounds [{}, {}] cannot satisfy the budget constraint with {n_assets} assets",
        self.lower, self.upper
      )));
    }

    Ok(())
  }
}

/// Sampling frequency of a price or return series.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
  #[default]
  Daily,
  Weekly,
  Monthly,
}

impl Frequency {
  /// Number of periods in a year, used for annualization.
  pub fn periods_per_year(self) -> f64 {
    match self {
      Frequency::Daily => 252.0,
      Frequency::Weekly => 52.0,
      Frequency::Monthly => 12.0,
    }
  }
}

impl FromStr for Frequency {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_lowercase().as_str() {
      "d" | "daily" => Ok(Self::Daily),
      "w" | "weekly" => Ok(Self::Weekly),
      "m" | "monthly" => Ok(Self::Monthly),
      _ => Err(PortfolioError::InvalidMethod(format!(
        "unknown frequency '{s}'"
      ))),
    }
  }
}

impl Display for Frequency {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Frequency::Daily => write!(f, "daily"),
      Frequency::Weekly => write!(f, "weekly"),
      Frequency::Monthly => write!(f, "monthly"),
    }
  }
}

pub(crate) fn ensure_unique(assets: &[String]) -> Result<()> {
  let mut seen = HashSet::with_capacity(assets.len());
  for asset in assets {
    if !seen.insert(asset.as_str()) {
      return Err(PortfolioError::InvalidInput(format!(
        "duplicate asset identifier '{asset}'"
      )));
    }
  }
  Ok(())
}

/// Asset weights in a fixed asset order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortfolioWeights {
  assets: Vec<String>,
  weights: Vec<f64>,
}

impl PortfolioWeights {
  pub fn new(assets: Vec<String>, weights: Vec<f64>) -> Result<Self> {
    if assets.len() != weights.len() {
      return Err(PortfolioError::AssetMismatch(format!(
        "{} assets but {} weights",
        assets.len(),
        weights.len()
      )));
    }
    ensure_unique(&assets)?;
    if weights.iter().any(|w| !w.is_finite()) {
      return Err(PortfolioError::InvalidInput(
        "weights must be finite".into(),
      ));
    }

    Ok(Self { assets, weights })
  }

  /// Equal weight `1/n` on every asset.
  pub fn equal(assets: Vec<String>) -> Result<Self> {
    if assets.is_empty() {
      return Err(PortfolioError::InsufficientData(
        "cannot build equal weights for zero assets".into(),
      ));
    }
    let w = 1.0 / assets.len() as f64;
    let weights = vec![w; assets.len()];
    Self::new(assets, weights)
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn values(&self) -> &[f64] {
    &self.weights
  }

  pub fn len(&self) -> usize {
    self.weights.len()
  }

  pub fn is_empty(&self) -> bool {
    self.weights.is_empty()
  }

  /// Weight for `asset`, if present.
  pub fn get(&self, asset: &str) -> Option<f64> {
    self
      .assets
      .iter()
      .position(|a| a == asset)
      .map(|i| self.weights[i])
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
    self
      .assets
      .iter()
      .map(String::as_str)
      .zip(self.weights.iter().copied())
  }

  pub fn sum(&self) -> f64 {
    self.weights.iter().sum()
  }

  /// Reorders the weights to match `assets`.
  ///
  /// Fails with [`PortfolioError::AssetMismatch`] when the two asset sets are
  /// not identical; nothing is dropped or zero-filled.
  pub fn aligned_to(&self, assets: &[String]) -> Result<Array1<f64>> {
    let missing: Vec<&str> = assets
      .iter()
      .filter(|a| self.get(a).is_none())
      .map(String::as_str)
      .collect();
    let extra: Vec<&str> = self
      .assets
      .iter()
      .filter(|a| !assets.contains(a))
      .map(String::as_str)
      .collect();

    if !missing.is_empty() || !extra.is_empty() {
      return Err(PortfolioError::AssetMismatch(format!(
        "missing weights for {missing:?}, weights for unknown assets {extra:?}"
      )));
    }

    Ok(
      assets
        .iter()
        .filter_map(|a| self.get(a))
        .collect::<Array1<f64>>(),
    )
  }
}

/// Output of a portfolio optimization run.
#[derive(Clone, Debug, PartialEq)]
pub struct PortfolioResult {
  /// Final portfolio weights.
  pub weights: PortfolioWeights,
  /// Model expected portfolio return `w'mu`.
  pub expected_return: f64,
  /// Model portfolio volatility `sqrt(w' Sigma w)`.
  pub volatility: f64,
  /// `(expected_return - risk_free) / volatility`.
  pub sharpe: f64,
}

/// Sweep metric of an efficient frontier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrontierMetric {
  #[default]
  Return,
  Risk,
}

/// One sampled portfolio on the frontier.
#[derive(Clone, Debug, PartialEq)]
pub struct FrontierPoint {
  /// Swept target value (return or risk, per the metric).
  pub target: f64,
  pub risk: f64,
  pub expected_return: f64,
  pub sharpe: f64,
  pub weights: PortfolioWeights,
  /// `false` for dominated points: below the minimum-variance return, or
  /// riskier than the maximum-return portfolio.
  pub efficient: bool,
}

/// Frontier points ordered by increasing target.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frontier {
  pub metric: FrontierMetric,
  pub points: Vec<FrontierPoint>,
}

impl Frontier {
  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  /// Efficient points only.
  pub fn efficient(&self) -> impl Iterator<Item = &FrontierPoint> {
    self.points.iter().filter(|p| p.efficient)
  }

  /// Point with the highest Sharpe ratio.
  pub fn max_sharpe(&self) -> Option<&FrontierPoint> {
    self
      .points
      .iter()
      .max_by(|a, b| a.sharpe.total_cmp(&b.sharpe))
  }
}

/// Realized performance metrics of a return series.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
  pub annualized_return: f64,
  pub annualized_volatility: f64,
  pub sharpe_ratio: f64,
  pub sortino_ratio: f64,
}

/// Randomly drawn feasible portfolios.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PortfolioCloud {
  pub samples: Vec<PortfolioResult>,
}

impl PortfolioCloud {
  pub fn len(&self) -> usize {
    self.samples.len()
  }

  pub fn is_empty(&self) -> bool {
    self.samples.is_empty()
  }

  pub fn max_sharpe(&self) -> Option<&PortfolioResult> {
    self
      .samples
      .iter()
      .max_by(|a, b| a.sharpe.total_cmp(&b.sharpe))
  }

  pub fn min_volatility(&self) -> Option<&PortfolioResult> {
    self
      .samples
      .iter()
      .min_by(|a, b| a.volatility.total_cmp(&b.volatility))
  }

  /// Share of samples whose Sharpe ratio does not beat `optimum`'s.
  pub fn dominated_share(&self, optimum: &PortfolioResult) -> f64 {
    if self.samples.is_empty() {
      return 0.0;
    }
    let tol = 1e-12 * optimum.sharpe.abs().max(1.0);
    let beaten = self
      .samples
      .iter()
      .filter(|s| s.sharpe <= optimum.sharpe + tol)
      .count();
    beaten as f64 / self.samples.len() as f64
  }
}
