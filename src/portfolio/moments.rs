//! # Moment Estimation
//!
//! $$
//! \hat\mu_i = \frac1T\sum_t r_{i,t},\qquad
//! \hat\Sigma_{ij} = \sum_t \omega_t (r_{i,t}-\bar r_i)(r_{j,t}-\bar r_j)
//! $$
//!
//! Expected-return vectors and covariance matrices estimated from a returns
//! panel.

use std::str::FromStr;

use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::Axis;
use ndarray_stats::CorrelationExt;
use serde::Deserialize;
use serde::Serialize;
use statrs::statistics::Data;
use statrs::statistics::Median;

use super::data::ReturnsPanel;
use super::types::ensure_unique;
use super::types::Frequency;
use crate::error::PortfolioError;
use crate::error::Result;

/// Default EWMA decay factor.
pub const DEFAULT_DECAY: f64 = 0.94;

/// Expected-return estimator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeanMethod {
  /// Arithmetic mean.
  #[default]
  Mean,
  /// `(prod(1 + r))^(1/n) - 1`.
  Geometric,
  Median,
  /// Exponentially weighted mean, recent observations weigh more.
  Ewma,
}

impl FromStr for MeanMethod {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_lowercase().as_str() {
      "mean" | "hist" | "arithmetic" => Ok(Self::Mean),
      "geometric" | "geo" => Ok(Self::Geometric),
      "median" => Ok(Self::Median),
      "ewma" => Ok(Self::Ewma),
      _ => Err(PortfolioError::InvalidMethod(format!(
        "unknown mean method '{s}'"
      ))),
    }
  }
}

/// Covariance estimator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovarianceMethod {
  /// Unbiased sample covariance.
  #[default]
  Sample,
  /// Exponentially weighted covariance.
  Ewma,
  /// Ledoit-Wolf shrinkage towards a scaled identity.
  LedoitWolf,
}

impl FromStr for CovarianceMethod {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_lowercase().as_str() {
      "sample" | "hist" => Ok(Self::Sample),
      "ewma" => Ok(Self::Ewma),
      "ledoit_wolf" | "ledoit-wolf" | "ledoit" | "lw" => Ok(Self::LedoitWolf),
      _ => Err(PortfolioError::InvalidMethod(format!(
        "unknown covariance method '{s}'"
      ))),
    }
  }
}

/// Expected returns and covariance of a set of assets.
#[derive(Clone, Debug, PartialEq)]
pub struct MomentEstimate {
  assets: Vec<String>,
  mean: Array1<f64>,
  covariance: Array2<f64>,
}

impl MomentEstimate {
  /// Validates dimensions, symmetry and the variance diagonal.
  pub fn new(assets: Vec<String>, mean: Array1<f64>, covariance: Array2<f64>) -> Result<Self> {
    let n = assets.len();
    if n == 0 {
      return Err(PortfolioError::InsufficientData(
        "moment estimate needs at least one asset".into(),
      ));
    }
    if mean.len() != n || covariance.dim() != (n, n) {
      return Err(PortfolioError::AssetMismatch(format!(
        "{n} assets, {} expected returns, covariance {:?}",
        mean.len(),
        covariance.dim()
      )));
    }
    ensure_unique(&assets)?;

    if mean.iter().chain(covariance.iter()).any(|v| !v.is_finite()) {
      return Err(PortfolioError::InvalidInput(
        "moments must be finite".into(),
      ));
    }

    let scale = covariance
      .iter()
      .fold(0.0_f64, |m, v| m.max(v.abs()))
      .max(f64::MIN_POSITIVE);
    for i in 0..n {
      if covariance[[i, i]] < 0.0 {
        return Err(PortfolioError::InvalidInput(format!(
          "negative variance for {}",
          assets[i]
        )));
      }
      for j in (i + 1)..n {
        if (covariance[[i, j]] - covariance[[j, i]]).abs() > 1e-10 * scale {
          return Err(PortfolioError::InvalidInput(format!(
            "covariance is not symmetric at ({i}, {j})"
          )));
        }
      }
    }

    Ok(Self {
      assets,
      mean,
      covariance,
    })
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn mean(&self) -> &Array1<f64> {
    &self.mean
  }

  pub fn covariance(&self) -> &Array2<f64> {
    &self.covariance
  }

  pub fn n_assets(&self) -> usize {
    self.assets.len()
  }

  /// Scale per-period moments to annual ones.
  pub fn annualize(&self, frequency: Frequency) -> Self {
    let p = frequency.periods_per_year();
    Self {
      assets: self.assets.clone(),
      mean: &self.mean * p,
      covariance: &self.covariance * p,
    }
  }

  /// `w' mu`.
  pub fn expected_return(&self, w: ArrayView1<'_, f64>) -> f64 {
    w.dot(&self.mean)
  }

  /// `sqrt(w' Sigma w)`.
  pub fn volatility(&self, w: ArrayView1<'_, f64>) -> f64 {
    w.dot(&self.covariance.dot(&w)).max(0.0).sqrt()
  }
}

/// Moment estimator configuration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentEstimator {
  pub mean: MeanMethod,
  pub covariance: CovarianceMethod,
  /// Decay `d` of the EWMA weights `(1-d) d^k`.
  pub decay: f64,
}

impl Default for MomentEstimator {
  fn default() -> Self {
    Self {
      mean: MeanMethod::Mean,
      covariance: CovarianceMethod::Sample,
      decay: DEFAULT_DECAY,
    }
  }
}

impl MomentEstimator {
  pub fn new(mean: MeanMethod, covariance: CovarianceMethod) -> Self {
    Self {
      mean,
      covariance,
      ..Self::default()
    }
  }

  /// Parse both method names, failing with
  /// [`PortfolioError::InvalidMethod`] on unknown ones.
  pub fn from_names(mean: &str, covariance: &str) -> Result<Self> {
    Ok(Self::new(mean.parse()?, covariance.parse()?))
  }

  pub fn with_decay(mut self, decay: f64) -> Self {
    self.decay = decay;
    self
  }

  pub fn estimate(&self, panel: &ReturnsPanel) -> Result<MomentEstimate> {
    let mean = self.expected_returns(panel)?;
    let covariance = self.covariance(panel)?;
    MomentEstimate::new(panel.assets().to_vec(), mean, covariance)
  }

  pub fn expected_returns(&self, panel: &ReturnsPanel) -> Result<Array1<f64>> {
    let r = panel.returns();
    if r.nrows() == 0 || r.ncols() == 0 {
      return Err(PortfolioError::InsufficientData(
        "returns panel is empty".into(),
      ));
    }

    match self.mean {
      MeanMethod::Mean => r
        .mean_axis(Axis(0))
        .ok_or_else(|| PortfolioError::InsufficientData("returns panel is empty".into())),
      MeanMethod::Geometric => r
        .axis_iter(Axis(1))
        .zip(panel.assets())
        .map(|(col, asset)| geometric_mean(col, asset))
        .collect(),
      MeanMethod::Median => Ok(
        r.axis_iter(Axis(1))
          .map(|col| Data::new(col.to_vec()).median())
          .collect(),
      ),
      MeanMethod::Ewma => {
        let w = ewma_weights(r.nrows(), self.decay)?;
        Ok(w.dot(r))
      }
    }
  }

  pub fn covariance(&self, panel: &ReturnsPanel) -> Result<Array2<f64>> {
    let r = panel.returns();
    if r.nrows() < 2 {
      return Err(PortfolioError::InsufficientData(format!(
        "covariance needs at least 2 observations, got {}",
        r.nrows()
      )));
    }
    if r.ncols() == 0 {
      return Err(PortfolioError::InsufficientData(
        "returns panel has no assets".into(),
      ));
    }

    match self.covariance {
      CovarianceMethod::Sample => r
        .t()
        .cov(1.0)
        .map_err(|e| PortfolioError::InsufficientData(e.to_string())),
      CovarianceMethod::Ewma => ewma_covariance(r, self.decay),
      CovarianceMethod::LedoitWolf => Ok(ledoit_wolf(r)),
    }
  }
}

fn geometric_mean(col: ArrayView1<'_, f64>, asset: &str) -> Result<f64> {
  if let Some(r) = col.iter().find(|r| **r <= -1.0) {
    return Err(PortfolioError::InvalidInput(format!(
      "{asset} has a return of {r}; geometric mean needs returns above -100%"
    )));
  }
  let mean_log = col.iter().map(|r| r.ln_1p()).sum::<f64>() / col.len() as f64;
  Ok(mean_log.exp_m1())
}

/// Weights `(1-d) d^k`, `k = 0` on the last row, normalized to sum to one.
fn ewma_weights(n: usize, decay: f64) -> Result<Array1<f64>> {
  if !(decay > 0.0 && decay < 1.0) {
    return Err(PortfolioError::InvalidInput(format!(
      "ewma decay must lie in (0, 1), got {decay}"
    )));
  }

  let raw = Array1::from_iter((0..n).map(|t| (1.0 - decay) * decay.powi((n - 1 - t) as i32)));
  let total = raw.sum();
  Ok(raw / total)
}

fn ewma_covariance(r: &Array2<f64>, decay: f64) -> Result<Array2<f64>> {
  let w = ewma_weights(r.nrows(), decay)?;
  let centre = w.dot(r);
  let centred = r - &centre;
  let weighted = &centred * &w.view().insert_axis(Axis(1));
  Ok(weighted.t().dot(&centred))
}

/// Ledoit-Wolf shrinkage of the (biased) sample covariance towards
/// `mu * I`, with `mu` the average variance.
fn ledoit_wolf(r: &Array2<f64>) -> Array2<f64> {
  let (n_obs, n_assets) = r.dim();
  let n = n_obs as f64;
  let p = n_assets as f64;

  let centre = r.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(n_assets));
  let x = r - &centre;
  let emp = x.t().dot(&x) / n;
  let mu = emp.diag().sum() / p;

  let x2 = x.mapv(|v| v * v);
  let beta_raw = x2.t().dot(&x2).sum();
  let delta_raw = emp.mapv(|v| v * v).sum();

  let beta = (beta_raw / n - delta_raw) / (p * n);
  let delta = (delta_raw - 2.0 * mu * emp.diag().sum() + p * mu * mu) / p;
  let beta = beta.min(delta);
  let shrinkage = if delta > 0.0 { beta / delta } else { 0.0 };

  let mut shrunk = &emp * (1.0 - shrinkage);
  for i in 0..n_assets {
    shrunk[[i, i]] += shrinkage * mu;
  }
  shrunk
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use approx::assert_relative_eq;
  use chrono::NaiveDate;
  use ndarray::array;

  use super::*;

  fn panel(returns: Array2<f64>) -> ReturnsPanel {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let index = (0..returns.nrows())
      .map(|t| start + chrono::Duration::days(t as i64))
      .collect();
    let assets = (0..returns.ncols()).map(|j| format!("A{j}")).collect();
    ReturnsPanel::new(assets, index, returns).unwrap()
  }

  fn two_assets() -> ReturnsPanel {
    panel(array![[0.01, 0.02], [-0.02, 0.01], [0.03, -0.01]])
  }

  #[test]
  fn mean_method_matches_hand_computation() {
    let est = MomentEstimator::default().estimate(&two_assets()).unwrap();
    assert_abs_diff_eq!(est.mean()[0], 0.006_666_7, epsilon = 1e-6);
    assert_abs_diff_eq!(est.mean()[1], 0.006_666_7, epsilon = 1e-6);

    let cov = est.covariance();
    assert_eq!(cov.dim(), (2, 2));
    assert!(cov[[0, 0]] > 0.0 && cov[[1, 1]] > 0.0);
    assert_relative_eq!(cov[[0, 1]], cov[[1, 0]]);
    // var of [0.01, -0.02, 0.03] with n-1
    assert_relative_eq!(cov[[0, 0]], 0.000_633_333_333, max_relative = 1e-8);
  }

  #[test]
  fn geometric_and_median_means() {
    let p = two_assets();
    let geo = MomentEstimator::new(MeanMethod::Geometric, CovarianceMethod::Sample)
      .expected_returns(&p)
      .unwrap();
    let expected = (1.01_f64 * 0.98 * 1.03).powf(1.0 / 3.0) - 1.0;
    assert_relative_eq!(geo[0], expected, max_relative = 1e-12);

    let med = MomentEstimator::new(MeanMethod::Median, CovarianceMethod::Sample)
      .expected_returns(&p)
      .unwrap();
    assert_relative_eq!(med[0], 0.01);
    assert_relative_eq!(med[1], 0.01);
  }

  #[test]
  fn ewma_weights_favour_recent_rows() {
    let w = ewma_weights(4, 0.5).unwrap();
    assert_relative_eq!(w.sum(), 1.0, epsilon = 1e-12);
    assert!(w[3] > w[2] && w[2] > w[1] && w[1] > w[0]);
    assert_relative_eq!(w[3] / w[2], 2.0, epsilon = 1e-12);
  }

  #[test]
  fn ewma_covariance_is_symmetric_psd_diagonal() {
    let est = MomentEstimator::new(MeanMethod::Ewma, CovarianceMethod::Ewma)
      .estimate(&two_assets())
      .unwrap();
    let cov = est.covariance();
    assert_relative_eq!(cov[[0, 1]], cov[[1, 0]], epsilon = 1e-15);
    assert!(cov[[0, 0]] > 0.0);
    assert!(cov[[0, 0]] * cov[[1, 1]] >= cov[[0, 1]] * cov[[0, 1]]);
  }

  #[test]
  fn ewma_rejects_bad_decay() {
    let err = MomentEstimator::new(MeanMethod::Mean, CovarianceMethod::Ewma)
      .with_decay(1.0)
      .estimate(&two_assets());
    assert!(matches!(err, Err(PortfolioError::InvalidInput(_))));
  }

  #[test]
  fn ledoit_wolf_shrinks_off_diagonal() {
    let p = panel(array![
      [0.01, 0.011, -0.004],
      [-0.02, -0.018, 0.006],
      [0.03, 0.028, 0.001],
      [0.002, 0.004, -0.003],
      [-0.011, -0.009, 0.002]
    ]);
    let lw = MomentEstimator::new(MeanMethod::Mean, CovarianceMethod::LedoitWolf)
      .covariance(&p)
      .unwrap();

    let x = p.returns() - &p.returns().mean_axis(Axis(0)).unwrap();
    let emp = x.t().dot(&x) / 5.0;

    assert!(lw[[0, 1]].abs() <= emp[[0, 1]].abs() + 1e-15);
    assert_relative_eq!(lw.diag().sum(), emp.diag().sum(), max_relative = 1e-12);
  }

  #[test]
  fn single_row_is_insufficient_for_covariance() {
    let p = panel(array![[0.01, 0.02]]);
    let err = MomentEstimator::default().estimate(&p);
    assert!(matches!(err, Err(PortfolioError::InsufficientData(_))));
  }

  #[test]
  fn unknown_method_names_fail() {
    assert!(matches!(
      MomentEstimator::from_names("mode", "sample"),
      Err(PortfolioError::InvalidMethod(_))
    ));
    assert!(matches!(
      MomentEstimator::from_names("mean", "garch"),
      Err(PortfolioError::InvalidMethod(_))
    ));
    assert_eq!(
      MomentEstimator::from_names("hist", "ledoit").unwrap(),
      MomentEstimator::new(MeanMethod::Mean, CovarianceMethod::LedoitWolf)
    );
  }

  #[test]
  fn annualize_scales_by_periods() {
    let est = MomentEstimator::default().estimate(&two_assets()).unwrap();
    let ann = est.annualize(Frequency::Weekly);
    assert_relative_eq!(ann.mean()[0], est.mean()[0] * 52.0);
    assert_relative_eq!(ann.covariance()[[0, 1]], est.covariance()[[0, 1]] * 52.0);
  }

  #[test]
  fn rejects_asymmetric_covariance() {
    let err = MomentEstimate::new(
      vec!["A".into(), "B".into()],
      array![0.1, 0.2],
      array![[0.04, 0.01], [0.02, 0.09]],
    );
    assert!(matches!(err, Err(PortfolioError::InvalidInput(_))));
  }
}
