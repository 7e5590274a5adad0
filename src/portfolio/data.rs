//! # Portfolio Data
//!
//! $$
//! r_{i,t} = \frac{p_{i,t}}{p_{i,t-1}} - 1
//! $$
//!
//! Price and return panels on a shared date index, and the conversions
//! between them.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::NaiveDate;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::Axis;
use tracing::warn;

use super::types::ensure_unique;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::traits::Forecast;

fn check_index(index: &[NaiveDate]) -> Result<()> {
  if index.windows(2).any(|w| w[0] >= w[1]) {
    return Err(PortfolioError::InvalidInput(
      "date index must be strictly increasing".into(),
    ));
  }
  Ok(())
}

/// Asset prices on a common, strictly increasing date index.
///
/// Rows are dates, columns are assets.
#[derive(Clone, Debug, PartialEq)]
pub struct PricePanel {
  assets: Vec<String>,
  index: Vec<NaiveDate>,
  prices: Array2<f64>,
}

impl PricePanel {
  /// Build a panel from an already aligned price matrix.
  pub fn new(assets: Vec<String>, index: Vec<NaiveDate>, prices: Array2<f64>) -> Result<Self> {
    if prices.dim() != (index.len(), assets.len()) {
      return Err(PortfolioError::AssetMismatch(format!(
        "price matrix is {:?} but index has {} dates and {} assets",
        prices.dim(),
        index.len(),
        assets.len()
      )));
    }
    ensure_unique(&assets)?;
    check_index(&index)?;

    if let Some(((t, i), p)) = prices
      .indexed_iter()
      .find(|(_, p)| !p.is_finite() || **p <= 0.0)
    {
      return Err(PortfolioError::InvalidInput(format!(
        "price of {} on {} is {p}; prices must be positive and finite",
        assets[i], index[t]
      )));
    }

    Ok(Self {
      assets,
      index,
      prices,
    })
  }

  /// Align per-asset series on the dates they all share.
  ///
  /// Dates missing from any series are dropped from every asset, so the
  /// resulting panel is gap-free.
  pub fn align(series: Vec<(String, Vec<(NaiveDate, f64)>)>) -> Result<Self> {
    if series.is_empty() {
      return Err(PortfolioError::InsufficientData(
        "no price series to align".into(),
      ));
    }

    let lookups: Vec<(String, BTreeMap<NaiveDate, f64>)> = series
      .into_iter()
      .map(|(asset, points)| (asset, points.into_iter().collect()))
      .collect();

    let mut common: BTreeSet<NaiveDate> = lookups[0].1.keys().copied().collect();
    for (_, lookup) in &lookups[1..] {
      common.retain(|d| lookup.contains_key(d));
    }

    let total = lookups.iter().map(|(_, l)| l.len()).max().unwrap_or(0);
    if common.len() < total {
      warn!(
        kept = common.len(),
        longest = total,
        "dropping dates not shared by every asset"
      );
    }

    let index: Vec<NaiveDate> = common.into_iter().collect();
    let mut prices = Array2::<f64>::zeros((index.len(), lookups.len()));
    for (j, (_, lookup)) in lookups.iter().enumerate() {
      for (t, d) in index.iter().enumerate() {
        prices[[t, j]] = lookup[d];
      }
    }

    let assets = lookups.into_iter().map(|(a, _)| a).collect();
    Self::new(assets, index, prices)
  }

  /// Price panel built from the point estimates of per-asset forecasts.
  ///
  /// Each forecast becomes one column; forecasts are aligned on their shared
  /// dates like [`PricePanel::align`].
  pub fn from_forecasts(forecasts: Vec<(String, Forecast)>) -> Result<Self> {
    let series = forecasts
      .into_iter()
      .map(|(asset, f)| {
        let points = f.dates.into_iter().zip(f.point).collect();
        (asset, points)
      })
      .collect();
    Self::align(series)
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn index(&self) -> &[NaiveDate] {
    &self.index
  }

  pub fn prices(&self) -> &Array2<f64> {
    &self.prices
  }

  pub fn n_assets(&self) -> usize {
    self.assets.len()
  }

  pub fn n_periods(&self) -> usize {
    self.index.len()
  }

  /// Price series of one asset.
  pub fn column(&self, asset: &str) -> Option<ArrayView1<'_, f64>> {
    self
      .assets
      .iter()
      .position(|a| a == asset)
      .map(|j| self.prices.column(j))
  }

  /// Sub-panel restricted to `[start, end]` (inclusive).
  pub fn slice_dates(&self, start: NaiveDate, end: NaiveDate) -> Result<Self> {
    let rows: Vec<usize> = self
      .index
      .iter()
      .enumerate()
      .filter(|(_, d)| **d >= start && **d <= end)
      .map(|(t, _)| t)
      .collect();

    let index = rows.iter().map(|&t| self.index[t]).collect();
    let prices = self.prices.select(Axis(0), &rows);
    Self::new(self.assets.clone(), index, prices)
  }
}

/// Periodic returns on a shared, gap-free date index.
///
/// Rows are dates, columns are assets. Returns are dimensionless fractions.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnsPanel {
  assets: Vec<String>,
  index: Vec<NaiveDate>,
  returns: Array2<f64>,
}

impl ReturnsPanel {
  pub fn new(assets: Vec<String>, index: Vec<NaiveDate>, returns: Array2<f64>) -> Result<Self> {
    if returns.dim() != (index.len(), assets.len()) {
      return Err(PortfolioError::AssetMismatch(format!(
        "return matrix is {:?} but index has {} dates and {} assets",
        returns.dim(),
        index.len(),
        assets.len()
      )));
    }
    ensure_unique(&assets)?;
    check_index(&index)?;
    if returns.iter().any(|r| !r.is_finite()) {
      return Err(PortfolioError::InvalidInput(
        "returns must be finite".into(),
      ));
    }

    Ok(Self {
      assets,
      index,
      returns,
    })
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn index(&self) -> &[NaiveDate] {
    &self.index
  }

  pub fn returns(&self) -> &Array2<f64> {
    &self.returns
  }

  pub fn n_assets(&self) -> usize {
    self.assets.len()
  }

  pub fn n_periods(&self) -> usize {
    self.index.len()
  }

  /// Return series of one asset.
  pub fn column(&self, asset: &str) -> Option<ArrayView1<'_, f64>> {
    self
      .assets
      .iter()
      .position(|a| a == asset)
      .map(|j| self.returns.column(j))
  }

  /// Rebuild prices by cumulative product, starting from `initial` at
  /// `start` (the date preceding the first return).
  pub fn compound(&self, start: NaiveDate, initial: &[f64]) -> Result<PricePanel> {
    if initial.len() != self.n_assets() {
      return Err(PortfolioError::AssetMismatch(format!(
        "{} initial prices for {} assets",
        initial.len(),
        self.n_assets()
      )));
    }

    let (n_periods, n_assets) = self.returns.dim();
    let mut prices = Array2::<f64>::zeros((n_periods + 1, n_assets));
    prices.row_mut(0).assign(&Array1::from(initial.to_vec()));
    for t in 0..n_periods {
      for j in 0..n_assets {
        prices[[t + 1, j]] = prices[[t, j]] * (1.0 + self.returns[[t, j]]);
      }
    }

    let mut index = Vec::with_capacity(n_periods + 1);
    index.push(start);
    index.extend_from_slice(&self.index);
    PricePanel::new(self.assets.clone(), index, prices)
  }
}

fn period_returns(prices: &PricePanel, f: impl Fn(f64, f64) -> f64) -> Result<ReturnsPanel> {
  if prices.n_assets() == 0 {
    return Err(PortfolioError::InsufficientData(
      "price panel has no assets".into(),
    ));
  }
  if prices.n_periods() < 2 {
    return Err(PortfolioError::InsufficientData(format!(
      "{} needs at least 2 observations, got {}",
      prices.assets()[0],
      prices.n_periods()
    )));
  }

  let p = prices.prices();
  let (n_periods, n_assets) = p.dim();
  let mut out = Array2::<f64>::zeros((n_periods - 1, n_assets));
  for t in 1..n_periods {
    for j in 0..n_assets {
      out[[t - 1, j]] = f(p[[t - 1, j]], p[[t, j]]);
    }
  }

  ReturnsPanel::new(
    prices.assets().to_vec(),
    prices.index()[1..].to_vec(),
    out,
  )
}

/// Simple returns `p_t / p_{t-1} - 1`; the first date is dropped.
pub fn simple_returns(prices: &PricePanel) -> Result<ReturnsPanel> {
  period_returns(prices, |prev, cur| cur / prev - 1.0)
}

/// Log returns `ln(p_t / p_{t-1})`; the first date is dropped.
pub fn log_returns(prices: &PricePanel) -> Result<ReturnsPanel> {
  period_returns(prices, |prev, cur| (cur / prev).ln())
}
