//! # Traits
//!
//! $$
//! \text{collaborators: } \mathcal{P}:(\text{asset},[t_0,t_1])\to(t,p_t),\quad
//! \mathcal{F}:(t,p_t)_{t\le T}\to(\hat p_t,\underline p_t,\overline p_t)_{t>T}
//! $$
//!
//! Seams for the data sources that live outside the numerical core.

use chrono::NaiveDate;

use crate::error::PortfolioError;
use crate::error::Result;
use crate::portfolio::Frequency;

/// Source of historical prices.
pub trait PriceProvider {
  /// Ordered `(date, price)` observations of `asset` in `[start, end]`.
  ///
  /// Implementations fail with [`PortfolioError::DataUnavailable`] for
  /// unknown symbols or empty ranges.
  fn price_series(
    &self,
    asset: &str,
    start: NaiveDate,
    end: NaiveDate,
    frequency: Frequency,
  ) -> Result<Vec<(NaiveDate, f64)>>;

  /// Fetch several assets at once.
  fn price_panel(
    &self,
    assets: &[String],
    start: NaiveDate,
    end: NaiveDate,
    frequency: Frequency,
  ) -> Result<Vec<(String, Vec<(NaiveDate, f64)>)>> {
    assets
      .iter()
      .map(|a| Ok((a.clone(), self.price_series(a, start, end, frequency)?)))
      .collect()
  }
}

/// Point forecast with an uncertainty band, aligned to future dates.
#[derive(Clone, Debug, PartialEq)]
pub struct Forecast {
  pub dates: Vec<NaiveDate>,
  pub point: Vec<f64>,
  pub lower: Vec<f64>,
  pub upper: Vec<f64>,
}

impl Forecast {
  pub fn new(dates: Vec<NaiveDate>, point: Vec<f64>, lower: Vec<f64>, upper: Vec<f64>) -> Result<Self> {
    let n = dates.len();
    if point.len() != n || lower.len() != n || upper.len() != n {
      return Err(PortfolioError::InvalidInput(format!(
        "forecast has {n} dates but {} / {} / {} point / lower / upper values",
        point.len(),
        lower.len(),
        upper.len()
      )));
    }
    Ok(Self {
      dates,
      point,
      lower,
      upper,
    })
  }

  pub fn len(&self) -> usize {
    self.dates.len()
  }

  pub fn is_empty(&self) -> bool {
    self.dates.is_empty()
  }
}

/// Univariate forecasting model fitted per asset.
pub trait Forecaster {
  fn forecast(&self, history: &[(NaiveDate, f64)]) -> Result<Forecast>;
}
