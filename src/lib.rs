//! # meanvar
//!
//! $$
//! \max_{\mathbf w}\ \frac{\mathbf w^\top\mu-r_f}{\sqrt{\mathbf w^\top\Sigma\mathbf w}}
//! \quad\text{s.t.}\quad \mathbf 1^\top\mathbf w=1,\ l\le w_i\le u
//! $$
//!
//! Mean-variance portfolio construction from price panels.

pub mod error;
pub mod io;
pub mod portfolio;
pub mod traits;

pub use error::PortfolioError;
pub use error::Result;

pub mod prelude {
  pub use crate::error::PortfolioError;
  pub use crate::error::Result;
  pub use crate::io::read_price_panel;
  pub use crate::io::read_weights;
  pub use crate::io::write_frontier;
  pub use crate::io::write_price_panel;
  pub use crate::io::write_weights;
  pub use crate::io::CsvPriceProvider;
  pub use crate::portfolio::*;
  pub use crate::traits::Forecast;
  pub use crate::traits::Forecaster;
  pub use crate::traits::PriceProvider;
}
