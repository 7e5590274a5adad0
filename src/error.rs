//! Error types for meanvar.

use thiserror::Error;

/// Error type for every fallible operation in the crate.
///
/// Failures are always surfaced as one of these variants; no routine
/// substitutes NaN or zero for a result it could not compute.
#[derive(Debug, Error)]
pub enum PortfolioError {
  /// Not enough observations to compute the requested quantity.
  #[error("insufficient data: {0}")]
  InsufficientData(String),

  /// Unrecognized estimation method name.
  #[error("invalid method: {0}")]
  InvalidMethod(String),

  /// Covariance matrix is not positive definite within tolerance.
  #[error("covariance matrix is singular: {0}")]
  SingularCovariance(String),

  /// No weight vector under the constraints can reach the requested target.
  #[error("infeasible target: {0}")]
  InfeasibleTarget(String),

  /// The solver exhausted its iteration budget or lost feasibility.
  #[error("solver did not converge: {0}")]
  ConvergenceError(String),

  /// Asset sets (or dimensions) of two inputs do not match.
  #[error("asset mismatch: {0}")]
  AssetMismatch(String),

  /// A ratio whose denominator is zero or undefined.
  #[error("undefined ratio: {0}")]
  UndefinedRatio(String),

  /// A price provider has no data for the request.
  #[error("data unavailable: {0}")]
  DataUnavailable(String),

  /// Malformed input such as non-positive prices or inconsistent bounds.
  #[error("invalid input: {0}")]
  InvalidInput(String),

  /// Underlying I/O failure.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// Malformed file contents.
  #[error("parse error: {0}")]
  Parse(String),
}

/// Result type for meanvar operations.
pub type Result<T> = std::result::Result<T, PortfolioError>;
