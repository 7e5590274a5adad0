//! # Portfolio
//!
//! $$
//! \sigma_p^2 = \mathbf{w}^\top \Sigma \mathbf{w}
//! $$
//!
//! Mean-variance pipeline: returns, moments, constrained optimization,
//! efficient frontiers, random-portfolio clouds and realized performance.

pub mod data;
pub mod engine;
pub mod frontier;
pub mod moments;
pub mod optimizers;
pub mod performance;
mod qp;
pub mod simulation;
pub mod types;

pub use data::log_returns;
pub use data::simple_returns;
pub use data::PricePanel;
pub use data::ReturnsPanel;
pub use engine::EngineConfig;
pub use engine::EstimatorConfig;
pub use engine::PipelineReport;
pub use engine::PortfolioEngine;
pub use frontier::FrontierGenerator;
pub use moments::CovarianceMethod;
pub use moments::MeanMethod;
pub use moments::MomentEstimate;
pub use moments::MomentEstimator;
pub use moments::DEFAULT_DECAY;
pub use optimizers::optimize;
pub use optimizers::OptimizerConfig;
pub use optimizers::PortfolioOptimizer;
pub use performance::portfolio_returns;
pub use performance::PerformanceEvaluator;
pub use simulation::RandomPortfolios;
pub use types::Bounds;
pub use types::Frequency;
pub use types::Frontier;
pub use types::FrontierMetric;
pub use types::FrontierPoint;
pub use types::Objective;
pub use types::PerformanceSummary;
pub use types::PortfolioCloud;
pub use types::PortfolioResult;
pub use types::PortfolioWeights;
