use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use meanvar::io::read_price_panel;
use meanvar::io::write_frontier;
use meanvar::io::write_weights;
use meanvar::portfolio::EngineConfig;
use meanvar::portfolio::Objective;
use meanvar::portfolio::PipelineReport;
use meanvar::portfolio::PortfolioEngine;
use prettytable::row;
use prettytable::Table;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Mean-variance optimization of a price panel.
#[derive(Parser, Debug)]
#[command(name = "meanvar", version, about)]
struct Args {
  /// Price table, `date,<asset>,...`.
  #[arg(long)]
  prices: PathBuf,

  /// Engine configuration (TOML); defaults apply when omitted.
  #[arg(long)]
  config: Option<PathBuf>,

  /// Override the configured objective, e.g. `min_variance` or `target_return=0.001`.
  #[arg(long)]
  objective: Option<Objective>,

  /// Write the efficient frontier to this file.
  #[arg(long)]
  frontier: Option<PathBuf>,

  /// Write the optimal weights to this file.
  #[arg(long)]
  weights: Option<PathBuf>,

  /// Compare the optimum against a cloud of random portfolios.
  #[arg(long)]
  simulate: bool,
}

fn print_report(report: &PipelineReport) {
  let mut weights = Table::new();
  weights.add_row(row!["asset", "weight", "mean", "volatility"]);
  for (i, (asset, w)) in report.weights().iter().enumerate() {
    let mean = report.moments.mean()[i];
    let vol = report.moments.covariance()[[i, i]].sqrt();
    weights.add_row(row![asset, format!("{w:.4}"), format!("{mean:.6}"), format!("{vol:.6}")]);
  }
  weights.printstd();

  let p = &report.portfolio;
  let s = &report.performance;
  let mut summary = Table::new();
  summary.add_row(row!["expected return", format!("{:.6}", p.expected_return)]);
  summary.add_row(row!["volatility", format!("{:.6}", p.volatility)]);
  summary.add_row(row!["model sharpe", format!("{:.4}", p.sharpe)]);
  summary.add_row(row!["annualized return", format!("{:.4}", s.annualized_return)]);
  summary.add_row(row!["annualized volatility", format!("{:.4}", s.annualized_volatility)]);
  summary.add_row(row!["sharpe ratio", format!("{:.4}", s.sharpe_ratio)]);
  summary.add_row(row!["sortino ratio", format!("{:.4}", s.sortino_ratio)]);
  summary.printstd();
}

fn main() -> Result<()> {
  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("meanvar=info"));
  tracing_subscriber::fmt().with_env_filter(env_filter).init();
  let args = Args::parse();

  let mut config = match &args.config {
    Some(path) => EngineConfig::load(path)
      .with_context(|| format!("failed to load config {}", path.display()))?,
    None => EngineConfig::default(),
  };
  if let Some(objective) = args.objective {
    config.optimizer.objective = objective;
  }

  let prices = read_price_panel(&args.prices)
    .with_context(|| format!("failed to read prices from {}", args.prices.display()))?;
  let engine = PortfolioEngine::new(config);
  let report = engine.run(&prices).context("portfolio pipeline failed")?;
  print_report(&report);

  if args.simulate {
    let cloud = engine
      .simulate(&report.moments)
      .context("random portfolio simulation failed")?;
    let mut table = Table::new();
    table.add_row(row!["random portfolios", cloud.len()]);
    if let Some(best) = cloud.max_sharpe() {
      table.add_row(row!["best sampled sharpe", format!("{:.4}", best.sharpe)]);
    }
    if let Some(calm) = cloud.min_volatility() {
      table.add_row(row!["lowest sampled volatility", format!("{:.6}", calm.volatility)]);
    }
    table.add_row(row![
      "beaten by optimum",
      format!("{:.1}%", 100.0 * cloud.dominated_share(&report.portfolio))
    ]);
    table.printstd();
  }

  if let Some(path) = &args.weights {
    write_weights(path, report.weights())
      .with_context(|| format!("failed to write weights to {}", path.display()))?;
    info!(path = %path.display(), "weights written");
  }

  if let Some(path) = &args.frontier {
    let frontier = engine
      .frontier(&report.moments)
      .context("frontier generation failed")?;
    write_frontier(path, &frontier)
      .with_context(|| format!("failed to write frontier to {}", path.display()))?;
    info!(path = %path.display(), points = frontier.len(), "frontier written");
  }

  Ok(())
}
