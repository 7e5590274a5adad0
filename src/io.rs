//! # Persistence
//!
//! $$
//! \texttt{date},a_1,\dots,a_n\quad\mapsto\quad P\in\mathbb R_{>0}^{T\times n}
//! $$
//!
//! Comma-separated files for price panels, weights and frontiers, plus a
//! directory-backed [`PriceProvider`].

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use chrono::Datelike;
use chrono::NaiveDate;
use ndarray::Array2;
use tracing::debug;

use crate::error::PortfolioError;
use crate::error::Result;
use crate::portfolio::Frequency;
use crate::portfolio::Frontier;
use crate::portfolio::PortfolioWeights;
use crate::portfolio::PricePanel;
use crate::traits::PriceProvider;

const DATE_FORMAT: &str = "%Y-%m-%d";

fn parse_date(raw: &str, line: usize) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
    .map_err(|e| PortfolioError::Parse(format!("line {line}: bad date '{raw}': {e}")))
}

fn parse_f64(raw: &str, line: usize) -> Result<f64> {
  raw
    .trim()
    .parse::<f64>()
    .map_err(|_| PortfolioError::Parse(format!("line {line}: bad number '{raw}'")))
}

/// Non-empty lines with their 1-based line numbers.
fn data_lines(reader: impl BufRead) -> Result<Vec<(usize, String)>> {
  let mut out = Vec::new();
  for (i, line) in reader.lines().enumerate() {
    let line = line?;
    if !line.trim().is_empty() {
      out.push((i + 1, line));
    }
  }
  Ok(out)
}

fn split_fields(line: &str) -> Vec<&str> {
  line.split(',').map(str::trim).collect()
}

/// Parse a `date,<asset>,...` table.
pub fn parse_price_panel(reader: impl BufRead) -> Result<PricePanel> {
  let lines = data_lines(reader)?;
  let ((_, header), rows) = lines
    .split_first()
    .ok_or_else(|| PortfolioError::Parse("empty price file".into()))?;

  let fields = split_fields(header);
  if fields.len() < 2 || !fields[0].eq_ignore_ascii_case("date") {
    return Err(PortfolioError::Parse(
      "price header must be 'date,<asset>,...'".into(),
    ));
  }
  let assets: Vec<String> = fields[1..].iter().map(|s| s.to_string()).collect();

  let mut index = Vec::with_capacity(rows.len());
  let mut values = Vec::with_capacity(rows.len() * assets.len());
  for (line_no, line) in rows {
    let fields = split_fields(line);
    if fields.len() != assets.len() + 1 {
      return Err(PortfolioError::Parse(format!(
        "line {line_no}: expected {} fields, found {}",
        assets.len() + 1,
        fields.len()
      )));
    }
    index.push(parse_date(fields[0], *line_no)?);
    for raw in &fields[1..] {
      values.push(parse_f64(raw, *line_no)?);
    }
  }

  let prices = Array2::from_shape_vec((index.len(), assets.len()), values)
    .map_err(|e| PortfolioError::Parse(format!("price table shape: {e}")))?;
  PricePanel::new(assets, index, prices)
}

pub fn read_price_panel(path: impl AsRef<Path>) -> Result<PricePanel> {
  let path = path.as_ref();
  let panel = parse_price_panel(BufReader::new(File::open(path)?))?;
  debug!(
    path = %path.display(),
    assets = panel.n_assets(),
    periods = panel.n_periods(),
    "loaded price panel"
  );
  Ok(panel)
}

pub fn write_price_panel(path: impl AsRef<Path>, panel: &PricePanel) -> Result<()> {
  let mut out = BufWriter::new(File::create(path)?);
  writeln!(out, "date,{}", panel.assets().join(","))?;
  for (t, date) in panel.index().iter().enumerate() {
    let row: Vec<String> = panel.prices().row(t).iter().map(|p| p.to_string()).collect();
    writeln!(out, "{},{}", date.format(DATE_FORMAT), row.join(","))?;
  }
  out.flush()?;
  Ok(())
}

pub fn write_weights(path: impl AsRef<Path>, weights: &PortfolioWeights) -> Result<()> {
  let mut out = BufWriter::new(File::create(path)?);
  writeln!(out, "asset,weight")?;
  for (asset, w) in weights.iter() {
    writeln!(out, "{asset},{w}")?;
  }
  out.flush()?;
  Ok(())
}

pub fn read_weights(path: impl AsRef<Path>) -> Result<PortfolioWeights> {
  let lines = data_lines(BufReader::new(File::open(path)?))?;
  let ((_, header), rows) = lines
    .split_first()
    .ok_or_else(|| PortfolioError::Parse("empty weights file".into()))?;
  if split_fields(header) != ["asset", "weight"] {
    return Err(PortfolioError::Parse(
      "weights header must be 'asset,weight'".into(),
    ));
  }

  let mut assets = Vec::with_capacity(rows.len());
  let mut weights = Vec::with_capacity(rows.len());
  for (line_no, line) in rows {
    match split_fields(line).as_slice() {
      [asset, w] => {
        assets.push(asset.to_string());
        weights.push(parse_f64(w, *line_no)?);
      }
      other => {
        return Err(PortfolioError::Parse(format!(
          "line {line_no}: expected 2 fields, found {}",
          other.len()
        )))
      }
    }
  }
  PortfolioWeights::new(assets, weights)
}

/// One row per frontier point followed by its weights, one column per asset.
pub fn write_frontier(path: impl AsRef<Path>, frontier: &Frontier) -> Result<()> {
  let mut out = BufWriter::new(File::create(path)?);
  let assets = frontier
    .points
    .first()
    .map(|p| p.weights.assets().join(","))
    .unwrap_or_default();
  writeln!(out, "target,risk,return,sharpe,efficient,{assets}")?;

  for p in &frontier.points {
    let weights: Vec<String> = p.weights.values().iter().map(|w| w.to_string()).collect();
    writeln!(
      out,
      "{},{},{},{},{},{}",
      p.target,
      p.risk,
      p.expected_return,
      p.sharpe,
      p.efficient,
      weights.join(",")
    )?;
  }
  out.flush()?;
  Ok(())
}

/// Keep the last observation of each ISO week or calendar month.
fn resample(points: Vec<(NaiveDate, f64)>, frequency: Frequency) -> Vec<(NaiveDate, f64)> {
  let bucket = |d: NaiveDate| -> (i32, u32) {
    match frequency {
      Frequency::Daily => (d.year(), d.ordinal()),
      Frequency::Weekly => (d.iso_week().year(), d.iso_week().week()),
      Frequency::Monthly => (d.year(), d.month()),
    }
  };

  let mut last: BTreeMap<(i32, u32), (NaiveDate, f64)> = BTreeMap::new();
  for (d, p) in points {
    last.insert(bucket(d), (d, p));
  }
  last.into_values().collect()
}

/// Reads `<root>/<ASSET>.csv` files with `date,close` columns.
#[derive(Clone, Debug)]
pub struct CsvPriceProvider {
  root: PathBuf,
}

impl CsvPriceProvider {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  fn path_of(&self, asset: &str) -> PathBuf {
    self.root.join(format!("{asset}.csv"))
  }
}

impl PriceProvider for CsvPriceProvider {
  fn price_series(
    &self,
    asset: &str,
    start: NaiveDate,
    end: NaiveDate,
    frequency: Frequency,
  ) -> Result<Vec<(NaiveDate, f64)>> {
    let path = self.path_of(asset);
    let file = File::open(&path).map_err(|e| {
      PortfolioError::DataUnavailable(format!("no price file for '{asset}' at {}: {e}", path.display()))
    })?;

    let lines = data_lines(BufReader::new(file))?;
    let rows = match lines.split_first() {
      Some(((_, header), rows)) if split_fields(header) == ["date", "close"] => rows,
      _ => {
        return Err(PortfolioError::Parse(format!(
          "{} must start with a 'date,close' header",
          path.display()
        )))
      }
    };

    let mut points = Vec::with_capacity(rows.len());
    for (line_no, line) in rows {
      let (raw_date, raw_close) = line
        .split_once(',')
        .ok_or_else(|| PortfolioError::Parse(format!("line {line_no}: expected 'date,close'")))?;
      let date = parse_date(raw_date, *line_no)?;
      if date >= start && date <= end {
        points.push((date, parse_f64(raw_close, *line_no)?));
      }
    }
    points.sort_by_key(|(d, _)| *d);
    points.dedup_by_key(|(d, _)| *d);

    if points.is_empty() {
      return Err(PortfolioError::DataUnavailable(format!(
        "no prices for '{asset}' between {start} and {end}"
      )));
    }
    Ok(resample(points, frequency))
  }
}
