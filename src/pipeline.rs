use std::fs;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::Local;
use tracing::info;

use crate::config::PipelineConfig;
use crate::lambda::{self, RateEstimate, RateFit};
use crate::montecarlo::{self, MonteCarloInput, MonteCarloReport};
use crate::normalize::{self, ProbabilityRecord};
use crate::odds::{self, IngestSummary, ParsedOdds};
use crate::quantile::{self, ShapeParameters};
use crate::regression::{self, SignificanceAnalysis};
use crate::report;
use crate::results::{self, Roster};
use crate::tabular;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Ingest = 1,
    Normalize = 2,
    Rates = 3,
    Shape = 4,
    Regression = 5,
    MonteCarlo = 6,
}

impl Stage {
    pub const DEFAULT: [Stage; 5] = [
        Stage::Ingest,
        Stage::Normalize,
        Stage::Rates,
        Stage::Shape,
        Stage::Regression,
    ];
}

impl FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "1" | "ingest" => Stage::Ingest,
            "2" | "normalize" => Stage::Normalize,
            "3" | "rates" | "lambda" => Stage::Rates,
            "4" | "shape" => Stage::Shape,
            "5" | "regression" => Stage::Regression,
            "6" | "mc" | "montecarlo" => Stage::MonteCarlo,
            other => bail!("unknown stage {other:?} (expected 1-6)"),
        })
    }
}

/// What each executed stage produced.
#[derive(Debug, Default)]
pub struct PipelineRun {
    pub ingest: Option<IngestSummary>,
    pub probabilities: Option<Vec<ProbabilityRecord>>,
    pub rates: Option<RateFit>,
    pub shape: Option<Vec<ShapeParameters>>,
    pub regression: Option<SignificanceAnalysis>,
    pub monte_carlo: Option<MonteCarloReport>,
}

pub fn run_stage1(cfg: &PipelineConfig) -> Result<(Vec<ParsedOdds>, IngestSummary)> {
    let path = cfg.odds_path();
    info!(path = %path.display(), "stage 1: ingest odds");
    let table = tabular::read_odds_table(&path)?;
    let (parsed, summary) = odds::ingest(&table);
    tabular::write_records(&cfg.parsed_odds_path(), &parsed)?;
    info!(
        rows = summary.rows,
        priced = summary.priced,
        unpriced = summary.unpriced.len(),
        "stage 1 written"
    );
    Ok((parsed, summary))
}

pub fn run_stage2(cfg: &PipelineConfig) -> Result<Vec<ProbabilityRecord>> {
    let path = cfg.parsed_odds_path();
    info!(path = %path.display(), "stage 2: normalize probabilities");
    let parsed: Vec<ParsedOdds> = tabular::read_records(&path)?;
    let records = normalize::normalize_records(&parsed, cfg.ingest.skip_unpriced)
        .context("stage 2 normalize")?;
    let raw: Vec<f64> = records.iter().map(|r| r.raw_implied_probability).collect();
    info!(
        entities = records.len(),
        overround = normalize::overround(&raw),
        "stage 2 written"
    );
    tabular::write_records(&cfg.probabilities_path(), &records)?;
    Ok(records)
}

pub fn run_stage3(cfg: &PipelineConfig) -> Result<RateFit> {
    let path = cfg.probabilities_path();
    info!(path = %path.display(), "stage 3: estimate rates");
    let records: Vec<ProbabilityRecord> = tabular::read_records(&path)?;
    let fit = lambda::estimate_records(&records, &cfg.estimator).context("stage 3 rates")?;
    tabular::write_records(&cfg.rates_path(), &fit.estimates)?;
    Ok(fit)
}

pub fn run_stage4(cfg: &PipelineConfig) -> Result<Vec<ShapeParameters>> {
    let path = cfg.probabilities_path();
    info!(path = %path.display(), "stage 4: quantile-mapped shape parameters");
    let records: Vec<ProbabilityRecord> = tabular::read_records(&path)?;
    let shape = quantile::map_records(&records, &cfg.quantile).context("stage 4 shape")?;
    tabular::write_records(&cfg.shape_path(), &shape)?;
    Ok(shape)
}

/// Roster from the odds table, in listing order.
pub fn load_roster(cfg: &PipelineConfig) -> Result<Roster> {
    let table = tabular::read_odds_table(&cfg.odds_path())?;
    Ok(Roster::from_pairs(
        table.iter().map(|r| (r.group.as_str(), r.entity.as_str())),
    ))
}

pub fn run_stage5(cfg: &PipelineConfig) -> Result<SignificanceAnalysis> {
    let path = cfg.positions_path();
    info!(path = %path.display(), "stage 5: regression");
    let matrix = tabular::read_positions(&path)?;
    let roster = load_roster(cfg)?;
    let observations = results::observations(&matrix, &roster).context("stage 5 join")?;
    let analysis =
        regression::analyze(&observations, &roster, &cfg.regression).context("stage 5 fit")?;
    tabular::write_records(&cfg.regression_path(), &analysis.records())?;
    Ok(analysis)
}

/// Monte Carlo validation over the stage 3 snapshot; writes the text report.
pub fn run_monte_carlo(cfg: &PipelineConfig) -> Result<MonteCarloReport> {
    let path = cfg.rates_path();
    info!(path = %path.display(), "monte carlo validation");
    let estimates: Vec<RateEstimate> = tabular::read_records(&path)?;
    let input = MonteCarloInput::from_estimates(&estimates).context("monte carlo input")?;
    let report = montecarlo::validate(&input, &cfg.monte_carlo)?;

    let text = report::render_monte_carlo(&report, Local::now());
    let out = cfg.report_path();
    if let Some(dir) = out.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    fs::write(&out, text).with_context(|| format!("write report {}", out.display()))?;
    info!(path = %out.display(), "monte carlo report written");
    Ok(report)
}

/// Run the selected stages in order. Each stage reads its predecessor's snapshot.
pub fn run_stages(cfg: &PipelineConfig, stages: &[Stage]) -> Result<PipelineRun> {
    let mut selected = stages.to_vec();
    selected.sort();
    selected.dedup();

    let mut run = PipelineRun::default();
    for stage in selected {
        match stage {
            Stage::Ingest => run.ingest = Some(run_stage1(cfg)?.1),
            Stage::Normalize => run.probabilities = Some(run_stage2(cfg)?),
            Stage::Rates => run.rates = Some(run_stage3(cfg)?),
            Stage::Shape => run.shape = Some(run_stage4(cfg)?),
            Stage::Regression => run.regression = Some(run_stage5(cfg)?),
            Stage::MonteCarlo => run.monte_carlo = Some(run_monte_carlo(cfg)?),
        }
    }
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_parse() {
        assert_eq!("3".parse::<Stage>().unwrap(), Stage::Rates);
        assert_eq!("MC".parse::<Stage>().unwrap(), Stage::MonteCarlo);
        assert!("9".parse::<Stage>().is_err());
    }
}
