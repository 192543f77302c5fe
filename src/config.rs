use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::DataError;

const DEFAULT_INIT_SCALE: f64 = 0.256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub odds_file: String,
    pub positions_file: String,
    pub parsed_odds_file: String,
    pub probabilities_file: String,
    pub rates_file: String,
    pub shape_file: String,
    pub regression_file: String,
    pub report_file: String,
    pub ingest: IngestConfig,
    pub estimator: EstimatorConfig,
    pub quantile: QuantileConfig,
    pub regression: RegressionConfig,
    pub monte_carlo: MonteCarloConfig,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Drop entities whose odds did not parse instead of failing stage 2.
    pub skip_unpriced: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Starting rate for a group is `init_scale * p`. Only affects convergence speed.
    pub init_scale: f64,
    pub init_floor: f64,
    pub lower_bound: f64,
    pub max_iterations: usize,
    pub ftol: f64,
    pub pgtol: f64,
    pub tie_tolerance: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            init_scale: DEFAULT_INIT_SCALE,
            init_floor: 1e-8,
            lower_bound: 1e-12,
            max_iterations: 10_000,
            ftol: 2.2e-9,
            pgtol: 1e-10,
            tie_tolerance: 1e-12,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantileConfig {
    pub clip_epsilon: f64,
}

impl Default for QuantileConfig {
    fn default() -> Self {
        Self {
            clip_epsilon: 1e-12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    pub alpha: f64,
    pub confidence: f64,
    /// Group used as the dropped dummy. Defaults to the last group in roster order.
    pub reference_group: Option<String>,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            confidence: 0.95,
            reference_group: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MonteCarloConfig {
    pub simulations: usize,
    pub races: usize,
    pub seed: Option<u64>,
    pub band_z: f64,
    pub top_entities: usize,
    pub parallel: bool,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            simulations: 10_000,
            races: 25,
            seed: None,
            band_z: 1.96,
            top_entities: 5,
            parallel: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("output"),
            odds_file: "odds_table1.csv".to_string(),
            positions_file: "positions.txt".to_string(),
            parsed_odds_file: "stage1_odds_parsed.csv".to_string(),
            probabilities_file: "stage2_probabilities.csv".to_string(),
            rates_file: "stage3_lambda.csv".to_string(),
            shape_file: "stage4_mu_sigma.csv".to_string(),
            regression_file: "stage5_regression.csv".to_string(),
            report_file: "monte_carlo_report.txt".to_string(),
            ingest: IngestConfig::default(),
            estimator: EstimatorConfig::default(),
            quantile: QuantileConfig::default(),
            regression: RegressionConfig::default(),
            monte_carlo: MonteCarloConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults, then the optional JSON file, then `RACE_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("read config {}", path.display()))?;
                serde_json::from_str::<PipelineConfig>(&raw)
                    .with_context(|| format!("parse config {}", path.display()))?
            }
            None => PipelineConfig::default(),
        };
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env(&mut self) {
        if let Some(dir) = env_nonempty("RACE_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_nonempty("RACE_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(n) = env_parse::<usize>("RACE_MC_SIMULATIONS") {
            self.monte_carlo.simulations = n;
        }
        if let Some(n) = env_parse::<usize>("RACE_MC_RACES") {
            self.monte_carlo.races = n;
        }
        if let Some(seed) = env_parse::<u64>("RACE_MC_SEED") {
            self.monte_carlo.seed = Some(seed);
        }
        if let Some(scale) = env_parse::<f64>("RACE_INIT_SCALE") {
            self.estimator.init_scale = scale;
        }
    }

    pub fn validate(&self) -> Result<(), DataError> {
        let est = &self.estimator;
        if !(est.init_scale.is_finite() && est.init_scale > 0.0) {
            return Err(invalid(format!("init_scale must be > 0, got {}", est.init_scale)));
        }
        if !(est.lower_bound.is_finite() && est.lower_bound > 0.0) {
            return Err(invalid(format!(
                "lower_bound must be > 0, got {}",
                est.lower_bound
            )));
        }
        if est.max_iterations == 0 {
            return Err(invalid("max_iterations must be at least 1".to_string()));
        }
        if !(est.tie_tolerance >= 0.0 && est.tie_tolerance < 1e-6) {
            return Err(invalid(format!(
                "tie_tolerance must be in [0, 1e-6), got {}",
                est.tie_tolerance
            )));
        }
        let eps = self.quantile.clip_epsilon;
        if !(eps > 0.0 && eps < 0.5) {
            return Err(invalid(format!("clip_epsilon must be in (0, 0.5), got {eps}")));
        }
        let reg = &self.regression;
        if !(reg.alpha > 0.0 && reg.alpha < 1.0) {
            return Err(invalid(format!("alpha must be in (0, 1), got {}", reg.alpha)));
        }
        if !(reg.confidence > 0.0 && reg.confidence < 1.0) {
            return Err(invalid(format!(
                "confidence must be in (0, 1), got {}",
                reg.confidence
            )));
        }
        let mc = &self.monte_carlo;
        if mc.simulations == 0 || mc.races == 0 {
            return Err(invalid(
                "monte carlo simulations and races must be at least 1".to_string(),
            ));
        }
        if !(mc.band_z.is_finite() && mc.band_z > 0.0) {
            return Err(invalid(format!("band_z must be > 0, got {}", mc.band_z)));
        }
        Ok(())
    }

    pub fn odds_path(&self) -> PathBuf {
        self.data_dir.join(&self.odds_file)
    }

    pub fn positions_path(&self) -> PathBuf {
        self.data_dir.join(&self.positions_file)
    }

    pub fn parsed_odds_path(&self) -> PathBuf {
        self.output_dir.join(&self.parsed_odds_file)
    }

    pub fn probabilities_path(&self) -> PathBuf {
        self.output_dir.join(&self.probabilities_file)
    }

    pub fn rates_path(&self) -> PathBuf {
        self.output_dir.join(&self.rates_file)
    }

    pub fn shape_path(&self) -> PathBuf {
        self.output_dir.join(&self.shape_file)
    }

    pub fn regression_path(&self) -> PathBuf {
        self.output_dir.join(&self.regression_file)
    }

    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join(&self.report_file)
    }
}

fn invalid(msg: String) -> DataError {
    DataError::InvalidConfig(msg)
}

fn env_nonempty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_nonempty(key).and_then(|v| v.parse::<T>().ok())
}
