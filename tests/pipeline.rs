use std::fs;
use std::path::PathBuf;

use race_odds_model::config::PipelineConfig;
use race_odds_model::lambda::RateEstimate;
use race_odds_model::normalize::ProbabilityRecord;
use race_odds_model::odds::ParsedOdds;
use race_odds_model::pipeline::{self, Stage};
use race_odds_model::quantile::ShapeParameters;
use race_odds_model::regression::{INTERCEPT, ROLE_TERM, RegressionRecord};
use race_odds_model::tabular;

fn fixtures_dir() -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path
}

fn config(output: &std::path::Path) -> PipelineConfig {
    PipelineConfig {
        data_dir: fixtures_dir(),
        output_dir: output.to_path_buf(),
        odds_file: "odds_table.csv".to_string(),
        positions_file: "positions.txt".to_string(),
        ..PipelineConfig::default()
    }
}

#[test]
fn all_stages_write_their_snapshots() {
    let out = tempfile::tempdir().expect("tempdir");
    let cfg = config(out.path());
    let run = pipeline::run_stages(&cfg, &Stage::DEFAULT).expect("pipeline should run");

    let summary = run.ingest.expect("stage 1 ran");
    assert_eq!(summary.rows, 6);
    assert!(summary.unpriced.is_empty());

    let parsed: Vec<ParsedOdds> = tabular::read_records(&cfg.parsed_odds_path()).unwrap();
    assert_eq!(parsed.len(), 6);
    assert!((parsed[0].raw_implied_probability.unwrap() - 9.0 / 11.0).abs() < 1e-12);
    assert!((parsed[4].raw_implied_probability.unwrap() - 1.0 / 12.0).abs() < 1e-12);

    let probs: Vec<ProbabilityRecord> = tabular::read_records(&cfg.probabilities_path()).unwrap();
    let sum: f64 = probs.iter().map(|p| p.normalized_probability).sum();
    assert!((sum - 1.0).abs() < 1e-9);

    let rates: Vec<RateEstimate> = tabular::read_records(&cfg.rates_path()).unwrap();
    assert_eq!(rates.len(), 6);
    assert!(rates.iter().all(|r| r.rate > 0.0));
    // Perez and Sainz are both quoted 10/1.
    assert_eq!(rates[1].rate.to_bits(), rates[3].rate.to_bits());
    assert!(rates.iter().all(|r| r.absolute_error < 1e-6));

    let shape: Vec<ShapeParameters> = tabular::read_records(&cfg.shape_path()).unwrap();
    let sigma = shape[0].scale;
    assert!(sigma > 0.0);
    assert!(shape.iter().all(|s| s.scale == sigma));
    // Verstappen is the favourite and gets the smallest location.
    let min = shape
        .iter()
        .min_by(|a, b| a.location.total_cmp(&b.location))
        .unwrap();
    assert_eq!(min.entity, "Max Verstappen");

    let regression: Vec<RegressionRecord> =
        tabular::read_records(&cfg.regression_path()).unwrap();
    let full: Vec<&RegressionRecord> = regression.iter().filter(|r| r.model == "full").collect();
    assert_eq!(full.len(), 4);
    assert_eq!(full[0].term, INTERCEPT);
    assert_eq!(full[1].term, ROLE_TERM);
    assert!(regression.iter().any(|r| r.model == "reduced"));
}

#[test]
fn selected_stages_only_touch_their_outputs() {
    let out = tempfile::tempdir().expect("tempdir");
    let cfg = config(out.path());
    pipeline::run_stages(&cfg, &[Stage::Normalize, Stage::Ingest]).expect("stages 1-2");
    assert!(cfg.probabilities_path().exists());
    assert!(!cfg.rates_path().exists());

    // Stage 3 alone picks up the stage 2 snapshot.
    let run = pipeline::run_stages(&cfg, &[Stage::Rates]).expect("stage 3");
    let fit = run.rates.expect("stage 3 ran");
    assert!(fit.grouped.converged);
    assert_eq!(fit.grouped.groups.len(), 5);
}

#[test]
fn unpriced_entity_fails_stage_two_unless_skipped() {
    let out = tempfile::tempdir().expect("tempdir");
    let mut cfg = config(out.path());
    cfg.odds_file = "odds_unpriced.csv".to_string();

    let summary = pipeline::run_stage1(&cfg).expect("stage 1").1;
    assert_eq!(summary.unpriced, vec!["Sergio Perez".to_string()]);
    let text = fs::read_to_string(cfg.parsed_odds_path()).unwrap();
    assert!(text.contains("Sergio Perez,SP,\n"));

    let err = pipeline::run_stage2(&cfg).unwrap_err();
    assert!(format!("{err:#}").contains("Sergio Perez"));

    cfg.ingest.skip_unpriced = true;
    let records = pipeline::run_stage2(&cfg).expect("skipping unpriced");
    assert_eq!(records.len(), 3);
    assert!((records[0].raw_implied_probability - 0.5).abs() < 1e-12);
}

#[test]
fn monte_carlo_stage_writes_report() {
    let out = tempfile::tempdir().expect("tempdir");
    let mut cfg = config(out.path());
    cfg.monte_carlo.simulations = 400;
    cfg.monte_carlo.races = 5;
    cfg.monte_carlo.seed = Some(17);

    let run = pipeline::run_stages(&cfg, &[Stage::Ingest, Stage::Normalize, Stage::Rates, Stage::MonteCarlo])
        .expect("pipeline with monte carlo");
    let mc = run.monte_carlo.expect("monte carlo ran");
    assert_eq!(mc.trials, 2000);
    assert_eq!(mc.comparisons[0].entity, "Max Verstappen");

    let text = fs::read_to_string(cfg.report_path()).expect("report written");
    assert!(text.contains("MONTE CARLO VALIDATION REPORT"));
    assert!(text.contains("Seed: 17"));
    assert!(text.contains("MODEL VALIDATION:"));
}

#[test]
fn missing_odds_column_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("odds_table.csv"), "team,driver,price\nA,x,2/1\n").unwrap();
    let cfg = PipelineConfig {
        data_dir: dir.path().to_path_buf(),
        output_dir: dir.path().join("out"),
        odds_file: "odds_table.csv".to_string(),
        ..PipelineConfig::default()
    };
    let err = pipeline::run_stage1(&cfg).unwrap_err();
    assert!(format!("{err:#}").contains("missing required column"));
}
