use anyhow::Result;
use tracing::info;

use race_odds_model::cli;
use race_odds_model::pipeline::{self, Stage};

fn main() -> Result<()> {
    cli::init_tracing();
    let args = cli::args();
    let cfg = cli::load_config(&args)?;

    // Build whatever upstream snapshots are missing.
    let mut upstream = Vec::new();
    if !cfg.probabilities_path().exists() {
        if !cfg.parsed_odds_path().exists() {
            upstream.push(Stage::Ingest);
        }
        upstream.push(Stage::Normalize);
    }
    if !upstream.is_empty() || !cfg.rates_path().exists() {
        upstream.push(Stage::Rates);
        upstream.push(Stage::Shape);
    }
    if !upstream.is_empty() {
        info!(stages = ?upstream, "running missing upstream stages");
        pipeline::run_stages(&cfg, &upstream)?;
    }

    let report = pipeline::run_monte_carlo(&cfg)?;

    println!(
        "{:<24} {:>12} {:>12} {:>12}",
        "Entity", "Theoretical", "Empirical", "Difference"
    );
    for c in &report.comparisons {
        println!(
            "{:<24} {:>12.6} {:>12.6} {:>12.6}",
            c.entity, c.theoretical, c.empirical, c.difference
        );
    }
    println!();
    println!("Correlation: {:.6}  R2: {:.6}", report.correlation, report.r_squared);
    println!("MAE: {:.8}  RMSE: {:.8}", report.mae, report.rmse);
    println!(
        "KS p={:.4}  Wilcoxon p={:.4}  paired t p={:.4}",
        report.ks.p_value, report.wilcoxon.p_value, report.paired_t.p_value
    );
    println!(
        "Within band: {}/{} ({:.1}%)",
        report.within_band,
        report.comparisons.len(),
        report.fraction_within_band * 100.0
    );
    println!(
        "MODEL VALIDATION: {}",
        if report.valid() { "VALID" } else { "INVALID" }
    );
    println!("[INFO] report saved to {}", cfg.report_path().display());
    Ok(())
}
