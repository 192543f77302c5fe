use std::path::PathBuf;

use anyhow::{Context, Result};

use race_odds_model::cli;
use race_odds_model::export;
use race_odds_model::pipeline::{self, Stage};
use race_odds_model::report;

fn main() -> Result<()> {
    cli::init_tracing();
    let args = cli::args();
    if cli::has_flag(&args, "--help") || cli::has_flag(&args, "-h") {
        print_usage();
        return Ok(());
    }

    let cfg = cli::load_config(&args)?;
    let requested = cli::list_arg(&args, "--stages");
    let stages: Vec<Stage> = if requested.is_empty() {
        Stage::DEFAULT.to_vec()
    } else {
        requested
            .iter()
            .map(|s| s.parse::<Stage>())
            .collect::<Result<_>>()
            .context("parse --stages")?
    };

    let run = pipeline::run_stages(&cfg, &stages)?;

    if let Some(summary) = &run.ingest {
        println!(
            "Stage 1: {} rows, {} priced, {} unpriced",
            summary.rows,
            summary.priced,
            summary.unpriced.len()
        );
        for name in &summary.unpriced {
            println!("  [WARN] no usable odds for {name}");
        }
    }
    if let Some(records) = &run.probabilities {
        let sum: f64 = records.iter().map(|r| r.normalized_probability).sum();
        println!("Stage 2: {} entities, normalized sum {:.12}", records.len(), sum);
    }
    if let Some(fit) = &run.rates {
        println!(
            "Stage 3: {} groups, converged={}, objective={:.3e}, max |error|={:.3e}",
            fit.grouped.groups.len(),
            fit.grouped.converged,
            fit.grouped.objective,
            fit.max_abs_error
        );
        if fit.grouped.used_fallback {
            println!("  [WARN] optimizer did not converge; initial rates were kept");
        }
    }
    if let Some(shape) = &run.shape
        && let Some(first) = shape.first()
    {
        println!("Stage 4: {} entities, sigma={:.6}", shape.len(), first.scale);
    }
    if let Some(analysis) = &run.regression {
        print!("{}", report::render_regression(analysis));
    }
    if let Some(mc) = &run.monte_carlo {
        println!(
            "Monte Carlo: correlation={:.6} within band {}/{} -> {}",
            mc.correlation,
            mc.within_band,
            mc.comparisons.len(),
            if mc.valid() { "VALID" } else { "INVALID" }
        );
    }

    if let Some(path) = cli::value_arg(&args, "--xlsx").map(PathBuf::from) {
        let exported = export::export_snapshots(&path, &export::snapshot_sheets(&cfg))?;
        println!(
            "[INFO] workbook {} ({} sheets, {} rows)",
            path.display(),
            exported.sheets,
            exported.rows
        );
    }
    Ok(())
}

fn print_usage() {
    println!("race_odds_model [--stages 1 2 3 4 5] [--config cfg.json] [--data-dir DIR]");
    println!("                [--output-dir DIR] [--xlsx book.xlsx] [--skip-unpriced]");
    println!("                [--init-scale X]");
    println!("Stage 6 (mc) runs the Monte Carlo validation over the stage 3 snapshot.");
}
