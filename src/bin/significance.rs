use anyhow::{Context, Result};

use race_odds_model::cli;
use race_odds_model::pipeline;
use race_odds_model::regression::{self, group_term, significance_label};
use race_odds_model::report;
use race_odds_model::results;
use race_odds_model::tabular;

fn main() -> Result<()> {
    cli::init_tracing();
    let args = cli::args();
    let mut cfg = cli::load_config(&args)?;
    if let Some(reference) = cli::value_arg(&args, "--reference") {
        cfg.regression.reference_group = Some(reference);
    }
    if let Some(alpha) = cli::parse_arg::<f64>(&args, "--alpha") {
        cfg.regression.alpha = alpha;
        cfg.validate().context("invalid --alpha")?;
    }

    let matrix = tabular::read_positions(&cfg.positions_path())?;
    let roster = pipeline::load_roster(&cfg)?;
    let observations = results::observations(&matrix, &roster)?;
    println!(
        "{} entities x {} races = {} observations",
        matrix.entity_count(),
        matrix.race_count(),
        observations.len()
    );

    let analysis = regression::analyze(&observations, &roster, &cfg.regression)?;

    println!("Group significance in the full model (reference {}):", analysis.reference_group);
    for group in analysis.retained.iter().chain(&analysis.dropped) {
        if let Some(e) = analysis.full.term(&group_term(group)) {
            println!(
                "  {:<20} coef={:>8.4} p={:.6}  {}",
                group,
                e.estimate,
                e.p_value,
                significance_label(e.p_value)
            );
        }
    }
    println!();
    print!("{}", report::render_regression(&analysis));
    Ok(())
}
