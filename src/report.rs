use chrono::{DateTime, Local};

use crate::hypothesis::TestOutcome;
use crate::montecarlo::MonteCarloReport;
use crate::regression::{ConfidenceInterval, OlsFit, SignificanceAnalysis, significance_label};

const RULE: &str = "============================================================";

fn pass_fail(outcome: &TestOutcome) -> &'static str {
    if MonteCarloReport::passes(outcome) { "PASS" } else { "FAIL" }
}

fn model_summary(out: &mut String, label: &str, fit: &OlsFit) {
    out.push_str(&format!("{label} model\n"));
    out.push_str(&format!(
        "  observations={} parameters={} df_resid={}\n",
        fit.observations,
        fit.parameters(),
        fit.df_resid
    ));
    out.push_str(&format!(
        "  R2={:.4} adj R2={:.4} F={:.4} (p={:.6}) logLik={:.3} AIC={:.3}\n",
        fit.r_squared, fit.adj_r_squared, fit.f_statistic, fit.f_p_value, fit.log_likelihood, fit.aic
    ));
    out.push_str(&format!(
        "  {:<28} {:>10} {:>10} {:>8} {:>10}  {}\n",
        "term", "estimate", "std.err", "t", "p", "significance"
    ));
    for (term, e) in fit.terms.iter().zip(&fit.estimates) {
        out.push_str(&format!(
            "  {:<28} {:>10.4} {:>10.4} {:>8.3} {:>10.6}  {}\n",
            term,
            e.estimate,
            e.std_error,
            e.t_value,
            e.p_value,
            significance_label(e.p_value)
        ));
    }
}

fn interval_line(out: &mut String, label: &str, ci: Option<ConfidenceInterval>) {
    match ci {
        Some(ci) => out.push_str(&format!(
            "  {label}: [{:.4}, {:.4}] at {:.0}% (t*={:.4})\n",
            ci.lower,
            ci.upper,
            ci.level * 100.0,
            ci.critical
        )),
        None => out.push_str(&format!("  {label}: n/a\n")),
    }
}

pub fn render_regression(analysis: &SignificanceAnalysis) -> String {
    let mut out = String::new();
    out.push_str(RULE);
    out.push_str("\nREGRESSION VALIDATION\n");
    out.push_str(RULE);
    out.push('\n');
    out.push_str(&format!("Reference group: {}\n\n", analysis.reference_group));

    model_summary(&mut out, "Full", &analysis.full);
    out.push('\n');
    model_summary(&mut out, "Reduced", &analysis.reduced);

    out.push_str("\nSecondary-role coefficient interval\n");
    interval_line(&mut out, "full", analysis.role_ci_full);
    interval_line(&mut out, "reduced", analysis.role_ci_reduced);

    out.push_str(&format!("\nRetained groups: {}\n", join_or_none(&analysis.retained)));
    out.push_str(&format!("Dropped groups: {}\n", join_or_none(&analysis.dropped)));
    out.push_str(&format!(
        "AIC difference (full - reduced): {:.3}{}\n",
        analysis.aic_difference,
        if analysis.reduced_improves {
            ""
        } else {
            "  [reduced model does not improve]"
        }
    ));
    out
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

pub fn render_monte_carlo(report: &MonteCarloReport, generated_at: DateTime<Local>) -> String {
    let mut out = String::new();
    out.push_str(RULE);
    out.push_str("\nMONTE CARLO VALIDATION REPORT\n");
    out.push_str(RULE);
    out.push('\n');
    out.push_str(&format!(
        "Generated: {}\n",
        generated_at.format("%Y-%m-%d %H:%M:%S")
    ));
    out.push_str(&format!(
        "Simulations: {}  Races: {}  Entities: {}  Seed: {}\n",
        report.simulations,
        report.races,
        report.comparisons.len(),
        report.seed
    ));
    out.push_str(&format!("Total trials per entity: {}\n\n", report.trials));

    out.push_str(&format!(
        "{:<24} {:>12} {:>12} {:>12} {:>12}  {}\n",
        "Entity", "Theoretical", "Empirical", "Difference", "Rel Error %", "Band"
    ));
    for c in &report.comparisons {
        out.push_str(&format!(
            "{:<24} {:>12.6} {:>12.6} {:>12.6} {:>12.2}  {}\n",
            c.entity,
            c.theoretical,
            c.empirical,
            c.difference,
            c.relative_error_pct,
            if c.within_band { "in" } else { "OUT" }
        ));
    }

    out.push_str(&format!("\nCorrelation: {:.6}\n", report.correlation));
    out.push_str(&format!("R-squared: {:.6}\n", report.r_squared));
    out.push_str(&format!("Mean absolute error: {:.8}\n", report.mae));
    out.push_str(&format!("Root mean square error: {:.8}\n\n", report.rmse));

    for (name, outcome) in [
        ("Kolmogorov-Smirnov", &report.ks),
        ("Wilcoxon signed-rank", &report.wilcoxon),
        ("Paired t-test", &report.paired_t),
    ] {
        out.push_str(&format!(
            "{name}: statistic={:.6} p={:.6} {}\n",
            outcome.statistic,
            outcome.p_value,
            pass_fail(outcome)
        ));
    }

    out.push_str(&format!(
        "\nWithin 95% binomial band: {}/{} ({:.1}%), expected ~95% for a valid model\n",
        report.within_band,
        report.comparisons.len(),
        report.fraction_within_band * 100.0
    ));

    if !report.profiles.is_empty() {
        out.push_str("\nPosition distribution\n");
    }
    for p in &report.profiles {
        out.push_str(&format!(
            "{}: theoretical={:.6} rate={:.6}\n",
            p.entity, p.theoretical, p.rate
        ));
        for (pos, prob) in p.position_probabilities.iter().enumerate() {
            out.push_str(&format!("  P(position = {}) = {:.6}\n", pos + 1, prob));
        }
        out.push_str(&format!(
            "  expected wins {:.1}, actual wins {}, win rate {:.6}\n",
            p.expected_wins, p.actual_wins, p.win_rate
        ));
    }

    out.push_str(&format!(
        "\nMODEL VALIDATION: {}\n",
        if report.valid() { "VALID" } else { "INVALID" }
    ));
    out
}
