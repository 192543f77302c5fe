use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RegressionConfig;
use crate::error::{DataError, DataResult};
use crate::linalg;
use crate::results::{Observation, Roster};
use crate::special::{f_upper_tail, student_t_quantile, student_t_two_sided};

pub const INTERCEPT: &str = "(Intercept)";
pub const ROLE_TERM: &str = "secondary_role";

pub fn group_term(group: &str) -> String {
    format!("group[{group}]")
}

/// Stage 5 snapshot row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionRecord {
    pub model: String,
    pub term: String,
    pub estimate: f64,
    pub std_error: f64,
    pub t_value: f64,
    pub p_value: f64,
    pub significance: String,
}

pub fn significance_label(p: f64) -> &'static str {
    if p < 0.001 {
        "highly significant"
    } else if p < 0.01 {
        "significant"
    } else if p < 0.05 {
        "marginal"
    } else {
        "not significant"
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TermEstimate {
    pub estimate: f64,
    pub std_error: f64,
    pub t_value: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceInterval {
    pub level: f64,
    pub lower: f64,
    pub upper: f64,
    pub critical: f64,
}

impl ConfidenceInterval {
    pub fn contains(&self, v: f64) -> bool {
        v >= self.lower && v <= self.upper
    }
}

/// Ordinary least squares fit with an intercept in the first column.
#[derive(Debug, Clone)]
pub struct OlsFit {
    pub terms: Vec<String>,
    pub estimates: Vec<TermEstimate>,
    pub observations: usize,
    pub df_resid: usize,
    pub ssr: f64,
    pub r_squared: f64,
    pub adj_r_squared: f64,
    pub f_statistic: f64,
    pub f_p_value: f64,
    pub log_likelihood: f64,
    pub aic: f64,
}

impl OlsFit {
    pub fn parameters(&self) -> usize {
        self.terms.len()
    }

    pub fn term(&self, name: &str) -> Option<TermEstimate> {
        self.terms
            .iter()
            .position(|t| t == name)
            .map(|i| self.estimates[i])
    }

    /// Two-sided interval from the Student-t critical value at `df_resid`.
    pub fn confidence_interval(&self, name: &str, level: f64) -> Option<ConfidenceInterval> {
        let est = self.term(name)?;
        let critical = student_t_quantile(0.5 + level / 2.0, self.df_resid as f64);
        Some(ConfidenceInterval {
            level,
            lower: est.estimate - critical * est.std_error,
            upper: est.estimate + critical * est.std_error,
            critical,
        })
    }

    pub fn records(&self, model: &str) -> Vec<RegressionRecord> {
        self.terms
            .iter()
            .zip(&self.estimates)
            .map(|(term, e)| RegressionRecord {
                model: model.to_string(),
                term: term.clone(),
                estimate: e.estimate,
                std_error: e.std_error,
                t_value: e.t_value,
                p_value: e.p_value,
                significance: significance_label(e.p_value).to_string(),
            })
            .collect()
    }
}

pub fn ols(terms: Vec<String>, rows: &[Vec<f64>], y: &[f64]) -> DataResult<OlsFit> {
    let n = y.len();
    let k = terms.len();
    if n == 0 {
        return Err(DataError::Empty("regression"));
    }
    if rows.len() != n || rows.iter().any(|r| r.len() != k) {
        return Err(DataError::InvalidResults(
            "design matrix shape does not match the response".to_string(),
        ));
    }
    if n <= k {
        return Err(DataError::InsufficientDegreesOfFreedom {
            observations: n,
            parameters: k,
        });
    }

    let xtx_inv = linalg::invert(&linalg::gram(rows))?;
    let beta = linalg::mat_vec(&xtx_inv, &linalg::cross(rows, y));

    let mean_y = y.iter().sum::<f64>() / n as f64;
    let mut ssr = 0.0;
    let mut tss = 0.0;
    for (row, yi) in rows.iter().zip(y) {
        let fitted: f64 = row.iter().zip(&beta).map(|(x, b)| x * b).sum();
        ssr += (yi - fitted).powi(2);
        tss += (yi - mean_y).powi(2);
    }

    let df_resid = n - k;
    let df_model = k - 1;
    let sigma2 = ssr / df_resid as f64;

    let estimates = beta
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let std_error = (sigma2 * xtx_inv[i][i]).max(0.0).sqrt();
            let t_value = b / std_error;
            TermEstimate {
                estimate: *b,
                std_error,
                t_value,
                p_value: student_t_two_sided(t_value, df_resid as f64),
            }
        })
        .collect();

    let r_squared = if tss > 0.0 { 1.0 - ssr / tss } else { f64::NAN };
    let adj_r_squared = 1.0 - (1.0 - r_squared) * (n as f64 - 1.0) / df_resid as f64;
    let (f_statistic, f_p_value) = if df_model == 0 {
        (f64::NAN, f64::NAN)
    } else {
        let f = (r_squared / df_model as f64) / ((1.0 - r_squared) / df_resid as f64);
        (f, f_upper_tail(f, df_model as f64, df_resid as f64))
    };

    let nf = n as f64;
    let log_likelihood =
        -0.5 * nf * ((2.0 * std::f64::consts::PI).ln() + (ssr / nf).ln() + 1.0);
    let aic = -2.0 * log_likelihood + 2.0 * k as f64;

    Ok(OlsFit {
        terms,
        estimates,
        observations: n,
        df_resid,
        ssr,
        r_squared,
        adj_r_squared,
        f_statistic,
        f_p_value,
        log_likelihood,
        aic,
    })
}

/// Design over `observations`: intercept, role indicator, then one dummy per
/// group in `dummies` (the reference group must not be among them).
pub fn design(observations: &[Observation], dummies: &[String]) -> (Vec<String>, Vec<Vec<f64>>, Vec<f64>) {
    let mut terms = vec![INTERCEPT.to_string(), ROLE_TERM.to_string()];
    terms.extend(dummies.iter().map(|g| group_term(g)));

    let rows = observations
        .iter()
        .map(|o| {
            let mut row = Vec::with_capacity(terms.len());
            row.push(1.0);
            row.push(if o.secondary { 1.0 } else { 0.0 });
            row.extend(dummies.iter().map(|g| if *g == o.group { 1.0 } else { 0.0 }));
            row
        })
        .collect();
    let y = observations.iter().map(|o| o.position).collect();
    (terms, rows, y)
}

/// Full model, significance-based reduction, and the comparison between them.
#[derive(Debug, Clone)]
pub struct SignificanceAnalysis {
    pub reference_group: String,
    pub full: OlsFit,
    pub reduced: OlsFit,
    pub retained: Vec<String>,
    pub dropped: Vec<String>,
    /// Full AIC minus reduced AIC; positive means the reduced model is better.
    pub aic_difference: f64,
    pub reduced_improves: bool,
    pub role_ci_full: Option<ConfidenceInterval>,
    pub role_ci_reduced: Option<ConfidenceInterval>,
}

impl SignificanceAnalysis {
    pub fn records(&self) -> Vec<RegressionRecord> {
        let mut out = self.full.records("full");
        out.extend(self.reduced.records("reduced"));
        out
    }
}

pub fn analyze(
    observations: &[Observation],
    roster: &Roster,
    cfg: &RegressionConfig,
) -> DataResult<SignificanceAnalysis> {
    if observations.is_empty() {
        return Err(DataError::Empty("regression"));
    }
    // Groups that actually appear in the results, in roster order.
    let groups: Vec<String> = roster
        .groups
        .iter()
        .filter(|g| observations.iter().any(|o| &o.group == *g))
        .cloned()
        .collect();

    let reference_group = match &cfg.reference_group {
        Some(r) => groups
            .iter()
            .find(|g| *g == r)
            .cloned()
            .ok_or_else(|| {
                DataError::InvalidConfig(format!("reference group {r:?} has no observations"))
            })?,
        None => groups.last().cloned().ok_or(DataError::Empty("group"))?,
    };
    let dummies: Vec<String> = groups
        .iter()
        .filter(|g| **g != reference_group)
        .cloned()
        .collect();

    let (terms, rows, y) = design(observations, &dummies);
    let full = ols(terms, &rows, &y)?;

    let (retained, dropped): (Vec<String>, Vec<String>) = dummies.into_iter().partition(|g| {
        full.term(&group_term(g))
            .is_some_and(|e| e.p_value < cfg.alpha)
    });

    let (terms, rows, y) = design(observations, &retained);
    let reduced = ols(terms, &rows, &y)?;

    let aic_difference = full.aic - reduced.aic;
    let reduced_improves = aic_difference > 0.0;
    info!(
        full_aic = full.aic,
        reduced_aic = reduced.aic,
        retained = retained.len(),
        dropped = dropped.len(),
        "significance reduction done"
    );
    if !reduced_improves {
        warn!(
            aic_difference,
            "reduced model does not improve AIC over the full model"
        );
    }

    let role_ci_full = full.confidence_interval(ROLE_TERM, cfg.confidence);
    let role_ci_reduced = reduced.confidence_interval(ROLE_TERM, cfg.confidence);

    Ok(SignificanceAnalysis {
        reference_group,
        full,
        reduced,
        retained,
        dropped,
        aic_difference,
        reduced_improves,
        role_ci_full,
        role_ci_reduced,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_line_is_recovered() {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0];
        let ys = [2.1, 3.9, 6.2, 7.8, 10.1];
        let rows: Vec<Vec<f64>> = xs.iter().map(|x| vec![1.0, *x]).collect();
        let fit = ols(vec![INTERCEPT.to_string(), "x".to_string()], &rows, &ys).unwrap();
        let slope = fit.term("x").unwrap();
        let intercept = fit.term(INTERCEPT).unwrap();
        assert!((slope.estimate - 1.99).abs() < 1e-9);
        assert!((intercept.estimate - 0.05).abs() < 1e-9);
        assert!(fit.r_squared > 0.99 && fit.r_squared < 1.0);
        assert_eq!(fit.df_resid, 3);
        // With one regressor, F equals t squared and the p-values agree.
        assert!((fit.f_statistic - slope.t_value.powi(2)).abs() < 1e-6 * fit.f_statistic);
        assert!((fit.f_p_value - slope.p_value).abs() < 1e-9);
    }

    #[test]
    fn aic_matches_gaussian_log_likelihood() {
        let rows: Vec<Vec<f64>> = (0..6).map(|i| vec![1.0, i as f64]).collect();
        let y = [0.0, 1.5, 1.0, 3.5, 3.0, 5.5];
        let fit = ols(vec![INTERCEPT.into(), "x".into()], &rows, &y).unwrap();
        let n = 6.0;
        let llf = -n / 2.0 * ((2.0 * std::f64::consts::PI).ln() + (fit.ssr / n).ln() + 1.0);
        assert!((fit.log_likelihood - llf).abs() < 1e-12);
        assert!((fit.aic - (-2.0 * llf + 4.0)).abs() < 1e-12);
    }

    #[test]
    fn confidence_interval_uses_t_critical_value() {
        let rows: Vec<Vec<f64>> = (0..12).map(|i| vec![1.0, (i % 4) as f64]).collect();
        let y: Vec<f64> = (0..12).map(|i| (i % 4) as f64 * 0.5 + (i % 3) as f64).collect();
        let fit = ols(vec![INTERCEPT.into(), "x".into()], &rows, &y).unwrap();
        let ci = fit.confidence_interval("x", 0.95).unwrap();
        assert!((ci.critical - 2.228_139).abs() < 1e-5);
        let est = fit.term("x").unwrap();
        assert!(ci.contains(est.estimate));
        assert!((ci.upper - ci.lower - 2.0 * ci.critical * est.std_error).abs() < 1e-12);
    }

    #[test]
    fn too_few_observations() {
        let rows = vec![vec![1.0, 0.0], vec![1.0, 1.0]];
        assert!(matches!(
            ols(vec![INTERCEPT.into(), "x".into()], &rows, &[1.0, 2.0]),
            Err(DataError::InsufficientDegreesOfFreedom { .. })
        ));
    }

    #[test]
    fn labels() {
        assert_eq!(significance_label(0.0005), "highly significant");
        assert_eq!(significance_label(0.005), "significant");
        assert_eq!(significance_label(0.03), "marginal");
        assert_eq!(significance_label(0.2), "not significant");
    }
}
