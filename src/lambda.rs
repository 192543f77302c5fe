use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EstimatorConfig;
use crate::error::{DataError, DataResult};
use crate::normalize::ProbabilityRecord;
use crate::optim::{self, MinimizeOptions, Objective, Termination};

/// Canonical key for a tie group: the bit pattern of the group's smallest value.
///
/// For positive finite floats the bit patterns order the same way the values
/// do, so a `BTreeMap` keyed on this walks groups in ascending probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProbabilityKey(u64);

impl ProbabilityKey {
    pub fn value(self) -> f64 {
        f64::from_bits(self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityGroup {
    pub key: ProbabilityKey,
    /// Entity indices into the input slice, ascending by (probability, index).
    pub members: Vec<usize>,
}

impl ProbabilityGroup {
    pub fn value(&self) -> f64 {
        self.key.value()
    }

    pub fn count(&self) -> usize {
        self.members.len()
    }
}

/// Group entity indices whose probabilities are equal within `tolerance`.
///
/// Each group is anchored on its smallest member; a value joins the open group
/// only if it is within `tolerance` of that anchor, so near-equal chains never
/// merge into one group.
pub fn group_probabilities(
    p: &[f64],
    tolerance: f64,
) -> DataResult<BTreeMap<ProbabilityKey, Vec<usize>>> {
    for (i, v) in p.iter().enumerate() {
        if !v.is_finite() {
            return Err(DataError::NonFinite {
                stage: "rate estimator",
                entity: format!("#{i}"),
            });
        }
        if *v <= 0.0 || *v > 1.0 {
            return Err(DataError::ProbabilityOutOfRange {
                entity: format!("#{i}"),
                value: *v,
            });
        }
    }

    let mut order: Vec<usize> = (0..p.len()).collect();
    order.sort_by(|&a, &b| p[a].total_cmp(&p[b]).then(a.cmp(&b)));

    let mut groups: BTreeMap<ProbabilityKey, Vec<usize>> = BTreeMap::new();
    let mut anchor: Option<f64> = None;
    for idx in order {
        let v = p[idx];
        let key_value = match anchor {
            Some(a) if (v - a).abs() <= tolerance => a,
            _ => {
                anchor = Some(v);
                v
            }
        };
        groups
            .entry(ProbabilityKey(key_value.to_bits()))
            .or_default()
            .push(idx);
    }
    Ok(groups)
}

/// Squared error between each entity's target and its group's share of the
/// total rate, with the group rates as the free variables.
struct GroupedShareObjective<'a> {
    groups: &'a [ProbabilityGroup],
    targets: &'a [f64],
}

impl GroupedShareObjective<'_> {
    fn total(&self, x: &[f64]) -> f64 {
        self.groups
            .iter()
            .zip(x)
            .map(|(g, r)| g.count() as f64 * r)
            .sum()
    }
}

impl Objective for GroupedShareObjective<'_> {
    fn value(&self, x: &[f64]) -> f64 {
        let total = self.total(x);
        let mut sum = 0.0;
        for (g, r) in self.groups.iter().zip(x) {
            let pred = r / total;
            for &i in &g.members {
                sum += (self.targets[i] - pred).powi(2);
            }
        }
        sum
    }

    fn gradient(&self, x: &[f64], grad: &mut [f64]) {
        let total = self.total(x);
        // resid[g] = sum over members of (pred_g - target_i)
        let resid: Vec<f64> = self
            .groups
            .iter()
            .zip(x)
            .map(|(g, r)| {
                let pred = r / total;
                g.members.iter().map(|&i| pred - self.targets[i]).sum()
            })
            .collect();
        let coupling: f64 = resid.iter().zip(x).map(|(r, xg)| r * xg).sum();
        for (k, g) in self.groups.iter().enumerate() {
            let c = g.count() as f64;
            grad[k] = 2.0 * resid[k] / total - 2.0 * c * coupling / (total * total);
        }
    }
}

/// Stage 3 snapshot row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateEstimate {
    pub group: String,
    pub entity: String,
    pub normalized_probability: f64,
    pub rate: f64,
    pub predicted_probability: f64,
    pub absolute_error: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupRate {
    pub value: f64,
    pub count: usize,
    pub initial: f64,
    pub rate: f64,
}

/// Result of the grouped fit over a bare probability vector.
#[derive(Debug, Clone)]
pub struct GroupedRates {
    /// One rate per input entity, in input order.
    pub rates: Vec<f64>,
    pub groups: Vec<GroupRate>,
    pub objective: f64,
    pub iterations: usize,
    pub termination: Termination,
    pub converged: bool,
    pub used_fallback: bool,
    pub history: Vec<f64>,
}

impl GroupedRates {
    pub fn rate_sum(&self) -> f64 {
        self.rates.iter().sum()
    }

    pub fn predicted(&self) -> Vec<f64> {
        let sum = self.rate_sum();
        self.rates.iter().map(|r| r / sum).collect()
    }
}

/// Estimate one positive rate per tie group so that rate / total reproduces `p`.
pub fn estimate_rates(p: &[f64], cfg: &EstimatorConfig) -> DataResult<GroupedRates> {
    let groups = tie_groups(p, cfg.tie_tolerance)?;
    let x0: Vec<f64> = groups
        .iter()
        .map(|g| (g.value() * cfg.init_scale).max(cfg.init_floor).max(cfg.lower_bound))
        .collect();
    fit_from(p, groups, x0, cfg)
}

/// Same as [`estimate_rates`] but starting from caller-supplied group rates
/// (ascending probability order).
pub fn estimate_rates_from(
    p: &[f64],
    initial: &[f64],
    cfg: &EstimatorConfig,
) -> DataResult<GroupedRates> {
    let groups = tie_groups(p, cfg.tie_tolerance)?;
    if initial.len() != groups.len() {
        return Err(DataError::InvalidConfig(format!(
            "expected {} initial rates, got {}",
            groups.len(),
            initial.len()
        )));
    }
    let x0 = initial.iter().map(|r| r.max(cfg.lower_bound)).collect();
    fit_from(p, groups, x0, cfg)
}

fn tie_groups(p: &[f64], tolerance: f64) -> DataResult<Vec<ProbabilityGroup>> {
    if p.is_empty() {
        return Err(DataError::Empty("probability"));
    }
    Ok(group_probabilities(p, tolerance)?
        .into_iter()
        .map(|(key, members)| ProbabilityGroup { key, members })
        .collect())
}

fn fit_from(
    p: &[f64],
    groups: Vec<ProbabilityGroup>,
    x0: Vec<f64>,
    cfg: &EstimatorConfig,
) -> DataResult<GroupedRates> {
    debug!(groups = groups.len(), entities = p.len(), "grouped rate fit");
    for (i, g) in groups.iter().enumerate() {
        debug!("group {}: p={:.9} count={}", i + 1, g.value(), g.count());
    }

    let objective = GroupedShareObjective {
        groups: &groups,
        targets: p,
    };
    let lower = vec![cfg.lower_bound; groups.len()];
    let opts = MinimizeOptions {
        max_iterations: cfg.max_iterations,
        ftol: cfg.ftol,
        pgtol: cfg.pgtol,
        ..MinimizeOptions::default()
    };
    let min = optim::minimize_bounded(&objective, &x0, &lower, opts);

    let converged = min.converged();
    let (x, value) = if converged {
        (min.x.clone(), min.value)
    } else {
        warn!(
            termination = ?min.termination,
            iterations = min.iterations,
            "rate optimizer did not converge; falling back to initial rates"
        );
        let v = objective.value(&x0);
        (x0.clone(), v)
    };

    let mut rates = vec![0.0; p.len()];
    let mut group_rates = Vec::with_capacity(groups.len());
    for ((g, rate), init) in groups.iter().zip(&x).zip(&x0) {
        // Never hand back a rate at or below zero, even from the fallback path.
        let rate = rate.max(cfg.lower_bound);
        for &i in &g.members {
            rates[i] = rate;
        }
        group_rates.push(GroupRate {
            value: g.value(),
            count: g.count(),
            initial: *init,
            rate,
        });
    }

    Ok(GroupedRates {
        rates,
        groups: group_rates,
        objective: value,
        iterations: min.iterations,
        termination: min.termination,
        converged,
        used_fallback: !converged,
        history: min.history,
    })
}

/// Stage 3 fit over stage 2 records, with per-entity diagnostics.
#[derive(Debug, Clone)]
pub struct RateFit {
    pub estimates: Vec<RateEstimate>,
    pub grouped: GroupedRates,
    pub max_abs_error: f64,
    pub mean_abs_error: f64,
}

pub fn estimate_records(
    records: &[ProbabilityRecord],
    cfg: &EstimatorConfig,
) -> DataResult<RateFit> {
    for r in records {
        if !r.normalized_probability.is_finite() {
            return Err(DataError::NonFinite {
                stage: "rate estimator",
                entity: r.entity.clone(),
            });
        }
        if r.normalized_probability <= 0.0 || r.normalized_probability > 1.0 {
            return Err(DataError::ProbabilityOutOfRange {
                entity: r.entity.clone(),
                value: r.normalized_probability,
            });
        }
    }
    let p: Vec<f64> = records.iter().map(|r| r.normalized_probability).collect();
    let grouped = estimate_rates(&p, cfg)?;
    let predicted = grouped.predicted();

    let estimates: Vec<RateEstimate> = records
        .iter()
        .zip(&grouped.rates)
        .zip(&predicted)
        .map(|((r, rate), pred)| RateEstimate {
            group: r.group.clone(),
            entity: r.entity.clone(),
            normalized_probability: r.normalized_probability,
            rate: *rate,
            predicted_probability: *pred,
            absolute_error: (r.normalized_probability - pred).abs(),
        })
        .collect();

    let max_abs_error = estimates
        .iter()
        .map(|e| e.absolute_error)
        .fold(0.0, f64::max);
    let mean_abs_error =
        estimates.iter().map(|e| e.absolute_error).sum::<f64>() / estimates.len() as f64;

    info!(
        groups = grouped.groups.len(),
        converged = grouped.converged,
        objective = grouped.objective,
        rate_sum = grouped.rate_sum(),
        max_abs_error,
        mean_abs_error,
        "rate estimates ready"
    );
    for (i, g) in grouped.groups.iter().enumerate() {
        debug!("group {}: p={:.9} -> rate={:.10}", i + 1, g.value, g.rate);
    }

    Ok(RateFit {
        estimates,
        grouped,
        max_abs_error,
        mean_abs_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f1_like() -> Vec<f64> {
        let raw = [
            9.0 / 11.0,
            1.0 / 5.0,
            1.0 / 9.0,
            1.0 / 9.0,
            1.0 / 26.0,
            1.0 / 26.0,
            1.0 / 26.0,
            1.0 / 51.0,
            1.0 / 101.0,
            1.0 / 101.0,
        ];
        let sum: f64 = raw.iter().sum();
        raw.iter().map(|p| p / sum).collect()
    }

    #[test]
    fn groups_exact_ties_only() {
        let p = [0.2, 0.1, 0.2, 0.1 + 1e-9, 0.1];
        let groups = group_probabilities(&p, 1e-12).unwrap();
        let members: Vec<Vec<usize>> = groups.values().cloned().collect();
        assert_eq!(members, vec![vec![1, 4], vec![3], vec![0, 2]]);
        let keys: Vec<f64> = groups.keys().map(|k| k.value()).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn tolerance_is_anchored_not_chained() {
        let p = [0.1, 0.1 + 0.6e-12, 0.1 + 1.2e-12];
        let groups = group_probabilities(&p, 1e-12).unwrap();
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn tied_entities_share_rates_and_rates_are_positive() {
        let p = f1_like();
        let fit = estimate_rates(&p, &EstimatorConfig::default()).unwrap();
        assert!(fit.converged);
        assert_eq!(fit.groups.len(), 6);
        assert_eq!(fit.rates[2].to_bits(), fit.rates[3].to_bits());
        assert_eq!(fit.rates[4].to_bits(), fit.rates[6].to_bits());
        assert_eq!(fit.rates[8].to_bits(), fit.rates[9].to_bits());
        assert!(fit.rates.iter().all(|r| *r > 0.0));
        assert!(fit.rate_sum() > 0.0);
    }

    #[test]
    fn round_trip_reproduces_targets() {
        let p = f1_like();
        let fit = estimate_rates(&p, &EstimatorConfig::default()).unwrap();
        for (pred, target) in fit.predicted().iter().zip(&p) {
            assert!((pred - target).abs() < 1e-6);
        }
    }

    #[test]
    fn bad_start_converges_with_monotone_objective() {
        let p = f1_like();
        let start = vec![1.0; 6];
        let fit = estimate_rates_from(&p, &start, &EstimatorConfig::default()).unwrap();
        assert!(fit.converged, "{:?}", fit.termination);
        assert!(fit.history.len() > 1);
        for pair in fit.history.windows(2) {
            assert!(pair[1] <= pair[0]);
        }
        for (pred, target) in fit.predicted().iter().zip(&p) {
            assert!((pred - target).abs() < 1e-6);
        }
    }

    #[test]
    fn init_scale_only_changes_the_common_scale() {
        let p = f1_like();
        let base = estimate_rates(&p, &EstimatorConfig::default()).unwrap();
        for scale in [0.01, 1.0, 7.5] {
            let cfg = EstimatorConfig {
                init_scale: scale,
                ..EstimatorConfig::default()
            };
            let other = estimate_rates(&p, &cfg).unwrap();
            for (a, b) in base.predicted().iter().zip(other.predicted()) {
                assert!((a - b).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn non_convergence_falls_back_to_initial_rates() {
        let p = f1_like();
        let cfg = EstimatorConfig {
            max_iterations: 1,
            ..EstimatorConfig::default()
        };
        let start = vec![5.0, 0.001, 3.0, 0.2, 9.0, 0.5];
        let fit = estimate_rates_from(&p, &start, &cfg).unwrap();
        assert!(!fit.converged);
        assert!(fit.used_fallback);
        let got: Vec<f64> = fit.groups.iter().map(|g| g.rate).collect();
        assert_eq!(got, start);
    }

    #[test]
    fn rejects_non_finite_and_empty() {
        let cfg = EstimatorConfig::default();
        assert!(matches!(
            estimate_rates(&[0.5, f64::NAN], &cfg),
            Err(DataError::NonFinite { .. })
        ));
        assert!(matches!(estimate_rates(&[], &cfg), Err(DataError::Empty(_))));
        assert!(matches!(
            estimate_rates(&[0.0, 1.0], &cfg),
            Err(DataError::ProbabilityOutOfRange { .. })
        ));
    }

    #[test]
    fn records_keep_input_order() {
        let records: Vec<ProbabilityRecord> = [("A", 0.5), ("B", 0.2), ("C", 0.3)]
            .iter()
            .map(|(e, p)| ProbabilityRecord {
                group: "T".to_string(),
                entity: e.to_string(),
                raw_implied_probability: *p,
                normalized_probability: *p,
            })
            .collect();
        let fit = estimate_records(&records, &EstimatorConfig::default()).unwrap();
        let names: Vec<&str> = fit.estimates.iter().map(|e| e.entity.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert!(fit.estimates[0].rate > fit.estimates[2].rate);
        assert!(fit.max_abs_error < 1e-6);
    }
}
