use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::MonteCarloConfig;
use crate::error::{DataError, DataResult};
use crate::hypothesis::{self, TestOutcome};
use crate::lambda::RateEstimate;

/// Positions shown in the per-entity distribution.
const PROFILE_POSITIONS: usize = 5;
const PASS_ALPHA: f64 = 0.05;
const VALID_CORRELATION: f64 = 0.99;

/// Fitted rates and the probabilities they are meant to reproduce.
#[derive(Debug, Clone, PartialEq)]
pub struct MonteCarloInput {
    pub entities: Vec<String>,
    pub rates: Vec<f64>,
    pub theoretical: Vec<f64>,
}

impl MonteCarloInput {
    pub fn new(entities: Vec<String>, rates: Vec<f64>, theoretical: Vec<f64>) -> DataResult<Self> {
        if entities.is_empty() {
            return Err(DataError::Empty("monte carlo"));
        }
        if rates.len() != entities.len() || theoretical.len() != entities.len() {
            return Err(DataError::InvalidResults(format!(
                "{} entities, {} rates, {} probabilities",
                entities.len(),
                rates.len(),
                theoretical.len()
            )));
        }
        for ((name, rate), p) in entities.iter().zip(&rates).zip(&theoretical) {
            if !rate.is_finite() || !p.is_finite() {
                return Err(DataError::NonFinite {
                    stage: "monte carlo",
                    entity: name.clone(),
                });
            }
            if *rate <= 0.0 {
                return Err(DataError::InvalidResults(format!(
                    "rate for {name:?} must be positive, got {rate}"
                )));
            }
            if *p <= 0.0 || *p > 1.0 {
                return Err(DataError::ProbabilityOutOfRange {
                    entity: name.clone(),
                    value: *p,
                });
            }
        }
        Ok(Self {
            entities,
            rates,
            theoretical,
        })
    }

    /// Rates from stage 3, compared against the stage 2 normalized probabilities.
    pub fn from_estimates(estimates: &[RateEstimate]) -> DataResult<Self> {
        Self::new(
            estimates.iter().map(|e| e.entity.clone()).collect(),
            estimates.iter().map(|e| e.rate).collect(),
            estimates.iter().map(|e| e.normalized_probability).collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Finishing-position histogram accumulated over every simulated race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionCounts {
    entities: usize,
    pub trials: u64,
    /// `counts[entity * entities + position]`, position 0-based.
    counts: Vec<u64>,
}

impl PositionCounts {
    pub fn new(entities: usize) -> Self {
        Self {
            entities,
            trials: 0,
            counts: vec![0; entities * entities],
        }
    }

    pub fn count(&self, entity: usize, position: usize) -> u64 {
        self.counts[entity * self.entities + position]
    }

    pub fn wins(&self, entity: usize) -> u64 {
        self.count(entity, 0)
    }

    fn record(&mut self, order: &[usize]) {
        for (position, &entity) in order.iter().enumerate() {
            self.counts[entity * self.entities + position] += 1;
        }
        self.trials += 1;
    }

    fn merge(mut self, other: Self) -> Self {
        for (a, b) in self.counts.iter_mut().zip(other.counts) {
            *a += b;
        }
        self.trials += other.trials;
        self
    }
}

/// Exponential finishing time with the given rate (mean 1 / rate).
fn draw_time<R: Rng>(rng: &mut R, rate: f64) -> f64 {
    let u: f64 = rng.gen_range(0.0..1.0);
    -(1.0 - u).ln() / rate
}

/// Entity indices from fastest to slowest; equal times keep index order.
pub fn rank_order(times: &[f64], order: &mut Vec<usize>) {
    order.clear();
    order.extend(0..times.len());
    order.sort_by(|&a, &b| times[a].total_cmp(&times[b]).then(a.cmp(&b)));
}

fn simulation_seed(seed: u64, sim: usize) -> u64 {
    // splitmix64 finalizer over the (seed, index) pair
    let mut z = seed ^ (sim as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn run_simulation(rates: &[f64], races: usize, seed: u64, sim: usize, acc: &mut PositionCounts) {
    let mut rng = StdRng::seed_from_u64(simulation_seed(seed, sim));
    let mut times = vec![0.0; rates.len()];
    let mut order = Vec::with_capacity(rates.len());
    for _ in 0..races {
        for (t, rate) in times.iter_mut().zip(rates) {
            *t = draw_time(&mut rng, *rate);
        }
        rank_order(&times, &mut order);
        acc.record(&order);
    }
}

/// Simulate `simulations` x `races` races. The same seed gives the same
/// counts whether or not the simulations run in parallel.
pub fn simulate(rates: &[f64], simulations: usize, races: usize, seed: u64, parallel: bool) -> PositionCounts {
    let n = rates.len();
    if parallel {
        (0..simulations)
            .into_par_iter()
            .fold(
                || PositionCounts::new(n),
                |mut acc, sim| {
                    run_simulation(rates, races, seed, sim, &mut acc);
                    acc
                },
            )
            .reduce(|| PositionCounts::new(n), PositionCounts::merge)
    } else {
        let mut acc = PositionCounts::new(n);
        for sim in 0..simulations {
            run_simulation(rates, races, seed, sim, &mut acc);
        }
        acc
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityComparison {
    pub entity: String,
    pub rate: f64,
    pub theoretical: f64,
    pub empirical: f64,
    pub difference: f64,
    pub relative_error_pct: f64,
    pub half_width: f64,
    pub within_band: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionProfile {
    pub entity: String,
    pub rate: f64,
    pub theoretical: f64,
    /// P(position = k) for the first few positions.
    pub position_probabilities: Vec<f64>,
    pub expected_wins: f64,
    pub actual_wins: u64,
    pub win_rate: f64,
}

#[derive(Debug, Clone)]
pub struct MonteCarloReport {
    pub simulations: usize,
    pub races: usize,
    pub seed: u64,
    pub trials: u64,
    /// Sorted by theoretical probability, highest first.
    pub comparisons: Vec<EntityComparison>,
    pub correlation: f64,
    pub r_squared: f64,
    pub mae: f64,
    pub rmse: f64,
    pub ks: TestOutcome,
    pub wilcoxon: TestOutcome,
    pub paired_t: TestOutcome,
    pub within_band: usize,
    pub fraction_within_band: f64,
    pub profiles: Vec<PositionProfile>,
}

impl MonteCarloReport {
    pub fn valid(&self) -> bool {
        self.correlation > VALID_CORRELATION
    }

    pub fn passes(outcome: &TestOutcome) -> bool {
        outcome.passes(PASS_ALPHA)
    }
}

/// Compare simulated win frequencies with the theoretical probabilities.
pub fn compare(
    input: &MonteCarloInput,
    counts: &PositionCounts,
    simulations: usize,
    races: usize,
    seed: u64,
    cfg: &MonteCarloConfig,
) -> MonteCarloReport {
    let n = input.len();
    let trials = counts.trials;
    let empirical: Vec<f64> = (0..n)
        .map(|i| counts.wins(i) as f64 / trials.max(1) as f64)
        .collect();

    let mut comparisons: Vec<EntityComparison> = (0..n)
        .map(|i| {
            let p = input.theoretical[i];
            let e = empirical[i];
            let half_width = hypothesis::binomial_half_width(p, trials, cfg.band_z);
            EntityComparison {
                entity: input.entities[i].clone(),
                rate: input.rates[i],
                theoretical: p,
                empirical: e,
                difference: e - p,
                relative_error_pct: if p != 0.0 { (e - p).abs() / p * 100.0 } else { f64::NAN },
                half_width,
                within_band: (e - p).abs() <= half_width,
            }
        })
        .collect();
    comparisons.sort_by(|a, b| b.theoretical.total_cmp(&a.theoretical));

    let correlation = hypothesis::pearson(&input.theoretical, &empirical);
    let mae = comparisons.iter().map(|c| c.difference.abs()).sum::<f64>() / n as f64;
    let rmse = (comparisons.iter().map(|c| c.difference.powi(2)).sum::<f64>() / n as f64).sqrt();
    let within_band = comparisons.iter().filter(|c| c.within_band).count();

    let mut by_theory: Vec<usize> = (0..n).collect();
    by_theory.sort_by(|&a, &b| input.theoretical[b].total_cmp(&input.theoretical[a]));
    let profiles = by_theory
        .into_iter()
        .take(cfg.top_entities)
        .map(|i| {
            let positions = PROFILE_POSITIONS.min(n);
            PositionProfile {
                entity: input.entities[i].clone(),
                rate: input.rates[i],
                theoretical: input.theoretical[i],
                position_probabilities: (0..positions)
                    .map(|pos| counts.count(i, pos) as f64 / trials.max(1) as f64)
                    .collect(),
                expected_wins: input.theoretical[i] * trials as f64,
                actual_wins: counts.wins(i),
                win_rate: empirical[i],
            }
        })
        .collect();

    MonteCarloReport {
        simulations,
        races,
        seed,
        trials,
        correlation,
        r_squared: correlation * correlation,
        mae,
        rmse,
        ks: hypothesis::ks_two_sample(&input.theoretical, &empirical),
        wilcoxon: hypothesis::wilcoxon_signed_rank(&input.theoretical, &empirical),
        paired_t: hypothesis::paired_t(&input.theoretical, &empirical),
        within_band,
        fraction_within_band: within_band as f64 / n as f64,
        comparisons,
        profiles,
    }
}

/// Simulate with the configured sizes and compare against theory.
pub fn validate(input: &MonteCarloInput, cfg: &MonteCarloConfig) -> DataResult<MonteCarloReport> {
    if cfg.simulations == 0 || cfg.races == 0 {
        return Err(DataError::InvalidConfig(
            "monte carlo simulations and races must be at least 1".to_string(),
        ));
    }
    let seed = cfg.seed.unwrap_or_else(rand::random);
    info!(
        simulations = cfg.simulations,
        races = cfg.races,
        entities = input.len(),
        seed,
        parallel = cfg.parallel,
        "monte carlo validation"
    );
    let counts = simulate(&input.rates, cfg.simulations, cfg.races, seed, cfg.parallel);
    debug!(trials = counts.trials, "simulation finished");

    let report = compare(input, &counts, cfg.simulations, cfg.races, seed, cfg);
    info!(
        correlation = report.correlation,
        rmse = report.rmse,
        within_band = report.within_band,
        valid = report.valid(),
        "monte carlo comparison"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(simulations: usize, races: usize, seed: u64) -> MonteCarloConfig {
        MonteCarloConfig {
            simulations,
            races,
            seed: Some(seed),
            ..MonteCarloConfig::default()
        }
    }

    #[test]
    fn fast_entity_wins_single_race() {
        let counts = simulate(&[1000.0, 0.001], 1, 1, 42, false);
        assert_eq!(counts.trials, 1);
        assert_eq!(counts.wins(0), 1);
        assert_eq!(counts.wins(1), 0);
        assert_eq!(counts.count(1, 1), 1);
    }

    #[test]
    fn fast_entity_dominates_many_races() {
        let counts = simulate(&[1000.0, 0.001], 200, 5, 7, true);
        assert_eq!(counts.trials, 1000);
        assert!(counts.wins(0) >= 999);
    }

    #[test]
    fn ties_rank_by_index() {
        let mut order = Vec::new();
        rank_order(&[0.5, 0.1, 0.5, 0.1], &mut order);
        assert_eq!(order, vec![1, 3, 0, 2]);
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let rates = [3.0, 2.0, 1.0, 0.5];
        let a = simulate(&rates, 64, 3, 99, true);
        let b = simulate(&rates, 64, 3, 99, false);
        assert_eq!(a, b);
    }

    #[test]
    fn every_race_fills_every_position_once() {
        let rates = [3.0, 2.0, 1.0];
        let counts = simulate(&rates, 10, 4, 5, false);
        for pos in 0..3 {
            let total: u64 = (0..3).map(|e| counts.count(e, pos)).sum();
            assert_eq!(total, counts.trials);
        }
    }

    #[test]
    fn empirical_win_rates_converge_to_rate_shares() {
        let rates = vec![3.0, 2.0, 1.0];
        let theoretical = vec![0.5, 2.0 / 6.0, 1.0 / 6.0];
        let input = MonteCarloInput::new(
            vec!["a".into(), "b".into(), "c".into()],
            rates,
            theoretical.clone(),
        )
        .unwrap();
        let report = validate(&input, &cfg(4000, 5, 2024)).unwrap();
        assert_eq!(report.trials, 20_000);
        for c in &report.comparisons {
            // Four standard errors.
            let se = (c.theoretical * (1.0 - c.theoretical) / 20_000.0).sqrt();
            assert!(c.difference.abs() < 4.0 * se, "{c:?}");
        }
        assert!(report.valid());
        assert_eq!(report.comparisons[0].entity, "a");
        assert_eq!(report.profiles.len(), 3);
        assert_eq!(report.profiles[0].position_probabilities.len(), 3);
        let sum: f64 = report.profiles[0].position_probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(MonteCarloInput::new(vec![], vec![], vec![]).is_err());
        assert!(MonteCarloInput::new(vec!["a".into()], vec![0.0], vec![1.0]).is_err());
        assert!(MonteCarloInput::new(vec!["a".into()], vec![f64::NAN], vec![1.0]).is_err());
        assert!(MonteCarloInput::new(vec!["a".into()], vec![1.0, 2.0], vec![1.0]).is_err());
        assert_eq!(
            MonteCarloInput::new(vec!["a".into(), "b".into()], vec![1.0, 1.0], vec![1.2, -0.2]),
            Err(DataError::ProbabilityOutOfRange {
                entity: "a".to_string(),
                value: 1.2,
            })
        );
        assert!(MonteCarloInput::new(vec!["a".into()], vec![1.0], vec![0.0]).is_err());
    }

    #[test]
    fn band_flags_entities_outside_sampling_error() {
        let input = MonteCarloInput::new(
            vec!["a".into(), "b".into(), "c".into()],
            vec![5.0, 3.0, 2.0],
            vec![0.5, 0.3, 0.2],
        )
        .unwrap();
        let mut counts = PositionCounts::new(3);
        for _ in 0..52 {
            counts.record(&[0, 1, 2]);
        }
        for _ in 0..38 {
            counts.record(&[1, 0, 2]);
        }
        for _ in 0..10 {
            counts.record(&[2, 0, 1]);
        }
        let report = compare(&input, &counts, 100, 1, 0, &MonteCarloConfig::default());

        // Half-widths at 100 trials: 0.098, 0.0898, 0.0784.
        let c = &report.comparisons;
        assert_eq!(c[0].entity, "a");
        assert!((c[0].half_width - 1.96 * 0.05).abs() < 1e-12);
        assert!(c[0].within_band);
        assert!((c[1].difference - 0.08).abs() < 1e-12);
        assert!(c[1].within_band);
        assert!((c[2].difference + 0.1).abs() < 1e-12);
        assert!(!c[2].within_band);
        assert_eq!(report.within_band, 2);
        assert!((report.fraction_within_band - 2.0 / 3.0).abs() < 1e-12);
    }
}
