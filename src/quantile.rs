use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::QuantileConfig;
use crate::error::{DataError, DataResult};
use crate::normalize::ProbabilityRecord;
use crate::special::inverse_normal_cdf;

/// Location of the first implied mid-rank (1.5, 2.5, ...).
const FIRST_MID_RANK: f64 = 1.5;

/// Stage 4 snapshot row. `scale` is the same for every row of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeParameters {
    pub group: String,
    pub entity: String,
    pub normalized_probability: f64,
    pub quantile_z: f64,
    pub location: f64,
    pub scale: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuantileMap {
    pub z: Vec<f64>,
    pub mu: Vec<f64>,
    pub sigma: f64,
}

/// Map probabilities to normal scores and a location/scale pair.
///
/// z_i = Phi^-1(clip(p_i)), sigma = (1.5n - n(n+1)/2) / sum(z),
/// mu_i = 1.5 - sigma * z_i. Probabilities must lie in (0, 1] and are
/// clipped to [`clip_epsilon`, 1 - `clip_epsilon`] before inversion.
///
/// [`clip_epsilon`]: QuantileConfig::clip_epsilon
pub fn map_quantiles(p: &[f64], cfg: &QuantileConfig) -> DataResult<QuantileMap> {
    if p.is_empty() {
        return Err(DataError::Empty("probability"));
    }
    let eps = cfg.clip_epsilon;
    let mut z = Vec::with_capacity(p.len());
    for (i, v) in p.iter().enumerate() {
        if !v.is_finite() {
            return Err(DataError::NonFinite {
                stage: "quantile mapper",
                entity: format!("#{i}"),
            });
        }
        if *v <= 0.0 || *v > 1.0 {
            return Err(DataError::ProbabilityOutOfRange {
                entity: format!("#{i}"),
                value: *v,
            });
        }
        z.push(inverse_normal_cdf(v.clamp(eps, 1.0 - eps)));
    }

    let n = p.len() as f64;
    let sum_z: f64 = z.iter().sum();
    if sum_z == 0.0 || sum_z.abs() < f64::EPSILON * n {
        return Err(DataError::DegenerateQuantileSum);
    }
    let sigma = (FIRST_MID_RANK * n - n * (n + 1.0) / 2.0) / sum_z;
    if !(sigma.is_finite() && sigma > 0.0) {
        return Err(DataError::NonPositiveScale { sigma });
    }
    let mu = z.iter().map(|zi| FIRST_MID_RANK - sigma * zi).collect();
    Ok(QuantileMap { z, mu, sigma })
}

pub fn map_records(
    records: &[ProbabilityRecord],
    cfg: &QuantileConfig,
) -> DataResult<Vec<ShapeParameters>> {
    for r in records {
        if !r.normalized_probability.is_finite() {
            return Err(DataError::NonFinite {
                stage: "quantile mapper",
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
    let map = map_quantiles(&p, cfg)?;
    info!(entities = p.len(), sigma = map.sigma, "shape parameters ready");

    Ok(records
        .iter()
        .zip(map.z.iter().zip(&map.mu))
        .map(|(r, (z, mu))| ShapeParameters {
            group: r.group.clone(),
            entity: r.entity.clone(),
            normalized_probability: r.normalized_probability,
            quantile_z: *z,
            location: *mu,
            scale: map.sigma,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_half_is_degenerate() {
        let cfg = QuantileConfig::default();
        assert_eq!(
            map_quantiles(&[0.5; 4], &cfg),
            Err(DataError::DegenerateQuantileSum)
        );
        assert_eq!(
            map_quantiles(&[0.5, 0.5], &cfg),
            Err(DataError::DegenerateQuantileSum)
        );
    }

    #[test]
    fn higher_probability_gets_smaller_location() {
        let map = map_quantiles(&[0.6, 0.3, 0.1], &QuantileConfig::default()).unwrap();
        assert!(map.sigma > 0.0);
        assert!(map.mu[0] < map.mu[1] && map.mu[1] < map.mu[2]);
        for (z, mu) in map.z.iter().zip(&map.mu) {
            assert!((mu - (1.5 - map.sigma * z)).abs() < 1e-15);
        }
        let sum_z: f64 = map.z.iter().sum();
        assert!((map.sigma - (4.5 - 6.0) / sum_z).abs() < 1e-15);
    }

    #[test]
    fn boundary_probabilities_are_clipped() {
        let map = map_quantiles(&[1.0, 1e-20, 0.2], &QuantileConfig::default()).unwrap();
        assert!(map.z.iter().all(|z| z.is_finite()));
        assert!(map.z[0] > 7.0 && map.z[1] < -7.0);
        assert!(map.sigma > 0.0);
    }

    #[test]
    fn out_of_range_probabilities_are_rejected() {
        let cfg = QuantileConfig::default();
        assert_eq!(
            map_quantiles(&[1.0, 0.0, 0.2], &cfg),
            Err(DataError::ProbabilityOutOfRange {
                entity: "#1".to_string(),
                value: 0.0,
            })
        );
        assert_eq!(
            map_quantiles(&[1.7, -0.3, 0.2], &cfg),
            Err(DataError::ProbabilityOutOfRange {
                entity: "#0".to_string(),
                value: 1.7,
            })
        );

        let records: Vec<ProbabilityRecord> = [("a", 1.7), ("b", -0.3), ("c", 0.2)]
            .iter()
            .map(|(entity, p)| ProbabilityRecord {
                group: "g".to_string(),
                entity: entity.to_string(),
                raw_implied_probability: *p,
                normalized_probability: *p,
            })
            .collect();
        assert_eq!(
            map_records(&records, &cfg),
            Err(DataError::ProbabilityOutOfRange {
                entity: "a".to_string(),
                value: 1.7,
            })
        );
    }

    #[test]
    fn scale_must_come_out_positive() {
        // Three heavy favourites give a positive quantile sum and a negative scale.
        assert!(matches!(
            map_quantiles(&[0.9, 0.9, 0.9], &QuantileConfig::default()),
            Err(DataError::NonPositiveScale { sigma }) if sigma < 0.0
        ));
    }

    #[test]
    fn nan_is_rejected() {
        assert!(matches!(
            map_quantiles(&[0.2, f64::NAN], &QuantileConfig::default()),
            Err(DataError::NonFinite { .. })
        ));
    }
}
