use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DataError, DataResult};
use crate::odds::ParsedOdds;

/// Stage 2 snapshot row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityRecord {
    pub group: String,
    pub entity: String,
    pub raw_implied_probability: f64,
    pub normalized_probability: f64,
}

/// Rescale raw implied probabilities so they sum to one.
///
/// No favourite-longshot correction is applied; every entity is divided by the
/// same overround.
pub fn normalize(raw: &[f64]) -> DataResult<Vec<f64>> {
    if raw.is_empty() {
        return Err(DataError::Empty("probability"));
    }
    let sum: f64 = raw.iter().sum();
    if !sum.is_finite() || sum <= 0.0 {
        return Err(DataError::NonPositiveSum { sum });
    }
    Ok(raw.iter().map(|p| p / sum).collect())
}

/// Overround of a book: how far the raw probabilities sum above one.
pub fn overround(raw: &[f64]) -> f64 {
    raw.iter().sum::<f64>() - 1.0
}

/// Stage 2 over the stage 1 snapshot.
///
/// Missing probabilities are a `DataError` unless `skip_unpriced` is set, in
/// which case those entities are dropped before normalizing.
pub fn normalize_records(
    parsed: &[ParsedOdds],
    skip_unpriced: bool,
) -> DataResult<Vec<ProbabilityRecord>> {
    if parsed.is_empty() {
        return Err(DataError::Empty("parsed odds"));
    }
    if parsed.iter().all(|r| r.raw_implied_probability.is_none()) {
        return Err(DataError::NonPositiveSum { sum: f64::NAN });
    }

    let mut kept = Vec::with_capacity(parsed.len());
    for row in parsed {
        match row.raw_implied_probability {
            Some(p) if p.is_finite() && p > 0.0 && p <= 1.0 => kept.push((row, p)),
            Some(p) if p.is_finite() => {
                return Err(DataError::ProbabilityOutOfRange {
                    entity: row.entity.clone(),
                    value: p,
                });
            }
            Some(_) => {
                return Err(DataError::NonFinite {
                    stage: "normalize",
                    entity: row.entity.clone(),
                });
            }
            None if skip_unpriced => {
                warn!(entity = %row.entity, "dropping unpriced entity before normalizing");
            }
            None => {
                return Err(DataError::MissingProbability {
                    entity: row.entity.clone(),
                });
            }
        }
    }

    let raw: Vec<f64> = kept.iter().map(|(_, p)| *p).collect();
    let normalized = normalize(&raw)?;
    Ok(kept
        .into_iter()
        .zip(normalized)
        .map(|((row, p), q)| ProbabilityRecord {
            group: row.group.clone(),
            entity: row.entity.clone(),
            raw_implied_probability: p,
            normalized_probability: q,
        })
        .collect())
}
