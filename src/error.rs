use thiserror::Error;

/// Why a single odds token could not be turned into a probability.
///
/// Never fatal: stage 1 records the entity as unpriced and moves on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OddsParseError {
    #[error("empty odds token")]
    Empty,
    #[error("unrecognized odds token {0:?}")]
    Unrecognized(String),
    #[error("non-positive decimal odds {0}")]
    NonPositiveDecimal(f64),
    #[error("invalid fractional odds {0:?}")]
    InvalidFraction(String),
    #[error("odds {token:?} imply probability {probability} outside (0, 1]")]
    OutOfRange { token: String, probability: f64 },
}

/// Structurally invalid or degenerate input. Aborts the stage that hit it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("malformed table: {0}")]
    Malformed(String),
    #[error("missing required column {column:?} (found: {found:?})")]
    MissingColumn { column: String, found: Vec<String> },
    #[error("{0} input is empty")]
    Empty(&'static str),
    #[error("entity {entity:?} has no implied probability")]
    MissingProbability { entity: String },
    #[error("sum of raw implied probabilities is non-positive or undefined ({sum})")]
    NonPositiveSum { sum: f64 },
    #[error("non-finite value in {stage} for entity {entity:?}")]
    NonFinite { stage: &'static str, entity: String },
    #[error("probability {value} for entity {entity:?} is outside (0, 1]")]
    ProbabilityOutOfRange { entity: String, value: f64 },
    #[error("sum of normal quantiles is zero; sigma would be infinite")]
    DegenerateQuantileSum,
    #[error("quantile scale must be positive, got {sigma}")]
    NonPositiveScale { sigma: f64 },
    #[error("invalid result matrix: {0}")]
    InvalidResults(String),
    #[error("entity {0:?} in the results has no group in the odds table")]
    UnknownEntity(String),
    #[error("design matrix is singular")]
    SingularDesign,
    #[error("not enough observations: {observations} for {parameters} parameters")]
    InsufficientDegreesOfFreedom {
        observations: usize,
        parameters: usize,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type DataResult<T> = Result<T, DataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let err = DataError::MissingProbability {
            entity: "Max Verstappen".to_string(),
        };
        assert!(err.to_string().contains("Max Verstappen"));

        let err = OddsParseError::Unrecognized("abc".to_string());
        assert!(err.to_string().contains("abc"));
    }
}
