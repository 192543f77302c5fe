use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::OddsParseError;

/// One row of the bookmaker odds table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsRecord {
    pub group: String,
    pub entity: String,
    pub odds: String,
}

/// Stage 1 snapshot row. `raw_implied_probability` is `None` when the token did not parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedOdds {
    pub group: String,
    pub entity: String,
    pub odds: String,
    pub raw_implied_probability: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct IngestSummary {
    pub rows: usize,
    pub priced: usize,
    pub unpriced: Vec<String>,
}

/// Implied probability of a fractional ("a/b"), decimal ("d") or evens token.
///
/// "a/b" gives b/(a+b), "d" gives 1/d, and "even"/"evens"/"evs" give 1/2.
/// The result always lies in (0, 1].
pub fn implied_probability(token: &str) -> Result<f64, OddsParseError> {
    let s = token.trim();
    if s.is_empty() {
        return Err(OddsParseError::Empty);
    }
    if is_evens(s) {
        return Ok(0.5);
    }

    let p = if let Some((num, rest)) = s.split_once('/') {
        // Anything after a second slash is ignored.
        let den = rest.split('/').next().unwrap_or("");
        let (Ok(a), Ok(b)) = (num.trim().parse::<f64>(), den.trim().parse::<f64>()) else {
            return Err(OddsParseError::InvalidFraction(s.to_string()));
        };
        let total = a + b;
        if !total.is_finite() || total == 0.0 {
            return Err(OddsParseError::InvalidFraction(s.to_string()));
        }
        b / total
    } else {
        let d = s
            .parse::<f64>()
            .map_err(|_| OddsParseError::Unrecognized(s.to_string()))?;
        if !d.is_finite() {
            return Err(OddsParseError::Unrecognized(s.to_string()));
        }
        if d <= 0.0 {
            return Err(OddsParseError::NonPositiveDecimal(d));
        }
        1.0 / d
    };

    if p.is_finite() && p > 0.0 && p <= 1.0 {
        Ok(p)
    } else {
        Err(OddsParseError::OutOfRange {
            token: s.to_string(),
            probability: p,
        })
    }
}

fn is_evens(s: &str) -> bool {
    matches!(
        s.to_ascii_uppercase().as_str(),
        "EVEN" | "EVENS" | "EVS"
    )
}

/// Stage 1: trim every cell and attach the implied probability (or a missing marker).
pub fn ingest(records: &[OddsRecord]) -> (Vec<ParsedOdds>, IngestSummary) {
    let mut out = Vec::with_capacity(records.len());
    let mut summary = IngestSummary {
        rows: records.len(),
        ..IngestSummary::default()
    };

    for rec in records {
        let group = rec.group.trim().to_string();
        let entity = rec.entity.trim().to_string();
        let odds = rec.odds.trim().to_string();
        let raw = match implied_probability(&odds) {
            Ok(p) => {
                summary.priced += 1;
                Some(p)
            }
            Err(err) => {
                debug!(entity = %entity, error = %err, "odds token left unpriced");
                summary.unpriced.push(entity.clone());
                None
            }
        };
        out.push(ParsedOdds {
            group,
            entity,
            odds,
            raw_implied_probability: raw,
        });
    }

    (out, summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fractional_decimal_and_evens() {
        assert!((implied_probability("2/9").unwrap() - 9.0 / 11.0).abs() < 1e-12);
        assert!((implied_probability("1.5").unwrap() - 1.0 / 1.5).abs() < 1e-12);
        assert_eq!(implied_probability("evens").unwrap(), 0.5);
        assert_eq!(implied_probability("EVS").unwrap(), 0.5);
        assert_eq!(implied_probability(" Even ").unwrap(), 0.5);
        assert!((implied_probability("25/1").unwrap() - 1.0 / 26.0).abs() < 1e-12);
    }

    #[test]
    fn equal_ratios_give_equal_probabilities() {
        let a = implied_probability("2/9").unwrap();
        let b = implied_probability("4/18").unwrap();
        let c = implied_probability("0.5/2.25").unwrap();
        assert!((a - b).abs() < 1e-12);
        assert!((a - c).abs() < 1e-12);
    }

    #[test]
    fn bad_tokens_are_errors_not_zero() {
        assert_eq!(implied_probability(""), Err(OddsParseError::Empty));
        assert!(matches!(
            implied_probability("abc"),
            Err(OddsParseError::Unrecognized(_))
        ));
        assert!(matches!(
            implied_probability("0"),
            Err(OddsParseError::NonPositiveDecimal(_))
        ));
        assert!(matches!(
            implied_probability("-2.0"),
            Err(OddsParseError::NonPositiveDecimal(_))
        ));
        assert!(matches!(
            implied_probability("x/2"),
            Err(OddsParseError::InvalidFraction(_))
        ));
        assert!(matches!(
            implied_probability("1/-1"),
            Err(OddsParseError::InvalidFraction(_))
        ));
        assert!(matches!(
            implied_probability("5/0"),
            Err(OddsParseError::OutOfRange { .. })
        ));
        assert!(matches!(
            implied_probability("0.5"),
            Err(OddsParseError::OutOfRange { .. })
        ));
        assert!(implied_probability("nan").is_err());
    }

    #[test]
    fn ingest_marks_missing_and_trims() {
        let records = vec![
            OddsRecord {
                group: " Red Bull ".to_string(),
                entity: " Max Verstappen".to_string(),
                odds: "2/9 ".to_string(),
            },
            OddsRecord {
                group: "Williams".to_string(),
                entity: "Alex Albon".to_string(),
                odds: "SP".to_string(),
            },
        ];
        let (rows, summary) = ingest(&records);
        assert_eq!(rows[0].group, "Red Bull");
        assert_eq!(rows[0].entity, "Max Verstappen");
        assert!(rows[0].raw_implied_probability.is_some());
        assert_eq!(rows[1].raw_implied_probability, None);
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.priced, 1);
        assert_eq!(summary.unpriced, vec!["Alex Albon".to_string()]);
    }
}
