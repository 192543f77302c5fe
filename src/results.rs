use std::collections::HashMap;

use tracing::debug;

use crate::error::{DataError, DataResult};

/// Finishing positions, one row per entity and one column per race.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultMatrix {
    pub entities: Vec<String>,
    /// `positions[entity][race]`, 1-based.
    pub positions: Vec<Vec<u32>>,
}

impl ResultMatrix {
    pub fn new(entities: Vec<String>, positions: Vec<Vec<u32>>) -> DataResult<Self> {
        let matrix = Self {
            entities,
            positions,
        };
        matrix.validate()?;
        Ok(matrix)
    }

    /// Parse the positions text: no header, first column the entity name,
    /// then one finishing position per race. Columns are split on whitespace,
    /// or on commas when a line contains any.
    pub fn parse(text: &str) -> DataResult<Self> {
        let mut entities = Vec::new();
        let mut positions = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let cells: Vec<&str> = if line.contains(',') {
                line.split(',').map(str::trim).collect()
            } else {
                line.split_whitespace().collect()
            };
            let Some((name, rest)) = cells.split_first() else {
                continue;
            };
            if rest.is_empty() {
                return Err(DataError::InvalidResults(format!(
                    "line {}: {name:?} has no race columns",
                    line_no + 1
                )));
            }
            let row = rest
                .iter()
                .map(|cell| parse_position(cell))
                .collect::<Option<Vec<u32>>>()
                .ok_or_else(|| {
                    DataError::InvalidResults(format!(
                        "line {}: {name:?} has a missing or non-integer position",
                        line_no + 1
                    ))
                })?;
            entities.push(name.to_string());
            positions.push(row);
        }
        Self::new(entities, positions)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn race_count(&self) -> usize {
        self.positions.first().map(Vec::len).unwrap_or(0)
    }

    /// Every race must rank all entities exactly once, 1..=N.
    pub fn validate(&self) -> DataResult<()> {
        let n = self.entities.len();
        if n == 0 {
            return Err(DataError::Empty("result matrix"));
        }
        if self.positions.len() != n {
            return Err(DataError::InvalidResults(format!(
                "{} entity names but {} position rows",
                n,
                self.positions.len()
            )));
        }
        let races = self.race_count();
        if races == 0 {
            return Err(DataError::InvalidResults("no race columns".to_string()));
        }
        if let Some((i, row)) = self.positions.iter().enumerate().find(|(_, r)| r.len() != races) {
            return Err(DataError::InvalidResults(format!(
                "{:?} has {} races, expected {races}",
                self.entities[i],
                row.len()
            )));
        }
        let mut seen = vec![false; n];
        for race in 0..races {
            seen.iter_mut().for_each(|s| *s = false);
            for row in &self.positions {
                let pos = row[race] as usize;
                if pos == 0 || pos > n || seen[pos - 1] {
                    return Err(DataError::InvalidResults(format!(
                        "race {} is not a permutation of 1..={n}",
                        race + 1
                    )));
                }
                seen[pos - 1] = true;
            }
        }
        Ok(())
    }
}

fn parse_position(cell: &str) -> Option<u32> {
    let cell = cell.trim();
    if let Ok(v) = cell.parse::<u32>() {
        return Some(v);
    }
    // Some exports write positions as floats ("3.0").
    let f = cell.parse::<f64>().ok()?;
    (f.is_finite() && f >= 0.0 && f.fract() == 0.0).then_some(f as u32)
}

/// Lowercase alphanumerics only, so "Lewis Hamilton" and "LewisHamilton" meet.
pub fn normalize_name(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub group: String,
    pub entity: String,
    /// 0 for the first listed entity of its group, 1 for every later one.
    pub secondary: bool,
}

/// Group membership and role of each entity, in odds-table order.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    pub entries: Vec<RosterEntry>,
    /// Distinct groups in first-seen order.
    pub groups: Vec<String>,
    index: HashMap<String, usize>,
}

impl Roster {
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut roster = Roster::default();
        for (group, entity) in pairs {
            let secondary = roster.groups.iter().any(|g| g == group);
            if !secondary {
                roster.groups.push(group.to_string());
            }
            roster
                .index
                .entry(normalize_name(entity))
                .or_insert(roster.entries.len());
            roster.entries.push(RosterEntry {
                group: group.to_string(),
                entity: entity.to_string(),
                secondary,
            });
        }
        roster
    }

    pub fn lookup(&self, entity: &str) -> Option<&RosterEntry> {
        self.index
            .get(&normalize_name(entity))
            .map(|&i| &self.entries[i])
    }
}

/// One (entity, race) cell of the result matrix joined with the roster.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub entity: String,
    pub group: String,
    pub secondary: bool,
    pub race: usize,
    pub position: f64,
}

/// Flatten race-major: every entity for race 1, then race 2, and so on.
pub fn observations(matrix: &ResultMatrix, roster: &Roster) -> DataResult<Vec<Observation>> {
    let joined: Vec<&RosterEntry> = matrix
        .entities
        .iter()
        .map(|name| {
            roster
                .lookup(name)
                .ok_or_else(|| DataError::UnknownEntity(name.clone()))
        })
        .collect::<DataResult<_>>()?;

    let mut out = Vec::with_capacity(matrix.entity_count() * matrix.race_count());
    for race in 0..matrix.race_count() {
        for (row, entry) in matrix.positions.iter().zip(&joined) {
            out.push(Observation {
                entity: entry.entity.clone(),
                group: entry.group.clone(),
                secondary: entry.secondary,
                race,
                position: f64::from(row[race]),
            });
        }
    }
    debug!(
        observations = out.len(),
        races = matrix.race_count(),
        "flattened result matrix"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whitespace_and_comma_lines() {
        let text = "LewisHamilton 1 2\nGeorgeRussell,2,1\n";
        let m = ResultMatrix::parse(text).unwrap();
        assert_eq!(m.entities, vec!["LewisHamilton", "GeorgeRussell"]);
        assert_eq!(m.positions, vec![vec![1, 2], vec![2, 1]]);
    }

    #[test]
    fn rejects_duplicate_positions_and_ragged_rows() {
        assert!(matches!(
            ResultMatrix::parse("a 1 1\nb 1 2\n"),
            Err(DataError::InvalidResults(_))
        ));
        assert!(matches!(
            ResultMatrix::parse("a 1 2\nb 2\n"),
            Err(DataError::InvalidResults(_))
        ));
        assert!(matches!(
            ResultMatrix::parse("a 1 NA\nb 2 1\n"),
            Err(DataError::InvalidResults(_))
        ));
        assert!(matches!(ResultMatrix::parse(""), Err(DataError::Empty(_))));
    }

    #[test]
    fn float_positions_are_accepted() {
        let m = ResultMatrix::parse("a 1.0 2.0\nb 2.0 1.0\n").unwrap();
        assert_eq!(m.positions[1], vec![2, 1]);
    }

    #[test]
    fn roster_roles_follow_listing_order() {
        let roster = Roster::from_pairs([
            ("Mercedes", "Lewis Hamilton"),
            ("Mercedes", "George Russell"),
            ("Red Bull", "Max Verstappen"),
        ]);
        assert_eq!(roster.groups, vec!["Mercedes", "Red Bull"]);
        assert!(!roster.lookup("LewisHamilton").unwrap().secondary);
        assert!(roster.lookup("george russell").unwrap().secondary);
        assert!(!roster.lookup("Max-Verstappen").unwrap().secondary);
        assert!(roster.lookup("Nobody").is_none());
    }

    #[test]
    fn flattening_is_race_major() {
        let roster = Roster::from_pairs([("A", "x"), ("A", "y")]);
        let m = ResultMatrix::parse("x 1 2 1\ny 2 1 2\n").unwrap();
        let obs = observations(&m, &roster).unwrap();
        let got: Vec<(usize, &str, f64)> = obs
            .iter()
            .map(|o| (o.race, o.entity.as_str(), o.position))
            .collect();
        assert_eq!(
            got,
            vec![
                (0, "x", 1.0),
                (0, "y", 2.0),
                (1, "x", 2.0),
                (1, "y", 1.0),
                (2, "x", 1.0),
                (2, "y", 2.0)
            ]
        );
    }

    #[test]
    fn unknown_entity_is_an_error() {
        let roster = Roster::from_pairs([("A", "x")]);
        let m = ResultMatrix::parse("x 1\nz 2\n").unwrap();
        assert_eq!(
            observations(&m, &roster),
            Err(DataError::UnknownEntity("z".to_string()))
        );
    }
}
