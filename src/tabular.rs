use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{DataError, DataResult};
use crate::odds::OddsRecord;
use crate::results::ResultMatrix;

const GROUP_ALIASES: &[&str] = &["team", "group", "constructor"];
const ENTITY_ALIASES: &[&str] = &["driver", "entity", "name"];
const ODDS_ALIASES: &[&str] = &["odds", "bookmakers odds", "bookmaker odds"];

/// `;` when the header line splits into more fields on it than on `,`.
pub fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    if header.matches(';').count() > header.matches(',').count() {
        b';'
    } else {
        b','
    }
}

fn find_column(headers: &[String], aliases: &[&str], column: &str) -> DataResult<usize> {
    headers
        .iter()
        .position(|h| aliases.contains(&h.as_str()))
        .ok_or_else(|| DataError::MissingColumn {
            column: column.to_string(),
            found: headers.to_vec(),
        })
}

/// Odds table with group, entity and odds columns, header names matched
/// case-insensitively against their aliases. Rows without an entity are skipped.
pub fn parse_odds_table(text: &str) -> DataResult<Vec<OddsRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(text))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| DataError::Malformed(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();
    let group_col = find_column(&headers, GROUP_ALIASES, "group")?;
    let entity_col = find_column(&headers, ENTITY_ALIASES, "entity")?;
    let odds_col = find_column(&headers, ODDS_ALIASES, "odds")?;

    let mut out = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| DataError::Malformed(e.to_string()))?;
        let cell = |i: usize| row.get(i).unwrap_or("").trim().to_string();
        let entity = cell(entity_col);
        if entity.is_empty() {
            continue;
        }
        out.push(OddsRecord {
            group: cell(group_col),
            entity,
            odds: cell(odds_col),
        });
    }
    if out.is_empty() {
        return Err(DataError::Empty("odds table"));
    }
    Ok(out)
}

pub fn read_odds_table(path: &Path) -> Result<Vec<OddsRecord>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("read odds table {}", path.display()))?;
    parse_odds_table(&text).with_context(|| format!("parse odds table {}", path.display()))
}

pub fn read_positions(path: &Path) -> Result<ResultMatrix> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("read positions {}", path.display()))?;
    ResultMatrix::parse(&text).with_context(|| format!("parse positions {}", path.display()))
}

/// Write a snapshot with a header row taken from the record's field names.
pub fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let mut w = csv::Writer::from_path(path)
        .with_context(|| format!("create snapshot {}", path.display()))?;
    for record in records {
        w.serialize(record)
            .with_context(|| format!("write snapshot {}", path.display()))?;
    }
    w.flush()?;
    Ok(())
}

pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("open snapshot {}", path.display()))?;
    let mut out = Vec::new();
    for (i, row) in reader.deserialize().enumerate() {
        let record: T = row.with_context(|| format!("{} row {}", path.display(), i + 2))?;
        out.push(record);
    }
    Ok(out)
}
