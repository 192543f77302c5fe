use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use tracing::{info, warn};

use crate::config::PipelineConfig;

pub struct ExportReport {
    pub sheets: usize,
    pub rows: usize,
    pub missing: Vec<String>,
}

/// Sheet name and the snapshot it is filled from.
pub fn snapshot_sheets(cfg: &PipelineConfig) -> Vec<(&'static str, PathBuf)> {
    vec![
        ("ParsedOdds", cfg.parsed_odds_path()),
        ("Probabilities", cfg.probabilities_path()),
        ("Rates", cfg.rates_path()),
        ("Shape", cfg.shape_path()),
        ("Regression", cfg.regression_path()),
    ]
}

/// Copy every snapshot that exists into one workbook, one sheet each.
/// Numeric cells are written as numbers so they stay sortable in a spreadsheet.
pub fn export_snapshots(path: &Path, sheets: &[(&str, PathBuf)]) -> Result<ExportReport> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let mut report = ExportReport {
        sheets: 0,
        rows: 0,
        missing: Vec::new(),
    };

    for (name, source) in sheets {
        if !source.exists() {
            warn!(sheet = name, path = %source.display(), "snapshot missing; sheet skipped");
            report.missing.push(name.to_string());
            continue;
        }
        let rows = read_rows(source)?;
        let sheet = workbook.add_worksheet();
        sheet.set_name(*name)?;
        write_rows(sheet, &rows, &header)?;
        report.sheets += 1;
        report.rows += rows.len().saturating_sub(1);
    }

    if report.sheets == 0 {
        anyhow::bail!("no snapshots to export");
    }
    workbook
        .save(path)
        .with_context(|| format!("failed writing workbook to {}", path.display()))?;
    info!(path = %path.display(), sheets = report.sheets, rows = report.rows, "workbook written");
    Ok(report)
}

fn read_rows(path: &Path) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("open snapshot {}", path.display()))?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("read snapshot {}", path.display()))?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

fn write_rows(worksheet: &mut Worksheet, rows: &[Vec<String>], header: &Format) -> Result<()> {
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, value) in row.iter().enumerate() {
            let (r, c) = (row_idx as u32, col_idx as u16);
            let written = if row_idx == 0 {
                worksheet.write_string_with_format(r, c, value, header)
            } else if let Some(n) = value.parse::<f64>().ok().filter(|n| n.is_finite()) {
                worksheet.write_number(r, c, n)
            } else {
                worksheet.write_string(r, c, value)
            };
            written.with_context(|| format!("write cell ({row_idx},{col_idx})"))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exports_existing_snapshots_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("rates.csv");
        std::fs::write(&csv_path, "entity,rate\nx,0.25\ny,0.75\n").unwrap();
        let out = dir.path().join("book.xlsx");
        let sheets = vec![
            ("Rates", csv_path),
            ("Shape", dir.path().join("absent.csv")),
        ];
        let report = export_snapshots(&out, &sheets).unwrap();
        assert_eq!(report.sheets, 1);
        assert_eq!(report.rows, 2);
        assert_eq!(report.missing, vec!["Shape".to_string()]);
        assert!(out.exists());
    }

    #[test]
    fn nothing_to_export_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sheets = vec![("Rates", dir.path().join("absent.csv"))];
        assert!(export_snapshots(&dir.path().join("book.xlsx"), &sheets).is_err());
    }
}
