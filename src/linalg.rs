//! Small dense helpers for the normal equations. Matrices are row-major
//! `Vec<Vec<f64>>`; the designs here have at most a dozen columns.

use crate::error::{DataError, DataResult};

const PIVOT_EPS: f64 = 1e-10;

pub type Matrix = Vec<Vec<f64>>;

/// X'X for a row-major design matrix.
pub fn gram(rows: &[Vec<f64>]) -> Matrix {
    let k = rows.first().map(|r| r.len()).unwrap_or(0);
    let mut out = vec![vec![0.0; k]; k];
    for row in rows {
        for i in 0..k {
            let xi = row[i];
            if xi == 0.0 {
                continue;
            }
            for j in i..k {
                out[i][j] += xi * row[j];
            }
        }
    }
    for i in 0..k {
        for j in 0..i {
            out[i][j] = out[j][i];
        }
    }
    out
}

/// X'y
pub fn cross(rows: &[Vec<f64>], y: &[f64]) -> Vec<f64> {
    let k = rows.first().map(|r| r.len()).unwrap_or(0);
    let mut out = vec![0.0; k];
    for (row, yi) in rows.iter().zip(y) {
        for (o, x) in out.iter_mut().zip(row) {
            *o += x * yi;
        }
    }
    out
}

pub fn mat_vec(a: &Matrix, v: &[f64]) -> Vec<f64> {
    a.iter()
        .map(|row| row.iter().zip(v).map(|(x, y)| x * y).sum())
        .collect()
}

/// Gauss-Jordan inverse with partial pivoting.
///
/// The pivot threshold is relative to the largest diagonal entry so a dummy
/// column that is identically zero (or a copy of another) is reported as
/// [`DataError::SingularDesign`] instead of producing huge coefficients.
pub fn invert(a: &Matrix) -> DataResult<Matrix> {
    let n = a.len();
    if a.iter().any(|row| row.len() != n) {
        return Err(DataError::SingularDesign);
    }
    let scale = a
        .iter()
        .enumerate()
        .map(|(i, row)| row[i].abs())
        .fold(0.0, f64::max)
        .max(1.0);

    let mut m: Matrix = a.clone();
    let mut inv: Matrix = (0..n)
        .map(|i| {
            let mut row = vec![0.0; n];
            row[i] = 1.0;
            row
        })
        .collect();

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&x, &y| m[x][col].abs().total_cmp(&m[y][col].abs()))
            .ok_or(DataError::SingularDesign)?;
        if m[pivot][col].abs() <= PIVOT_EPS * scale {
            return Err(DataError::SingularDesign);
        }
        m.swap(col, pivot);
        inv.swap(col, pivot);

        let d = m[col][col];
        for j in 0..n {
            m[col][j] /= d;
            inv[col][j] /= d;
        }
        for r in 0..n {
            if r == col {
                continue;
            }
            let f = m[r][col];
            if f == 0.0 {
                continue;
            }
            for j in 0..n {
                m[r][j] -= f * m[col][j];
                inv[r][j] -= f * inv[col][j];
            }
        }
    }
    Ok(inv)
}
