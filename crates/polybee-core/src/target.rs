//! Target heatmap files: `ny` CSV lines of `nx` values each.

use crate::distribution::Distribution2D;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TargetError {
    #[error("failed to read target heatmap {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("target heatmap is empty")]
    Empty,
    #[error("line {line}, column {column}: '{text}' is not a number")]
    NotNumeric {
        line: usize,
        column: usize,
        text: String,
    },
    #[error("line {line}, column {column}: value {value} must be finite and non-negative")]
    InvalidValue {
        line: usize,
        column: usize,
        value: f64,
    },
    #[error("line {line} has {actual} values, expected {expected}")]
    Ragged {
        line: usize,
        expected: usize,
        actual: usize,
    },
    #[error("target heatmap is {actual:?} cells but the environment needs {expected:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

/// Parse CSV text into a unit-mass distribution.
///
/// Rows are `y`, columns `x`. Blank lines are skipped. An all-zero file
/// parses to an all-zero distribution.
pub fn parse_target_csv(text: &str) -> Result<Distribution2D, TargetError> {
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for (line_idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let row = line
            .split(',')
            .enumerate()
            .map(|(col, field)| {
                let field = field.trim();
                let value: f64 = field.parse().map_err(|_| TargetError::NotNumeric {
                    line: line_idx + 1,
                    column: col + 1,
                    text: field.to_string(),
                })?;
                if !value.is_finite() || value < 0.0 {
                    return Err(TargetError::InvalidValue {
                        line: line_idx + 1,
                        column: col + 1,
                        value,
                    });
                }
                Ok(value)
            })
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(first) = rows.first() {
            if row.len() != first.len() {
                return Err(TargetError::Ragged {
                    line: line_idx + 1,
                    expected: first.len(),
                    actual: row.len(),
                });
            }
        }
        rows.push(row);
    }

    let ny = rows.len();
    let nx = rows.first().map_or(0, Vec::len);
    if ny == 0 || nx == 0 {
        return Err(TargetError::Empty);
    }
    let mut d = Distribution2D::zeros(nx, ny);
    for (y, row) in rows.iter().enumerate() {
        for (x, &v) in row.iter().enumerate() {
            d.set(x, y, v);
        }
    }
    Ok(d.normalized())
}

/// Load and check a target against the heatmap dimensions `expected`.
pub fn load_target_csv(
    path: &Path,
    expected: (usize, usize),
) -> Result<Distribution2D, TargetError> {
    let text = fs::read_to_string(path).map_err(|source| TargetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let d = parse_target_csv(&text)?;
    if d.dims() != expected {
        return Err(TargetError::DimensionMismatch {
            expected,
            actual: d.dims(),
        });
    }
    tracing::info!(path = %path.display(), nx = expected.0, ny = expected.1, "loaded target heatmap");
    Ok(d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_transposed_and_normalised() {
        let d = parse_target_csv("1,0,0\n\n0,0,3\n").unwrap();
        assert_eq!(d.dims(), (3, 2));
        assert!((d.get(0, 0) - 0.25).abs() < 1e-12);
        assert!((d.get(2, 1) - 0.75).abs() < 1e-12);
        assert!((d.total() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(parse_target_csv(""), Err(TargetError::Empty)));
        assert!(matches!(parse_target_csv("\n  \n"), Err(TargetError::Empty)));
        assert!(matches!(
            parse_target_csv("1,2\n3,x\n"),
            Err(TargetError::NotNumeric { line: 2, column: 2, .. })
        ));
        assert!(matches!(
            parse_target_csv("1,2\n3\n"),
            Err(TargetError::Ragged { line: 2, expected: 2, actual: 1 })
        ));
        assert!(matches!(
            parse_target_csv("1,-2\n"),
            Err(TargetError::InvalidValue { .. })
        ));
    }

    #[test]
    fn load_checks_dimensions() {
        let path = std::env::temp_dir().join(format!("polybee-target-{}.csv", std::process::id()));
        fs::write(&path, "1,1\n1,1\n").unwrap();
        assert!(load_target_csv(&path, (2, 2)).is_ok());
        assert!(matches!(
            load_target_csv(&path, (3, 2)),
            Err(TargetError::DimensionMismatch { .. })
        ));
        fs::remove_file(&path).unwrap();
        assert!(matches!(
            load_target_csv(&path, (2, 2)),
            Err(TargetError::Io { .. })
        ));
    }
}
