//! Plain-text result reports.
//!
//! The report is the interchange surface with downstream tooling: the
//! confidence token on the first line, the 3×3 transform as three
//! comma-separated rows under a `TRANSFORM:` header, and the inlier pairs
//! under an `INLIERS:` header, one `refX, refY, matchX, matchY` line each.
//! Values use default float formatting so a written report parses back to
//! the exact same numbers.

use std::io::{BufRead, Write};
use std::path::Path;

use nalgebra::Matrix3;

use crate::confidence::Confidence;
use crate::matching::Correspondence;
use crate::register::RegistrationResult;

#[derive(Debug)]
pub enum ReportError {
    Io(std::io::Error),
    Parse { line: usize, message: String },
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "report i/o error: {}", e),
            Self::Parse { line, message } => {
                write!(f, "report parse error at line {}: {}", line, message)
            }
        }
    }
}

impl std::error::Error for ReportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse { .. } => None,
        }
    }
}

impl From<std::io::Error> for ReportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Write a registration result to `path`.
pub fn write_report(path: &Path, result: &RegistrationResult) -> Result<(), ReportError> {
    let file = std::fs::File::create(path)?;
    let mut out = std::io::BufWriter::new(file);

    writeln!(out, "{}", result.confidence.as_str())?;
    writeln!(out, "TRANSFORM:")?;
    for row in 0..3 {
        writeln!(
            out,
            "{}, {}, {}",
            result.transform[(row, 0)],
            result.transform[(row, 1)],
            result.transform[(row, 2)]
        )?;
    }
    writeln!(out, "INLIERS:")?;
    for c in &result.inliers {
        writeln!(
            out,
            "{}, {}, {}, {}",
            c.reference[0], c.reference[1], c.matched[0], c.matched[1]
        )?;
    }
    out.flush()?;
    Ok(())
}

fn parse_floats(line: &str, line_no: usize, expected: usize) -> Result<Vec<f64>, ReportError> {
    let values: Result<Vec<f64>, _> = line.split(',').map(|t| t.trim().parse::<f64>()).collect();
    let values = values.map_err(|e| ReportError::Parse {
        line: line_no,
        message: format!("bad number: {}", e),
    })?;
    if values.len() != expected {
        return Err(ReportError::Parse {
            line: line_no,
            message: format!("expected {} values, found {}", expected, values.len()),
        });
    }
    Ok(values)
}

/// Read a previously written report back.
pub fn read_report(path: &Path) -> Result<RegistrationResult, ReportError> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let lines: Vec<String> = reader.lines().collect::<Result<_, _>>()?;

    let parse_err = |line: usize, message: &str| ReportError::Parse {
        line,
        message: message.to_string(),
    };

    let confidence: Confidence = lines
        .first()
        .ok_or_else(|| parse_err(1, "empty report"))?
        .trim()
        .parse()
        .map_err(|e: String| parse_err(1, &e))?;

    if lines.get(1).map(|l| l.trim()) != Some("TRANSFORM:") {
        return Err(parse_err(2, "expected TRANSFORM: header"));
    }
    let mut rows = [[0.0f64; 3]; 3];
    for (row, slot) in rows.iter_mut().enumerate() {
        let line_no = 3 + row;
        let line = lines
            .get(2 + row)
            .ok_or_else(|| parse_err(line_no, "missing transform row"))?;
        let v = parse_floats(line, line_no, 3)?;
        *slot = [v[0], v[1], v[2]];
    }
    let transform = Matrix3::new(
        rows[0][0], rows[0][1], rows[0][2],
        rows[1][0], rows[1][1], rows[1][2],
        rows[2][0], rows[2][1], rows[2][2],
    );

    if lines.get(5).map(|l| l.trim()) != Some("INLIERS:") {
        return Err(parse_err(6, "expected INLIERS: header"));
    }
    let mut inliers = Vec::new();
    for (offset, line) in lines[6..].iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let v = parse_floats(line, 7 + offset, 4)?;
        inliers.push(Correspondence {
            reference: [v[0], v[1]],
            matched: [v[2], v[3]],
        });
    }

    Ok(RegistrationResult {
        transform,
        inliers,
        confidence,
        threshold_px: 0.0,
    })
}
