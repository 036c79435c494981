use std::collections::BTreeMap;
use std::fmt;

/// One cell of an MTF weight matrix. Only column 1 carries the
/// true/false judgement; other columns are ignored by the mapper.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightRecord {
    pub row_number: i64,
    pub column_number: i64,
    pub weight: f64,
}

/// Per-row scoring fractions for the multichoice answers derived from
/// an MTF question, keyed by row number.
#[derive(Debug, Clone, PartialEq)]
pub struct FractionMap {
    pub by_row: BTreeMap<i64, f64>,
    pub num_rows: usize,
    /// Set when a computed fraction is not in the grade-option table.
    /// Non-fatal: the question still migrates.
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// No row has a strictly positive column-1 weight. Such a question
    /// has no valid multichoice rendering and must be skipped.
    AllIncorrect,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::AllIncorrect => write!(f, "all answers are incorrect"),
        }
    }
}

impl std::error::Error for MapError {}

const ACCEPT_EPSILON: f64 = 1e-7;

/// The grade-option table: magnitudes 1/n for n in 1..=20, both signs
/// (40 values; -1.0 is the n = 1 negative entry). Generated rather than
/// transcribed so the table cannot drift.
pub fn accepted_fractions() -> Vec<f64> {
    let mut out = Vec::with_capacity(40);
    for n in 1..=20 {
        out.push(1.0 / n as f64);
    }
    for n in 1..=20 {
        out.push(-1.0 / n as f64);
    }
    out
}

pub fn is_accepted_fraction(value: f64) -> bool {
    accepted_fractions()
        .iter()
        .any(|f| (value - f).abs() < ACCEPT_EPSILON)
}

/// Maps an MTF question's weight matrix to per-row multichoice fractions.
///
/// A row is correct iff its column-1 weight is strictly positive. Every
/// correct row gets `1/num_correct`, every incorrect row `-1/num_rows`.
/// Pure and order-independent: the same set of records always yields the
/// same map.
pub fn map_weights(records: &[WeightRecord]) -> Result<FractionMap, MapError> {
    let mut judgement: BTreeMap<i64, f64> = BTreeMap::new();
    for rec in records {
        if rec.column_number == 1 {
            judgement.insert(rec.row_number, rec.weight);
        }
    }

    let num_rows = judgement.len();
    let num_correct = judgement.values().filter(|w| **w > 0.0).count();

    if num_correct == 0 {
        return Err(MapError::AllIncorrect);
    }

    let positive = 1.0 / num_correct as f64;
    let negative = -1.0 / num_rows as f64;

    let warning = if !is_accepted_fraction(positive) && !is_accepted_fraction(negative) {
        Some(format!(
            "fractions {:.7} / {:.7} are not standard grade options",
            positive, negative
        ))
    } else {
        None
    };

    let by_row = judgement
        .into_iter()
        .map(|(row, w)| (row, if w > 0.0 { positive } else { negative }))
        .collect();

    Ok(FractionMap {
        by_row,
        num_rows,
        warning,
    })
}
