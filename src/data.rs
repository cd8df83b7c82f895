//! CSV ingestion and cleaning for the gate-placement cohort using Polars.

use std::collections::HashSet;
use std::fmt;

use polars::prelude::*;
use serde::Serialize;

use crate::config;
use crate::error::{AnalysisError, Result};

/// Columns the input file must carry, in any order.
pub const REQUIRED_COLUMNS: [&str; 5] = [
    "userid",
    "version",
    "sum_gamerounds",
    "retention_1",
    "retention_7",
];

/// Experimental assignment: the level at which the progress gate was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Gate {
    /// Gate at level 30 (control).
    Gate30,
    /// Gate at level 40 (treatment).
    Gate40,
}

impl Gate {
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "gate_30" => Some(Self::Gate30),
            "gate_40" => Some(Self::Gate40),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Gate30 => "gate_30",
            Self::Gate40 => "gate_40",
        }
    }

    /// Gate 40 is the treatment arm of the experiment.
    pub fn is_treatment(self) -> bool {
        matches!(self, Self::Gate40)
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One user's observed behavior over the 14-day window.
#[derive(Debug, Clone, Serialize)]
pub struct UserRecord {
    pub user_id: u64,
    pub gate: Gate,
    pub rounds_played: u32,
    pub retained_day1: bool,
    pub retained_day7: bool,
}

impl UserRecord {
    /// Day-1 retention as 0/1 for arithmetic.
    pub fn day1(&self) -> f64 {
        f64::from(u8::from(self.retained_day1))
    }

    /// Day-7 retention as 0/1 for arithmetic.
    pub fn day7(&self) -> f64 {
        f64::from(u8::from(self.retained_day7))
    }
}

/// The in-memory dataset every stage reads from. Built once at load,
/// shrunk once by the outlier filter, never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Cohort {
    pub rows: Vec<UserRecord>,
}

impl Cohort {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate the rows belonging to one experiment arm.
    pub fn arm(&self, gate: Gate) -> impl Iterator<Item = &UserRecord> {
        self.rows.iter().filter(move |r| r.gate == gate)
    }

    pub fn arm_size(&self, gate: Gate) -> usize {
        self.arm(gate).count()
    }

    pub fn rounds(&self) -> Vec<f64> {
        self.rows
            .iter()
            .map(|r| f64::from(r.rounds_played))
            .collect()
    }
}

/// Bookkeeping from the cleaning pass.
#[derive(Debug, Clone, Serialize)]
pub struct CleanSummary {
    pub rows_loaded: usize,
    pub rows_kept: usize,
    pub rows_dropped: usize,
}

/// Load the cohort CSV, validate its schema, and apply the outlier filter.
///
/// Fails with [`AnalysisError::DataFormat`] on missing columns, zero rows,
/// nulls, or duplicate user ids, and with [`AnalysisError::Schema`] if the
/// `version` column holds anything other than the two gate labels.
pub fn load_and_clean(path: &str) -> Result<(Cohort, CleanSummary)> {
    let raw = load_cohort(path)?;
    Ok(clean_cohort(raw))
}

/// Read and validate the raw cohort without filtering.
pub fn load_cohort(path: &str) -> Result<Cohort> {
    let df = CsvReader::from_path(path)?
        .has_header(true)
        .finish()
        .map_err(|e| match e {
            PolarsError::NoData(msg) => {
                AnalysisError::DataFormat(format!("input file has no data rows: {msg}"))
            }
            other => AnalysisError::Csv(other),
        })?;

    let names = df.get_column_names();
    for required in REQUIRED_COLUMNS {
        if !names.contains(&required) {
            return Err(AnalysisError::DataFormat(format!(
                "required column '{required}' is missing (found: {names:?})"
            )));
        }
    }
    if df.height() == 0 {
        return Err(AnalysisError::DataFormat(
            "input file contains a header but no data rows".into(),
        ));
    }

    extract_records(&df)
}

fn extract_records(df: &DataFrame) -> Result<Cohort> {
    let user_ids = df.column("userid")?.cast(&DataType::UInt64)?;
    let user_ids = user_ids.u64()?;
    let versions = df.column("version")?;
    let versions = versions.utf8()?;
    // Non-strict cast turns negative round counts into nulls, which the
    // null check below rejects.
    let rounds = df.column("sum_gamerounds")?.cast(&DataType::UInt32)?;
    let rounds = rounds.u32()?;
    let day1 = boolean_values(df, "retention_1")?;
    let day7 = boolean_values(df, "retention_7")?;

    let mut rows = Vec::with_capacity(df.height());
    let mut seen_ids = HashSet::with_capacity(df.height());

    for i in 0..df.height() {
        let user_id = user_ids
            .get(i)
            .ok_or_else(|| AnalysisError::DataFormat(format!("row {i}: invalid userid")))?;
        if !seen_ids.insert(user_id) {
            return Err(AnalysisError::DataFormat(format!(
                "duplicate userid {user_id} at row {i}"
            )));
        }
        let label = versions
            .get(i)
            .ok_or_else(|| AnalysisError::DataFormat(format!("row {i}: missing version")))?;
        let gate = Gate::parse(label).ok_or_else(|| {
            AnalysisError::Schema(format!(
                "row {i}: version '{label}' is not one of gate_30/gate_40"
            ))
        })?;
        let rounds_played = rounds
            .get(i)
            .ok_or_else(|| AnalysisError::DataFormat(format!("row {i}: invalid sum_gamerounds")))?;

        rows.push(UserRecord {
            user_id,
            gate,
            rounds_played,
            retained_day1: day1[i],
            retained_day7: day7[i],
        });
    }

    Ok(Cohort { rows })
}

fn null_value(column: &str, row: usize) -> AnalysisError {
    AnalysisError::DataFormat(format!("row {row}: missing {column}"))
}

/// Read a boolean-like column regardless of how the CSV reader typed it:
/// native booleans, TRUE/FALSE literals of any casing, or 0/1 integers.
fn boolean_values(df: &DataFrame, column: &str) -> Result<Vec<bool>> {
    let series = df.column(column)?;
    match series.dtype() {
        DataType::Boolean => series
            .bool()?
            .into_iter()
            .enumerate()
            .map(|(i, v)| v.ok_or_else(|| null_value(column, i)))
            .collect(),
        DataType::Utf8 => series
            .utf8()?
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                let v = v.ok_or_else(|| null_value(column, i))?;
                match v.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" => Ok(true),
                    "false" | "0" => Ok(false),
                    other => Err(AnalysisError::DataFormat(format!(
                        "row {i}: {column} value '{other}' is not boolean-like"
                    ))),
                }
            })
            .collect(),
        _ => {
            let cast = series.cast(&DataType::Int64)?;
            cast.i64()?
                .into_iter()
                .enumerate()
                .map(|(i, v)| {
                    v.map(|x| x != 0).ok_or_else(|| null_value(column, i))
                })
                .collect()
        }
    }
}

/// Drop rows above the round-count cutoff and report how many went.
pub fn clean_cohort(raw: Cohort) -> (Cohort, CleanSummary) {
    let rows_loaded = raw.len();
    let rows: Vec<UserRecord> = raw
        .rows
        .into_iter()
        .filter(|r| r.rounds_played <= config::MAX_ROUNDS_CUTOFF)
        .collect();
    let rows_kept = rows.len();
    let rows_dropped = rows_loaded - rows_kept;

    if rows_dropped > 0 {
        log::warn!(
            "dropped {rows_dropped} of {rows_loaded} rows with sum_gamerounds > {}",
            config::MAX_ROUNDS_CUTOFF
        );
    }

    (
        Cohort { rows },
        CleanSummary {
            rows_loaded,
            rows_kept,
            rows_dropped,
        },
    )
}
