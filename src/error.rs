//! Error taxonomy for the analysis pipeline.
//!
//! Any error aborts the run at the failing stage; there is no partial-result
//! recovery. Messages name the stage and the precondition that failed.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Input file is malformed: missing columns, no rows, nulls, duplicates.
    #[error("input data malformed: {0}")]
    DataFormat(String),

    /// A categorical column held an unexpected level.
    #[error("unexpected schema: {0}")]
    Schema(String),

    /// A stage lacks enough observations for its statistical procedure.
    #[error("insufficient data in {stage}: {detail}")]
    InsufficientData { stage: &'static str, detail: String },

    /// A computation produced non-finite or degenerate values.
    #[error("numerical instability in {stage}: {detail}")]
    NumericalInstability { stage: &'static str, detail: String },

    #[error("csv error: {0}")]
    Csv(#[from] polars::error::PolarsError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("plot rendering failed: {0}")]
    Plot(String),
}

impl AnalysisError {
    pub fn insufficient(stage: &'static str, detail: impl Into<String>) -> Self {
        Self::InsufficientData {
            stage,
            detail: detail.into(),
        }
    }

    pub fn unstable(stage: &'static str, detail: impl Into<String>) -> Self {
        Self::NumericalInstability {
            stage,
            detail: detail.into(),
        }
    }
}

/// Common result type used throughout the application.
pub type Result<T> = std::result::Result<T, AnalysisError>;
