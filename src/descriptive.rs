//! Read-only descriptive statistics over the cleaned cohort.

use serde::Serialize;

use crate::config;
use crate::data::{Cohort, Gate};
use crate::error::{AnalysisError, Result};

/// Counts and retention rates for one experiment arm.
#[derive(Debug, Clone, Serialize)]
pub struct ArmBreakdown {
    pub gate: Gate,
    pub users: usize,
    /// Share of the cohort in this arm, in [0, 1].
    pub share: f64,
    pub day1_retention: f64,
    pub day7_retention: f64,
}

/// Summary statistics for `rounds_played`.
#[derive(Debug, Clone, Serialize)]
pub struct RoundsSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
}

impl RoundsSummary {
    /// Compute from unsorted values. Returns `None` when empty.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len() as f64;
        let min = sorted[0];
        let max = sorted[sorted.len() - 1];
        let mean = sorted.iter().sum::<f64>() / n;
        let median = median_of_sorted(&sorted);
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        Some(Self {
            min,
            max,
            mean,
            median,
            std_dev: variance.sqrt(),
        })
    }
}

/// Median of an ascending slice; even lengths average the two middle values.
pub fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// One equal-width histogram bin: `[start, end)`, last bin closed.
#[derive(Debug, Clone, Serialize)]
pub struct HistogramBin {
    pub start: f64,
    pub end: f64,
    pub count: usize,
}

/// Equal-width histogram over the full post-filter range.
pub fn equal_width_histogram(values: &[f64], num_bins: usize) -> Vec<HistogramBin> {
    if values.is_empty() || num_bins == 0 {
        return vec![];
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let width = (max - min) / num_bins as f64;

    if width <= 0.0 {
        // Degenerate distribution concentrated at a single value.
        return vec![HistogramBin {
            start: min,
            end: max,
            count: values.len(),
        }];
    }

    let mut bins: Vec<HistogramBin> = (0..num_bins)
        .map(|i| HistogramBin {
            start: min + i as f64 * width,
            end: min + (i + 1) as f64 * width,
            count: 0,
        })
        .collect();

    for &v in values {
        let idx = (((v - min) / width) as usize).min(num_bins - 1);
        bins[idx].count += 1;
    }
    bins
}

/// Structured output of the descriptive stage.
#[derive(Debug, Clone, Serialize)]
pub struct DescriptiveReport {
    pub total_users: usize,
    pub arms: Vec<ArmBreakdown>,
    pub rounds: RoundsSummary,
    pub rounds_histogram: Vec<HistogramBin>,
}

/// Compute counts, per-arm retention means, round summary statistics, and a
/// 50-bin histogram. Does not mutate the cohort.
pub fn describe(cohort: &Cohort) -> Result<DescriptiveReport> {
    if cohort.is_empty() {
        return Err(AnalysisError::insufficient(
            "describe",
            "cohort is empty after cleaning",
        ));
    }

    let total = cohort.len();
    let arms = [Gate::Gate30, Gate::Gate40]
        .into_iter()
        .map(|gate| {
            let users = cohort.arm_size(gate);
            let day1: f64 = cohort.arm(gate).map(|r| r.day1()).sum();
            let day7: f64 = cohort.arm(gate).map(|r| r.day7()).sum();
            let n = users.max(1) as f64;
            ArmBreakdown {
                gate,
                users,
                share: users as f64 / total as f64,
                day1_retention: day1 / n,
                day7_retention: day7 / n,
            }
        })
        .collect();

    let rounds = cohort.rounds();
    let summary = RoundsSummary::from_values(&rounds)
        .ok_or_else(|| AnalysisError::insufficient("describe", "no rounds_played values"))?;

    Ok(DescriptiveReport {
        total_users: total,
        arms,
        rounds: summary,
        rounds_histogram: equal_width_histogram(&rounds, config::HISTOGRAM_BINS),
    })
}
