//! Engagement segmentation by a median split of `rounds_played`.

use serde::Serialize;

use crate::data::{Cohort, Gate};
use crate::descriptive::median_of_sorted;
use crate::error::{AnalysisError, Result};

/// Engagement band relative to the cohort median.
///
/// The split is strict: `High` means `rounds_played > median`, so ties at
/// the median land in `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EngagementBand {
    High,
    Low,
}

impl EngagementBand {
    pub fn label(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Low => "low",
        }
    }

    pub fn is_high(self) -> bool {
        matches!(self, Self::High)
    }
}

/// Retention within one (gate × band) cell.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentCell {
    pub gate: Gate,
    pub band: EngagementBand,
    pub users: usize,
    pub day1_retention: f64,
    pub day7_retention: f64,
}

/// Structured output of the segmentation stage.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentReport {
    pub median_rounds: f64,
    pub cells: Vec<SegmentCell>,
}

/// Label every user high/low engagement and recompute retention per
/// (gate × band) cell. The band vector is aligned with cohort row order so
/// the predictive stage can reuse it as a derived column.
pub fn split_by_engagement(cohort: &Cohort) -> Result<(Vec<EngagementBand>, SegmentReport)> {
    if cohort.is_empty() {
        return Err(AnalysisError::insufficient(
            "segment",
            "cohort is empty after cleaning",
        ));
    }

    let mut sorted = cohort.rounds();
    sorted.sort_by(f64::total_cmp);
    let median_rounds = median_of_sorted(&sorted);

    let bands: Vec<EngagementBand> = cohort
        .rows
        .iter()
        .map(|r| {
            if f64::from(r.rounds_played) > median_rounds {
                EngagementBand::High
            } else {
                EngagementBand::Low
            }
        })
        .collect();

    let mut cells = vec![];
    for gate in [Gate::Gate30, Gate::Gate40] {
        for band in [EngagementBand::High, EngagementBand::Low] {
            let members: Vec<usize> = cohort
                .rows
                .iter()
                .enumerate()
                .filter(|(i, r)| r.gate == gate && bands[*i] == band)
                .map(|(i, _)| i)
                .collect();
            let users = members.len();
            let n = users.max(1) as f64;
            let day1: f64 = members.iter().map(|&i| cohort.rows[i].day1()).sum();
            let day7: f64 = members.iter().map(|&i| cohort.rows[i].day7()).sum();
            cells.push(SegmentCell {
                gate,
                band,
                users,
                day1_retention: day1 / n,
                day7_retention: day7 / n,
            });
        }
    }

    Ok((
        bands,
        SegmentReport {
            median_rounds,
            cells,
        },
    ))
}
