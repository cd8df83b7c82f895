//! Pipeline orchestration: load, clean, and run every analysis stage in
//! dependency order, collecting one structured record per stage.

use serde::Serialize;

use crate::bayes::{self, BayesReport};
use crate::causal::{self, CausalReport};
use crate::data::{self, CleanSummary, Cohort};
use crate::descriptive::{self, DescriptiveReport};
use crate::error::Result;
use crate::hypothesis::{self, WelchTest};
use crate::predict::{self, PredictReport};
use crate::segment::{self, SegmentReport};
use crate::survival::{self, SurvivalReport};

/// Inputs the pipeline needs beyond the fixed analysis constants.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub input: String,
    pub seed: u64,
    pub posterior_draws: usize,
}

/// Every stage's structured result, in pipeline order.
#[derive(Debug, Serialize)]
pub struct PipelineReport {
    pub cleaning: CleanSummary,
    pub descriptive: DescriptiveReport,
    pub hypothesis: Vec<WelchTest>,
    pub survival: SurvivalReport,
    pub causal: CausalReport,
    pub bayes: BayesReport,
    pub segments: SegmentReport,
    pub predictive: PredictReport,
}

/// Run the whole pipeline against one CSV. Fails fast: the first stage
/// error aborts the run.
pub fn run(options: &PipelineOptions) -> Result<(Cohort, PipelineReport)> {
    log::info!("loading {}", options.input);
    let (cohort, cleaning) = data::load_and_clean(&options.input)?;
    log::info!(
        "cohort ready: {} users ({} dropped as outliers)",
        cleaning.rows_kept,
        cleaning.rows_dropped
    );

    log::info!("describing cohort");
    let descriptive = descriptive::describe(&cohort)?;

    log::info!("running Welch tests");
    let hypothesis = hypothesis::retention_tests(&cohort)?;

    log::info!("fitting survival curves");
    let survival = survival::analyze_survival(&cohort)?;

    log::info!("estimating causal effects");
    let causal = causal::estimate_effects(&cohort)?;

    log::info!("sampling posteriors ({} draws)", options.posterior_draws);
    let bayes = bayes::estimate_posteriors(&cohort, options.posterior_draws, options.seed)?;

    log::info!("segmenting by engagement");
    let (bands, segments) = segment::split_by_engagement(&cohort)?;

    log::info!("fitting predictive model");
    let predictive = predict::fit_retention_model(&cohort, &bands)?;

    Ok((
        cohort,
        PipelineReport {
            cleaning,
            descriptive,
            hypothesis,
            survival,
            causal,
            bayes,
            segments,
            predictive,
        },
    ))
}
