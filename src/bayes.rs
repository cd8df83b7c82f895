//! Beta-Bernoulli posteriors for day-1 retention per experiment arm.
//!
//! Each arm's retention is modelled as Bernoulli with a Beta(1, 1) prior, so
//! the posterior is Beta(1 + successes, 1 + failures). The externally useful
//! output is `P(treatment > control)` under the two posteriors, estimated by
//! seeded Monte Carlo.

use rand::distributions::Distribution;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use serde::Serialize;
use statrs::distribution::{Beta, ContinuousCDF};

use crate::config;
use crate::data::{Cohort, Gate};
use crate::error::{AnalysisError, Result};

/// Posterior over one arm's day-1 retention rate.
#[derive(Debug, Clone, Serialize)]
pub struct PosteriorSummary {
    pub gate: Gate,
    pub successes: usize,
    pub failures: usize,
    pub alpha: f64,
    pub beta: f64,
    pub mean: f64,
    pub ci_low: f64,
    pub ci_high: f64,
}

impl PosteriorSummary {
    /// Beta(prior_alpha + s, prior_beta + f) posterior with its analytic
    /// mean and a 95% credible interval.
    pub fn from_counts(gate: Gate, successes: usize, failures: usize) -> Result<Self> {
        let alpha = config::PRIOR_ALPHA + successes as f64;
        let beta = config::PRIOR_BETA + failures as f64;
        let dist = Beta::new(alpha, beta)
            .map_err(|e| AnalysisError::unstable("bayes", e.to_string()))?;
        Ok(Self {
            gate,
            successes,
            failures,
            alpha,
            beta,
            mean: alpha / (alpha + beta),
            ci_low: dist.inverse_cdf(0.025),
            ci_high: dist.inverse_cdf(0.975),
        })
    }
}

/// Structured output of the Bayesian stage.
#[derive(Debug, Clone, Serialize)]
pub struct BayesReport {
    pub control: PosteriorSummary,
    pub treatment: PosteriorSummary,
    pub draws: usize,
    pub seed: u64,
    /// Monte Carlo estimate of P(treatment rate > control rate).
    pub prob_treatment_better: f64,
}

/// Fit both posteriors and compare them with `draws` seeded samples each.
pub fn estimate_posteriors(cohort: &Cohort, draws: usize, seed: u64) -> Result<BayesReport> {
    if draws == 0 {
        return Err(AnalysisError::insufficient(
            "bayes",
            "posterior comparison needs at least one draw",
        ));
    }

    let control = posterior_for_arm(cohort, Gate::Gate30)?;
    let treatment = posterior_for_arm(cohort, Gate::Gate40)?;

    let control_dist = Beta::new(control.alpha, control.beta)
        .map_err(|e| AnalysisError::unstable("bayes", e.to_string()))?;
    let treatment_dist = Beta::new(treatment.alpha, treatment.beta)
        .map_err(|e| AnalysisError::unstable("bayes", e.to_string()))?;

    let mut rng = Pcg64::seed_from_u64(seed);
    let mut wins = 0_usize;
    for _ in 0..draws {
        let c: f64 = control_dist.sample(&mut rng);
        let t: f64 = treatment_dist.sample(&mut rng);
        if t > c {
            wins += 1;
        }
    }

    Ok(BayesReport {
        control,
        treatment,
        draws,
        seed,
        prob_treatment_better: wins as f64 / draws as f64,
    })
}

fn posterior_for_arm(cohort: &Cohort, gate: Gate) -> Result<PosteriorSummary> {
    let successes = cohort.arm(gate).filter(|r| r.retained_day1).count();
    let failures = cohort.arm_size(gate) - successes;
    PosteriorSummary::from_counts(gate, successes, failures)
}
