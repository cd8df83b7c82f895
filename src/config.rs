//! Named analysis constants.
//!
//! The pipeline's fixed thresholds live here rather than inline so its
//! assumptions are auditable and testable independently.

/// Rows with more game rounds than this are treated as bot or anomalous
/// activity and dropped during cleaning. Chosen from the long tail of the
/// observed distribution.
pub const MAX_ROUNDS_CUTOFF: u32 = 1000;

/// Number of equal-width bins for the `rounds_played` histogram.
pub const HISTOGRAM_BINS: usize = 50;

/// Probability cutoff for classifying a user as retained in the predictive
/// model.
pub const CLASSIFICATION_THRESHOLD: f64 = 0.5;

/// Beta prior parameters for the Bernoulli retention model. Beta(1, 1) is
/// the flat prior.
pub const PRIOR_ALPHA: f64 = 1.0;
pub const PRIOR_BETA: f64 = 1.0;

/// Default number of Monte Carlo draws per group when comparing posteriors.
pub const DEFAULT_POSTERIOR_DRAWS: usize = 100_000;

/// Default RNG seed for posterior sampling, fixed so runs are reproducible.
pub const DEFAULT_SEED: u64 = 90189;

/// Propensity scores are clipped into this range before weighting. Scores
/// near 0 or 1 would otherwise produce unbounded inverse-probability
/// weights.
pub const PROPENSITY_CLIP_MIN: f64 = 0.01;
pub const PROPENSITY_CLIP_MAX: f64 = 0.99;

/// IRLS iteration cap and convergence tolerance for logistic fits.
pub const IRLS_MAX_ITERATIONS: usize = 50;
pub const IRLS_TOLERANCE: f64 = 1e-8;
