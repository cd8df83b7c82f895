//! gatelab: batch analysis of a mobile-game gate-placement A/B test.
//!
//! One CSV of per-user records goes in; descriptive statistics, Welch
//! t-tests, Kaplan-Meier survival curves, propensity-score causal estimates,
//! Beta-Bernoulli posteriors, an engagement segmentation, and a logistic
//! retention model come out, as structured records plus rendered plots.

pub mod bayes;
pub mod causal;
pub mod cli;
pub mod config;
pub mod data;
pub mod descriptive;
pub mod error;
pub mod hypothesis;
pub mod logit;
pub mod pipeline;
pub mod predict;
pub mod segment;
pub mod survival;
pub mod viz;

// Re-export public items for easier access
pub use cli::Args;
pub use data::{Cohort, Gate, UserRecord};
pub use error::{AnalysisError, Result};
pub use pipeline::{run, PipelineOptions, PipelineReport};
