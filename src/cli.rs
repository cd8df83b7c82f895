//! Command-line interface definitions and argument parsing.

use clap::Parser;

use crate::config;

/// Batch analysis of the gate-placement A/B test dataset.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input CSV file
    #[arg(short, long, default_value = "cookie_cats.csv")]
    pub input: String,

    /// Directory for rendered plots
    #[arg(long, default_value = "plots")]
    pub plot_dir: String,

    /// Skip plot rendering
    #[arg(long)]
    pub no_plots: bool,

    /// Write all stage results as JSON to this path
    #[arg(long)]
    pub json: Option<String>,

    /// RNG seed for posterior sampling
    #[arg(long, default_value_t = config::DEFAULT_SEED)]
    pub seed: u64,

    /// Monte Carlo draws per group for the posterior comparison
    #[arg(long, default_value_t = config::DEFAULT_POSTERIOR_DRAWS)]
    pub posterior_draws: usize,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}
