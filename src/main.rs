//! gatelab entrypoint: runs the whole analysis pipeline against one CSV and
//! prints each stage's summary.

use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use gatelab::pipeline::{self, PipelineOptions, PipelineReport};
use gatelab::{viz, Args};

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let start = Instant::now();
    let options = PipelineOptions {
        input: args.input.clone(),
        seed: args.seed,
        posterior_draws: args.posterior_draws,
    };

    let (_cohort, report) = pipeline::run(&options)?;
    print_report(&report);

    if !args.no_plots {
        viz::render_all(
            &args.plot_dir,
            &report.descriptive,
            &report.survival,
            &report.predictive.roc,
        )?;
        println!("\nPlots written to {}/", args.plot_dir);
    }

    if let Some(path) = &args.json {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        println!("Stage records written to {path}");
    }

    println!(
        "\n=== Pipeline complete in {:.2}s ===",
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn print_report(report: &PipelineReport) {
    println!("=== Cohort ===");
    println!(
        "Loaded {} rows, kept {} ({} outliers dropped)",
        report.cleaning.rows_loaded, report.cleaning.rows_kept, report.cleaning.rows_dropped
    );
    for arm in &report.descriptive.arms {
        println!(
            "  {}: {} users ({:.1}%)  d1={:.4}  d7={:.4}",
            arm.gate,
            arm.users,
            arm.share * 100.0,
            arm.day1_retention,
            arm.day7_retention
        );
    }
    let rounds = &report.descriptive.rounds;
    println!(
        "  rounds played: mean={:.1} median={:.0} sd={:.1} range=[{:.0}, {:.0}]",
        rounds.mean, rounds.median, rounds.std_dev, rounds.min, rounds.max
    );

    println!("\n=== Welch t-tests (treatment - control) ===");
    for test in &report.hypothesis {
        println!(
            "  {}: diff={:+.5}  t={:.3}  df={:.0}  p={:.4}  95% CI [{:+.5}, {:+.5}]",
            test.metric, test.diff, test.t_stat, test.df, test.p_value, test.ci_low, test.ci_high
        );
    }

    println!("\n=== Survival (event = churn by day 7) ===");
    for curve in &report.survival.curves {
        let median = curve
            .median_rounds
            .map_or("n/a".to_string(), |m| format!("{m:.0}"));
        println!(
            "  {}: {} users, {} censored, median survival {} rounds",
            curve.gate, curve.subjects, curve.censored, median
        );
    }
    let log_rank = &report.survival.log_rank;
    println!(
        "  log-rank: chi2={:.3} (df=1)  p={:.4}",
        log_rank.chi_square, log_rank.p_value
    );

    println!("\n=== Causal estimates ===");
    let matching = &report.causal.matching;
    println!(
        "  matched pairs: {}  d7 diff={:+.5}  p={:.4}",
        matching.pairs, matching.welch_day7.diff, matching.welch_day7.p_value
    );
    if report.causal.propensity.clipped_scores > 0 {
        println!(
            "  ({} propensity scores clipped)",
            report.causal.propensity.clipped_scores
        );
    }
    let ipw = &report.causal.ipw;
    println!(
        "  IPW: odds ratio={:.4}  direction={}  (weighted n: control={:.0}, treatment={:.0})",
        ipw.odds_ratio, ipw.effect_direction, ipw.weight_sum_control, ipw.weight_sum_treatment
    );

    println!("\n=== Bayesian day-1 retention ===");
    for posterior in [&report.bayes.control, &report.bayes.treatment] {
        println!(
            "  {}: mean={:.4}  95% CrI [{:.4}, {:.4}]",
            posterior.gate, posterior.mean, posterior.ci_low, posterior.ci_high
        );
    }
    println!(
        "  P(gate_40 > gate_30) = {:.4}  ({} draws, seed {})",
        report.bayes.prob_treatment_better, report.bayes.draws, report.bayes.seed
    );

    println!(
        "\n=== Segments (median = {:.1} rounds) ===",
        report.segments.median_rounds
    );
    for cell in &report.segments.cells {
        println!(
            "  {} / {}: {} users  d1={:.4}  d7={:.4}",
            cell.gate,
            cell.band.label(),
            cell.users,
            cell.day1_retention,
            cell.day7_retention
        );
    }

    println!("\n=== Predictive model (day-7 retention) ===");
    for coefficient in &report.predictive.coefficients {
        println!(
            "  {:>14}: {:+.5}  se={:.5}  z={:+.2}  p={:.4}",
            coefficient.name,
            coefficient.estimate,
            coefficient.std_error,
            coefficient.z_value,
            coefficient.p_value
        );
    }
    let confusion = &report.predictive.confusion;
    println!(
        "  confusion: TP={} FP={} TN={} FN={}",
        confusion.true_positive,
        confusion.false_positive,
        confusion.true_negative,
        confusion.false_negative
    );
    println!(
        "  accuracy={:.4}  sensitivity={:.4}  specificity={:.4}  kappa={:.4}",
        confusion.accuracy, confusion.sensitivity, confusion.specificity, confusion.kappa
    );
    println!(
        "  no-information rate={:.4}  AUC={:.4}",
        confusion.no_information_rate, report.predictive.roc.auc
    );
}
