//! End-to-end pipeline tests over a small hand-computable dataset.

use std::io::Write;

use gatelab::pipeline::{self, PipelineOptions};
use gatelab::{AnalysisError, Gate};
use tempfile::NamedTempFile;

/// Five gate_30 users, five gate_40 users, plus one bot-like outlier that
/// the cleaner must drop. Retention values are chosen so the Welch tests
/// have hand-computable statistics.
fn create_test_csv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "userid,version,sum_gamerounds,retention_1,retention_7").unwrap();

    // gate_30 (control): d1 = 3/5, d7 = 2/5
    writeln!(file, "1,gate_30,10,TRUE,FALSE").unwrap();
    writeln!(file, "2,gate_30,20,FALSE,FALSE").unwrap();
    writeln!(file, "3,gate_30,30,TRUE,TRUE").unwrap();
    writeln!(file, "4,gate_30,40,FALSE,FALSE").unwrap();
    writeln!(file, "5,gate_30,120,TRUE,TRUE").unwrap();

    // gate_40 (treatment): d1 = 4/5, d7 = 2/5
    writeln!(file, "6,gate_40,15,TRUE,TRUE").unwrap();
    writeln!(file, "7,gate_40,25,TRUE,FALSE").unwrap();
    writeln!(file, "8,gate_40,35,TRUE,TRUE").unwrap();
    writeln!(file, "9,gate_40,45,TRUE,FALSE").unwrap();
    writeln!(file, "10,gate_40,130,FALSE,FALSE").unwrap();

    // Outlier above the round cutoff.
    writeln!(file, "11,gate_30,5000,TRUE,TRUE").unwrap();

    file
}

fn run_pipeline() -> (gatelab::Cohort, gatelab::PipelineReport) {
    let file = create_test_csv();
    let options = PipelineOptions {
        input: file.path().to_str().unwrap().to_string(),
        seed: 42,
        posterior_draws: 20_000,
    };
    pipeline::run(&options).unwrap()
}

#[test]
fn cleaning_drops_the_outlier_row() {
    let (cohort, report) = run_pipeline();
    assert_eq!(report.cleaning.rows_loaded, 11);
    assert_eq!(report.cleaning.rows_kept, 10);
    assert_eq!(report.cleaning.rows_dropped, 1);
    assert_eq!(cohort.len(), 10);
    assert_eq!(cohort.arm_size(Gate::Gate30), 5);
    assert_eq!(cohort.arm_size(Gate::Gate40), 5);
}

#[test]
fn descriptive_retention_means_are_exact() {
    let (_, report) = run_pipeline();
    let gate30 = &report.descriptive.arms[0];
    let gate40 = &report.descriptive.arms[1];
    assert!((gate30.day1_retention - 0.6).abs() < 1e-12);
    assert!((gate40.day1_retention - 0.8).abs() < 1e-12);
    assert!((gate30.day7_retention - 0.4).abs() < 1e-12);
    assert!((gate40.day7_retention - 0.4).abs() < 1e-12);
}

#[test]
fn welch_day7_is_an_exact_null() {
    let (_, report) = run_pipeline();
    let day7 = report
        .hypothesis
        .iter()
        .find(|t| t.metric == "retention_day7")
        .unwrap();
    // Identical 2/5 rates: diff and t are exactly zero, p is 1.
    assert!(day7.diff.abs() < 1e-12);
    assert!(day7.t_stat.abs() < 1e-12);
    assert!((day7.p_value - 1.0).abs() < 1e-9);
    // Equal sizes and variances: df = 2(n-1) = 8.
    assert!((day7.df - 8.0).abs() < 1e-9);
    assert!(day7.ci_low < 0.0 && day7.ci_high > 0.0);
}

#[test]
fn welch_day1_matches_hand_computation() {
    let (_, report) = run_pipeline();
    let day1 = report
        .hypothesis
        .iter()
        .find(|t| t.metric == "retention_day1")
        .unwrap();
    // means 0.6 vs 0.8; variances 0.3 and 0.2; se = sqrt(0.1).
    assert!((day1.diff - 0.2).abs() < 1e-12);
    assert!((day1.t_stat - 0.2 / 0.1_f64.sqrt()).abs() < 1e-9);
    assert!((day1.df - 7.6923).abs() < 1e-3);
    assert!(day1.p_value > 0.5 && day1.p_value < 0.6);
}

#[test]
fn survival_curves_are_proper_step_functions() {
    let (_, report) = run_pipeline();
    assert_eq!(report.survival.curves.len(), 2);
    for curve in &report.survival.curves {
        assert_eq!(curve.survival_at(0), 1.0);
        assert!(curve.survival.windows(2).all(|w| w[1] <= w[0]));
        assert!(curve.survival.iter().all(|&s| (0.0..=1.0).contains(&s)));
    }
    // Control arm: first event is 1 churn among 5 at risk at t=10.
    let control = &report.survival.curves[0];
    assert_eq!(control.gate, Gate::Gate30);
    assert_eq!(control.censored, 2);
    assert_eq!(control.times[0], 10);
    assert!((control.survival[0] - 0.8).abs() < 1e-12);
    assert!((0.0..=1.0).contains(&report.survival.log_rank.p_value));
}

#[test]
fn matching_pairs_every_treatment_unit() {
    let (_, report) = run_pipeline();
    let matching = &report.causal.matching;
    assert_eq!(matching.pairs, 5);
    assert_eq!(matching.welch_day7.n_control, 5);
    assert_eq!(matching.welch_day7.n_treatment, 5);
    assert_eq!(report.causal.propensity.coefficients.len(), 2);
}

#[test]
fn ipw_weighted_sizes_approximate_the_population() {
    let (cohort, report) = run_pipeline();
    let ipw = &report.causal.ipw;
    assert!(ipw.odds_ratio > 0.0);
    let n = cohort.len() as f64;
    // Each weighted arm re-creates (roughly) the full cohort size.
    assert!(ipw.weight_sum_control > 0.5 * n && ipw.weight_sum_control < 2.0 * n);
    assert!(ipw.weight_sum_treatment > 0.5 * n && ipw.weight_sum_treatment < 2.0 * n);
}

#[test]
fn posteriors_match_the_conjugate_update() {
    let (_, report) = run_pipeline();
    // Control: 3 successes, 2 failures -> Beta(4, 3).
    assert!((report.bayes.control.alpha - 4.0).abs() < 1e-12);
    assert!((report.bayes.control.beta - 3.0).abs() < 1e-12);
    assert!((report.bayes.control.mean - 4.0 / 7.0).abs() < 1e-12);
    // Treatment: 4 successes, 1 failure -> Beta(5, 2).
    assert!((report.bayes.treatment.alpha - 5.0).abs() < 1e-12);
    assert!((report.bayes.treatment.mean - 5.0 / 7.0).abs() < 1e-12);
    // Treatment posterior sits to the right of control.
    assert!(report.bayes.prob_treatment_better > 0.55);
    assert!(report.bayes.prob_treatment_better < 1.0);
}

#[test]
fn median_split_is_balanced_with_this_data() {
    let (_, report) = run_pipeline();
    // rounds: 10,15,20,25,30,35,40,45,120,130 -> median 32.5
    assert!((report.segments.median_rounds - 32.5).abs() < 1e-12);
    assert_eq!(report.segments.cells.len(), 4);
    assert_eq!(
        report.segments.cells.iter().map(|c| c.users).sum::<usize>(),
        10
    );
    let high: usize = report
        .segments
        .cells
        .iter()
        .filter(|c| c.band.is_high())
        .map(|c| c.users)
        .sum();
    assert_eq!(high, 5);
}

#[test]
fn predictive_evaluation_is_consistent() {
    let (cohort, report) = run_pipeline();
    assert_eq!(report.predictive.coefficients.len(), 4);
    assert_eq!(report.predictive.confusion.total(), cohort.len());
    assert!((0.0..=1.0).contains(&report.predictive.roc.auc));
    assert!((0.0..=1.0).contains(&report.predictive.confusion.no_information_rate));
    // 6 of 10 users churned.
    assert!((report.predictive.confusion.no_information_rate - 0.6).abs() < 1e-12);
    assert_eq!(report.predictive.predicted.len(), cohort.len());
}

#[test]
fn same_seed_gives_identical_reports() {
    let (_, a) = run_pipeline();
    let (_, b) = run_pipeline();
    assert_eq!(
        a.bayes.prob_treatment_better,
        b.bayes.prob_treatment_better
    );
    assert_eq!(a.predictive.roc.auc, b.predictive.roc.auc);
}

#[test]
fn unknown_gate_label_aborts_the_pipeline() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "userid,version,sum_gamerounds,retention_1,retention_7").unwrap();
    writeln!(file, "1,gate_50,10,TRUE,FALSE").unwrap();
    let options = PipelineOptions {
        input: file.path().to_str().unwrap().to_string(),
        seed: 1,
        posterior_draws: 100,
    };
    let err = pipeline::run(&options).unwrap_err();
    assert!(matches!(err, AnalysisError::Schema(_)));
}
