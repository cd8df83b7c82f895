//! Kaplan–Meier survival curves over game rounds, with a log-rank test.
//!
//! Time is `rounds_played`; the event is churn (`!retained_day7`). Users who
//! were still retained at day 7 are right-censored at their observed round
//! count.

use serde::Serialize;
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::data::{Cohort, Gate};
use crate::error::{AnalysisError, Result};

/// Kaplan–Meier step-function estimate for one experiment arm.
///
/// Parallel vectors hold the survival function at each time point where at
/// least one event occurred. Survival is 1.0 before the first event and
/// non-increasing afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct KaplanMeierCurve {
    pub gate: Gate,
    pub subjects: usize,
    pub censored: usize,
    /// Times (round counts) where events occurred.
    pub times: Vec<u32>,
    /// Survival probability after the events at each time.
    pub survival: Vec<f64>,
    /// Subjects at risk just before each time.
    pub at_risk: Vec<usize>,
    /// Events observed at each time.
    pub events: Vec<usize>,
    /// Time at which survival first drops to 0.5 or below, if it does.
    pub median_rounds: Option<f64>,
}

impl KaplanMeierCurve {
    /// Compute the curve from `(time, is_censored)` observations.
    pub fn from_observations(gate: Gate, mut data: Vec<(u32, bool)>) -> Self {
        data.sort_by_key(|(time, _)| *time);

        let subjects = data.len();
        let censored = data.iter().filter(|(_, c)| *c).count();

        let mut times = vec![];
        let mut survival = vec![];
        let mut at_risk_vec = vec![];
        let mut events_vec = vec![];

        let mut current_survival = 1.0;
        let mut i = 0;
        while i < data.len() {
            let current_time = data[i].0;
            let at_risk = subjects - i;

            // Tied observations at this time share one at-risk count.
            let mut event_count = 0;
            let mut j = i;
            while j < data.len() && data[j].0 == current_time {
                if !data[j].1 {
                    event_count += 1;
                }
                j += 1;
            }

            if event_count > 0 {
                current_survival *= 1.0 - event_count as f64 / at_risk as f64;
                times.push(current_time);
                survival.push(current_survival);
                at_risk_vec.push(at_risk);
                events_vec.push(event_count);
            }

            i = j;
        }

        let median_rounds = median_survival(&times, &survival);

        Self {
            gate,
            subjects,
            censored,
            times,
            survival,
            at_risk: at_risk_vec,
            events: events_vec,
            median_rounds,
        }
    }

    /// Step-function evaluation: survival probability at `time`.
    pub fn survival_at(&self, time: u32) -> f64 {
        for i in (0..self.times.len()).rev() {
            if self.times[i] <= time {
                return self.survival[i];
            }
        }
        1.0
    }
}

fn median_survival(times: &[u32], survival: &[f64]) -> Option<f64> {
    for i in 0..survival.len() {
        if survival[i] <= 0.5 {
            return Some(f64::from(times[i]));
        }
    }
    None
}

/// Log-rank test for equality of the two survival curves. 1 df.
#[derive(Debug, Clone, Serialize)]
pub struct LogRankTest {
    pub chi_square: f64,
    pub df: f64,
    pub p_value: f64,
    /// Observed and expected event counts in the control arm.
    pub observed_control: f64,
    pub expected_control: f64,
}

/// Structured output of the survival stage.
#[derive(Debug, Clone, Serialize)]
pub struct SurvivalReport {
    pub curves: Vec<KaplanMeierCurve>,
    pub log_rank: LogRankTest,
}

/// Fit one curve per arm and test their equality.
pub fn analyze_survival(cohort: &Cohort) -> Result<SurvivalReport> {
    let control = arm_observations(cohort, Gate::Gate30);
    let treatment = arm_observations(cohort, Gate::Gate40);
    if control.is_empty() || treatment.is_empty() {
        return Err(AnalysisError::insufficient(
            "survival",
            format!(
                "need observations in both arms (control={}, treatment={})",
                control.len(),
                treatment.len()
            ),
        ));
    }

    let log_rank = log_rank_test(&control, &treatment)?;
    let curves = vec![
        KaplanMeierCurve::from_observations(Gate::Gate30, control),
        KaplanMeierCurve::from_observations(Gate::Gate40, treatment),
    ];

    Ok(SurvivalReport { curves, log_rank })
}

fn arm_observations(cohort: &Cohort, gate: Gate) -> Vec<(u32, bool)> {
    // Censored = still retained at day 7 (churn never observed).
    cohort
        .arm(gate)
        .map(|r| (r.rounds_played, r.retained_day7))
        .collect()
}

fn log_rank_test(control: &[(u32, bool)], treatment: &[(u32, bool)]) -> Result<LogRankTest> {
    let mut control_times: Vec<u32> = control.iter().map(|(t, _)| *t).collect();
    let mut treatment_times: Vec<u32> = treatment.iter().map(|(t, _)| *t).collect();
    control_times.sort_unstable();
    treatment_times.sort_unstable();

    // Pooled event times with per-arm event counts.
    let mut event_counts: std::collections::BTreeMap<u32, (usize, usize)> =
        std::collections::BTreeMap::new();
    for &(t, censored) in control {
        if !censored {
            event_counts.entry(t).or_default().0 += 1;
        }
    }
    for &(t, censored) in treatment {
        if !censored {
            event_counts.entry(t).or_default().1 += 1;
        }
    }

    let mut observed_control = 0.0;
    let mut expected_control = 0.0;
    let mut variance = 0.0;

    for (&t, &(d_control, d_treatment)) in &event_counts {
        // At risk: subjects whose observed time is >= t.
        let n_c = control_times.len() - control_times.partition_point(|&x| x < t);
        let n_t = treatment_times.len() - treatment_times.partition_point(|&x| x < t);
        let n = n_c + n_t;
        let d = d_control + d_treatment;
        if n == 0 || d == 0 {
            continue;
        }

        let (n_f, n_c_f, d_f) = (n as f64, n_c as f64, d as f64);
        observed_control += d_control as f64;
        expected_control += d_f * n_c_f / n_f;
        if n > 1 {
            variance +=
                d_f * (n_c_f / n_f) * (1.0 - n_c_f / n_f) * (n_f - d_f) / (n_f - 1.0);
        }
    }

    let (chi_square, p_value) = if variance > 0.0 {
        let chi = (observed_control - expected_control).powi(2) / variance;
        let dist = ChiSquared::new(1.0)
            .map_err(|e| AnalysisError::unstable("survival", e.to_string()))?;
        (chi, (1.0 - dist.cdf(chi)).clamp(0.0, 1.0))
    } else {
        // No between-arm variation at any event time.
        (0.0, 1.0)
    };

    Ok(LogRankTest {
        chi_square,
        df: 1.0,
        p_value,
        observed_control,
        expected_control,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::UserRecord;

    #[test]
    fn survival_starts_at_one_and_never_increases() {
        let data = vec![(5, false), (10, true), (10, false), (20, false), (30, true)];
        let curve = KaplanMeierCurve::from_observations(Gate::Gate30, data);
        assert_eq!(curve.survival_at(0), 1.0);
        assert!(curve.survival.windows(2).all(|w| w[1] <= w[0]));
        assert!(curve.survival.iter().all(|&s| (0.0..=1.0).contains(&s)));
    }

    #[test]
    fn hand_computed_small_curve() {
        // Events at 10 (1 of 3 at risk) and 20 (1 of 2 at risk).
        let data = vec![(10, false), (20, false), (25, true)];
        let curve = KaplanMeierCurve::from_observations(Gate::Gate30, data);
        assert_eq!(curve.times, vec![10, 20]);
        assert!((curve.survival[0] - 2.0 / 3.0).abs() < 1e-12);
        assert!((curve.survival[1] - 2.0 / 3.0 * 0.5).abs() < 1e-12);
        assert_eq!(curve.at_risk, vec![3, 2]);
        assert_eq!(curve.censored, 1);
    }

    #[test]
    fn tied_events_share_one_at_risk_count() {
        let data = vec![(10, false), (10, false), (10, true), (20, false)];
        let curve = KaplanMeierCurve::from_observations(Gate::Gate40, data);
        // 2 events among 4 at risk at t=10.
        assert_eq!(curve.events[0], 2);
        assert_eq!(curve.at_risk[0], 4);
        assert!((curve.survival[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn identical_arms_give_null_log_rank() {
        let arm = vec![(5, false), (10, false), (15, true), (20, false)];
        let result = log_rank_test(&arm, &arm.clone()).unwrap();
        assert!(result.chi_square < 1e-9);
        assert!(result.p_value > 0.999);
    }

    #[test]
    fn divergent_arms_give_positive_statistic() {
        let fast: Vec<(u32, bool)> = (1..=20).map(|t| (t, false)).collect();
        let slow: Vec<(u32, bool)> = (51..=70).map(|t| (t, false)).collect();
        let result = log_rank_test(&fast, &slow).unwrap();
        assert!(result.chi_square > 1.0);
        assert!(result.p_value < 0.05);
    }

    #[test]
    fn full_stage_produces_two_curves() {
        let rows = (0..10)
            .map(|i| UserRecord {
                user_id: i,
                gate: if i % 2 == 0 { Gate::Gate30 } else { Gate::Gate40 },
                rounds_played: 5 * (i as u32 + 1),
                retained_day1: i % 2 == 0,
                retained_day7: i % 3 == 0,
            })
            .collect();
        let report = analyze_survival(&Cohort { rows }).unwrap();
        assert_eq!(report.curves.len(), 2);
        assert_eq!(report.curves[0].gate, Gate::Gate30);
        assert!((0.0..=1.0).contains(&report.log_rank.p_value));
    }
}
