//! Welch two-sample t-tests on retention rates.

use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::data::{Cohort, Gate};
use crate::error::{AnalysisError, Result};

/// Result of a Welch unequal-variance two-sample test.
#[derive(Debug, Clone, Serialize)]
pub struct WelchTest {
    pub metric: String,
    pub n_control: usize,
    pub n_treatment: usize,
    pub mean_control: f64,
    pub mean_treatment: f64,
    /// treatment − control
    pub diff: f64,
    pub t_stat: f64,
    /// Welch–Satterthwaite degrees of freedom.
    pub df: f64,
    pub p_value: f64,
    pub ci_low: f64,
    pub ci_high: f64,
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Sample variance with ddof = 1. Requires `xs.len() >= 2`.
fn var_sample(xs: &[f64], mean: f64) -> f64 {
    xs.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (xs.len() - 1) as f64
}

/// Welch t-test of treatment against control, two-sided, with a 95% CI on
/// the difference in means.
pub fn welch_two_sample(metric: &str, control: &[f64], treatment: &[f64]) -> Result<WelchTest> {
    if control.len() < 2 || treatment.len() < 2 {
        return Err(AnalysisError::insufficient(
            "welch",
            format!(
                "{metric}: need at least 2 observations per group (control={}, treatment={})",
                control.len(),
                treatment.len()
            ),
        ));
    }

    let (n1, n2) = (control.len() as f64, treatment.len() as f64);
    let m1 = mean(control);
    let m2 = mean(treatment);
    let v1 = var_sample(control, m1);
    let v2 = var_sample(treatment, m2);
    let diff = m2 - m1;

    let se2 = v1 / n1 + v2 / n2;
    if se2 <= 0.0 {
        return Err(AnalysisError::unstable(
            "welch",
            format!("{metric}: zero variance in both groups"),
        ));
    }
    let se = se2.sqrt();
    let t_stat = diff / se;

    let df = se2.powi(2)
        / ((v1 / n1).powi(2) / (n1 - 1.0) + (v2 / n2).powi(2) / (n2 - 1.0));

    let dist = StudentsT::new(0.0, 1.0, df)
        .map_err(|e| AnalysisError::unstable("welch", format!("{metric}: {e}")))?;
    let p_value = 2.0 * (1.0 - dist.cdf(t_stat.abs()));
    let t_crit = dist.inverse_cdf(0.975);

    Ok(WelchTest {
        metric: metric.to_string(),
        n_control: control.len(),
        n_treatment: treatment.len(),
        mean_control: m1,
        mean_treatment: m2,
        diff,
        t_stat,
        df,
        p_value: p_value.clamp(0.0, 1.0),
        ci_low: diff - t_crit * se,
        ci_high: diff + t_crit * se,
    })
}

/// Run the Welch test per retention horizon (day 1, day 7).
pub fn retention_tests(cohort: &Cohort) -> Result<Vec<WelchTest>> {
    let control_d1: Vec<f64> = cohort.arm(Gate::Gate30).map(|r| r.day1()).collect();
    let treatment_d1: Vec<f64> = cohort.arm(Gate::Gate40).map(|r| r.day1()).collect();
    let control_d7: Vec<f64> = cohort.arm(Gate::Gate30).map(|r| r.day7()).collect();
    let treatment_d7: Vec<f64> = cohort.arm(Gate::Gate40).map(|r| r.day7()).collect();

    Ok(vec![
        welch_two_sample("retention_day1", &control_d1, &treatment_d1)?,
        welch_two_sample("retention_day7", &control_d7, &treatment_d7)?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: [f64; 6] = [1.0, 0.0, 1.0, 1.0, 0.0, 1.0];
    const B: [f64; 6] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0];

    #[test]
    fn detects_difference_in_means() {
        let test = welch_two_sample("m", &A, &B).unwrap();
        assert!((test.mean_control - 4.0 / 6.0).abs() < 1e-12);
        assert!((test.mean_treatment - 2.0 / 6.0).abs() < 1e-12);
        assert!(test.diff < 0.0);
        assert!(test.t_stat < 0.0);
        assert!(test.p_value > 0.0 && test.p_value < 1.0);
        assert!(test.ci_low < test.diff && test.diff < test.ci_high);
    }

    #[test]
    fn swapping_groups_negates_t_but_keeps_p() {
        let ab = welch_two_sample("m", &A, &B).unwrap();
        let ba = welch_two_sample("m", &B, &A).unwrap();
        assert!((ab.diff + ba.diff).abs() < 1e-12);
        assert!((ab.t_stat + ba.t_stat).abs() < 1e-12);
        assert!((ab.p_value - ba.p_value).abs() < 1e-12);
        assert!((ab.df - ba.df).abs() < 1e-12);
    }

    #[test]
    fn equal_groups_give_t_zero_p_one() {
        let test = welch_two_sample("m", &A, &A).unwrap();
        assert!(test.diff.abs() < 1e-12);
        assert!(test.t_stat.abs() < 1e-12);
        assert!((test.p_value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn welch_satterthwaite_df_known_case() {
        // Equal sizes and equal variances reduce to df = 2(n - 1).
        let x = [0.0, 1.0, 0.0, 1.0, 0.0];
        let y = [1.0, 0.0, 1.0, 0.0, 1.0];
        let test = welch_two_sample("m", &x, &y).unwrap();
        assert!((test.df - 8.0).abs() < 1e-9);
    }

    #[test]
    fn too_few_observations_is_an_error() {
        let err = welch_two_sample("m", &[1.0], &A).unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientData { .. }));
    }

    #[test]
    fn zero_variance_is_unstable() {
        let x = [1.0, 1.0, 1.0];
        let y = [1.0, 1.0, 1.0];
        let err = welch_two_sample("m", &x, &y).unwrap_err();
        assert!(matches!(err, AnalysisError::NumericalInstability { .. }));
    }
}
