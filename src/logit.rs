//! Logistic regression fitted by iteratively reweighted least squares.
//!
//! Shared by the propensity model, the IPW outcome model, and the predictive
//! modeler. Supports per-observation sample weights so the same routine
//! serves both plain and inverse-probability-weighted fits.

use ndarray::{Array1, Array2};
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};

use crate::config;
use crate::error::{AnalysisError, Result};

/// One fitted coefficient with its Wald test.
#[derive(Debug, Clone, Serialize)]
pub struct Coefficient {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
    pub z_value: f64,
    pub p_value: f64,
}

/// A fitted logistic model.
#[derive(Debug, Clone, Serialize)]
pub struct LogisticFit {
    pub coefficients: Vec<Coefficient>,
    pub converged: bool,
    pub iterations: usize,
    /// Fitted probability per observation, in (0, 1).
    #[serde(skip)]
    pub fitted: Vec<f64>,
}

impl LogisticFit {
    pub fn coefficient(&self, name: &str) -> Option<&Coefficient> {
        self.coefficients.iter().find(|c| c.name == name)
    }
}

/// Numerically stable logistic function.
pub fn sigmoid(t: f64) -> f64 {
    if t >= 0.0 {
        1.0 / (1.0 + (-t).exp())
    } else {
        let e = t.exp();
        e / (1.0 + e)
    }
}

/// Fit `y ~ x` where `x` already contains an intercept column.
///
/// `names` labels the columns of `x`. `sample_weights`, when given, scale
/// each observation's likelihood contribution (all 1.0 otherwise).
pub fn fit(
    names: &[&str],
    x: &Array2<f64>,
    y: &[f64],
    sample_weights: Option<&[f64]>,
) -> Result<LogisticFit> {
    let n = x.nrows();
    let p = x.ncols();
    if names.len() != p {
        return Err(AnalysisError::unstable(
            "logit",
            format!("{} names for {p} columns", names.len()),
        ));
    }
    if y.len() != n {
        return Err(AnalysisError::unstable(
            "logit",
            format!("{n} rows but {} outcomes", y.len()),
        ));
    }
    if n <= p {
        return Err(AnalysisError::insufficient(
            "logit",
            format!("{n} observations for {p} parameters"),
        ));
    }
    if let Some(sw) = sample_weights {
        if sw.len() != n || sw.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(AnalysisError::unstable(
                "logit",
                "sample weights must be finite and non-negative".to_string(),
            ));
        }
    }

    let mut beta = Array1::<f64>::zeros(p);
    let mut covariance = Array2::<f64>::zeros((p, p));
    let mut converged = false;
    let mut iterations = 0;

    for iter in 1..=config::IRLS_MAX_ITERATIONS {
        iterations = iter;
        let eta = x.dot(&beta);

        let mut xtwx = Array2::<f64>::zeros((p, p));
        let mut xtwz = Array1::<f64>::zeros(p);
        for i in 0..n {
            // Clamp so working weights stay strictly positive under
            // quasi-separation.
            let mu = sigmoid(eta[i]).clamp(1e-10, 1.0 - 1e-10);
            let variance = mu * (1.0 - mu);
            let sw = sample_weights.map_or(1.0, |w| w[i]);
            let weight = sw * variance;
            let z = eta[i] + (y[i] - mu) / variance;
            for j in 0..p {
                let xij = x[[i, j]];
                xtwz[j] += weight * xij * z;
                for k in j..p {
                    xtwx[[j, k]] += weight * xij * x[[i, k]];
                }
            }
        }
        for j in 0..p {
            for k in 0..j {
                xtwx[[j, k]] = xtwx[[k, j]];
            }
        }

        let inverse = invert(&xtwx).ok_or_else(|| {
            AnalysisError::unstable("logit", "singular information matrix".to_string())
        })?;
        let next = inverse.dot(&xtwz);

        let delta = next
            .iter()
            .zip(beta.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0_f64, f64::max);

        beta = next;
        covariance = inverse;

        if !beta.iter().all(|b| b.is_finite()) {
            return Err(AnalysisError::unstable(
                "logit",
                "coefficients diverged".to_string(),
            ));
        }
        if delta < config::IRLS_TOLERANCE {
            converged = true;
            break;
        }
    }

    if !converged {
        log::warn!("logit: IRLS did not converge in {iterations} iterations");
    }

    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| AnalysisError::unstable("logit", e.to_string()))?;
    let coefficients = names
        .iter()
        .enumerate()
        .map(|(j, name)| {
            let estimate = beta[j];
            let std_error = covariance[[j, j]].max(0.0).sqrt();
            let z_value = if std_error > 0.0 { estimate / std_error } else { 0.0 };
            let p_value = (2.0 * (1.0 - normal.cdf(z_value.abs()))).clamp(0.0, 1.0);
            Coefficient {
                name: (*name).to_string(),
                estimate,
                std_error,
                z_value,
                p_value,
            }
        })
        .collect();

    let eta = x.dot(&beta);
    let fitted = eta.iter().map(|&e| sigmoid(e)).collect();

    Ok(LogisticFit {
        coefficients,
        converged,
        iterations,
        fitted,
    })
}

/// Gauss–Jordan inversion with partial pivoting. Returns `None` when the
/// matrix is singular. Fine for the tiny design matrices used here.
fn invert(a: &Array2<f64>) -> Option<Array2<f64>> {
    let p = a.nrows();
    let mut work = a.clone();
    let mut inv = Array2::<f64>::eye(p);

    for col in 0..p {
        let mut pivot = col;
        for row in (col + 1)..p {
            if work[[row, col]].abs() > work[[pivot, col]].abs() {
                pivot = row;
            }
        }
        if work[[pivot, col]].abs() < 1e-12 {
            return None;
        }
        if pivot != col {
            for k in 0..p {
                work.swap([pivot, k], [col, k]);
                inv.swap([pivot, k], [col, k]);
            }
        }

        let scale = work[[col, col]];
        for k in 0..p {
            work[[col, k]] /= scale;
            inv[[col, k]] /= scale;
        }
        for row in 0..p {
            if row == col {
                continue;
            }
            let factor = work[[row, col]];
            if factor == 0.0 {
                continue;
            }
            for k in 0..p {
                work[[row, k]] -= factor * work[[col, k]];
                inv[[row, k]] -= factor * inv[[col, k]];
            }
        }
    }

    Some(inv)
}
