//! Predictive model of day-7 retention, with confusion-matrix and ROC
//! evaluation.

use ndarray::Array2;
use serde::Serialize;

use crate::config;
use crate::data::Cohort;
use crate::error::{AnalysisError, Result};
use crate::logit::{self, Coefficient};
use crate::segment::EngagementBand;

/// Confusion matrix at the fixed classification threshold, with the derived
/// rates. The no-information rate is reported so class imbalance is visible
/// next to accuracy.
#[derive(Debug, Clone, Serialize)]
pub struct ConfusionMatrix {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
    pub accuracy: f64,
    pub sensitivity: f64,
    pub specificity: f64,
    pub kappa: f64,
    pub no_information_rate: f64,
}

impl ConfusionMatrix {
    pub fn total(&self) -> usize {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }

    /// Tabulate predictions against truth at `threshold`.
    pub fn evaluate(truth: &[f64], scores: &[f64], threshold: f64) -> Self {
        let mut tp = 0;
        let mut fp = 0;
        let mut tn = 0;
        let mut fn_ = 0;
        for (&y, &s) in truth.iter().zip(scores) {
            let predicted = s > threshold;
            let actual = y > 0.5;
            match (predicted, actual) {
                (true, true) => tp += 1,
                (true, false) => fp += 1,
                (false, false) => tn += 1,
                (false, true) => fn_ += 1,
            }
        }

        let total = (tp + fp + tn + fn_) as f64;
        let accuracy = (tp + tn) as f64 / total;
        let positives = (tp + fn_) as f64;
        let negatives = (fp + tn) as f64;
        let sensitivity = if positives > 0.0 { tp as f64 / positives } else { 0.0 };
        let specificity = if negatives > 0.0 { tn as f64 / negatives } else { 0.0 };

        // Expected agreement under chance, for Cohen's kappa.
        let predicted_pos = (tp + fp) as f64;
        let predicted_neg = (tn + fn_) as f64;
        let expected =
            (predicted_pos * positives + predicted_neg * negatives) / (total * total);
        let kappa = if (1.0 - expected).abs() < 1e-12 {
            0.0
        } else {
            (accuracy - expected) / (1.0 - expected)
        };

        Self {
            true_positive: tp,
            false_positive: fp,
            true_negative: tn,
            false_negative: fn_,
            accuracy,
            sensitivity,
            specificity,
            kappa,
            no_information_rate: positives.max(negatives) / total,
        }
    }
}

/// One operating point on the ROC curve.
#[derive(Debug, Clone, Serialize)]
pub struct RocPoint {
    pub false_positive_rate: f64,
    pub true_positive_rate: f64,
}

/// ROC curve over all score cutpoints with trapezoidal AUC.
#[derive(Debug, Clone, Serialize)]
pub struct RocCurve {
    pub points: Vec<RocPoint>,
    pub auc: f64,
}

impl RocCurve {
    /// Sweep every distinct score as a threshold, from (0,0) to (1,1).
    pub fn compute(truth: &[f64], scores: &[f64]) -> Result<Self> {
        let positives = truth.iter().filter(|&&y| y > 0.5).count();
        let negatives = truth.len() - positives;
        if positives == 0 || negatives == 0 {
            return Err(AnalysisError::insufficient(
                "predict",
                "ROC needs both outcome classes present",
            ));
        }

        let mut order: Vec<usize> = (0..truth.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

        let mut points = vec![RocPoint {
            false_positive_rate: 0.0,
            true_positive_rate: 0.0,
        }];
        let mut tp = 0_usize;
        let mut fp = 0_usize;
        let mut i = 0;
        while i < order.len() {
            // Observations tied on score move across the threshold together.
            let score = scores[order[i]];
            while i < order.len() && scores[order[i]] == score {
                if truth[order[i]] > 0.5 {
                    tp += 1;
                } else {
                    fp += 1;
                }
                i += 1;
            }
            points.push(RocPoint {
                false_positive_rate: fp as f64 / negatives as f64,
                true_positive_rate: tp as f64 / positives as f64,
            });
        }

        let mut auc = 0.0;
        for pair in points.windows(2) {
            let dx = pair[1].false_positive_rate - pair[0].false_positive_rate;
            auc += dx * (pair[0].true_positive_rate + pair[1].true_positive_rate) / 2.0;
        }

        Ok(Self {
            points,
            auc: auc.clamp(0.0, 1.0),
        })
    }
}

/// Structured output of the predictive stage.
#[derive(Debug, Clone, Serialize)]
pub struct PredictReport {
    pub coefficients: Vec<Coefficient>,
    pub converged: bool,
    pub threshold: f64,
    pub confusion: ConfusionMatrix,
    pub roc: RocCurve,
    /// Predicted day-7 retention probability per user, cohort row order.
    #[serde(skip)]
    pub predicted: Vec<f64>,
}

/// Fit `retained_day7 ~ gate + rounds_played + engagement_band` and evaluate
/// it in-sample.
pub fn fit_retention_model(cohort: &Cohort, bands: &[EngagementBand]) -> Result<PredictReport> {
    let n = cohort.len();
    if bands.len() != n {
        return Err(AnalysisError::unstable(
            "predict",
            format!("{} bands for {n} rows", bands.len()),
        ));
    }

    let mut design = Vec::with_capacity(n * 4);
    let mut outcome = Vec::with_capacity(n);
    for (i, row) in cohort.rows.iter().enumerate() {
        design.push(1.0);
        design.push(f64::from(u8::from(row.gate.is_treatment())));
        design.push(f64::from(row.rounds_played));
        design.push(f64::from(u8::from(bands[i].is_high())));
        outcome.push(row.day7());
    }
    let x = Array2::from_shape_vec((n, 4), design)
        .map_err(|e| AnalysisError::unstable("predict", e.to_string()))?;

    let fit = logit::fit(
        &["(intercept)", "gate_40", "rounds_played", "band_high"],
        &x,
        &outcome,
        None,
    )?;

    let confusion =
        ConfusionMatrix::evaluate(&outcome, &fit.fitted, config::CLASSIFICATION_THRESHOLD);
    let roc = RocCurve::compute(&outcome, &fit.fitted)?;

    Ok(PredictReport {
        coefficients: fit.coefficients,
        converged: fit.converged,
        threshold: config::CLASSIFICATION_THRESHOLD,
        confusion,
        roc,
        predicted: fit.fitted,
    })
}
