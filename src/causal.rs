//! Propensity-score causal estimates: nearest-neighbor matching and inverse
//! probability weighting.
//!
//! Both methods share one propensity model, a logistic regression of gate
//! assignment on `rounds_played`. Scores are clipped into
//! [`config::PROPENSITY_CLIP_MIN`, `config::PROPENSITY_CLIP_MAX`] before any
//! weight is formed; unclipped scores at 0 or 1 would make IPW weights
//! unbounded.

use std::collections::BTreeMap;

use ndarray::Array2;
use serde::Serialize;

use crate::config;
use crate::data::{Cohort, Gate};
use crate::error::{AnalysisError, Result};
use crate::hypothesis::{welch_two_sample, WelchTest};
use crate::logit::{self, Coefficient, LogisticFit};

/// The fitted propensity model plus score bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct PropensityModel {
    pub coefficients: Vec<Coefficient>,
    pub converged: bool,
    /// Scores pushed back inside the clip bounds.
    pub clipped_scores: usize,
    /// Per-user propensity score, aligned with cohort row order.
    #[serde(skip)]
    pub scores: Vec<f64>,
}

/// Matching result: pair count and the day-7 Welch test on the matched
/// subsample.
#[derive(Debug, Clone, Serialize)]
pub struct MatchedEstimate {
    pub pairs: usize,
    pub welch_day7: WelchTest,
}

/// IPW result: the weighted outcome model's treatment coefficient.
#[derive(Debug, Clone, Serialize)]
pub struct IpwEstimate {
    pub coefficients: Vec<Coefficient>,
    pub converged: bool,
    pub odds_ratio: f64,
    /// "positive", "negative", or "null" by sign of the gate coefficient.
    pub effect_direction: &'static str,
    pub weight_sum_control: f64,
    pub weight_sum_treatment: f64,
}

/// Structured output of the causal stage.
#[derive(Debug, Clone, Serialize)]
pub struct CausalReport {
    pub propensity: PropensityModel,
    pub matching: MatchedEstimate,
    pub ipw: IpwEstimate,
}

/// Run both causal estimators against the cleaned cohort.
pub fn estimate_effects(cohort: &Cohort) -> Result<CausalReport> {
    let propensity = fit_propensity(cohort)?;
    let matching = match_and_test(cohort, &propensity.scores)?;
    let ipw = inverse_probability_weighting(cohort, &propensity.scores)?;
    Ok(CausalReport {
        propensity,
        matching,
        ipw,
    })
}

/// Fit `gate ~ rounds_played` and score every user, clipping extremes.
fn fit_propensity(cohort: &Cohort) -> Result<PropensityModel> {
    let n = cohort.len();
    let mut design = Vec::with_capacity(n * 2);
    let mut target = Vec::with_capacity(n);
    for row in &cohort.rows {
        design.push(1.0);
        design.push(f64::from(row.rounds_played));
        target.push(f64::from(u8::from(row.gate.is_treatment())));
    }
    let x = Array2::from_shape_vec((n, 2), design)
        .map_err(|e| AnalysisError::unstable("causal", e.to_string()))?;
    let fit: LogisticFit = logit::fit(&["(intercept)", "rounds_played"], &x, &target, None)?;

    let mut clipped = 0;
    let mut scores = Vec::with_capacity(n);
    for &p in &fit.fitted {
        if !p.is_finite() {
            return Err(AnalysisError::unstable(
                "causal",
                "non-finite propensity score".to_string(),
            ));
        }
        let clamped = p.clamp(config::PROPENSITY_CLIP_MIN, config::PROPENSITY_CLIP_MAX);
        if clamped != p {
            clipped += 1;
        }
        scores.push(clamped);
    }
    if clipped > 0 {
        log::warn!("causal: clipped {clipped} propensity scores into [{}, {}]",
            config::PROPENSITY_CLIP_MIN, config::PROPENSITY_CLIP_MAX);
    }

    Ok(PropensityModel {
        coefficients: fit.coefficients,
        converged: fit.converged,
        clipped_scores: clipped,
        scores,
    })
}

/// Greedy 1:1 nearest-propensity matching without replacement, then the
/// day-7 Welch test on the matched subsample only.
fn match_and_test(cohort: &Cohort, scores: &[f64]) -> Result<MatchedEstimate> {
    let pairs = match_nearest(cohort, scores);
    if pairs.is_empty() {
        return Err(AnalysisError::insufficient(
            "causal",
            "no matched pairs could be formed",
        ));
    }

    let treatment: Vec<f64> = pairs.iter().map(|&(t, _)| cohort.rows[t].day7()).collect();
    let control: Vec<f64> = pairs.iter().map(|&(_, c)| cohort.rows[c].day7()).collect();
    let welch_day7 = welch_two_sample("retention_day7 (matched)", &control, &treatment)?;

    Ok(MatchedEstimate {
        pairs: pairs.len(),
        welch_day7,
    })
}

/// Pair `(treatment_index, control_index)` rows by nearest propensity score.
///
/// Each control is used at most once; pair count is the smaller arm size.
/// Scores are positive finite floats, so their IEEE bit patterns order the
/// same way the values do, which lets a `BTreeMap` act as the sorted pool.
fn match_nearest(cohort: &Cohort, scores: &[f64]) -> Vec<(usize, usize)> {
    let mut pool: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
    for (idx, row) in cohort.rows.iter().enumerate() {
        if !row.gate.is_treatment() {
            pool.entry(scores[idx].to_bits()).or_default().push(idx);
        }
    }

    let mut pairs = vec![];
    for (idx, row) in cohort.rows.iter().enumerate() {
        if !row.gate.is_treatment() {
            continue;
        }
        if pool.is_empty() {
            break;
        }
        let key = scores[idx].to_bits();
        let below = pool.range(..=key).next_back().map(|(k, _)| *k);
        let above = pool.range(key..).next().map(|(k, _)| *k);
        let nearest = match (below, above) {
            (Some(b), Some(a)) => {
                let db = (scores[idx] - f64::from_bits(b)).abs();
                let da = (f64::from_bits(a) - scores[idx]).abs();
                if db <= da { b } else { a }
            }
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => break,
        };
        let bucket = pool.get_mut(&nearest).expect("key came from the map");
        let control_idx = bucket.pop().expect("buckets are never left empty");
        if bucket.is_empty() {
            pool.remove(&nearest);
        }
        pairs.push((idx, control_idx));
    }
    pairs
}

/// Weighted logistic regression `retained_day7 ~ gate` with weights 1/p for
/// treatment and 1/(1-p) for control.
fn inverse_probability_weighting(cohort: &Cohort, scores: &[f64]) -> Result<IpwEstimate> {
    let n = cohort.len();
    let mut design = Vec::with_capacity(n * 2);
    let mut outcome = Vec::with_capacity(n);
    let mut weights = Vec::with_capacity(n);
    let mut weight_sum_control = 0.0;
    let mut weight_sum_treatment = 0.0;

    for (idx, row) in cohort.rows.iter().enumerate() {
        let p = scores[idx];
        let weight = if row.gate.is_treatment() {
            let w = 1.0 / p;
            weight_sum_treatment += w;
            w
        } else {
            let w = 1.0 / (1.0 - p);
            weight_sum_control += w;
            w
        };
        if !weight.is_finite() {
            return Err(AnalysisError::unstable(
                "causal",
                format!("unbounded inverse-probability weight at row {idx}"),
            ));
        }
        design.push(1.0);
        design.push(f64::from(u8::from(row.gate.is_treatment())));
        outcome.push(row.day7());
        weights.push(weight);
    }

    let x = Array2::from_shape_vec((n, 2), design)
        .map_err(|e| AnalysisError::unstable("causal", e.to_string()))?;
    let fit = logit::fit(&["(intercept)", "gate_40"], &x, &outcome, Some(&weights))?;

    let gate = fit
        .coefficient("gate_40")
        .ok_or_else(|| AnalysisError::unstable("causal", "missing gate coefficient".to_string()))?;
    let effect_direction = if gate.p_value >= 0.05 {
        "null"
    } else if gate.estimate > 0.0 {
        "positive"
    } else {
        "negative"
    };
    let odds_ratio = gate.estimate.exp();

    Ok(IpwEstimate {
        odds_ratio,
        effect_direction,
        converged: fit.converged,
        coefficients: fit.coefficients,
        weight_sum_control,
        weight_sum_treatment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::UserRecord;

    fn record(id: u64, gate: Gate, rounds: u32, d7: bool) -> UserRecord {
        UserRecord {
            user_id: id,
            gate,
            rounds_played: rounds,
            retained_day1: d7,
            retained_day7: d7,
        }
    }

    fn balanced_cohort(per_arm: usize) -> Cohort {
        let mut rows = vec![];
        for i in 0..per_arm {
            rows.push(record(i as u64, Gate::Gate30, (i % 60) as u32, i % 3 == 0));
            rows.push(record(
                (per_arm + i) as u64,
                Gate::Gate40,
                (i % 60) as u32 + 1,
                i % 4 == 0,
            ));
        }
        Cohort { rows }
    }

    #[test]
    fn every_treatment_unit_gets_a_unique_control() {
        let cohort = balanced_cohort(30);
        let propensity = fit_propensity(&cohort).unwrap();
        let pairs = match_nearest(&cohort, &propensity.scores);

        assert_eq!(pairs.len(), 30);
        let mut controls: Vec<usize> = pairs.iter().map(|&(_, c)| c).collect();
        controls.sort_unstable();
        controls.dedup();
        assert_eq!(controls.len(), 30, "controls must not be reused");
        for &(t, c) in &pairs {
            assert!(cohort.rows[t].gate.is_treatment());
            assert!(!cohort.rows[c].gate.is_treatment());
        }
    }

    #[test]
    fn pair_count_is_bounded_by_smaller_arm() {
        let mut cohort = balanced_cohort(20);
        // Shrink the control pool.
        cohort.rows.retain(|r| r.gate.is_treatment() || r.user_id < 8);
        let propensity = fit_propensity(&cohort).unwrap();
        let pairs = match_nearest(&cohort, &propensity.scores);
        assert_eq!(pairs.len(), 8);
    }

    #[test]
    fn scores_stay_inside_clip_bounds() {
        let cohort = balanced_cohort(25);
        let propensity = fit_propensity(&cohort).unwrap();
        assert!(propensity.scores.iter().all(|&p| {
            (config::PROPENSITY_CLIP_MIN..=config::PROPENSITY_CLIP_MAX).contains(&p)
        }));
    }

    #[test]
    fn ipw_weights_are_at_least_one() {
        let cohort = balanced_cohort(25);
        let propensity = fit_propensity(&cohort).unwrap();
        for (idx, row) in cohort.rows.iter().enumerate() {
            let p = propensity.scores[idx];
            let w = if row.gate.is_treatment() { 1.0 / p } else { 1.0 / (1.0 - p) };
            assert!(w >= 1.0);
            assert!(w.is_finite());
        }
    }

    #[test]
    fn full_stage_reports_both_estimates() {
        let cohort = balanced_cohort(40);
        let report = estimate_effects(&cohort).unwrap();
        assert_eq!(report.matching.pairs, 40);
        assert_eq!(
            report.matching.welch_day7.n_control + report.matching.welch_day7.n_treatment,
            80
        );
        assert!(report.ipw.odds_ratio > 0.0);
        assert!(["positive", "negative", "null"].contains(&report.ipw.effect_direction));
        // Weighted arm sizes approximate the full population.
        let n = cohort.len() as f64;
        assert!(report.ipw.weight_sum_treatment > 0.3 * n);
        assert!(report.ipw.weight_sum_control > 0.3 * n);
    }
}
