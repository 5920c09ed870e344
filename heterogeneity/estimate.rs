//! # Cross-Ancestry Heterogeneity
//!
//! Given one score's effect estimate in each ancestry group, measures how much of
//! the spread in effects is more than sampling error would produce.
//!
//! Standard errors are not supplied; they are recovered from each group's two-sided
//! p-value as `|beta| / |z|` with `z = Phi^-1(p / 2)`. Cochran's Q is then the
//! inverse-variance weighted sum of squared deviations from the pooled effect, and
//! `I^2 = max(0, (Q - (k - 1)) / Q)`.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};
use std::collections::HashSet;
use thiserror::Error;

/// One ancestry group's regression result for one score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupEstimate {
    pub group_id: String,
    pub beta: Option<f64>,
    /// Two-sided p-value in `[0, 1]`; `0` and `1` leave the group unusable.
    pub p_value: Option<f64>,
}

impl GroupEstimate {
    pub fn new(group_id: impl Into<String>, beta: f64, p_value: f64) -> Self {
        Self {
            group_id: group_id.into(),
            beta: Some(beta),
            p_value: Some(p_value),
        }
    }

    pub fn missing(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            beta: None,
            p_value: None,
        }
    }
}

/// Heterogeneity of one score across ancestry groups. Every statistic is `None`
/// when fewer than two groups are usable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeterogeneityResult {
    pub usable_groups: usize,
    pub q_statistic: Option<f64>,
    /// In `[0, 1]` whenever defined.
    pub i_squared: Option<f64>,
    /// Inverse-variance weighted mean effect.
    pub pooled_beta: Option<f64>,
    /// Upper tail of chi-square with `usable_groups - 1` degrees of freedom at Q.
    pub q_p_value: Option<f64>,
}

impl HeterogeneityResult {
    fn undefined(usable_groups: usize) -> Self {
        Self {
            usable_groups,
            q_statistic: None,
            i_squared: None,
            pooled_beta: None,
            q_p_value: None,
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum HeterogeneityError {
    #[error("Invalid heterogeneity input: {0}")]
    InvalidInput(String),
}

/// Recovers a standard error from an effect estimate and its two-sided p-value.
///
/// Returns `None` when the result would not be a strictly positive, finite number:
/// a p-value of exactly 1 (z = 0) or exactly 0 (underflowed), a zero effect, or a
/// p-value outside `[0, 1]`.
pub fn standard_error_from_p(beta: f64, p_value: f64) -> Option<f64> {
    if !beta.is_finite() || !(p_value > 0.0 && p_value <= 1.0) {
        return None;
    }
    let normal = Normal::new(0.0, 1.0).ok()?;
    let z = normal.inverse_cdf(p_value / 2.0).abs();
    if z == 0.0 || !z.is_finite() {
        return None;
    }
    let se = beta.abs() / z;
    (se.is_finite() && se > 0.0).then_some(se)
}

/// Upper-tail probability of Cochran's Q under homogeneity: chi-square with
/// `usable_groups - 1` degrees of freedom. `None` for fewer than two groups.
pub fn cochran_q_p_value(q: f64, usable_groups: usize) -> Option<f64> {
    if usable_groups < 2 || !q.is_finite() || q < 0.0 {
        return None;
    }
    let chi = ChiSquared::new((usable_groups - 1) as f64).ok()?;
    let p = chi.sf(q);
    p.is_finite().then_some(p)
}

/// Computes Cochran's Q and I^2 for one score across ancestry groups.
///
/// Groups missing `beta` or `p_value`, or whose standard error or inverse-variance
/// weight is undefined, are excluded. The result does not depend on the order of
/// `estimates`.
///
/// # Errors
/// `InvalidInput` if a present `beta` is non-finite, a present `p_value` lies
/// outside `[0, 1]`, or two entries share a `group_id`.
pub fn estimate_heterogeneity(
    estimates: &[GroupEstimate],
) -> Result<HeterogeneityResult, HeterogeneityError> {
    validate(estimates)?;

    // (beta, weight) for each usable group, in canonical group order so the sums
    // are bitwise reproducible under any input permutation.
    let mut usable: Vec<(&str, f64, f64)> = estimates
        .iter()
        .filter_map(|e| {
            let (beta, p) = (e.beta?, e.p_value?);
            let weight = standard_error_from_p(beta, p)
                .map(|se| 1.0 / (se * se))
                .filter(|w| w.is_finite());
            match weight {
                Some(w) => Some((e.group_id.as_str(), beta, w)),
                None => {
                    log::debug!(
                        "Excluding group '{}': inverse-variance weight undefined (beta={}, p={})",
                        e.group_id,
                        beta,
                        p
                    );
                    None
                }
            }
        })
        .collect();
    usable.sort_by(|a, b| a.0.cmp(b.0));

    let k = usable.len();
    if k < 2 {
        log::debug!("Only {k} usable group(s); heterogeneity is undefined");
        return Ok(HeterogeneityResult::undefined(k));
    }

    let weight_sum: f64 = usable.iter().map(|&(_, _, w)| w).sum();
    let pooled_beta = usable.iter().map(|&(_, b, w)| w * b).sum::<f64>() / weight_sum;
    let q = usable
        .iter()
        .map(|&(_, b, w)| w * (b - pooled_beta).powi(2))
        .sum::<f64>();

    if !q.is_finite() || !pooled_beta.is_finite() {
        log::warn!("Cochran's Q is not finite over {k} usable groups; heterogeneity is undefined");
        return Ok(HeterogeneityResult::undefined(k));
    }

    let df = (k - 1) as f64;
    let excess = q - df;
    let i_squared = if excess < 0.0 { 0.0 } else { excess / q };
    let q_p_value = cochran_q_p_value(q, k);

    Ok(HeterogeneityResult {
        usable_groups: k,
        q_statistic: Some(q),
        i_squared: Some(i_squared),
        pooled_beta: Some(pooled_beta),
        q_p_value,
    })
}

fn validate(estimates: &[GroupEstimate]) -> Result<(), HeterogeneityError> {
    let mut seen = HashSet::with_capacity(estimates.len());
    for e in estimates {
        if !seen.insert(e.group_id.as_str()) {
            return Err(HeterogeneityError::InvalidInput(format!(
                "group '{}' appears more than once",
                e.group_id
            )));
        }
        if let Some(beta) = e.beta {
            if !beta.is_finite() {
                return Err(HeterogeneityError::InvalidInput(format!(
                    "group '{}' has a non-finite beta",
                    e.group_id
                )));
            }
        }
        if let Some(p) = e.p_value {
            if !(0.0..=1.0).contains(&p) {
                return Err(HeterogeneityError::InvalidInput(format!(
                    "group '{}' has p-value {} outside [0, 1]",
                    e.group_id, p
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn standard_error_matches_normal_quantile() {
        // p = 0.05 -> |z| = 1.959964
        let se = standard_error_from_p(0.392, 0.05).unwrap();
        assert_relative_eq!(se, 0.392 / 1.959_963_984_540_054, max_relative = 1e-8);
    }

    #[test]
    fn standard_error_uses_absolute_beta() {
        let pos = standard_error_from_p(0.3, 0.01).unwrap();
        let neg = standard_error_from_p(-0.3, 0.01).unwrap();
        assert_eq!(pos, neg);
        assert!(pos > 0.0);
    }

    #[test]
    fn standard_error_undefined_at_boundaries() {
        assert_eq!(standard_error_from_p(0.5, 1.0), None);
        assert_eq!(standard_error_from_p(0.0, 0.01), None);
        assert_eq!(standard_error_from_p(0.5, 0.0), None);
        assert_eq!(standard_error_from_p(0.5, 1.5), None);
        assert_eq!(standard_error_from_p(f64::NAN, 0.5), None);
    }

    #[test]
    fn identical_effects_have_no_heterogeneity() {
        let estimates = vec![
            GroupEstimate::new("A", 0.5, 0.01),
            GroupEstimate::new("B", 0.5, 0.02),
            GroupEstimate::new("C", 0.5, 0.03),
        ];
        let result = estimate_heterogeneity(&estimates).unwrap();
        assert_eq!(result.usable_groups, 3);
        assert_abs_diff_eq!(result.q_statistic.unwrap(), 0.0, epsilon = 1e-12);
        assert_eq!(result.i_squared, Some(0.0));
        assert_abs_diff_eq!(result.pooled_beta.unwrap(), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(result.q_p_value.unwrap(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn opposite_effects_are_highly_heterogeneous() {
        let estimates = vec![
            GroupEstimate::new("EUR", 0.1, 1e-10),
            GroupEstimate::new("AFR", -0.1, 1e-10),
        ];
        let result = estimate_heterogeneity(&estimates).unwrap();
        assert!(result.q_statistic.unwrap() > 50.0);
        assert!(result.i_squared.unwrap() > 0.95);
        assert!(result.i_squared.unwrap() <= 1.0);
        assert!(result.q_p_value.unwrap() < 1e-6);
    }

    #[test]
    fn cochran_q_matches_hand_computation() {
        // Choose p-values so the standard errors are round numbers: |z| = 1.959964 at p=0.05.
        let z = 1.959_963_984_540_054;
        let estimates = vec![
            GroupEstimate::new("A", 0.2 * z, 0.05),  // se = 0.2
            GroupEstimate::new("B", 0.1 * z, 0.05),  // se = 0.1
        ];
        let result = estimate_heterogeneity(&estimates).unwrap();
        let (b1, w1) = (0.2 * z, 25.0);
        let (b2, w2) = (0.1 * z, 100.0);
        let pooled = (w1 * b1 + w2 * b2) / (w1 + w2);
        let q = w1 * (b1 - pooled).powi(2) + w2 * (b2 - pooled).powi(2);
        assert_relative_eq!(result.q_statistic.unwrap(), q, max_relative = 1e-8);
        assert_relative_eq!(result.pooled_beta.unwrap(), pooled, max_relative = 1e-8);
        let expected_i2 = if q - 1.0 < 0.0 { 0.0 } else { (q - 1.0) / q };
        assert_relative_eq!(result.i_squared.unwrap(), expected_i2, max_relative = 1e-8);
    }

    #[test]
    fn q_p_value_follows_chi_square_tail() {
        // 95th percentile of chi-square with 1 and 2 degrees of freedom.
        let one_df = cochran_q_p_value(3.841_458_820_694_124, 2).unwrap();
        let two_df = cochran_q_p_value(5.991_464_547_107_979, 3).unwrap();
        assert_abs_diff_eq!(one_df, 0.05, epsilon = 1e-9);
        assert_abs_diff_eq!(two_df, 0.05, epsilon = 1e-9);
        assert_eq!(cochran_q_p_value(1.0, 1), None);

        // Far upper tail: 1 - cdf would round to zero.
        let tail = cochran_q_p_value(80.0, 2).unwrap();
        assert!(tail > 0.0 && tail < 1e-15, "tail = {tail}");
        assert!(cochran_q_p_value(400.0, 5).unwrap() > 0.0);
    }

    #[test]
    fn overflowing_weights_are_excluded_not_nan() {
        let estimates = vec![
            GroupEstimate::new("A", 1e-200, 0.01),
            GroupEstimate::new("B", 2e-200, 0.01),
        ];
        let result = estimate_heterogeneity(&estimates).unwrap();
        assert_eq!(result.usable_groups, 0);
        assert_eq!(result.i_squared, None);
        assert_eq!(result.q_statistic, None);

        let mixed = vec![
            GroupEstimate::new("A", 1e-200, 0.01),
            GroupEstimate::new("B", 0.2, 0.01),
            GroupEstimate::new("C", 0.4, 0.001),
        ];
        let result = estimate_heterogeneity(&mixed).unwrap();
        assert_eq!(result.usable_groups, 2);
        let i2 = result.i_squared.unwrap();
        assert!((0.0..=1.0).contains(&i2));
    }

    #[test]
    fn underflowed_p_value_excludes_the_group() {
        let estimates = vec![
            GroupEstimate::new("EUR", 0.3, 0.0),
            GroupEstimate::new("AFR", 0.1, 0.004),
            GroupEstimate::new("EAS", 0.2, 0.01),
        ];
        let result = estimate_heterogeneity(&estimates).unwrap();
        assert_eq!(result.usable_groups, 2);
        assert!(result.i_squared.is_some());
    }

    #[test]
    fn single_usable_group_is_undefined() {
        let estimates = vec![
            GroupEstimate::new("EUR", 0.4, 0.001),
            GroupEstimate::missing("AFR"),
            GroupEstimate::new("EAS", 0.2, 1.0),
        ];
        let result = estimate_heterogeneity(&estimates).unwrap();
        assert_eq!(result.usable_groups, 1);
        assert_eq!(result.q_statistic, None);
        assert_eq!(result.i_squared, None);
        assert_eq!(result.pooled_beta, None);
        assert_eq!(result.q_p_value, None);
    }

    #[test]
    fn half_missing_pair_is_excluded() {
        let estimates = vec![
            GroupEstimate::new("EUR", 0.4, 0.001),
            GroupEstimate::new("SAS", 0.1, 0.02),
            GroupEstimate {
                group_id: "AMR".to_string(),
                beta: Some(0.3),
                p_value: None,
            },
        ];
        let result = estimate_heterogeneity(&estimates).unwrap();
        assert_eq!(result.usable_groups, 2);
    }

    #[test]
    fn empty_input_is_undefined_not_an_error() {
        let result = estimate_heterogeneity(&[]).unwrap();
        assert_eq!(result.usable_groups, 0);
        assert_eq!(result.i_squared, None);
    }

    #[test]
    fn malformed_input_is_rejected() {
        let out_of_range = vec![GroupEstimate::new("A", 0.1, -0.2)];
        assert!(estimate_heterogeneity(&out_of_range).is_err());

        let non_finite = vec![GroupEstimate::new("A", f64::INFINITY, 0.5)];
        assert!(estimate_heterogeneity(&non_finite).is_err());

        let duplicate = vec![
            GroupEstimate::new("A", 0.1, 0.5),
            GroupEstimate::new("A", 0.2, 0.5),
        ];
        assert!(matches!(
            estimate_heterogeneity(&duplicate),
            Err(HeterogeneityError::InvalidInput(_))
        ));
    }
}
