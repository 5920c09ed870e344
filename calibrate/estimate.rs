//! # Ancestry Calibration
//!
//! Removes the part of a polygenic score that is predictable from genetic ancestry.
//! Two linear models are fit once over the full record set:
//!
//! 1. A mean model, `score ~ 1 + PC1 + ... + PCk`. Its residual is the
//!    mean-calibrated score.
//! 2. A variance model, `(resid - mean(resid))^2 ~ 1 + PC1 + ... + PCk`. Its
//!    prediction is the ancestry-expected residual variance, used to rescale the
//!    mean-calibrated score.
//!
//! The fits live only inside the returned [`CalibrationModel`]; nothing is cached
//! between calls.

use crate::calibrate::data::Cohort;
use crate::calibrate::faer_ndarray::FaerLinalgError;
use crate::calibrate::model::{CalibrationModel, ModelError};
use crate::calibrate::regression::fit_ols;
use crate::calibrate::types::{CalibratedScore, ScoreRecord, pc_matrix};
use ndarray::Array1;
use rayon::prelude::*;
use thiserror::Error;

/// Numerical tolerances for the calibration fits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationOptions {
    /// A PC column whose range is at most this fraction of its magnitude is treated
    /// as constant and aliased with the intercept.
    pub aliasing_tolerance: f64,
    /// Relative threshold on the pivoted-QR diagonal below which the design is
    /// considered rank deficient.
    pub rank_tolerance: f64,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            aliasing_tolerance: 1e-12,
            rank_tolerance: 1e-10,
        }
    }
}

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error(
        "Calibration needs more observations than regression parameters: found {found}, need at least {required}."
    )]
    InsufficientData { found: usize, required: usize },
    #[error(
        "The principal-component design is collinear (rank {rank} of {columns} columns); the least-squares fit is not unique."
    )]
    DegenerateDesign { rank: usize, columns: usize },
    #[error("Invalid calibration input: {0}")]
    InvalidInput(String),
    #[error("Linear algebra failure during calibration: {0}")]
    Linalg(#[from] FaerLinalgError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Fits the two-stage ancestry calibration over `records`.
///
/// # Errors
/// * `InvalidInput` for an empty record set, records with differing numbers of
///   principal components, or non-finite values.
/// * `InsufficientData` when `records.len() <= num_pcs + 1`.
/// * `DegenerateDesign` when non-constant PC columns are collinear.
pub fn fit_calibration(
    records: &[ScoreRecord],
    options: &CalibrationOptions,
) -> Result<CalibrationModel, CalibrationError> {
    let num_pcs = validate_records(records)?;
    let n = records.len();
    if n <= num_pcs + 1 {
        return Err(CalibrationError::InsufficientData {
            found: n,
            required: num_pcs + 2,
        });
    }

    let pcs = pc_matrix(records, num_pcs);
    let scores: Array1<f64> = records.iter().map(|r| r.score_value).collect();

    log::info!("Fitting mean model on {n} records with {num_pcs} PCs");
    let mean_model = fit_ols(pcs.view(), scores.view(), options)?;
    let residuals = &scores - &mean_model.predict(pcs.view());
    let residual_mean = residuals.mean().unwrap_or(0.0);
    let centered_sq = residuals.mapv(|r| (r - residual_mean).powi(2));

    log::info!("Fitting variance model on squared centered residuals");
    let variance_model = fit_ols(pcs.view(), centered_sq.view(), options)?;

    Ok(CalibrationModel {
        num_pcs,
        fitted_records: n,
        mean_model,
        variance_model,
    })
}

/// Calibrates `records` against a fit over those same records, with default tolerances.
///
/// The output is positionally aligned with the input.
pub fn calibrate(records: &[ScoreRecord]) -> Result<Vec<CalibratedScore>, CalibrationError> {
    calibrate_with(records, &CalibrationOptions::default())
}

pub fn calibrate_with(
    records: &[ScoreRecord],
    options: &CalibrationOptions,
) -> Result<Vec<CalibratedScore>, CalibrationError> {
    let model = fit_calibration(records, options)?;
    Ok(model.apply(records)?)
}

/// The calibration of one named score column of a cohort.
#[derive(Debug)]
pub struct ScoreCalibration {
    pub score: String,
    pub model: CalibrationModel,
    pub calibrated: Vec<CalibratedScore>,
}

/// Calibrates several score columns of one cohort independently and in parallel.
///
/// Results come back in the order of `score_names`. The first failing score aborts
/// the batch.
pub fn calibrate_many(
    cohort: &Cohort,
    score_names: &[String],
    options: &CalibrationOptions,
) -> Result<Vec<ScoreCalibration>, CalibrationError> {
    score_names
        .par_iter()
        .map(|name| {
            let records = cohort.records(name).ok_or_else(|| {
                CalibrationError::InvalidInput(format!("cohort has no score column '{name}'"))
            })?;
            let model = fit_calibration(&records, options)?;
            let calibrated = model.apply(&records)?;
            Ok(ScoreCalibration {
                score: name.clone(),
                model,
                calibrated,
            })
        })
        .collect()
}

/// Checks shape and finiteness; returns the shared number of principal components.
fn validate_records(records: &[ScoreRecord]) -> Result<usize, CalibrationError> {
    let first = records
        .first()
        .ok_or_else(|| CalibrationError::InvalidInput("no records supplied".to_string()))?;
    let num_pcs = first.principal_components.len();

    for (i, record) in records.iter().enumerate() {
        if record.principal_components.len() != num_pcs {
            return Err(CalibrationError::InvalidInput(format!(
                "record {} ('{}') has {} principal components, expected {}",
                i,
                record.sample_id,
                record.principal_components.len(),
                num_pcs
            )));
        }
        if !record.score_value.is_finite() {
            return Err(CalibrationError::InvalidInput(format!(
                "record '{}' has a non-finite score value",
                record.sample_id
            )));
        }
        if record.principal_components.iter().any(|v| !v.is_finite()) {
            return Err(CalibrationError::InvalidInput(format!(
                "record '{}' has a non-finite principal component",
                record.sample_id
            )));
        }
    }
    Ok(num_pcs)
}
