//! Ordinary least squares with an intercept, solved by column-pivoted QR.
//!
//! Predictor columns are centered before factorization so the intercept column is
//! orthogonal to the rest of the design; the intercept is mapped back to the
//! uncentered scale afterwards. Columns with no spread cannot be separated from the
//! intercept and are aliased out (their coefficient is fixed at zero). Any other rank
//! deficiency means the fit is not unique and is reported as a degenerate design.

use crate::calibrate::estimate::{CalibrationError, CalibrationOptions};
use crate::calibrate::faer_ndarray::FaerColPivQr;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// A fitted linear model `y = intercept + sum_j coefficients[j] * x_j`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub intercept: f64,
    /// One coefficient per predictor column. Aliased columns hold `0.0`.
    pub coefficients: Vec<f64>,
    /// Indices of predictor columns dropped because they were constant.
    #[serde(default)]
    pub aliased: Vec<usize>,
}

impl LinearFit {
    pub fn num_predictors(&self) -> usize {
        self.coefficients.len()
    }

    /// Every aliased index names a real predictor whose coefficient is zero.
    pub fn aliasing_is_consistent(&self) -> bool {
        self.aliased
            .iter()
            .all(|&j| self.coefficients.get(j).is_some_and(|&b| b == 0.0))
    }

    pub fn predict_one(&self, x: ArrayView1<f64>) -> f64 {
        debug_assert_eq!(x.len(), self.coefficients.len());
        self.intercept
            + x.iter()
                .zip(&self.coefficients)
                .map(|(xi, bi)| xi * bi)
                .sum::<f64>()
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        x.axis_iter(Axis(0))
            .map(|row| self.predict_one(row))
            .collect()
    }
}

/// Fits `y ~ 1 + x` by ordinary least squares.
///
/// # Errors
/// * `InvalidInput` if `x` and `y` disagree on the number of observations.
/// * `InsufficientData` if there are fewer observations than free parameters.
/// * `DegenerateDesign` if the non-constant predictors are collinear.
pub fn fit_ols(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    options: &CalibrationOptions,
) -> Result<LinearFit, CalibrationError> {
    let (n, p) = x.dim();
    if y.len() != n {
        return Err(CalibrationError::InvalidInput(format!(
            "design has {n} rows but the response has {} values",
            y.len()
        )));
    }

    let aliased = constant_columns(x, options.aliasing_tolerance);
    let active: Vec<usize> = (0..p).filter(|j| !aliased.contains(j)).collect();
    if !aliased.is_empty() {
        log::warn!(
            "Dropping {} constant predictor column(s) aliased with the intercept: {:?}",
            aliased.len(),
            aliased
        );
    }

    let num_params = active.len() + 1;
    if n < num_params {
        return Err(CalibrationError::InsufficientData {
            found: n,
            required: num_params,
        });
    }

    // Design is [1 | centered active predictors].
    let means: Vec<f64> = active
        .iter()
        .map(|&j| x.column(j).mean().unwrap_or(0.0))
        .collect();
    let mut design = Array2::<f64>::ones((n, num_params));
    for (k, (&j, &mean)) in active.iter().zip(&means).enumerate() {
        design
            .column_mut(k + 1)
            .assign(&x.column(j).mapv(|v| v - mean));
    }

    let qr = design.col_piv_qr()?;
    let diag = qr.diagonal_magnitudes();
    let largest = diag.iter().copied().fold(0.0_f64, f64::max);
    let threshold = options.rank_tolerance * largest.max(f64::MIN_POSITIVE);
    let rank = diag.iter().filter(|&&d| d > threshold).count();
    log::debug!(
        "OLS design {}x{}: rank {}, |R| diagonal range [{:.3e}, {:.3e}]",
        n,
        num_params,
        rank,
        diag.iter().copied().fold(f64::INFINITY, f64::min),
        largest
    );
    if rank < num_params {
        return Err(CalibrationError::DegenerateDesign {
            rank,
            columns: num_params,
        });
    }

    // R z = Q^T y, then undo the column permutation.
    let qty = qr.q_transpose_dot(&y);
    let z = back_substitute(&qr.r, &qty);
    let mut solution = Array1::<f64>::zeros(num_params);
    for (i, &original) in qr.pivot.iter().enumerate() {
        solution[original] = z[i];
    }

    let mut coefficients = vec![0.0; p];
    let mut intercept = solution[0];
    for (k, (&j, &mean)) in active.iter().zip(&means).enumerate() {
        let beta = solution[k + 1];
        coefficients[j] = beta;
        intercept -= beta * mean;
    }

    Ok(LinearFit {
        intercept,
        coefficients,
        aliased,
    })
}

/// Returns the indices of columns whose range is negligible relative to their magnitude.
fn constant_columns(x: ArrayView2<f64>, tolerance: f64) -> Vec<usize> {
    x.axis_iter(Axis(1))
        .enumerate()
        .filter_map(|(j, col)| {
            let (lo, hi) = col
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                });
            if !lo.is_finite() {
                // Zero-row designs have no spread either.
                return Some(j);
            }
            let scale = lo.abs().max(hi.abs()).max(1.0);
            (hi - lo <= tolerance * scale).then_some(j)
        })
        .collect()
}

/// Solves the square upper-triangular system `R z = b`.
fn back_substitute(r: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let m = r.ncols();
    let mut z = Array1::<f64>::zeros(m);
    for i in (0..m).rev() {
        let tail: f64 = ((i + 1)..m).map(|j| r[(i, j)] * z[j]).sum();
        z[i] = (b[i] - tail) / r[(i, i)];
    }
    z
}
