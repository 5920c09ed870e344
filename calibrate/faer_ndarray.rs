use faer::linalg::solvers::ColPivQr;
use faer::{Mat, MatRef};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("QR factorization received an empty matrix ({rows} x {cols})")]
    EmptyMatrix { rows: usize, cols: usize },
    #[error("QR factorization produced non-finite entries")]
    NonFinite,
}

fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(i, j)| mat[(i, j)])
}

enum FaerStorage<'a> {
    Borrowed(MatRef<'a, f64>),
    Owned(Mat<f64>),
}

impl<'a> FaerStorage<'a> {
    #[inline]
    fn as_ref(&self) -> MatRef<'_, f64> {
        match self {
            FaerStorage::Borrowed(view) => *view,
            FaerStorage::Owned(mat) => mat.as_ref(),
        }
    }
}

/// Zero-copy view of an ndarray matrix as a faer matrix when the memory layout allows it.
pub struct FaerArrayView<'a> {
    storage: FaerStorage<'a>,
}

impl<'a> FaerArrayView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let storage = match array.as_slice_memory_order() {
            Some(slice) if array.is_standard_layout() => FaerStorage::Borrowed(
                MatRef::from_row_major_slice(slice, array.nrows(), array.ncols()),
            ),
            Some(slice) if array.t().is_standard_layout() => FaerStorage::Borrowed(
                MatRef::from_column_major_slice(slice, array.nrows(), array.ncols()),
            ),
            _ => {
                let (rows, cols) = array.dim();
                FaerStorage::Owned(Mat::from_fn(rows, cols, |i, j| array[(i, j)]))
            }
        };
        Self { storage }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        self.storage.as_ref()
    }
}

/// Column-pivoted QR factors `A P = Q R` in ndarray form.
///
/// `pivot[i]` is the column of `A` that sits at position `i` of the pivoted matrix.
#[derive(Debug, Clone)]
pub struct PivotedQr {
    /// Thin orthonormal factor, shape `[rows, min(rows, cols)]`.
    pub q: Array2<f64>,
    /// Upper-trapezoidal factor, shape `[min(rows, cols), cols]`.
    pub r: Array2<f64>,
    pub pivot: Vec<usize>,
}

impl PivotedQr {
    /// Magnitudes of the diagonal of `R`, in pivoted order. Column pivoting makes
    /// these non-increasing, so they double as a rank profile.
    pub fn diagonal_magnitudes(&self) -> Array1<f64> {
        let k = self.r.nrows().min(self.r.ncols());
        Array1::from_shape_fn(k, |i| self.r[(i, i)].abs())
    }

    /// Computes `Q^T b` for a right-hand side of length `rows`.
    pub fn q_transpose_dot<S: Data<Elem = f64>>(&self, rhs: &ArrayBase<S, Ix1>) -> Array1<f64> {
        self.q.t().dot(rhs)
    }
}

pub trait FaerColPivQr {
    fn col_piv_qr(&self) -> Result<PivotedQr, FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerColPivQr for ArrayBase<S, Ix2> {
    fn col_piv_qr(&self) -> Result<PivotedQr, FaerLinalgError> {
        let (rows, cols) = self.dim();
        if rows == 0 || cols == 0 {
            return Err(FaerLinalgError::EmptyMatrix { rows, cols });
        }

        let faer_view = FaerArrayView::new(self);
        let qr = ColPivQr::new(faer_view.as_ref());

        let q = mat_to_array(qr.compute_thin_Q().as_ref());
        let k = rows.min(cols);
        let r_full = qr.R();
        let r = Array2::from_shape_fn((k, cols), |(i, j)| {
            if i <= j { r_full[(i, j)] } else { 0.0 }
        });
        let pivot: Vec<usize> = qr.P().arrays().0.to_vec();

        if q.iter().chain(r.iter()).any(|v| !v.is_finite()) {
            return Err(FaerLinalgError::NonFinite);
        }

        Ok(PivotedQr { q, r, pivot })
    }
}
