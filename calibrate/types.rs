use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// One individual's raw score alongside their genetic ancestry coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub sample_id: String,
    pub score_value: f64,
    /// Ordered principal components (`PC1`, `PC2`, ...). Every record passed to one
    /// fit must carry the same number of components.
    pub principal_components: Vec<f64>,
    pub ancestry_group: String,
}

impl ScoreRecord {
    pub fn new(
        sample_id: impl Into<String>,
        score_value: f64,
        principal_components: Vec<f64>,
        ancestry_group: impl Into<String>,
    ) -> Self {
        Self {
            sample_id: sample_id.into(),
            score_value,
            principal_components,
            ancestry_group: ancestry_group.into(),
        }
    }

    pub fn pcs(&self) -> ArrayView1<'_, f64> {
        ArrayView1::from(self.principal_components.as_slice())
    }
}

/// Stacks the principal components of `records` into an `[n_samples, num_pcs]` matrix.
///
/// Callers validate that every record has `num_pcs` components first.
pub(crate) fn pc_matrix(records: &[ScoreRecord], num_pcs: usize) -> Array2<f64> {
    Array2::from_shape_fn((records.len(), num_pcs), |(i, j)| {
        records[i].principal_components[j]
    })
}

/// A score after removal of ancestry-predicted mean and variance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibratedScore {
    pub sample_id: String,
    /// Mean predicted from the principal components by the first-stage fit.
    pub predicted_mean: f64,
    /// Residual variance predicted from the principal components by the second-stage fit.
    pub predicted_variance: f64,
    /// `score_value - predicted_mean`.
    pub mean_calibrated: f64,
    /// `mean_calibrated / sqrt(predicted_variance)`; `None` when the predicted
    /// variance is not strictly positive.
    pub variance_calibrated: Option<f64>,
}
