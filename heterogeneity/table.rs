use crate::heterogeneity::estimate::{
    GroupEstimate, HeterogeneityError, HeterogeneityResult, estimate_heterogeneity,
};
use itertools::Itertools;
use rayon::prelude::*;
use serde::Serialize;

/// Heterogeneity of one named score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreHeterogeneity {
    pub score: String,
    pub result: HeterogeneityResult,
}

/// Heterogeneity results for many scores, in natural order of score name.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct HeterogeneityTable {
    pub rows: Vec<ScoreHeterogeneity>,
}

impl HeterogeneityTable {
    /// Builds the table from long-format `(score, group estimate)` rows.
    ///
    /// Rows are grouped by score and every score is evaluated independently, in
    /// parallel. Boundary p-values (0 or 1) only drop the affected group; the first
    /// malformed score aborts the whole table.
    pub fn from_estimates(
        rows: impl IntoIterator<Item = (String, GroupEstimate)>,
    ) -> Result<Self, HeterogeneityError> {
        let by_score = rows.into_iter().into_group_map();
        log::info!("Evaluating heterogeneity for {} score(s)", by_score.len());

        let mut rows = by_score
            .into_par_iter()
            .map(|(score, estimates)| {
                let result = estimate_heterogeneity(&estimates).map_err(|e| match e {
                    HeterogeneityError::InvalidInput(msg) => {
                        HeterogeneityError::InvalidInput(format!("score '{score}': {msg}"))
                    }
                })?;
                log::debug!(
                    "{}: {} usable group(s), I^2 = {:?}",
                    score,
                    result.usable_groups,
                    result.i_squared
                );
                Ok(ScoreHeterogeneity { score, result })
            })
            .collect::<Result<Vec<_>, HeterogeneityError>>()?;

        rows.sort_by(|a, b| natord::compare(&a.score, &b.score));
        Ok(Self { rows })
    }

    pub fn get(&self, score: &str) -> Option<&HeterogeneityResult> {
        self.rows
            .iter()
            .find(|row| row.score == score)
            .map(|row| &row.result)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
