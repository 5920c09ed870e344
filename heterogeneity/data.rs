//! Loads long-format effect estimates: one row per (score, ancestry group).
//!
//! Required columns are `score`, `group`, `beta` and `p_value`. Missing effects are
//! written as `NA` or left empty and come through as absent values.

use crate::heterogeneity::estimate::GroupEstimate;
use crate::shared::tsv::{
    DataError, extract_optional_numeric_column, extract_string_column, read_tsv, require_columns,
};
use std::path::Path;

pub const SCORE_COLUMN: &str = "score";
pub const GROUP_COLUMN: &str = "group";
pub const BETA_COLUMN: &str = "beta";
pub const P_VALUE_COLUMN: &str = "p_value";

pub fn load_group_estimates(
    path: impl AsRef<Path>,
) -> Result<Vec<(String, GroupEstimate)>, DataError> {
    let path = path.as_ref();
    log::info!("Loading group effect estimates from '{}'", path.display());
    let df = read_tsv(path)?;

    let required: Vec<String> = [SCORE_COLUMN, GROUP_COLUMN, BETA_COLUMN, P_VALUE_COLUMN]
        .iter()
        .map(|s| s.to_string())
        .collect();
    require_columns(&df, &required)?;

    let scores = extract_string_column(&df, SCORE_COLUMN)?;
    let groups = extract_string_column(&df, GROUP_COLUMN)?;
    let betas = extract_optional_numeric_column(&df, BETA_COLUMN)?;
    let p_values = extract_optional_numeric_column(&df, P_VALUE_COLUMN)?;

    let rows: Vec<(String, GroupEstimate)> = scores
        .into_iter()
        .zip(groups)
        .zip(betas.into_iter().zip(p_values))
        .map(|((score, group_id), (beta, p_value))| {
            (
                score,
                GroupEstimate {
                    group_id,
                    beta,
                    p_value,
                },
            )
        })
        .collect();

    let incomplete = rows
        .iter()
        .filter(|(_, e)| e.beta.is_none() || e.p_value.is_none())
        .count();
    log::info!(
        "Loaded {} estimate row(s), {} with a missing beta or p-value",
        rows.len(),
        incomplete
    );
    Ok(rows)
}
