//! Per-ancestry-group distribution summaries of raw and calibrated scores.
//!
//! A well-calibrated score has group means near zero and group SDs near one after
//! variance calibration; these summaries are what gets plotted per population.

use crate::calibrate::types::{CalibratedScore, ScoreRecord};
use itertools::Itertools;
use serde::Serialize;

/// Count, mean and sample standard deviation of a set of values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Moments {
    pub count: usize,
    pub mean: Option<f64>,
    /// Sample SD (n - 1 denominator); undefined for fewer than two values.
    pub sd: Option<f64>,
}

impl Moments {
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let values: Vec<f64> = values.into_iter().collect();
        let count = values.len();
        if count == 0 {
            return Self {
                count,
                mean: None,
                sd: None,
            };
        }
        let mean = values.iter().sum::<f64>() / count as f64;
        let sd = (count > 1).then(|| {
            let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (count - 1) as f64).sqrt()
        });
        Self {
            count,
            mean: Some(mean),
            sd,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub group: String,
    pub raw: Moments,
    pub mean_calibrated: Moments,
    /// Records with an undefined variance-calibrated score are skipped.
    pub variance_calibrated: Moments,
}

/// Summarizes `records` and their positionally aligned `calibrated` scores by
/// ancestry group. Groups are returned in natural sort order.
///
/// Returns `None` if the two slices differ in length.
pub fn summarize_by_group(
    records: &[ScoreRecord],
    calibrated: &[CalibratedScore],
) -> Option<Vec<GroupSummary>> {
    if records.len() != calibrated.len() {
        return None;
    }

    let by_group = records
        .iter()
        .zip(calibrated)
        .into_group_map_by(|&(record, _)| record.ancestry_group.as_str());

    let summaries = by_group
        .into_iter()
        .sorted_by(|(a, _), (b, _)| natord::compare(a, b))
        .map(|(group, rows)| GroupSummary {
            group: group.to_string(),
            raw: Moments::from_values(rows.iter().map(|(r, _)| r.score_value)),
            mean_calibrated: Moments::from_values(rows.iter().map(|(_, c)| c.mean_calibrated)),
            variance_calibrated: Moments::from_values(
                rows.iter().filter_map(|(_, c)| c.variance_calibrated),
            ),
        })
        .collect();
    Some(summaries)
}
