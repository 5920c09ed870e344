//! Tab-delimited writers for result tables. Undefined values are written as `NA`.

use crate::calibrate::estimate::ScoreCalibration;
use crate::calibrate::summary::GroupSummary;
use crate::calibrate::types::ScoreRecord;
use crate::heterogeneity::table::HeterogeneityTable;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

const MISSING: &str = "NA";

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to write output table: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error while writing output: {0}")]
    Io(#[from] std::io::Error),
    #[error("Score '{score}' has {calibrated} calibrated values for {records} records")]
    Misaligned {
        score: String,
        records: usize,
        calibrated: usize,
    },
}

/// Shortest representation that reads back to the same `f64`. Very small or very
/// large magnitudes use scientific notation.
fn fmt_value(value: Option<f64>) -> String {
    match value {
        Some(v) if v == 0.0 => "0".to_string(),
        Some(v) if v.is_finite() => {
            let magnitude = v.abs();
            if (1e-4..1e15).contains(&magnitude) {
                format!("{v}")
            } else {
                format!("{v:e}")
            }
        }
        _ => MISSING.to_string(),
    }
}

fn tsv_writer<W: Write>(sink: W) -> csv::Writer<W> {
    csv::WriterBuilder::new().delimiter(b'\t').from_writer(sink)
}

pub fn write_heterogeneity<W: Write>(
    table: &HeterogeneityTable,
    sink: W,
) -> Result<(), OutputError> {
    let mut writer = tsv_writer(sink);
    writer.write_record([
        "score",
        "usable_groups",
        "q_statistic",
        "q_p_value",
        "i_squared",
        "pooled_beta",
    ])?;
    for row in &table.rows {
        let r = &row.result;
        writer.write_record([
            row.score.clone(),
            r.usable_groups.to_string(),
            fmt_value(r.q_statistic),
            fmt_value(r.q_p_value),
            fmt_value(r.i_squared),
            fmt_value(r.pooled_beta),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes one row per (score, sample). `records_for` supplies the raw records a
/// calibration was computed from, positionally aligned with its output.
pub fn write_calibrated<'a, W, F>(
    calibrations: &[ScoreCalibration],
    mut records_for: F,
    sink: W,
) -> Result<(), OutputError>
where
    W: Write,
    F: FnMut(&str) -> Option<&'a [ScoreRecord]>,
{
    let mut writer = tsv_writer(sink);
    writer.write_record([
        "score",
        "sample_id",
        "group",
        "score_value",
        "predicted_mean",
        "predicted_variance",
        "mean_calibrated",
        "variance_calibrated",
    ])?;
    for calibration in calibrations {
        let records = records_for(&calibration.score).unwrap_or(&[]);
        if records.len() != calibration.calibrated.len() {
            return Err(OutputError::Misaligned {
                score: calibration.score.clone(),
                records: records.len(),
                calibrated: calibration.calibrated.len(),
            });
        }
        for (record, c) in records.iter().zip(&calibration.calibrated) {
            writer.write_record([
                calibration.score.clone(),
                c.sample_id.clone(),
                record.ancestry_group.clone(),
                fmt_value(Some(record.score_value)),
                fmt_value(Some(c.predicted_mean)),
                fmt_value(Some(c.predicted_variance)),
                fmt_value(Some(c.mean_calibrated)),
                fmt_value(c.variance_calibrated),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Writes per-group summaries, one row per (score, group).
pub fn write_group_summaries<W: Write>(
    summaries: &[(String, Vec<GroupSummary>)],
    sink: W,
) -> Result<(), OutputError> {
    let mut writer = tsv_writer(sink);
    writer.write_record([
        "score",
        "group",
        "n",
        "raw_mean",
        "raw_sd",
        "mean_calibrated_mean",
        "mean_calibrated_sd",
        "variance_calibrated_n",
        "variance_calibrated_mean",
        "variance_calibrated_sd",
    ])?;
    for (score, groups) in summaries {
        for g in groups {
            writer.write_record([
                score.clone(),
                g.group.clone(),
                g.raw.count.to_string(),
                fmt_value(g.raw.mean),
                fmt_value(g.raw.sd),
                fmt_value(g.mean_calibrated.mean),
                fmt_value(g.mean_calibrated.sd),
                g.variance_calibrated.count.to_string(),
                fmt_value(g.variance_calibrated.mean),
                fmt_value(g.variance_calibrated.sd),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Opens `path` for buffered writing.
pub fn create(path: impl AsRef<Path>) -> Result<std::io::BufWriter<std::fs::File>, OutputError> {
    Ok(std::io::BufWriter::new(std::fs::File::create(path)?))
}
