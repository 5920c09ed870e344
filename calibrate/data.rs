//! # Cohort Loading and Validation
//!
//! Reads a per-sample score table (TSV) and turns it into the in-memory records the
//! calibration core consumes.
//!
//! - Strict Schema: `sample_id`, the ancestry group column and `PC1..PCk` are
//!   required by name. Score columns are either named explicitly or taken to be
//!   every remaining column.
//! - User-Centric Errors: failures are assumed to be user-input errors and
//!   `DataError` says which column is at fault.
//! - Complete Data: missing or non-finite values in a PC or score column are
//!   rejected up front, before any fitting.

use crate::calibrate::types::ScoreRecord;
use crate::shared::tsv::{
    DataError, column_names, extract_numeric_column, extract_string_column, read_tsv,
    require_columns,
};
use ndarray::{Array1, Array2};
use std::collections::HashSet;
use std::path::Path;

/// The default name of the ancestry label column.
pub const DEFAULT_GROUP_COLUMN: &str = "Super_Population";
pub const SAMPLE_ID_COLUMN: &str = "sample_id";

/// A validated cohort: shared ids, labels and PCs, with one or more score columns.
#[derive(Debug, Clone)]
pub struct Cohort {
    pub sample_ids: Vec<String>,
    pub groups: Vec<String>,
    /// Shape: `[n_samples, num_pcs]`, columns in `pc_names` order.
    pub pcs: Array2<f64>,
    pub pc_names: Vec<String>,
    /// Score columns in file order.
    pub scores: Vec<(String, Array1<f64>)>,
}

impl Cohort {
    pub fn len(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_ids.is_empty()
    }

    pub fn score_names(&self) -> Vec<String> {
        self.scores.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Builds the per-sample records for one score column, or `None` if the cohort
    /// has no such column.
    pub fn records(&self, score: &str) -> Option<Vec<ScoreRecord>> {
        let (_, values) = self.scores.iter().find(|(name, _)| name == score)?;
        let records = (0..self.len())
            .map(|i| {
                ScoreRecord::new(
                    self.sample_ids[i].clone(),
                    values[i],
                    self.pcs.row(i).to_vec(),
                    self.groups[i].clone(),
                )
            })
            .collect();
        Some(records)
    }
}

/// Loads a cohort table.
///
/// * `num_pcs`: number of `PC1..PCk` columns to read.
/// * `group_column`: name of the ancestry label column.
/// * `score_columns`: explicit score columns; when empty, every numeric column that
///   is not the id, the group or a `PC<n>` column is read as a score. Text columns
///   such as sub-population labels are skipped.
pub fn load_cohort(
    path: impl AsRef<Path>,
    num_pcs: usize,
    group_column: &str,
    score_columns: &[String],
) -> Result<Cohort, DataError> {
    let path = path.as_ref();
    log::info!("Loading cohort from '{}'", path.display());
    let df = read_tsv(path)?;
    if df.height() == 0 {
        return Err(DataError::Empty);
    }

    let pc_names: Vec<String> = (1..=num_pcs).map(|i| format!("PC{i}")).collect();

    let mut required: Vec<String> = vec![SAMPLE_ID_COLUMN.to_string(), group_column.to_string()];
    required.extend(pc_names.iter().cloned());
    required.extend(score_columns.iter().cloned());
    require_columns(&df, &required)?;

    let score_names: Vec<String> = if score_columns.is_empty() {
        let reserved: HashSet<&str> = required.iter().map(String::as_str).collect();
        let mut selected = Vec::new();
        for name in column_names(&df) {
            if reserved.contains(name.as_str()) || is_pc_column(&name) {
                continue;
            }
            if df.column(&name)?.dtype().is_primitive_numeric() {
                selected.push(name);
            } else {
                log::info!("Skipping non-numeric column '{name}'");
            }
        }
        selected
    } else {
        score_columns.to_vec()
    };
    if score_names.is_empty() {
        return Err(DataError::NoScoreColumns);
    }
    log::info!("Reading {} score column(s): {:?}", score_names.len(), score_names);

    let sample_ids = extract_string_column(&df, SAMPLE_ID_COLUMN)?;
    let mut seen = HashSet::with_capacity(sample_ids.len());
    if let Some(duplicate) = sample_ids.iter().find(|id| !seen.insert(id.as_str())) {
        return Err(DataError::DuplicateSampleId(duplicate.clone()));
    }
    let groups = extract_string_column(&df, group_column)?;
    let n = sample_ids.len();

    let mut pcs = Array2::<f64>::zeros((n, num_pcs));
    for (j, pc_name) in pc_names.iter().enumerate() {
        let values = extract_numeric_column(&df, pc_name)?;
        pcs.column_mut(j).assign(&Array1::from_vec(values));
    }

    let scores = score_names
        .into_iter()
        .map(|name| {
            let values = extract_numeric_column(&df, &name)?;
            Ok((name, Array1::from_vec(values)))
        })
        .collect::<Result<Vec<_>, DataError>>()?;

    log::info!("Loaded {n} samples with {num_pcs} PCs");
    Ok(Cohort {
        sample_ids,
        groups,
        pcs,
        pc_names,
        scores,
    })
}

/// `PC1`, `PC2`, ...: principal-component columns, never scores.
fn is_pc_column(name: &str) -> bool {
    name.strip_prefix("PC")
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    fn create_test_tsv(content: &str) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "{}", content)?;
        file.flush()?;
        Ok(file)
    }

    fn cohort_content(rows: usize) -> String {
        let mut lines = vec!["sample_id\tSuper_Population\tPC1\tPC2\tPGS_A\tPGS_B".to_string()];
        for i in 0..rows {
            lines.push(format!(
                "HG{:05}\t{}\t{:.3}\t{:.3}\t{:.2}\t{:.2}",
                i,
                if i % 2 == 0 { "AFR" } else { "EUR" },
                i as f64 / 10.0,
                -(i as f64) / 20.0,
                i as f64 * 0.5,
                1.0 - i as f64,
            ));
        }
        lines.join("\n")
    }

    #[test]
    fn loads_all_non_reserved_columns_as_scores() {
        let file = create_test_tsv(&cohort_content(8)).unwrap();
        let cohort = load_cohort(file.path(), 2, DEFAULT_GROUP_COLUMN, &[]).unwrap();

        assert_eq!(cohort.len(), 8);
        assert_eq!(cohort.score_names(), vec!["PGS_A", "PGS_B"]);
        assert_eq!(cohort.pcs.shape(), &[8, 2]);
        assert_eq!(cohort.sample_ids[3], "HG00003");
        assert_eq!(cohort.groups[3], "EUR");
        assert_abs_diff_eq!(cohort.pcs[[3, 0]], 0.3, epsilon = 1e-9);
        assert_abs_diff_eq!(cohort.pcs[[3, 1]], -0.15, epsilon = 1e-9);

        let records = cohort.records("PGS_B").unwrap();
        assert_abs_diff_eq!(records[5].score_value, -4.0, epsilon = 1e-9);
        assert_eq!(records[5].principal_components.len(), 2);
        assert!(cohort.records("PGS_C").is_none());
    }

    #[test]
    fn explicit_score_columns_limit_selection() {
        let file = create_test_tsv(&cohort_content(5)).unwrap();
        let cohort =
            load_cohort(file.path(), 1, DEFAULT_GROUP_COLUMN, &["PGS_B".to_string()]).unwrap();
        assert_eq!(cohort.score_names(), vec!["PGS_B"]);
        assert_eq!(cohort.pcs.ncols(), 1);
    }

    #[test]
    fn pc_columns_beyond_num_pcs_are_not_scores() {
        let file = create_test_tsv(&cohort_content(5)).unwrap();
        let cohort = load_cohort(file.path(), 1, DEFAULT_GROUP_COLUMN, &[]).unwrap();
        assert_eq!(cohort.score_names(), vec!["PGS_A", "PGS_B"]);
        assert_eq!(cohort.pc_names, vec!["PC1"]);
    }

    #[test]
    fn text_columns_are_skipped_when_selecting_scores() {
        let content = "sample_id\tPopulation\tSuper_Population\tPC1\tPC2\tPGS\n\
                       HG00096\tGBR\tEUR\t0.1\t0.3\t1.5\n\
                       HG01879\tACB\tAFR\t-0.2\t0.1\t0.7\n\
                       HG00403\tCHS\tEAS\t0.05\t-0.4\t-0.2";
        let file = create_test_tsv(content).unwrap();
        let cohort = load_cohort(file.path(), 2, DEFAULT_GROUP_COLUMN, &[]).unwrap();
        assert_eq!(cohort.score_names(), vec!["PGS"]);
        assert_eq!(cohort.groups, vec!["EUR", "AFR", "EAS"]);
    }

    #[test]
    fn pc_column_names_are_recognized() {
        assert!(is_pc_column("PC1"));
        assert!(is_pc_column("PC20"));
        assert!(!is_pc_column("PC"));
        assert!(!is_pc_column("PCA_score"));
        assert!(!is_pc_column("PGS1"));
    }

    #[test]
    fn duplicate_sample_ids_are_rejected() {
        let content = "sample_id\tSuper_Population\tPC1\tPGS\nA\tAFR\t0.1\t1.0\n\
                       B\tEUR\t0.2\t2.0\nA\tEAS\t0.3\t3.0";
        let file = create_test_tsv(content).unwrap();
        let err = load_cohort(file.path(), 1, DEFAULT_GROUP_COLUMN, &[]).unwrap_err();
        assert!(matches!(err, DataError::DuplicateSampleId(id) if id == "A"));
    }

    #[test]
    fn missing_pc_column_is_reported() {
        let file = create_test_tsv(&cohort_content(5)).unwrap();
        let err = load_cohort(file.path(), 3, DEFAULT_GROUP_COLUMN, &[]).unwrap_err();
        match err {
            DataError::ColumnNotFound(col) => assert_eq!(col, "PC3"),
            other => panic!("Expected ColumnNotFound(PC3), got {:?}", other),
        }
    }

    #[test]
    fn missing_group_column_is_reported() {
        let file = create_test_tsv(&cohort_content(5)).unwrap();
        let err = load_cohort(file.path(), 2, "Population", &[]).unwrap_err();
        assert!(matches!(err, DataError::ColumnNotFound(col) if col == "Population"));
    }

    #[test]
    fn missing_score_value_is_rejected() {
        let content = "sample_id\tSuper_Population\tPC1\tPGS\nA\tAFR\t0.1\t1.0\nB\tEUR\t0.2\tNA";
        let file = create_test_tsv(content).unwrap();
        let err = load_cohort(file.path(), 1, DEFAULT_GROUP_COLUMN, &[]).unwrap_err();
        assert!(matches!(err, DataError::MissingValuesFound(col) if col == "PGS"));
    }

    #[test]
    fn non_numeric_score_is_wrong_type() {
        let content = "sample_id\tSuper_Population\tPC1\tPGS\nA\tAFR\t0.1\t1.0\nB\tEUR\t0.2\thigh";
        let file = create_test_tsv(content).unwrap();
        let err = load_cohort(file.path(), 1, DEFAULT_GROUP_COLUMN, &["PGS".to_string()])
            .unwrap_err();
        match err {
            DataError::ColumnWrongType { column_name, .. } => assert_eq!(column_name, "PGS"),
            other => panic!("Expected ColumnWrongType(PGS), got {:?}", other),
        }
    }

    #[test]
    fn non_finite_pc_is_rejected() {
        let content = "sample_id\tSuper_Population\tPC1\tPGS\nA\tAFR\tNaN\t1.0\nB\tEUR\t0.2\t2.0";
        let file = create_test_tsv(content).unwrap();
        let err = load_cohort(file.path(), 1, DEFAULT_GROUP_COLUMN, &[]).unwrap_err();
        assert!(matches!(err, DataError::NonFiniteValuesFound(col) if col == "PC1"));
    }

    #[test]
    fn table_without_scores_is_rejected() {
        let content = "sample_id\tSuper_Population\tPC1\nA\tAFR\t0.1\nB\tEUR\t0.2";
        let file = create_test_tsv(content).unwrap();
        let err = load_cohort(file.path(), 1, DEFAULT_GROUP_COLUMN, &[]).unwrap_err();
        assert!(matches!(err, DataError::NoScoreColumns));
    }
}
