//! Shared tab-separated table reading and column validation.

use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The required column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the required column '{0}'. This tool requires complete data with no missing values."
    )]
    MissingValuesFound(String),
    #[error(
        "Non-finite values (NaN or Infinity) were found in the required column '{0}'. This tool requires all data to be finite."
    )]
    NonFiniteValuesFound(String),
    #[error("Sample id '{0}' appears more than once in the input file.")]
    DuplicateSampleId(String),
    #[error("The input file contains no score columns to evaluate.")]
    NoScoreColumns,
    #[error("The input file contains no data rows.")]
    Empty,
}

/// Reads a tab-separated file with a header row. `NA` is read as missing.
pub fn read_tsv(path: &Path) -> Result<DataFrame, DataError> {
    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(
                    CsvParseOptions::default()
                        .with_separator(b'\t')
                        .with_null_values(Some(NullValues::AllColumnsSingle("NA".into()))),
                ),
        )
        .finish()?;
    Ok(df)
}

/// Casts a column to `f64`, reporting missing entries as `None`. Entries that are
/// present but not numeric are a type error.
pub fn extract_optional_numeric_column(
    df: &DataFrame,
    column_name: &str,
) -> Result<Vec<Option<f64>>, DataError> {
    let series = df.column(column_name)?;
    let wrong_type = || DataError::ColumnWrongType {
        column_name: column_name.to_string(),
        expected_type: "f64 (numeric)",
        found_type: format!("{:?}", series.dtype()),
    };

    let casted = series.cast(&DataType::Float64).map_err(|_| wrong_type())?;
    if casted.null_count() > series.null_count() {
        return Err(wrong_type());
    }
    Ok(casted.f64()?.into_iter().collect())
}

/// Casts a column to `f64`, requiring every entry to be present and finite.
pub fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
    if df.column(column_name)?.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }
    let values: Vec<f64> = extract_optional_numeric_column(df, column_name)?
        .into_iter()
        .flatten()
        .collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
    }
    Ok(values)
}

/// Reads a column as text, requiring every entry to be present and non-empty.
pub fn extract_string_column(
    df: &DataFrame,
    column_name: &str,
) -> Result<Vec<String>, DataError> {
    let series = df.column(column_name)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }
    let casted = series
        .cast(&DataType::String)
        .map_err(|_| DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "text",
            found_type: format!("{:?}", series.dtype()),
        })?;
    casted
        .str()?
        .into_iter()
        .map(|value| match value {
            Some(text) if !text.is_empty() => Ok(text.to_string()),
            _ => Err(DataError::MissingValuesFound(column_name.to_string())),
        })
        .collect()
}

/// Column names of `df`, in file order.
pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect()
}

/// Fails with `ColumnNotFound` for the first name in `required` that `df` lacks.
pub fn require_columns(df: &DataFrame, required: &[String]) -> Result<(), DataError> {
    let present: HashSet<String> = column_names(df).into_iter().collect();
    match required.iter().find(|name| !present.contains(*name)) {
        Some(missing) => Err(DataError::ColumnNotFound(missing.clone())),
        None => Ok(()),
    }
}
