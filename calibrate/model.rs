use crate::calibrate::regression::LinearFit;
use crate::calibrate::types::{CalibratedScore, ScoreRecord};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

// --- Public Data Structures ---
// These structs define the human-readable format of a fitted calibration
// when serialized to a TOML file.

/// A fitted two-stage ancestry calibration. Applying it is a fast, non-iterative
/// evaluation of two linear predictors per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationModel {
    /// Number of principal components the model was fit on.
    pub num_pcs: usize,
    /// Number of records used for fitting.
    pub fitted_records: usize,
    /// `score ~ 1 + PCs`.
    pub mean_model: LinearFit,
    /// `(residual - mean residual)^2 ~ 1 + PCs`.
    pub variance_model: LinearFit,
}

/// A saved calibration for one named score column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedCalibration {
    pub score: String,
    pub model: CalibrationModel,
}

/// The on-disk artifact: the canonical PC order plus one calibration per score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationArtifact {
    /// Canonical principal-component order, enforced when the artifact is applied.
    pub pc_names: Vec<String>,
    pub scores: Vec<NamedCalibration>,
}

/// Custom error type for model loading, saving, and application.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error(
        "Record '{sample_id}' has {found} principal components, but the model was fit on {expected}."
    )]
    MismatchedPcCount {
        sample_id: String,
        found: usize,
        expected: usize,
    },
    #[error(
        "The model for score '{score}' is inconsistent: the file declares {declared} PCs, the fit has {fitted}, and aliased PCs must have zero coefficients."
    )]
    InconsistentArtifact {
        score: String,
        declared: usize,
        fitted: usize,
    },
}

impl CalibrationModel {
    /// Applies the frozen fits to `records`, one output per input, in order.
    ///
    /// Records whose predicted variance is not strictly positive get an undefined
    /// `variance_calibrated` rather than an error.
    pub fn apply(&self, records: &[ScoreRecord]) -> Result<Vec<CalibratedScore>, ModelError> {
        log::debug!(
            "Applying calibration fit on {} records to {} records",
            self.fitted_records,
            records.len()
        );
        if !self.mean_model.aliased.is_empty() {
            log::info!(
                "PC column(s) {:?} were constant when the model was fit and have no effect",
                self.mean_model.aliased
            );
        }
        let mut non_positive = 0usize;
        let calibrated = records
            .iter()
            .map(|record| {
                let pcs = record.pcs();
                if pcs.len() != self.num_pcs {
                    return Err(ModelError::MismatchedPcCount {
                        sample_id: record.sample_id.clone(),
                        found: pcs.len(),
                        expected: self.num_pcs,
                    });
                }
                let predicted_mean = self.mean_model.predict_one(pcs);
                let predicted_variance = self.variance_model.predict_one(pcs);
                let mean_calibrated = record.score_value - predicted_mean;
                let positive = predicted_variance > 0.0 && predicted_variance.is_finite();
                let variance_calibrated =
                    positive.then(|| mean_calibrated / predicted_variance.sqrt());
                if variance_calibrated.is_none() {
                    non_positive += 1;
                }
                Ok(CalibratedScore {
                    sample_id: record.sample_id.clone(),
                    predicted_mean,
                    predicted_variance,
                    mean_calibrated,
                    variance_calibrated,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if non_positive > 0 {
            log::warn!(
                "{} of {} records have a non-positive predicted variance; their variance-calibrated score is undefined",
                non_positive,
                records.len()
            );
        }
        Ok(calibrated)
    }
}

impl CalibrationArtifact {
    pub fn get(&self, score: &str) -> Option<&CalibrationModel> {
        self.scores
            .iter()
            .find(|named| named.score == score)
            .map(|named| &named.model)
    }

    fn validate(&self) -> Result<(), ModelError> {
        let declared = self.pc_names.len();
        for named in &self.scores {
            let fitted = named.model.num_pcs;
            let fits = [&named.model.mean_model, &named.model.variance_model];
            if fitted != declared
                || fits
                    .iter()
                    .any(|fit| fit.num_predictors() != declared || !fit.aliasing_is_consistent())
            {
                return Err(ModelError::InconsistentArtifact {
                    score: named.score.clone(),
                    declared,
                    fitted,
                });
            }
        }
        Ok(())
    }

    /// Saves the artifact to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads an artifact from a TOML file, checking that every model agrees with
    /// the declared PC order.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let artifact: Self = toml::from_str(&toml_string)?;
        artifact.validate()?;
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tempfile::NamedTempFile;

    fn toy_model() -> CalibrationModel {
        CalibrationModel {
            num_pcs: 2,
            fitted_records: 10,
            mean_model: LinearFit {
                intercept: 1.0,
                coefficients: vec![2.0, 0.0],
                aliased: vec![],
            },
            variance_model: LinearFit {
                intercept: 0.5,
                coefficients: vec![1.0, -1.0],
                aliased: vec![],
            },
        }
    }

    #[test]
    fn apply_uses_both_linear_predictors() {
        let model = toy_model();
        let records = vec![ScoreRecord::new("a", 4.0, vec![0.5, 0.25], "AFR")];
        let out = model.apply(&records).unwrap();
        // mean = 1 + 2 * 0.5 = 2; variance = 0.5 + 0.5 - 0.25 = 0.75
        assert_abs_diff_eq!(out[0].predicted_mean, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out[0].mean_calibrated, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out[0].predicted_variance, 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(
            out[0].variance_calibrated.unwrap(),
            2.0 / 0.75_f64.sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn non_positive_variance_is_marked_undefined() {
        let model = toy_model();
        let records = vec![
            ScoreRecord::new("zero", 1.0, vec![0.0, 0.5], "EAS"),
            ScoreRecord::new("negative", 1.0, vec![0.0, 2.0], "EAS"),
        ];
        let out = model.apply(&records).unwrap();
        assert_abs_diff_eq!(out[0].predicted_variance, 0.0, epsilon = 1e-15);
        assert_eq!(out[0].variance_calibrated, None);
        assert!(out[1].predicted_variance < 0.0);
        assert_eq!(out[1].variance_calibrated, None);
    }

    #[test]
    fn apply_rejects_wrong_pc_count() {
        let model = toy_model();
        let records = vec![ScoreRecord::new("x", 1.0, vec![0.1], "SAS")];
        match model.apply(&records) {
            Err(ModelError::MismatchedPcCount {
                sample_id,
                found,
                expected,
            }) => {
                assert_eq!(sample_id, "x");
                assert_eq!(found, 1);
                assert_eq!(expected, 2);
            }
            other => panic!("expected MismatchedPcCount, got {other:?}"),
        }
    }

    #[test]
    fn artifact_survives_toml_round_trip() {
        let artifact = CalibrationArtifact {
            pc_names: vec!["PC1".to_string(), "PC2".to_string()],
            scores: vec![NamedCalibration {
                score: "PGS000018".to_string(),
                model: toy_model(),
            }],
        };
        let file = NamedTempFile::new().unwrap();
        artifact.save(file.path()).unwrap();
        let loaded = CalibrationArtifact::load(file.path()).unwrap();
        assert_eq!(loaded, artifact);
        assert!(loaded.get("PGS000018").is_some());
        assert!(loaded.get("missing").is_none());
    }

    #[test]
    fn aliased_pc_with_a_coefficient_is_rejected_on_load() {
        let mut model = toy_model();
        model.mean_model.aliased = vec![0];
        let artifact = CalibrationArtifact {
            pc_names: vec!["PC1".to_string(), "PC2".to_string()],
            scores: vec![NamedCalibration {
                score: "s".to_string(),
                model,
            }],
        };
        let file = NamedTempFile::new().unwrap();
        artifact.save(file.path()).unwrap();
        assert!(matches!(
            CalibrationArtifact::load(file.path()),
            Err(ModelError::InconsistentArtifact { .. })
        ));
    }

    #[test]
    fn inconsistent_artifact_is_rejected_on_load() {
        let artifact = CalibrationArtifact {
            pc_names: vec!["PC1".to_string()],
            scores: vec![NamedCalibration {
                score: "s".to_string(),
                model: toy_model(),
            }],
        };
        let file = NamedTempFile::new().unwrap();
        artifact.save(file.path()).unwrap();
        assert!(matches!(
            CalibrationArtifact::load(file.path()),
            Err(ModelError::InconsistentArtifact { .. })
        ));
    }
}
