#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

//! Evaluation of polygenic scores across genetic ancestry groups.
//!
//! * [`heterogeneity`]: Cochran's Q and I^2 of per-group score effects.
//! * [`calibrate`]: removal of PC-predicted mean and variance from raw scores.
//! * [`shared`]: table loading and result writing used by the command-line tool.

#[path = "../calibrate/mod.rs"]
pub mod calibrate;

#[path = "../heterogeneity/mod.rs"]
pub mod heterogeneity;

#[path = "../shared/mod.rs"]
pub mod shared;

pub use calibrate::estimate::{CalibrationError, calibrate};
pub use calibrate::types::{CalibratedScore, ScoreRecord};
pub use heterogeneity::estimate::{
    GroupEstimate, HeterogeneityResult, cochran_q_p_value, estimate_heterogeneity,
    standard_error_from_p,
};
