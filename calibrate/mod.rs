#![deny(dead_code)]
#![deny(unused_imports)]

pub mod data;
pub mod estimate;
pub mod faer_ndarray;
pub mod model;
pub mod regression;
pub mod summary;
pub mod types;
