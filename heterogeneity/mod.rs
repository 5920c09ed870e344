#![deny(dead_code)]
#![deny(unused_imports)]

pub mod data;
pub mod estimate;
pub mod table;
