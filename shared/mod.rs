pub mod output;
pub mod tsv;
