//! Report output

pub mod csv;

pub use csv::write_report;
