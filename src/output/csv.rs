//! CSV report formatting
//!
//! Writes the aggregated per-position phred averages as a CSV file: a
//! header row, then one row per base position with the score formatted to
//! exactly two decimal places.

use anyhow::Context;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::Result;

/// Write the report to `path`
///
/// One data row per aggregated position, in position order.
pub fn write_report(path: &Path, averages: &BTreeMap<usize, f64>) -> Result<()> {
    let mut file = File::create(path)
        .with_context(|| format!("Failed to create report file: {}", path.display()))?;

    writeln!(file, "base position,phred score")?;
    for (position, score) in averages {
        writeln!(file, "{},{:.2}", position, score)?;
    }

    println!("The file '{}' is created.", path.display());
    Ok(())
}
