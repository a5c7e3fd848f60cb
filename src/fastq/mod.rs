//! FastQ chunking and phred quality analysis
//!
//! This module implements the analysis collaborators consumed by the
//! distribution core:
//!
//! - `split_file`: partition a FastQ file into independently parseable
//!   byte-range chunks aligned to record boundaries
//! - `read_file`: compute the per-position phred metric for one chunk
//!   (this is the job function executed remotely by workers)
//! - `calc_avg`: merge per-chunk metrics into the final ordered mapping
//!   from base position to averaged score
//!
//! Quality values are decoded as Sanger/Illumina 1.8+ (ASCII byte - 33).

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::Result;

/// Phred ASCII offset (Sanger / Illumina 1.8+)
const PHRED_OFFSET: u8 = 33;

/// One independently processable slice of the input file
///
/// The byte range `[start, end)` is aligned to FastQ record boundaries, so
/// a chunk can be parsed without looking at any other chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk index in submission order
    pub index: usize,

    /// Path to the FastQ file (must be readable on the worker machine)
    pub path: PathBuf,

    /// First byte of the chunk (start of a record)
    pub start: u64,

    /// One past the last byte of the chunk
    pub end: u64,
}

/// Per-position phred totals for one chunk of the input
///
/// `sums[i]` and `counts[i]` cover base position `i` (0-based here;
/// positions become 1-based in the aggregated report). Metrics from
/// different chunks merge by element-wise addition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionMetric {
    pub sums: Vec<u64>,
    pub counts: Vec<u64>,
}

impl PositionMetric {
    /// Accumulate one quality line into the metric
    pub fn record(&mut self, quality: &[u8]) {
        if quality.len() > self.sums.len() {
            self.sums.resize(quality.len(), 0);
            self.counts.resize(quality.len(), 0);
        }
        for (i, &byte) in quality.iter().enumerate() {
            self.sums[i] += byte.saturating_sub(PHRED_OFFSET) as u64;
            self.counts[i] += 1;
        }
    }

    /// Merge another chunk's metric into this one
    pub fn merge(&mut self, other: &PositionMetric) {
        if other.sums.len() > self.sums.len() {
            self.sums.resize(other.sums.len(), 0);
            self.counts.resize(other.counts.len(), 0);
        }
        for (i, &sum) in other.sums.iter().enumerate() {
            self.sums[i] += sum;
        }
        for (i, &count) in other.counts.iter().enumerate() {
            self.counts[i] += count;
        }
    }

    /// Total number of quality observations across all positions
    pub fn observations(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Split a FastQ file into at most `chunk_count` record-aligned chunks
///
/// The file is divided into equal byte spans and each boundary is advanced
/// to the start of the next record, so every record belongs to exactly one
/// chunk. Small files may produce fewer chunks than requested; an empty
/// file produces no chunks.
pub fn split_file(path: &Path, chunk_count: usize) -> Result<Vec<Chunk>> {
    if chunk_count == 0 {
        anyhow::bail!("chunk count must be at least 1");
    }

    let file = File::open(path)
        .with_context(|| format!("Failed to open FastQ file: {}", path.display()))?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(Vec::new());
    }

    let mut reader = BufReader::new(file);

    // Raw boundaries, then snap each one forward to a record start.
    let mut boundaries = Vec::with_capacity(chunk_count + 1);
    for i in 0..chunk_count {
        let raw = len * i as u64 / chunk_count as u64;
        let aligned = next_record_start(&mut reader, raw, len)?;
        boundaries.push(aligned);
    }
    boundaries.push(len);

    let mut chunks = Vec::new();
    for window in boundaries.windows(2) {
        let (start, end) = (window[0], window[1]);
        // Adjacent boundaries can collapse onto the same record in small files
        if start < end {
            chunks.push(Chunk {
                index: chunks.len(),
                path: path.to_path_buf(),
                start,
                end,
            });
        }
    }

    Ok(chunks)
}

/// Find the offset of the first record starting at or after `offset`
///
/// A record start is a line beginning with `@` whose third successor line
/// begins with `+`. The lookahead disambiguates title lines from quality
/// lines that happen to start with `@`.
fn next_record_start<R: Read + Seek>(reader: &mut BufReader<R>, offset: u64, len: u64) -> Result<u64> {
    if offset == 0 {
        return Ok(0);
    }

    // Start scanning at the first full line at or after the offset. When the
    // previous byte is a newline the offset itself is a line start.
    reader.seek(SeekFrom::Start(offset - 1))?;
    let mut prev = [0u8; 1];
    reader.read_exact(&mut prev)?;
    let mut pos = offset;
    if prev[0] != b'\n' {
        let mut partial = Vec::new();
        pos += reader.read_until(b'\n', &mut partial)? as u64;
    }

    // Read lines with their offsets until a title/plus pair lines up.
    let mut lines: Vec<(u64, u8)> = Vec::new();
    loop {
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            return Ok(len);
        }
        lines.push((pos, *line.first().unwrap_or(&b'\n')));
        pos += n as u64;

        if lines.len() >= 3 {
            let i = lines.len() - 3;
            if lines[i].1 == b'@' && lines[i + 2].1 == b'+' {
                return Ok(lines[i].0);
            }
        }
    }
}

/// Compute the per-position phred metric for one chunk
///
/// This is the job function workers resolve by name and execute remotely.
/// A malformed record is an error: the caller (the worker process) does not
/// recover from it.
pub fn read_file(chunk: &Chunk) -> Result<PositionMetric> {
    let file = File::open(&chunk.path)
        .with_context(|| format!("Failed to open FastQ file: {}", chunk.path.display()))?;
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(chunk.start))?;
    let mut reader = reader.take(chunk.end - chunk.start);

    let mut metric = PositionMetric::default();
    loop {
        let Some(title) = read_line(&mut reader)? else {
            break;
        };
        if !title.starts_with(b"@") {
            anyhow::bail!(
                "Malformed FastQ record in chunk {} at title line (expected '@')",
                chunk.index
            );
        }
        let sequence = read_line(&mut reader)?
            .with_context(|| format!("Truncated FastQ record in chunk {}", chunk.index))?;
        let plus = read_line(&mut reader)?
            .with_context(|| format!("Truncated FastQ record in chunk {}", chunk.index))?;
        if !plus.starts_with(b"+") {
            anyhow::bail!(
                "Malformed FastQ record in chunk {} at separator line (expected '+')",
                chunk.index
            );
        }
        let quality = read_line(&mut reader)?
            .with_context(|| format!("Truncated FastQ record in chunk {}", chunk.index))?;
        if quality.len() != sequence.len() {
            anyhow::bail!(
                "Quality length {} does not match sequence length {} in chunk {}",
                quality.len(),
                sequence.len(),
                chunk.index
            );
        }

        metric.record(&quality);
    }

    Ok(metric)
}

/// Read one line without its terminator; `None` at end of input
fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line)?;
    if n == 0 {
        return Ok(None);
    }
    while line.last() == Some(&b'\n') || line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(Some(line))
}

/// Merge per-chunk metrics and average per base position
///
/// Returns an ordered mapping from 1-based base position to the mean phred
/// score over every read covering that position.
pub fn calc_avg(metrics: &[PositionMetric]) -> BTreeMap<usize, f64> {
    let mut merged = PositionMetric::default();
    for metric in metrics {
        merged.merge(metric);
    }

    let mut averages = BTreeMap::new();
    for (i, (&sum, &count)) in merged.sums.iter().zip(merged.counts.iter()).enumerate() {
        if count > 0 {
            averages.insert(i + 1, sum as f64 / count as f64);
        }
    }
    averages
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Two records, 4 bases each; qualities "IIII" (40) and "!!!!" (0)
    const SMALL_FASTQ: &str = "@read1\nACGT\n+\nIIII\n@read2\nTGCA\n+\n!!!!\n";

    fn write_fastq(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_split_empty_file_yields_no_chunks() {
        let file = write_fastq("");
        let chunks = split_file(file.path(), 4).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_split_aligns_to_record_boundaries() {
        let file = write_fastq(SMALL_FASTQ);
        let chunks = split_file(file.path(), 2).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].start, 0);
        // Second chunk must begin exactly at "@read2"
        assert_eq!(chunks[1].start, SMALL_FASTQ.find("@read2").unwrap() as u64);
        assert_eq!(chunks[1].end, SMALL_FASTQ.len() as u64);
        assert_eq!(chunks[0].end, chunks[1].start);
    }

    #[test]
    fn test_split_small_file_collapses_chunks() {
        let file = write_fastq(SMALL_FASTQ);
        // Far more chunks than records: boundaries collapse, none empty
        let chunks = split_file(file.path(), 16).unwrap();
        assert!(chunks.len() <= 16);
        assert!(chunks.iter().all(|c| c.start < c.end));
        // Indices are dense after collapsing
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }

    #[test]
    fn test_split_covers_whole_file_without_overlap() {
        let file = write_fastq(&SMALL_FASTQ.repeat(10));
        let chunks = split_file(file.path(), 3).unwrap();

        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks.last().unwrap().end, (SMALL_FASTQ.len() * 10) as u64);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn test_read_file_computes_phred_sums() {
        let file = write_fastq(SMALL_FASTQ);
        let chunks = split_file(file.path(), 1).unwrap();
        let metric = read_file(&chunks[0]).unwrap();

        // 'I' = 40, '!' = 0; each position saw both reads
        assert_eq!(metric.sums, vec![40, 40, 40, 40]);
        assert_eq!(metric.counts, vec![2, 2, 2, 2]);
        assert_eq!(metric.observations(), 8);
    }

    #[test]
    fn test_read_file_chunks_partition_the_records() {
        let file = write_fastq(SMALL_FASTQ);
        let chunks = split_file(file.path(), 2).unwrap();

        let mut merged = PositionMetric::default();
        for chunk in &chunks {
            merged.merge(&read_file(chunk).unwrap());
        }

        let whole = read_file(&split_file(file.path(), 1).unwrap()[0]).unwrap();
        assert_eq!(merged, whole);
    }

    #[test]
    fn test_read_file_handles_uneven_read_lengths() {
        let file = write_fastq("@r1\nACGTAC\n+\nIIIIII\n@r2\nAC\n+\nII\n");
        let chunks = split_file(file.path(), 1).unwrap();
        let metric = read_file(&chunks[0]).unwrap();

        assert_eq!(metric.counts, vec![2, 2, 1, 1, 1, 1]);
    }

    #[test]
    fn test_read_file_rejects_malformed_record() {
        let file = write_fastq("not a fastq file\nat all\n");
        let chunk = Chunk {
            index: 0,
            path: file.path().to_path_buf(),
            start: 0,
            end: 24,
        };
        assert!(read_file(&chunk).is_err());
    }

    #[test]
    fn test_calc_avg_merges_and_averages() {
        let a = PositionMetric {
            sums: vec![40, 40],
            counts: vec![1, 1],
        };
        let b = PositionMetric {
            sums: vec![20, 20, 30],
            counts: vec![1, 1, 1],
        };

        let averages = calc_avg(&[a, b]);
        assert_eq!(averages.len(), 3);
        assert_eq!(averages[&1], 30.0);
        assert_eq!(averages[&2], 30.0);
        assert_eq!(averages[&3], 30.0);
        // Positions are 1-based and ordered
        assert_eq!(averages.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_calc_avg_empty_input() {
        assert!(calc_avg(&[]).is_empty());
    }
}
