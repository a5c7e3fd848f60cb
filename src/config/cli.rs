//! CLI argument parsing using clap

use clap::{ArgGroup, Parser};
use std::path::PathBuf;

/// phredq - Distributed FastQ phred quality profiler
#[derive(Parser, Debug)]
#[command(name = "phredq")]
#[command(version, about, long_about = None)]
#[command(group(ArgGroup::new("mode").required(true).args(["server", "client"])))]
pub struct Cli {
    /// Run in server mode; splits the FastQ file, serves the job queue and
    /// writes the CSV report
    #[arg(short = 's')]
    pub server: bool,

    /// Run in client mode; starts a pool of worker processes against a
    /// running server
    #[arg(short = 'c')]
    pub client: bool,

    /// The hostname the server binds (server mode) or connects to (client mode)
    #[arg(long)]
    pub host: String,

    /// The port the server listens on
    #[arg(long)]
    pub port: u16,

    /// Shared secret gating queue access; both sides must agree
    #[arg(long, env = "PHREDQ_SECRET")]
    pub secret: String,

    // === Server mode ===
    /// File name for the CSV report
    #[arg(short = 'o', long = "outputFile", default_value = "outfile.csv")]
    pub output_file: PathBuf,

    /// Number of chunks used to divide the workload
    #[arg(long, default_value = "4")]
    pub chunks: usize,

    /// A FastQ file
    #[arg(value_name = "FastQFile")]
    pub fastq_file: Option<PathBuf>,

    // === Client mode ===
    /// Number of worker processes to start (default: available CPU cores)
    #[arg(short = 'n')]
    pub workers: Option<usize>,

    // === Tuning ===
    /// Bounded wait per empty dequeue attempt, in milliseconds
    #[arg(long, default_value = "1000")]
    pub poll_backoff_ms: u64,

    /// Grace period between poison pill and service shutdown, in milliseconds
    #[arg(long, default_value = "5000")]
    pub grace_period_ms: u64,

    /// Internal: this process is a spawned worker child
    #[arg(long, hide = true)]
    pub worker: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server {
            if self.fastq_file.is_none() {
                anyhow::bail!("server mode requires a FastQ file argument");
            }
            if self.chunks == 0 {
                anyhow::bail!("chunks must be at least 1");
            }
        }

        if self.client {
            if let Some(workers) = self.workers {
                if workers == 0 {
                    anyhow::bail!("worker count must be at least 1");
                }
            }
        }

        if self.worker && !self.client {
            anyhow::bail!("--worker is only valid in client mode");
        }

        if self.poll_backoff_ms == 0 {
            anyhow::bail!("poll backoff must be at least 1ms");
        }

        Ok(())
    }

    /// Worker process count for client mode
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get)
    }

    /// host:port string for binding or connecting
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("phredq").chain(args.iter().copied()))
    }

    #[test]
    fn test_server_mode_parses() {
        let cli = parse(&[
            "-s", "--host", "0.0.0.0", "--port", "5381", "--secret", "x",
            "--chunks", "8", "sample.fastq",
        ])
        .unwrap();

        assert!(cli.server);
        assert!(!cli.client);
        assert_eq!(cli.chunks, 8);
        assert_eq!(cli.fastq_file, Some(PathBuf::from("sample.fastq")));
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_output_file_defaults_to_outfile_csv() {
        let cli = parse(&["-s", "--host", "h", "--port", "1", "--secret", "x", "f.fastq"]).unwrap();
        assert_eq!(cli.output_file, PathBuf::from("outfile.csv"));
    }

    #[test]
    fn test_client_mode_parses() {
        let cli = parse(&[
            "-c", "-n", "2", "--host", "example.org", "--port", "5381", "--secret", "x",
        ])
        .unwrap();

        assert!(cli.client);
        assert_eq!(cli.worker_count(), 2);
        assert_eq!(cli.address(), "example.org:5381");
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_modes_are_mutually_exclusive() {
        assert!(parse(&["-s", "-c", "--host", "h", "--port", "1", "--secret", "x"]).is_err());
        assert!(parse(&["--host", "h", "--port", "1", "--secret", "x"]).is_err());
    }

    #[test]
    fn test_server_mode_requires_fastq_file() {
        let cli = parse(&["-s", "--host", "h", "--port", "1", "--secret", "x"]).unwrap();
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_worker_flag_requires_client_mode() {
        let cli = parse(&["-s", "--host", "h", "--port", "1", "--secret", "x", "--worker", "f.fastq"]).unwrap();
        assert!(cli.validate().is_err());
    }
}
