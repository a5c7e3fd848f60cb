//! phredq - Distributed FastQ phred quality profiler
//!
//! phredq computes the average phred quality score per base position of a
//! FastQ file by farming independent chunks of the input out to a pool of
//! remote worker processes.
//!
//! # Architecture
//!
//! - **Remote queue service**: a TCP-served job/result queue pair, gated by
//!   a shared secret, usable concurrently from any number of processes
//! - **Coordinator**: splits the input, submits one job per chunk, collects
//!   partial metrics, signals termination with a poison pill
//! - **Worker pool**: spawns N worker processes on a client machine, each
//!   running a fetch-execute-retire loop against the remote queues
//! - **Report**: aggregated per-position averages written as CSV

pub mod config;
pub mod coordinator;
pub mod fastq;
pub mod output;
pub mod queue;
pub mod worker;

// Re-export commonly used types
pub use config::Cli;

/// Result type used throughout phredq
pub type Result<T> = anyhow::Result<T>;
