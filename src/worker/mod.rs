//! Worker pool and worker loop
//!
//! The worker pool runs on a client machine: it validates connectivity and
//! credential against the remote queue service, spawns N independent worker
//! OS processes by re-invoking the current executable with a hidden worker
//! flag, and blocks until every one of them has exited. There is no
//! supervision: a crashed worker is not restarted.
//!
//! Each worker process runs the fetch-execute-retire loop:
//!
//! ```text
//! Fetching --(job)--> Executing --(result pushed)--> Fetching
//! Fetching --(empty)--> Fetching (after a bounded wait)
//! Fetching --(poison pill)--> Retiring --> exit
//! ```
//!
//! A retiring worker re-enqueues the poison pill so the next worker that
//! fetches also observes it.

use anyhow::{Context, Result};
use std::process::Command;
use std::time::Duration;

use crate::fastq::{Chunk, PositionMetric};
use crate::queue::{JobOutcome, JobResult, Payload, QueueClient, QueueProxy};

/// Job function signature: one chunk in, one partial metric out
pub type JobFn = fn(&Chunk) -> Result<PositionMetric>;

/// Registry name of the per-chunk phred metric function
pub const READ_FILE: &str = "read_file";

/// Resolve a job's function name to executable code
///
/// Jobs carry function names, not code; this is the only place names map
/// to functions. An unknown name is the recognized (non-fatal) failure:
/// the worker reports it with the error marker and keeps going.
pub fn resolve(name: &str) -> Option<JobFn> {
    match name {
        READ_FILE => Some(crate::fastq::read_file),
        _ => None,
    }
}

/// Local fleet of worker processes against a remote coordinator
pub struct WorkerPool {
    host: String,
    port: u16,
    credential: String,
    poll_backoff: Duration,
}

impl WorkerPool {
    /// Attach to the running queue service
    ///
    /// Fails immediately if the service is unreachable or the credential
    /// mismatches, before any worker process is spawned.
    pub async fn connect(
        host: &str,
        port: u16,
        credential: &str,
        poll_backoff: Duration,
    ) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        QueueClient::connect(&addr, credential)
            .await
            .context("Worker pool failed to reach the queue service")?;
        println!("Client connected to {}", addr);

        Ok(Self {
            host: host.to_string(),
            port,
            credential: credential.to_string(),
            poll_backoff,
        })
    }

    /// Spawn `count` worker processes and wait for all of them to exit
    ///
    /// Workers are independent re-invocations of the current executable;
    /// each runs the worker loop against the same remote queues. A worker
    /// that exits abnormally is reported but not restarted.
    pub fn run(&self, count: usize) -> Result<()> {
        let exe = std::env::current_exe().context("Failed to get current executable path")?;

        let mut children = Vec::with_capacity(count);
        for _ in 0..count {
            let child = Command::new(&exe)
                .arg("-c")
                .arg("--worker")
                .arg("--host")
                .arg(&self.host)
                .arg("--port")
                .arg(self.port.to_string())
                .arg("--secret")
                .arg(&self.credential)
                .arg("--poll-backoff-ms")
                .arg(self.poll_backoff.as_millis().to_string())
                .spawn()
                .context("Failed to spawn worker process")?;
            children.push(child);
        }
        println!("Started {} workers!", children.len());

        for mut child in children {
            let pid = child.id();
            let status = child.wait().context("Failed to join worker process")?;
            if !status.success() {
                eprintln!("Worker (PID {}) exited abnormally: {}", pid, status);
            }
        }
        println!("All workers have exited");

        Ok(())
    }
}

/// Entry point of one spawned worker process
pub async fn run_process(addr: &str, credential: &str, poll_backoff: Duration) -> Result<()> {
    let client = QueueClient::connect(addr, credential).await?;
    let jobs = client.job_queue().await?;
    let results = client.result_queue().await?;

    let label = format!("worker-{}", std::process::id());
    run_loop(&jobs, &results, poll_backoff, &label).await
}

/// The fetch-execute-retire loop
///
/// Returns `Ok` when the worker retires after observing the poison pill.
/// Any execution failure other than an unresolvable function name
/// propagates out and terminates the worker process; the job it was
/// holding is lost and never redelivered.
pub async fn run_loop(
    jobs: &QueueProxy,
    results: &QueueProxy,
    poll_backoff: Duration,
    label: &str,
) -> Result<()> {
    loop {
        let Some(payload) = jobs.dequeue_timeout(poll_backoff).await? else {
            continue;
        };

        match payload {
            Payload::PoisonPill => {
                // Put the pill back so every other worker also observes it
                jobs.enqueue(Payload::PoisonPill).await?;
                println!("{} observed the poison pill, retiring", label);
                return Ok(());
            }
            Payload::Job(job) => match resolve(&job.function) {
                Some(function) => {
                    println!("{} working on chunk {}", label, job.chunk.index);
                    let metric = function(&job.chunk)?;
                    results
                        .enqueue(Payload::Result(JobResult {
                            job,
                            outcome: JobOutcome::Metric(metric),
                        }))
                        .await?;
                }
                None => {
                    eprintln!("{} cannot resolve job function '{}'", label, job.function);
                    results
                        .enqueue(Payload::Result(JobResult {
                            job,
                            outcome: JobOutcome::Unresolved,
                        }))
                        .await?;
                }
            },
            other => {
                eprintln!("{} ignoring unexpected payload on job queue: {:?}", label, other);
            }
        }
    }
}
