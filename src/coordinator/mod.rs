//! Coordinator
//!
//! The coordinator owns the queue service for one complete distributed run:
//! it submits one job per chunk, polls the result queue until every
//! expected result has arrived, signals termination with the poison pill,
//! and hands the collected metrics to aggregation and reporting.
//!
//! Collection is an unbounded wait by design: there is no cross-process
//! error channel besides the result queue, so a worker that crashed holding
//! a job is indistinguishable from one that is merely slow, and the
//! coordinator waits forever for the missing result.

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::config::Settings;
use crate::fastq::{self, Chunk, PositionMetric};
use crate::output;
use crate::queue::{Job, JobOutcome, JobResult, Payload, QueueClient, QueueProxy, QueueService};
use crate::worker::READ_FILE;

/// Orchestrates one distributed run over its own queue service
pub struct Coordinator {
    service: QueueService,
    jobs: QueueProxy,
    results: QueueProxy,
    settings: Settings,
}

impl Coordinator {
    /// Start the queue service and attach the coordinator's own proxies
    ///
    /// Fails if the address is already in use.
    pub async fn start(addr: &str, credential: &str, settings: Settings) -> Result<Self> {
        let service = QueueService::start(addr, credential)
            .await
            .context("Failed to start coordinator queue service")?;

        let client = QueueClient::connect(&service.local_addr().to_string(), credential)
            .await
            .context("Coordinator failed to attach to its own queue service")?;
        let jobs = client.job_queue().await?;
        let results = client.result_queue().await?;

        println!("Server started at port {}", service.local_addr().port());

        Ok(Self {
            service,
            jobs,
            results,
            settings,
        })
    }

    /// Address the queue service is bound to
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.service.local_addr()
    }

    /// Enqueue one job per chunk, in input order
    ///
    /// Returns the number of jobs submitted.
    pub async fn submit(&self, chunks: &[Chunk]) -> Result<usize> {
        for chunk in chunks {
            let job = Job {
                id: chunk.index as u64,
                function: READ_FILE.to_string(),
                chunk: chunk.clone(),
            };
            self.jobs.enqueue(Payload::Job(job)).await?;
        }
        println!("Submitted {} jobs", chunks.len());

        Ok(chunks.len())
    }

    /// Poll the result queue until `expected` results have arrived
    ///
    /// Each empty attempt waits the configured backoff before retrying.
    /// There is no overall timeout: a result that never arrives blocks
    /// collection forever.
    pub async fn collect(&self, expected: usize) -> Result<Vec<JobResult>> {
        let mut collected = Vec::with_capacity(expected);

        while collected.len() < expected {
            match self.results.dequeue_timeout(self.settings.poll_backoff).await? {
                Some(Payload::Result(result)) => {
                    println!(
                        "Collected result for chunk {} ({}/{})",
                        result.job.chunk.index,
                        collected.len() + 1,
                        expected
                    );
                    collected.push(result);
                }
                Some(other) => {
                    eprintln!("Ignoring unexpected payload on result queue: {:?}", other);
                }
                None => continue,
            }
        }

        println!("All chunks have been processed and added to the results");
        Ok(collected)
    }

    /// Signal termination and tear the queue service down
    ///
    /// Enqueues the poison pill exactly once, then waits the grace period
    /// so in-flight workers can observe the pill and retire before the
    /// service disappears. The grace period is a heuristic, not a barrier.
    pub async fn terminate(self) -> Result<()> {
        println!("There will be no more data forthcoming...");
        self.jobs.enqueue(Payload::PoisonPill).await?;

        tokio::time::sleep(self.settings.grace_period).await;

        self.service.shutdown().await;
        println!("Server is finished");
        Ok(())
    }

    /// Tear the service down without signaling termination
    ///
    /// Used when nothing was submitted and no worker ever needs the pill.
    pub async fn shutdown(self) {
        self.service.shutdown().await;
    }
}

/// Aggregate collected results and write the CSV report
///
/// Results carrying the error marker contribute no metric; they are
/// narrated and skipped.
pub fn finalize(results: &[JobResult], output_file: &std::path::Path) -> Result<()> {
    let mut metrics: Vec<PositionMetric> = Vec::with_capacity(results.len());
    for result in results {
        match &result.outcome {
            JobOutcome::Metric(metric) => metrics.push(metric.clone()),
            JobOutcome::Unresolved => {
                eprintln!(
                    "Chunk {} failed on its worker and is missing from the report",
                    result.job.chunk.index
                );
            }
        }
    }

    let averages = fastq::calc_avg(&metrics);
    output::write_report(output_file, &averages)?;

    Ok(())
}

/// Server mode parameters
pub struct ServerOptions {
    pub bind_addr: String,
    pub credential: String,
    pub fastq_file: PathBuf,
    pub chunk_count: usize,
    pub output_file: PathBuf,
    pub settings: Settings,
}

/// Run one complete server-mode session
///
/// Split the input, serve the queues, submit, collect, terminate, report.
pub async fn run_server(opts: ServerOptions) -> Result<()> {
    let chunks = fastq::split_file(&opts.fastq_file, opts.chunk_count)
        .context("Failed to split FastQ file")?;

    let coordinator = Coordinator::start(&opts.bind_addr, &opts.credential, opts.settings).await?;

    if chunks.is_empty() {
        println!("Nothing to do here!");
        coordinator.shutdown().await;
        return Ok(());
    }

    let submitted = coordinator.submit(&chunks).await?;
    let results = coordinator.collect(submitted).await?;
    coordinator.terminate().await?;

    finalize(&results, &opts.output_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::{tempdir, NamedTempFile};

    fn test_settings() -> Settings {
        Settings {
            poll_backoff: Duration::from_millis(50),
            grace_period: Duration::from_millis(200),
        }
    }

    fn write_fastq(records: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for i in 0..records {
            writeln!(file, "@read{}\nACGT\n+\nIIII", i).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_submit_enqueues_jobs_in_input_order() {
        let coordinator = Coordinator::start("127.0.0.1:0", "sekrit", test_settings())
            .await
            .unwrap();
        let addr = coordinator.local_addr().to_string();

        let chunks: Vec<Chunk> = (0..3)
            .map(|i| Chunk {
                index: i,
                path: "input.fastq".into(),
                start: i as u64 * 10,
                end: (i as u64 + 1) * 10,
            })
            .collect();

        let submitted = coordinator.submit(&chunks).await.unwrap();
        assert_eq!(submitted, 3);

        let client = QueueClient::connect(&addr, "sekrit").await.unwrap();
        let jobs = client.job_queue().await.unwrap();
        for expected in 0..3u64 {
            match jobs.try_dequeue().await.unwrap() {
                Some(Payload::Job(job)) => {
                    assert_eq!(job.id, expected);
                    assert_eq!(job.function, READ_FILE);
                }
                other => panic!("Expected job {}, got {:?}", expected, other),
            }
        }

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_collect_waits_for_expected_count() {
        let coordinator = Coordinator::start("127.0.0.1:0", "sekrit", test_settings())
            .await
            .unwrap();
        let addr = coordinator.local_addr().to_string();

        // Feed two results in from a separate client while collect polls
        let feeder = tokio::spawn(async move {
            let client = QueueClient::connect(&addr, "sekrit").await.unwrap();
            let results = client.result_queue().await.unwrap();
            for id in 0..2u64 {
                tokio::time::sleep(Duration::from_millis(30)).await;
                results
                    .enqueue(Payload::Result(JobResult {
                        job: Job {
                            id,
                            function: READ_FILE.to_string(),
                            chunk: Chunk {
                                index: id as usize,
                                path: "input.fastq".into(),
                                start: 0,
                                end: 1,
                            },
                        },
                        outcome: JobOutcome::Unresolved,
                    }))
                    .await
                    .unwrap();
            }
        });

        let collected = coordinator.collect(2).await.unwrap();
        assert_eq!(collected.len(), 2);

        feeder.await.unwrap();
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_terminate_enqueues_pill_once_then_shuts_down() {
        let coordinator = Coordinator::start("127.0.0.1:0", "sekrit", test_settings())
            .await
            .unwrap();
        let addr = coordinator.local_addr().to_string();

        let client = QueueClient::connect(&addr, "sekrit").await.unwrap();
        let jobs = client.job_queue().await.unwrap();

        let observer = tokio::spawn(async move {
            // The pill arrives during the grace period, before shutdown
            let item = jobs.dequeue_timeout(Duration::from_millis(150)).await.unwrap();
            assert_eq!(item, Some(Payload::PoisonPill));
            // Nothing follows it
            assert_eq!(jobs.try_dequeue().await.unwrap(), None);
        });

        coordinator.terminate().await.unwrap();
        observer.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_server_with_empty_input_completes_immediately() {
        let empty = NamedTempFile::new().unwrap();
        let dir = tempdir().unwrap();
        let output_file = dir.path().join("outfile.csv");

        run_server(ServerOptions {
            bind_addr: "127.0.0.1:0".to_string(),
            credential: "sekrit".to_string(),
            fastq_file: empty.path().to_path_buf(),
            chunk_count: 4,
            output_file: output_file.clone(),
            settings: test_settings(),
        })
        .await
        .unwrap();

        // No report is written for an empty run
        assert!(!output_file.exists());
    }

    /// End-to-end: 4 chunks, 2 workers; both retire, 4 results collected,
    /// one report row per base position.
    #[tokio::test]
    async fn test_end_to_end_four_chunks_two_workers() {
        let input = write_fastq(40);
        let dir = tempdir().unwrap();
        let output_file = dir.path().join("report.csv");

        let settings = test_settings();
        let chunks = fastq::split_file(input.path(), 4).unwrap();
        assert_eq!(chunks.len(), 4);

        let coordinator = Coordinator::start("127.0.0.1:0", "sekrit", settings)
            .await
            .unwrap();
        let addr = coordinator.local_addr().to_string();

        // Two workers, as separate clients of the same service
        let mut workers = Vec::new();
        for i in 0..2 {
            let addr = addr.clone();
            workers.push(tokio::spawn(async move {
                let client = QueueClient::connect(&addr, "sekrit").await.unwrap();
                let jobs = client.job_queue().await.unwrap();
                let results = client.result_queue().await.unwrap();
                crate::worker::run_loop(
                    &jobs,
                    &results,
                    Duration::from_millis(50),
                    &format!("worker-{}", i),
                )
                .await
            }));
        }

        let submitted = coordinator.submit(&chunks).await.unwrap();
        assert_eq!(submitted, 4);

        let results = coordinator.collect(submitted).await.unwrap();
        assert_eq!(results.len(), 4);
        assert!(results
            .iter()
            .all(|r| matches!(r.outcome, JobOutcome::Metric(_))));

        coordinator.terminate().await.unwrap();

        // Both workers observed the pill and retired cleanly
        for worker in workers {
            worker.await.unwrap().unwrap();
        }

        finalize(&results, &output_file).unwrap();

        let report = std::fs::read_to_string(&output_file).unwrap();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[0], "base position,phred score");
        // All reads are 4 bases of 'I' (phred 40)
        assert_eq!(lines.len(), 5);
        for (i, line) in lines[1..].iter().enumerate() {
            assert_eq!(*line, format!("{},40.00", i + 1));
        }
    }
}
