//! phredq CLI entry point

use anyhow::{Context, Result};
use phredq::config::{Cli, Settings};
use phredq::coordinator::{self, ServerOptions};
use phredq::worker::{self, WorkerPool};

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli.validate()?;

    // Worker children skip the banner; their narration interleaves with the
    // pool's output as it is.
    if !cli.worker {
        println!("phredq v{}", env!("CARGO_PKG_VERSION"));
        println!("Distributed FastQ phred quality profiler");
        println!();
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;

    if cli.server {
        run_server(cli, runtime)
    } else if cli.worker {
        run_worker(cli, runtime)
    } else {
        run_client(cli, runtime)
    }
}

/// Run in server mode: serve the queues, distribute, report
fn run_server(cli: Cli, runtime: tokio::runtime::Runtime) -> Result<()> {
    println!("Started server side");

    let opts = ServerOptions {
        bind_addr: cli.address(),
        credential: cli.secret.clone(),
        // validate() guarantees the file argument in server mode
        fastq_file: cli.fastq_file.clone().context("Missing FastQ file")?,
        chunk_count: cli.chunks,
        output_file: cli.output_file.clone(),
        settings: Settings::from_cli(&cli),
    };

    runtime.block_on(coordinator::run_server(opts))
}

/// Run in client mode: spawn the worker pool and wait for it
fn run_client(cli: Cli, runtime: tokio::runtime::Runtime) -> Result<()> {
    println!("Started client side");

    let settings = Settings::from_cli(&cli);
    let pool = runtime.block_on(WorkerPool::connect(
        &cli.host,
        cli.port,
        &cli.secret,
        settings.poll_backoff,
    ))?;

    // Process spawning and joining are ordinary blocking operations
    pool.run(cli.worker_count())
}

/// Run as a spawned worker child process
fn run_worker(cli: Cli, runtime: tokio::runtime::Runtime) -> Result<()> {
    let settings = Settings::from_cli(&cli);
    runtime.block_on(worker::run_process(
        &cli.address(),
        &cli.secret,
        settings.poll_backoff,
    ))
}
