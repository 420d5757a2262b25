use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};

use taskcontrol_core::{load_dotenv, ControllerConfig};
use taskcontrol_scheduler::{FnJob, Job, JobController, JobError, JobPriority, JobStatus, PoolJob};

/// Run a synthetic batch through the job controller and report what happened.
#[derive(Parser, Debug)]
#[command(name = "taskcontrol-demo", about = "Drive a synthetic job batch through taskcontrol")]
struct DemoArgs {
    /// Number of child jobs in the batch
    #[arg(long, default_value = "8")]
    jobs: usize,

    /// Worker threads for the main pool (0 = config / available parallelism)
    #[arg(long, default_value = "0")]
    threads: usize,

    /// Make the child with this 1-based index fail
    #[arg(long)]
    fail_at: Option<usize>,

    /// Mark the child with this 1-based index high priority
    #[arg(long)]
    high_at: Option<usize>,

    /// Simulated work per child in milliseconds
    #[arg(long, default_value = "200")]
    delay_ms: u64,

    /// Cancel the batch after this many milliseconds
    #[arg(long)]
    cancel_after_ms: Option<u64>,

    /// Where the batch runs its children
    #[arg(long, value_enum, default_value = "provided")]
    mode: Mode,

    /// TOML config file (defaults to TASKCONTROL_* environment variables)
    #[arg(long, env = "TASKCONTROL_CONFIG")]
    config: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Dedicated pool owned by the batch
    Fixed,
    /// The controller's main pool
    Provided,
    /// One small-stack thread per child
    Lightweight,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = DemoArgs::parse();
    load_dotenv();

    let mut config = match &args.config {
        Some(path) => ControllerConfig::load(path)
            .with_context(|| format!("failed to load config from {path}"))?,
        None => ControllerConfig::from_env(),
    };
    if args.threads > 0 {
        config.worker_threads = args.threads;
    }
    config.validate().context("invalid controller config")?;
    config.log_summary();

    let controller = JobController::new(config.clone()).context("failed to start job controller")?;

    let children: Vec<Arc<dyn Job>> = (1..=args.jobs)
        .map(|index| synthetic_child(index, &args))
        .collect();
    let description = format!("synthetic batch of {}", args.jobs);
    let batch = Arc::new(match args.mode {
        Mode::Fixed => PoolJob::fixed(description, children, config.resolved_worker_threads()),
        Mode::Provided => controller.pool_job(description, children),
        Mode::Lightweight => controller.lightweight_pool_job(description, children),
    });

    // The batch waits on its children from a carrier thread so a provided main pool
    // keeps all of its workers for the children.
    let started = Instant::now();
    thread::scope(|scope| -> Result<()> {
        let carrier = thread::Builder::new()
            .name("taskcontrol-carrier".into())
            .spawn_scoped(scope, || controller.run_on_this_thread_blocking(batch.clone()))
            .context("failed to spawn carrier thread")?;

        let mut cancel_sent = false;
        while !carrier.is_finished() {
            if let Some(after) = args.cancel_after_ms {
                if !cancel_sent && started.elapsed() >= Duration::from_millis(after) {
                    warn!("cancelling batch");
                    batch.cancel();
                    cancel_sent = true;
                }
            }
            info!(
                progress = %format!("{:.0}%", batch.progress().unwrap_or(0.0) * 100.0),
                finished = batch.finished_count(),
                total = batch.total(),
                "batch running"
            );
            thread::sleep(Duration::from_millis(100));
        }
        carrier
            .join()
            .map_err(|_| anyhow::anyhow!("carrier thread panicked"))?
            .context("controller rejected the batch")?;
        Ok(())
    })?;

    let status = batch.status();
    match status {
        JobStatus::Finished => info!(elapsed = ?started.elapsed(), "batch finished"),
        JobStatus::Canceled => warn!(finished = batch.finished_count(), "batch canceled"),
        _ => warn!(error = %batch.error_message().unwrap_or_default(), "batch failed"),
    }

    for child in batch.children() {
        println!("{:<28} {:?}", child.description(), child.status());
    }
    let metrics = serde_json::to_string_pretty(&controller.metrics()).context("failed to encode metrics")?;
    println!("{metrics}");

    controller.shutdown();
    Ok(())
}

fn synthetic_child(index: usize, args: &DemoArgs) -> Arc<dyn Job> {
    let fails = args.fail_at == Some(index);
    let steps = (args.delay_ms / 10).max(1);
    let priority = if args.high_at == Some(index) {
        JobPriority::High
    } else {
        JobPriority::Normal
    };
    Arc::new(
        FnJob::new(format!("child {index}"), move |ctx| {
            ctx.progress().set_total(steps);
            for step in 0..steps {
                if ctx.is_canceled() {
                    return Err(JobError::Canceled);
                }
                if fails && step == steps / 2 {
                    return Err(JobError::failed("synthetic failure"));
                }
                thread::sleep(Duration::from_millis(10));
                ctx.progress().increment();
            }
            Ok(())
        })
        .with_priority(priority),
    )
}
