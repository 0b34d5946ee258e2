//! # Job Queue CLI
//!
//! Command-line interface for the job queue runtime.
//!
//! This module provides CLI commands for:
//! - Configuration validation and display
//! - Enqueueing job ids
//! - Running a worker that fetches and settles jobs
//! - Queue monitoring
//! - An in-process demonstration over the in-memory transport

use clap::{Parser, Subcommand};
use job_queue_runtime::{
    CancellationToken, ConfigurationError, JobId, JobQueueOptions, JobQueueProvider,
    PersistentJobQueue, ProviderType, QueueError,
};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// Job queue CLI - background job ids over a peek-lock message queue
#[derive(Parser)]
#[command(name = "job-queue")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Persistent background job queue over a peek-lock message transport")]
pub struct Cli {
    /// Configuration file path (.yaml, .toml or .json)
    #[arg(short, long, env = "JOBQ_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Logging level
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Validate configuration
    Config {
        /// Show resolved configuration
        #[arg(short, long)]
        show: bool,

        /// Output format for configuration
        #[arg(short = 'f', long, default_value = "yaml")]
        format: ConfigFormat,
    },

    /// Announce one or more job ids on a queue
    Enqueue {
        /// Logical queue name
        #[arg(short, long, default_value = "default")]
        queue: String,

        /// Job ids to enqueue
        #[arg(required = true)]
        job_ids: Vec<String>,
    },

    /// Fetch jobs and remove them from their queue until interrupted
    Work {
        /// Queues to fetch from, in rotation order (defaults to all configured)
        #[arg(short, long, value_delimiter = ',')]
        queues: Vec<String>,

        /// Stop after this many jobs
        #[arg(short, long)]
        max_jobs: Option<usize>,

        /// What to do with each fetched job
        #[arg(short, long, default_value = "complete")]
        action: WorkAction,
    },

    /// Show queue counts and waiting job ids
    Monitor {
        /// Restrict to one queue
        #[arg(short, long)]
        queue: Option<String>,

        /// Number of waiting job ids to list per queue
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Run enqueue and fetch against the in-memory transport
    Demo {
        /// Number of jobs to push through the queues
        #[arg(short, long, default_value = "5")]
        jobs: usize,
    },
}

/// Settlement applied by the worker
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum WorkAction {
    /// Remove the job from its queue
    Complete,
    /// Release the job for another worker
    Requeue,
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
    /// YAML output
    Yaml,
}

/// Configuration format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    /// YAML format
    Yaml,
    /// JSON format
    Json,
    /// TOML format
    Toml,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output formatting failed: {message}")]
    Output { message: String },
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Queue(QueueError::ConfigurationError(_)) => 1,
            Self::Queue(_) => 2,
            Self::CommandFailed { .. } => 3,
            Self::InvalidArgument { .. } => 4,
            Self::Io(_) => 5,
            Self::Output { .. } => 6,
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();
    initialize_logging(&cli.log_level, cli.json_logs);

    let mut stdout = std::io::stdout();
    run(cli, &mut stdout).await
}

/// Execute a parsed command line, writing command output to `out`
pub async fn run(cli: Cli, out: &mut dyn Write) -> Result<(), CliError> {
    let options = load_configuration(cli.config.as_ref())?;

    match cli.command {
        Commands::Config { show, format } => execute_config_command(&options, show, format, out),
        Commands::Enqueue { queue, job_ids } => {
            execute_enqueue_command(options, &queue, &job_ids, out).await
        }
        Commands::Work {
            queues,
            max_jobs,
            action,
        } => {
            let provider = JobQueueProvider::from_options(options)?;
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            execute_work_command(&provider, queues, max_jobs, action, &cancel, out).await
        }
        Commands::Monitor {
            queue,
            limit,
            format,
        } => execute_monitor_command(options, queue, limit, format, out).await,
        Commands::Demo { jobs } => execute_demo_command(options, jobs, out).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Initialize logging based on CLI arguments.
///
/// `RUST_LOG` takes precedence over `level`. Logs go to stderr so that command
/// output on stdout stays machine readable.
pub fn initialize_logging(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("job_queue_cli={level},job_queue_runtime={level}", level = level).into()
    });

    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });

    if tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .try_init()
        .is_err()
    {
        debug!("Logging already initialized");
    }
}

/// Load configuration from file or defaults
pub fn load_configuration(config_path: Option<&PathBuf>) -> Result<JobQueueOptions, CliError> {
    if let Some(path) = config_path {
        if !path.exists() {
            return Err(ConfigurationError::Missing {
                key: format!("configuration file {}", path.display()),
            }
            .into());
        }
        info!(path = %path.display(), "Loading configuration from file");
    }

    Ok(JobQueueOptions::load(config_path.map(|p| p.as_path()))?)
}

/// Validate configuration and optionally print it with secrets redacted
pub fn execute_config_command(
    options: &JobQueueOptions,
    show: bool,
    format: ConfigFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    options.validate()?;
    writeln!(out, "Configuration is valid")?;

    if show {
        let redacted = redacted(options);
        let rendered = match format {
            ConfigFormat::Yaml => serde_yaml::to_string(&redacted).map_err(output_error)?,
            ConfigFormat::Json => serde_json::to_string_pretty(&redacted).map_err(output_error)?,
            ConfigFormat::Toml => toml::to_string_pretty(&redacted).map_err(output_error)?,
        };
        writeln!(out, "{}", rendered.trim_end())?;
    }

    Ok(())
}

/// Enqueue each job id on `queue`
pub async fn execute_enqueue_command(
    options: JobQueueOptions,
    queue: &str,
    job_ids: &[String],
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let provider = JobQueueProvider::from_options(options)?;
    let job_queue = provider.job_queue();

    for raw in job_ids {
        let job_id = JobId::new(raw.as_str()).map_err(|e| CliError::InvalidArgument {
            arg: "job_ids".to_string(),
            message: e.to_string(),
        })?;
        let message_id = job_queue.enqueue(queue, &job_id).await?;
        writeln!(out, "Enqueued job {} on {} ({})", job_id, queue, message_id)?;
    }

    Ok(())
}

/// Fetch jobs until `cancel` fires or `max_jobs` have been settled
pub async fn execute_work_command(
    provider: &JobQueueProvider,
    queues: Vec<String>,
    max_jobs: Option<usize>,
    action: WorkAction,
    cancel: &CancellationToken,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let queues = if queues.is_empty() {
        provider.queues().to_vec()
    } else {
        queues
    };
    let job_queue = provider.job_queue();
    let mut processed = 0usize;

    info!(queues = ?queues, max_jobs = ?max_jobs, "Worker started");

    while max_jobs.map_or(true, |max| processed < max) {
        let job = match job_queue.dequeue(&queues, cancel).await {
            Ok(job) => job,
            Err(QueueError::Cancelled) => break,
            Err(e) => return Err(e.into()),
        };

        match action {
            WorkAction::Complete => job.remove_from_queue().await?,
            WorkAction::Requeue => job.requeue().await?,
        }
        writeln!(
            out,
            "{} job {} from {} (delivery {})",
            match action {
                WorkAction::Complete => "Completed",
                WorkAction::Requeue => "Requeued",
            },
            job.job_id(),
            job.queue(),
            job.delivery_count()
        )?;
        processed += 1;
    }

    info!(processed = processed, "Worker stopped");
    Ok(())
}

/// Per-queue monitoring snapshot
#[derive(Debug, Serialize)]
pub struct QueueReport {
    pub queue: String,
    pub enqueued_count: u64,
    pub fetched_count: Option<u64>,
    pub enqueued_job_ids: Vec<String>,
}

/// Print counts and the first page of waiting job ids
pub async fn execute_monitor_command(
    options: JobQueueOptions,
    queue: Option<String>,
    limit: usize,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let provider = JobQueueProvider::from_options(options)?;
    let monitoring = provider.monitoring();

    let queues = match queue {
        Some(queue) => vec![queue],
        None => monitoring.queues(),
    };

    let mut reports = Vec::with_capacity(queues.len());
    for queue in queues {
        let counts = monitoring.enqueued_and_fetched_count(&queue).await?;
        let job_ids = monitoring.enqueued_job_ids(&queue, 0, limit).await?;
        reports.push(QueueReport {
            queue,
            enqueued_count: counts.enqueued_count,
            fetched_count: counts.fetched_count,
            enqueued_job_ids: job_ids.iter().map(|id| id.to_string()).collect(),
        });
    }

    match format {
        OutputFormat::Text => {
            for report in &reports {
                let fetched = report
                    .fetched_count
                    .map_or_else(|| "unknown".to_string(), |count| count.to_string());
                writeln!(
                    out,
                    "{}: enqueued={} fetched={}",
                    report.queue, report.enqueued_count, fetched
                )?;
                if !report.enqueued_job_ids.is_empty() {
                    writeln!(out, "  waiting: {}", report.enqueued_job_ids.join(", "))?;
                }
            }
        }
        OutputFormat::Json => {
            let rendered = serde_json::to_string_pretty(&reports).map_err(output_error)?;
            writeln!(out, "{}", rendered)?;
        }
        OutputFormat::Yaml => {
            let rendered = serde_yaml::to_string(&reports).map_err(output_error)?;
            writeln!(out, "{}", rendered.trim_end())?;
        }
    }

    Ok(())
}

/// Push `jobs` job ids through the configured queues in-process
pub async fn execute_demo_command(
    options: JobQueueOptions,
    jobs: usize,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    if jobs == 0 {
        return Err(CliError::InvalidArgument {
            arg: "jobs".to_string(),
            message: "must be at least 1".to_string(),
        });
    }

    let options = JobQueueOptions {
        provider: ProviderType::InMemory,
        loop_receive_timeout_ms: options.loop_receive_timeout_ms.min(500),
        ..options
    };
    let provider = JobQueueProvider::from_options(options)?;
    let job_queue = provider.job_queue();
    let queues = provider.queues().to_vec();

    for n in 1..=jobs {
        let queue = &queues[(n - 1) % queues.len()];
        let job_id = JobId::new(n.to_string()).map_err(QueueError::from)?;
        job_queue.enqueue(queue, &job_id).await?;
    }
    writeln!(out, "Enqueued {} jobs across {}", jobs, queues.join(", "))?;

    let cancel = CancellationToken::new();
    execute_work_command(
        &provider,
        queues,
        Some(jobs),
        WorkAction::Complete,
        &cancel,
        out,
    )
    .await?;

    for queue in provider.queues() {
        let counts = provider
            .monitoring()
            .enqueued_and_fetched_count(queue)
            .await?;
        if counts.enqueued_count != 0 {
            warn!(queue = %queue, remaining = counts.enqueued_count, "Demo left messages behind");
            return Err(CliError::CommandFailed {
                message: format!("{} messages left on {}", counts.enqueued_count, queue),
            });
        }
    }
    writeln!(out, "All queues drained")?;

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received; stopping");
            cancel.cancel();
        }
    });
}

/// Copy of `options` with the shared access key masked
pub fn redacted(options: &JobQueueOptions) -> JobQueueOptions {
    let connection_string = options
        .connection_string
        .split(';')
        .map(|segment| match segment.split_once('=') {
            Some(("SharedAccessKey", _)) => "SharedAccessKey=***".to_string(),
            _ => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";");

    JobQueueOptions {
        connection_string,
        ..options.clone()
    }
}

fn output_error(error: impl std::fmt::Display) -> CliError {
    CliError::Output {
        message: error.to_string(),
    }
}
