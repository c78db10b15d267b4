//! vbatch - verification batch scheduler CLI
//!
//! The `vbatch` command runs a catalog of verification jobs under a bounded
//! worker pool and reports how much of the system is verified.
//!
//! ## Commands
//!
//! - `run`: execute the configured jobs, persist the report, raise alerts
//! - `alerts`: configure, test or check alert delivery
//! - `monitor`: poll one or more reports and print a merged status
//!
//! ## Exit codes (`run`)
//!
//! `0` all passed, `1` partial success, `2` all failed, `3` setup or
//! configuration error, `4` interrupted.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use vbatch_core::alert::{default_rules, EmailConfig, WebhookConfig};
use vbatch_core::config::DEFAULT_OUTPUT_DIR;
use vbatch_core::pipeline::{EXIT_ALL_PASSED, EXIT_INTERRUPTED, EXIT_PARTIAL, EXIT_SETUP_ERROR};
use vbatch_core::report_store::LATEST_KEY;
use vbatch_core::{
    AlertConfig, AlertEngine, AlertOutcome, BatchConfig, BatchOutcome, BatchPipeline, JobCatalog,
    JobResult, MergedStatus, MetricValue, ReportLocation, ReportWriter, Scheduler,
    SchedulerConfig, StatusPoller, ToolExecutor,
};
use vbatch_state::{FileStateStore, StateStore};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "vbatch.json";

/// Metrics `monitor` always shows, even before any source reports them.
const MONITORED_METRICS: &[&str] = &[
    "success_rate",
    "total_jobs",
    "success_count",
    "failed_count",
    "timeout_count",
    "missing_count",
    "partial_count",
    "obligations_total",
    "obligations_verified",
];

#[derive(Parser)]
#[command(name = "vbatch")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Verification batch scheduler", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured verification jobs
    Run(RunArgs),

    /// Manage alert delivery
    Alerts {
        #[command(flatten)]
        location: Location,

        #[command(subcommand)]
        action: AlertAction,
    },

    /// Poll report files and print a merged status until interrupted
    Monitor {
        #[command(flatten)]
        location: Location,

        /// Seconds between polls
        #[arg(short, long, default_value = "30")]
        interval: u64,

        /// Report to poll, as NAME=PATH (repeatable; default: this output dir)
        #[arg(short, long = "source")]
        sources: Vec<ReportLocation>,

        /// Ignore readings older than this many seconds
        #[arg(long)]
        max_age: Option<u64>,

        /// Poll once and exit
        #[arg(long)]
        once: bool,
    },
}

/// Where configuration and state live.
#[derive(Args, Debug, Clone, Default)]
struct Location {
    /// Batch config file (default: ./vbatch.json when present)
    #[arg(short, long, env = "VBATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for logs, reports and alert state
    #[arg(short, long, env = "VBATCH_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    /// Job ids or names to run (default: every job in the catalog)
    jobs: Vec<String>,

    #[command(flatten)]
    location: Location,

    /// Maximum concurrently running jobs
    #[arg(short = 'j', long, env = "VBATCH_MAX_PARALLEL")]
    max_parallel: Option<usize>,

    /// Timeout ceiling in seconds for any single job
    #[arg(short, long, env = "VBATCH_TIMEOUT")]
    timeout: Option<u64>,

    /// Stop dispatching and cancel running jobs on the first failure
    #[arg(long)]
    fail_fast: bool,

    /// Print the plan without running anything
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum AlertAction {
    /// Create or update the alert configuration
    Configure {
        /// Email recipient
        #[arg(long)]
        email: Option<String>,

        /// SMTP relay host
        #[arg(long)]
        smtp_host: Option<String>,

        /// SMTP relay port
        #[arg(long)]
        smtp_port: Option<u16>,

        /// Chat webhook URL
        #[arg(long)]
        webhook: Option<String>,

        /// Chat channel name
        #[arg(long)]
        channel: Option<String>,

        /// Success-rate threshold in percent; resets the rules to the defaults
        #[arg(long)]
        threshold: Option<u64>,

        /// Cooldown between repeats of one alert type, in seconds
        #[arg(long)]
        cooldown: Option<u64>,

        /// Send a test alert after saving
        #[arg(long)]
        test: bool,
    },

    /// Send one test message to every configured channel
    Test,

    /// Evaluate the alert rules against the latest report
    Check,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    vbatch_core::init_tracing(cli.json, level);

    let result = match cli.command {
        Commands::Run(args) => cmd_run(args).await,
        Commands::Alerts { location, action } => match action {
            AlertAction::Configure {
                email,
                smtp_host,
                smtp_port,
                webhook,
                channel,
                threshold,
                cooldown,
                test,
            } => {
                let update = AlertUpdate {
                    email,
                    smtp_host,
                    smtp_port,
                    webhook,
                    channel,
                    threshold,
                    cooldown,
                };
                cmd_alerts_configure(&location, update, test).await
            }
            AlertAction::Test => cmd_alerts_test(&location).await,
            AlertAction::Check => cmd_alerts_check(&location).await,
        },
        Commands::Monitor {
            location,
            interval,
            sources,
            max_age,
            once,
        } => cmd_monitor(&location, interval, sources, max_age, once).await,
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_SETUP_ERROR
        }
    };
    std::process::exit(code);
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Flags > env > file > defaults. Env is folded into the flags by clap.
fn load_config(location: &Location) -> Result<BatchConfig> {
    let mut config = match &location.config {
        Some(path) => BatchConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            BatchConfig::load(Path::new(DEFAULT_CONFIG_FILE))
                .with_context(|| format!("Failed to load config {DEFAULT_CONFIG_FILE}"))?
        }
        None => BatchConfig::default(),
    };
    if let Some(dir) = &location.output_dir {
        config.output_dir = absolute_from_cwd(dir)?;
    }
    Ok(config)
}

/// Flag and env paths are relative to the invoking shell, not the config file.
fn absolute_from_cwd(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(path))
}

fn resolve_run_config(args: &RunArgs) -> Result<BatchConfig> {
    let mut config = load_config(&args.location)?;
    if let Some(max_parallel) = args.max_parallel {
        config.max_parallel = max_parallel;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_ceiling_secs = timeout;
    }
    if args.fail_fast {
        config.fail_fast = true;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn open_store(config: &BatchConfig) -> Result<Arc<dyn StateStore>> {
    let dir = config.state_dir();
    let store = FileStateStore::new(&dir)
        .with_context(|| format!("Failed to open state directory {}", dir.display()))?;
    Ok(Arc::new(store))
}

/// Cancelled on the first Ctrl-C. A second Ctrl-C exits immediately.
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(()).is_err() {
                break;
            }
        }
    });
    let trigger = token.clone();
    tokio::spawn(async move {
        if escalate_interrupts(rx, trigger).await {
            eprintln!("second interrupt, exiting without waiting for jobs");
            std::process::exit(EXIT_INTERRUPTED);
        }
    });
    token
}

/// Returns true once a second interrupt arrives after cancellation.
async fn escalate_interrupts(
    mut signals: mpsc::UnboundedReceiver<()>,
    token: CancellationToken,
) -> bool {
    if signals.recv().await.is_none() {
        return false;
    }
    warn!("interrupt received, stopping (press Ctrl-C again to force exit)");
    token.cancel();
    signals.recv().await.is_some()
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(args: RunArgs) -> Result<i32> {
    let config = resolve_run_config(&args)?;
    let catalog = JobCatalog::from_config(&config)
        .context("Failed to build job catalog")?
        .select(&args.jobs);
    if catalog.is_empty() {
        if args.jobs.is_empty() {
            bail!("No jobs configured; add `jobs` or `discover` entries to the config");
        }
        bail!("No jobs match {}", args.jobs.join(", "));
    }

    let executor = Arc::new(ToolExecutor::new(config.executor_config()));
    let scheduler_config = config.scheduler_config(executor.registry());

    if args.dry_run {
        print_plan(&catalog, &executor, &scheduler_config)?;
        return Ok(EXIT_ALL_PASSED);
    }

    let store = open_store(&config)?;
    let mut pipeline = BatchPipeline::new(Scheduler::new(executor, scheduler_config)?)
        .with_writer(ReportWriter::new(store.clone()));
    match AlertConfig::load(store.as_ref())
        .await
        .context("Failed to read alert configuration")?
    {
        Some(alerts) => {
            let engine = AlertEngine::from_config(store.clone(), &alerts)
                .context("Failed to set up alert channels")?;
            pipeline = pipeline.with_alerts(engine);
        }
        None => info!("no alert configuration, alerts disabled"),
    }

    println!(
        "Running {} job(s), max {} in parallel",
        catalog.len(),
        config.max_parallel
    );
    let outcome = pipeline
        .run_with(catalog.into_jobs(), shutdown_on_ctrl_c(), print_job_line)
        .await;
    print_summary(&outcome);

    Ok(outcome.exit_code())
}

fn print_plan(
    catalog: &JobCatalog,
    executor: &ToolExecutor,
    scheduler: &SchedulerConfig,
) -> Result<()> {
    println!(
        "Dry run: {} job(s), max {} in parallel{}",
        catalog.len(),
        scheduler.max_parallel,
        if scheduler.fail_fast { ", fail-fast" } else { "" }
    );
    for job in catalog.jobs() {
        let command = executor
            .command_for(job)
            .with_context(|| format!("No command for job {}", job.id))?;
        let timeout = scheduler.timeouts.resolve(job);
        println!(
            "  {:<32} {:<12} {:>6}s  {} {}",
            job.id,
            job.kind,
            timeout.as_secs(),
            command.program,
            command.args.join(" ")
        );
    }
    Ok(())
}

fn print_job_line(result: &JobResult) {
    let obligations = if result.obligations_total > 0 {
        format!(
            " ({}/{} obligations)",
            result.obligations_proved, result.obligations_total
        )
    } else {
        String::new()
    };
    let note = if result.cancelled { " [cancelled]" } else { "" };
    println!(
        "  {:<8} {} {:.1}s{}{}",
        result.status, result.job_id, result.duration_seconds, obligations, note
    );
}

fn print_summary(outcome: &BatchOutcome) {
    let report = &outcome.report;
    println!();
    println!("Run {} finished in {}ms", outcome.run_id, outcome.duration_ms);
    println!(
        "  {} job(s): {} passed, {} partial, {} failed, {} timed out, {} missing",
        report.total_jobs,
        report.success_count,
        report.partial_count,
        report.failed_count,
        report.timeout_count,
        report.missing_count
    );
    println!("  Success rate: {}%", report.success_rate);
    if report.obligations_total > 0 {
        println!(
            "  Obligations: {}/{} verified",
            report.obligations_verified, report.obligations_total
        );
    }
    if let Some(version) = &outcome.version {
        println!("  Report: {version}");
    }
    for alert in outcome.alerts.iter().filter(|a| a.is_dispatched()) {
        println!("  Alert sent: {}", alert.alert_type());
    }
    if outcome.summary.interrupted {
        println!("  Interrupted: results above are incomplete");
    } else if let Some(job) = &outcome.summary.fail_fast_trigger {
        println!("  Stopped early: {job} failed with --fail-fast");
    }
}

// ---------------------------------------------------------------------------
// alerts
// ---------------------------------------------------------------------------

/// Fields `alerts configure` may change; `None` leaves the saved value.
#[derive(Debug, Default)]
struct AlertUpdate {
    email: Option<String>,
    smtp_host: Option<String>,
    smtp_port: Option<u16>,
    webhook: Option<String>,
    channel: Option<String>,
    threshold: Option<u64>,
    cooldown: Option<u64>,
}

fn apply_alert_update(mut config: AlertConfig, update: AlertUpdate) -> Result<AlertConfig> {
    if let Some(address) = update.email {
        config.email = Some(EmailConfig {
            address,
            ..config.email.take().unwrap_or_else(|| EmailConfig::new(""))
        });
    }
    if update.smtp_host.is_some() || update.smtp_port.is_some() {
        let Some(email) = config.email.as_mut() else {
            bail!("--smtp-host/--smtp-port need an email recipient (--email)");
        };
        if let Some(host) = update.smtp_host {
            email.smtp_host = host;
        }
        if let Some(port) = update.smtp_port {
            email.smtp_port = port;
        }
    }

    if let Some(url) = update.webhook {
        config.webhook = Some(WebhookConfig {
            webhook_url: url,
            ..config.webhook.take().unwrap_or_else(|| WebhookConfig::new(""))
        });
    }
    if let Some(channel) = update.channel {
        let Some(webhook) = config.webhook.as_mut() else {
            bail!("--channel needs a webhook URL (--webhook)");
        };
        webhook.channel = channel;
    }

    if let Some(threshold) = update.threshold {
        if threshold > 100 {
            bail!("--threshold is a percentage, got {threshold}");
        }
        config.threshold = threshold;
        config.rules = default_rules(threshold);
    }
    if let Some(cooldown) = update.cooldown {
        config.cooldown_seconds = cooldown;
    }
    Ok(config)
}

async fn load_alert_engine(store: Arc<dyn StateStore>) -> Result<AlertEngine> {
    let Some(config) = AlertConfig::load(store.as_ref())
        .await
        .context("Failed to read alert configuration")?
    else {
        bail!("Alerts are not configured; run `vbatch alerts configure` first");
    };
    AlertEngine::from_config(store, &config).context("Failed to set up alert channels")
}

async fn cmd_alerts_configure(location: &Location, update: AlertUpdate, test: bool) -> Result<i32> {
    let store = open_store(&load_config(location)?)?;
    let current = AlertConfig::load(store.as_ref())
        .await
        .context("Failed to read alert configuration")?
        .unwrap_or_default();
    let config = apply_alert_update(current, update)?;
    // Fail before saving if a channel cannot be built.
    config.channels().context("Invalid channel configuration")?;
    config
        .save(store.as_ref())
        .await
        .context("Failed to save alert configuration")?;

    println!("Alert configuration saved");
    if let Some(email) = &config.email {
        println!(
            "  Email:     {} via {}:{}",
            email.address, email.smtp_host, email.smtp_port
        );
    }
    if let Some(webhook) = &config.webhook {
        println!("  Webhook:   {} ({})", webhook.webhook_url, webhook.channel);
    }
    println!("  Threshold: {}%", config.threshold);
    println!("  Cooldown:  {}s", config.cooldown_seconds);

    if test {
        return send_test(AlertEngine::from_config(store, &config)?).await;
    }
    Ok(EXIT_ALL_PASSED)
}

async fn cmd_alerts_test(location: &Location) -> Result<i32> {
    let store = open_store(&load_config(location)?)?;
    send_test(load_alert_engine(store).await?).await
}

async fn send_test(engine: AlertEngine) -> Result<i32> {
    if engine.channel_count() == 0 {
        bail!("No alert channels configured; pass --email or --webhook to `vbatch alerts configure`");
    }
    let delivery = engine.send_test().await;
    println!(
        "Test alert: {} delivered, {} failed",
        delivery.delivered, delivery.failed
    );
    Ok(if delivery.failed == 0 {
        EXIT_ALL_PASSED
    } else {
        EXIT_PARTIAL
    })
}

async fn cmd_alerts_check(location: &Location) -> Result<i32> {
    let store = open_store(&load_config(location)?)?;
    let Some(report) = ReportWriter::new(store.clone())
        .latest()
        .await
        .context("Failed to read latest report")?
    else {
        bail!("No report found; run `vbatch run` first");
    };
    let engine = load_alert_engine(store).await?;
    let outcomes = engine
        .evaluate(&report)
        .await
        .context("Failed to evaluate alert rules")?;

    for outcome in &outcomes {
        match outcome {
            AlertOutcome::NotTriggered { alert_type } => println!("  {alert_type}: ok"),
            AlertOutcome::Suppressed {
                alert_type,
                remaining_secs,
            } => println!("  {alert_type}: cooling down ({remaining_secs}s left)"),
            AlertOutcome::Dispatched {
                alert_type,
                delivered,
                failed,
            } => println!("  {alert_type}: sent ({delivered} delivered, {failed} failed)"),
        }
    }
    Ok(EXIT_ALL_PASSED)
}

// ---------------------------------------------------------------------------
// monitor
// ---------------------------------------------------------------------------

fn default_sources(config: &BatchConfig) -> Vec<ReportLocation> {
    vec![ReportLocation::new(
        "local",
        config.state_dir().join(format!("{LATEST_KEY}.json")),
    )]
}

async fn cmd_monitor(
    location: &Location,
    interval: u64,
    sources: Vec<ReportLocation>,
    max_age: Option<u64>,
    once: bool,
) -> Result<i32> {
    let sources = if sources.is_empty() {
        default_sources(&load_config(location)?)
    } else {
        sources
    };
    let mut poller = StatusPoller::new(sources).with_metrics(MONITORED_METRICS);
    if let Some(secs) = max_age {
        poller = poller.with_max_age(Duration::from_secs(secs));
    }

    if once {
        print_status(&poller.poll().await);
        return Ok(EXIT_ALL_PASSED);
    }

    poller
        .run(
            Duration::from_secs(interval.max(1)),
            shutdown_on_ctrl_c(),
            print_status,
        )
        .await;
    Ok(EXIT_ALL_PASSED)
}

fn print_status(status: &MergedStatus) {
    if let Some(at) = status.polled_at {
        println!("Status at {}", at.to_rfc3339());
    }
    for (metric, value) in &status.metrics {
        match value {
            MetricValue::Known {
                value,
                source,
                timestamp,
            } => println!(
                "  {metric:<22} {value:>10}  {source} @ {}",
                timestamp.to_rfc3339()
            ),
            MetricValue::Unknown => println!("  {metric:<22} {:>10}", "unknown"),
        }
    }
}
