use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mini_port_scan::ports::{self, PortPolicy};
use mini_port_scan::probe::{PolicyGuard, TcpConnectProbe};
use mini_port_scan::scanner::{ScanOptions, Scanner};
use mini_port_scan::server;
use mini_port_scan::types::{PortStatus, ScanConfig, ScanReport};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// mini-port-scan — batched TCP connect scanner for a single host, with live progress
/// and Ctrl+C stop.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "mini-port-scan",
    version,
    about = "Batched TCP connect scanner for a single host, with live progress and Ctrl+C stop.",
    long_about = None
)]
struct Cli {
    /// Target IP address literal (e.g. 192.168.1.10).
    #[arg(required_unless_present = "serve_ui", conflicts_with = "serve_ui")]
    target: Option<String>,

    /// Inclusive port range `start-end`, or a single port.
    #[arg(long, default_value = "1-1024")]
    ports: String,

    /// Per-port connect timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 1000)]
    timeout_ms: u64,

    /// Ports probed concurrently per batch.
    #[arg(long = "batch-size", default_value_t = 5)]
    batch_size: usize,

    /// Pause between batches in milliseconds.
    #[arg(long = "batch-pause-ms", default_value_t = 50)]
    batch_pause_ms: u64,

    /// Ports file (one port or range per line) replacing the built-in unsafe-port list.
    #[arg(long = "blocked-ports")]
    blocked_ports: Option<PathBuf>,

    /// Probe every port, including ones on the unsafe list.
    #[arg(long = "no-policy", default_value_t = false, conflicts_with = "blocked_ports")]
    no_policy: bool,

    /// Write the final report as pretty JSON to this path.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Serve the JSON control API on this address instead of scanning (e.g. 127.0.0.1:8080).
    #[arg(long = "serve-ui")]
    serve_ui: Option<String>,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let policy = if cli.no_policy {
        PortPolicy::permissive()
    } else if let Some(path) = cli.blocked_ports.as_deref() {
        PortPolicy::from_path(path)?
    } else {
        PortPolicy::default()
    };
    info!(blocked = policy.len(), "port policy loaded");

    let options = ScanOptions {
        batch_size: cli.batch_size,
        batch_pause: Duration::from_millis(cli.batch_pause_ms),
    };
    let scanner = Arc::new(Scanner::new(
        PolicyGuard::new(policy, TcpConnectProbe),
        options,
    ));

    if let Some(bind) = cli.serve_ui.as_deref() {
        println!("Control API at http://{}/api (Ctrl+C to stop)", bind);
        tokio::select! {
            res = server::spawn_server(bind, scanner.clone()) => res?,
            _ = tokio::signal::ctrl_c() => scanner.stop(),
        }
        return Ok(());
    }

    let target = cli.target.clone().context("target address is required")?;
    let (start, end) = ports::parse_port_range(&cli.ports)
        .with_context(|| format!("invalid --ports value: {}", cli.ports))?;
    let config = ScanConfig::new(target, start, end, cli.timeout_ms);

    println!(
        "Scanning {} ports {}-{} (batch {}, timeout {} ms)",
        config.target_address, start, end, cli.batch_size, cli.timeout_ms
    );

    let report = run_scan(&scanner, config).await?;
    print_results_table(&report);

    if let Some(path) = cli.output.as_deref() {
        if let Err(e) = write_report_json(path, &report) {
            eprintln!("Failed to write JSON to {}: {}", path.display(), e);
        } else {
            println!("Wrote JSON report to {}", path.display());
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run_scan(scanner: &Scanner, config: ScanConfig) -> Result<ScanReport> {
    let mut handle = scanner.start(config)?;

    // Ctrl-C requests a stop; the current batch still drains.
    let cancel = handle.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("stop requested, finishing current batch");
            cancel.cancel();
        }
    });

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("=> "),
    );
    while let Some(update) = handle.updates.recv().await {
        bar.set_position(update.progress_percent.floor() as u64);
        bar.set_message(format!("port {}", update.cursor_port));
        for r in update.new_results.iter().filter(|r| r.status == PortStatus::Open) {
            bar.println(format!(":{} OPEN", r.port));
        }
        if update.state.is_terminal() {
            break;
        }
    }
    bar.finish_and_clear();

    handle
        .wait()
        .await
        .context("scan task ended without a report")
}

fn print_results_table(report: &ScanReport) {
    let port_w = 5usize;
    let status_w = 7usize;

    println!(
        "\nState: {}  OPEN: {}  CLOSED: {}  BLOCKED: {}  (progress {:.0}%)",
        report.state,
        report.summary.open,
        report.summary.closed,
        report.summary.blocked,
        report.progress_percent
    );
    println!(
        "{:>port_w$}  {:<status_w$}  {}",
        "port",
        "status",
        "observed_at",
        port_w = port_w,
        status_w = status_w
    );
    println!(
        "{:-<port_w$}  {:-<status_w$}  {:-<20}",
        "",
        "",
        "",
        port_w = port_w,
        status_w = status_w
    );
    // Closed ports are only counted; listing thousands of them buries the signal.
    for r in report
        .results
        .iter()
        .filter(|r| r.status != PortStatus::Closed)
    {
        println!(
            "{:>port_w$}  {:<status_w$}  {}",
            r.port,
            r.status.to_string(),
            r.observed_at,
            port_w = port_w,
            status_w = status_w
        );
    }
}

fn write_report_json(path: &std::path::Path, report: &ScanReport) -> anyhow::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}
