//! handlename - handle name helper
//!
//! Started by the host application, which has already created the pipe.
//! The helper connects, serves requests until the client goes away or the
//! transport fails, then exits.
//!
//! # Exit Behavior
//!
//! The process exits as soon as the loop ends, for any reason, and always
//! with status 0; failures are only logged. Exiting also takes down a
//! watchdog worker that may still be stuck inside the kernel.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use handlename_core::HelperConfig;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// handlename - resolve kernel handle names for a host application
#[derive(Parser, Debug)]
#[command(name = "handlename")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file (defaults apply if it is missing)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pipe to connect to (overrides the configuration file)
    #[arg(long)]
    pipe: Option<PathBuf>,

    /// Name query deadline in milliseconds (overrides the configuration file)
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = init_logging(&args) {
        // Can't use tracing here since it's not initialized
        eprintln!("failed to initialize logging: {e:#}");
        return;
    }

    if let Err(e) = run(&args) {
        error!("helper exiting: {e:#}");
    }
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    Ok(())
}

/// Build the effective configuration: defaults, then the file, then flags.
fn load_config(args: &Args) -> Result<HelperConfig> {
    let mut config = match &args.config {
        Some(path) if path.exists() => {
            HelperConfig::from_file(path).context("failed to load configuration")?
        },
        Some(path) => {
            warn!(path = %path.display(), "configuration file not found, using defaults");
            HelperConfig::default()
        },
        None => HelperConfig::default(),
    };

    if let Some(pipe) = &args.pipe {
        config.pipe_path.clone_from(pipe);
    }
    if let Some(deadline_ms) = args.deadline_ms {
        config.query_deadline = Duration::from_millis(deadline_ms);
    }
    config.validate().context("invalid configuration")?;

    Ok(config)
}

#[cfg(windows)]
fn run(args: &Args) -> Result<()> {
    use handlename_core::ResolverContext;
    use handlename_daemon::{ForceTerminate, Transport, WindowsKernel, connect_pipe, serve};

    let config = load_config(args)?;
    info!(
        pipe = %config.pipe_path.display(),
        deadline_ms = u64::try_from(config.query_deadline.as_millis()).unwrap_or(u64::MAX),
        "starting handle name helper"
    );

    let mut resolver = ResolverContext::new(WindowsKernel::new())
        .with_deadline(config.query_deadline)
        .with_termination(Box::new(ForceTerminate));

    let pipe = connect_pipe(&config.pipe_path)
        .with_context(|| format!("failed to open pipe {}", config.pipe_path.display()))?;
    let mut transport = Transport::new(pipe);

    let err = serve(&mut transport, &mut resolver);
    if err.is_disconnect() {
        info!("client disconnected");
        return Ok(());
    }
    Err(err).context("transport failed")
}

#[cfg(not(windows))]
fn run(args: &Args) -> Result<()> {
    load_config(args)?;
    anyhow::bail!("handle name resolution is only supported on Windows")
}
