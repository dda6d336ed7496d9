//! mfod - Mail-filter orchestration daemon
//!
//! Sits between a mail transfer agent and one or more backend content
//! filters, relaying mail-transaction lifecycle events to each filter and
//! aggregating their verdicts.
//!
//! # Usage
//!
//! ```bash
//! # Run in the foreground (daemon = false in mfo.toml)
//! mfod start
//!
//! # Override the mail-transaction listener address
//! mfod -s inet:10025@localhost start
//!
//! # Load configuration from a different directory
//! mfod --config-dir /etc/mfo-test start
//!
//! # Stop the running daemon / check its status
//! mfod stop
//! mfod status
//!
//! # Enable debug logging
//! RUST_LOG=mfod=debug mfod start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: graceful shutdown
//! - SIGHUP: reload configuration

use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mfo_reactor::Reactor;
use mfod::{pidfile, FileConfig, ListenSpec, LoggingRelay, Manager, ManagerConfig};

/// mfo daemon - mail-filter orchestration
#[derive(Parser, Debug)]
#[command(name = "mfod", version, about)]
struct Args {
    /// The address of the desired communication socket
    #[arg(short = 's', long, value_name = "PROTOCOL:ADDRESS")]
    spec: Option<String>,

    /// The configuration directory that has the configuration file
    #[arg(long, value_name = "DIRECTORY")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon (the default when no subcommand is given)
    Start,
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config_dir = FileConfig::resolve_dir(args.config_dir.as_deref());
    let config = FileConfig::load(&config_dir).context("failed to load configuration")?;
    if let Some(spec) = &args.spec {
        let spec: ListenSpec = spec.parse().context("invalid --spec value")?;
        config.override_connection_spec(spec);
    }

    match args.command.unwrap_or(Command::Start) {
        Command::Start => run_daemon(config),
        Command::Stop => stop_daemon(&config),
        Command::Status => report_status(&config),
    }
}

fn run_daemon(config: FileConfig) -> Result<()> {
    let reactor = Reactor::shared().context("failed to create event loop")?;
    let mut manager = Manager::new(Rc::new(config), Box::new(LoggingRelay));

    manager
        .main(&mut reactor.borrow_mut())
        .context("failed to start mfod process")?;

    info!("mfod stopped");
    Ok(())
}

fn stop_daemon(config: &FileConfig) -> Result<()> {
    let path = config
        .pid_file()
        .context("no pid_file configured; cannot find the daemon")?;
    let pid = match pidfile::read(&path) {
        Some(pid) => pid,
        None => bail!("mfod is not running (no PID file at {})", path.display()),
    };
    if !pidfile::is_process_running(pid) {
        let _ = pidfile::remove(&path);
        bail!("mfod is not running (stale PID file removed)");
    }
    // SAFETY: plain kill(2); SIGTERM triggers the daemon's orderly shutdown.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        bail!("failed to send SIGTERM to process {pid}");
    }
    println!("sent SIGTERM to mfod (pid {pid})");
    Ok(())
}

fn report_status(config: &FileConfig) -> Result<()> {
    match config.pid_file().and_then(|path| pidfile::read(&path)) {
        Some(pid) if pidfile::is_process_running(pid) => {
            println!("mfod is running (pid {pid})");
        }
        _ => println!("mfod is not running"),
    }
    Ok(())
}
