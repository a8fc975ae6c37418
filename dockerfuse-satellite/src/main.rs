use anyhow::{Context, Result};
use clap::Parser;
use dockerfuse_satellite::{serve, FsOps};
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

const LOG_PATH: &str = "/tmp/log.txt";

#[derive(Parser, Debug)]
#[command(
    name = "dockerfuse-satellite",
    version,
    about = "In-container filesystem agent; speaks RPC on stdin/stdout"
)]
struct Cli {
    /// Enable persistent debug log in /tmp/log.txt
    #[arg(long)]
    log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log)?;

    info!("starting up");
    let fsops = Arc::new(FsOps::new());

    // stdout carries reply frames; everything else goes to stderr.
    let served = tokio::task::spawn_blocking({
        let fsops = Arc::clone(&fsops);
        move || serve::serve(fsops, io::stdin(), io::stdout())
    });

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, cleaning up"),
        _ = sigint.recv() => info!("received SIGINT, cleaning up"),
        res = served => {
            res.context("serve task panicked")?
                .context("serving RPC stream")?;
        }
    }

    fsops.close_all_fds();
    info!("shut down");
    Ok(())
}

fn init_logging(persistent: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if persistent {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o640)
            .open(LOG_PATH)
            .with_context(|| format!("opening log file {LOG_PATH}"))?;

        // Panics and anything else written to fd 2 land in the log too.
        nix::unistd::dup2(file.as_raw_fd(), libc::STDERR_FILENO)
            .context("redirecting stderr to log file")?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Arc::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .with_ansi(false)
            .init();
    }
    Ok(())
}
