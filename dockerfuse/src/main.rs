use anyhow::{Context, Result};
use clap::Parser;
use dockerfuse::client::ContainerFsClient;
use dockerfuse::docker::DockerCli;
use dockerfuse::fs::ContainerFs;
use fuser::MountOption;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::Arc;
use std::{fs, io, process};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

// clap's own argument errors exit with 2.
const EXIT_DAEMONIZE: i32 = 3;
const EXIT_MOUNT_DIR: i32 = 4;
const EXIT_CLIENT_INIT: i32 = 5;
const EXIT_MOUNT: i32 = 6;

#[derive(Parser, Debug)]
#[command(
    name = "dockerfuse",
    version,
    about = "Mount a running container's filesystem"
)]
struct Cli {
    /// Docker container ID (or name)
    #[arg(short, long)]
    id: String,

    /// Mount point for the container FS
    #[arg(short, long)]
    mount: PathBuf,

    /// Container-side path to mount
    #[arg(short, long, default_value = "/")]
    path: String,

    /// Daemonize the fuse process
    #[arg(short, long)]
    daemonize: bool,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();

    if cli.daemonize {
        match daemonize() {
            Ok(true) => return, // parent process
            Ok(false) => {}
            Err(e) => {
                error!(error = %e, "daemonization failed");
                process::exit(EXIT_DAEMONIZE);
            }
        }
    }

    debug!(mount = %cli.mount.display(), "creating mount directory");
    if let Err(e) = fs::create_dir_all(&cli.mount) {
        error!(error = %e, mount = %cli.mount.display(), "cannot create mount directory");
        process::exit(EXIT_MOUNT_DIR);
    }

    process::exit(run(cli));
}

#[tokio::main]
async fn run(cli: Cli) -> i32 {
    info!(
        uid = %nix::unistd::getuid(),
        gid = %nix::unistd::getgid(),
        container = %cli.id,
        "mounting as current user"
    );

    let control = DockerCli::from_env();
    let client = match ContainerFsClient::connect(&control, &cli.id) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, "error initializing docker client");
            return EXIT_CLIENT_INIT;
        }
    };
    info!("docker client created");

    let filesystem = ContainerFs::new(Arc::clone(&client), &cli.path);
    let options = [MountOption::FSName(format!("dockerfuse-{}", cli.id))];
    let session = match fuser::spawn_mount2(filesystem, &cli.mount, &options) {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "mount failed");
            return EXIT_MOUNT;
        }
    };
    info!(mount = %cli.mount.display(), "filesystem mounted");

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        _ => {
            error!("cannot install signal handlers");
            return 1;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, unmounting"),
        _ = sigint.recv() => info!("received SIGINT, unmounting"),
    }

    drop(session); // unmounts
    info!("unmount successful");
    0
}

/// Classic double-dissociation: fork, detach from the controlling
/// terminal, and point stdio at /dev/null. Returns true in the parent.
fn daemonize() -> Result<bool> {
    use nix::unistd::{chdir, dup2, fork, setsid, ForkResult};

    match unsafe { fork() }.context("fork")? {
        ForkResult::Parent { .. } => return Ok(true),
        ForkResult::Child => {}
    }

    setsid().context("setsid")?;
    chdir("/").context("chdir to /")?;

    let devnull = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .context("opening /dev/null")?;
    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        dup2(devnull.as_raw_fd(), fd).context("redirecting stdio")?;
    }

    Ok(false)
}
