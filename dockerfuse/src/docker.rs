//! Container-control contract: upload a binary, attach to an exec.
//!
//! The mount logic only needs three things from the container runtime, so
//! they live behind a trait; tests substitute an in-process double and the
//! default implementation drives the `docker` CLI. The CLI honors
//! `DOCKER_HOST` (including `ssh://` endpoints) and `DOCKER_API_VERSION`
//! natively, so both are simply left in the child environment.

use anyhow::{bail, Context, Result};
use std::env;
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use tracing::{debug, info};

/// The attached stdin/stdout of an exec'd process.
pub struct ExecStream {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
    /// Keeps the exec'd process tied to the mount's lifetime.
    pub child: Option<Child>,
}

/// What the host needs from the container runtime.
pub trait ContainerControl: Send + Sync {
    /// Architecture of the image the container was created from
    /// (`arm64`, `amd64`, ...).
    fn image_architecture(&self, container_id: &str) -> Result<String>;

    /// Unpack a tar archive into `dest_dir` inside the container.
    fn copy_to_container(&self, container_id: &str, dest_dir: &str, archive: &[u8]) -> Result<()>;

    /// Execute `command` inside the container with stdin and stdout
    /// attached; the returned stream is the RPC byte stream.
    fn exec_attach(&self, container_id: &str, command: &[String]) -> Result<ExecStream>;
}

/// Container control through the `docker` command-line client.
pub struct DockerCli {
    bin: String,
}

impl DockerCli {
    pub fn from_env() -> Self {
        if let Ok(host) = env::var("DOCKER_HOST") {
            if host.starts_with("ssh://") {
                info!(%host, "docker endpoint reached over ssh");
            } else {
                debug!(%host, "using DOCKER_HOST endpoint");
            }
        }
        if let Ok(version) = env::var("DOCKER_API_VERSION") {
            debug!(%version, "pinned docker API version");
        }
        Self {
            bin: "docker".to_string(),
        }
    }

    fn command(&self) -> Command {
        // Inherits the environment, so DOCKER_HOST / DOCKER_API_VERSION
        // keep steering the CLI.
        Command::new(&self.bin)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self
            .command()
            .args(args)
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("running {} {}", self.bin, args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "{} {} failed: {}",
                self.bin,
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl ContainerControl for DockerCli {
    fn image_architecture(&self, container_id: &str) -> Result<String> {
        let image = self.run_capture(&["inspect", "--format", "{{.Image}}", container_id])?;
        self.run_capture(&["image", "inspect", "--format", "{{.Architecture}}", &image])
    }

    fn copy_to_container(&self, container_id: &str, dest_dir: &str, archive: &[u8]) -> Result<()> {
        let mut child = self
            .command()
            .args(["cp", "-", &format!("{container_id}:{dest_dir}")])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("spawning docker cp")?;

        child
            .stdin
            .take()
            .expect("stdin was piped")
            .write_all(archive)
            .context("streaming archive to docker cp")?;

        let output = child.wait_with_output().context("waiting for docker cp")?;
        if !output.status.success() {
            bail!(
                "docker cp failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    fn exec_attach(&self, container_id: &str, command: &[String]) -> Result<ExecStream> {
        // TTY mode on attach, matching the exec contract.
        let mut child = self
            .command()
            .arg("exec")
            .arg("-it")
            .arg(container_id)
            .args(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            // The satellite's stderr is its log stream; let it through.
            .stderr(Stdio::inherit())
            .spawn()
            .context("spawning docker exec")?;

        let writer = child.stdin.take().expect("stdin was piped");
        let reader = child.stdout.take().expect("stdout was piped");
        Ok(ExecStream {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: Some(child),
        })
    }
}
