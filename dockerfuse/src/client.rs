//! Typed filesystem client over the satellite connection.
//!
//! [`ContainerFsClient`] owns the RPC peer for one container and exposes
//! one method per service operation. Wire errors are decoded to native
//! errno values here, so the FUSE adapter above only ever sees
//! `Result<_, i32>`.

use crate::docker::{ContainerControl, ExecStream};
use crate::rpc::RpcPeer;
use anyhow::{bail, Context, Result};
use dockerfuse_proto::errno::{wire_to_errno, EOF_ERROR};
use dockerfuse_proto::prelude::*;
use dockerfuse_proto::{flags, FsReply, FsRequest};
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::Child;
use std::sync::Arc;
use std::{env, fs};
use tracing::info;

const SATELLITE_BIN_PREFIX: &str = "dockerfuse_satellite";
const SATELLITE_EXEC_PATH: &str = "/tmp";

/// Operation outcome: success payload or native errno.
pub type FsResult<T> = Result<T, i32>;

/// One connected satellite.
pub struct ContainerFsClient {
    rpc: Arc<RpcPeer>,
    /// The exec'd satellite process, when this client owns one.
    _exec: Option<Child>,
}

impl ContainerFsClient {
    /// Upload the satellite into the container and attach to it.
    pub fn connect(control: &dyn ContainerControl, container_id: &str) -> Result<Self> {
        let remote_path = upload_satellite(control, container_id)?;
        let stream = control
            .exec_attach(container_id, &[remote_path])
            .context("attaching to satellite exec")?;
        Ok(Self::from_exec_stream(stream))
    }

    pub fn from_exec_stream(stream: ExecStream) -> Self {
        Self {
            rpc: RpcPeer::new(stream.reader, stream.writer),
            _exec: stream.child,
        }
    }

    /// Build a client over an arbitrary byte stream (tests).
    pub fn from_stream<R, W>(reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self {
            rpc: RpcPeer::new(reader, writer),
            _exec: None,
        }
    }

    fn call(&self, request: FsRequest) -> FsResult<FsReply> {
        self.rpc.call(request).map_err(|msg| wire_to_errno(&msg))
    }

    /// Symlink-non-following stat. An open `file_handle` may be supplied
    /// but the wire carries only the path, so it is ignored.
    pub fn stat(&self, full_path: &str, file_handle: Option<u64>) -> FsResult<StatReply> {
        let _ = file_handle;
        match self.call(FsRequest::Stat(StatRequest {
            full_path: full_path.to_string(),
        }))? {
            FsReply::Stat(reply) => Ok(reply),
            _ => Err(libc::EIO),
        }
    }

    pub fn read_dir(&self, full_path: &str) -> FsResult<Vec<DirEntry>> {
        match self.call(FsRequest::ReadDir(ReadDirRequest {
            full_path: full_path.to_string(),
        }))? {
            FsReply::ReadDir(reply) => Ok(reply.dir_entries),
            _ => Err(libc::EIO),
        }
    }

    /// Open (or create, depending on `flags`) and return the satellite's
    /// handle together with the attributes of the opened file.
    pub fn open(&self, full_path: &str, flags: i32, mode: u32) -> FsResult<(u64, StatReply)> {
        match self.call(FsRequest::Open(OpenRequest {
            full_path: full_path.to_string(),
            sa_flags: flags::system_to_portable(flags),
            mode,
        }))? {
            FsReply::Open(reply) => Ok((reply.fd, reply.stat)),
            _ => Err(libc::EIO),
        }
    }

    pub fn close(&self, fh: u64) -> FsResult<()> {
        match self.call(FsRequest::Close(CloseRequest { fd: fh }))? {
            FsReply::Close(_) => Ok(()),
            _ => Err(libc::EIO),
        }
    }

    pub fn read(&self, fh: u64, offset: i64, num: u32) -> FsResult<Vec<u8>> {
        match self.rpc.call(FsRequest::Read(ReadRequest {
            fd: fh,
            offset,
            num,
        })) {
            Ok(FsReply::Read(reply)) => Ok(reply.data),
            Ok(_) => Err(libc::EIO),
            // End-of-stream is a successful empty read.
            Err(msg) if msg == EOF_ERROR => Ok(Vec::new()),
            Err(msg) => Err(wire_to_errno(&msg)),
        }
    }

    pub fn seek(&self, fh: u64, offset: i64, whence: i32) -> FsResult<i64> {
        match self.call(FsRequest::Seek(SeekRequest {
            fd: fh,
            offset,
            whence,
        }))? {
            FsReply::Seek(reply) => Ok(reply.offset),
            _ => Err(libc::EIO),
        }
    }

    pub fn write(&self, fh: u64, offset: i64, data: &[u8]) -> FsResult<u32> {
        match self.call(FsRequest::Write(WriteRequest {
            fd: fh,
            offset,
            data: data.to_vec(),
        }))? {
            FsReply::Write(reply) => Ok(reply.num),
            _ => Err(libc::EIO),
        }
    }

    pub fn unlink(&self, full_path: &str) -> FsResult<()> {
        match self.call(FsRequest::Unlink(UnlinkRequest {
            full_path: full_path.to_string(),
        }))? {
            FsReply::Unlink(_) => Ok(()),
            _ => Err(libc::EIO),
        }
    }

    pub fn fsync(&self, fh: u64, flags: u32) -> FsResult<()> {
        match self.call(FsRequest::Fsync(FsyncRequest { fd: fh, flags }))? {
            FsReply::Fsync(_) => Ok(()),
            _ => Err(libc::EIO),
        }
    }

    pub fn mkdir(&self, full_path: &str, mode: u32) -> FsResult<StatReply> {
        match self.call(FsRequest::Mkdir(MkdirRequest {
            full_path: full_path.to_string(),
            mode,
        }))? {
            FsReply::Mkdir(reply) => Ok(reply),
            _ => Err(libc::EIO),
        }
    }

    pub fn rmdir(&self, full_path: &str) -> FsResult<()> {
        match self.call(FsRequest::Rmdir(RmdirRequest {
            full_path: full_path.to_string(),
        }))? {
            FsReply::Rmdir(_) => Ok(()),
            _ => Err(libc::EIO),
        }
    }

    pub fn rename(&self, full_path: &str, full_new_path: &str, flags: u32) -> FsResult<()> {
        match self.call(FsRequest::Rename(RenameRequest {
            full_path: full_path.to_string(),
            full_new_path: full_new_path.to_string(),
            flags,
        }))? {
            FsReply::Rename(_) => Ok(()),
            _ => Err(libc::EIO),
        }
    }

    pub fn readlink(&self, full_path: &str) -> FsResult<Vec<u8>> {
        match self.call(FsRequest::Readlink(ReadlinkRequest {
            full_path: full_path.to_string(),
        }))? {
            FsReply::Readlink(reply) => Ok(reply.link_target.into_bytes()),
            _ => Err(libc::EIO),
        }
    }

    pub fn link(&self, old_full_path: &str, new_full_path: &str) -> FsResult<()> {
        match self.call(FsRequest::Link(LinkRequest {
            old_full_path: old_full_path.to_string(),
            new_full_path: new_full_path.to_string(),
        }))? {
            FsReply::Link(_) => Ok(()),
            _ => Err(libc::EIO),
        }
    }

    pub fn symlink(&self, target: &str, new_full_path: &str) -> FsResult<()> {
        match self.call(FsRequest::Symlink(SymlinkRequest {
            old_full_path: target.to_string(),
            new_full_path: new_full_path.to_string(),
        }))? {
            FsReply::Symlink(_) => Ok(()),
            _ => Err(libc::EIO),
        }
    }

    /// Apply the attributes marked valid in `request` and return the
    /// resulting stat. Unmarked fields stay untouched on disk.
    pub fn set_attr(&self, request: SetAttrRequest) -> FsResult<StatReply> {
        match self.call(FsRequest::SetAttr(request))? {
            FsReply::SetAttr(reply) => Ok(reply),
            _ => Err(libc::EIO),
        }
    }
}

/// Pick the satellite binary for the container's architecture, package it,
/// and drop it into `/tmp` inside the container. Returns the remote path.
pub fn upload_satellite(control: &dyn ContainerControl, container_id: &str) -> Result<String> {
    let arch = control
        .image_architecture(container_id)
        .context("inspecting container image")?;
    if arch != "arm64" && arch != "amd64" {
        bail!("unsupported architecture: {arch} (use arm64 or amd64)");
    }

    let bin_name = format!("{SATELLITE_BIN_PREFIX}_{arch}");
    let exe = env::current_exe().context("locating own executable")?;
    let local_path = exe
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(&bin_name);
    let contents = fs::read(&local_path)
        .with_context(|| format!("reading satellite binary {}", local_path.display()))?;

    let archive = build_satellite_archive(&bin_name, &contents)?;
    info!(
        local = %local_path.display(),
        container = container_id,
        remote = %format!("{SATELLITE_EXEC_PATH}/{bin_name}"),
        "copying satellite into container"
    );
    control
        .copy_to_container(container_id, SATELLITE_EXEC_PATH, &archive)
        .context("copying satellite into container")?;

    Ok(format!("{SATELLITE_EXEC_PATH}/{bin_name}"))
}

/// Single-entry tar archive carrying the satellite binary, mode 0700.
pub fn build_satellite_archive(name: &str, contents: &[u8]) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o700);
    header.set_cksum();
    builder.append_data(&mut header, name, contents)?;
    builder.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockerfuse_proto::wire::{WireRequest, WireResponse};
    use std::os::unix::net::UnixStream;
    use std::thread;

    /// A scripted satellite: answers each incoming call with the next
    /// canned result.
    fn scripted_peer(script: Vec<Result<FsReply, String>>) -> ContainerFsClient {
        let (host, mut sat) = UnixStream::pair().unwrap();
        thread::spawn(move || {
            for result in script {
                let mut len_buf = [0u8; 4];
                if sat.read_exact(&mut len_buf).is_err() {
                    return;
                }
                let len = u32::from_be_bytes(len_buf) as usize;
                let mut body = vec![0u8; len];
                sat.read_exact(&mut body).unwrap();
                let call = WireRequest::decode(&body).unwrap();
                let frame = WireResponse::new(call.unique, result).encode().unwrap();
                sat.write_all(&frame).unwrap();
            }
        });
        ContainerFsClient::from_stream(host.try_clone().unwrap(), host)
    }

    #[test]
    fn test_stat_decodes_errno() {
        let client = scripted_peer(vec![Err("errno: ENOENT".into())]);
        assert_eq!(client.stat("/enoent", None), Err(libc::ENOENT));
    }

    #[test]
    fn test_stat_ignores_file_handle() {
        let reply = StatReply {
            ino: 29,
            size: 29696,
            ..Default::default()
        };
        let client = scripted_peer(vec![Ok(FsReply::Stat(reply.clone()))]);
        assert_eq!(client.stat("/a", Some(42)), Ok(reply));
    }

    #[test]
    fn test_read_eof_is_empty_success() {
        let client = scripted_peer(vec![Err("EOF".into())]);
        assert_eq!(client.read(42, 0, 32), Ok(Vec::new()));
    }

    #[test]
    fn test_read_malformed_error_is_eio() {
        let client = scripted_peer(vec![Err("something exploded".into())]);
        assert_eq!(client.read(42, 0, 32), Err(libc::EIO));
    }

    #[test]
    fn test_mismatched_reply_is_eio() {
        let client = scripted_peer(vec![Ok(FsReply::Close(CloseReply {}))]);
        assert_eq!(client.stat("/a", None), Err(libc::EIO));
    }

    #[test]
    fn test_open_carries_portable_flags() {
        // The satellite sees the portable encoding, not the host's O_* bits.
        let (host, mut sat) = UnixStream::pair().unwrap();
        let checker = thread::spawn(move || {
            let mut len_buf = [0u8; 4];
            sat.read_exact(&mut len_buf).unwrap();
            let len = u32::from_be_bytes(len_buf) as usize;
            let mut body = vec![0u8; len];
            sat.read_exact(&mut body).unwrap();
            let call = WireRequest::decode(&body).unwrap();
            let FsRequest::Open(req) = &call.request else {
                panic!("expected Open, got {:?}", call.request);
            };
            assert_eq!(req.sa_flags, flags::CREAT | flags::RDWR);
            assert_eq!(req.mode, 0o644);
            let frame = WireResponse::new(
                call.unique,
                Ok(FsReply::Open(OpenReply {
                    fd: 42,
                    stat: StatReply::default(),
                })),
            )
            .encode()
            .unwrap();
            sat.write_all(&frame).unwrap();
        });

        let client = ContainerFsClient::from_stream(host.try_clone().unwrap(), host);
        let (fd, _) = client
            .open("/f", libc::O_CREAT | libc::O_RDWR, 0o644)
            .unwrap();
        assert_eq!(fd, 42);
        checker.join().unwrap();
    }

    #[test]
    fn test_build_satellite_archive() {
        let archive = build_satellite_archive("dockerfuse_satellite_amd64", b"#!payload").unwrap();

        let mut reader = tar::Archive::new(&archive[..]);
        let mut entries = reader.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();
        assert_eq!(
            entry.path().unwrap().to_string_lossy(),
            "dockerfuse_satellite_amd64"
        );
        assert_eq!(entry.header().mode().unwrap(), 0o700);
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"#!payload");
        assert!(entries.next().is_none());
    }
}
