//! Filesystem operations executed against the container's local filesystem.
//!
//! [`FsOps`] is the stateful half of the satellite: it owns the table of
//! open file descriptors and implements every method of the
//! `DockerFuseFSOps` service. Failures are rendered as wire error strings
//! (`errno: <SYM>`) so the host can recover the native errno.
//!
//! The FD table is keyed by the raw descriptor returned by `open(2)`, cast
//! to a machine word. The kernel reuses the lowest free number, so a key
//! collision proves the prior slot was already closed out-of-band or
//! leaked; such slots are displaced and replaced, never rejected.

use dockerfuse_proto::errno::{errno_to_wire, io_error_to_wire};
use dockerfuse_proto::prelude::*;
use dockerfuse_proto::{flags, FsReply, FsRequest};

use std::collections::HashMap;
use std::ffi::CString;
use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, Seek, SeekFrom};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, FileExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::os::unix::io::{AsRawFd, IntoRawFd};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

/// Result of one service method: a typed reply or a wire error string.
pub type OpResult<T> = Result<T, String>;

/// The satellite's filesystem service.
pub struct FsOps {
    /// Open file descriptors, keyed by the raw handle value.
    ///
    /// Slots are `Arc` so the I/O syscalls run outside the table lock: a
    /// handler locks only long enough to clone the reference.
    fds: Mutex<HashMap<u64, Arc<File>>>,
}

impl Default for FsOps {
    fn default() -> Self {
        Self::new()
    }
}

impl FsOps {
    pub fn new() -> Self {
        Self {
            fds: Mutex::new(HashMap::new()),
        }
    }

    /// Dispatch one RPC call to its handler.
    pub fn handle(&self, request: FsRequest) -> OpResult<FsReply> {
        debug!(op = request.op_name(), ?request, "handling request");
        match request {
            FsRequest::Stat(req) => self.stat(&req).map(FsReply::Stat),
            FsRequest::ReadDir(req) => self.read_dir(&req).map(FsReply::ReadDir),
            FsRequest::Open(req) => self.open(&req).map(FsReply::Open),
            FsRequest::Close(req) => self.close(&req).map(FsReply::Close),
            FsRequest::Read(req) => self.read(&req).map(FsReply::Read),
            FsRequest::Seek(req) => self.seek(&req).map(FsReply::Seek),
            FsRequest::Write(req) => self.write(&req).map(FsReply::Write),
            FsRequest::Unlink(req) => self.unlink(&req).map(FsReply::Unlink),
            FsRequest::Fsync(req) => self.fsync(&req).map(FsReply::Fsync),
            FsRequest::Mkdir(req) => self.mkdir(&req).map(FsReply::Mkdir),
            FsRequest::Rmdir(req) => self.rmdir(&req).map(FsReply::Rmdir),
            FsRequest::Rename(req) => self.rename(&req).map(FsReply::Rename),
            FsRequest::Readlink(req) => self.readlink(&req).map(FsReply::Readlink),
            FsRequest::Link(req) => self.link(&req).map(FsReply::Link),
            FsRequest::Symlink(req) => self.symlink(&req).map(FsReply::Symlink),
            FsRequest::SetAttr(req) => self.set_attr(&req).map(FsReply::SetAttr),
        }
    }

    pub fn stat(&self, request: &StatRequest) -> OpResult<StatReply> {
        lstat_reply(&request.full_path)
    }

    pub fn read_dir(&self, request: &ReadDirRequest) -> OpResult<ReadDirReply> {
        let entries = fs::read_dir(&request.full_path).map_err(|e| io_error_to_wire(&e))?;

        let mut dir_entries = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error_to_wire(&e))?;
            // DirEntry::metadata does not traverse symlinks.
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                // Entry vanished between enumeration and stat: skip it.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(error = %e, "unexpected metadata error reading directory");
                    return Err(errno_to_wire(libc::EIO));
                }
            };
            dir_entries.push(DirEntry {
                ino: meta.ino(),
                name: entry.file_name().to_string_lossy().into_owned(),
                mode: meta.mode(),
            });
        }
        Ok(ReadDirReply { dir_entries })
    }

    pub fn open(&self, request: &OpenRequest) -> OpResult<OpenReply> {
        let sys_flags = flags::portable_to_system(request.sa_flags);
        let file = open_options(sys_flags, request.mode)
            .open(&request.full_path)
            .map_err(|e| io_error_to_wire(&e))?;

        let fd = file.as_raw_fd() as u64;
        let file = Arc::new(file);
        {
            let mut fds = self.fds.lock().unwrap();
            // Make sure we don't leak stale FDs on handle reuse.
            if let Some(stale) = fds.remove(&fd) {
                release_stale(stale);
            }
            fds.insert(fd, Arc::clone(&file));
        }

        // Stat through the open handle, not the path.
        let meta = file.metadata().map_err(|e| io_error_to_wire(&e))?;
        Ok(OpenReply {
            fd,
            stat: stat_from_metadata(&meta, read_link_or_empty(&request.full_path)),
        })
    }

    pub fn close(&self, request: &CloseRequest) -> OpResult<CloseReply> {
        // The slot is removed no matter how the close itself fares; a file
        // object that failed to close is not reliably usable anyway.
        let Some(file) = self.fds.lock().unwrap().remove(&request.fd) else {
            return Err(errno_to_wire(libc::EINVAL));
        };
        close_file(file).map_err(|e| io_error_to_wire(&e))?;
        Ok(CloseReply {})
    }

    pub fn read(&self, request: &ReadRequest) -> OpResult<ReadReply> {
        let file = self.lookup_fd(request.fd)?;

        let mut data = vec![0u8; request.num as usize];
        let mut filled = 0;
        while filled < data.len() {
            let offset = (request.offset as u64).saturating_add(filled as u64);
            match file.read_at(&mut data[filled..], offset) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // A read that already produced bytes is a legitimate short
                // read; only an error at n == 0 propagates.
                Err(_) if filled > 0 => break,
                Err(e) => return Err(io_error_to_wire(&e)),
            }
        }
        data.truncate(filled);
        Ok(ReadReply { data })
    }

    pub fn seek(&self, request: &SeekRequest) -> OpResult<SeekReply> {
        let file = self.lookup_fd(request.fd)?;

        let pos = match request.whence {
            0 => SeekFrom::Start(request.offset as u64),
            1 => SeekFrom::Current(request.offset),
            2 => SeekFrom::End(request.offset),
            _ => return Err(errno_to_wire(libc::EINVAL)),
        };
        let offset = (&*file).seek(pos).map_err(|e| io_error_to_wire(&e))?;
        Ok(SeekReply {
            offset: offset as i64,
        })
    }

    pub fn write(&self, request: &WriteRequest) -> OpResult<WriteReply> {
        let file = self.lookup_fd(request.fd)?;

        file.write_all_at(&request.data, request.offset as u64)
            .map_err(|e| io_error_to_wire(&e))?;
        Ok(WriteReply {
            num: request.data.len() as u32,
        })
    }

    pub fn unlink(&self, request: &UnlinkRequest) -> OpResult<UnlinkReply> {
        fs::remove_file(&request.full_path).map_err(|e| io_error_to_wire(&e))?;
        Ok(UnlinkReply {})
    }

    pub fn fsync(&self, request: &FsyncRequest) -> OpResult<FsyncReply> {
        // Flags are accepted but unused; fdatasync is not distinguished.
        let file = self.lookup_fd(request.fd)?;
        file.sync_all().map_err(|e| io_error_to_wire(&e))?;
        Ok(FsyncReply {})
    }

    pub fn mkdir(&self, request: &MkdirRequest) -> OpResult<MkdirReply> {
        fs::DirBuilder::new()
            .mode(request.mode)
            .create(&request.full_path)
            .map_err(|e| io_error_to_wire(&e))?;

        lstat_reply(&request.full_path)
    }

    pub fn rmdir(&self, request: &RmdirRequest) -> OpResult<RmdirReply> {
        fs::remove_dir(&request.full_path).map_err(|e| io_error_to_wire(&e))?;
        Ok(RmdirReply {})
    }

    pub fn rename(&self, request: &RenameRequest) -> OpResult<RenameReply> {
        // RENAME_* flags are accepted for forward compatibility; the base
        // contract is "replace allowed".
        fs::rename(&request.full_path, &request.full_new_path)
            .map_err(|e| io_error_to_wire(&e))?;
        Ok(RenameReply {})
    }

    pub fn readlink(&self, request: &ReadlinkRequest) -> OpResult<ReadlinkReply> {
        let target = fs::read_link(&request.full_path).map_err(|e| io_error_to_wire(&e))?;
        Ok(ReadlinkReply {
            link_target: target.to_string_lossy().into_owned(),
        })
    }

    pub fn link(&self, request: &LinkRequest) -> OpResult<LinkReply> {
        fs::hard_link(&request.old_full_path, &request.new_full_path)
            .map_err(|e| io_error_to_wire(&e))?;
        Ok(LinkReply {})
    }

    pub fn symlink(&self, request: &SymlinkRequest) -> OpResult<SymlinkReply> {
        std::os::unix::fs::symlink(&request.old_full_path, &request.new_full_path)
            .map_err(|e| io_error_to_wire(&e))?;
        Ok(SymlinkReply {})
    }

    /// Apply the attributes marked valid. The order is load-bearing:
    /// chown clobbers timestamps, so it runs before utimensat; truncate
    /// runs last so the final stat observes the new size.
    pub fn set_attr(&self, request: &SetAttrRequest) -> OpResult<SetAttrReply> {
        if let Some(mode) = request.mode() {
            fs::set_permissions(&request.full_path, Permissions::from_mode(mode))
                .map_err(|e| io_error_to_wire(&e))?;
        }

        if request.uid().is_some() || request.gid().is_some() {
            // -1 leaves the corresponding id unchanged.
            let uid = request.uid().unwrap_or(u32::MAX) as libc::uid_t;
            let gid = request.gid().unwrap_or(u32::MAX) as libc::gid_t;
            let path = path_cstring(&request.full_path)?;
            if unsafe { libc::chown(path.as_ptr(), uid, gid) } != 0 {
                return Err(io_error_to_wire(&io::Error::last_os_error()));
            }
        }

        if request.atime().is_some() || request.mtime().is_some() {
            let times = [
                timespec_or_omit(request.atime()),
                timespec_or_omit(request.mtime()),
            ];
            let path = path_cstring(&request.full_path)?;
            if unsafe { libc::utimensat(libc::AT_FDCWD, path.as_ptr(), times.as_ptr(), 0) } != 0 {
                return Err(io_error_to_wire(&io::Error::last_os_error()));
            }
        }

        if let Some(size) = request.size() {
            OpenOptions::new()
                .write(true)
                .open(&request.full_path)
                .and_then(|f| f.set_len(size))
                .map_err(|e| io_error_to_wire(&e))?;
        }

        lstat_reply(&request.full_path)
    }

    /// Close every tracked descriptor and clear the table.
    ///
    /// Invoked on shutdown; idempotent, individual close errors ignored.
    pub fn close_all_fds(&self) {
        let drained: Vec<_> = {
            let mut fds = self.fds.lock().unwrap();
            fds.drain().collect()
        };
        for (fd, file) in drained {
            if let Err(e) = close_file(file) {
                debug!(fd, error = %e, "close during shutdown failed");
            }
        }
    }

    /// Number of tracked descriptors (test observability).
    pub fn open_fd_count(&self) -> usize {
        self.fds.lock().unwrap().len()
    }

    fn lookup_fd(&self, fd: u64) -> Result<Arc<File>, String> {
        self.fds
            .lock()
            .unwrap()
            .get(&fd)
            .cloned()
            .ok_or_else(|| errno_to_wire(libc::EINVAL))
    }
}

/// Translate decoded system flags into `OpenOptions`.
fn open_options(sys_flags: i32, mode: u32) -> OpenOptions {
    let mut opts = OpenOptions::new();
    match sys_flags & libc::O_ACCMODE {
        libc::O_WRONLY => {
            opts.write(true);
        }
        libc::O_RDWR => {
            opts.read(true).write(true);
        }
        _ => {
            opts.read(true);
        }
    }
    if sys_flags & libc::O_APPEND != 0 {
        opts.append(true);
    }
    if sys_flags & libc::O_CREAT != 0 {
        if sys_flags & libc::O_EXCL != 0 {
            opts.create_new(true);
        } else {
            opts.create(true);
        }
    }
    if sys_flags & libc::O_TRUNC != 0 {
        opts.truncate(true);
    }
    opts.custom_flags(sys_flags & (libc::O_NONBLOCK | libc::O_SYNC | libc::O_ASYNC | libc::O_NOCTTY));
    opts.mode(mode);
    opts
}

/// Dispose of a slot displaced by handle reuse.
///
/// A key collision proves the prior descriptor was already closed outside
/// the table: the kernel only hands out free numbers. Dropping the stale
/// `File` would close(2) that number a second time and kill the descriptor
/// just opened under it, so ownership is relinquished without closing.
fn release_stale(file: Arc<File>) {
    if let Ok(file) = Arc::try_unwrap(file) {
        let _ = file.into_raw_fd();
    }
}

/// Close a tracked file, reporting the close error when we are the last
/// owner. A file still borrowed by an in-flight I/O call closes when that
/// call drops its reference.
fn close_file(file: Arc<File>) -> io::Result<()> {
    match Arc::try_unwrap(file) {
        Ok(file) => {
            let fd = file.into_raw_fd();
            // SAFETY: ownership of fd was just released by into_raw_fd, so
            // it is closed exactly once here.
            if unsafe { libc::close(fd) } != 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        }
        Err(_) => Ok(()),
    }
}

fn lstat_reply(path: &str) -> OpResult<StatReply> {
    let meta = fs::symlink_metadata(path).map_err(|e| io_error_to_wire(&e))?;
    Ok(stat_from_metadata(&meta, read_link_or_empty(path)))
}

fn stat_from_metadata(meta: &fs::Metadata, link_target: String) -> StatReply {
    StatReply {
        mode: meta.mode(),
        nlink: meta.nlink() as u32,
        ino: meta.ino(),
        uid: meta.uid(),
        gid: meta.gid(),
        atime: meta.atime(),
        mtime: meta.mtime(),
        ctime: meta.ctime(),
        size: meta.size() as i64,
        blocks: meta.blocks() as i64,
        blksize: meta.blksize() as i32,
        link_target,
    }
}

/// Best-effort readlink: anything that is not a symlink yields "".
fn read_link_or_empty(path: &str) -> String {
    fs::read_link(path)
        .map(|t| t.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn timespec_or_omit(time: Option<(i64, u32)>) -> libc::timespec {
    match time {
        Some((secs, nsecs)) => libc::timespec {
            tv_sec: secs,
            tv_nsec: nsecs as i64,
        },
        None => libc::timespec {
            tv_sec: 0,
            tv_nsec: UTIME_OMIT,
        },
    }
}

fn path_cstring(path: &str) -> Result<CString, String> {
    CString::new(std::ffi::OsStr::new(path).as_bytes()).map_err(|_| errno_to_wire(libc::EINVAL))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockerfuse_proto::flags::{CREAT, RDWR};
    use std::io::Write as _;
    use std::path::Path;
    use tempfile::TempDir;

    fn fixture() -> (FsOps, TempDir) {
        (FsOps::new(), TempDir::new().unwrap())
    }

    fn path_str(dir: &TempDir, name: &str) -> String {
        dir.path().join(name).to_string_lossy().into_owned()
    }

    fn write_file(path: &str, contents: &[u8]) {
        let mut f = File::create(path).unwrap();
        f.write_all(contents).unwrap();
    }

    fn open_rdwr(fso: &FsOps, path: &str) -> OpenReply {
        fso.open(&OpenRequest {
            full_path: path.into(),
            sa_flags: CREAT | RDWR,
            mode: 0o644,
        })
        .unwrap()
    }

    #[test]
    fn test_stat_reports_metadata() {
        let (fso, dir) = fixture();
        let path = path_str(&dir, "a");
        write_file(&path, b"hello dockerfuse");

        let reply = fso.stat(&StatRequest {
            full_path: path.clone(),
        })
        .unwrap();

        let meta = fs::metadata(&path).unwrap();
        assert_eq!(reply.ino, meta.ino());
        assert_eq!(reply.size, 16);
        assert_eq!(reply.mode & libc::S_IFMT, libc::S_IFREG);
        assert_eq!(reply.uid, meta.uid());
        assert_eq!(reply.link_target, "");
    }

    #[test]
    fn test_stat_missing_path() {
        let (fso, dir) = fixture();
        let err = fso
            .stat(&StatRequest {
                full_path: path_str(&dir, "enoent"),
            })
            .unwrap_err();
        assert_eq!(err, "errno: ENOENT");
    }

    #[test]
    fn test_stat_symlink_carries_target() {
        let (fso, dir) = fixture();
        let target = path_str(&dir, "a");
        write_file(&target, b"x");
        let link = path_str(&dir, "l");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let reply = fso.stat(&StatRequest {
            full_path: link.clone(),
        })
        .unwrap();
        assert_eq!(reply.mode & libc::S_IFMT, libc::S_IFLNK);
        assert_eq!(reply.link_target, target);
    }

    #[test]
    fn test_read_dir_lists_entries() {
        let (fso, dir) = fixture();
        write_file(&path_str(&dir, "one"), b"1");
        write_file(&path_str(&dir, "two"), b"22");
        fs::create_dir(dir.path().join("sub")).unwrap();

        let reply = fso
            .read_dir(&ReadDirRequest {
                full_path: dir.path().to_string_lossy().into_owned(),
            })
            .unwrap();

        let mut names: Vec<_> = reply.dir_entries.iter().map(|e| e.name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, ["one", "sub", "two"]);
        for entry in &reply.dir_entries {
            assert_ne!(entry.ino, 0);
            let expected = if entry.name == "sub" {
                libc::S_IFDIR
            } else {
                libc::S_IFREG
            };
            assert_eq!(entry.mode & libc::S_IFMT, expected);
        }
    }

    #[test]
    fn test_open_tracks_fd_and_stats_by_handle() {
        let (fso, dir) = fixture();
        let path = path_str(&dir, "f");

        let reply = open_rdwr(&fso, &path);
        assert!(Path::new(&path).exists());
        assert_ne!(reply.fd, 0);
        assert_eq!(reply.stat.size, 0);
        assert_eq!(fso.open_fd_count(), 1);

        fso.close(&CloseRequest { fd: reply.fd }).unwrap();
        assert_eq!(fso.open_fd_count(), 0);
    }

    #[test]
    fn test_open_missing_without_create() {
        let (fso, dir) = fixture();
        let err = fso
            .open(&OpenRequest {
                full_path: path_str(&dir, "missing"),
                sa_flags: RDWR,
                mode: 0,
            })
            .unwrap_err();
        assert_eq!(err, "errno: ENOENT");
        assert_eq!(fso.open_fd_count(), 0);
    }

    #[test]
    fn test_open_evicts_stale_slot_on_handle_reuse() {
        let (fso, dir) = fixture();
        let path = path_str(&dir, "f");

        write_file(&path, b"still readable");

        // Close the descriptor behind the table's back, leaking the slot;
        // the kernel hands the lowest free number back on the next open.
        // Concurrent tests can snatch that number, so retry until the
        // collision is actually observed.
        for _ in 0..32 {
            let first = open_rdwr(&fso, &path);
            assert_eq!(unsafe { libc::close(first.fd as i32) }, 0);

            let second = open_rdwr(&fso, &path);
            if second.fd == first.fd {
                // The stale slot was displaced, never duplicated, and the
                // fresh descriptor stays usable.
                assert_eq!(fso.open_fd_count(), 1);
                let reply = fso
                    .read(&ReadRequest {
                        fd: second.fd,
                        offset: 0,
                        num: 64,
                    })
                    .unwrap();
                assert_eq!(reply.data, b"still readable");
                return;
            }
            // A concurrent open snatched the number; the stale slot must
            // be relinquished, not closed, before trying again.
            if let Some(stale) = fso.fds.lock().unwrap().remove(&first.fd) {
                release_stale(stale);
            }
            fso.close(&CloseRequest { fd: second.fd }).unwrap();
        }
        panic!("kernel never reused the closed handle");
    }

    #[test]
    fn test_close_unknown_fd() {
        let (fso, _dir) = fixture();
        let err = fso.close(&CloseRequest { fd: 12345 }).unwrap_err();
        assert_eq!(err, "errno: EINVAL");
    }

    #[test]
    fn test_read_returns_file_bytes() {
        let (fso, dir) = fixture();
        let path = path_str(&dir, "f");
        write_file(&path, b"hello");

        let open = open_rdwr(&fso, &path);
        let reply = fso
            .read(&ReadRequest {
                fd: open.fd,
                offset: 0,
                num: 5,
            })
            .unwrap();
        assert_eq!(reply.data, b"hello");
    }

    #[test]
    fn test_read_short_at_eof_is_success() {
        let (fso, dir) = fixture();
        let path = path_str(&dir, "f");
        write_file(&path, b"hello");

        let open = open_rdwr(&fso, &path);
        // Asking for more than the file holds yields the bytes present.
        let reply = fso
            .read(&ReadRequest {
                fd: open.fd,
                offset: 0,
                num: 32,
            })
            .unwrap();
        assert_eq!(reply.data, b"hello");

        // Reading past the end yields an empty success.
        let reply = fso
            .read(&ReadRequest {
                fd: open.fd,
                offset: 100,
                num: 32,
            })
            .unwrap();
        assert!(reply.data.is_empty());

        // A zero-length read is also a success.
        let reply = fso
            .read(&ReadRequest {
                fd: open.fd,
                offset: 0,
                num: 0,
            })
            .unwrap();
        assert!(reply.data.is_empty());
    }

    #[test]
    fn test_read_unknown_fd() {
        let (fso, _dir) = fixture();
        let err = fso
            .read(&ReadRequest {
                fd: 9999,
                offset: 0,
                num: 1,
            })
            .unwrap_err();
        assert_eq!(err, "errno: EINVAL");
    }

    #[test]
    fn test_write_is_positional() {
        let (fso, dir) = fixture();
        let path = path_str(&dir, "f");

        let open = open_rdwr(&fso, &path);
        let reply = fso
            .write(&WriteRequest {
                fd: open.fd,
                offset: 3,
                data: b"abc".to_vec(),
            })
            .unwrap();
        assert_eq!(reply.num, 3);

        assert_eq!(fs::read(&path).unwrap(), b"\0\0\0abc");
    }

    #[test]
    fn test_seek_whence_values() {
        let (fso, dir) = fixture();
        let path = path_str(&dir, "f");
        write_file(&path, b"0123456789");

        let open = open_rdwr(&fso, &path);
        let fd = open.fd;

        let start = fso
            .seek(&SeekRequest {
                fd,
                offset: 4,
                whence: 0,
            })
            .unwrap();
        assert_eq!(start.offset, 4);

        let current = fso
            .seek(&SeekRequest {
                fd,
                offset: 2,
                whence: 1,
            })
            .unwrap();
        assert_eq!(current.offset, 6);

        let end = fso
            .seek(&SeekRequest {
                fd,
                offset: -1,
                whence: 2,
            })
            .unwrap();
        assert_eq!(end.offset, 9);

        let err = fso
            .seek(&SeekRequest {
                fd,
                offset: 0,
                whence: 7,
            })
            .unwrap_err();
        assert_eq!(err, "errno: EINVAL");
    }

    #[test]
    fn test_fsync() {
        let (fso, dir) = fixture();
        let open = open_rdwr(&fso, &path_str(&dir, "f"));
        fso.fsync(&FsyncRequest {
            fd: open.fd,
            flags: 0,
        })
        .unwrap();
        let err = fso
            .fsync(&FsyncRequest { fd: 777, flags: 0 })
            .unwrap_err();
        assert_eq!(err, "errno: EINVAL");
    }

    #[test]
    fn test_mkdir_returns_attributes() {
        let (fso, dir) = fixture();
        let path = path_str(&dir, "newdir");

        let reply = fso
            .mkdir(&MkdirRequest {
                full_path: path.clone(),
                mode: 0o750,
            })
            .unwrap();

        assert_ne!(reply.ino, 0);
        assert_eq!(reply.mode & libc::S_IFMT, libc::S_IFDIR);
        assert_eq!(reply.mode & 0o777, 0o750);
        assert_eq!(reply.link_target, "");
    }

    #[test]
    fn test_rmdir_and_unlink() {
        let (fso, dir) = fixture();
        let sub = path_str(&dir, "sub");
        fs::create_dir(&sub).unwrap();
        let file = path_str(&dir, "f");
        write_file(&file, b"x");

        fso.rmdir(&RmdirRequest {
            full_path: sub.clone(),
        })
        .unwrap();
        assert!(!Path::new(&sub).exists());

        fso.unlink(&UnlinkRequest {
            full_path: file.clone(),
        })
        .unwrap();
        assert!(!Path::new(&file).exists());
    }

    #[test]
    fn test_rename_replaces() {
        let (fso, dir) = fixture();
        let old = path_str(&dir, "old");
        let new = path_str(&dir, "new");
        write_file(&old, b"payload");
        write_file(&new, b"overwritten");

        fso.rename(&RenameRequest {
            full_path: old.clone(),
            full_new_path: new.clone(),
            flags: 0,
        })
        .unwrap();

        assert!(!Path::new(&old).exists());
        assert_eq!(fs::read(&new).unwrap(), b"payload");
    }

    #[test]
    fn test_symlink_readlink_roundtrip() {
        let (fso, dir) = fixture();
        let link = path_str(&dir, "l");

        fso.symlink(&SymlinkRequest {
            old_full_path: "/a".into(),
            new_full_path: link.clone(),
        })
        .unwrap();

        let reply = fso
            .readlink(&ReadlinkRequest {
                full_path: link.clone(),
            })
            .unwrap();
        assert_eq!(reply.link_target, "/a");
    }

    #[test]
    fn test_link_shares_inode() {
        let (fso, dir) = fixture();
        let a = path_str(&dir, "a");
        let b = path_str(&dir, "b");
        write_file(&a, b"x");

        fso.link(&LinkRequest {
            old_full_path: a.clone(),
            new_full_path: b.clone(),
        })
        .unwrap();

        assert_eq!(
            fs::metadata(&a).unwrap().ino(),
            fs::metadata(&b).unwrap().ino()
        );
        assert_eq!(fs::metadata(&a).unwrap().nlink(), 2);
    }

    #[test]
    fn test_set_attr_empty_mask_is_a_stat() {
        let (fso, dir) = fixture();
        let path = path_str(&dir, "f");
        write_file(&path, b"contents");
        let before = fs::metadata(&path).unwrap();

        let reply = fso.set_attr(&SetAttrRequest::new(&path)).unwrap();

        assert_eq!(reply.size, 8);
        assert_eq!(reply.mtime, before.mtime());
        assert_eq!(reply.mode, before.mode());
    }

    #[test]
    fn test_set_attr_mode_and_size() {
        let (fso, dir) = fixture();
        let path = path_str(&dir, "f");
        write_file(&path, b"0123456789");

        let mut req = SetAttrRequest::new(&path);
        req.set_mode(0o600);
        req.set_size(4);
        let reply = fso.set_attr(&req).unwrap();

        assert_eq!(reply.mode & 0o777, 0o600);
        assert_eq!(reply.size, 4);
        assert_eq!(fs::read(&path).unwrap(), b"0123");
    }

    #[test]
    fn test_set_attr_atime_only_keeps_mtime() {
        let (fso, dir) = fixture();
        let path = path_str(&dir, "f");
        write_file(&path, b"x");
        let before = fs::metadata(&path).unwrap();

        let mut req = SetAttrRequest::new(&path);
        req.set_atime(1_000_000, 0);
        let reply = fso.set_attr(&req).unwrap();

        assert_eq!(reply.atime, 1_000_000);
        assert_eq!(reply.mtime, before.mtime());
    }

    #[test]
    fn test_set_attr_both_times() {
        let (fso, dir) = fixture();
        let path = path_str(&dir, "f");
        write_file(&path, b"x");

        let mut req = SetAttrRequest::new(&path);
        req.set_atime(1_000_000, 0);
        req.set_mtime(2_000_000, 0);
        let reply = fso.set_attr(&req).unwrap();

        assert_eq!(reply.atime, 1_000_000);
        assert_eq!(reply.mtime, 2_000_000);
    }

    #[test]
    fn test_close_all_fds_empties_table() {
        let (fso, dir) = fixture();
        for name in ["a", "b", "c"] {
            open_rdwr(&fso, &path_str(&dir, name));
        }
        assert_eq!(fso.open_fd_count(), 3);

        fso.close_all_fds();
        assert_eq!(fso.open_fd_count(), 0);

        // Idempotent.
        fso.close_all_fds();
        assert_eq!(fso.open_fd_count(), 0);
    }

    #[test]
    fn test_handle_dispatches_and_encodes_errors() {
        let (fso, dir) = fixture();
        let reply = fso
            .handle(FsRequest::Stat(StatRequest {
                full_path: path_str(&dir, "nope"),
            }))
            .unwrap_err();
        assert_eq!(reply, "errno: ENOENT");

        let reply = fso.handle(FsRequest::Close(CloseRequest { fd: 1234 }));
        assert_eq!(reply.unwrap_err(), "errno: EINVAL");
    }
}
