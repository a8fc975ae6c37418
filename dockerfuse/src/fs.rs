//! Kernel-facing filesystem adapter.
//!
//! [`ContainerFs`] implements `fuser::Filesystem` by translating each VFS
//! callback into container-side absolute paths and delegating to the
//! [`ContainerFsClient`]. The kernel's inode tree is mirrored in a node
//! table mapping inode number to the path it was discovered under, plus
//! the symlink target cached at lookup time.

use crate::client::ContainerFsClient;
use dockerfuse_proto::{DirEntry, SetAttrRequest, StatReply};
use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyLseek, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Kernel-side attribute and entry cache lifetimes.
const ATTR_TTL: Duration = Duration::from_millis(1500);
const ENTRY_TTL: Duration = Duration::from_millis(1500);

const ROOT_INO: u64 = fuser::FUSE_ROOT_ID;

/// One cached kernel inode: where it lives in the container, and the link
/// target seen when it was discovered (symlinks only).
struct Node {
    full_path: String,
    link_target: Option<String>,
}

pub struct ContainerFs {
    client: Arc<ContainerFsClient>,
    nodes: HashMap<u64, Node>,
}

impl ContainerFs {
    /// A filesystem rooted at `root_path` inside the container.
    pub fn new(client: Arc<ContainerFsClient>, root_path: &str) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_INO,
            Node {
                full_path: clean_path(Path::new(root_path)),
                link_target: None,
            },
        );
        Self { client, nodes }
    }

    fn node_path(&self, ino: u64) -> Option<String> {
        self.nodes.get(&ino).map(|n| n.full_path.clone())
    }

    /// `(parent, name)` → cleaned absolute container-side path.
    fn child_path(&self, parent: u64, name: &OsStr) -> Result<String, i32> {
        let parent_path = self.node_path(parent).ok_or(libc::ENOENT)?;
        let name = name.to_str().ok_or(libc::EINVAL)?;
        Ok(join_clean(&parent_path, name))
    }

    /// Remember where an inode lives. The root mapping is never clobbered.
    fn remember(&mut self, stat: &StatReply, full_path: String) {
        if stat.ino == ROOT_INO {
            return;
        }
        let link_target =
            (!stat.link_target.is_empty()).then(|| stat.link_target.clone());
        self.nodes.insert(
            stat.ino,
            Node {
                full_path,
                link_target,
            },
        );
    }

    fn reply_entry(&mut self, stat: &StatReply, full_path: String, reply: ReplyEntry) {
        self.remember(stat, full_path);
        reply.entry(&ENTRY_TTL, &to_fuse_attr(stat), 0);
    }
}

/// Stable file-type bucket.
///
/// Character/block devices and sockets are not distinguished on the wire;
/// they collapse into the regular-file bucket.
fn stable_kind(mode: u32) -> FileType {
    match mode & libc::S_IFMT {
        libc::S_IFDIR => FileType::Directory,
        libc::S_IFLNK => FileType::Symlink,
        libc::S_IFIFO => FileType::NamedPipe,
        _ => FileType::RegularFile,
    }
}

/// Seconds since the epoch (possibly negative) → `SystemTime`.
fn to_system_time(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

fn to_fuse_attr(stat: &StatReply) -> FileAttr {
    FileAttr {
        ino: stat.ino,
        size: stat.size as u64,
        blocks: stat.blocks as u64,
        atime: to_system_time(stat.atime),
        mtime: to_system_time(stat.mtime),
        ctime: to_system_time(stat.ctime),
        crtime: UNIX_EPOCH,
        kind: stable_kind(stat.mode),
        perm: (stat.mode & 0o7777) as u16,
        nlink: stat.nlink,
        uid: stat.uid,
        gid: stat.gid,
        rdev: 0,
        blksize: stat.blksize as u32,
        flags: 0,
    }
}

/// Join and clean: no `..`, no `.`, single separators, always absolute.
fn join_clean(parent: &str, name: &str) -> String {
    let mut path = PathBuf::from(parent);
    path.push(name);
    clean_path(&path)
}

fn clean_path(path: &Path) -> String {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out.to_string_lossy().into_owned()
}

/// `TimeOrNow` → wire (seconds, nanoseconds); `Now` is resolved here, on
/// the host's clock.
fn wire_time(time: TimeOrNow) -> (i64, u32) {
    let at = match time {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    };
    match at.duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_secs() as i64, d.subsec_nanos()),
        Err(e) => {
            let d = e.duration();
            (-(d.as_secs() as i64), d.subsec_nanos())
        }
    }
}

impl Filesystem for ContainerFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let full_path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        debug!(%full_path, "lookup");

        match self.client.stat(&full_path, None) {
            Ok(stat) => self.reply_entry(&stat, full_path, reply),
            Err(errno) => reply.error(errno),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, _nlookup: u64) {
        if ino != ROOT_INO {
            self.nodes.remove(&ino);
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
        let Some(full_path) = self.node_path(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.client.stat(&full_path, fh) {
            Ok(stat) => reply.attr(&ATTR_TTL, &to_fuse_attr(&stat)),
            Err(errno) => reply.error(errno),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(full_path) = self.node_path(ino) else {
            return reply.error(libc::ENOENT);
        };

        // Only kernel-valid attributes are marked on the wire; the
        // satellite leaves everything else untouched.
        let mut request = SetAttrRequest::new(full_path);
        if let Some(mode) = mode {
            request.set_mode(mode);
        }
        if let Some(uid) = uid {
            request.set_uid(uid);
        }
        if let Some(gid) = gid {
            request.set_gid(gid);
        }
        if let Some(size) = size {
            request.set_size(size);
        }
        if let Some(atime) = atime {
            let (secs, nsecs) = wire_time(atime);
            request.set_atime(secs, nsecs);
        }
        if let Some(mtime) = mtime {
            let (secs, nsecs) = wire_time(mtime);
            request.set_mtime(secs, nsecs);
        }

        match self.client.set_attr(request) {
            Ok(stat) => reply.attr(&ATTR_TTL, &to_fuse_attr(&stat)),
            Err(errno) => reply.error(errno),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let full_path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        match self.client.mkdir(&full_path, mode) {
            Ok(stat) => self.reply_entry(&stat, full_path, reply),
            Err(errno) => reply.error(errno),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let full_path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        match self.client.open(&full_path, flags, mode) {
            Ok((fh, stat)) => {
                self.remember(&stat, full_path);
                reply.created(&ENTRY_TTL, &to_fuse_attr(&stat), 0, fh, 0);
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(full_path) = self.node_path(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.client.open(&full_path, flags, 0) {
            Ok((fh, _stat)) => reply.opened(fh, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        // Short and empty reads are legitimate successes.
        match self.client.read(fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        match self.client.write(fh, offset, data) {
            Ok(num) => reply.written(num),
            Err(errno) => reply.error(errno),
        }
    }

    // The satellite has no "flush without close"; closing here commits on
    // each user-visible close, and the adapter buffers nothing.
    fn flush(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        match self.client.close(fh) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.client.close(fh) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        match self.client.fsync(fh, datasync as u32) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn lseek(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        whence: i32,
        reply: ReplyLseek,
    ) {
        match self.client.seek(fh, offset, whence) {
            Ok(offset) => reply.offset(offset),
            Err(errno) => reply.error(errno),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(full_path) = self.node_path(ino) else {
            return reply.error(libc::ENOENT);
        };
        let entries = match self.client.read_dir(&full_path) {
            Ok(entries) => entries,
            Err(errno) => return reply.error(errno),
        };

        for (i, entry) in entries.iter().enumerate().skip(offset as usize) {
            if !entry_visible(entry) {
                continue;
            }
            if reply.add(
                entry.ino,
                (i + 1) as i64,
                stable_kind(entry.mode),
                &entry.name,
            ) {
                break;
            }
        }
        reply.ok();
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let Some(node) = self.nodes.get(&ino) else {
            return reply.error(libc::ENOENT);
        };
        // A symlink's target never changes under one inode, so the target
        // captured at lookup answers without a round trip.
        if let Some(target) = &node.link_target {
            return reply.data(target.as_bytes());
        }
        let full_path = node.full_path.clone();
        match self.client.readlink(&full_path) {
            Ok(target) => reply.data(&target),
            Err(errno) => reply.error(errno),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        // The new parent's path comes from the kernel inode tree at call
        // time; nodes hold no parent back-pointers.
        let full_path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        let full_new_path = match self.child_path(newparent, newname) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        match self.client.rename(&full_path, &full_new_path, flags) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let full_path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        match self.client.unlink(&full_path) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let full_path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        match self.client.rmdir(&full_path) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let Some(target_path) = self.node_path(ino) else {
            return reply.error(libc::ENOENT);
        };
        let new_full_path = match self.child_path(newparent, newname) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        if let Err(errno) = self.client.link(&target_path, &new_full_path) {
            return reply.error(errno);
        }
        // The wire Link reply carries nothing; stat the new name to fill
        // the entry.
        match self.client.stat(&new_full_path, None) {
            Ok(stat) => self.reply_entry(&stat, new_full_path, reply),
            Err(errno) => reply.error(errno),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &std::path::Path,
        reply: ReplyEntry,
    ) {
        let new_full_path = match self.child_path(parent, link_name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        let Some(target) = target.to_str() else {
            return reply.error(libc::EINVAL);
        };
        if let Err(errno) = self.client.symlink(target, &new_full_path) {
            return reply.error(errno);
        }
        match self.client.stat(&new_full_path, None) {
            Ok(stat) => self.reply_entry(&stat, new_full_path, reply),
            Err(errno) => reply.error(errno),
        }
    }
}

/// Entries with reserved low inode numbers (`.`, `..`) stay hidden.
fn entry_visible(entry: &DirEntry) -> bool {
    entry.ino > 2
}
