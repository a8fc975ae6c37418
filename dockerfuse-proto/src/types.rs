//! Request/reply records for the filesystem RPC service.
//!
//! Numeric widths are fixed by the wire contract and must not drift with
//! the build target: file descriptors travel as a `u64` machine word that
//! only the satellite interprets, timestamps are seconds in `i64`, and
//! `mode`/`nlink`/`blksize` are pinned to the widths below even where the
//! native `stat` fields are wider.

use serde::{Deserialize, Serialize};

/// Essential information about one entry in a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub mode: u32,
    pub name: String,
    pub ino: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadDirRequest {
    pub full_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadDirReply {
    pub dir_entries: Vec<DirEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatRequest {
    pub full_path: String,
}

/// Symlink-non-following stat results.
///
/// `link_target` is populated opportunistically: the satellite reads the
/// link target together with the stat so a lookup needs one round trip,
/// and leaves it empty for non-symlinks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatReply {
    pub mode: u32,
    pub nlink: u32,
    pub ino: u64,
    pub uid: u32,
    pub gid: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub size: i64,
    pub blocks: i64,
    pub blksize: i32,
    pub link_target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRequest {
    pub full_path: String,
    /// System-agnostic flags, see [`crate::flags`].
    pub sa_flags: u16,
    pub mode: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenReply {
    /// Opaque machine-word handle; the host echoes it back, nothing more.
    pub fd: u64,
    pub stat: StatReply,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseRequest {
    pub fd: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseReply {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub fd: u64,
    pub offset: i64,
    pub num: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReply {
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeekRequest {
    pub fd: u64,
    pub offset: i64,
    pub whence: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeekReply {
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub fd: u64,
    pub offset: i64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReply {
    pub num: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlinkRequest {
    pub full_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlinkReply {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsyncRequest {
    pub fd: u64,
    /// Accepted for forward compatibility; fdatasync is not distinguished.
    pub flags: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsyncReply {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MkdirRequest {
    pub full_path: String,
    pub mode: u32,
}

/// Attributes of the newly created directory.
pub type MkdirReply = StatReply;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RmdirRequest {
    pub full_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RmdirReply {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRequest {
    pub full_path: String,
    pub full_new_path: String,
    /// RENAME_* bits are accepted on the wire; the base contract is
    /// "replace allowed" and does not forward them.
    pub flags: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameReply {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadlinkRequest {
    pub full_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadlinkReply {
    pub link_target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRequest {
    pub old_full_path: String,
    pub new_full_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkReply {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymlinkRequest {
    /// The link's target text; may be relative.
    pub old_full_path: String,
    /// Where the link node is created.
    pub new_full_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymlinkReply {}

/// Bits of [`SetAttrRequest::valid_attrs`].
pub const SATTR_ATIME: u32 = 1 << 0;
pub const SATTR_GID: u32 = 1 << 1;
pub const SATTR_MODE: u32 = 1 << 2;
pub const SATTR_MTIME: u32 = 1 << 3;
pub const SATTR_SIZE: u32 = 1 << 4;
pub const SATTR_UID: u32 = 1 << 5;

/// Sentinel nanosecond value for utimensat(): leave the timestamp alone.
pub const UTIME_OMIT: i64 = (1 << 30) - 2;

/// Which attributes of a file should change, and to what.
///
/// `valid_attrs` enumerates the meaningful fields; everything unmarked must
/// be left untouched on disk. Use the setters to keep the mask and the
/// values in sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetAttrRequest {
    pub full_path: String,
    pub valid_attrs: u32,
    pub atime_secs: i64,
    pub atime_nsecs: u32,
    pub mtime_secs: i64,
    pub mtime_nsecs: u32,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub size: u64,
}

/// Updated attributes after a SetAttr.
pub type SetAttrReply = StatReply;

impl SetAttrRequest {
    pub fn new(full_path: impl Into<String>) -> Self {
        Self {
            full_path: full_path.into(),
            ..Self::default()
        }
    }

    pub fn mode(&self) -> Option<u32> {
        (self.valid_attrs & SATTR_MODE != 0).then_some(self.mode)
    }

    pub fn uid(&self) -> Option<u32> {
        (self.valid_attrs & SATTR_UID != 0).then_some(self.uid)
    }

    pub fn gid(&self) -> Option<u32> {
        (self.valid_attrs & SATTR_GID != 0).then_some(self.gid)
    }

    /// Access time as (seconds, nanoseconds), if requested.
    pub fn atime(&self) -> Option<(i64, u32)> {
        (self.valid_attrs & SATTR_ATIME != 0).then_some((self.atime_secs, self.atime_nsecs))
    }

    /// Modification time as (seconds, nanoseconds), if requested.
    pub fn mtime(&self) -> Option<(i64, u32)> {
        (self.valid_attrs & SATTR_MTIME != 0).then_some((self.mtime_secs, self.mtime_nsecs))
    }

    pub fn size(&self) -> Option<u64> {
        (self.valid_attrs & SATTR_SIZE != 0).then_some(self.size)
    }

    pub fn set_mode(&mut self, mode: u32) {
        self.mode = mode;
        self.valid_attrs |= SATTR_MODE;
    }

    pub fn set_uid(&mut self, uid: u32) {
        self.uid = uid;
        self.valid_attrs |= SATTR_UID;
    }

    pub fn set_gid(&mut self, gid: u32) {
        self.gid = gid;
        self.valid_attrs |= SATTR_GID;
    }

    pub fn set_atime(&mut self, secs: i64, nsecs: u32) {
        self.atime_secs = secs;
        self.atime_nsecs = nsecs;
        self.valid_attrs |= SATTR_ATIME;
    }

    pub fn set_mtime(&mut self, secs: i64, nsecs: u32) {
        self.mtime_secs = secs;
        self.mtime_nsecs = nsecs;
        self.valid_attrs |= SATTR_MTIME;
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = size;
        self.valid_attrs |= SATTR_SIZE;
    }
}
