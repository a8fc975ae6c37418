//! Wire protocol for mounting a container's filesystem over an exec stream.
//!
//! `dockerfuse-proto` defines everything the host and the in-container
//! satellite must agree on:
//!
//! - **Errno codec**: portable symbolic errno names carried as text
//! - **Flag codec**: system-agnostic `open(2)` flag bits
//! - **Types**: request/reply records for every filesystem operation
//! - **Wire**: length-prefixed framing with out-of-order reply routing
//!
//! # Frame Format
//!
//! ```text
//! +----------+----------+
//! |  length  | payload  |
//! | (4 bytes)| (N bytes)|
//! +----------+----------+
//! ```
//!
//! Messages are length-prefixed with a big-endian u32, followed by a
//! bincode-serialized [`WireRequest`] or [`WireResponse`].

pub mod errno;
pub mod flags;
pub mod types;
pub mod wire;

pub use errno::{errno_to_sym, errno_to_wire, sym_to_errno, wire_to_errno, EOF_ERROR, ERRNO_PREFIX};
pub use types::{
    DirEntry, SetAttrRequest, StatReply, SATTR_ATIME, SATTR_GID, SATTR_MODE, SATTR_MTIME,
    SATTR_SIZE, SATTR_UID, UTIME_OMIT,
};
pub use wire::{
    read_message, write_message, FsReply, FsRequest, WireResponse, WireRequest, MAX_MESSAGE_SIZE,
    SERVICE_NAME,
};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::types::*;
    pub use crate::wire::{FsReply, FsRequest, WireResponse, WireRequest};
}
