//! Host side of dockerfuse.
//!
//! A FUSE mount whose every operation is forwarded, over the attached exec
//! stream of a running container, to the satellite process executing the
//! real syscalls inside that container:
//!
//! - [`rpc`]: one framed RPC peer per container, pending-call routing
//! - [`client`]: typed filesystem methods over the peer, errno decoding
//! - [`fs`]: the kernel-facing `fuser::Filesystem` adapter
//! - [`docker`]: container-control contract (upload + exec-attach)

pub mod client;
pub mod docker;
pub mod fs;
pub mod rpc;
