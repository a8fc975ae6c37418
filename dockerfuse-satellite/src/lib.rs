//! Satellite internals, exposed as a library so the host crate's
//! integration tests can run the service in-process over a socket pair.

pub mod fsops;
pub mod serve;

pub use fsops::FsOps;
pub use serve::serve;
