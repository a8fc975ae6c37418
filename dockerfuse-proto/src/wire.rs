//! Wire framing for the filesystem RPC service.
//!
//! A single bidirectional byte stream carries every call: the satellite's
//! stdin/stdout on one end, the exec-attach stream on the other. Each call
//! is one [`WireRequest`] frame; each result is one [`WireResponse`] frame
//! whose `unique` echoes the request so replies may arrive out of order.
//!
//! A response is either a typed success record or a transport-level error
//! string (`errno: <SYM>`, or the reserved `EOF`); there are no mixed
//! states.

use crate::types::*;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// Name of the single RPC service both peers speak.
pub const SERVICE_NAME: &str = "DockerFuseFSOps";

/// Maximum message size (16 MB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// A call to one method of the service.
///
/// The variant carries the method name; together with [`SERVICE_NAME`] it
/// addresses `DockerFuseFSOps.<Op>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FsRequest {
    Stat(StatRequest),
    ReadDir(ReadDirRequest),
    Open(OpenRequest),
    Close(CloseRequest),
    Read(ReadRequest),
    Seek(SeekRequest),
    Write(WriteRequest),
    Unlink(UnlinkRequest),
    Fsync(FsyncRequest),
    Mkdir(MkdirRequest),
    Rmdir(RmdirRequest),
    Rename(RenameRequest),
    Readlink(ReadlinkRequest),
    Link(LinkRequest),
    Symlink(SymlinkRequest),
    SetAttr(SetAttrRequest),
}

impl FsRequest {
    /// The method name, for logging.
    pub fn op_name(&self) -> &'static str {
        match self {
            FsRequest::Stat(_) => "Stat",
            FsRequest::ReadDir(_) => "ReadDir",
            FsRequest::Open(_) => "Open",
            FsRequest::Close(_) => "Close",
            FsRequest::Read(_) => "Read",
            FsRequest::Seek(_) => "Seek",
            FsRequest::Write(_) => "Write",
            FsRequest::Unlink(_) => "Unlink",
            FsRequest::Fsync(_) => "Fsync",
            FsRequest::Mkdir(_) => "Mkdir",
            FsRequest::Rmdir(_) => "Rmdir",
            FsRequest::Rename(_) => "Rename",
            FsRequest::Readlink(_) => "Readlink",
            FsRequest::Link(_) => "Link",
            FsRequest::Symlink(_) => "Symlink",
            FsRequest::SetAttr(_) => "SetAttr",
        }
    }
}

/// The success record for each method of [`FsRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FsReply {
    Stat(StatReply),
    ReadDir(ReadDirReply),
    Open(OpenReply),
    Close(CloseReply),
    Read(ReadReply),
    Seek(SeekReply),
    Write(WriteReply),
    Unlink(UnlinkReply),
    Fsync(FsyncReply),
    Mkdir(MkdirReply),
    Rmdir(RmdirReply),
    Rename(RenameReply),
    Readlink(ReadlinkReply),
    Link(LinkReply),
    Symlink(SymlinkReply),
    SetAttr(SetAttrReply),
}

/// Wire message wrapping a request with routing information.
///
/// `unique` is the request id for matching responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRequest {
    pub unique: u64,
    pub request: FsRequest,
}

impl WireRequest {
    pub fn new(unique: u64, request: FsRequest) -> Self {
        Self { unique, request }
    }

    /// Serialize to bytes with length prefix.
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        encode_frame(self)
    }

    /// Deserialize from bytes (without length prefix).
    pub fn decode(data: &[u8]) -> io::Result<Self> {
        bincode::deserialize(data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Wire message wrapping a result with routing information.
///
/// The `Err` string is the transport-level error text defined by
/// [`crate::errno`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireResponse {
    pub unique: u64,
    pub result: Result<FsReply, String>,
}

impl WireResponse {
    pub fn new(unique: u64, result: Result<FsReply, String>) -> Self {
        Self { unique, result }
    }

    /// Serialize to bytes with length prefix.
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        encode_frame(self)
    }

    /// Deserialize from bytes (without length prefix).
    pub fn decode(data: &[u8]) -> io::Result<Self> {
        bincode::deserialize(data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

fn encode_frame<T: Serialize>(value: &T) -> io::Result<Vec<u8>> {
    let payload =
        bincode::serialize(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {} bytes", payload.len()),
        ));
    }

    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Read a length-prefixed message from a reader.
///
/// Returns the raw payload bytes (without the length prefix).
pub fn read_message<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {len} bytes"),
        ));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Write a length-prefixed message to a writer.
pub fn write_message<W: Write>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {} bytes", data.len()),
        ));
    }

    writer.write_all(&(data.len() as u32).to_be_bytes())?;
    writer.write_all(data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_wire_request_encode_decode() {
        let req = WireRequest::new(
            42,
            FsRequest::Stat(StatRequest {
                full_path: "/a".into(),
            }),
        );

        let encoded = req.encode().unwrap();

        // Verify length prefix
        let len = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]) as usize;
        assert_eq!(len, encoded.len() - 4);

        let decoded = WireRequest::decode(&encoded[4..]).unwrap();
        assert_eq!(req, decoded);
    }

    #[test]
    fn test_wire_response_encode_decode() {
        let resp = WireResponse::new(
            42,
            Ok(FsReply::Read(ReadReply {
                data: vec![1, 2, 3, 4, 5],
            })),
        );

        let encoded = resp.encode().unwrap();
        let decoded = WireResponse::decode(&encoded[4..]).unwrap();
        assert_eq!(resp, decoded);
    }

    #[test]
    fn test_error_response_roundtrip() {
        let resp = WireResponse::new(7, Err("errno: ENOENT".into()));
        let encoded = resp.encode().unwrap();
        let decoded = WireResponse::decode(&encoded[4..]).unwrap();
        assert_eq!(decoded.result, Err("errno: ENOENT".into()));
    }

    #[test]
    fn test_read_write_message() {
        let data = b"hello world";
        let mut buf = Vec::new();

        write_message(&mut buf, data).unwrap();

        let mut cursor = Cursor::new(buf);
        let read_data = read_message(&mut cursor).unwrap();

        assert_eq!(read_data, data);
    }

    #[test]
    fn test_message_too_large() {
        let huge = vec![0u8; MAX_MESSAGE_SIZE + 1];
        let mut buf = Vec::new();
        assert!(write_message(&mut buf, &huge).is_err());
    }

    #[test]
    fn test_op_names() {
        let req = FsRequest::Open(OpenRequest {
            full_path: "/f".into(),
            sa_flags: 0,
            mode: 0o644,
        });
        assert_eq!(req.op_name(), "Open");
        assert_eq!(SERVICE_NAME, "DockerFuseFSOps");
    }
}
