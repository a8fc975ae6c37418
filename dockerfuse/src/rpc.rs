//! RPC peer sharing one container connection across kernel callbacks.
//!
//! Uses crossbeam channels for request submission and DashMap for response
//! routing: a dedicated writer thread sends request frames, a dedicated
//! reader thread receives reply frames and routes each to the caller that
//! registered its `unique` id, so replies may arrive out of order.

use crossbeam_channel::{bounded, Receiver, Sender};
use dashmap::DashMap;
use dockerfuse_proto::wire::{FsReply, FsRequest, WireRequest, WireResponse, MAX_MESSAGE_SIZE};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Transport-level error text used when the stream itself fails; the errno
/// decoder maps it to `EIO`.
const CONNECTION_LOST: &str = "connection lost";

type CallResult = Result<FsReply, String>;

/// A pending call with its response channel.
struct PendingCall {
    /// Pre-serialized request bytes (length prefix + body).
    data: Vec<u8>,
    /// Oneshot channel back to the waiting caller.
    response_tx: Sender<CallResult>,
    /// Unique request id for response routing.
    unique: u64,
}

/// Shared RPC peer for all kernel callback threads.
pub struct RpcPeer {
    request_tx: Sender<PendingCall>,
    next_id: AtomicU64,
}

impl RpcPeer {
    /// Create a peer over the two halves of a bidirectional byte stream.
    ///
    /// Spawns the writer and reader threads; they exit when the stream
    /// closes, failing every call still in flight.
    pub fn new<R, W>(reader: R, writer: W) -> Arc<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        // Bounded to provide backpressure against a stalled stream.
        let (request_tx, request_rx) = bounded::<PendingCall>(64);

        let pending: Arc<DashMap<u64, Sender<CallResult>>> = Arc::new(DashMap::new());
        let pending_for_writer = Arc::clone(&pending);
        let pending_for_reader = Arc::clone(&pending);

        std::thread::spawn(move || writer_loop(writer, request_rx, pending_for_writer));
        std::thread::spawn(move || reader_loop(reader, pending_for_reader));

        Arc::new(Self {
            request_tx,
            next_id: AtomicU64::new(1),
        })
    }

    /// Issue one call and block until its reply arrives.
    ///
    /// Transport failures surface as `Err(CONNECTION_LOST)`-style strings,
    /// which decode to `EIO`; this method never panics on a dead stream.
    pub fn call(&self, request: FsRequest) -> CallResult {
        let unique = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(unique, op = request.op_name(), "issuing call");

        let data = match WireRequest::new(unique, request).encode() {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "failed to encode request");
                return Err(CONNECTION_LOST.to_string());
            }
        };

        let (response_tx, response_rx) = bounded::<CallResult>(1);
        let call = PendingCall {
            data,
            response_tx,
            unique,
        };

        if self.request_tx.send(call).is_err() {
            return Err(CONNECTION_LOST.to_string());
        }

        response_rx
            .recv()
            .unwrap_or_else(|_| Err(CONNECTION_LOST.to_string()))
    }
}

/// Writer thread: registers the pending call, then writes its frame.
fn writer_loop<W: Write>(
    mut writer: W,
    request_rx: Receiver<PendingCall>,
    pending: Arc<DashMap<u64, Sender<CallResult>>>,
) {
    while let Ok(call) = request_rx.recv() {
        // Register before writing so the reply cannot race the insert.
        pending.insert(call.unique, call.response_tx);

        if writer.write_all(&call.data).is_err() || writer.flush().is_err() {
            if let Some((_, tx)) = pending.remove(&call.unique) {
                let _ = tx.send(Err(CONNECTION_LOST.to_string()));
            }
        }
    }
}

/// Reader thread: routes each reply frame to its registered caller.
fn reader_loop<R: Read>(mut reader: R, pending: Arc<DashMap<u64, Sender<CallResult>>>) {
    let mut len_buf = [0u8; 4];

    loop {
        if reader.read_exact(&mut len_buf).is_err() {
            fail_all_pending(&pending);
            break;
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_SIZE {
            warn!(len, "oversized reply frame, dropping");
            fail_all_pending(&pending);
            break;
        }

        let mut frame = vec![0u8; len];
        if reader.read_exact(&mut frame).is_err() {
            fail_all_pending(&pending);
            break;
        }

        match WireResponse::decode(&frame) {
            Ok(response) => {
                if let Some((_, tx)) = pending.remove(&response.unique) {
                    let _ = tx.send(response.result);
                } else {
                    warn!(unique = response.unique, "reply for unknown call");
                }
            }
            Err(e) => warn!(error = %e, "undecodable reply frame"),
        }
    }
}

/// Fail every outstanding call on disconnect.
fn fail_all_pending(pending: &DashMap<u64, Sender<CallResult>>) {
    // Collect keys first to avoid holding shard locks during send.
    let keys: Vec<u64> = pending.iter().map(|r| *r.key()).collect();
    for key in keys {
        if let Some((_, tx)) = pending.remove(&key) {
            let _ = tx.send(Err(CONNECTION_LOST.to_string()));
        }
    }
}
