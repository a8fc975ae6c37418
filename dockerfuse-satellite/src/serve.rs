//! RPC serve loop over a single bidirectional byte stream.
//!
//! The satellite reads request frames from its standard input and writes
//! reply frames to its standard output; the host's exec-attach socket is
//! the other end of the same stream. Requests are dispatched concurrently
//! and replies may be written out of order, the `unique` id routes them.
//!
//! Serving terminates when the stream reports end-of-file, which is how
//! the host hangs up.

use crate::fsops::FsOps;
use crossbeam_channel::{unbounded, Receiver, Sender};
use dockerfuse_proto::wire::{read_message, WireRequest, WireResponse};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// Serve requests from `reader`, writing replies to `writer`, until EOF.
pub fn serve<R, W>(fsops: Arc<FsOps>, mut reader: R, writer: W) -> io::Result<()>
where
    R: Read,
    W: Write + Send + 'static,
{
    let (reply_tx, reply_rx) = unbounded::<WireResponse>();
    let writer_thread = thread::spawn(move || writer_loop(writer, reply_rx));

    loop {
        let frame = match read_message(&mut reader) {
            Ok(frame) => frame,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                info!("stream closed by peer");
                break;
            }
            Err(e) => {
                // A framing error leaves the stream unsynchronized; there
                // is nothing sensible to do but hang up.
                drop(reply_tx);
                let _ = writer_thread.join();
                return Err(e);
            }
        };

        let request = match WireRequest::decode(&frame) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "undecodable request frame");
                drop(reply_tx);
                let _ = writer_thread.join();
                return Err(e);
            }
        };

        // One worker per in-flight request, like the RPC runtimes this
        // protocol grew up with. Handlers block on filesystem syscalls.
        let fsops = Arc::clone(&fsops);
        let reply_tx = reply_tx.clone();
        thread::spawn(move || {
            let unique = request.unique;
            let result = fsops.handle(request.request);
            // The receiver is gone only during shutdown.
            let _ = reply_tx.send(WireResponse::new(unique, result));
        });
    }

    drop(reply_tx);
    writer_thread
        .join()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "writer thread panicked"))?
}

fn writer_loop<W: Write>(mut writer: W, replies: Receiver<WireResponse>) -> io::Result<()> {
    while let Ok(response) = replies.recv() {
        let frame = response.encode()?;
        // encode() already prefixed the length.
        writer.write_all(&frame)?;
        writer.flush()?;
        debug!(unique = response.unique, "reply written");
    }
    Ok(())
}

/// Issue a single call over a framed stream and wait for its reply.
pub fn call_once<S: Read + Write>(stream: &mut S, request: WireRequest) -> io::Result<WireResponse> {
    let frame = request.encode()?;
    stream.write_all(&frame)?;
    stream.flush()?;
    let reply = read_message(stream)?;
    WireResponse::decode(&reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockerfuse_proto::prelude::*;
    use dockerfuse_proto::wire::FsRequest;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_serve_answers_until_eof() {
        let (mut host, satellite) = UnixStream::pair().unwrap();
        let fsops = Arc::new(FsOps::new());

        let server = thread::spawn({
            let fsops = Arc::clone(&fsops);
            let reader = satellite.try_clone().unwrap();
            move || serve(fsops, reader, satellite)
        });

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"abc").unwrap();

        let response = call_once(
            &mut host,
            WireRequest::new(
                1,
                FsRequest::Stat(StatRequest {
                    full_path: path.to_string_lossy().into_owned(),
                }),
            ),
        )
        .unwrap();
        assert_eq!(response.unique, 1);
        match response.result {
            Ok(dockerfuse_proto::FsReply::Stat(stat)) => assert_eq!(stat.size, 3),
            other => panic!("unexpected response: {other:?}"),
        }

        let response = call_once(
            &mut host,
            WireRequest::new(
                2,
                FsRequest::Close(CloseRequest { fd: 99 }),
            ),
        )
        .unwrap();
        assert_eq!(response.result, Err("errno: EINVAL".into()));

        // Hanging up ends the serve loop cleanly.
        drop(host);
        server.join().unwrap().unwrap();
    }
}
