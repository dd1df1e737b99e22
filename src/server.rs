//! EPOS connection dispatcher
//!
//! Accepts one till connection at a time and shuttles frames between the
//! socket and the device adapter. Reading never stops while an operation
//! runs: the operation blocks a worker thread, and the prompt answers it
//! waits for arrive on this same socket.
//!
//! All outbound frames funnel through one writer channel per connection
//! so interim prompts and the final reply cannot interleave mid-frame.

use crate::codec::{DecodedFrame, FrameDecoder};
use crate::constants::{CHANNEL_CAPACITY, READ_BUFFER_SIZE};
use crate::device::{self, DeviceAdapter};
use crate::error::{GatewayError, Result};
use crate::protocol::{RequestKind, Response};
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Bind the EPOS port and serve connections until the task is cancelled
pub async fn run(listen_port: u16, adapter: Arc<DeviceAdapter>) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", listen_port))
        .await
        .map_err(|e| GatewayError::Bind {
            port: listen_port,
            source: e,
        })?;
    info!("listening for EPOS connections on port {}", listen_port);
    serve(listener, adapter).await
}

/// Accept loop over an already-bound listener
///
/// One till at a time; a fresh connection supersedes the previous one so
/// a half-dead socket can never wedge the gateway.
pub async fn serve(listener: TcpListener, adapter: Arc<DeviceAdapter>) -> Result<()> {
    let mut active: Option<tokio::task::JoinHandle<()>> = None;

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                info!("EPOS connected from {}", peer);
                if let Some(previous) = active.take() {
                    if !previous.is_finished() {
                        warn!("new EPOS connection supersedes the previous one");
                    }
                    previous.abort();
                    // The aborted task never reaches its own teardown, so
                    // detach its binding here: wakes any callback blocked on
                    // the old till's answer before the new till binds
                    adapter.supersede_client();
                }

                let conn_adapter = adapter.clone();
                active = Some(tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, conn_adapter).await {
                        warn!("EPOS connection ended abnormally: {}", e);
                    }
                    info!("EPOS connection closed");
                }));
            }
            Err(e) => warn!("accept failed: {}", e),
        }
    }
}

/// Drive one connection: decode frames, route them, write replies
async fn serve_connection(stream: TcpStream, adapter: Arc<DeviceAdapter>) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    let (tx, mut rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
    adapter.bind_client(tx.clone());

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = writer.write_all(&frame).await {
                debug!("write to EPOS failed: {}", e);
                break;
            }
        }
    });

    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    'read: loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| GatewayError::ClientIo { source: e })?;
        if n == 0 {
            break;
        }

        for frame in decoder.feed(&buf[..n]) {
            match frame {
                DecodedFrame::Request(request) => match request.kind {
                    RequestKind::CloseConnection => {
                        debug!("EPOS requested connection close");
                        break 'read;
                    }
                    // Answer to an outstanding prompt; never an operation.
                    // Deposit may block until the callback collects it, so
                    // it runs off the reader task.
                    RequestKind::Response => {
                        let adapter = adapter.clone();
                        tokio::task::spawn_blocking(move || adapter.deposit_reply(request));
                    }
                    _ => {
                        // The operation blocks its worker for the whole
                        // cardholder interaction; keep reading meanwhile so
                        // prompt answers get through.
                        let adapter = adapter.clone();
                        let reply_tx = tx.clone();
                        tokio::spawn(async move {
                            let outcome =
                                tokio::task::spawn_blocking(move || adapter.handle(&request))
                                    .await;
                            match outcome {
                                Ok(response) => {
                                    let _ =
                                        reply_tx.send(device::encode_reply(&response)).await;
                                }
                                Err(e) => error!("operation worker failed: {}", e),
                            }
                        });
                    }
                },
                DecodedFrame::Malformed { reason } => {
                    warn!("malformed frame from EPOS: {}", reason);
                    let response = Response::error("Malformed request.");
                    if tx.send(device::encode_reply(&response)).await.is_err() {
                        break 'read;
                    }
                }
                DecodedFrame::ConnectionClosed => {
                    debug!("EPOS signalled end of stream");
                    break 'read;
                }
            }
        }
    }

    // Unblock any callback still waiting on a prompt answer before the
    // writer drains
    adapter.client_gone(&tx);
    drop(tx);
    let _ = writer_task.await;
    Ok(())
}
