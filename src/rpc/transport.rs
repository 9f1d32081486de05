//! Framed transport tasks: the reader loop and the single writer.
//!
//! Both tasks are generic over their stream so integration tests can drive
//! the full pipeline through [`tokio::io::duplex`] pipes instead of real
//! stdio.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::rpc::codec::JsonRpcCodec;
use crate::rpc::endpoint::{RpcEndpoint, RpcHandler};
use crate::rpc::message;
use crate::{AppError, Result};

/// Recommended bound for the outbound frame queue.
///
/// Senders await capacity once the queue is full, which suspends backend
/// event consumption until the host drains — the backpressure mechanism.
pub const OUTBOUND_QUEUE_FRAMES: usize = 10_000;

/// Reader loop — decodes NDJSON frames and feeds the endpoint.
///
/// Each non-empty line is parsed as JSON. Parse failures produce a
/// `-32700` response with id `null`; oversized lines are discarded with a
/// warning and the stream continues. EOF fires `cancel` to begin graceful
/// shutdown.
///
/// # Errors
///
/// Returns `Ok(())` on EOF or cancellation. Unrecoverable I/O errors on the
/// underlying stream also fire `cancel` and return the error.
pub async fn run_reader<R>(
    input: R,
    endpoint: Arc<RpcEndpoint>,
    handler: Arc<dyn RpcHandler>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(input, JsonRpcCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("transport reader: cancellation received, stopping");
                return Ok(());
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!("transport reader: EOF, initiating shutdown");
                        cancel.cancel();
                        return Ok(());
                    }

                    Some(Err(AppError::Protocol(ref msg))) => {
                        // Oversized line: the partial frame is gone, the
                        // stream itself is still usable.
                        warn!(error = msg.as_str(), "transport reader: frame discarded");
                    }

                    Some(Err(err)) => {
                        warn!(%err, "transport reader: stream error, initiating shutdown");
                        cancel.cancel();
                        return Err(err);
                    }

                    Some(Ok(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<serde_json::Value>(trimmed) {
                            Ok(frame) => endpoint.dispatch(frame, &handler),
                            Err(err) => {
                                debug!(%err, "transport reader: undecodable frame");
                                let response = message::parse_error_frame(&err.to_string());
                                if endpoint.send_raw(response).await.is_err() {
                                    return Ok(());
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Writer task — serialises queued frames as `\n`-terminated JSON lines.
///
/// The single consumer of the outbound queue; no two frames can interleave
/// on the output stream. Exits when `cancel` fires (after flushing frames
/// already queued) or when all senders drop.
///
/// On a write failure the task logs, fires `cancel` so the process begins
/// shutdown, and stops writing; dropping the queue on return unblocks any
/// senders waiting on capacity.
///
/// # Errors
///
/// Returns [`AppError::Io`] after a write failure.
pub async fn run_writer<W>(
    output: W,
    mut frame_rx: mpsc::Receiver<serde_json::Value>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut output = output;
    let mut write_failure: Option<AppError> = None;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("transport writer: cancellation received, flushing queue");
                // Final responses may already be queued; get them out before
                // the stream closes.
                while write_failure.is_none() {
                    let Ok(frame) = frame_rx.try_recv() else { break };
                    if let Err(err) = write_frame(&mut output, &frame).await {
                        write_failure = Some(err);
                    }
                }
                break;
            }

            frame = frame_rx.recv() => {
                let Some(frame) = frame else {
                    debug!("transport writer: queue closed, stopping");
                    break;
                };

                if write_failure.is_some() {
                    continue;
                }

                if let Err(err) = write_frame(&mut output, &frame).await {
                    warn!(%err, "transport writer: write failed, initiating shutdown");
                    write_failure = Some(err);
                    cancel.cancel();
                }
            }
        }
    }

    match write_failure {
        Some(err) => Err(err),
        None => {
            let _ = output.flush().await;
            Ok(())
        }
    }
}

async fn write_frame<W>(output: &mut W, frame: &serde_json::Value) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut bytes = serde_json::to_vec(frame)
        .map_err(|err| AppError::Internal(format!("unserialisable frame: {err}")))?;
    bytes.push(b'\n');
    write_line(output, &bytes)
        .await
        .map_err(|err| AppError::Io(err.to_string()))
}

async fn write_line<W>(output: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    output.write_all(bytes).await?;
    output.flush().await
}
