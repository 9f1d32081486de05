//! Tracing initialisation and buffered log-file duplication.
//!
//! All diagnostics go to stderr — stdout carries the protocol. When a log
//! file is configured, every formatted log event is additionally queued to
//! a buffered writer task that flushes every 5 seconds or every 50
//! entries, whichever comes first. When the file write fails, entries stay
//! buffered up to a cap of 200, dropping the oldest beyond it, and the
//! write is retried on the next flush.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use crate::{AppError, Result};

/// Flush interval for the log-file buffer.
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Entry count that forces a flush.
const FLUSH_EVERY: usize = 50;

/// Maximum entries retained while the file is unwritable.
const BUFFER_CAP: usize = 200;

/// Initialise tracing; returns the log-file task handle when one runs.
///
/// `debug` raises the default filter to `debug` (the `RUST_LOG` environment
/// variable still wins when set).
///
/// # Errors
///
/// Returns [`AppError::Config`] when the subscriber is already set.
pub fn init(
    debug: bool,
    log_file: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<Option<JoinHandle<()>>> {
    let default_filter = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    match log_file {
        None => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .try_init()
                .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?;
            Ok(None)
        }
        Some(path) => {
            let (entry_tx, entry_rx) = mpsc::unbounded_channel();
            fmt()
                .with_env_filter(env_filter)
                .with_writer(move || TeeWriter {
                    tx: entry_tx.clone(),
                    event: Vec::new(),
                })
                .try_init()
                .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?;

            let handle = tokio::spawn(run_file_buffer(
                path.to_path_buf(),
                entry_rx,
                cancel.clone(),
            ));
            Ok(Some(handle))
        }
    }
}

/// Writer that mirrors each formatted event to stderr and the file queue.
///
/// One writer is created per log event; the event's bytes accumulate and
/// are queued as a single entry when the writer drops.
struct TeeWriter {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    event: Vec<u8>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.event.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl Drop for TeeWriter {
    fn drop(&mut self) {
        if !self.event.is_empty() {
            let _ = self.tx.send(std::mem::take(&mut self.event));
        }
    }
}

/// Buffered log-file writer task.
async fn run_file_buffer(
    path: PathBuf,
    mut entry_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    cancel: CancellationToken,
) {
    let mut buffer: std::collections::VecDeque<Vec<u8>> = std::collections::VecDeque::new();
    let mut interval = tokio::time::interval(FLUSH_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                flush(&path, &mut buffer);
                break;
            }

            entry = entry_rx.recv() => {
                match entry {
                    None => {
                        flush(&path, &mut buffer);
                        break;
                    }
                    Some(entry) => {
                        buffer.push_back(entry);
                        if buffer.len() >= FLUSH_EVERY {
                            flush(&path, &mut buffer);
                        }
                    }
                }
            }

            _ = interval.tick() => {
                flush(&path, &mut buffer);
            }
        }
    }
}

/// Append buffered entries to the file; on failure keep at most
/// [`BUFFER_CAP`] entries, dropping the oldest.
fn flush(path: &Path, buffer: &mut std::collections::VecDeque<Vec<u8>>) {
    if buffer.is_empty() {
        return;
    }

    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| {
            for entry in buffer.iter() {
                file.write_all(entry)?;
            }
            file.flush()
        });

    match result {
        Ok(()) => buffer.clear(),
        Err(err) => {
            // Cannot log through tracing here without recursing; stderr only.
            let _ = writeln!(io::stderr(), "log file write failed: {err}");
            while buffer.len() > BUFFER_CAP {
                buffer.pop_front();
            }
        }
    }
}
