//! RA receive loop
//!
//! One tokio task per started filter. The socket read happens outside the
//! filter lock; `process_ra` runs on the blocking pool since installing a
//! program touches the filesystem.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::apf_filter::ApfFilter;
use crate::capture::Capture;
use crate::protocol::ethernet;
use crate::telemetry::RaStats;
use crate::Error;

/// Pause after a failed read before trying again.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Handle to a running receive loop
#[derive(Debug)]
pub(crate) struct ReceiveHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReceiveHandle {
    /// Ask the loop to stop. Does not wait for it.
    pub(crate) fn halt(&self) {
        let _ = self.cancel.send(true);
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

pub(crate) fn spawn<C: Capture + 'static>(filter: Arc<ApfFilter>, capture: C) -> ReceiveHandle {
    let (cancel, stopped) = watch::channel(false);
    let task = tokio::spawn(receive_loop(filter, capture, stopped));
    ReceiveHandle { cancel, task }
}

async fn receive_loop<C: Capture>(
    filter: Arc<ApfFilter>,
    mut capture: C,
    mut stopped: watch::Receiver<bool>,
) {
    let name = filter.interface().name.clone();
    let stats = RaStats::new();
    let metrics = filter.metrics();
    let started = Instant::now();
    let mut buf = vec![0u8; ethernet::MAX_FRAME_SIZE];

    loop {
        tokio::select! {
            _ = stopped.changed() => break,
            result = capture.recv(&mut buf) => match result {
                Ok(rx) => {
                    let frame = buf[..rx.len].to_vec();
                    let worker = filter.clone();
                    match tokio::task::spawn_blocking(move || worker.process_ra(&frame)).await {
                        Ok(outcome) => {
                            stats.record(outcome);
                            metrics.ra.record(outcome);
                        }
                        Err(e) => error!("APF ({}): RA processing failed: {}", name, e),
                    }
                }
                Err(e) => {
                    if *stopped.borrow() {
                        break;
                    }
                    error!("APF ({}): read error: {}", name, e);
                    if is_fatal(&e) {
                        break;
                    }
                    tokio::select! {
                        _ = stopped.changed() => break,
                        _ = tokio::time::sleep(READ_ERROR_BACKOFF) => {}
                    }
                }
            },
        }
    }

    // Closing the socket ends any pending read.
    drop(capture);

    info!(
        received = stats.received.get(),
        matching = stats.matching.get(),
        dropped = stats.dropped.get(),
        parse_errors = stats.parse_errors.get(),
        zero_lifetime = stats.zero_lifetime.get(),
        program_updates = stats.program_updates.get(),
        duration_secs = started.elapsed().as_secs(),
        max_program_size = filter.capabilities().max_program_size,
        "APF ({}): receive loop stopped",
        name
    );
}

/// Errors after which the capture can never deliver another frame.
fn is_fatal(e: &Error) -> bool {
    match e {
        Error::Io(err) => {
            err.raw_os_error() == Some(libc::EBADF)
                || matches!(
                    err.kind(),
                    io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof
                )
        }
        _ => false,
    }
}
