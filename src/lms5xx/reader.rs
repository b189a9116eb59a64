//! Background reader for continuous LMS 5xx scan output.
//!
//! While streaming, the reader thread owns the channel and drains it into a bounded queue.
//! When the queue is full the oldest scan is dropped, so `recv` always yields the most
//! recent scan. A transport failure is queued as an error and ends the thread.

use super::cmds::LMS5XX_SCAN_DATA;
use super::protocol::{Lms5xxProtocol, Method};
use super::telegram::ScanData;
use crate::base::{Channel, Error, Result};
use crate::internals::{LMS5XX_SCAN_QUEUE_DEPTH, POLL_INTERVAL};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, error, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub(crate) struct ScanReader {
    shutdown: Arc<AtomicBool>,
    scans: Receiver<Result<ScanData>>,
    handle: Option<JoinHandle<Channel<Lms5xxProtocol>>>,
}

impl ScanReader {
    /// Moves `channel` to a new reader thread.
    pub fn spawn(channel: Channel<Lms5xxProtocol>) -> Result<ScanReader> {
        let (tx, rx) = bounded(LMS5XX_SCAN_QUEUE_DEPTH);
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let shutdown = shutdown.clone();
            let drain = rx.clone();
            thread::Builder::new()
                .name("lms5xx-reader".to_owned())
                .spawn(move || reader_loop(channel, shutdown, tx, drain))
                .map_err(|e| Error::io(format!("cannot start reader thread: {}", e)))?
        };
        info!("Scan reader started");

        Ok(ScanReader {
            shutdown,
            scans: rx,
            handle: Some(handle),
        })
    }

    /// Waits up to `timeout` for the next scan.
    pub fn recv(&self, timeout: Duration) -> std::result::Result<Result<ScanData>, RecvTimeoutError> {
        self.scans.recv_timeout(timeout)
    }

    /// Stops the thread and hands the channel back. `None` if the thread panicked.
    pub fn stop(mut self) -> Option<Channel<Lms5xxProtocol>> {
        self.shutdown.store(true, Ordering::Relaxed);
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(channel) => {
                debug!("Scan reader stopped");
                Some(channel)
            }
            Err(_) => {
                error!("Scan reader thread panicked");
                None
            }
        }
    }
}

impl Drop for ScanReader {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

/// Queues `item`, evicting the oldest unread scan if the queue is full.
fn publish(scans: &Sender<Result<ScanData>>, drain: &Receiver<Result<ScanData>>, item: Result<ScanData>) {
    let mut item = item;
    loop {
        match scans.try_send(item) {
            Ok(()) => return,
            Err(TrySendError::Full(back)) => {
                if drain.try_recv().is_ok() {
                    trace!("Dropping unread scan");
                }
                item = back;
            }
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}

fn reader_loop(
    mut channel: Channel<Lms5xxProtocol>,
    shutdown: Arc<AtomicBool>,
    scans: Sender<Result<ScanData>>,
    drain: Receiver<Result<ScanData>>,
) -> Channel<Lms5xxProtocol> {
    while !shutdown.load(Ordering::Relaxed) {
        match channel.read_until(POLL_INTERVAL) {
            Ok(None) => {}
            Ok(Some(telegram)) => {
                let is_scan = telegram.name == LMS5XX_SCAN_DATA
                    && (telegram.method == Method::EventData || telegram.method == Method::ReadAnswer);
                if !is_scan {
                    trace!("Reader ignoring telegram {}", telegram);
                    continue;
                }
                match ScanData::parse(&telegram.args) {
                    Ok(scan) => publish(&scans, &drain, Ok(scan)),
                    Err(e) => warn!("Dropping malformed scan: {}", e),
                }
            }
            Err(e) => {
                error!("Reader stopping on transport error: {}", e);
                publish(&scans, &drain, Err(e));
                break;
            }
        }
    }

    info!("Scan reader exiting");
    channel
}
