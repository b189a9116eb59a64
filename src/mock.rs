//! Scripted transport used by the unit tests.

use crate::base::{Error, Result};
use crate::transport::{closed_error, Transport};
use byteorder::{BigEndian, WriteBytesExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Device side of a `MockTransport`.
pub(crate) trait SimDevice: Send {
    /// Called with every buffer the host sends; returns the bytes the device answers with.
    fn on_send(&mut self, bytes: &[u8]) -> Vec<u8>;

    /// Called when the host polls and nothing is queued.
    fn on_idle(&mut self) -> Vec<u8> {
        Vec::new()
    }

    /// Called when the host changes its line rate.
    fn on_baud(&mut self, _baud: u32) {}
}

/// Plays back a fixed byte sequence and ignores requests.
pub(crate) struct Script {
    bytes: Option<Vec<u8>>,
}

impl Script {
    pub fn fixed(bytes: Vec<u8>) -> Script {
        Script { bytes: Some(bytes) }
    }
}

impl SimDevice for Script {
    fn on_send(&mut self, _bytes: &[u8]) -> Vec<u8> {
        Vec::new()
    }

    fn on_idle(&mut self) -> Vec<u8> {
        self.bytes.take().unwrap_or_default()
    }
}

/// Observation and fault injection handle shared with the test.
#[derive(Default)]
pub(crate) struct MockStats {
    sent: Mutex<Vec<Vec<u8>>>,
    baud_changes: Mutex<Vec<u32>>,
    closed: AtomicBool,
    disconnected: AtomicBool,
    disconnect_after: AtomicUsize,
}

impl MockStats {
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    /// Breaks the link right after the `n`th send has been delivered.
    pub fn disconnect_after_sends(&self, n: usize) {
        self.disconnect_after.store(n, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn baud_changes(&self) -> Vec<u32> {
        self.baud_changes
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default()
    }
}

pub(crate) struct MockTransport {
    device: Box<dyn SimDevice>,
    inbound: VecDeque<u8>,
    chunk: usize,
    stats: Arc<MockStats>,
}

impl MockTransport {
    pub fn new(device: impl SimDevice + 'static) -> (MockTransport, Arc<MockStats>) {
        let stats = Arc::new(MockStats::default());
        let transport = MockTransport {
            device: Box::new(device),
            inbound: VecDeque::new(),
            chunk: usize::MAX,
            stats: stats.clone(),
        };
        (transport, stats)
    }

    /// Deliver at most `n` bytes per receive call.
    pub fn chunked(mut self, n: usize) -> MockTransport {
        self.chunk = n.max(1);
        self
    }

    fn check_link(&self) -> Result<()> {
        if self.stats.is_closed() {
            return Err(closed_error());
        }
        if self.stats.disconnected.load(Ordering::SeqCst) {
            return Err(Error::io("connection reset by peer"));
        }
        Ok(())
    }
}

impl Transport for MockTransport {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.check_link()?;
        let count = {
            let mut sent = self
                .stats
                .sent
                .lock()
                .map_err(|_| Error::io("mock poisoned"))?;
            sent.push(data.to_vec());
            sent.len()
        };
        let answer = self.device.on_send(data);
        self.inbound.extend(answer);

        let limit = self.stats.disconnect_after.load(Ordering::SeqCst);
        if limit != 0 && count >= limit {
            self.stats.disconnect();
        }
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.check_link()?;
        if self.inbound.is_empty() {
            let produced = self.device.on_idle();
            self.inbound.extend(produced);
        }
        if self.inbound.is_empty() {
            thread::sleep(timeout.min(Duration::from_millis(2)));
            return Err(Error::timeout("no bytes received"));
        }

        let n = self.chunk.min(buf.len()).min(self.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.check_link()?;
        if let Ok(mut changes) = self.stats.baud_changes.lock() {
            changes.push(baud);
        }
        self.device.on_baud(baud);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.stats.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.stats.is_closed()
    }
}

/// One output channel of a simulated LMS 5xx scan.
pub(crate) struct SimChannel {
    content: &'static str,
    scale: f32,
    values: Vec<u16>,
}

impl SimChannel {
    /// 16-bit channel.
    pub fn wide(content: &'static str, scale: f32, values: Vec<u16>) -> SimChannel {
        SimChannel {
            content,
            scale,
            values,
        }
    }

    /// 8-bit channel.
    pub fn narrow(content: &'static str, values: Vec<u8>) -> SimChannel {
        SimChannel {
            content,
            scale: 1.0,
            values: values.into_iter().map(u16::from).collect(),
        }
    }
}

/// Builds the arguments of an `LMDscandata` telegram.
pub(crate) fn scan_data_args(
    scan_counter: u16,
    device_status: u16,
    start_angle: i32,
    angular_step: u16,
    wide: &[SimChannel],
    narrow: &[SimChannel],
) -> Vec<u8> {
    let mut args = Vec::new();
    args.write_u16::<BigEndian>(1).unwrap();
    args.write_u16::<BigEndian>(1).unwrap();
    args.write_u32::<BigEndian>(0x0123_4567).unwrap();
    args.write_u16::<BigEndian>(device_status).unwrap();
    args.write_u16::<BigEndian>(scan_counter).unwrap();
    args.write_u16::<BigEndian>(scan_counter).unwrap();
    args.write_u32::<BigEndian>(1000).unwrap();
    args.write_u32::<BigEndian>(1010).unwrap();
    args.extend_from_slice(&[0; 6]);
    args.write_u32::<BigEndian>(2500).unwrap();
    args.write_u32::<BigEndian>(36).unwrap();
    args.write_u16::<BigEndian>(0).unwrap();

    for (channels, is_wide) in [(wide, true), (narrow, false)].iter() {
        args.write_u16::<BigEndian>(channels.len() as u16).unwrap();
        for channel in channels.iter() {
            args.extend_from_slice(channel.content.as_bytes());
            args.write_f32::<BigEndian>(channel.scale).unwrap();
            args.write_f32::<BigEndian>(0.0).unwrap();
            args.write_i32::<BigEndian>(start_angle).unwrap();
            args.write_u16::<BigEndian>(angular_step).unwrap();
            args.write_u16::<BigEndian>(channel.values.len() as u16).unwrap();
            for value in channel.values.iter() {
                if *is_wide {
                    args.write_u16::<BigEndian>(*value).unwrap();
                } else {
                    args.write_u8(*value as u8).unwrap();
                }
            }
        }
    }
    args
}
