//! # Sick LMS Driver
//!
//! `sicklms` drives Sick LMS 2xx (serial) and LMS 5xx (Ethernet) laser range-finders.
//! It opens the transport, negotiates the device configuration and copies range and
//! reflectance values into caller-supplied buffers.
//!
//! Every fallible operation returns an [`Error`] whose [`ErrorKind`] tells the caller how
//! to recover:
//! * `Config`: the request was invalid or not allowed now. The session stays usable.
//! * `Timeout`: nothing arrived in time. The call may be retried.
//! * `Io`: the transport failed. The session is faulted and must be uninitialized.
//!
//! ```no_run
//! use sicklms::{ErrorKind, Lms5xx, MeasurementSet};
//!
//! # fn main() -> sicklms::Result<()> {
//! let lms = Lms5xx::new("192.168.0.1:2111");
//! lms.initialize()?;
//!
//! let mut ranges = [0u32; 1082];
//! for _ in 0..100 {
//!     let mut set = MeasurementSet::new().with_ranges(0, &mut ranges);
//!     match lms.get_measurements(&mut set) {
//!         Ok(()) => println!("{} values", set.num_measurements()),
//!         Err(e) if e.kind() == ErrorKind::Timeout => continue,
//!         Err(e) => return Err(e),
//!     }
//! }
//! lms.uninitialize()
//! # }
//! ```

extern crate byteorder;
extern crate crossbeam_channel;
extern crate log;
extern crate serialport;

pub mod base;
mod checksum;
mod internals;
pub mod lms2xx;
pub mod lms5xx;
#[cfg(test)]
mod mock;
mod session;
pub mod transport;
pub mod types;

pub use crate::base::{Channel, Error, ErrorKind, Result};
pub use crate::lms2xx::Lms2xx;
pub use crate::lms5xx::{DeviceStatus, Lms5xx};
pub use crate::session::SessionState;
pub use crate::transport::{SerialTransport, TcpTransport, Transport};
pub use crate::types::{
    Baud, DeviceConfig, EchoFilter, MeasurementSet, ReflectanceResolution, ScanAngle,
    ScanDataFormat, ScanFrequency, ScanResolution, Timeouts, MAX_ECHO_CHANNELS,
};
