mod channel;
mod error;
mod traits;

pub use self::channel::Channel;
pub use self::error::{Error, ErrorKind, Result};
pub use self::traits::{ProtocolDecoder, ProtocolEncoder};
