use crate::base::error::Result;

/// Defines the behavior for decoding byte streams into frames.
///
/// Decoders are stateful: bytes handed to `decode` are retained internally until they
/// either form a complete frame or are discarded during resynchronization. Calling
/// `decode` with an empty slice drains frames already buffered.
pub trait ProtocolDecoder {
    /// The unit produced by the decoder.
    type Frame;

    /// Feeds `buf` to the decoder and attempts to produce one frame.
    ///
    /// Returns a tuple:
    /// * The number of bytes consumed from `buf`.
    /// * `Some(frame)` if a complete, valid frame was recovered, or `None` if more data is needed.
    ///
    /// Corrupted frames are dropped silently. An error is returned only when corruption
    /// persists past the decoder's resynchronization limit.
    fn decode(&mut self, buf: &[u8]) -> Result<(usize, Option<Self::Frame>)>;

    /// Discards any partially received frame.
    fn reset_decoder(&mut self);
}

/// Defines the behavior for encoding requests into byte streams.
pub trait ProtocolEncoder {
    /// The unit accepted by the encoder.
    type Request;

    /// Encodes `req` into `bytes`, returning the number of bytes written.
    fn encode(&mut self, req: &Self::Request, bytes: &mut [u8]) -> Result<usize>;

    /// Returns the exact number of bytes `encode` will write for `req`.
    fn estimate_encoded_size(&mut self, req: &Self::Request) -> Result<usize>;

    /// Encodes `req` into a freshly allocated buffer.
    fn encode_to_vec(&mut self, req: &Self::Request) -> Result<Vec<u8>> {
        let size = self.estimate_encoded_size(req)?;
        let mut buf = vec![0; size];
        let written = self.encode(req, &mut buf)?;
        buf.truncate(written);
        Ok(buf)
    }

    /// Resets the internal state of the encoder.
    fn reset_encoder(&mut self);
}
