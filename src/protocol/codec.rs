//! Frame codec for the CIP wire format
//!
//! Handles framing only. Payload interpretation lives in the join
//! and registration modules.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::FrameType;

/// Maximum payload size, bounded by the 16-bit length field
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Header size: type(1) + length(2) = 3 bytes
pub const HEADER_SIZE: usize = 3;

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),

    #[error("Truncated frame: needed {needed} bytes, {available} available")]
    TruncatedFrame { needed: usize, available: usize },
}

/// A single CIP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw frame type byte
    pub frame_type: u8,
    /// Frame payload, exactly `length` bytes
    pub payload: Bytes,
}

impl Frame {
    pub fn new(frame_type: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            payload: payload.into(),
        }
    }

    /// Known frame type, if any
    pub fn kind(&self) -> Option<FrameType> {
        FrameType::from_byte(self.frame_type)
    }

    /// Payload length as carried in the header
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Encode this frame into a buffer
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        encode_frame(self.frame_type, &self.payload, buf)
    }
}

/// Encode a frame into the wire format: `[type, len_hi, len_lo] + payload`
pub fn encode_frame(frame_type: u8, payload: &[u8], buf: &mut BytesMut) -> Result<(), CodecError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(CodecError::FrameTooLarge(payload.len(), MAX_PAYLOAD_SIZE));
    }

    buf.reserve(HEADER_SIZE + payload.len());
    buf.put_u8(frame_type);
    buf.put_u16(payload.len() as u16);
    buf.put_slice(payload);
    Ok(())
}

/// Attempt to decode one frame from the front of the buffer.
///
/// Returns `Ok(None)` and leaves the buffer untouched if it does not yet
/// hold a complete frame.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
    match frame_extent(buf) {
        Ok(length) => {
            let frame_type = buf[0];
            buf.advance(HEADER_SIZE);
            let payload = buf.split_to(length).freeze();
            Ok(Some(Frame::new(frame_type, payload)))
        }
        Err(CodecError::TruncatedFrame { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Decode every frame in a complete buffer.
///
/// Fails with `TruncatedFrame` if the buffer ends inside a header or payload.
/// Use [`Decoder`] for stream input where a frame may span reads.
pub fn decode_all(data: &[u8]) -> Result<Vec<Frame>, CodecError> {
    let mut frames = Vec::new();
    let mut rest = data;

    while !rest.is_empty() {
        let length = frame_extent(rest)?;
        let payload = Bytes::copy_from_slice(&rest[HEADER_SIZE..HEADER_SIZE + length]);
        frames.push(Frame::new(rest[0], payload));
        rest = &rest[HEADER_SIZE + length..];
    }

    Ok(frames)
}

/// Payload length of the frame at the start of `data`, if all of it is present
fn frame_extent(data: &[u8]) -> Result<usize, CodecError> {
    if data.len() < HEADER_SIZE {
        return Err(CodecError::TruncatedFrame {
            needed: HEADER_SIZE,
            available: data.len(),
        });
    }

    let length = u16::from_be_bytes([data[1], data[2]]) as usize;
    if data.len() < HEADER_SIZE + length {
        return Err(CodecError::TruncatedFrame {
            needed: HEADER_SIZE + length,
            available: data.len(),
        });
    }

    Ok(length)
}

/// Streaming decoder that reassembles frames split across reads
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Append a received chunk and extract all complete frames.
    ///
    /// Trailing partial data stays buffered and is prepended to the next chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        // The 16-bit length field cannot exceed MAX_PAYLOAD_SIZE, so the only
        // failure left is "need more data".
        while let Ok(Some(frame)) = decode_frame(&mut self.buffer) {
            frames.push(frame);
        }

        if !self.buffer.is_empty() {
            tracing::trace!("Holding {} bytes of partial frame", self.buffer.len());
        }

        frames
    }

    /// Number of buffered bytes not yet forming a complete frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Discard any buffered partial frame
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(frame_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_frame(frame_type, payload, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_encode_layout() {
        let bytes = encoded(0x0D, &[0x00, 0x00]);
        assert_eq!(bytes, vec![0x0D, 0x00, 0x02, 0x00, 0x00]);

        let payload = vec![0xAB; 300];
        let bytes = encoded(0x05, &payload);
        assert_eq!(&bytes[..3], &[0x05, 0x01, 0x2C]);
        assert_eq!(bytes.len(), 303);
    }

    #[test]
    fn test_encode_too_large() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        let mut buf = BytesMut::new();
        let err = encode_frame(0x05, &payload, &mut buf).unwrap_err();
        assert_eq!(err, CodecError::FrameTooLarge(MAX_PAYLOAD_SIZE + 1, MAX_PAYLOAD_SIZE));
        assert!(buf.is_empty());

        let payload = vec![0u8; MAX_PAYLOAD_SIZE];
        assert!(encode_frame(0x05, &payload, &mut buf).is_ok());
    }

    #[test]
    fn test_decode_all_multiple_frames() {
        let mut data = encoded(0x0F, &[0x02]);
        data.extend(encoded(0x0E, &[]));
        data.extend(encoded(0x05, &[0x00, 0x00, 0x03, 0x00, 0x04, 0x00]));

        let frames = decode_all(&data).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], Frame::new(0x0F, vec![0x02]));
        assert!(frames[1].is_empty());
        assert_eq!(frames[1].kind(), Some(FrameType::HeartbeatAck));
        assert_eq!(frames[2].len(), 6);
    }

    #[test]
    fn test_decode_all_truncated() {
        let err = decode_all(&[0x05, 0x00]).unwrap_err();
        assert_eq!(err, CodecError::TruncatedFrame { needed: 3, available: 2 });

        let mut data = encoded(0x0E, &[]);
        data.extend([0x05, 0x00, 0x04, 0x01]);
        let err = decode_all(&data).unwrap_err();
        assert_eq!(err, CodecError::TruncatedFrame { needed: 7, available: 4 });
    }

    #[test]
    fn test_decode_frame_needs_more() {
        let mut buf = BytesMut::from(&[0x05, 0x00, 0x02, 0x01][..]);
        assert_eq!(decode_frame(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 4);

        buf.extend_from_slice(&[0x02]);
        let frame = decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), &[0x01, 0x02]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decoder_reassembles_split_frames() {
        let mut data = encoded(0x0F, &[0x02]);
        data.extend(encoded(0x02, &[0x00, 0x00, 0x00, 0x1F]));

        let mut decoder = Decoder::new();
        let mut frames = Vec::new();
        for byte in &data {
            frames.extend(decoder.push(std::slice::from_ref(byte)));
        }

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].kind(), Some(FrameType::ConnectionControl));
        assert_eq!(frames[1].payload.as_ref(), &[0x00, 0x00, 0x00, 0x1F]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_decoder_keeps_trailing_bytes() {
        let mut data = encoded(0x0E, &[]);
        data.extend(encoded(0x05, &[1, 2, 3, 4]));
        let (first, second) = data.split_at(5);

        let mut decoder = Decoder::new();
        let frames = decoder.push(first);
        assert_eq!(frames.len(), 1);
        assert_eq!(decoder.pending(), 2);

        let frames = decoder.push(second);
        assert_eq!(frames, vec![Frame::new(0x05, vec![1, 2, 3, 4])]);

        decoder.push(&[0x05]);
        decoder.clear();
        assert_eq!(decoder.pending(), 0);
    }
}
