/// Binary slice frame carried over a worker connection.
///
/// ```text
/// [0..32]   Content id (raw bytes)
/// [32..36]  Slice index (u32 LE)
/// [36..]    Slice payload
/// ```
///
/// There is no payload length field: one frame is one WebSocket binary
/// message, so the transport supplies the boundary.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use pulsear_types::{CONTENT_ID_LEN, ContentId};

/// Header size in bytes.
pub const FRAME_HEADER: usize = CONTENT_ID_LEN + 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: {len} bytes")]
    TooShort { len: usize },
}

/// A decoded slice frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceFrame {
    pub content_id: ContentId,
    pub slice_index: u32,
    pub payload: Bytes,
}

/// Encode a frame.
pub fn encode_frame(content_id: &ContentId, slice_index: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER + payload.len());
    buf.put_slice(content_id.as_bytes());
    buf.put_u32_le(slice_index);
    buf.put_slice(payload);
    buf.freeze()
}

/// Decode a frame. The payload shares the input buffer.
pub fn decode_frame(frame: Bytes) -> Result<SliceFrame, FrameError> {
    if frame.len() < FRAME_HEADER {
        return Err(FrameError::TooShort { len: frame.len() });
    }
    let content_id = ContentId::from_slice(&frame[..CONTENT_ID_LEN])
        .ok_or(FrameError::TooShort { len: frame.len() })?;
    let mut index = [0u8; 4];
    index.copy_from_slice(&frame[CONTENT_ID_LEN..FRAME_HEADER]);
    Ok(SliceFrame {
        content_id,
        slice_index: u32::from_le_bytes(index),
        payload: frame.slice(FRAME_HEADER..),
    })
}

/// Byte offset and length of slice `index` in a file of `size` bytes.
/// The final slice is truncated to the remainder.
pub fn slice_bounds(index: u32, slice_size: u64, size: u64) -> (u64, usize) {
    let offset = (index as u64).saturating_mul(slice_size).min(size);
    let len = slice_size.min(size - offset);
    (offset, len as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let id = ContentId::from_bytes([0x11; CONTENT_ID_LEN]);
        let frame = encode_frame(&id, 0x0102_0304, b"abc");
        assert_eq!(frame.len(), FRAME_HEADER + 3);
        assert_eq!(&frame[..CONTENT_ID_LEN], &[0x11; CONTENT_ID_LEN]);
        assert_eq!(&frame[CONTENT_ID_LEN..FRAME_HEADER], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&frame[FRAME_HEADER..], b"abc");
    }

    #[test]
    fn test_decode_inverts_encode() {
        let id = ContentId::derive("f", "u", 1, 2, 3);
        for (index, payload) in [(0u32, &b""[..]), (7, &b"hello"[..]), (u32::MAX, &[0u8; 40960][..])] {
            let frame = decode_frame(encode_frame(&id, index, payload)).unwrap();
            assert_eq!(frame.content_id, id);
            assert_eq!(frame.slice_index, index);
            assert_eq!(&frame.payload[..], payload);
        }
    }

    #[test]
    fn test_decode_short_frame() {
        assert_eq!(
            decode_frame(Bytes::from_static(&[0u8; 10])),
            Err(FrameError::TooShort { len: 10 })
        );
    }

    #[test]
    fn test_slice_bounds_truncate_last() {
        assert_eq!(slice_bounds(0, 40960, 100_000), (0, 40960));
        assert_eq!(slice_bounds(1, 40960, 100_000), (40960, 40960));
        assert_eq!(slice_bounds(2, 40960, 100_000), (81920, 18080));
        assert_eq!(slice_bounds(3, 40960, 100_000), (100_000, 0));
    }
}
