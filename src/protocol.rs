//! Bind handshake wire protocol for relaypick.
//!
//! This module implements the small TLV (Type-Length-Value) frame exchange
//! a peer performs against a relay server to prove reachability and
//! authorization. The relayed payload framing that follows a successful
//! bind belongs to the relay protocol layer and is not defined here.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::common::READ_BUFFER_SIZE;

/// Frame type constants.
const FRAME_BIND_REQ: u8 = 0x01;
const FRAME_BIND_OK: u8 = 0x02;
const FRAME_BIND_REJECT: u8 = 0x03;

/// Maximum varint size in bytes (for u64).
const MAX_VARINT_SIZE: usize = 10;

/// Maximum accepted frame payload size.
///
/// Bind frames carry a peer id, a token, or a reject reason; anything
/// larger than this is a protocol violation.
pub const MAX_FRAME_PAYLOAD: usize = 16 * 1024;

/// Protocol error types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid frame type: {0:#x}")]
    InvalidFrameType(u8),

    #[error("varint overflow")]
    VarintOverflow,

    #[error("incomplete data")]
    IncompleteData,

    #[error("invalid utf-8 in string field")]
    InvalidUtf8,

    #[error("frame payload too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("stream error: {0}")]
    Stream(String),
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Bind handshake frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Bind request (peer -> relay): identifies the peer and presents its
    /// auth token. The token may be empty for relays accepting anonymous
    /// binds.
    BindReq { peer_id: String, token: Bytes },
    /// Bind accepted (relay -> peer).
    BindOk,
    /// Bind rejected (relay -> peer) with a reason.
    BindReject { reason: String },
}

/// Encode a u64 value as a varint.
///
/// Uses MSB as continuation flag, lower 7 bits for data.
pub fn encode_varint(mut value: u64, buf: &mut BytesMut) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a varint from a buffer.
///
/// Returns `Ok(None)` if there isn't enough data.
/// Returns `Err(VarintOverflow)` if the varint is too large.
pub fn decode_varint(buf: &mut &[u8]) -> ProtocolResult<Option<u64>> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;

    for i in 0..MAX_VARINT_SIZE {
        if buf.is_empty() {
            return Ok(None);
        }

        let byte = buf[0];
        *buf = &buf[1..];

        let value = (byte & 0x7F) as u64;

        // Check for overflow before shifting
        if shift >= 64 || (shift == 63 && value > 1) {
            return Err(ProtocolError::VarintOverflow);
        }

        result |= value << shift;
        shift += 7;

        if byte & 0x80 == 0 {
            return Ok(Some(result));
        }

        if i == MAX_VARINT_SIZE - 1 {
            return Err(ProtocolError::VarintOverflow);
        }
    }

    Err(ProtocolError::VarintOverflow)
}

/// Calculate the encoded size of a varint.
fn varint_size(value: u64) -> usize {
    if value == 0 {
        return 1;
    }
    let bits = 64 - value.leading_zeros();
    bits.div_ceil(7) as usize
}

impl Frame {
    /// Encode this frame to a byte buffer.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Frame::BindReq { peer_id, token } => {
                buf.put_u8(FRAME_BIND_REQ);
                let peer_bytes = peer_id.as_bytes();
                let payload_len = varint_size(peer_bytes.len() as u64)
                    + peer_bytes.len()
                    + varint_size(token.len() as u64)
                    + token.len();
                encode_varint(payload_len as u64, buf);
                encode_varint(peer_bytes.len() as u64, buf);
                buf.put_slice(peer_bytes);
                encode_varint(token.len() as u64, buf);
                buf.put_slice(token);
            }
            Frame::BindOk => {
                buf.put_u8(FRAME_BIND_OK);
                encode_varint(0, buf); // No payload
            }
            Frame::BindReject { reason } => {
                buf.put_u8(FRAME_BIND_REJECT);
                let reason_bytes = reason.as_bytes();
                let payload_len = varint_size(reason_bytes.len() as u64) + reason_bytes.len();
                encode_varint(payload_len as u64, buf);
                encode_varint(reason_bytes.len() as u64, buf);
                buf.put_slice(reason_bytes);
            }
        }
    }

    /// Decode a frame from a byte buffer.
    ///
    /// Returns `Ok(None)` if there isn't enough data to decode a complete frame.
    /// On success, returns the decoded frame and the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> ProtocolResult<Option<(Frame, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        let frame_type = buf[0];
        let mut remaining = &buf[1..];
        let start_len = remaining.len();

        // Decode payload length
        let length = match decode_varint(&mut remaining)? {
            Some(len) => len as usize,
            None => return Ok(None),
        };

        if length > MAX_FRAME_PAYLOAD {
            return Err(ProtocolError::FrameTooLarge(length));
        }

        let header_size = 1 + (start_len - remaining.len());

        // Check if we have enough data for the payload
        if remaining.len() < length {
            return Ok(None);
        }

        let payload = &remaining[..length];
        let total_consumed = header_size + length;

        let frame = Self::decode_payload(frame_type, payload)?;

        Ok(Some((frame, total_consumed)))
    }

    /// Decode the payload based on frame type.
    fn decode_payload(frame_type: u8, payload: &[u8]) -> ProtocolResult<Frame> {
        let mut buf = payload;

        match frame_type {
            FRAME_BIND_REQ => {
                let peer_len =
                    decode_varint(&mut buf)?.ok_or(ProtocolError::IncompleteData)? as usize;
                if buf.len() < peer_len {
                    return Err(ProtocolError::IncompleteData);
                }
                let peer_id = std::str::from_utf8(&buf[..peer_len])
                    .map_err(|_| ProtocolError::InvalidUtf8)?
                    .to_string();
                buf = &buf[peer_len..];

                let token_len =
                    decode_varint(&mut buf)?.ok_or(ProtocolError::IncompleteData)? as usize;
                if buf.len() < token_len {
                    return Err(ProtocolError::IncompleteData);
                }
                let token = Bytes::copy_from_slice(&buf[..token_len]);

                Ok(Frame::BindReq { peer_id, token })
            }
            FRAME_BIND_OK => Ok(Frame::BindOk),
            FRAME_BIND_REJECT => {
                let reason_len =
                    decode_varint(&mut buf)?.ok_or(ProtocolError::IncompleteData)? as usize;
                if buf.len() < reason_len {
                    return Err(ProtocolError::IncompleteData);
                }
                let reason = std::str::from_utf8(&buf[..reason_len])
                    .map_err(|_| ProtocolError::InvalidUtf8)?
                    .to_string();
                Ok(Frame::BindReject { reason })
            }
            _ => Err(ProtocolError::InvalidFrameType(frame_type)),
        }
    }
}

/// Writes a single frame to a QUIC send stream.
pub async fn write_frame(send: &mut quinn::SendStream, frame: &Frame) -> ProtocolResult<()> {
    let mut buf = BytesMut::new();
    frame.encode(&mut buf);
    send.write_all(&buf)
        .await
        .map_err(|e| ProtocolError::Stream(e.to_string()))
}

/// Reads a single frame from a QUIC recv stream.
///
/// `buffer` accumulates partial data across calls; any bytes past the
/// decoded frame are kept for the next call. Returns `Ok(None)` if the
/// stream ends before a complete frame arrives.
pub async fn read_frame(
    recv: &mut quinn::RecvStream,
    buffer: &mut BytesMut,
) -> ProtocolResult<Option<Frame>> {
    let mut read_buf = [0u8; READ_BUFFER_SIZE];

    loop {
        // Try to decode a frame from existing buffer data
        if let Some((frame, consumed)) = Frame::decode(buffer)? {
            let _ = buffer.split_to(consumed);
            return Ok(Some(frame));
        }

        // Need more data - read from stream
        let n = match recv.read(&mut read_buf).await {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "QUIC stream read ended during frame read");
                return Ok(None);
            }
        };

        match n {
            Some(0) | None => {
                // Stream closed before a complete frame arrived
                return Ok(None);
            }
            Some(n) => {
                buffer.extend_from_slice(&read_buf[..n]);
            }
        }
    }
}
