//! # Frame
//!
//! Data model for the frame-event channels. A WebSocket frame as defined in
//! [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2)
//! is represented on a channel as one [`FrameEvent::Header`] followed by zero or
//! more [`FrameEvent::Payload`] chunks:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! ```
//!
//! The header/payload split is deliberate: it lets the read pipeline hand out
//! payload bytes in whatever chunks the transport delivered them, without ever
//! buffering a whole frame. The price is an invariant the consumer must uphold:
//! a payload chunk is only meaningful in the context of the last header seen on
//! the same channel.

use bytes::Bytes;

use crate::WebSocketError;

/// WebSocket operation code that determines the semantic meaning of a frame.
///
/// Data frames carry application payload (`Text`, `Binary`, `Continuation`);
/// control frames manage the connection (`Close`, `Ping`, `Pong`). The numeric
/// values are defined in [RFC 6455, Section 11.8](https://datatracker.ietf.org/doc/html/rfc6455#section-11.8).
/// The ranges 0x3-0x7 and 0xB-0xF are reserved and rejected during decoding.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` if the `OpCode` represents a control frame (`Close`,
    /// `Ping`, or `Pong`).
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WebSocketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WebSocketError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// A decoded or to-be-encoded WebSocket frame header.
///
/// On the read channel the mask is always `None`: servers must not mask, and a
/// masked incoming frame terminates the pipeline. On the write channel the mask
/// is filled in by the write pipeline itself; headers submitted by the caller
/// may leave it `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// The operation code of the frame.
    pub opcode: OpCode,
    /// Indicates if this is the final fragment in a message.
    pub fin: bool,
    /// Declared payload length in bytes.
    pub length: u64,
    /// The masking key for the frame, if any.
    pub mask: Option<[u8; 4]>,
}

impl FrameHeader {
    /// Creates a header with the given opcode, fin flag and declared length.
    pub fn new(opcode: OpCode, fin: bool, length: u64) -> Self {
        Self {
            opcode,
            fin,
            length,
            mask: None,
        }
    }

    /// Header for an unfragmented text frame of `length` payload bytes.
    pub fn text(length: u64) -> Self {
        Self::new(OpCode::Text, true, length)
    }

    /// Header for an unfragmented binary frame of `length` payload bytes.
    pub fn binary(length: u64) -> Self {
        Self::new(OpCode::Binary, true, length)
    }

    /// Header for a close frame of `length` payload bytes.
    pub fn close(length: u64) -> Self {
        Self::new(OpCode::Close, true, length)
    }

    /// Header for a ping frame of `length` payload bytes.
    pub fn ping(length: u64) -> Self {
        Self::new(OpCode::Ping, true, length)
    }

    /// Header for a pong frame of `length` payload bytes.
    pub fn pong(length: u64) -> Self {
        Self::new(OpCode::Pong, true, length)
    }
}

/// One event on a frame channel.
///
/// Invariant: within one channel, a `Payload` belongs to the most recently
/// emitted `Header`, and the byte total of all `Payload` events for a header
/// equals that header's declared length. A declared length of zero produces no
/// `Payload` events at all.
#[derive(Debug, Clone)]
pub enum FrameEvent {
    /// A decoded (read side) or to-be-sent (write side) frame header.
    Header(FrameHeader),
    /// A contiguous slice of the current frame's payload.
    Payload(Bytes),
}

impl FrameEvent {
    /// Returns the header if this event is a `Header`.
    pub fn as_header(&self) -> Option<&FrameHeader> {
        match self {
            Self::Header(header) => Some(header),
            Self::Payload(_) => None,
        }
    }

    /// Returns the payload bytes if this event is a `Payload`.
    pub fn as_payload(&self) -> Option<&Bytes> {
        match self {
            Self::Header(_) => None,
            Self::Payload(payload) => Some(payload),
        }
    }
}

impl From<FrameHeader> for FrameEvent {
    fn from(header: FrameHeader) -> Self {
        Self::Header(header)
    }
}

impl From<Bytes> for FrameEvent {
    fn from(payload: Bytes) -> Self {
        Self::Payload(payload)
    }
}
