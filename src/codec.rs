//! Frame-header codec.
//!
//! The byte-level grammar of a frame header (opcode, fin bit, length field
//! encoding, mask bit) lives here, behind two primitives: [`parse`], which
//! either decodes a header from the front of a buffer or reports how many more
//! bytes it needs, and [`serialize`], which appends an encoded header to an
//! outgoing buffer. Payload bytes never pass through the codec; the pipelines
//! carve and carry them directly.

use bytes::{BufMut, BytesMut};

use crate::{
    frame::{FrameHeader, OpCode},
    Result, WebSocketError,
};

/// Largest possible encoded header: 2 fixed bytes, 8 bytes of extended length,
/// 4 bytes of mask key.
pub const MAX_HEADER_SIZE: usize = 14;

/// Outcome of a [`parse`] attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parsed {
    /// The buffer holds an incomplete header; at least this many additional
    /// bytes are required before a decode can succeed. This is a hint for the
    /// reader, not a promise that exactly that many bytes will suffice after
    /// the buffer changes.
    NeedMore(usize),
    /// A complete header was decoded from the front of the buffer.
    Decoded {
        header: FrameHeader,
        /// Number of bytes the header occupied; the caller advances its buffer
        /// by this amount before touching payload bytes.
        consumed: usize,
    },
}

/// Attempts to decode a frame header from the front of `src`.
///
/// Returns [`Parsed::NeedMore`] when the buffer is too short, and an error for
/// grammar violations: reserved opcode values and reserved header bits (no
/// extension is ever negotiated, so RSV1-3 must be zero).
pub fn parse(src: &[u8]) -> Result<Parsed> {
    if src.len() < 2 {
        return Ok(Parsed::NeedMore(2 - src.len()));
    }

    let fin = src[0] & 0b1000_0000 != 0;
    if src[0] & 0b0111_0000 != 0 {
        return Err(WebSocketError::ReservedBitsNotZero);
    }
    let opcode = OpCode::try_from(src[0] & 0b0000_1111)?;

    let masked = src[1] & 0b1000_0000 != 0;
    let length_code = src[1] & 0x7F;

    let extra = match length_code {
        126 => 2,
        127 => 8,
        _ => 0,
    };
    let header_size = 2 + extra + if masked { 4 } else { 0 };
    if src.len() < header_size {
        return Ok(Parsed::NeedMore(header_size - src.len()));
    }

    let length = match extra {
        0 => u64::from(length_code),
        2 => u64::from(u16::from_be_bytes([src[2], src[3]])),
        _ => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&src[2..10]);
            let length = u64::from_be_bytes(bytes);
            // RFC 6455 §5.2: the most significant bit must be zero.
            if length & (1 << 63) != 0 {
                return Err(WebSocketError::InvalidPayloadLength);
            }
            length
        }
    };

    let mask = if masked {
        let mut key = [0u8; 4];
        key.copy_from_slice(&src[2 + extra..2 + extra + 4]);
        Some(key)
    } else {
        None
    };

    Ok(Parsed::Decoded {
        header: FrameHeader {
            opcode,
            fin,
            length,
            mask,
        },
        consumed: header_size,
    })
}

/// Appends the encoded form of `header` to `dst`.
///
/// The length field encoding (7-bit, 16-bit or 64-bit) is chosen from the
/// declared length; the mask bit and key are written when present.
pub fn serialize(header: &FrameHeader, dst: &mut BytesMut) {
    dst.reserve(MAX_HEADER_SIZE);

    dst.put_u8((header.fin as u8) << 7 | u8::from(header.opcode));

    let mask_bit = if header.mask.is_some() { 0x80 } else { 0 };
    if header.length < 126 {
        dst.put_u8(mask_bit | header.length as u8);
    } else if header.length < 65536 {
        dst.put_u8(mask_bit | 126);
        dst.put_u16(header.length as u16);
    } else {
        dst.put_u8(mask_bit | 127);
        dst.put_u64(header.length);
    }

    if let Some(mask) = header.mask {
        dst.put_slice(&mask);
    }
}
