//! # wschan
//! Asynchronous WebSocket client engine (RFC 6455) that exposes a connection as a
//! pair of independent, backpressured channels of frame events.
//!
//! Unlike message-oriented WebSocket crates, `wschan` does not reassemble messages,
//! validate UTF-8, or answer pings. It stops at the frame layer: after the upgrade
//! handshake the connection is split into a read pipeline that decodes transport
//! bytes into [`FrameEvent`]s and a write pipeline that masks and serializes
//! outgoing [`FrameEvent`]s. Everything above raw frame headers and payloads is the
//! caller's business.
//!
//! A frame travels the channels as a [`FrameEvent::Header`] followed by zero or
//! more [`FrameEvent::Payload`] chunks whose byte total equals the header's
//! declared length. Payload chunking on the read side follows transport delivery,
//! so large frames never have to be buffered whole.
//!
//! # Features
//! - `logging`: debug logging of handshake negotiation and pipeline teardown via
//!   the `log` crate.
//!
//! # Client Example
//! ```no_run
//! use wschan::{Connection, FrameEvent, frame::FrameHeader};
//!
//! async fn echo_once() -> wschan::Result<()> {
//!     let mut conn = Connection::connect("wss://echo.websocket.org/stream".parse()?).await?;
//!
//!     conn.send(FrameEvent::Header(FrameHeader::text(5))).await?;
//!     conn.send(FrameEvent::Payload("hello".into())).await?;
//!
//!     while let Some(event) = conn.next().await {
//!         match event {
//!             FrameEvent::Header(header) => {
//!                 println!("frame: {:?} len={}", header.opcode, header.length)
//!             }
//!             FrameEvent::Payload(chunk) => println!("payload chunk of {} bytes", chunk.len()),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Memory Safety
//! - Payload chunks are zero-copy slices of the read buffer; a frame's declared
//!   length never forces an allocation of that size.
//! - Mask keys are generated per outgoing frame and never reused.
//!
//! # Liveness
//! Only the handshake carries a timeout. Once the pipelines are running, closure
//! of the event channel is the primary liveness signal: transport end-of-stream,
//! decode anomalies, and peer shutdown all surface as channel closure rather than
//! as distinct error values.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod codec;
pub mod crypto;
pub mod frame;
pub mod handshake;
mod mask;
pub mod pipeline;
mod stream;

use thiserror::Error;

pub use client::{ConnectBuilder, Connection, Options};
pub use frame::{FrameEvent, FrameHeader, OpCode};
pub use handshake::ResponseHead;
pub use stream::MaybeTlsStream;

/// A result type for WebSocket operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Represents errors that can occur while establishing or driving a WebSocket
/// connection.
///
/// The variants fall into three groups:
///
/// - Handshake rejections: the server's response failed validation. These carry
///   the raw response head for diagnostics and are returned, never raised, so
///   callers can retry or fall back.
/// - Contract violations: a producer broke the header/payload sequencing
///   invariant. These abort the offending pipeline immediately.
/// - Wrapped I/O, HTTP and URL errors from the underlying stack.
///
/// Transport closure is deliberately absent: both pipelines treat end-of-stream
/// as normal termination, surfaced as channel closure.
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// The handshake response status was not 101 Switching Protocols.
    #[error("invalid status code: {}", .0.status)]
    InvalidStatusCode(Box<ResponseHead>),

    /// The handshake response was not HTTP/1.1.
    #[error("handshake response version must be HTTP/1.1, got {:?}", .0.version)]
    InvalidHttpVersion(Box<ResponseHead>),

    /// The `Upgrade` header was missing or did not equal "websocket".
    #[error("invalid upgrade header")]
    InvalidUpgradeHeader(Box<ResponseHead>),

    /// The `Sec-WebSocket-Accept` header did not match the value computed from
    /// the nonce sent in `Sec-WebSocket-Key`.
    #[error("Sec-WebSocket-Accept mismatch")]
    AcceptKeyMismatch(Box<ResponseHead>),

    /// The handshake did not complete within the configured timeout. The
    /// transport is left open for the caller to dispose of.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// Returned when attempting to connect with a URL scheme other than
    /// "ws://" or "wss://".
    #[error("invalid http scheme")]
    InvalidHttpScheme,

    /// Receipt of a frame with an opcode value outside the set defined by
    /// RFC 6455.
    #[error("invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    /// Reserved bits in a received frame header were set. Extensions are not
    /// negotiated, so any reserved bit is a protocol violation.
    #[error("reserved bits are not zero")]
    ReservedBitsNotZero,

    /// A 64-bit extended payload length had its most significant bit set,
    /// which RFC 6455 §5.2 requires to be zero.
    #[error("invalid 64-bit payload length")]
    InvalidPayloadLength,

    /// A `Payload` event arrived on the write channel with no preceding
    /// `Header`. This is a broken producer invariant, not a transient fault;
    /// the write pipeline aborts.
    #[error("payload event without a preceding header")]
    PayloadWithoutHeader,

    /// `Payload` events for one frame carried more bytes than the header
    /// declared. Flushing the excess would corrupt wire framing for every
    /// subsequent frame, so the write pipeline aborts instead.
    #[error("payload bytes exceed the declared frame length")]
    PayloadOverrun,

    /// Returned when sending on a connection whose write pipeline has
    /// terminated.
    #[error("connection is closed")]
    ConnectionClosed,

    /// Wraps errors from URL parsing that may occur when processing WebSocket URLs.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    /// Wraps standard I/O errors that may occur during connection establishment.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Wraps errors from the hyper HTTP library that may occur during the
    /// handshake process or connection upgrade.
    #[error(transparent)]
    HTTPError(#[from] hyper::Error),
}
