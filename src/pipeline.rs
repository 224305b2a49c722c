//! Frame pipelines.
//!
//! After the handshake the transport is split in two, and each half is owned by
//! exactly one pipeline task:
//!
//! - [`ReadPipeline`] consumes raw transport bytes and emits [`FrameEvent`]s on
//!   a bounded channel. Transport chunk boundaries are unrelated to frame
//!   boundaries, so the pipeline runs a two-state cycle (awaiting header /
//!   reading payload) over an accumulation buffer, carving payload chunks out
//!   of it zero-copy as they arrive.
//! - [`WritePipeline`] consumes [`FrameEvent`]s from a bounded channel, masks
//!   payloads with a fresh per-frame key, serializes, and flushes each event
//!   fully before taking the next.
//!
//! Neither pipeline reports transport closure as an error: the read side simply
//! closes its channel, the write side simply stops. The only hard failure is a
//! producer breaking the header/payload sequencing contract on the write side.

use std::{io, sync::Arc};

use bytes::{Buf, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};

use crate::{
    codec::{self, Parsed},
    crypto::{self, CryptoProvider},
    frame::FrameEvent,
    mask, Result, WebSocketError,
};

/// Capacity of the event channels between the pipelines and the caller.
///
/// Bounded so a slow consumer backpressures the read pipeline and a fast
/// producer backpressures onto the transport.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Initial size of the read accumulation buffer.
const READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// Decodes transport bytes into a channel of frame events.
///
/// The pipeline owns the read half of the transport exclusively. It terminates
/// when the transport reaches end-of-stream or a decode anomaly occurs; both
/// surface to the consumer as channel closure. If the consumer drops the
/// receiver, events are discarded but the transport keeps being drained until
/// it is exhausted.
pub struct ReadPipeline<R> {
    transport: R,
    events: mpsc::Sender<FrameEvent>,
    buf: BytesMut,
    /// Remaining payload bytes expected for the most recently decoded header.
    /// Must reach exactly 0 before the next header parse attempt.
    pending: u64,
}

impl<R> ReadPipeline<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(transport: R, events: mpsc::Sender<FrameEvent>) -> Self {
        Self {
            transport,
            events,
            buf: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            pending: 0,
        }
    }

    /// Drives the pipeline until the transport is exhausted, returning the
    /// read half for the orchestrator to dispose of.
    pub async fn run(mut self) -> R {
        let mut forwarding = true;

        'transport: loop {
            // Decode and emit everything the buffer holds. A single chunk may
            // carry several frames, or a fraction of one header.
            loop {
                if self.pending == 0 {
                    match codec::parse(&self.buf) {
                        Ok(Parsed::NeedMore(n)) => {
                            // A hint, not a hard requirement: the next read may
                            // deliver less and the cycle repeats.
                            self.buf.reserve(n);
                            break;
                        }
                        Ok(Parsed::Decoded { header, consumed }) => {
                            if header.mask.is_some() {
                                // Servers must not mask (RFC 6455 §5.1).
                                #[cfg(feature = "logging")]
                                log::debug!("read pipeline: masked frame from server, closing");
                                break 'transport;
                            }
                            self.buf.advance(consumed);
                            self.pending = header.length;
                            if forwarding {
                                forwarding = self.forward(FrameEvent::Header(header)).await;
                            }
                        }
                        Err(_err) => {
                            #[cfg(feature = "logging")]
                            log::debug!("read pipeline: decode anomaly, closing: {_err}");
                            break 'transport;
                        }
                    }
                } else if self.buf.is_empty() {
                    break;
                } else {
                    let take = self.pending.min(self.buf.len() as u64) as usize;
                    let chunk = self.buf.split_to(take).freeze();
                    self.pending -= take as u64;
                    if forwarding {
                        forwarding = self.forward(FrameEvent::Payload(chunk)).await;
                    }
                }
            }

            match self.transport.read_buf(&mut self.buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }

        self.transport
    }

    /// Sends one event downstream. Returns `false` once the consumer has gone
    /// away, after which the caller stops emitting but keeps draining.
    async fn forward(&mut self, event: FrameEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

/// Running mask context for the frame currently being written.
struct MaskState {
    key: [u8; 4],
    /// Byte position within the frame payload, so a payload split across
    /// several events keeps the key phase aligned.
    offset: usize,
    /// Payload bytes still owed against the header's declared length.
    remaining: u64,
}

/// Serializes a channel of frame events onto the transport, masking every
/// outgoing frame as RFC 6455 requires of clients.
///
/// The pipeline owns the write half of the transport exclusively. It
/// terminates when the source channel is exhausted or the transport is closed;
/// only a sequencing contract violation is an error.
pub struct WritePipeline<W> {
    transport: W,
    source: mpsc::Receiver<FrameEvent>,
    buf: BytesMut,
    current: Option<MaskState>,
    crypto: Arc<dyn CryptoProvider>,
}

impl<W> WritePipeline<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(
        transport: W,
        source: mpsc::Receiver<FrameEvent>,
        crypto: Arc<dyn CryptoProvider>,
    ) -> Self {
        Self {
            transport,
            source,
            buf: BytesMut::with_capacity(1024),
            current: None,
            crypto,
        }
    }

    /// Drives the pipeline until the source channel closes, returning the
    /// write half for the orchestrator to shut down.
    ///
    /// A closed transport ends the run quietly; nothing more can be sent and
    /// that is not this task's problem to report. The fatal cases are contract
    /// violations by the producer: a `Payload` with no preceding `Header`, or
    /// payload bytes overrunning the header's declared length.
    pub async fn run(mut self) -> Result<W> {
        while let Some(event) = self.source.recv().await {
            match event {
                FrameEvent::Header(mut header) => {
                    let key = crypto::mask_key(self.crypto.as_ref());
                    header.mask = Some(key);
                    codec::serialize(&header, &mut self.buf);
                    self.current = Some(MaskState {
                        key,
                        offset: 0,
                        remaining: header.length,
                    });

                    if self.flush().await.is_err() {
                        return Ok(self.transport);
                    }
                }
                FrameEvent::Payload(payload) => {
                    let Some(state) = self.current.as_mut() else {
                        #[cfg(feature = "logging")]
                        log::error!("write pipeline: payload event without a header");
                        return Err(WebSocketError::PayloadWithoutHeader);
                    };

                    // Excess bytes would land on the wire as the start of the
                    // next frame's header; abort before any of them do.
                    if payload.len() as u64 > state.remaining {
                        #[cfg(feature = "logging")]
                        log::error!("write pipeline: payload exceeds the declared frame length");
                        return Err(WebSocketError::PayloadOverrun);
                    }
                    state.remaining -= payload.len() as u64;

                    // Mask while copying into the wire buffer; the producer's
                    // bytes are shared and must stay untouched.
                    let start = self.buf.len();
                    self.buf.extend_from_slice(&payload);
                    mask::apply_mask_offset(&mut self.buf[start..], state.key, state.offset);
                    state.offset = (state.offset + payload.len()) & 3;

                    if self.flush().await.is_err() {
                        return Ok(self.transport);
                    }
                }
            }
        }

        Ok(self.transport)
    }

    /// Drains the serialization buffer: one transport write per pending slice
    /// until nothing is left, then a flush.
    async fn flush(&mut self) -> io::Result<()> {
        while self.buf.has_remaining() {
            let written = self.transport.write_buf(&mut self.buf).await?;
            if written == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
        }
        self.transport.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::DefaultCrypto,
        frame::{FrameHeader, OpCode},
    };
    use bytes::Bytes;
    use tokio::io::{duplex, AsyncWriteExt};

    /// Serializes an unmasked frame the way a server would put it on the wire.
    fn server_frame(opcode: OpCode, fin: bool, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        codec::serialize(&FrameHeader::new(opcode, fin, payload.len() as u64), &mut buf);
        buf.extend_from_slice(payload);
        buf.to_vec()
    }

    async fn collect_events(
        wire: Vec<u8>,
        chunk: usize,
    ) -> Vec<FrameEvent> {
        let (client, mut server) = duplex(256);
        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let pipeline = tokio::spawn(ReadPipeline::new(client, tx).run());

        tokio::spawn(async move {
            for piece in wire.chunks(chunk) {
                server.write_all(piece).await.unwrap();
                server.flush().await.unwrap();
                // Let the reader observe each delivery as its own chunk.
                tokio::task::yield_now().await;
            }
            drop(server);
        });

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        pipeline.await.unwrap();
        events
    }

    fn headers_and_payloads(events: &[FrameEvent]) -> Vec<(FrameHeader, Vec<u8>)> {
        let mut frames: Vec<(FrameHeader, Vec<u8>)> = Vec::new();
        for event in events {
            match event {
                FrameEvent::Header(header) => frames.push((*header, Vec::new())),
                FrameEvent::Payload(chunk) => frames
                    .last_mut()
                    .expect("payload before header")
                    .1
                    .extend_from_slice(chunk),
            }
        }
        frames
    }

    #[tokio::test]
    async fn test_read_chunking_invariance() {
        let mut wire = Vec::new();
        wire.extend(server_frame(OpCode::Text, true, b"hello world"));
        wire.extend(server_frame(OpCode::Binary, false, &[0u8; 200]));
        wire.extend(server_frame(OpCode::Ping, true, b""));
        wire.extend(server_frame(OpCode::Close, true, &[0x03, 0xE8]));

        let whole = headers_and_payloads(&collect_events(wire.clone(), wire.len()).await);

        for chunk in [1usize, 3, 7, 64] {
            let split = headers_and_payloads(&collect_events(wire.clone(), chunk).await);
            assert_eq!(split, whole, "chunk size {chunk}");
        }

        assert_eq!(whole.len(), 4);
        assert_eq!(whole[0].0.opcode, OpCode::Text);
        assert_eq!(whole[0].1, b"hello world");
        assert_eq!(whole[1].0.length, 200);
        assert_eq!(whole[1].1.len(), 200);
        assert!(!whole[1].0.fin);
    }

    #[tokio::test]
    async fn test_read_zero_length_frame_emits_no_payload() {
        let wire = server_frame(OpCode::Ping, true, b"");
        let events = collect_events(wire, 64).await;

        assert_eq!(events.len(), 1);
        let header = events[0].as_header().expect("header");
        assert_eq!(header.opcode, OpCode::Ping);
        assert_eq!(header.length, 0);
    }

    #[tokio::test]
    async fn test_read_payload_total_matches_declared_length() {
        // A 16-bit-length frame delivered in tiny chunks produces several
        // payload events whose byte total equals the declared length.
        let payload: Vec<u8> = (0..300).map(|i| (i % 251) as u8).collect();
        let wire = server_frame(OpCode::Binary, true, &payload);
        let events = collect_events(wire, 11).await;

        let header = events[0].as_header().expect("header first");
        assert_eq!(header.length, 300);

        let total: usize = events[1..]
            .iter()
            .map(|e| e.as_payload().expect("payload").len())
            .sum();
        assert_eq!(total, 300);
        assert!(events.len() > 2, "expected multiple payload slices");

        let frames = headers_and_payloads(&events);
        assert_eq!(frames[0].1, payload);
    }

    #[tokio::test]
    async fn test_read_truncated_stream_closes_without_error() {
        // Header promises 10 bytes, transport dies after 4.
        let mut wire = server_frame(OpCode::Binary, true, &[0xAB; 10]);
        wire.truncate(2 + 4);
        let events = collect_events(wire, 64).await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[1].as_payload().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_read_masked_server_frame_closes_channel() {
        let mut buf = BytesMut::new();
        let header = FrameHeader {
            opcode: OpCode::Text,
            fin: true,
            length: 2,
            mask: Some([9, 9, 9, 9]),
        };
        codec::serialize(&header, &mut buf);
        buf.extend_from_slice(&[0x00, 0x00]);

        let events = collect_events(buf.to_vec(), 64).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_read_keeps_draining_after_consumer_drops() {
        let (client, mut server) = duplex(64);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let pipeline = tokio::spawn(ReadPipeline::new(client, tx).run());

        // More bytes than the duplex buffer holds; the writes only complete if
        // the pipeline keeps reading with nobody listening.
        for _ in 0..8 {
            server
                .write_all(&server_frame(OpCode::Binary, true, &[0x55; 48]))
                .await
                .unwrap();
        }
        drop(server);

        pipeline.await.unwrap();
    }

    async fn run_write_pipeline(events: Vec<FrameEvent>) -> Vec<u8> {
        let (client, mut server) = duplex(256);
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let pipeline =
            tokio::spawn(WritePipeline::new(client, rx, Arc::new(DefaultCrypto)).run());

        for event in events {
            tx.send(event).await.unwrap();
        }
        drop(tx);
        pipeline.await.unwrap().unwrap();

        let mut wire = Vec::new();
        server.read_to_end(&mut wire).await.unwrap();
        wire
    }

    #[tokio::test]
    async fn test_write_masks_and_roundtrips() {
        let payload = b"masked payload bytes";
        let wire = run_write_pipeline(vec![
            FrameEvent::Header(FrameHeader::text(payload.len() as u64)),
            FrameEvent::Payload(Bytes::from_static(payload)),
        ])
        .await;

        let Parsed::Decoded { header, consumed } = codec::parse(&wire).unwrap() else {
            panic!("expected a complete header");
        };
        assert_eq!(header.opcode, OpCode::Text);
        assert!(header.fin);
        assert_eq!(header.length, payload.len() as u64);
        let key = header.mask.expect("client frames must be masked");

        let mut body = wire[consumed..].to_vec();
        assert_eq!(body.len(), payload.len());
        assert_ne!(&body[..], payload, "payload must not travel in the clear");
        mask::apply_mask(&mut body, key);
        assert_eq!(&body[..], payload);
    }

    #[tokio::test]
    async fn test_write_split_payload_keeps_mask_phase() {
        // One frame delivered as three payload events; unmasking the wire
        // bytes with the single frame key must restore the concatenation.
        let parts: [&[u8]; 3] = [b"abc", b"defgh", b"i"];
        let total: Vec<u8> = parts.concat();

        let mut events = vec![FrameEvent::Header(FrameHeader::binary(total.len() as u64))];
        events.extend(
            parts
                .iter()
                .map(|p| FrameEvent::Payload(Bytes::copy_from_slice(p))),
        );

        let wire = run_write_pipeline(events).await;

        let Parsed::Decoded { header, consumed } = codec::parse(&wire).unwrap() else {
            panic!("expected a complete header");
        };
        let key = header.mask.unwrap();
        let mut body = wire[consumed..].to_vec();
        mask::apply_mask(&mut body, key);
        assert_eq!(body, total);
    }

    #[tokio::test]
    async fn test_write_zero_length_frame() {
        let wire = run_write_pipeline(vec![FrameEvent::Header(FrameHeader::ping(0))]).await;

        let Parsed::Decoded { header, consumed } = codec::parse(&wire).unwrap() else {
            panic!("expected a complete header");
        };
        assert_eq!(header.opcode, OpCode::Ping);
        assert_eq!(header.length, 0);
        assert!(header.mask.is_some());
        assert_eq!(consumed, wire.len());
    }

    #[tokio::test]
    async fn test_write_payload_without_header_aborts() {
        let (client, _server) = duplex(64);
        let (tx, rx) = mpsc::channel(4);

        let pipeline =
            tokio::spawn(WritePipeline::new(client, rx, Arc::new(DefaultCrypto)).run());

        tx.send(FrameEvent::Payload(Bytes::from_static(b"orphan")))
            .await
            .unwrap();

        let result = pipeline.await.unwrap();
        assert!(matches!(result, Err(WebSocketError::PayloadWithoutHeader)));
    }

    #[tokio::test]
    async fn test_write_payload_exceeding_declared_length_aborts() {
        // Header declares 3 payload bytes, the producer delivers 5. None of
        // the excess may reach the wire.
        let (client, mut server) = duplex(256);
        let (tx, rx) = mpsc::channel(4);

        let pipeline =
            tokio::spawn(WritePipeline::new(client, rx, Arc::new(DefaultCrypto)).run());

        tx.send(FrameEvent::Header(FrameHeader::binary(3)))
            .await
            .unwrap();
        tx.send(FrameEvent::Payload(Bytes::from_static(b"abcde")))
            .await
            .unwrap();

        let result = pipeline.await.unwrap();
        assert!(matches!(result, Err(WebSocketError::PayloadOverrun)));

        // Only the 6-byte masked header was flushed before the abort.
        let mut wire = Vec::new();
        server.read_to_end(&mut wire).await.unwrap();
        assert_eq!(wire.len(), 6);
    }

    #[tokio::test]
    async fn test_write_overrun_across_chunks_aborts() {
        // The counter carries across payload events: 3 + 2 bytes against a
        // declared length of 4 fails on the second chunk.
        let (client, _server) = duplex(256);
        let (tx, rx) = mpsc::channel(4);

        let pipeline =
            tokio::spawn(WritePipeline::new(client, rx, Arc::new(DefaultCrypto)).run());

        tx.send(FrameEvent::Header(FrameHeader::binary(4)))
            .await
            .unwrap();
        tx.send(FrameEvent::Payload(Bytes::from_static(b"abc")))
            .await
            .unwrap();
        tx.send(FrameEvent::Payload(Bytes::from_static(b"de")))
            .await
            .unwrap();

        let result = pipeline.await.unwrap();
        assert!(matches!(result, Err(WebSocketError::PayloadOverrun)));
    }

    #[tokio::test]
    async fn test_write_closed_transport_is_silent() {
        let (client, server) = duplex(16);
        drop(server);

        let (tx, rx) = mpsc::channel(4);
        let pipeline =
            tokio::spawn(WritePipeline::new(client, rx, Arc::new(DefaultCrypto)).run());

        tx.send(FrameEvent::Header(FrameHeader::binary(64)))
            .await
            .unwrap();
        tx.send(FrameEvent::Payload(Bytes::from(vec![0u8; 64])))
            .await
            .ok();
        drop(tx);

        // No error: a closed peer ends the run quietly.
        assert!(pipeline.await.unwrap().is_ok());
    }
}
