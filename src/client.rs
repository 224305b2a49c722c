//! Connection establishment and lifecycle.
//!
//! [`Connection::connect`] resolves and dials the peer, negotiates the upgrade
//! handshake, then splits the transport between a read and a write pipeline
//! running as independent tasks. What the caller holds afterwards is only the
//! two channel endpoints; the transport itself is owned by the pipelines and a
//! background teardown task that shuts both halves down once the pipelines
//! finish.

use std::{
    future::Future,
    io,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use futures::{future::BoxFuture, FutureExt};
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
};
use tokio_rustls::{rustls::pki_types::ServerName, TlsConnector};
use url::Url;

use crate::{
    crypto::{CryptoProvider, DefaultCrypto},
    frame::FrameEvent,
    handshake,
    pipeline::{ReadPipeline, WritePipeline, EVENT_CHANNEL_CAPACITY},
    stream::{self, MaybeTlsStream},
    Result, WebSocketError,
};

/// Configuration for establishing a connection.
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use wschan::Options;
///
/// let options = Options::default()
///     .with_timeout(Duration::from_secs(10))
///     .with_header(
///         hyper::header::USER_AGENT,
///         hyper::header::HeaderValue::from_static("wschan-client"),
///     );
/// ```
#[derive(Clone)]
pub struct Options {
    /// Upper bound on the whole handshake exchange. `None` means the exchange
    /// only terminates with the transport.
    pub(crate) timeout: Option<Duration>,
    /// Extra headers for the upgrade request. On name conflict the caller's
    /// value replaces the derived one.
    pub(crate) headers: HeaderMap,
    /// Source of handshake nonces and frame mask keys.
    pub(crate) crypto: Arc<dyn CryptoProvider>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            timeout: None,
            headers: HeaderMap::new(),
            crypto: Arc::new(DefaultCrypto),
        }
    }
}

impl Options {
    /// Bounds the handshake exchange; on expiry the connection attempt fails
    /// with [`WebSocketError::HandshakeTimeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds a header to the upgrade request, replacing any derived header of
    /// the same name.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replaces the default source of randomness and SHA-1. Mainly useful for
    /// reproducible handshakes and masking in tests.
    pub fn with_crypto(mut self, crypto: Arc<dyn CryptoProvider>) -> Self {
        self.crypto = crypto;
        self
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("timeout", &self.timeout)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Pending connection attempt returned by [`Connection::connect`].
///
/// Configuration methods may be chained before the builder is awaited; awaiting
/// drives dialing, the handshake, and pipeline startup to completion.
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use wschan::{Connection, Options};
///
/// async fn connect_example() -> wschan::Result<Connection> {
///     Connection::connect("wss://example.com/socket".parse()?)
///         .with_options(Options::default().with_timeout(Duration::from_secs(5)))
///         .await
/// }
/// ```
pub struct ConnectBuilder {
    opts: Option<ConnectOpts>,
    future: Option<BoxFuture<'static, Result<Connection>>>,
}

struct ConnectOpts {
    url: Url,
    tcp_address: Option<SocketAddr>,
    connector: Option<TlsConnector>,
    options: Option<Options>,
}

impl ConnectBuilder {
    fn new(url: Url) -> Self {
        Self {
            opts: Some(ConnectOpts {
                url,
                tcp_address: None,
                connector: None,
                options: None,
            }),
            future: None,
        }
    }

    /// Sets connection options for the handshake.
    pub fn with_options(mut self, options: Options) -> Self {
        let Some(opts) = &mut self.opts else {
            unreachable!()
        };
        opts.options = Some(options);
        self
    }

    /// Sets a custom TLS connector for `wss://` URLs, overriding the built-in
    /// webpki-roots configuration.
    pub fn with_connector(mut self, connector: TlsConnector) -> Self {
        let Some(opts) = &mut self.opts else {
            unreachable!()
        };
        opts.connector = Some(connector);
        self
    }

    /// Dials this socket address instead of resolving the URL's host. The URL
    /// still supplies the `Host` header and TLS server name.
    pub fn with_tcp_address(mut self, address: SocketAddr) -> Self {
        let Some(opts) = &mut self.opts else {
            unreachable!()
        };
        opts.tcp_address = Some(address);
        self
    }
}

impl Future for ConnectBuilder {
    type Output = Result<Connection>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(opts) = this.opts.take() {
            let future = Connection::connect_priv(
                opts.url,
                opts.tcp_address,
                opts.connector,
                opts.options.unwrap_or_default(),
            );
            this.future = Some(Box::pin(future));
        }

        let Some(pinned) = &mut this.future else {
            unreachable!()
        };
        pinned.poll_unpin(cx)
    }
}

/// An established connection, reduced to its two channel endpoints.
///
/// Incoming frames arrive via [`next`](Self::next) as `Header` events followed
/// by zero or more `Payload` chunks. Outgoing frames are submitted through
/// [`send`](Self::send) in the same shape; masking and serialization happen in
/// the write pipeline.
///
/// Dropping the `Connection` closes the outgoing channel, which ends the write
/// pipeline; the teardown task then shuts down the transport.
pub struct Connection {
    events: mpsc::Receiver<FrameEvent>,
    sink: mpsc::Sender<FrameEvent>,
}

impl Connection {
    /// Starts a connection attempt to a `ws://` or `wss://` URL.
    pub fn connect(url: Url) -> ConnectBuilder {
        ConnectBuilder::new(url)
    }

    async fn connect_priv(
        url: Url,
        tcp_address: Option<SocketAddr>,
        connector: Option<TlsConnector>,
        options: Options,
    ) -> Result<Self> {
        let host = url
            .host()
            .ok_or(WebSocketError::InvalidHttpScheme)?
            .to_string();

        let tcp_stream = if let Some(tcp_address) = tcp_address {
            TcpStream::connect(tcp_address).await?
        } else {
            let port = url
                .port_or_known_default()
                .ok_or(WebSocketError::InvalidHttpScheme)?;
            TcpStream::connect(format!("{host}:{port}")).await?
        };

        let transport = match url.scheme() {
            "ws" => MaybeTlsStream::Plain(tcp_stream),
            "wss" => {
                let connector = connector.unwrap_or_else(stream::tls_connector);
                let domain = ServerName::try_from(host)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid dnsname"))?;

                MaybeTlsStream::Tls(connector.connect(domain, tcp_stream).await?)
            }
            _ => return Err(WebSocketError::InvalidHttpScheme),
        };

        Self::handshake(url, transport, options).await
    }

    /// Negotiates the upgrade handshake over an already-connected transport and
    /// starts the pipelines.
    ///
    /// On failure the transport is returned to the operating system by drop,
    /// not shut down gracefully; a handshake that did not complete leaves no
    /// protocol state worth flushing.
    pub async fn handshake<S>(url: Url, io: S, options: Options) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let upgraded = handshake::upgrade(&url, io, &options).await?;
        Ok(Self::spawn_pipelines(upgraded, options.crypto))
    }

    fn spawn_pipelines<T>(transport: T, crypto: Arc<dyn CryptoProvider>) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(transport);
        let (event_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (sink, sink_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let read_task = tokio::spawn(ReadPipeline::new(reader, event_tx).run());
        let write_task = tokio::spawn(WritePipeline::new(writer, sink_rx, crypto).run());

        // Teardown: once the write pipeline is done, shut the write half down,
        // then wait out the read pipeline and drop its half.
        tokio::spawn(async move {
            match write_task.await {
                Ok(Ok(mut writer)) => {
                    let _ = writer.shutdown().await;
                }
                Ok(Err(_err)) => {
                    #[cfg(feature = "logging")]
                    log::error!("write pipeline aborted: {_err}");
                }
                Err(_join) => {}
            }
            let _ = read_task.await;
        });

        Self { events, sink }
    }

    /// Receives the next frame event.
    ///
    /// Returns `None` once the read pipeline has terminated, whether by
    /// transport end-of-stream, peer shutdown, or a decode anomaly. There is no
    /// error channel; closure is the signal.
    pub async fn next(&mut self) -> Option<FrameEvent> {
        self.events.recv().await
    }

    /// Submits a frame event to the write pipeline.
    ///
    /// Waits for channel capacity when the pipeline is busy. Fails with
    /// [`WebSocketError::ConnectionClosed`] once the write pipeline has
    /// terminated.
    pub async fn send(&mut self, event: FrameEvent) -> Result<()> {
        self.sink
            .send(event)
            .await
            .map_err(|_| WebSocketError::ConnectionClosed)
    }
}
