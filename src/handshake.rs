//! Upgrade handshake negotiation (RFC 6455 §4).
//!
//! The HTTP/1.1 request/response exchange is driven through hyper's client
//! connection state machine; this module only decides what to send and whether
//! to believe the answer. Validation is strict: HTTP/1.1, status 101, an
//! `Upgrade: websocket` header, and a `Sec-WebSocket-Accept` value derived from
//! the nonce we sent. Any mismatch is returned with the raw response head
//! attached so callers can see what the server actually said.
//!
//! On failure or timeout the transport is *not* closed here; disposal is the
//! caller's responsibility (see [`crate::Connection::connect`]).

use base64::prelude::*;
use http_body_util::Empty;
use hyper::{
    body::Bytes,
    header::{self, HeaderMap, HeaderValue},
    http::Version,
    upgrade::Upgraded,
    Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use url::Url;

use crate::{client::Options, crypto, Result, WebSocketError};

/// Fixed GUID appended to the client nonce when computing `Sec-WebSocket-Accept`
/// (RFC 6455 §1.3).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The status line and headers of a handshake response, captured for
/// diagnostics when validation fails.
#[derive(Debug)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
}

impl ResponseHead {
    fn capture<B>(response: &Response<B>) -> Box<Self> {
        Box::new(Self {
            status: response.status(),
            version: response.version(),
            headers: response.headers().clone(),
        })
    }
}

/// Computes the expected `Sec-WebSocket-Accept` value for a base64-encoded
/// nonce: base64(SHA-1(nonce ++ GUID)).
pub fn accept_key(crypto: &dyn crypto::CryptoProvider, nonce_b64: &str) -> String {
    let mut input = Vec::with_capacity(nonce_b64.len() + WEBSOCKET_GUID.len());
    input.extend_from_slice(nonce_b64.as_bytes());
    input.extend_from_slice(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(crypto.sha1(&input))
}

/// Performs the upgrade handshake over `io` and returns the upgraded duplex
/// stream.
///
/// The exchange as a whole races the optional timeout in `options`; the loser
/// of the race is discarded without side effects.
pub(crate) async fn upgrade<S>(url: &Url, io: S, options: &Options) -> Result<TokioIo<Upgraded>>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    match options.timeout {
        Some(limit) => tokio::time::timeout(limit, exchange(url, io, options))
            .await
            .map_err(|_| WebSocketError::HandshakeTimeout)?,
        None => exchange(url, io, options).await,
    }
}

async fn exchange<S>(url: &Url, io: S, options: &Options) -> Result<TokioIo<Upgraded>>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let nonce_b64 = BASE64_STANDARD.encode(crypto::nonce(options.crypto.as_ref()));
    let expected_accept = accept_key(options.crypto.as_ref(), &nonce_b64);

    let target = &url[url::Position::BeforePath..];
    let mut request = Request::builder()
        .method("GET")
        .uri(target)
        .header(header::HOST, host_header(url)?)
        .header(header::UPGRADE, "websocket")
        .header(header::CONNECTION, "upgrade")
        .header(header::SEC_WEBSOCKET_KEY, nonce_b64.as_str())
        .header(header::SEC_WEBSOCKET_VERSION, "13")
        .body(Empty::<Bytes>::new())
        .expect("request build");

    // Caller-supplied headers win on conflict. `insert` replaces, so a caller
    // Host never ends up duplicated alongside the derived one.
    for (name, value) in options.headers.iter() {
        request.headers_mut().insert(name, value.clone());
    }

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io)).await?;

    tokio::spawn(async move {
        if let Err(_err) = conn.with_upgrades().await {
            #[cfg(feature = "logging")]
            log::error!("upgrading connection: {:?}", _err);
        }
    });

    let mut response = sender.send_request(request).await?;
    verify(&response, &expected_accept)?;

    #[cfg(feature = "logging")]
    log::debug!("handshake accepted for {}", url);

    let upgraded = hyper::upgrade::on(&mut response).await?;
    Ok(TokioIo::new(upgraded))
}

fn host_header(url: &Url) -> Result<HeaderValue> {
    let host = url
        .host()
        .ok_or(WebSocketError::InvalidHttpScheme)?
        .to_string();

    let value = if let Some(port) = url.port() {
        format!("{host}:{port}")
    } else {
        host
    };

    Ok(value.parse().expect("host header"))
}

fn verify<B>(response: &Response<B>, expected_accept: &str) -> Result<()> {
    if response.version() != Version::HTTP_11 {
        return Err(WebSocketError::InvalidHttpVersion(ResponseHead::capture(
            response,
        )));
    }

    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Err(WebSocketError::InvalidStatusCode(ResponseHead::capture(
            response,
        )));
    }

    let headers = response.headers();

    if !headers
        .get(header::UPGRADE)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
    {
        return Err(WebSocketError::InvalidUpgradeHeader(ResponseHead::capture(
            response,
        )));
    }

    if headers
        .get(header::SEC_WEBSOCKET_ACCEPT)
        .and_then(|h| h.to_str().ok())
        != Some(expected_accept)
    {
        return Err(WebSocketError::AcceptKeyMismatch(ResponseHead::capture(
            response,
        )));
    }

    Ok(())
}
