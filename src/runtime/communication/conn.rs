//! `Conn`: one framed, bidirectional connection to a peer. Wraps an
//! encrypted stream (`async-tls` over the raw [`socket::Socket`]) with
//! length-prefixed framing and chunked writes, so large payloads never
//! block a single oversized `write`.

use std::time::Duration;

use futures_timer::Delay;
use smallvec::SmallVec;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use futures::io::{AsyncReadExt, AsyncWriteExt};

use crate::runtime::error::*;

use super::message::{Header, PeerId, SystemMessage, WireMessage};
use super::serialize;
use super::socket;

/// Connections never write more than this many bytes in a single
/// `write` call, so one oversized message can't starve other tasks
/// sharing the same event loop turn.
const MAX_CHUNK_SIZE: usize = 1400;

/// Either half of a TLS-wrapped socket: the server side sees
/// connections through `async_tls::server::TlsStream`, the client side
/// through `async_tls::client::TlsStream`. Both adapt `tokio`'s
/// `AsyncRead`/`AsyncWrite` to the `futures`-flavoured traits `async-tls`
/// expects, via `tokio_util::compat`.
pub enum Stream {
    Server(async_tls::server::TlsStream<Compat<socket::Socket>>),
    Client(async_tls::client::TlsStream<Compat<socket::Socket>>),
    /// Plaintext, used only in tests and loopback scenarios.
    Plain(Compat<socket::Socket>),
}

impl Stream {
    async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Stream::Server(s) => s.read_exact(buf).await,
            Stream::Client(s) => s.read_exact(buf).await,
            Stream::Plain(s) => s.read_exact(buf).await,
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Server(s) => s.write_all(buf).await,
            Stream::Client(s) => s.write_all(buf).await,
            Stream::Plain(s) => s.write_all(buf).await,
        }
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Server(s) => s.flush().await,
            Stream::Client(s) => s.flush().await,
            Stream::Plain(s) => s.flush().await,
        }
    }
}

pub fn wrap_plain(sock: socket::Socket) -> Stream {
    Stream::Plain(sock.compat())
}

/// A single framed connection to a peer.
pub struct Conn {
    peer: PeerId,
    stream: Stream,
}

impl Conn {
    pub fn new(peer: PeerId, stream: Stream) -> Self {
        Self { peer, stream }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Unwraps the underlying stream, discarding the peer id. Used to
    /// rebuild a `Conn` with the real peer id once the identity
    /// handshake reveals who is actually on the other end.
    pub fn into_stream(self) -> Stream {
        self.stream
    }

    /// Sends a [`SystemMessage`] to the peer on the other end of this
    /// connection, writing it in chunks of at most [`MAX_CHUNK_SIZE`]
    /// bytes.
    pub async fn send(&mut self, from: PeerId, message: &SystemMessage) -> Result<()> {
        let payload = serialize::encode(message)?;
        let wire = WireMessage::new(from, self.peer, &payload);
        let (header, payload) = wire.into_inner();

        let mut header_buf = [0u8; Header::LENGTH];
        header.serialize_into(&mut header_buf)?;

        self.write_chunked(&header_buf).await?;
        self.write_chunked(payload).await?;
        self.stream.flush().await.map_err(conn_error)?;
        Ok(())
    }

    async fn write_chunked(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let take = buf.len().min(MAX_CHUNK_SIZE);
            self.stream.write_all(&buf[..take]).await.map_err(conn_error)?;
            buf = &buf[take..];
        }
        Ok(())
    }

    /// Blocks until a full [`SystemMessage`] has been read off the wire.
    pub async fn receive(&mut self) -> Result<(Header, SystemMessage)> {
        let mut header_buf = [0u8; Header::LENGTH];
        self.stream.read_exact(&mut header_buf).await.map_err(conn_error)?;
        let header = Header::deserialize_from(&header_buf)?;

        let mut payload: SmallVec<[u8; 512]> = SmallVec::from_elem(0, header.length() as usize);
        self.stream.read_exact(&mut payload).await.map_err(conn_error)?;

        let message = serialize::decode(&payload)?;
        Ok((header, message))
    }

    /// Retries `connect` up to `attempts` times, sleeping a second
    /// between failures; used by the router's dial loop.
    pub async fn retry_delay(attempt: usize) {
        let _ = attempt;
        Delay::new(Duration::from_secs(1)).await;
    }
}

/// Maps a raw I/O failure onto the connection error taxonomy:
/// `Closed`/`Timeout`/`Temporary`/`Unknown`, plus `Eof` for a clean
/// peer-initiated close mid-read.
fn conn_error(e: std::io::Error) -> Error {
    use std::io::ErrorKind as IoKind;
    let kind = match e.kind() {
        IoKind::UnexpectedEof => ErrorKind::CommunicationConnEof,
        IoKind::ConnectionReset | IoKind::ConnectionAborted | IoKind::BrokenPipe | IoKind::NotConnected => {
            ErrorKind::CommunicationConnClosed
        }
        IoKind::TimedOut => ErrorKind::CommunicationConnTimeout,
        IoKind::WouldBlock | IoKind::Interrupted => ErrorKind::CommunicationConnTemporary,
        _ => ErrorKind::CommunicationConn,
    };
    Error::wrapped(kind, e)
}
