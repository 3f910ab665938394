//! One framed message channel over one TCP stream.
//!
//! A [`Connection`] exclusively owns its socket. Its security mode is fixed
//! when it is constructed ([`Connection::connect`] or
//! [`Connection::accept`]) and never changes afterwards. Any fatal error
//! (I/O, timeout, crypto) closes the connection; every later `send` or
//! `recv` then fails with [`NetError::Closed`].

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};

use super::framing::{self, FrameDecoder, FrameStats};
use super::Address;
use crate::constants::MAX_FRAME_SIZE;
use crate::error::{NetError, NetResult};
use crate::message::Message;
use crate::middleware::{Middleware, Pipeline};
use crate::security::{Security, SecurityMode, SessionCipher};

/// Which side of the TCP connection this endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// A host's listening socket.
    Listener,
    /// Produced by a host's listener.
    Accepted,
    /// Dialed out by a bot.
    Initiator,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Listener => write!(f, "listener"),
            Self::Accepted => write!(f, "accepted"),
            Self::Initiator => write!(f, "initiator"),
        }
    }
}

/// Framed, optionally encrypted message channel.
#[derive(Debug)]
pub struct Connection {
    /// Socket; `None` once closed.
    stream: Option<TcpStream>,
    /// Remote endpoint.
    peer: Address,
    /// Local endpoint.
    local: Address,
    role: Role,
    mode: SecurityMode,
    /// Body transforms, cipher last.
    pipeline: Pipeline,
    /// Number of trailing pipeline layers owned by the security context.
    security_layers: usize,
    /// Buffered partial frames.
    decoder: FrameDecoder,
    /// Limit for each individual send or receive.
    io_timeout: Option<Duration>,
}

impl Connection {
    fn from_stream(stream: TcpStream, role: Role, mode: SecurityMode) -> NetResult<Self> {
        stream.set_nodelay(true)?;
        let peer = Address::from(stream.peer_addr()?);
        let local = Address::from(stream.local_addr()?);
        Ok(Self {
            stream: Some(stream),
            peer,
            local,
            role,
            mode,
            pipeline: Pipeline::new(),
            security_layers: 0,
            decoder: FrameDecoder::new(),
            io_timeout: None,
        })
    }

    /// Dial a host and establish the security context.
    ///
    /// In asymmetric mode this sends the handshake envelope before
    /// returning, so the first application message is already encrypted.
    pub async fn connect(address: &Address, security: &Security) -> NetResult<Self> {
        let stream = TcpStream::connect((address.host.as_str(), address.port)).await?;
        let mut conn = Self::from_stream(stream, Role::Initiator, security.mode())?;

        match security {
            Security::None => {}
            Security::Symmetric(key) => conn.install_cipher(key)?,
            Security::Asymmetric(keys) => {
                let (envelope, session_key) = keys.initiate()?;
                conn.write_body(&envelope).await?;
                conn.install_cipher(&session_key)?;
                log::debug!("[Handshake] Sent session key to {}", conn.peer);
            }
        }

        log::info!("Connected to {} ({} mode)", conn.peer, conn.mode);
        Ok(conn)
    }

    /// Wrap an accepted stream and establish the security context.
    ///
    /// In asymmetric mode the first frame must be a valid handshake
    /// envelope, received within `handshake_timeout`. On failure the
    /// socket is closed and the error returned; nothing is retried.
    pub async fn accept(
        stream: TcpStream,
        security: &Security,
        handshake_timeout: Duration,
    ) -> NetResult<Self> {
        let mut conn = Self::from_stream(stream, Role::Accepted, security.mode())?;

        match security {
            Security::None => {}
            Security::Symmetric(key) => conn.install_cipher(key)?,
            Security::Asymmetric(keys) => {
                let envelope = match tokio::time::timeout(handshake_timeout, conn.read_body()).await
                {
                    Ok(result) => result?,
                    Err(_) => {
                        conn.close();
                        return Err(NetError::TimedOut);
                    }
                };
                match keys.respond(&envelope) {
                    Ok(session_key) => conn.install_cipher(&session_key)?,
                    Err(e) => {
                        log::warn!("[Handshake] Rejected {}: {e}", conn.peer);
                        conn.close();
                        return Err(e);
                    }
                }
                log::debug!("[Handshake] Session key established with {}", conn.peer);
            }
        }

        Ok(conn)
    }

    fn install_cipher(&mut self, key: &[u8; crate::constants::KEY_SIZE]) -> NetResult<()> {
        self.pipeline.push(Box::new(SessionCipher::new(key)?));
        self.security_layers += 1;
        Ok(())
    }

    /// Add a body transform on the plaintext side of the cipher.
    ///
    /// Layers run in the order they are added on send and in reverse on
    /// receive. Both peers must install the same layers.
    pub fn with_middleware(mut self, layer: Box<dyn Middleware>) -> Self {
        let index = self.pipeline.len() - self.security_layers;
        self.pipeline.insert(index, layer);
        self
    }

    /// Limit every subsequent send and receive to `timeout`.
    pub fn set_io_timeout(&mut self, timeout: Option<Duration>) {
        self.io_timeout = timeout;
    }

    /// Serialize, transform and send one message.
    ///
    /// Returns the sizes of the frame that went on the wire. A message whose
    /// encoded body exceeds the frame limit is refused with a protocol error
    /// before anything is written, and the connection stays open.
    pub async fn send<T: Serialize + ?Sized>(&mut self, message: &T) -> NetResult<FrameStats> {
        if self.is_closed() {
            return Err(NetError::Closed);
        }
        let plain = serde_json::to_vec(message)
            .map_err(|e| NetError::protocol(format!("Failed to serialize message: {e}")))?;
        let body = match self.pipeline.encode(plain) {
            Ok(body) => body,
            Err(e) => return Err(self.fail(e)),
        };
        if !u32::try_from(body.len()).is_ok_and(|len| len <= MAX_FRAME_SIZE) {
            return Err(NetError::protocol(format!(
                "message too large ({} bytes, max {MAX_FRAME_SIZE})",
                body.len()
            )));
        }
        self.write_body(&body).await
    }

    /// Receive one message.
    pub async fn recv(&mut self) -> NetResult<Message> {
        self.recv_with(|_| {}).await
    }

    /// Receive one message, reporting the frame's sizes to `observe`.
    ///
    /// The observer sees the frame before it is decoded and cannot alter it.
    pub async fn recv_with<F>(&mut self, mut observe: F) -> NetResult<Message>
    where
        F: FnMut(&FrameStats),
    {
        let body = self.read_body().await?;
        observe(&FrameStats::for_body(body.len()));

        let plain = match self.pipeline.decode(body) {
            Ok(plain) => plain,
            Err(e) => return Err(self.fail(e)),
        };
        serde_json::from_slice::<Message>(&plain)
            .map_err(|e| NetError::protocol(format!("Invalid message body: {e}")))
    }

    async fn write_body(&mut self, body: &[u8]) -> NetResult<FrameStats> {
        let limit = self.io_timeout;
        let Some(stream) = self.stream.as_mut() else {
            return Err(NetError::Closed);
        };
        match with_timeout(limit, framing::write_frame(stream, body)).await {
            Ok(stats) => Ok(stats),
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn read_body(&mut self) -> NetResult<Vec<u8>> {
        let limit = self.io_timeout;
        let Some(stream) = self.stream.as_mut() else {
            return Err(NetError::Closed);
        };
        match with_timeout(limit, framing::read_frame(stream, &mut self.decoder)).await {
            Ok(body) => Ok(body),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Close on fatal errors and hand the error back.
    fn fail(&mut self, err: NetError) -> NetError {
        if err.is_fatal() {
            log::debug!("Closing connection to {}: {err}", self.peer);
            self.close();
        }
        err
    }

    /// Remote endpoint.
    pub fn address(&self) -> &Address {
        &self.peer
    }

    /// Local endpoint.
    pub fn local_address(&self) -> &Address {
        &self.local
    }

    /// Security strategy fixed at construction.
    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    /// Which side of the TCP connection this is.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Pipeline layer names in send order.
    pub fn middleware(&self) -> Vec<&'static str> {
        self.pipeline.names()
    }

    /// Whether the socket has been closed.
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Close the socket. Idempotent.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            log::debug!("Closed connection to {}", self.peer);
        }
    }
}

async fn with_timeout<T, F>(limit: Option<Duration>, fut: F) -> NetResult<T>
where
    F: Future<Output = NetResult<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await?,
        None => fut.await,
    }
}

/// Listening socket of a host.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local: Address,
}

impl Listener {
    /// Bind to `address`. Port 0 picks a free port.
    pub async fn bind(address: &Address) -> NetResult<Self> {
        let inner = TcpListener::bind((address.host.as_str(), address.port)).await?;
        let local = Address::from(inner.local_addr()?);
        Ok(Self { inner, local })
    }

    /// Address actually bound.
    pub fn local_address(&self) -> &Address {
        &self.local
    }

    /// Always [`Role::Listener`].
    pub fn role(&self) -> Role {
        Role::Listener
    }

    /// Wait for the next peer.
    pub async fn accept(&self) -> std::io::Result<(TcpStream, Address)> {
        let (stream, addr) = self.inner.accept().await?;
        Ok((stream, Address::from(addr)))
    }
}
