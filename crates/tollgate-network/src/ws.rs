//! WebSocket server: one binary message per frame, optional TLS.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;

use crate::conn::{AgentFactory, Conn};
use crate::error::{ConnError, NetworkError};
use crate::outbox::{FrameSink, Outbox};
use crate::server::{self, ServerHandle};
use crate::tls::load_tls_acceptor;
use crate::{DEFAULT_MAX_CONN_NUM, DEFAULT_MAX_MSG_LEN, DEFAULT_PENDING_WRITE_NUM};

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct WsServerConfig {
    pub addr: String,
    pub max_conn_num: usize,
    pub pending_write_num: usize,
    pub max_msg_len: u32,
    /// Upper bound on the TLS plus WebSocket handshake.
    pub http_timeout: Duration,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

impl Default for WsServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:0".into(),
            max_conn_num: DEFAULT_MAX_CONN_NUM,
            pending_write_num: DEFAULT_PENDING_WRITE_NUM,
            max_msg_len: DEFAULT_MAX_MSG_LEN,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            cert_file: None,
            key_file: None,
        }
    }
}

#[derive(Clone)]
struct Settings {
    pending_write_num: usize,
    max_msg_len: usize,
    http_timeout: Duration,
    tls: Option<TlsAcceptor>,
    factory: AgentFactory,
}

pub struct WsServer {
    config: WsServerConfig,
    factory: AgentFactory,
}

impl WsServer {
    pub fn new(config: WsServerConfig, factory: AgentFactory) -> Self {
        Self { config, factory }
    }

    /// Load TLS material if configured, bind, and start accepting.
    pub async fn start(self) -> Result<ServerHandle, NetworkError> {
        let Self { config, factory } = self;
        let tls = match (&config.cert_file, &config.key_file) {
            (Some(cert), Some(key)) => Some(load_tls_acceptor(cert, key)?),
            (None, None) => None,
            _ => return Err(NetworkError::TlsIncomplete),
        };
        let listener = TcpListener::bind(&config.addr)
            .await
            .map_err(|source| NetworkError::Bind {
                addr: config.addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(NetworkError::LocalAddr)?;
        if tls.is_some() {
            tracing::info!(addr = %local_addr, "websocket server uses TLS");
        }

        let settings = Settings {
            pending_write_num: config.pending_write_num,
            max_msg_len: config.max_msg_len as usize,
            http_timeout: config.http_timeout,
            tls,
            factory,
        };
        Ok(server::spawn_accept_loop(
            listener,
            local_addr,
            "ws",
            config.max_conn_num,
            move |stream, peer, closed| {
                let settings = settings.clone();
                async move { accept(stream, peer, closed, settings).await }
            },
        ))
    }
}

async fn accept(stream: TcpStream, peer: SocketAddr, closed: CancellationToken, settings: Settings) {
    let local_addr = match stream.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::debug!(peer = %peer, error = %e, "ws: local address unavailable");
            return;
        }
    };
    let timeout = settings.http_timeout;
    match settings.tls.clone() {
        Some(acceptor) => {
            let handshake = async {
                let tls = acceptor.accept(stream).await.map_err(ConnError::Io)?;
                upgrade(tls, settings.max_msg_len).await
            };
            match tokio::time::timeout(timeout, handshake).await {
                Ok(Ok(ws)) => serve(ws, local_addr, peer, closed, &settings).await,
                Ok(Err(e)) => tracing::debug!(peer = %peer, error = %e, "wss handshake failed"),
                Err(_) => tracing::debug!(peer = %peer, ?timeout, "wss handshake timed out"),
            }
        }
        None => match tokio::time::timeout(timeout, upgrade(stream, settings.max_msg_len)).await {
            Ok(Ok(ws)) => serve(ws, local_addr, peer, closed, &settings).await,
            Ok(Err(e)) => tracing::debug!(peer = %peer, error = %e, "ws handshake failed"),
            Err(_) => tracing::debug!(peer = %peer, ?timeout, "ws handshake timed out"),
        },
    }
}

async fn upgrade<S>(stream: S, max_msg_len: usize) -> Result<WebSocketStream<S>, ConnError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_msg_len);
    config.max_frame_size = Some(max_msg_len);
    Ok(tokio_tungstenite::accept_async_with_config(stream, Some(config)).await?)
}

async fn serve<S>(
    ws: WebSocketStream<S>,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    closed: CancellationToken,
    settings: &Settings,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    let conn: Arc<dyn Conn> = Arc::new(WsConn {
        reader: Mutex::new(stream),
        outbox: Outbox::spawn(WsSink(sink), settings.pending_write_num, closed),
        max_msg_len: settings.max_msg_len,
        local_addr,
        remote_addr,
    });
    server::drive(conn, &settings.factory).await;
}

/// WebSocket connection. Each binary (or text) message is one frame.
pub struct WsConn<S> {
    reader: Mutex<SplitStream<WebSocketStream<S>>>,
    outbox: Outbox,
    max_msg_len: usize,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
}

#[async_trait]
impl<S> Conn for WsConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn read_msg(&self) -> Result<Vec<u8>, ConnError> {
        let mut reader = self.reader.lock().await;
        loop {
            let next = tokio::select! {
                biased;
                () = self.outbox.closed() => return Err(ConnError::Closed),
                next = reader.next() => next,
            };
            match next {
                Some(Ok(Message::Binary(data))) => return Ok(data),
                Some(Ok(Message::Text(text))) => return Ok(text.into_bytes()),
                Some(Ok(Message::Close(_))) | None => return Err(ConnError::Closed),
                // ping/pong are answered by the protocol layer
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn closed(&self) {
        self.outbox.closed().await;
    }

    fn write_msg(&self, parts: &[&[u8]]) -> Result<(), ConnError> {
        let len: usize = parts.iter().map(|p| p.len()).sum();
        if len > self.max_msg_len {
            return Err(ConnError::MessageTooLong {
                len,
                max: self.max_msg_len,
            });
        }
        if len < 1 {
            return Err(ConnError::MessageTooShort { len, min: 1 });
        }
        self.outbox.push(parts.concat())
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    fn close(&self) {
        self.outbox.close();
    }

    fn destroy(&self) {
        self.outbox.destroy();
    }
}

struct WsSink<S>(SplitSink<WebSocketStream<S>, Message>);

#[async_trait]
impl<S> FrameSink for WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send_frame(&mut self, frame: Vec<u8>) -> Result<(), ConnError> {
        self.0.send(Message::Binary(frame)).await?;
        Ok(())
    }

    async fn finish(&mut self) {
        if let Err(e) = self.0.close().await {
            tracing::debug!(error = %e, "ws close failed");
        }
    }
}
