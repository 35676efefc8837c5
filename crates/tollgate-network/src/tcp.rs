//! Length-prefixed TCP server.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

use tollgate_codec::ByteOrder;

use crate::conn::{AgentFactory, Conn};
use crate::error::{ConnError, NetworkError};
use crate::outbox::{FrameSink, Outbox};
use crate::parser::MsgParser;
use crate::server::{self, ServerHandle};
use crate::{DEFAULT_MAX_CONN_NUM, DEFAULT_MAX_MSG_LEN, DEFAULT_PENDING_WRITE_NUM};

#[derive(Debug, Clone)]
pub struct TcpServerConfig {
    pub addr: String,
    pub max_conn_num: usize,
    pub pending_write_num: usize,
    /// Length prefix size in bytes: 1, 2 or 4.
    pub len_msg_len: usize,
    pub min_msg_len: u32,
    pub max_msg_len: u32,
    pub byte_order: ByteOrder,
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:0".into(),
            max_conn_num: DEFAULT_MAX_CONN_NUM,
            pending_write_num: DEFAULT_PENDING_WRITE_NUM,
            len_msg_len: 2,
            min_msg_len: 1,
            max_msg_len: DEFAULT_MAX_MSG_LEN,
            byte_order: ByteOrder::BigEndian,
        }
    }
}

pub struct TcpServer {
    config: TcpServerConfig,
    factory: AgentFactory,
}

impl TcpServer {
    pub fn new(config: TcpServerConfig, factory: AgentFactory) -> Self {
        Self { config, factory }
    }

    /// Bind and start accepting. Returns once the listener is bound.
    pub async fn start(self) -> Result<ServerHandle, NetworkError> {
        let Self { config, factory } = self;
        let parser = MsgParser::new(
            config.len_msg_len,
            config.min_msg_len,
            config.max_msg_len,
            config.byte_order,
        )?;
        let listener = TcpListener::bind(&config.addr)
            .await
            .map_err(|source| NetworkError::Bind {
                addr: config.addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(NetworkError::LocalAddr)?;
        let pending_write_num = config.pending_write_num;

        Ok(server::spawn_accept_loop(
            listener,
            local_addr,
            "tcp",
            config.max_conn_num,
            move |stream, peer, closed| {
                let factory = Arc::clone(&factory);
                async move {
                    let _ = stream.set_nodelay(true);
                    let local = stream.local_addr().unwrap_or(local_addr);
                    let (read_half, write_half) = stream.into_split();
                    let conn: Arc<dyn Conn> = Arc::new(TcpConn {
                        reader: Mutex::new(BufReader::new(read_half)),
                        parser,
                        outbox: Outbox::spawn(TcpSink(write_half), pending_write_num, closed),
                        local_addr: local,
                        remote_addr: peer,
                    });
                    server::drive(conn, &factory).await;
                }
            },
        ))
    }
}

/// TCP connection carrying length-prefixed frames.
pub struct TcpConn {
    reader: Mutex<BufReader<OwnedReadHalf>>,
    parser: MsgParser,
    outbox: Outbox,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
}

#[async_trait]
impl Conn for TcpConn {
    async fn read_msg(&self) -> Result<Vec<u8>, ConnError> {
        let mut reader = self.reader.lock().await;
        tokio::select! {
            biased;
            () = self.outbox.closed() => Err(ConnError::Closed),
            read = self.parser.read(&mut *reader) => read,
        }
    }

    async fn closed(&self) {
        self.outbox.closed().await;
    }

    fn write_msg(&self, parts: &[&[u8]]) -> Result<(), ConnError> {
        let frame = self.parser.encode(parts)?;
        self.outbox.push(frame)
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

struct TcpSink(OwnedWriteHalf);

#[async_trait]
impl FrameSink for TcpSink {
    async fn send_frame(&mut self, frame: Vec<u8>) -> Result<(), ConnError> {
        self.0.write_all(&frame).await?;
        Ok(())
    }

    async fn finish(&mut self) {
        if let Err(e) = self.0.shutdown().await {
            tracing::debug!(error = %e, "tcp shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::Agent;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::net::TcpStream;

    struct Echo {
        conn: Arc<dyn Conn>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Agent for Echo {
        async fn run(self: Arc<Self>) {
            while let Ok(data) = self.conn.read_msg().await {
                if self.conn.write_msg(&[&data]).is_err() {
                    break;
                }
            }
        }

        async fn on_close(self: Arc<Self>) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn echo_factory(closed: Arc<AtomicUsize>) -> AgentFactory {
        Arc::new(move |conn| {
            Arc::new(Echo {
                conn,
                closed: Arc::clone(&closed),
            }) as Arc<dyn Agent>
        })
    }

    async fn start(config: TcpServerConfig) -> (ServerHandle, Arc<AtomicUsize>) {
        let closed = Arc::new(AtomicUsize::new(0));
        let handle = TcpServer::new(config, echo_factory(Arc::clone(&closed)))
            .start()
            .await
            .unwrap();
        (handle, closed)
    }

    #[tokio::test]
    async fn echoes_frames() {
        let (handle, _) = start(TcpServerConfig::default()).await;
        let parser = MsgParser::default();
        let mut client = TcpStream::connect(handle.local_addr()).await.unwrap();

        parser.write(&mut client, &[b"hello"]).await.unwrap();
        assert_eq!(parser.read(&mut client).await.unwrap(), b"hello");
        parser.write(&mut client, &[b"a", b"b"]).await.unwrap();
        assert_eq!(parser.read(&mut client).await.unwrap(), b"ab");

        handle.close().await;
    }

    #[tokio::test]
    async fn rejects_connections_over_the_limit() {
        let (handle, _) = start(TcpServerConfig {
            max_conn_num: 1,
            ..TcpServerConfig::default()
        })
        .await;
        let parser = MsgParser::default();

        let mut first = TcpStream::connect(handle.local_addr()).await.unwrap();
        parser.write(&mut first, &[b"1"]).await.unwrap();
        assert_eq!(parser.read(&mut first).await.unwrap(), b"1");

        let mut second = TcpStream::connect(handle.local_addr()).await.unwrap();
        let _ = parser.write(&mut second, &[b"2"]).await;
        let read = tokio::time::timeout(Duration::from_secs(2), parser.read(&mut second))
            .await
            .unwrap();
        assert!(read.is_err(), "second connection should be dropped");

        handle.close().await;
    }

    #[tokio::test]
    async fn oversized_frame_closes_the_connection() {
        let (handle, closed) = start(TcpServerConfig {
            max_msg_len: 8,
            ..TcpServerConfig::default()
        })
        .await;
        let mut client = TcpStream::connect(handle.local_addr()).await.unwrap();

        client.write_all(&[0x00, 0x40]).await.unwrap();
        let parser = MsgParser::default();
        let read = tokio::time::timeout(Duration::from_secs(2), parser.read(&mut client))
            .await
            .unwrap();
        assert!(read.is_err());

        handle.close().await;
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_ends_every_connection_and_runs_on_close_once() {
        let (handle, closed) = start(TcpServerConfig::default()).await;
        let parser = MsgParser::default();

        let mut clients = Vec::new();
        for _ in 0..3 {
            let mut client = TcpStream::connect(handle.local_addr()).await.unwrap();
            parser.write(&mut client, &[b"x"]).await.unwrap();
            assert_eq!(parser.read(&mut client).await.unwrap(), b"x");
            clients.push(client);
        }

        tokio::time::timeout(Duration::from_secs(2), handle.close())
            .await
            .unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rejects_bad_prefix_size_at_start() {
        let closed = Arc::new(AtomicUsize::new(0));
        let err = TcpServer::new(
            TcpServerConfig {
                len_msg_len: 3,
                ..TcpServerConfig::default()
            },
            echo_factory(closed),
        )
        .start()
        .await
        .unwrap_err();
        assert!(matches!(err, NetworkError::InvalidLenMsgLen(3)));
    }
}
