//! tollgate-network: connection servers that hand each accepted connection
//! to an [`Agent`].
//!
//! Two server kinds share one accept loop: [`TcpServer`] (length-prefixed
//! frames, see [`MsgParser`]) and [`WsServer`] (one binary WebSocket message
//! per frame, optional TLS). Every connection gets a bounded pending-write
//! queue drained by its own writer task.

mod conn;
mod error;
mod outbox;
mod parser;
mod server;
mod tcp;
mod tls;
mod ws;

pub use conn::{Agent, AgentFactory, Conn};
pub use error::{ConnError, NetworkError};
pub use parser::MsgParser;
pub use server::ServerHandle;
pub use tcp::{TcpConn, TcpServer, TcpServerConfig};
pub use tls::load_tls_acceptor;
pub use ws::{WsConn, WsServer, WsServerConfig};

pub use tollgate_codec::ByteOrder;

/// Defaults shared by both server kinds.
pub const DEFAULT_MAX_CONN_NUM: usize = 100;
pub const DEFAULT_PENDING_WRITE_NUM: usize = 100;
pub const DEFAULT_MAX_MSG_LEN: u32 = 4096;
