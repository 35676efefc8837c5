//! The capability set a server offers per connection, and the agent it
//! expects back.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ConnError;

/// One accepted connection, independent of its framing.
#[async_trait]
pub trait Conn: Send + Sync + 'static {
    /// Block until one whole frame has arrived.
    ///
    /// Fails once the connection is closed, destroyed, or its server shuts
    /// down; this is how a read loop learns it must stop.
    async fn read_msg(&self) -> Result<Vec<u8>, ConnError>;

    /// Resolves once the connection is closed, destroyed, or its server
    /// shuts down.
    async fn closed(&self);

    /// Queue one frame made of `parts` for writing. Does not wait for the
    /// socket.
    fn write_msg(&self, parts: &[&[u8]]) -> Result<(), ConnError>;

    fn local_addr(&self) -> SocketAddr;

    fn remote_addr(&self) -> SocketAddr;

    /// Stop reading, flush queued writes, then close the socket.
    fn close(&self);

    /// Drop queued writes and release the socket immediately.
    fn destroy(&self);
}

/// Per-connection actor supervised by a server.
///
/// The server calls `run` once, closes the connection when it returns, then
/// calls `on_close` once.
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    async fn run(self: Arc<Self>);

    async fn on_close(self: Arc<Self>);
}

/// Called for every accepted connection.
pub type AgentFactory = Arc<dyn Fn(Arc<dyn Conn>) -> Arc<dyn Agent> + Send + Sync>;
