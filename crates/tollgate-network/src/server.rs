//! Accept loop and per-connection supervision shared by both server kinds.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::conn::{AgentFactory, Conn};

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// A started server. Dropping the handle does not stop the server; call
/// [`ServerHandle::close`].
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close every live connection, and wait until each
    /// connection's agent has finished `on_close`.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::debug!(addr = %self.local_addr, "server closed");
    }
}

/// Spawn the accept loop on `listener`.
///
/// `serve` gets the accepted stream plus a token that is cancelled when the
/// server closes; it runs on its own tracked task while holding one
/// connection slot.
pub(crate) fn spawn_accept_loop<F, Fut>(
    listener: TcpListener,
    local_addr: SocketAddr,
    kind: &'static str,
    max_conn_num: usize,
    serve: F,
) -> ServerHandle
where
    F: Fn(TcpStream, SocketAddr, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();
    let slots = Arc::new(Semaphore::new(max_conn_num));

    tracing::info!(kind, addr = %local_addr, max_conn_num, "server listening");

    let loop_cancel = cancel.clone();
    let loop_tracker = tracker.clone();
    tracker.spawn(async move {
        let mut backoff = ACCEPT_BACKOFF_MIN;
        loop {
            let accepted = tokio::select! {
                () = loop_cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(pair) => {
                    backoff = ACCEPT_BACKOFF_MIN;
                    pair
                }
                Err(e) => {
                    tracing::warn!(kind, error = %e, retry_in = ?backoff, "accept failed");
                    tokio::select! {
                        () = loop_cancel.cancelled() => break,
                        () = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
                    continue;
                }
            };

            let Ok(permit) = Arc::clone(&slots).try_acquire_owned() else {
                tracing::warn!(kind, peer = %peer, max = max_conn_num, "too many connections");
                drop(stream);
                continue;
            };
            tracing::debug!(kind, peer = %peer, "connection accepted");
            let conn_cancel = loop_cancel.child_token();
            let task = serve(stream, peer, conn_cancel);
            loop_tracker.spawn(async move {
                let _permit = permit;
                task.await;
            });
        }
        tracing::debug!(kind, "accept loop stopped");
    });

    ServerHandle {
        local_addr,
        cancel,
        tracker,
    }
}

/// Per-connection lifecycle: `run`, then close the connection, then
/// `on_close`.
pub(crate) async fn drive(conn: Arc<dyn Conn>, factory: &AgentFactory) {
    let agent = factory(Arc::clone(&conn));
    Arc::clone(&agent).run().await;
    conn.close();
    agent.on_close().await;
}
