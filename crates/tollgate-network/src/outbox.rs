//! Bounded pending-write queue and the writer task that drains it.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::ConnError;

/// Destination of encoded frames (socket write half, WebSocket sink).
#[async_trait]
pub(crate) trait FrameSink: Send + 'static {
    async fn send_frame(&mut self, frame: Vec<u8>) -> Result<(), ConnError>;

    /// Called after a graceful drain.
    async fn finish(&mut self);
}

/// Write side of a connection plus its close state.
///
/// `closed` fails pending reads; it is a child of the server's token so a
/// server shutdown reaches every connection. `destroyed` additionally makes
/// the writer abandon queued frames.
#[derive(Debug)]
pub(crate) struct Outbox {
    tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    capacity: usize,
    closed: CancellationToken,
    destroyed: CancellationToken,
}

impl Outbox {
    pub(crate) fn spawn<S: FrameSink>(sink: S, capacity: usize, closed: CancellationToken) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let destroyed = CancellationToken::new();
        tokio::spawn(write_loop(sink, rx, closed.clone(), destroyed.clone()));
        Self {
            tx: Mutex::new(Some(tx)),
            capacity,
            closed,
            destroyed,
        }
    }

    pub(crate) fn push(&self, frame: Vec<u8>) -> Result<(), ConnError> {
        let result = {
            let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.as_ref() {
                Some(tx) => tx.try_send(frame),
                None => return Err(ConnError::Closed),
            }
        };
        match result {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::debug!(capacity = self.capacity, "close conn: pending write queue full");
                self.destroy();
                Err(ConnError::PendingWriteOverflow {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Closed(_)) => Err(ConnError::Closed),
        }
    }

    pub(crate) fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    pub(crate) fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.closed.cancel();
    }

    pub(crate) fn destroy(&self) {
        self.destroyed.cancel();
        self.close();
    }
}

impl Drop for Outbox {
    fn drop(&mut self) {
        self.close();
    }
}

async fn write_loop<S: FrameSink>(
    mut sink: S,
    mut rx: mpsc::Receiver<Vec<u8>>,
    closed: CancellationToken,
    destroyed: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = destroyed.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => tokio::select! {
                    biased;
                    () = destroyed.cancelled() => break,
                    sent = sink.send_frame(frame) => if let Err(err) = sent {
                        tracing::debug!(error = %err, "write failed, closing connection");
                        break;
                    },
                },
                None => {
                    sink.finish().await;
                    break;
                }
            },
        }
    }
    closed.cancel();
}
