//! Asynchronous delivery of routed messages to a worker task.
//!
//! A [`Router`] is attached to one or more message types at registration
//! time; routing a message of those types enqueues a [`Delivery`] and returns
//! without waiting for it to be processed. The consuming side holds the
//! [`Mailbox`].

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use serde::{Deserialize, Serialize};

use crate::MsgId;
use crate::error::RouteError;
use crate::message::{Message, TypedMessage};

/// What happens when the router queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for queue capacity. A stalled consumer stalls the connection
    /// that is routing, and only that connection.
    #[default]
    Block,
    /// Drop the new delivery and log a warning.
    DropNewest,
}

/// One routed message together with the connection it came from.
#[derive(Debug)]
pub struct Delivery<C> {
    pub id: MsgId,
    pub message: TypedMessage,
    pub origin: C,
}

impl<C> Delivery<C> {
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.message.downcast_ref::<T>()
    }
}

/// Sending half attached to message descriptors.
#[derive(Debug)]
pub struct Router<C> {
    tx: mpsc::Sender<Delivery<C>>,
    policy: OverflowPolicy,
}

impl<C> Clone for Router<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            policy: self.policy,
        }
    }
}

/// Receiving half consumed by the async subsystem.
#[derive(Debug)]
pub struct Mailbox<C> {
    rx: mpsc::Receiver<Delivery<C>>,
}

/// Create a bounded router channel. A zero capacity is raised to one.
pub fn channel<C>(capacity: usize, policy: OverflowPolicy) -> (Router<C>, Mailbox<C>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Router { tx, policy }, Mailbox { rx })
}

impl<C: Send> Router<C> {
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) async fn enqueue(&self, delivery: Delivery<C>) -> Result<(), RouteError> {
        match self.policy {
            OverflowPolicy::Block => self.tx.send(delivery).await.map_err(|err| {
                RouteError::RouterClosed {
                    type_name: err.0.message.type_name(),
                }
            }),
            OverflowPolicy::DropNewest => match self.tx.try_send(delivery) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(dropped)) => {
                    tracing::warn!(
                        msg_id = dropped.id,
                        msg_type = dropped.message.type_name(),
                        "router queue full, dropping message"
                    );
                    Ok(())
                }
                Err(TrySendError::Closed(dropped)) => Err(RouteError::RouterClosed {
                    type_name: dropped.message.type_name(),
                }),
            },
        }
    }
}

impl<C> Mailbox<C> {
    /// Wait for the next delivery. `None` once every router is dropped.
    pub async fn recv(&mut self) -> Option<Delivery<C>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Delivery<C>> {
        self.rx.try_recv().ok()
    }

    /// Stop accepting deliveries; routing to this mailbox then fails.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
