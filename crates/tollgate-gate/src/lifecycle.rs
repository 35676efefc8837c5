//! Connection lifecycle events delivered to the application.
//!
//! `Connected` is fire-and-forget. `Closed` carries a [`CloseAck`] and the
//! closing agent waits for it, so the application finishes its per-agent
//! cleanup before the connection task ends.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::agent::Agent;
use crate::error::NotifyError;

pub enum AgentEvent {
    Connected(Arc<Agent>),
    Closed { agent: Arc<Agent>, ack: CloseAck },
}

impl fmt::Debug for AgentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected(agent) => f.debug_tuple("Connected").field(agent).finish(),
            Self::Closed { agent, .. } => f.debug_struct("Closed").field("agent", agent).finish(),
        }
    }
}

/// Reply slot for a `Closed` event. Dropping it unanswered is reported to
/// the closing agent as [`NotifyError::AckDropped`].
#[derive(Debug)]
pub struct CloseAck(oneshot::Sender<Result<(), String>>);

impl CloseAck {
    pub fn ack(self) {
        let _ = self.0.send(Ok(()));
    }

    pub fn reject(self, reason: impl Into<String>) {
        let _ = self.0.send(Err(reason.into()));
    }
}

/// Sending side, cloned into every agent.
#[derive(Debug, Clone)]
pub struct LifecycleNotifier {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

/// Receiving side, owned by the application service.
#[derive(Debug)]
pub struct LifecycleEvents {
    rx: mpsc::UnboundedReceiver<AgentEvent>,
}

pub fn channel() -> (LifecycleNotifier, LifecycleEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LifecycleNotifier { tx }, LifecycleEvents { rx })
}

impl LifecycleNotifier {
    pub fn connected(&self, agent: Arc<Agent>) {
        if self.tx.send(AgentEvent::Connected(agent)).is_err() {
            tracing::debug!("lifecycle receiver gone, connect event dropped");
        }
    }

    /// Send `Closed` and wait for the application's answer.
    pub async fn closed(&self, agent: Arc<Agent>) -> Result<(), NotifyError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(AgentEvent::Closed {
                agent,
                ack: CloseAck(tx),
            })
            .map_err(|_| NotifyError::ServiceGone)?;
        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(NotifyError::Rejected(reason)),
            Err(_) => Err(NotifyError::AckDropped),
        }
    }
}

impl LifecycleEvents {
    /// `None` once every notifier (and so every agent) is gone.
    pub async fn recv(&mut self) -> Option<AgentEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<AgentEvent> {
        self.rx.try_recv().ok()
    }
}
