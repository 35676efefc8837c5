//! Session service: tracks connected agents and answers routed pings.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use tollgate_codec::{Delivery, Mailbox};
use tollgate_gate::{Agent, AgentEvent, LifecycleEvents};

use crate::protocol::{Ping, Pong};

/// Per-agent state attached as user data on connect.
#[derive(Debug)]
pub struct Session {
    pub connected_at: DateTime<Utc>,
    pings: AtomicU64,
}

impl Session {
    pub fn new(connected_at: DateTime<Utc>) -> Self {
        Self {
            connected_at,
            pings: AtomicU64::new(0),
        }
    }

    pub fn pings(&self) -> u64 {
        self.pings.load(Ordering::Relaxed)
    }
}

/// Runs until the gate and every agent are gone.
pub async fn run(mut events: LifecycleEvents, mut pings: Mailbox<Arc<Agent>>) {
    let (mut events_open, mut pings_open) = (true, true);
    while events_open || pings_open {
        tokio::select! {
            event = events.recv(), if events_open => match event {
                Some(event) => on_event(event),
                None => events_open = false,
            },
            delivery = pings.recv(), if pings_open => match delivery {
                Some(delivery) => on_ping(&delivery),
                None => pings_open = false,
            },
        }
    }
    tracing::debug!("session service stopped");
}

fn on_event(event: AgentEvent) {
    match event {
        AgentEvent::Connected(agent) => {
            agent.set_user_data(Session::new(Utc::now()));
            tracing::info!(remote = %agent.remote_addr(), "agent connected");
        }
        AgentEvent::Closed { agent, ack } => {
            match agent.user_data_as::<Session>() {
                Some(session) => {
                    let secs = (Utc::now() - session.connected_at).num_seconds();
                    tracing::info!(
                        remote = %agent.remote_addr(),
                        connected_secs = secs,
                        pings = session.pings(),
                        "agent closed"
                    );
                }
                None => tracing::info!(remote = %agent.remote_addr(), "agent closed"),
            }
            ack.ack();
        }
    }
}

fn on_ping(delivery: &Delivery<Arc<Agent>>) {
    let Some(ping) = delivery.downcast_ref::<Ping>() else {
        return;
    };
    if let Some(session) = delivery.origin.user_data_as::<Session>() {
        session.pings.fetch_add(1, Ordering::Relaxed);
    }
    delivery.origin.write_msg(&Pong { seq: ping.seq });
}
