//! Demo protocol spoken by `tollgate serve` and `tollgate ping`.
//!
//! Both sides register the same types in the same order, so ids agree:
//! Ping 0, Pong 1, Heartbeat 2, HeartbeatAck 3, Relay 4.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tollgate_codec::router::{self, OverflowPolicy};
use tollgate_codec::{Mailbox, Message, MsgId, Registry, RegistryBuilder, RegistryError};
use tollgate_gate::{Agent, GateConfig, GateRegistry};

const PING_QUEUE: usize = 1024;

pub const RELAY_ID: MsgId = 4;

/// Answered by the session service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub seq: u32,
}
impl Message for Ping {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub seq: u32,
}
impl Message for Pong {}

/// Answered inline on the connection's task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {}
impl Message for Heartbeat {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatAck {}
impl Message for HeartbeatAck {}

/// Opaque payload; the server echoes it without decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relay {
    pub data: Vec<u8>,
}
impl Message for Relay {}

fn register_all<C: 'static>(builder: &mut RegistryBuilder<C>) -> Result<(), RegistryError> {
    builder.register::<Ping>()?;
    builder.register::<Pong>()?;
    builder.register::<Heartbeat>()?;
    builder.register::<HeartbeatAck>()?;
    builder.register::<Relay>()?;
    Ok(())
}

/// Server registry plus the mailbox receiving routed pings.
pub fn server_registry(
    config: &GateConfig,
) -> Result<(GateRegistry, Mailbox<Arc<Agent>>), RegistryError> {
    let mut builder = config.registry_builder::<Arc<Agent>>();
    register_all(&mut builder)?;

    let (pings, mailbox) = router::channel(PING_QUEUE, OverflowPolicy::Block);
    builder.set_router::<Ping>(pings)?;
    builder.set_handler::<Heartbeat, _>(|_, agent| agent.write_msg(&HeartbeatAck {}))?;
    builder.set_raw_handler(RELAY_ID, |raw, agent: &Arc<Agent>| agent.write_raw(raw))?;

    Ok((builder.seal(), mailbox))
}

/// Client registry: same ids, no dispatch targets.
pub fn client_registry(config: &GateConfig) -> Result<Registry<()>, RegistryError> {
    let mut builder = config.registry_builder::<()>();
    register_all(&mut builder)?;
    Ok(builder.seal())
}
