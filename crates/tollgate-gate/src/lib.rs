//! tollgate-gate: binds connection servers to a sealed message registry.
//!
//! A [`Gate`] starts the configured TCP and/or WebSocket servers. Every
//! accepted connection gets an [`Agent`] that reads frames, decodes them
//! through the [`GateRegistry`] and routes them to handlers or routers.
//! Connection open/close events reach the application through the
//! [`lifecycle`] channel.

mod agent;
mod config;
mod error;
mod gate;
pub mod lifecycle;

pub use agent::{Agent, AgentState, GateRegistry, GateRegistryBuilder};
pub use config::GateConfig;
pub use error::{ConfigError, GateError, NotifyError};
pub use gate::{Gate, RunningGate};
pub use lifecycle::{AgentEvent, CloseAck, LifecycleEvents, LifecycleNotifier};
