//! Gate: starts the configured servers and hands each connection to an agent.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tollgate_network::{self as network, AgentFactory, ServerHandle, TcpServer, WsServer};

use crate::agent::{Agent, GateRegistry};
use crate::config::GateConfig;
use crate::error::GateError;
use crate::lifecycle::LifecycleNotifier;

/// Gateway module: owns the server settings and the sealed registry.
#[derive(Debug)]
pub struct Gate {
    config: GateConfig,
    registry: Arc<GateRegistry>,
    lifecycle: Option<LifecycleNotifier>,
}

/// Servers started by [`Gate::start`].
#[derive(Debug)]
pub struct RunningGate {
    tcp: Option<ServerHandle>,
    ws: Option<ServerHandle>,
}

impl Gate {
    pub fn new(config: GateConfig, registry: impl Into<Arc<GateRegistry>>) -> Self {
        Self {
            config,
            registry: registry.into(),
            lifecycle: None,
        }
    }

    /// Send agent open/close events to `notifier`.
    pub fn with_lifecycle(mut self, notifier: LifecycleNotifier) -> Self {
        self.lifecycle = Some(notifier);
        self
    }

    pub fn registry(&self) -> &Arc<GateRegistry> {
        &self.registry
    }

    /// Start every configured server. With no address configured the gate
    /// is idle but valid.
    pub async fn start(&self) -> Result<RunningGate, GateError> {
        let mut running = RunningGate { tcp: None, ws: None };

        if let Some(addr) = &self.config.ws_addr {
            let server = WsServer::new(self.config.ws_server_config(addr), self.factory());
            let handle = server.start().await.map_err(|source| GateError::Start {
                kind: "websocket",
                source,
            })?;
            running.ws = Some(handle);
        }

        if let Some(addr) = &self.config.tcp_addr {
            let server = TcpServer::new(self.config.tcp_server_config(addr), self.factory());
            match server.start().await {
                Ok(handle) => running.tcp = Some(handle),
                Err(source) => {
                    running.close().await;
                    return Err(GateError::Start { kind: "tcp", source });
                }
            }
        }

        if running.tcp.is_none() && running.ws.is_none() {
            tracing::info!("gate has no listener configured");
        }
        Ok(running)
    }

    /// Serve until `shutdown` fires, then close every listener and wait for
    /// live connections to finish.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), GateError> {
        let running = self.start().await?;
        shutdown.cancelled().await;
        tracing::info!("gate shutting down");
        running.close().await;
        self.on_destroy();
        Ok(())
    }

    /// Hook run after the gate's servers are closed.
    pub fn on_destroy(&self) {}

    fn factory(&self) -> AgentFactory {
        let registry = Arc::clone(&self.registry);
        let lifecycle = self.lifecycle.clone();
        Arc::new(move |conn| {
            let agent = Agent::new(conn, Arc::clone(&registry), lifecycle.clone());
            if let Some(lifecycle) = &lifecycle {
                lifecycle.connected(Arc::clone(&agent));
            }
            agent as Arc<dyn network::Agent>
        })
    }
}

impl RunningGate {
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp.as_ref().map(ServerHandle::local_addr)
    }

    pub fn ws_addr(&self) -> Option<SocketAddr> {
        self.ws.as_ref().map(ServerHandle::local_addr)
    }

    pub async fn close(self) {
        if let Some(ws) = &self.ws {
            ws.close().await;
        }
        if let Some(tcp) = &self.tcp {
            tcp.close().await;
        }
    }
}
