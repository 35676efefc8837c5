//! Per-connection agent: read, decode, route.

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use tollgate_codec::{Frame, Message, RawMessage, Registry, RegistryBuilder, TypedMessage};
use tollgate_network::{self as network, Conn};

use crate::lifecycle::LifecycleNotifier;

/// Registry whose handlers and routers receive the originating agent.
pub type GateRegistry = Registry<Arc<Agent>>;
pub type GateRegistryBuilder = RegistryBuilder<Arc<Agent>>;

type UserData = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Open,
    /// The read loop has ended; close notification pending.
    Closing,
    Closed,
}

pub struct Agent {
    conn: Arc<dyn Conn>,
    registry: Arc<GateRegistry>,
    lifecycle: Option<LifecycleNotifier>,
    state: Mutex<AgentState>,
    user_data: Mutex<Option<UserData>>,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("remote_addr", &self.conn.remote_addr())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Agent {
    pub(crate) fn new(
        conn: Arc<dyn Conn>,
        registry: Arc<GateRegistry>,
        lifecycle: Option<LifecycleNotifier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            conn,
            registry,
            lifecycle,
            state: Mutex::new(AgentState::Open),
            user_data: Mutex::new(None),
        })
    }

    pub fn state(&self) -> AgentState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: AgentState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Encode and queue `message`. Failures are logged, not returned.
    pub fn write_msg<T: Message>(&self, message: &T) {
        match self.registry.marshal(message) {
            Ok(frame) => self.write_frame(&frame),
            Err(e) => tracing::error!(remote = %self.conn.remote_addr(), error = %e, "marshal message"),
        }
    }

    pub fn write_typed(&self, message: &TypedMessage) {
        match self.registry.marshal_typed(message) {
            Ok(frame) => self.write_frame(&frame),
            Err(e) => tracing::error!(remote = %self.conn.remote_addr(), error = %e, "marshal message"),
        }
    }

    /// Queue a passthrough message without touching its payload.
    pub fn write_raw(&self, message: &RawMessage) {
        self.write_frame(&self.registry.marshal_raw(message));
    }

    fn write_frame(&self, frame: &Frame) {
        if let Err(e) = self.conn.write_msg(&frame.parts()) {
            tracing::error!(remote = %self.conn.remote_addr(), error = %e, "write message");
        }
    }

    /// Flush pending writes, then close.
    pub fn close(&self) {
        self.conn.close();
    }

    /// Close without flushing.
    pub fn destroy(&self) {
        self.conn.destroy();
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.conn.local_addr()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.conn.remote_addr()
    }

    pub fn user_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.user_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The user data, if it is a `T`.
    pub fn user_data_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.user_data().and_then(|data| data.downcast::<T>().ok())
    }

    pub fn set_user_data<T: Any + Send + Sync>(&self, data: T) {
        *self.user_data.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(data));
    }
}

#[async_trait]
impl network::Agent for Agent {
    async fn run(self: Arc<Self>) {
        loop {
            let data = match self.conn.read_msg().await {
                Ok(data) => data,
                Err(e) => {
                    tracing::debug!(remote = %self.conn.remote_addr(), error = %e, "read message");
                    break;
                }
            };
            let message = match self.registry.unmarshal(&data) {
                Ok(message) => message,
                Err(e) => {
                    tracing::debug!(remote = %self.conn.remote_addr(), error = %e, "unmarshal message");
                    break;
                }
            };
            // a blocked router must not outlive the connection
            let routed = tokio::select! {
                biased;
                routed = self.registry.route(message, &self) => routed,
                () = self.conn.closed() => {
                    tracing::debug!(remote = %self.conn.remote_addr(), "connection closed while routing");
                    break;
                }
            };
            if let Err(e) = routed {
                tracing::debug!(remote = %self.conn.remote_addr(), error = %e, "route message");
                break;
            }
        }
        self.set_state(AgentState::Closing);
    }

    async fn on_close(self: Arc<Self>) {
        self.set_state(AgentState::Closing);
        if let Some(lifecycle) = &self.lifecycle {
            if let Err(e) = lifecycle.closed(Arc::clone(&self)).await {
                tracing::error!(remote = %self.conn.remote_addr(), error = %e, "close notification");
            }
        }
        self.set_state(AgentState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{self, AgentEvent};
    use network::{Agent as _, ConnError};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use tollgate_codec::router::{self, OverflowPolicy};

    #[derive(Debug, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }
    impl Message for Ping {}

    #[derive(Debug, Serialize, Deserialize)]
    struct Pong {
        seq: u32,
    }
    impl Message for Pong {}

    #[derive(Debug, Serialize, Deserialize)]
    struct Unknown;
    impl Message for Unknown {}

    /// Scripted connection: reads come from a channel, writes are recorded.
    struct FakeConn {
        incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
        written: Mutex<Vec<Vec<u8>>>,
        closed: AtomicUsize,
        shutdown: CancellationToken,
    }

    impl FakeConn {
        fn scripted(frames: Vec<Vec<u8>>) -> Arc<Self> {
            let (tx, rx) = mpsc::unbounded_channel();
            for frame in frames {
                tx.send(frame).unwrap();
            }
            Arc::new(Self {
                incoming: tokio::sync::Mutex::new(rx),
                written: Mutex::new(Vec::new()),
                closed: AtomicUsize::new(0),
                shutdown: CancellationToken::new(),
            })
        }
    }

    #[async_trait]
    impl Conn for FakeConn {
        async fn read_msg(&self) -> Result<Vec<u8>, ConnError> {
            self.incoming.lock().await.recv().await.ok_or(ConnError::Closed)
        }

        async fn closed(&self) {
            self.shutdown.cancelled().await;
        }

        fn write_msg(&self, parts: &[&[u8]]) -> Result<(), ConnError> {
            self.written.lock().unwrap().push(parts.concat());
            Ok(())
        }

        fn local_addr(&self) -> SocketAddr {
            "127.0.0.1:3563".parse().unwrap()
        }

        fn remote_addr(&self) -> SocketAddr {
            "127.0.0.1:50000".parse().unwrap()
        }

        fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
            self.shutdown.cancel();
        }

        fn destroy(&self) {
            self.close();
        }
    }

    fn ping_registry(replies: bool, seen: Arc<AtomicUsize>) -> Arc<GateRegistry> {
        let mut builder = GateRegistryBuilder::new();
        builder.register::<Ping>().unwrap();
        builder.register::<Pong>().unwrap();
        builder
            .set_handler::<Ping, _>(move |ping, agent| {
                seen.fetch_add(1, Ordering::SeqCst);
                if replies {
                    agent.write_msg(&Pong { seq: ping.seq });
                }
            })
            .unwrap();
        Arc::new(builder.seal())
    }

    fn ping_frame(registry: &GateRegistry, seq: u32) -> Vec<u8> {
        registry.marshal(&Ping { seq }).unwrap().to_bytes()
    }

    /// What the server does for each connection.
    async fn drive(agent: Arc<Agent>, conn: &FakeConn) {
        Arc::clone(&agent).run().await;
        conn.close();
        agent.on_close().await;
    }

    #[tokio::test]
    async fn handler_replies_through_the_connection() {
        let seen = Arc::new(AtomicUsize::new(0));
        let registry = ping_registry(true, Arc::clone(&seen));
        let conn = FakeConn::scripted(vec![ping_frame(&registry, 7), ping_frame(&registry, 8)]);
        let agent = Agent::new(conn.clone(), Arc::clone(&registry), None);

        drive(agent, &conn).await;

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        let written = conn.written.lock().unwrap().clone();
        assert_eq!(written.len(), 2);
        let first = registry.unmarshal(&written[0]).unwrap();
        let pong = first.as_typed().and_then(|m| m.downcast_ref::<Pong>()).unwrap();
        assert_eq!(pong.seq, 7);
    }

    #[tokio::test]
    async fn read_failure_sends_exactly_one_close_notification() {
        let registry = ping_registry(false, Arc::new(AtomicUsize::new(0)));
        let (notifier, mut events) = lifecycle::channel();
        let conn = FakeConn::scripted(Vec::new());
        let agent = Agent::new(conn.clone(), registry, Some(notifier));

        let service = tokio::spawn(async move {
            let mut closed = 0;
            while let Some(event) = events.recv().await {
                if let AgentEvent::Closed { ack, .. } = event {
                    closed += 1;
                    ack.ack();
                }
            }
            closed
        });

        drive(Arc::clone(&agent), &conn).await;
        assert_eq!(agent.state(), AgentState::Closed);
        assert_eq!(conn.closed.load(Ordering::SeqCst), 1);
        drop(agent);

        assert_eq!(service.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_id_stops_routing() {
        let seen = Arc::new(AtomicUsize::new(0));
        let registry = ping_registry(false, Arc::clone(&seen));
        let conn = FakeConn::scripted(vec![vec![0xff, 0xff], ping_frame(&registry, 1)]);
        let agent = Agent::new(conn.clone(), registry, None);

        drive(Arc::clone(&agent), &conn).await;

        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(agent.state(), AgentState::Closed);
    }

    #[tokio::test]
    async fn closed_router_stops_routing() {
        let (router, mut mailbox) = router::channel(4, OverflowPolicy::Block);
        mailbox.close();
        let mut builder = GateRegistryBuilder::new();
        builder.register::<Ping>().unwrap();
        builder.set_router::<Ping>(router).unwrap();
        let registry = Arc::new(builder.seal());
        let conn = FakeConn::scripted(vec![ping_frame(&registry, 1), ping_frame(&registry, 2)]);
        let agent = Agent::new(conn.clone(), registry, None);

        drive(agent, &conn).await;

        // the second frame is never read
        assert_eq!(conn.incoming.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn closing_the_connection_frees_an_agent_blocked_on_a_full_router() {
        let (router, mut mailbox) = router::channel(1, OverflowPolicy::Block);
        let mut builder = GateRegistryBuilder::new();
        builder.register::<Ping>().unwrap();
        builder.set_router::<Ping>(router).unwrap();
        let registry = Arc::new(builder.seal());
        let frames = (1..=3).map(|seq| ping_frame(&registry, seq)).collect();
        let conn = FakeConn::scripted(frames);
        let agent = Agent::new(conn.clone(), registry, None);

        let run = tokio::spawn(Arc::clone(&agent).run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!run.is_finished(), "second ping should wait for room");

        conn.close();
        tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("run must return once the connection closes")
            .unwrap();
        assert_eq!(agent.state(), AgentState::Closing);
        assert_eq!(mailbox.try_recv().unwrap().downcast_ref::<Ping>().unwrap().seq, 1);
    }

    #[tokio::test]
    async fn router_delivery_carries_the_agent() {
        let (router, mut mailbox) = router::channel(4, OverflowPolicy::Block);
        let mut builder = GateRegistryBuilder::new();
        builder.register::<Ping>().unwrap();
        builder.set_router::<Ping>(router).unwrap();
        let registry = Arc::new(builder.seal());
        let conn = FakeConn::scripted(vec![ping_frame(&registry, 42)]);
        let agent = Agent::new(conn.clone(), registry, None);

        drive(Arc::clone(&agent), &conn).await;

        let delivery = mailbox.try_recv().unwrap();
        assert_eq!(delivery.downcast_ref::<Ping>().unwrap().seq, 42);
        assert!(Arc::ptr_eq(&delivery.origin, &agent));
    }

    #[tokio::test]
    async fn dropped_ack_is_not_fatal() {
        let registry = ping_registry(false, Arc::new(AtomicUsize::new(0)));
        let (notifier, mut events) = lifecycle::channel();
        let conn = FakeConn::scripted(Vec::new());
        let agent = Agent::new(conn.clone(), registry, Some(notifier));

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                drop(event);
            }
        });

        drive(Arc::clone(&agent), &conn).await;
        assert_eq!(agent.state(), AgentState::Closed);
    }

    #[test]
    fn write_msg_swallows_unregistered_types() {
        let registry = ping_registry(false, Arc::new(AtomicUsize::new(0)));
        let conn = FakeConn::scripted(Vec::new());
        let agent = Agent::new(conn.clone(), registry, None);

        agent.write_msg(&Unknown);
        assert!(conn.written.lock().unwrap().is_empty());

        agent.write_raw(&RawMessage::new(9, vec![1, 2]));
        assert_eq!(conn.written.lock().unwrap()[0], vec![0, 9, 1, 2]);
    }

    #[test]
    fn user_data_round_trips_by_type() {
        #[derive(Debug, PartialEq)]
        struct Session(u64);

        let registry = ping_registry(false, Arc::new(AtomicUsize::new(0)));
        let agent = Agent::new(FakeConn::scripted(Vec::new()), registry, None);
        assert!(agent.user_data().is_none());

        agent.set_user_data(Session(5));
        assert_eq!(*agent.user_data_as::<Session>().unwrap(), Session(5));
        assert!(agent.user_data_as::<String>().is_none());
        assert_eq!(agent.state(), AgentState::Open);
    }
}
