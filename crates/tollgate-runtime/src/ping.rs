//! `tollgate ping`: round-trip timing over TCP.

use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::net::TcpStream;

use tollgate_codec::{Incoming, Registry};
use tollgate_gate::GateConfig;
use tollgate_network::MsgParser;

use crate::protocol::{self, Heartbeat, HeartbeatAck, Ping, Pong};

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

struct Client {
    stream: TcpStream,
    parser: MsgParser,
    registry: Registry<()>,
}

impl Client {
    async fn connect(addr: &str, config: &GateConfig) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connect to {addr}"))?;
        let parser = MsgParser::new(config.len_msg_len, 1, config.max_msg_len, config.byte_order)?;
        let registry = protocol::client_registry(config)?;
        Ok(Self {
            stream,
            parser,
            registry,
        })
    }

    async fn request<T: tollgate_codec::Message>(&mut self, message: &T) -> anyhow::Result<Incoming> {
        let frame = self.registry.marshal(message)?;
        self.parser.write(&mut self.stream, &frame.parts()).await?;
        let reply = tokio::time::timeout(REPLY_TIMEOUT, self.parser.read(&mut self.stream))
            .await
            .context("timed out waiting for reply")??;
        Ok(self.registry.unmarshal(&reply)?)
    }
}

/// Send `count` pings and one heartbeat; returns the ping round trips.
pub async fn ping(addr: &str, count: u32, config: &GateConfig) -> anyhow::Result<Vec<Duration>> {
    let mut client = Client::connect(addr, config).await?;
    let mut rtts = Vec::with_capacity(count as usize);

    for seq in 0..count {
        let started = Instant::now();
        let reply = client.request(&Ping { seq }).await?;
        let pong = reply
            .as_typed()
            .and_then(|m| m.downcast_ref::<Pong>())
            .with_context(|| format!("expected Pong, got {reply:?}"))?;
        anyhow::ensure!(pong.seq == seq, "pong for seq {} while waiting for {seq}", pong.seq);
        rtts.push(started.elapsed());
    }

    let reply = client.request(&Heartbeat {}).await?;
    anyhow::ensure!(
        reply.as_typed().is_some_and(|m| m.is::<HeartbeatAck>()),
        "expected HeartbeatAck, got {reply:?}"
    );
    Ok(rtts)
}

pub async fn cmd_ping(addr: &str, count: u32, config: &GateConfig) -> anyhow::Result<()> {
    let rtts = ping(addr, count, config).await?;
    for (seq, rtt) in rtts.iter().enumerate() {
        println!("pong from {addr}: seq={seq} time={:.3} ms", rtt.as_secs_f64() * 1000.0);
    }
    if !rtts.is_empty() {
        let total: Duration = rtts.iter().sum();
        let avg = total / rtts.len() as u32;
        println!(
            "{} pings, avg {:.3} ms",
            rtts.len(),
            avg.as_secs_f64() * 1000.0
        );
    }
    Ok(())
}
