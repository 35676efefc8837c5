use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use tollgate_codec::Message;
use tollgate_gate::lifecycle::{self, AgentEvent};
use tollgate_gate::{Agent, Gate, GateConfig};

#[derive(Debug, Serialize, Deserialize)]
struct Echo {
    text: String,
}
impl Message for Echo {}

#[tokio::test]
async fn ws_gate_answers_through_the_agent_and_reports_lifecycle() {
    let mut builder = GateConfig::default().registry_builder::<Arc<Agent>>();
    builder.register::<Echo>().unwrap();
    builder
        .set_handler::<Echo, _>(|echo, agent| {
            agent.write_msg(&Echo {
                text: echo.text.to_uppercase(),
            })
        })
        .unwrap();
    let config = GateConfig {
        ws_addr: Some("127.0.0.1:0".into()),
        ..GateConfig::default()
    };
    let (notifier, mut events) = lifecycle::channel();
    let gate = Gate::new(config, builder.seal()).with_lifecycle(notifier);
    let running = gate.start().await.unwrap();
    assert!(running.tcp_addr().is_none());
    let url = format!("ws://{}", running.ws_addr().unwrap());

    let service = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            match event {
                AgentEvent::Connected(_) => seen.push("connected"),
                AgentEvent::Closed { ack, .. } => {
                    seen.push("closed");
                    ack.ack();
                    break;
                }
            }
        }
        seen
    });

    let registry = gate.registry();
    let (mut client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    let frame = registry
        .marshal(&Echo {
            text: "over ws".into(),
        })
        .unwrap();
    client
        .send(WsMessage::Binary(frame.to_bytes()))
        .await
        .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let WsMessage::Binary(data) = reply else {
        panic!("expected a binary reply, got {reply:?}");
    };
    let incoming = registry.unmarshal(&data).unwrap();
    let echo = incoming
        .as_typed()
        .and_then(|m| m.downcast_ref::<Echo>())
        .unwrap();
    assert_eq!(echo.text, "OVER WS");

    client.close(None).await.unwrap();
    let seen = tokio::time::timeout(Duration::from_secs(2), service)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen, ["connected", "closed"]);

    running.close().await;
}
