mod common;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::mpsc, time::timeout};
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};
use uuid::Uuid;
use voxrelay_api::ws::{
    protocol::ServerMessage,
    provider::{LiveInput, LiveOptions, start_live_session},
};
use voxrelay_core::{
    approval::InteractionMode,
    audio::MIC_FORMAT,
    converse::MockConverseClient,
    correction::InMemoryCorrectionStore,
    phase::RelayPhase,
};

/// A Live API stand-in: acknowledges setup, issues one delegate call and
/// records every client frame until the connection closes.
async fn fake_live_server(listener: TcpListener) -> Vec<Value> {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(stream).await.unwrap();

    let mut frames = Vec::new();
    let mut tool_call_sent = false;
    while let Some(Ok(msg)) = ws.next().await {
        let WsMessage::Text(text) = msg else {
            continue;
        };
        let frame: Value = serde_json::from_str(text.as_str()).unwrap();
        frames.push(frame);
        if !tool_call_sent {
            tool_call_sent = true;
            ws.send(WsMessage::Text(json!({ "setupComplete": {} }).to_string().into()))
                .await
                .unwrap();
            let call = json!({
                "toolCall": {
                    "functionCalls": [{
                        "id": "call-1",
                        "name": "converse",
                        "args": { "instruction": "list files" }
                    }]
                }
            });
            ws.send(WsMessage::Text(call.to_string().into()))
                .await
                .unwrap();
        }
    }
    frames
}

#[tokio::test]
async fn test_delegate_call_is_answered_with_agent_text() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(fake_live_server(listener));

    let agent = MockConverseClient::new(
        vec!["Found ".to_string(), "3 files.".to_string()],
        Duration::from_millis(10),
    );
    let state = common::test_state(
        common::test_config(&format!("ws://{}", addr)),
        Arc::new(agent),
        Arc::new(InMemoryCorrectionStore::default()),
    );

    let session_id = Uuid::new_v4();
    let (outbox, mut browser) = mpsc::channel(256);
    let options = LiveOptions {
        interaction_mode: InteractionMode::Direct,
        input_sample_rate: MIC_FORMAT.sample_rate,
    };
    let (control, handle) = start_live_session(state.clone(), session_id, options, outbox);

    let mut seen = Vec::new();
    let committed = timeout(Duration::from_secs(5), async {
        while let Some(msg) = browser.recv().await {
            seen.push(msg.clone());
            if let ServerMessage::TurnCommitted { turn } = msg {
                return Some(turn);
            }
        }
        None
    })
    .await
    .expect("timed out waiting for the turn")
    .expect("browser channel closed early");

    assert_eq!(committed.instruction.as_deref(), Some("list files"));
    assert_eq!(committed.agent_text, "Found 3 files.");

    let phases: Vec<RelayPhase> = seen
        .iter()
        .filter_map(|msg| match msg {
            ServerMessage::Phase { phase } => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![RelayPhase::Suppressing, RelayPhase::Relaying, RelayPhase::Idle]
    );
    assert!(seen.contains(&ServerMessage::AgentText {
        text: "3 files.".to_string()
    }));
    assert!(state.sessions.get(session_id).await.is_some());

    control.send(LiveInput::Rewind { to: 0 }).await.unwrap();
    let rewound = timeout(Duration::from_secs(5), async {
        while let Some(msg) = browser.recv().await {
            if let ServerMessage::Rewound { to, removed } = msg {
                return Some((to, removed));
            }
        }
        None
    })
    .await
    .expect("timed out waiting for the rewind")
    .expect("browser channel closed early");
    assert_eq!(rewound, (0, 1));

    control.send(LiveInput::Close).await.unwrap();
    timeout(Duration::from_secs(5), handle)
        .await
        .expect("session did not stop")
        .unwrap();
    assert!(state.sessions.get(session_id).await.is_none());

    let frames = timeout(Duration::from_secs(5), server)
        .await
        .expect("voice connection was not closed")
        .unwrap();

    let setup = &frames[0]["setup"];
    assert_eq!(setup["model"], "models/test-live");
    let declared: Vec<&str> = setup["tools"][0]["functionDeclarations"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|d| d["name"].as_str())
        .collect();
    assert!(declared.contains(&"converse"));
    assert!(declared.len() > 1, "side tools should be declared too");

    let responses: Vec<&Value> = frames
        .iter()
        .filter_map(|f| f.get("toolResponse"))
        .collect();
    assert_eq!(responses.len(), 1);
    let response = &responses[0]["functionResponses"][0];
    assert_eq!(response["id"], "call-1");
    assert_eq!(response["name"], "converse");
    assert_eq!(response["response"], json!({ "result": "Found 3 files." }));
}

#[tokio::test]
async fn test_unreachable_voice_service_reports_error() {
    // Bind then drop, so nothing is listening on the port.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let state = common::test_state(
        common::test_config(&format!("ws://{}", addr)),
        Arc::new(MockConverseClient::default()),
        Arc::new(InMemoryCorrectionStore::default()),
    );

    let session_id = Uuid::new_v4();
    let (outbox, mut browser) = mpsc::channel(256);
    let options = LiveOptions {
        interaction_mode: InteractionMode::Direct,
        input_sample_rate: MIC_FORMAT.sample_rate,
    };
    let (_control, handle) = start_live_session(state.clone(), session_id, options, outbox);

    timeout(Duration::from_secs(5), handle)
        .await
        .expect("session did not stop")
        .unwrap();

    let mut errors = Vec::new();
    while let Ok(msg) = browser.try_recv() {
        if let ServerMessage::Error { message } = msg {
            errors.push(message);
        }
    }
    assert!(
        errors
            .iter()
            .any(|m| m.starts_with("Could not connect to the voice service")),
        "errors: {:?}",
        errors
    );
    assert!(state.sessions.get(session_id).await.is_none());
}
