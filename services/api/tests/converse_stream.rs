use axum::{
    Json, Router,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::post,
};
use futures_util::StreamExt;
use serde_json::json;
use tokio::net::TcpListener;
use voxrelay_core::converse::{
    ConverseClient, ConverseError, ConverseEvent, ConverseRequest, HttpConverseClient,
};

async fn agent(Json(request): Json<ConverseRequest>) -> impl IntoResponse {
    let mut body = String::new();
    body.push_str(&format!(
        "data: {}\n\n",
        json!({ "text": format!("Working on: {}. ", request.instruction) })
    ));
    body.push_str(": keep-alive\n\n");
    body.push_str(&format!(
        "data: {}\r\n\r\n",
        json!({ "block": { "type": "tool_use", "name": "Glob" } })
    ));
    body.push_str(&format!("data: {}\n\n", json!({ "text": "Found 3 files." })));
    body.push_str(&format!(
        "data: {}\n\n",
        json!({
            "done": true,
            "session_id": request.session_id.unwrap_or_else(|| "fresh".to_string()),
            "cost_usd": 0.02
        })
    ));
    ([(header::CONTENT_TYPE, "text/event-stream")], body)
}

async fn busy() -> impl IntoResponse {
    (StatusCode::SERVICE_UNAVAILABLE, "agent is busy")
}

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_http_client_decodes_agent_stream() {
    let base = serve(Router::new().route("/api/converse", post(agent))).await;
    let client = HttpConverseClient::new(format!("{}/api/converse", base));

    let stream = client
        .stream(ConverseRequest {
            instruction: "list files".to_string(),
            session_id: Some("prev".to_string()),
        })
        .await
        .unwrap();
    let events: Vec<ConverseEvent> = stream.map(|e| e.unwrap()).collect().await;

    assert_eq!(events.len(), 4);
    assert_eq!(
        events[0],
        ConverseEvent::Text("Working on: list files. ".to_string())
    );
    assert_eq!(
        events[1],
        ConverseEvent::Block(json!({ "type": "tool_use", "name": "Glob" }))
    );
    assert_eq!(events[2], ConverseEvent::Text("Found 3 files.".to_string()));
    match &events[3] {
        ConverseEvent::Done(summary) => {
            assert_eq!(summary.session_id.as_deref(), Some("prev"));
            assert_eq!(summary.cost_usd, Some(0.02));
        }
        other => panic!("expected done, got {:?}", other),
    }
}

#[tokio::test]
async fn test_http_client_reports_error_status() {
    let base = serve(Router::new().route("/api/converse", post(busy))).await;
    let client = HttpConverseClient::new(format!("{}/api/converse", base));

    let result = client
        .stream(ConverseRequest {
            instruction: "list files".to_string(),
            session_id: None,
        })
        .await;
    let Err(err) = result else {
        panic!("expected an error status");
    };
    match err {
        ConverseError::Status { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "agent is busy");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}
