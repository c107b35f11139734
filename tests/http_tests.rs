// Integration tests for the HTTP control surface

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::Engine;
use loqa_live::audio::VirtualDevices;
use loqa_live::context::StaticSummarizer;
use loqa_live::history::{HistoryStore, MemoryHistory};
use loqa_live::http::{DocumentUpload, StartConversationRequest};
use loqa_live::live::{LoopbackServer, LoopbackTransport, ServerEvent};
use loqa_live::session::{ConversationConfig, ConversationDeps};
use loqa_live::{create_router, AppState};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    server: LoopbackServer,
    history: Arc<MemoryHistory>,
}

fn test_app() -> TestApp {
    let (transport, server) = LoopbackTransport::new();
    let history = Arc::new(MemoryHistory::new());
    let deps = ConversationDeps {
        transport: Arc::new(transport),
        devices: Arc::new(VirtualDevices::default()),
        summarizer: Arc::new(StaticSummarizer("Quarterly revenue grew.".to_string())),
    };
    let state = AppState::new(deps, ConversationConfig::default(), history.clone());

    TestApp {
        router: create_router(state),
        server,
        history,
    }
}

async fn send(router: &Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = router.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    Ok((status, body))
}

fn post_json(uri: &str, body: &StartConversationRequest) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn one_document() -> StartConversationRequest {
    StartConversationRequest {
        documents: vec![DocumentUpload {
            name: "report.txt".to_string(),
            mime_type: "text/plain".to_string(),
            data: base64::engine::general_purpose::STANDARD.encode("Revenue grew 12%."),
        }],
    }
}

#[tokio::test]
async fn test_health() -> Result<()> {
    let app = test_app();
    let (status, body) = send(&app.router, get("/health")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_start_without_documents_is_rejected() -> Result<()> {
    let app = test_app();
    let request = StartConversationRequest { documents: vec![] };

    let (status, body) = send(&app.router, post_json("/conversations", &request)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "Please upload at least one document to start a voice conversation."
    );
    Ok(())
}

#[tokio::test]
async fn test_invalid_base64_is_rejected() -> Result<()> {
    let app = test_app();
    let request = StartConversationRequest {
        documents: vec![DocumentUpload {
            name: "bad.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            data: "not base64!".to_string(),
        }],
    };

    let (status, _) = send(&app.router, post_json("/conversations", &request)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_connect_failure_is_bad_gateway() -> Result<()> {
    let app = test_app();
    app.server.fail_next_connect("model unavailable");

    let (status, body) = send(&app.router, post_json("/conversations", &one_document())).await?;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "Failed to start voice session: model unavailable");
    Ok(())
}

#[tokio::test]
async fn test_conversation_lifecycle_saves_history() -> Result<()> {
    let app = test_app();

    let (status, body) = send(&app.router, post_json("/conversations", &one_document())).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "active");
    let id = body["conversation_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app.router, get(&format!("/conversations/{}/status", id))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "open");

    app.server
        .emit(ServerEvent::InputTranscriptionDelta {
            text: "How did revenue do?".into(),
        })
        .await;
    app.server
        .emit(ServerEvent::OutputTranscriptionDelta {
            text: "It grew twelve percent.".into(),
        })
        .await;
    app.server.emit(ServerEvent::TurnComplete).await;

    let transcript_uri = format!("/conversations/{}/transcript", id);
    let mut turns = Value::Null;
    for _ in 0..200 {
        let (_, body) = send(&app.router, get(&transcript_uri)).await?;
        if body.as_array().map(|a| a.len()) == Some(2) {
            turns = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(turns[0]["speaker"], "user");
    assert_eq!(turns[1]["text"], "It grew twelve percent.");

    let (status, body) = send(&app.router, post_empty(&format!("/conversations/{}/stop", id))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "stopped");
    assert_eq!(body["saved_to_history"], true);
    assert_eq!(body["stats"]["state"], "closed");
    assert_eq!(body["stats"]["turns_count"], 2);

    let (status, body) = send(&app.router, get("/history")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["id"], id.as_str());
    assert_eq!(body[0]["title"], "How did revenue do?");

    // Stopped conversations are gone
    let (status, _) = send(&app.router, post_empty(&format!("/conversations/{}/stop", id))).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_stop_without_turns_skips_history() -> Result<()> {
    let app = test_app();

    let (_, body) = send(&app.router, post_json("/conversations", &one_document())).await?;
    let id = body["conversation_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app.router, post_empty(&format!("/conversations/{}/stop", id))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["saved_to_history"], false);
    assert!(app.history.list().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unknown_conversation_is_not_found() -> Result<()> {
    let app = test_app();
    let (status, body) = send(&app.router, get("/conversations/nope/status")).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Conversation nope not found");
    Ok(())
}

#[tokio::test]
async fn test_clear_history() -> Result<()> {
    let app = test_app();
    app.history
        .append(loqa_live::HistoryRecord::from_turns("old", vec![]))
        .await?;

    let request = Request::builder()
        .method("DELETE")
        .uri("/history")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app.router, request).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(app.history.list().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_remotely_closed_conversation_is_removed_and_saved() -> Result<()> {
    let app = test_app();

    let (_, body) = send(&app.router, post_json("/conversations", &one_document())).await?;
    let id = body["conversation_id"].as_str().unwrap().to_string();

    app.server
        .emit(ServerEvent::InputTranscriptionDelta {
            text: "Summarize the report".into(),
        })
        .await;
    app.server.emit(ServerEvent::TurnComplete).await;
    app.server.emit(ServerEvent::Closed).await;

    let status_uri = format!("/conversations/{}/status", id);
    let mut status = StatusCode::OK;
    for _ in 0..200 {
        (status, _) = send(&app.router, get(&status_uri)).await?;
        if status == StatusCode::NOT_FOUND {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(status, StatusCode::NOT_FOUND);

    let mut records = Vec::new();
    for _ in 0..200 {
        records = app.history.list().await?;
        if !records.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, id);
    assert_eq!(records[0].title, "Summarize the report");
    Ok(())
}
