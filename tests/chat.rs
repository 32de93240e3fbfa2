//! Multi-turn chat over an in-process gateway.

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use promptwire::auth::StaticToken;
use promptwire::chat::{Conversation, Role};
use promptwire::error::PromptwireError;
use promptwire::models::DEFAULT_MODEL;
use promptwire::session::{Connector, Outcome};
use promptwire::template::{INPUT_PLACEHOLDER, Template};

const SONNET: &str = "anthropic.claude-3-sonnet-20240229-v1:0";

/// Serve `replies.len()` sessions in sequence. Each session answers with its
/// reply and an end-of-stream marker. Returns the request frames seen.
async fn serve_turns(listener: TcpListener, replies: Vec<&'static str>) -> Vec<Value> {
    let mut requests = Vec::new();
    for reply in replies {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        if let Some(Ok(Message::Text(text))) = ws.next().await {
            requests.push(serde_json::from_str(&text).unwrap());
        }
        ws.send(Message::Text(json!({"messages": reply}).to_string()))
            .await
            .unwrap();
        ws.send(Message::Text(json!({"endOfMessage": true}).to_string()))
            .await
            .unwrap();
        let _ = ws.next().await;
    }
    requests
}

async fn setup(replies: Vec<&'static str>) -> (Connector<StaticToken>, tokio::task::JoinHandle<Vec<Value>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(serve_turns(listener, replies));
    let endpoint = Url::parse(&format!("ws://127.0.0.1:{port}/prod")).unwrap();
    let connector = Connector::new(endpoint, StaticToken::new("test-token")).unwrap();
    (connector, server)
}

#[tokio::test]
async fn turns_share_one_session_id_and_build_a_transcript() {
    let (connector, server) = setup(vec!["Hi there.", "Paris."]).await;
    let mut chat = Conversation::new(DEFAULT_MODEL).with_system_prompt("be terse");

    for text in ["hello", "capital of France?"] {
        let mut handle = chat.send(&connector, text).await.unwrap();
        let state = handle.wait().await;
        assert_eq!(state.outcome(), Some(&Outcome::Completed));
        chat.finish_turn(&state);
    }

    let requests = server.await.unwrap();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        assert_eq!(request["action"], "chat");
        assert_eq!(request["session_id"], chat.session_id());
        assert_eq!(request["system_prompt"], "be terse");
        assert!(request.get("system").is_none());
    }
    assert_eq!(requests[1]["data"], "capital of France?");

    let transcript: Vec<(Role, &str, bool)> = chat
        .transcript()
        .iter()
        .map(|t| (t.role, t.text.as_str(), t.complete))
        .collect();
    assert_eq!(
        transcript,
        vec![
            (Role::User, "hello", true),
            (Role::Assistant, "Hi there.", true),
            (Role::User, "capital of France?", true),
            (Role::Assistant, "Paris.", true),
        ]
    );
}

#[tokio::test]
async fn template_applies_to_next_message_only() {
    let (connector, server) = setup(vec!["ok", "ok"]).await;
    let mut chat = Conversation::new(DEFAULT_MODEL);

    let template = Template::new(format!("Translate to French: {INPUT_PLACEHOLDER}"), SONNET);
    chat.use_template(template).unwrap();
    assert_eq!(chat.model_id(), SONNET);

    for text in ["good morning", "thanks"] {
        let mut handle = chat.send(&connector, text).await.unwrap();
        let state = handle.wait().await;
        chat.finish_turn(&state);
    }

    let requests = server.await.unwrap();
    assert_eq!(requests[0]["data"], "Translate to French: good morning");
    assert_eq!(requests[0]["modelId"], SONNET);
    assert_eq!(requests[1]["data"], "thanks");
    assert_eq!(requests[1]["modelId"], SONNET, "template model stays selected");
}

#[tokio::test]
async fn blank_message_is_rejected_without_a_turn() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let endpoint = Url::parse(&format!("ws://127.0.0.1:{port}/prod")).unwrap();
    let connector = Connector::new(endpoint, StaticToken::new("test-token")).unwrap();

    let mut chat = Conversation::new(DEFAULT_MODEL);
    let err = chat.send(&connector, "   ").await.unwrap_err();
    assert!(matches!(err, PromptwireError::InvalidRequest(_)));
    assert!(chat.transcript().is_empty());
}

#[tokio::test]
async fn interrupted_reply_is_recorded_as_incomplete() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _request = ws.next().await;
        ws.send(Message::Text(json!({"messages": "partial"}).to_string()))
            .await
            .unwrap();
        // Drop without an end-of-stream marker.
    });
    let endpoint = Url::parse(&format!("ws://127.0.0.1:{port}/prod")).unwrap();
    let connector = Connector::new(endpoint, StaticToken::new("test-token")).unwrap();

    let mut chat = Conversation::new(DEFAULT_MODEL);
    let mut handle = chat.send(&connector, "tell me a story").await.unwrap();
    let state = handle.wait().await;
    chat.finish_turn(&state);
    server.await.unwrap();

    assert_eq!(state.outcome(), Some(&Outcome::Disconnected));
    let last = chat.transcript().last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.text, "partial");
    assert!(!last.complete);
}
