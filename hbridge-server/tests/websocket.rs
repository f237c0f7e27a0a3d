//! End-to-end tests driving a running bridge over a real WebSocket

use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use hbridge_protocol::{codec, ApprovalMode, Reply, Value, UNSUPPORTED_FRAME_REPLY};
use hbridge_server::approval::{ApprovalPrompt, HeadlessPrompt, PromptRequest, ScriptedPrompt};
use hbridge_server::config::{HeadlessPolicy, ServerConfig};
use hbridge_server::{
    ApprovalManager, BridgeServer, CommandExecutor, InMemoryHost, LuaRuntime, MessageDispatcher,
    StopStatus,
};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

fn start(mode: ApprovalMode, prompt: Arc<dyn ApprovalPrompt>) -> BridgeServer {
    start_with_stop_timeout(mode, prompt, 2000)
}

fn start_with_stop_timeout(
    mode: ApprovalMode,
    prompt: Arc<dyn ApprovalPrompt>,
    stop_timeout_ms: u64,
) -> BridgeServer {
    let executor = CommandExecutor::new(Arc::new(InMemoryHost::new()))
        .with_script_runtime(Arc::new(LuaRuntime::new()));
    let dispatcher = MessageDispatcher::new(executor, ApprovalManager::new(mode, prompt));
    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        fallback_ports: vec![],
        stop_timeout_ms,
        ..Default::default()
    };

    let server = BridgeServer::new(config, Arc::new(dispatcher));
    server.start().expect("server should start");
    server
}

fn start_auto() -> BridgeServer {
    start(ApprovalMode::Auto, Arc::new(HeadlessPrompt::default()))
}

async fn connect(server: &BridgeServer) -> Client {
    let addr = server.local_addr().expect("server should be bound");
    let (ws, _) = connect_async(format!("ws://{}", addr))
        .await
        .expect("client should connect");
    ws
}

async fn send(ws: &mut Client, message: serde_json::Value) {
    let bytes = codec::encode(&Value::from(message)).unwrap();
    ws.send(Message::Binary(bytes)).await.unwrap();
}

/// Next binary frame from the server
async fn recv_bytes(ws: &mut Client) -> Vec<u8> {
    loop {
        let frame = tokio::time::timeout(REPLY_TIMEOUT, ws.next())
            .await
            .expect("reply timed out")
            .expect("connection closed")
            .expect("transport error");
        if let Message::Binary(bytes) = frame {
            return bytes;
        }
    }
}

async fn recv(ws: &mut Client) -> Reply {
    codec::decode(&recv_bytes(ws).await).unwrap()
}

async fn request(ws: &mut Client, message: serde_json::Value) -> Reply {
    send(ws, message).await;
    recv(ws).await
}

async fn wait_for_connections(server: &BridgeServer, count: usize) {
    for _ in 0..100 {
        if server.connection_count() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "expected {} connections, have {}",
        count,
        server.connection_count()
    );
}

#[tokio::test]
async fn test_ping() {
    let server = start_auto();
    let mut ws = connect(&server).await;

    let reply = request(&mut ws, json!({"type": "ping"})).await;
    assert!(reply.success);
    assert_eq!(reply.data, Some(Value::from(json!({"pong": true}))));

    assert_eq!(server.stop(), StopStatus::Stopped);
}

#[tokio::test]
async fn test_get_selection_without_prior_selection() {
    let server = start_auto();
    let mut ws = connect(&server).await;

    let reply = request(
        &mut ws,
        json!({"type": "command", "data": {"type": "get_selection"}}),
    )
    .await;

    assert!(reply.success);
    assert_eq!(
        reply.data,
        Some(Value::from(json!({"selection": [], "count": 0})))
    );
    server.stop();
}

#[tokio::test]
async fn test_malformed_bytes_keep_connection_open() {
    let server = start_auto();
    let mut ws = connect(&server).await;

    ws.send(Message::Binary(vec![0xc1, 0xff, 0x00])).await.unwrap();
    let reply = recv(&mut ws).await;
    assert!(!reply.success);
    assert!(!reply.error.unwrap_or_default().is_empty());

    let reply = request(&mut ws, json!({"type": "ping"})).await;
    assert!(reply.success);
    server.stop();
}

#[tokio::test]
async fn test_text_frame_rejected() {
    let server = start_auto();
    let mut ws = connect(&server).await;

    ws.send(Message::Text("{\"type\": \"ping\"}".into())).await.unwrap();
    let bytes = recv_bytes(&mut ws).await;
    assert_eq!(bytes, UNSUPPORTED_FRAME_REPLY);

    let reply: Reply = codec::decode(&bytes).unwrap();
    assert_eq!(reply.error.as_deref(), Some("Unsupported message type"));
    server.stop();
}

#[tokio::test]
async fn test_session_state_survives_connections() {
    let server = start_auto();

    let mut first = connect(&server).await;
    let reply = request(
        &mut first,
        json!({"type": "command", "data": {
            "type": "set_session_state",
            "key": "k",
            "value": {"foo": "bar", "count": 42}
        }}),
    )
    .await;
    assert!(reply.success);
    first.close(None).await.unwrap();

    let mut second = connect(&server).await;
    let reply = request(
        &mut second,
        json!({"type": "command", "data": {"type": "get_session_state", "key": "k"}}),
    )
    .await;
    assert_eq!(
        reply.data.unwrap().get("value"),
        Some(&Value::from(json!({"foo": "bar", "count": 42})))
    );

    // Scripts see the same state
    let reply = request(
        &mut second,
        json!({"type": "command", "data": {
            "type": "execute_script",
            "code": "result = session_state.k.count + 1"
        }}),
    )
    .await;
    assert!(reply.success, "{:?}", reply.error);
    assert_eq!(reply.data.unwrap().get("result"), Some(&Value::Int(43)));
    server.stop();
}

#[tokio::test]
async fn test_replies_follow_request_order() {
    let server = start_auto();
    let mut ws = connect(&server).await;

    for name in ["a", "b", "c"] {
        send(
            &mut ws,
            json!({"type": "command", "data": {
                "type": "set_session_state", "key": name, "value": name
            }}),
        )
        .await;
    }

    for name in ["a", "b", "c"] {
        let reply = recv(&mut ws).await;
        assert_eq!(
            reply.data.unwrap().get("key").and_then(Value::as_str),
            Some(name)
        );
    }
    server.stop();
}

#[tokio::test]
async fn test_headless_deny_cancels_destructive_command() {
    let server = start(
        ApprovalMode::Auto,
        Arc::new(HeadlessPrompt::new(HeadlessPolicy::Deny)),
    );
    let mut ws = connect(&server).await;

    let reply = request(
        &mut ws,
        json!({"type": "command", "data": {"type": "create_node", "node_type": "geo"}}),
    )
    .await;
    assert!(!reply.success);
    assert_eq!(reply.error.as_deref(), Some("Command cancelled by user"));
    server.stop();
}

#[tokio::test]
async fn test_batch_over_the_wire() {
    let prompt = Arc::new(ScriptedPrompt::new([0]));
    let server = start(ApprovalMode::Preview, prompt.clone());
    let mut ws = connect(&server).await;

    let reply = request(
        &mut ws,
        json!({"type": "batch", "data": {"commands": [
            {"type": "create_node", "node_type": "geo", "name": "rock"},
            {"type": "set_parameter", "node_path": "/obj/rock", "parameter": "tx", "value": 2.5},
            {"type": "get_parameter", "node_path": "/obj/rock", "parameter": "tx"},
        ]}}),
    )
    .await;

    assert!(reply.success);
    let data = reply.data.unwrap();
    let results = data.get("results").and_then(Value::as_array).unwrap();
    assert_eq!(results.len(), 3);
    assert!(results
        .iter()
        .all(|r| r.get("success") == Some(&Value::Bool(true))));
    assert_eq!(prompt.prompt_count(), 1);
    server.stop();
}

#[tokio::test]
async fn test_approval_mode_switch_over_the_wire() {
    let prompt = Arc::new(ScriptedPrompt::new([1]));
    let server = start(ApprovalMode::Auto, prompt.clone());
    let mut ws = connect(&server).await;

    let reply = request(
        &mut ws,
        json!({"type": "set_approval_mode", "data": {"mode": "preview"}}),
    )
    .await;
    assert!(reply.success);

    let reply = request(
        &mut ws,
        json!({"type": "command", "data": {"type": "get_selection"}}),
    )
    .await;
    assert_eq!(reply.error.as_deref(), Some("Command cancelled by user"));
    assert_eq!(prompt.prompt_count(), 1);
    server.stop();
}

#[tokio::test]
async fn test_broadcast_reaches_all_clients() {
    let server = start_auto();
    let mut a = connect(&server).await;
    let mut b = connect(&server).await;
    wait_for_connections(&server, 2).await;

    let event = Value::from(json!({"event": "scene_changed"}));
    assert_eq!(server.broadcast(&event), 2);

    for ws in [&mut a, &mut b] {
        let received: Value = codec::decode(&recv_bytes(ws).await).unwrap();
        assert_eq!(received, event);
    }
    server.stop();
}

#[tokio::test]
async fn test_disconnect_removes_connection() {
    let server = start_auto();
    let mut ws = connect(&server).await;
    wait_for_connections(&server, 1).await;

    ws.close(None).await.unwrap();
    wait_for_connections(&server, 0).await;
    server.stop();
}

#[tokio::test]
async fn test_stop_closes_connections() {
    let server = start_auto();
    let mut ws = connect(&server).await;
    wait_for_connections(&server, 1).await;

    assert_eq!(server.stop(), StopStatus::Stopped);
    assert_eq!(server.connection_count(), 0);

    let next = tokio::time::timeout(REPLY_TIMEOUT, ws.next())
        .await
        .expect("client should observe shutdown");
    assert!(matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
}

/// Signals when shown, then waits for a release that may never come
struct ParkedPrompt {
    shown: parking_lot::Mutex<mpsc::Sender<()>>,
    release: parking_lot::Mutex<mpsc::Receiver<()>>,
}

impl ApprovalPrompt for ParkedPrompt {
    fn ask(&self, request: &PromptRequest) -> usize {
        let _ = self.shown.lock().send(());
        let _ = self.release.lock().recv_timeout(Duration::from_secs(10));
        request.close_choice
    }
}

#[tokio::test]
async fn test_stop_reports_timeout_when_prompt_never_answers() {
    let (shown_tx, shown_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let prompt = ParkedPrompt {
        shown: parking_lot::Mutex::new(shown_tx),
        release: parking_lot::Mutex::new(release_rx),
    };
    let server = start_with_stop_timeout(ApprovalMode::Auto, Arc::new(prompt), 200);
    let mut ws = connect(&server).await;

    send(
        &mut ws,
        json!({"type": "command", "data": {"type": "delete_node", "node_path": "/obj/x"}}),
    )
    .await;
    shown_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("approval prompt should be shown");

    let begin = Instant::now();
    assert_eq!(server.stop(), StopStatus::TimedOut);
    assert!(begin.elapsed() < Duration::from_secs(2));
    assert!(!server.is_running());
    assert_eq!(server.stop(), StopStatus::NotRunning);

    let _ = release_tx.send(());
}
