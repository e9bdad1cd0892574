//! End-to-end tests driving a real server instance: REST credential and
//! channel flows, then the WebSocket chat path including keepalive.

use futures_util::{SinkExt, StreamExt};
use relay_server::config::Config;
use relay_server::routes::{self, AppState};
use relay_server::store;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const ORIGIN: &str = "http://localhost:5173";

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

fn test_config() -> Config {
    let mut config = Config::default();
    config.database.url = "sqlite::memory:".to_string();
    config.database.max_connections = 1;
    config.auth.jwt_secret = "integration-test-secret-0123456789".to_string();
    config.cors.origins = vec![ORIGIN.to_string()];
    config
}

async fn spawn_server(config: Config) -> SocketAddr {
    let db = store::connect(&config.database.url, config.database.max_connections)
        .await
        .expect("database");
    let state = Arc::new(AppState::new(config, db));
    let app = routes::router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("server");
    });

    addr
}

async fn register_user(addr: SocketAddr, name: &str) -> (String, Value) {
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/register"))
        .json(&json!({
            "name": name,
            "email": format!("{name}@example.com"),
            "password": "correct horse battery staple",
        }))
        .send()
        .await
        .expect("register request");
    assert_eq!(response.status(), 201);

    let body: Value = response.json().await.expect("register body");
    let token = body["token"].as_str().expect("token").to_string();
    (token, body["user"].clone())
}

async fn create_channel(addr: SocketAddr, token: &str, name: &str) -> i64 {
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/channels"))
        .bearer_auth(token)
        .json(&json!({ "name": name }))
        .send()
        .await
        .expect("create channel");
    assert_eq!(response.status(), 201);

    let body: Value = response.json().await.expect("channel body");
    body["id"].as_i64().expect("channel id")
}

async fn connect_ws(addr: SocketAddr, channel_id: i64, token: &str) -> WsClient {
    let mut request = format!("ws://{addr}/ws/{channel_id}")
        .into_client_request()
        .expect("ws request");
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {token}").parse().expect("auth header"),
    );
    request
        .headers_mut()
        .insert("Origin", ORIGIN.parse().expect("origin header"));

    let (socket, _) = connect_async(request).await.expect("ws connect");
    socket
}

/// Read frames until a chat message (text frame) arrives.
async fn next_chat_message(socket: &mut WsClient) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for message")
            .expect("stream ended")
            .expect("read error");
        if let WsMessage::Text(text) = frame {
            return serde_json::from_str(&text).expect("message json");
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[tokio::test]
async fn test_broadcast_between_members() {
    let addr = spawn_server(test_config()).await;

    let (token_a, _) = register_user(addr, "alice").await;
    let (token_b, _) = register_user(addr, "bob").await;
    let channel_id = create_channel(addr, &token_a, "general").await;

    // Bob joins the channel, then both connect.
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/channels/{channel_id}/join"))
        .bearer_auth(&token_b)
        .send()
        .await
        .expect("join");
    assert_eq!(response.status(), 200);

    let mut alice = connect_ws(addr, channel_id, &token_a).await;
    let mut bob = connect_ws(addr, channel_id, &token_b).await;
    // Let both registrations reach the group before broadcasting.
    tokio::time::sleep(Duration::from_millis(100)).await;

    alice
        .send(WsMessage::Text("hello".to_string()))
        .await
        .expect("send");

    for socket in [&mut alice, &mut bob] {
        let msg = next_chat_message(socket).await;
        assert_eq!(msg["sender"], "alice");
        assert_eq!(msg["content"], "hello");
        let ts = msg["timestamp"].as_i64().expect("timestamp");
        assert!((unix_now() - ts).abs() <= 5, "timestamp {ts} not near now");
    }
}

#[tokio::test]
async fn test_upgrade_preconditions() {
    let addr = spawn_server(test_config()).await;

    let (token_a, _) = register_user(addr, "alice").await;
    let (token_b, _) = register_user(addr, "bob").await;
    let channel_id = create_channel(addr, &token_a, "private").await;

    // No credential.
    let request = format!("ws://{addr}/ws/{channel_id}")
        .into_client_request()
        .unwrap();
    assert!(connect_async(request).await.is_err());

    // Valid credential, but not a member.
    let mut request = format!("ws://{addr}/ws/{channel_id}")
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("Authorization", format!("Bearer {token_b}").parse().unwrap());
    request
        .headers_mut()
        .insert("Origin", ORIGIN.parse().unwrap());
    assert!(connect_async(request).await.is_err());

    // Owner, but disallowed origin.
    let mut request = format!("ws://{addr}/ws/{channel_id}")
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("Authorization", format!("Bearer {token_a}").parse().unwrap());
    request
        .headers_mut()
        .insert("Origin", "http://evil.example".parse().unwrap());
    assert!(connect_async(request).await.is_err());

    // Unknown channel.
    let mut request = format!("ws://{addr}/ws/999999").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Authorization", format!("Bearer {token_a}").parse().unwrap());
    request
        .headers_mut()
        .insert("Origin", ORIGIN.parse().unwrap());
    assert!(connect_async(request).await.is_err());

    // All preconditions met.
    let _socket = connect_ws(addr, channel_id, &token_a).await;
}

#[tokio::test]
async fn test_silent_peer_is_pinged_then_closed() {
    let mut config = test_config();
    // Scaled-down keepalive: ping at ~630ms, close at 700ms without a pong.
    config.heartbeat.pong_timeout_ms = 700;
    let addr = spawn_server(config).await;

    let (token, _) = register_user(addr, "alice").await;
    let channel_id = create_channel(addr, &token, "quiet").await;

    let mut socket = connect_ws(addr, channel_id, &token).await;

    // Stay silent past the pong deadline: no reads means no automatic pong.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    // The server should have pinged and then closed the connection.
    let mut saw_ping = false;
    let mut closed = false;
    loop {
        match timeout(Duration::from_secs(3), socket.next()).await {
            Ok(Some(Ok(WsMessage::Ping(_)))) => saw_ping = true,
            Ok(Some(Ok(WsMessage::Close(_)))) | Ok(Some(Err(_))) | Ok(None) => {
                closed = true;
                break;
            }
            Ok(Some(Ok(_))) => {}
            Err(_) => break,
        }
    }
    assert!(saw_ping, "expected a keepalive ping before the deadline");
    assert!(closed, "expected the server to close a silent connection");
}

#[tokio::test]
async fn test_answering_pings_keeps_connection_alive() {
    let mut config = test_config();
    config.heartbeat.pong_timeout_ms = 700;
    let addr = spawn_server(config).await;

    let (token, _) = register_user(addr, "alice").await;
    let channel_id = create_channel(addr, &token, "alive").await;

    let mut socket = connect_ws(addr, channel_id, &token).await;

    // Keep reading for several pong windows; reads answer pings for us.
    let deadline = tokio::time::Instant::now() + Duration::from_millis(2200);
    while tokio::time::Instant::now() < deadline {
        match timeout(Duration::from_millis(200), socket.next()).await {
            Ok(Some(Ok(WsMessage::Close(_)))) | Ok(Some(Err(_))) | Ok(None) => {
                panic!("connection closed despite answering pings");
            }
            _ => {}
        }
    }

    // Still alive and delivering.
    socket
        .send(WsMessage::Text("still here".to_string()))
        .await
        .expect("send");
    let msg = next_chat_message(&mut socket).await;
    assert_eq!(msg["content"], "still here");
}

#[tokio::test]
async fn test_missing_credential_fields_are_bad_requests() {
    let addr = spawn_server(test_config()).await;
    let client = reqwest::Client::new();

    // Bodies missing a field still get the 400 error shape, not a
    // deserialization rejection.
    for body in [
        json!({ "name": "alice", "email": "a@example.com" }),
        json!({ "password": "pw-pw-pw-pw" }),
        json!({}),
    ] {
        let response = client
            .post(format!("http://{addr}/api/register"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let parsed: Value = response.json().await.unwrap();
        assert!(parsed["error"].is_string(), "expected error body: {parsed}");
    }

    let response = client
        .post(format!("http://{addr}/api/login"))
        .json(&json!({ "name": "alice" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_rest_error_paths() {
    let mut config = test_config();
    config.rate_limit.limit = 4;
    let addr = spawn_server(config).await;
    let client = reqwest::Client::new();

    let (token_a, _) = register_user(addr, "alice").await;
    let (token_b, _) = register_user(addr, "bob").await;

    // Duplicate name conflicts.
    let response = client
        .post(format!("http://{addr}/api/register"))
        .json(&json!({
            "name": "alice",
            "email": "other@example.com",
            "password": "pw-pw-pw-pw",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    // Wrong password.
    let response = client
        .post(format!("http://{addr}/api/login"))
        .json(&json!({ "name": "alice", "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Fifth credential request in the window (after two registrations, one
    // duplicate, one failed login) trips the limiter.
    let response = client
        .post(format!("http://{addr}/api/login"))
        .json(&json!({ "name": "alice", "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 429);

    // Profile requires a credential.
    let response = client
        .get(format!("http://{addr}/api/me"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Members listing is for members only.
    let channel_id = create_channel(addr, &token_a, "general").await;
    let response = client
        .get(format!("http://{addr}/api/channels/{channel_id}/members"))
        .bearer_auth(&token_b)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    // Only the owner deletes a channel.
    let response = client
        .delete(format!("http://{addr}/api/channels/{channel_id}"))
        .bearer_auth(&token_b)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    // Search is owner@channel.
    let response = client
        .get(format!("http://{addr}/api/channels/search?query=alice"))
        .bearer_auth(&token_a)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = client
        .get(format!(
            "http://{addr}/api/channels/search?query=alice@general"
        ))
        .bearer_auth(&token_a)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["id"].as_i64(), Some(channel_id));
    assert_eq!(body["owner_name"], "alice");
}
