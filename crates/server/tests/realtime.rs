//! End-to-end: a real server on a loopback port, real WebSocket clients.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use futures::{SinkExt, StreamExt};
use rusqlite::{params, Connection};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use agora::app::build_router;
use agora::auth::{fingerprint, FingerprintPolicy};
use agora::state::AppState;
use agora::store::SqliteStore;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const BROWSER: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) Safari/605.1.15";

const SCHEMA: &str = "
    CREATE TABLE users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email TEXT NOT NULL UNIQUE,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL,
        nickname TEXT,
        avatar TEXT
    );
    CREATE TABLE sessions (
        id TEXT PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        expires_at DATETIME NOT NULL,
        browser_fingerprint TEXT
    );
    CREATE TABLE group_members (
        group_id INTEGER NOT NULL,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        joined_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (group_id, user_id)
    );
    CREATE TABLE group_chat_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        group_id INTEGER NOT NULL,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        content TEXT NOT NULL,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
";

fn seed(path: &Path) {
    let conn = Connection::open(path).expect("open seed connection");
    conn.execute_batch(SCHEMA).expect("create schema");

    let users = [(1, "Ada", "Lovelace", "ada"), (2, "Alan", "Turing", "alan")];
    for (id, first, last, nick) in users {
        conn.execute(
            "INSERT INTO users (id, email, first_name, last_name, nickname)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, format!("u{id}@example.com"), first, last, nick],
        )
        .expect("insert user");
        conn.execute(
            "INSERT INTO group_members (group_id, user_id) VALUES (3, ?1)",
            params![id],
        )
        .expect("insert member");
    }

    let expires = Utc::now() + ChronoDuration::days(1);
    let fp = fingerprint(BROWSER);
    for (token, user_id) in [("tok-ada", 1), ("tok-alan", 2)] {
        conn.execute(
            "INSERT INTO sessions (id, user_id, expires_at, browser_fingerprint)
             VALUES (?1, ?2, ?3, ?4)",
            params![token, user_id, expires, fp],
        )
        .expect("insert session");
    }
}

struct Server {
    addr: SocketAddr,
    state: AppState,
    _dir: tempfile::TempDir,
}

async fn start_server() -> Server {
    let dir = tempfile::tempdir().expect("temp dir");
    let db_path = dir.path().join("social-network.db");
    seed(&db_path);

    let store = SqliteStore::open(&db_path).expect("open store");
    let state = AppState::new(Arc::new(store), FingerprintPolicy::Enforce);
    let app = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server runs");
    });

    Server {
        addr,
        state,
        _dir: dir,
    }
}

async fn connect(addr: SocketAddr, token: &str, user_agent: &str) -> Result<Client, WsError> {
    let mut request = format!("ws://{addr}/ws")
        .into_client_request()
        .expect("valid request");
    let headers = request.headers_mut();
    headers.insert(
        header::COOKIE,
        HeaderValue::from_str(&format!("session_id={token}")).expect("cookie header"),
    );
    headers.insert(
        header::USER_AGENT,
        HeaderValue::from_str(user_agent).expect("user agent header"),
    );
    connect_async(request).await.map(|(stream, _)| stream)
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("frame arrives in time")
            .expect("stream open")
            .expect("frame ok");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("JSON frame");
        }
    }
}

/// Read presence frames until one lists exactly `expected`.
async fn await_presence(client: &mut Client, expected: &[i64]) {
    loop {
        let frame = next_json(client).await;
        if frame["type"] != "online_users" {
            continue;
        }
        let ids: Vec<i64> = frame["users"]
            .as_array()
            .expect("users array")
            .iter()
            .map(|u| u["userId"].as_i64().expect("userId"))
            .collect();
        if ids == expected {
            return;
        }
    }
}

/// Minimal HTTP/1.1 GET, returning the raw response text.
async fn http_get(addr: SocketAddr, path: &str, extra_headers: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n{extra_headers}\r\n"
    );
    stream.write_all(request.as_bytes()).await.expect("write request");
    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .expect("read response");
    response
}

#[tokio::test]
async fn http_health_and_gated_presence() {
    let server = start_server().await;

    let health = http_get(server.addr, "/health", "").await;
    assert!(health.starts_with("HTTP/1.1 200"), "{health}");
    assert!(health.ends_with("OK"));

    let anonymous = http_get(server.addr, "/api/presence", "").await;
    assert!(anonymous.starts_with("HTTP/1.1 401"), "{anonymous}");
    assert!(anonymous.contains(r#""success":false"#));

    let mut ada = connect(server.addr, "tok-ada", BROWSER).await.expect("ada connects");
    await_presence(&mut ada, &[1]).await;

    let authed = http_get(
        server.addr,
        "/api/presence",
        &format!("Cookie: session_id=tok-alan\r\nUser-Agent: {BROWSER}\r\n"),
    )
    .await;
    assert!(authed.starts_with("HTTP/1.1 200"), "{authed}");
    assert!(authed.contains(r#""type":"online_users""#));
    assert!(authed.contains(r#""userId":1"#));

    ada.close(None).await.expect("ada closes");
}

#[tokio::test]
async fn handshake_without_valid_session_is_rejected() {
    let server = start_server().await;

    match connect(server.addr, "no-such-token", BROWSER).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::UNAUTHORIZED),
        other => panic!("expected 401, got {:?}", other.map(|_| "connected")),
    }
    assert!(server.state.registry.is_empty());
}

#[tokio::test]
async fn stolen_session_from_another_client_is_invalidated() {
    let server = start_server().await;

    let attempt = connect(server.addr, "tok-ada", "curl/8.5.0").await;
    assert!(matches!(attempt, Err(WsError::Http(ref r)) if r.status() == StatusCode::UNAUTHORIZED));

    // The session was deleted, so the real browser is refused as well.
    let retry = connect(server.addr, "tok-ada", BROWSER).await;
    assert!(matches!(retry, Err(WsError::Http(ref r)) if r.status() == StatusCode::UNAUTHORIZED));
}

#[tokio::test]
async fn presence_and_group_chat_over_real_sockets() {
    let server = start_server().await;

    let mut ada = connect(server.addr, "tok-ada", BROWSER).await.expect("ada connects");
    await_presence(&mut ada, &[1]).await;

    let mut alan = connect(server.addr, "tok-alan", BROWSER).await.expect("alan connects");
    await_presence(&mut alan, &[1, 2]).await;
    await_presence(&mut ada, &[1, 2]).await;

    ada.send(Message::Text(
        json!({"type": "group_message", "group_id": 3, "content": "hi all"})
            .to_string()
            .into(),
    ))
    .await
    .expect("send chat");

    for client in [&mut ada, &mut alan] {
        let chat = loop {
            let frame = next_json(client).await;
            if frame["type"] == "new_group_message" {
                break frame;
            }
        };
        assert_eq!(chat["data"]["content"], "hi all");
        assert_eq!(chat["data"]["user_id"], 1);
        assert_eq!(chat["data"]["user"]["FirstName"], "Ada");
    }

    alan.close(None).await.expect("alan closes");
    await_presence(&mut ada, &[1]).await;

    ada.close(None).await.expect("ada closes");
}
