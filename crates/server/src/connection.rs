//! A live socket bound to one user.
//!
//! The sink half of a WebSocket does not tolerate concurrent writers, so every
//! write goes through the connection's own lock. That lock is independent of
//! the registry lock and is only ever taken after the registry lock has been
//! released.
//!
//! Every write is bounded by a timeout so a peer that stops reading turns into
//! a write failure instead of a writer parked forever on its lock.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes};
use futures::{Sink, SinkExt};
use tokio::sync::Mutex;
use tracing::debug;

use agora_protocol::UserId;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Close code sent to a connection replaced by a newer one for the same user
pub const CLOSE_SUPERSEDED: u16 = 4000;

/// How long one frame may take to reach the socket, lock wait included
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

type BoxSink = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;

pub struct Connection {
    id: u64,
    user_id: UserId,
    sink: Mutex<BoxSink>,
    write_timeout: Duration,
}

impl Connection {
    pub fn new<S>(user_id: UserId, sink: S) -> Self
    where
        S: Sink<Message, Error = axum::Error> + Send + 'static,
    {
        Self::with_write_timeout(user_id, sink, DEFAULT_WRITE_TIMEOUT)
    }

    pub fn with_write_timeout<S>(user_id: UserId, sink: S, write_timeout: Duration) -> Self
    where
        S: Sink<Message, Error = axum::Error> + Send + 'static,
    {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            user_id,
            sink: Mutex::new(Box::pin(sink)),
            write_timeout,
        }
    }

    /// Process-unique id, for logs
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Write a text frame. Callers that fan out clone one `Utf8Bytes` per
    /// recipient rather than re-serializing.
    pub async fn send_text(&self, payload: impl Into<Utf8Bytes>) -> Result<(), axum::Error> {
        self.send(Message::Text(payload.into())).await
    }

    pub async fn send(&self, message: Message) -> Result<(), axum::Error> {
        let write = async {
            let mut sink = self.sink.lock().await;
            sink.send(message).await
        };
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(write_timed_out()),
        }
    }

    /// Send a close frame and shut the sink. Errors are ignored: the peer may
    /// already be gone.
    pub async fn close(&self) {
        self.close_with(None).await;
    }

    /// Close a connection that lost its registry slot to a newer one.
    pub async fn close_superseded(&self) {
        self.close_with(Some(CloseFrame {
            code: CLOSE_SUPERSEDED,
            reason: "superseded by a newer connection".into(),
        }))
        .await;
    }

    async fn close_with(&self, frame: Option<CloseFrame>) {
        let close = async {
            let mut sink = self.sink.lock().await;
            let sent = sink.send(Message::Close(frame)).await;
            let _ = sink.close().await;
            sent
        };
        let result = match tokio::time::timeout(self.write_timeout, close).await {
            Ok(sent) => sent,
            Err(_) => Err(write_timed_out()),
        };
        if let Err(e) = result {
            debug!(
                component = "connection",
                event = "connection.close_frame_failed",
                connection_id = self.id,
                user_id = self.user_id,
                error = %e,
                "Close frame not delivered"
            );
        }
    }
}

fn write_timed_out() -> axum::Error {
    axum::Error::new(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        "websocket write timed out",
    ))
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}
