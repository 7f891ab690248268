//! WebSocket transport: one persistent bidirectional connection per
//! client.
//!
//! Flow:
//! 1. Client connects to `/v1/ws` and the socket upgrades.
//! 2. Requests `{id, method, params}` arrive as text frames; each is
//!    dispatched through the method registry and answered with
//!    `{id, success, result|error}`.
//! 3. Server-originated notifications (`{type, sessionId, timestamp,
//!    data}`) ride the same socket, pumped from session buses the client
//!    subscribed to.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::rpc::{RequestContext, RpcRequest};
use crate::runtime::Notification;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client bookkeeping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Self-reported identity from `client.identify`.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientIdentity {
    pub name: String,
    pub kind: String,
    pub version: String,
}

/// One connected client.
pub struct ClientConnection {
    pub client_id: String,
    pub connected_at: chrono::DateTime<Utc>,
    pub identity: Mutex<Option<ClientIdentity>>,
    outbound: mpsc::Sender<String>,
    /// session id → pump task feeding this client's socket.
    subscriptions: Mutex<HashMap<String, tokio::task::JoinHandle<()>>>,
}

impl ClientConnection {
    fn new(outbound: mpsc::Sender<String>) -> Arc<Self> {
        Arc::new(Self {
            client_id: format!("cli_{}", uuid::Uuid::new_v4()),
            connected_at: Utc::now(),
            identity: Mutex::new(None),
            outbound,
            subscriptions: Mutex::new(HashMap::new()),
        })
    }

    /// A connection with no socket behind it (tests, internal callers).
    pub fn detached() -> Arc<Self> {
        let (tx, _rx) = mpsc::channel(1);
        Self::new(tx)
    }

    pub fn send_notification(&self, notification: &Notification) {
        if let Ok(json) = serde_json::to_string(notification) {
            let _ = self.outbound.try_send(json);
        }
    }

    /// Start forwarding a session's bus to this client. Replaces any
    /// existing subscription for the session.
    pub fn subscribe(self: &Arc<Self>, state: &AppState, session_id: &str) -> bool {
        let Some(session) = state.orchestrator.get_active(session_id) else {
            return false;
        };
        let mut rx = session.bus.subscribe();
        let client = self.clone();
        let session_id_owned = session_id.to_owned();

        let pump = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(notification) => client.send_notification(&notification),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        // Oldest buffered deltas were dropped; tell the
                        // client it is behind so it resyncs via getSince.
                        client.send_notification(&Notification::new(
                            "subscriber.behind",
                            &session_id_owned,
                            serde_json::json!({"missed": missed}),
                        ));
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        if let Some(previous) = self
            .subscriptions
            .lock()
            .insert(session_id.to_owned(), pump)
        {
            previous.abort();
        }
        true
    }

    pub fn unsubscribe(&self, session_id: &str) -> bool {
        match self.subscriptions.lock().remove(session_id) {
            Some(pump) => {
                pump.abort();
                true
            }
            None => false,
        }
    }

    fn teardown(&self) {
        for (_, pump) in self.subscriptions.lock().drain() {
            pump.abort();
        }
    }
}

/// All currently connected clients.
#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<String, Arc<ClientConnection>>>,
}

impl ClientRegistry {
    fn register(&self, client: Arc<ClientConnection>) {
        self.clients
            .lock()
            .insert(client.client_id.clone(), client);
    }

    fn remove(&self, client_id: &str) {
        self.clients.lock().remove(client_id);
    }

    pub fn list(&self) -> Vec<Value> {
        self.clients
            .lock()
            .values()
            .map(|c| {
                serde_json::json!({
                    "clientId": c.client_id,
                    "connectedAt": c.connected_at.to_rfc3339(),
                    "identity": c.identity.lock().clone(),
                })
            })
            .collect()
    }

    pub fn count(&self) -> usize {
        self.clients.lock().len()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /v1/ws — upgrade to the RPC WebSocket.
pub async fn rpc_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(256);
    let client = ClientConnection::new(outbound_tx);
    state.clients.register(client.clone());

    tracing::info!(client_id = %client.client_id, "client connected");

    // Writer task: everything (responses + notifications) goes through
    // the outbound channel so frames never interleave.
    let writer = tokio::spawn(async move {
        while let Some(json) = outbound_rx.recv().await {
            if ws_sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // The registry is process-wide state; connections share one copy.
    let registry = state.rpc.clone();

    while let Some(Ok(message)) = ws_stream.next().await {
        match message {
            Message::Text(text) => {
                let request: RpcRequest = match serde_json::from_str(&text) {
                    Ok(request) => request,
                    Err(e) => {
                        tracing::debug!(error = %e, "ignoring unparseable frame");
                        continue;
                    }
                };
                let ctx = RequestContext {
                    state: state.clone(),
                    client: client.clone(),
                };
                let registry = registry.clone();
                let outbound = client.outbound.clone();
                // Requests run concurrently; responses carry their id.
                tokio::spawn(async move {
                    let response = registry.dispatch(ctx, request).await;
                    if let Ok(json) = serde_json::to_string(&response) {
                        let _ = outbound.send(json).await;
                    }
                });
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
            _ => {}
        }
    }

    client.teardown();
    state.clients.remove(&client.client_id);
    writer.abort();
    tracing::info!(client_id = %client.client_id, "client disconnected");
}
