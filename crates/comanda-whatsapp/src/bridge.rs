// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`MessagingClient`] backed by a protocol sidecar.
//!
//! The sidecar runs the WhatsApp library and speaks JSON frames over a
//! WebSocket. It owns the wire protocol; this side owns credentials (the
//! sidecar reads and writes key material through `keys_get`/`keys_set`) and
//! the connection lifecycle.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use comanda_config::model::WhatsAppConfig;
use comanda_core::ComandaError;
use dashmap::DashMap;
use futures::{SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::auth_state::AuthState;
use crate::client::{
    ConnectionUpdate, DisconnectInfo, MessagingClient, MessagingSocket, ProtocolVersion,
    SocketEvent, SocketHandle, TransportState,
};

/// Used when the version endpoint is unreachable.
pub const DEFAULT_VERSION: ProtocolVersion = ProtocolVersion([2, 3000, 1_023_223_821]);

/// Close code reported when the bridge drops without saying why.
const CONNECTION_CLOSED: u16 = 428;

const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const CHANNEL_CAPACITY: usize = 64;

/// Frames sent to the sidecar.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
enum Outbound<'a> {
    Hello {
        session_id: &'a str,
        version: ProtocolVersion,
        creds: Option<&'a Value>,
    },
    KeysResult {
        request_id: String,
        values: HashMap<String, Value>,
    },
    SendText {
        request_id: &'a str,
        jid: &'a str,
        text: &'a str,
    },
    Logout,
}

/// Frames received from the sidecar.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
enum Inbound {
    ConnectionUpdate {
        #[serde(default)]
        connection: Option<TransportState>,
        #[serde(default)]
        qr: Option<String>,
        #[serde(default)]
        disconnect: Option<DisconnectInfo>,
        /// JID of the paired account, sent with `open`.
        #[serde(default)]
        me: Option<String>,
    },
    CredsUpdate {
        patch: Map<String, Value>,
    },
    KeysGet {
        request_id: String,
        category: String,
        ids: Vec<String>,
    },
    KeysSet {
        data: BTreeMap<String, BTreeMap<String, Value>>,
    },
    SendResult {
        request_id: String,
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
}

#[derive(Deserialize)]
struct VersionResponse {
    version: [u32; 3],
}

/// WebSocket client for the protocol sidecar.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    bridge_url: String,
    version_url: String,
    session_id: String,
    http: reqwest::Client,
}

impl BridgeClient {
    pub fn new(config: &WhatsAppConfig) -> Result<Self, ComandaError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ComandaError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            bridge_url: config.bridge_url.clone(),
            version_url: config.version_url.clone(),
            session_id: config.session_id.clone(),
            http,
        })
    }

    async fn fetch_version(&self) -> Result<ProtocolVersion, reqwest::Error> {
        let response: VersionResponse = self
            .http
            .get(&self.version_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(ProtocolVersion(response.version))
    }
}

#[async_trait]
impl MessagingClient for BridgeClient {
    async fn latest_version(&self) -> Result<ProtocolVersion, ComandaError> {
        match self.fetch_version().await {
            Ok(version) => Ok(version),
            Err(e) => {
                warn!(error = %e, fallback = %DEFAULT_VERSION, "could not fetch latest protocol version");
                Ok(DEFAULT_VERSION)
            }
        }
    }

    async fn connect(
        &self,
        version: ProtocolVersion,
        auth: Arc<AuthState>,
    ) -> Result<SocketHandle, ComandaError> {
        let (ws, _response) =
            connect_async(self.bridge_url.as_str())
                .await
                .map_err(|e| ComandaError::Channel {
                    message: format!("bridge connection to {} failed", self.bridge_url),
                    source: Some(Box::new(e)),
                })?;
        let (mut sink, stream) = ws.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Message>(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<SocketEvent>(CHANNEL_CAPACITY);
        let state = Arc::new(BridgeState::default());

        let creds = auth.creds();
        let hello = encode(&Outbound::Hello {
            session_id: &self.session_id,
            version,
            creds: creds.as_deref(),
        })?;
        sink.send(hello).await.map_err(|e| ComandaError::Channel {
            message: "failed to greet bridge".to_string(),
            source: Some(Box::new(e)),
        })?;

        let writer = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    debug!(error = %e, "bridge writer stopped");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(read_loop(
            stream,
            Arc::clone(&state),
            auth,
            out_tx.clone(),
            event_tx,
        ));

        debug!(url = %self.bridge_url, %version, "bridge socket connected");
        Ok(SocketHandle {
            socket: Arc::new(BridgeSocket {
                out: out_tx,
                state,
                reader: reader.abort_handle(),
                writer: writer.abort_handle(),
            }),
            events: event_rx,
        })
    }
}

#[derive(Default)]
struct BridgeState {
    open: AtomicBool,
    close_reported: AtomicBool,
    own_id: ArcSwapOption<String>,
    pending: DashMap<String, oneshot::Sender<Result<String, String>>>,
}

struct BridgeSocket {
    out: mpsc::Sender<Message>,
    state: Arc<BridgeState>,
    reader: AbortHandle,
    writer: AbortHandle,
}

impl BridgeSocket {
    async fn send_frame(&self, frame: &Outbound<'_>) -> Result<(), ComandaError> {
        self.out
            .send(encode(frame)?)
            .await
            .map_err(|_| ComandaError::channel("bridge socket is closed"))
    }
}

#[async_trait]
impl MessagingSocket for BridgeSocket {
    fn is_transport_open(&self) -> bool {
        self.state.open.load(Ordering::Acquire) && !self.out.is_closed()
    }

    fn own_id(&self) -> Option<String> {
        self.state.own_id.load_full().map(|id| id.as_ref().clone())
    }

    async fn send_text(&self, jid: &str, text: &str) -> Result<String, ComandaError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.state.pending.insert(request_id.clone(), tx);

        let frame = Outbound::SendText {
            request_id: &request_id,
            jid,
            text,
        };
        if let Err(e) = self.send_frame(&frame).await {
            self.state.pending.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(SEND_TIMEOUT, rx).await {
            Ok(Ok(Ok(message_id))) => Ok(message_id),
            Ok(Ok(Err(reason))) => Err(ComandaError::channel(format!("send rejected: {reason}"))),
            Ok(Err(_)) => Err(ComandaError::channel(
                "bridge closed before confirming the send",
            )),
            Err(_) => {
                self.state.pending.remove(&request_id);
                Err(ComandaError::Timeout {
                    duration: SEND_TIMEOUT,
                })
            }
        }
    }

    async fn logout(&self) -> Result<(), ComandaError> {
        self.send_frame(&Outbound::Logout).await
    }

    async fn end(&self) {
        self.state.open.store(false, Ordering::Release);
        if self.out.try_send(Message::Close(None)).is_err() {
            self.writer.abort();
        }
        self.reader.abort();
        self.state.pending.clear();
    }
}

fn encode(frame: &Outbound<'_>) -> Result<Message, ComandaError> {
    serde_json::to_string(frame)
        .map(Message::text)
        .map_err(|e| ComandaError::Internal(format!("failed to encode bridge frame: {e}")))
}

async fn read_loop<S, E>(
    mut stream: S,
    state: Arc<BridgeState>,
    auth: Arc<AuthState>,
    out: mpsc::Sender<Message>,
    events: mpsc::Sender<SocketEvent>,
) where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                handle_frame(text.as_str(), &state, &auth, &out, &events).await;
            }
            Ok(Message::Close(frame)) => {
                debug!(?frame, "bridge sent close");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "bridge read failed");
                break;
            }
        }
    }

    state.open.store(false, Ordering::Release);
    state.pending.clear();
    if !state.close_reported.swap(true, Ordering::AcqRel) {
        let _ = events
            .send(SocketEvent::Connection(ConnectionUpdate::closed(Some(
                CONNECTION_CLOSED,
            ))))
            .await;
    }
}

async fn handle_frame(
    text: &str,
    state: &BridgeState,
    auth: &AuthState,
    out: &mpsc::Sender<Message>,
    events: &mpsc::Sender<SocketEvent>,
) {
    let frame: Inbound = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "ignoring malformed bridge frame");
            return;
        }
    };

    match frame {
        Inbound::ConnectionUpdate {
            connection,
            qr,
            disconnect,
            me,
        } => {
            if let Some(me) = me {
                state.own_id.store(Some(Arc::new(me)));
            }
            match connection {
                Some(TransportState::Open) => state.open.store(true, Ordering::Release),
                Some(TransportState::Close) => {
                    state.open.store(false, Ordering::Release);
                    state.close_reported.store(true, Ordering::Release);
                }
                _ => {}
            }
            let update = ConnectionUpdate {
                connection,
                qr,
                disconnect,
            };
            let _ = events.send(SocketEvent::Connection(update)).await;
        }
        Inbound::CredsUpdate { patch } => {
            let _ = events.send(SocketEvent::CredsUpdate(patch)).await;
        }
        Inbound::KeysGet {
            request_id,
            category,
            ids,
        } => {
            let values = auth.get_keys(&category, &ids);
            match encode(&Outbound::KeysResult { request_id, values }) {
                Ok(message) => {
                    if out.send(message).await.is_err() {
                        debug!("bridge writer gone, dropping keys result");
                    }
                }
                Err(e) => warn!(error = %e, "failed to answer keys_get"),
            }
        }
        Inbound::KeysSet { data } => auth.set_keys(data),
        Inbound::SendResult {
            request_id,
            message_id,
            error,
        } => {
            let Some((_, reply)) = state.pending.remove(&request_id) else {
                debug!(%request_id, "send result for unknown request");
                return;
            };
            let result = match (message_id, error) {
                (Some(id), None) => Ok(id),
                (_, Some(error)) => Err(error),
                (None, None) => Err("bridge returned no message id".to_string()),
            };
            let _ = reply.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comanda_storage::Database;
    use comanda_vault::SessionKey;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_util::task::TaskTracker;

    use crate::session_store::SessionStore;

    #[test]
    fn inbound_frames_parse() {
        let frame: Inbound = serde_json::from_str(
            r#"{"type":"connection_update","connection":"open","me":"5511987654321:2@s.whatsapp.net"}"#,
        )
        .unwrap();
        assert!(matches!(
            frame,
            Inbound::ConnectionUpdate {
                connection: Some(TransportState::Open),
                me: Some(_),
                ..
            }
        ));

        let frame: Inbound = serde_json::from_str(
            r#"{"type":"send_result","requestId":"r1","messageId":"ABC"}"#,
        )
        .unwrap();
        assert!(matches!(frame, Inbound::SendResult { message_id: Some(_), .. }));
    }

    #[test]
    fn outbound_frames_are_tagged_camel_case() {
        let message = encode(&Outbound::SendText {
            request_id: "r1",
            jid: "5511@s.whatsapp.net",
            text: "hi",
        })
        .unwrap();
        let Message::Text(text) = message else {
            panic!("expected a text frame");
        };
        let value: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value["type"], "send_text");
        assert_eq!(value["requestId"], "r1");
    }

    #[tokio::test]
    async fn version_falls_back_when_unreachable() {
        let config = WhatsAppConfig {
            version_url: "http://127.0.0.1:9/version".to_string(),
            ..WhatsAppConfig::default()
        };
        let client = BridgeClient::new(&config).unwrap();
        assert_eq!(client.latest_version().await.unwrap(), DEFAULT_VERSION);
    }

    #[tokio::test]
    async fn bridge_round_trip_with_local_sidecar() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // A minimal sidecar: greet, open, ask for a key, confirm a send.
        let sidecar = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();

            let hello = ws.next().await.unwrap().unwrap();
            let hello: Value = serde_json::from_str(hello.to_text().unwrap()).unwrap();
            assert_eq!(hello["type"], "hello");
            assert_eq!(hello["sessionId"], "restaurant-main");

            let send = |v: Value| Message::text(v.to_string());
            ws.send(send(json!({"type": "keys_set", "data": {"pre-key": {"1": "k1"}}})))
                .await
                .unwrap();
            ws.send(send(json!({
                "type": "connection_update",
                "connection": "open",
                "me": "5511987654321:4@s.whatsapp.net"
            })))
            .await
            .unwrap();
            ws.send(send(json!({"type": "keys_get", "requestId": "k", "category": "pre-key", "ids": ["1", "2"]})))
                .await
                .unwrap();

            let mut saw_keys = false;
            while let Some(Ok(message)) = ws.next().await {
                let Ok(text) = message.to_text() else { continue };
                let Ok(frame) = serde_json::from_str::<Value>(text) else { continue };
                match frame["type"].as_str() {
                    Some("keys_result") => {
                        assert_eq!(frame["values"], json!({"1": "k1"}));
                        saw_keys = true;
                    }
                    Some("send_text") => {
                        let id = frame["requestId"].clone();
                        ws.send(send(json!({"type": "send_result", "requestId": id, "messageId": "MSG-1"})))
                            .await
                            .unwrap();
                    }
                    _ => {}
                }
            }
            saw_keys
        });

        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("bridge.db").to_str().unwrap())
            .await
            .unwrap();
        let store = SessionStore::new(db, Some(SessionKey::generate().unwrap()));
        let auth = Arc::new(AuthState::empty(store, "restaurant-main", TaskTracker::new()));

        let config = WhatsAppConfig {
            bridge_url: format!("ws://{addr}/socket"),
            ..WhatsAppConfig::default()
        };
        let client = BridgeClient::new(&config).unwrap();
        let mut handle = client
            .connect(DEFAULT_VERSION, Arc::clone(&auth))
            .await
            .unwrap();

        let event = handle.events.recv().await.unwrap();
        assert_eq!(event, SocketEvent::Connection(ConnectionUpdate::open()));
        assert!(handle.socket.is_transport_open());
        assert_eq!(
            handle.socket.own_id().as_deref(),
            Some("5511987654321:4@s.whatsapp.net")
        );

        let id = handle
            .socket
            .send_text("5511987654321@s.whatsapp.net", "Pedido pronto")
            .await
            .unwrap();
        assert_eq!(id, "MSG-1");

        handle.socket.end().await;
        assert!(!handle.socket.is_transport_open());
        assert!(sidecar.await.unwrap(), "sidecar should have received keys_result");
    }
}
