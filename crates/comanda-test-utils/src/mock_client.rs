// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock messaging client for deterministic lifecycle tests.
//!
//! `MockMessagingClient` hands out [`MockSocket`]s whose first events follow
//! a per-connect script. Tests can inject further events into the most
//! recent socket and inspect everything that was sent.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use comanda_core::ComandaError;
use comanda_whatsapp::{
    AuthState, ConnectionUpdate, MessagingClient, MessagingSocket, ProtocolVersion, SocketEvent,
    SocketHandle, TransportState,
};
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, Mutex};

/// JID reported by mock sockets once paired.
pub const MOCK_JID: &str = "5511987654321:7@s.whatsapp.net";

/// What a single `connect` call does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Open straight away when the auth state carries credentials,
    /// otherwise ask for a QR scan.
    Auto,
    /// Fail the connect call.
    Fail(String),
    /// Never return.
    Hang,
    /// Return a socket that emits nothing.
    Silent,
}

/// A mock messaging socket.
pub struct MockSocket {
    open: AtomicBool,
    ended: AtomicBool,
    logged_out: AtomicBool,
    own_id: std::sync::Mutex<Option<String>>,
    sent: Mutex<Vec<(String, String)>>,
}

impl MockSocket {
    fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            ended: AtomicBool::new(false),
            logged_out: AtomicBool::new(false),
            own_id: std::sync::Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn set_own_id(&self, jid: &str) {
        if let Ok(mut own_id) = self.own_id.lock() {
            *own_id = Some(jid.to_string());
        }
    }

    /// Simulate a silent transport drop (no close event).
    pub fn drop_transport(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }

    /// `(jid, text)` pairs passed to `send_text`.
    pub async fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl MessagingSocket for MockSocket {
    fn is_transport_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.is_ended()
    }

    fn own_id(&self) -> Option<String> {
        self.own_id.lock().ok().and_then(|id| id.clone())
    }

    async fn send_text(&self, jid: &str, text: &str) -> Result<String, ComandaError> {
        if !self.is_transport_open() {
            return Err(ComandaError::channel("mock transport is closed"));
        }
        self.sent
            .lock()
            .await
            .push((jid.to_string(), text.to_string()));
        Ok(format!("mock-msg-{}", uuid::Uuid::new_v4()))
    }

    async fn logout(&self) -> Result<(), ComandaError> {
        self.logged_out.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }
}

/// A scripted [`MessagingClient`].
pub struct MockMessagingClient {
    default_behavior: Mutex<ConnectBehavior>,
    script: Mutex<VecDeque<ConnectBehavior>>,
    connects: AtomicUsize,
    sockets: Mutex<Vec<Arc<MockSocket>>>,
    senders: Mutex<Vec<mpsc::Sender<SocketEvent>>>,
    emitted: std::sync::Mutex<Vec<SocketEvent>>,
}

impl MockMessagingClient {
    /// A client whose every connect behaves as [`ConnectBehavior::Auto`].
    pub fn new() -> Self {
        Self::with_default(ConnectBehavior::Auto)
    }

    pub fn with_default(behavior: ConnectBehavior) -> Self {
        Self {
            default_behavior: Mutex::new(behavior),
            script: Mutex::new(VecDeque::new()),
            connects: AtomicUsize::new(0),
            sockets: Mutex::new(Vec::new()),
            senders: Mutex::new(Vec::new()),
            emitted: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Queue behaviors for the next connects, in order.
    pub async fn script(&self, behaviors: impl IntoIterator<Item = ConnectBehavior>) {
        self.script.lock().await.extend(behaviors);
    }

    /// Change what unscripted connects do.
    pub async fn set_default(&self, behavior: ConnectBehavior) {
        *self.default_behavior.lock().await = behavior;
    }

    /// Number of `connect` calls so far, including failed ones.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of sockets handed out.
    pub async fn socket_count(&self) -> usize {
        self.sockets.lock().await.len()
    }

    pub async fn latest_socket(&self) -> Option<Arc<MockSocket>> {
        self.sockets.lock().await.last().cloned()
    }

    pub async fn socket(&self, index: usize) -> Option<Arc<MockSocket>> {
        self.sockets.lock().await.get(index).cloned()
    }

    /// Every event handed to a socket listener so far, in order.
    pub fn emitted_events(&self) -> Vec<SocketEvent> {
        self.emitted.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn record(&self, event: &SocketEvent) {
        if let Ok(mut emitted) = self.emitted.lock() {
            emitted.push(event.clone());
        }
    }

    /// Emit `event` from socket `index`. Returns `false` once its listener is gone.
    pub async fn emit_from(&self, index: usize, event: SocketEvent) -> bool {
        let sender = self.senders.lock().await.get(index).cloned();
        self.record(&event);
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Emit `event` from the most recent socket.
    pub async fn emit(&self, event: SocketEvent) -> bool {
        let sender = self.senders.lock().await.last().cloned();
        self.record(&event);
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Close the most recent socket with `status_code`.
    pub async fn close_latest(&self, status_code: u16) -> bool {
        if let Some(socket) = self.latest_socket().await {
            socket.drop_transport();
        }
        self.emit(SocketEvent::Connection(ConnectionUpdate::closed(Some(status_code))))
            .await
    }

    /// Complete a QR scan on the most recent socket: new creds, then open.
    pub async fn complete_pairing(&self) -> bool {
        if let Some(socket) = self.latest_socket().await {
            socket.set_own_id(MOCK_JID);
        }
        let mut patch = Map::new();
        patch.insert("me".to_string(), json!({ "id": MOCK_JID }));
        patch.insert("registered".to_string(), Value::Bool(true));
        self.emit(SocketEvent::CredsUpdate(patch)).await
            && self
                .emit(SocketEvent::Connection(ConnectionUpdate {
                    connection: Some(TransportState::Connecting),
                    ..ConnectionUpdate::default()
                }))
                .await
            && self
                .emit(SocketEvent::Connection(ConnectionUpdate::open()))
                .await
    }

    async fn next_behavior(&self) -> ConnectBehavior {
        match self.script.lock().await.pop_front() {
            Some(behavior) => behavior,
            None => self.default_behavior.lock().await.clone(),
        }
    }
}

impl Default for MockMessagingClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagingClient for MockMessagingClient {
    async fn latest_version(&self) -> Result<ProtocolVersion, ComandaError> {
        Ok(ProtocolVersion([2, 3000, 1]))
    }

    async fn connect(
        &self,
        _version: ProtocolVersion,
        auth: Arc<AuthState>,
    ) -> Result<SocketHandle, ComandaError> {
        let attempt = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        let behavior = self.next_behavior().await;

        let initial = match behavior {
            ConnectBehavior::Fail(reason) => return Err(ComandaError::channel(reason)),
            ConnectBehavior::Hang => std::future::pending().await,
            ConnectBehavior::Silent => None,
            ConnectBehavior::Auto => Some(auth.has_creds()),
        };

        let socket = Arc::new(MockSocket::new());
        let (tx, rx) = mpsc::channel(32);

        let first = match initial {
            Some(true) => {
                let jid = auth
                    .creds()
                    .and_then(|creds| creds["me"]["id"].as_str().map(str::to_string))
                    .unwrap_or_else(|| MOCK_JID.to_string());
                socket.set_own_id(&jid);
                Some(SocketEvent::Connection(ConnectionUpdate::open()))
            }
            Some(false) => Some(SocketEvent::Connection(ConnectionUpdate::qr(format!(
                "mock-qr-{attempt}"
            )))),
            None => None,
        };
        if let Some(event) = first {
            self.record(&event);
            let _ = tx.send(event).await;
        }

        self.sockets.lock().await.push(Arc::clone(&socket));
        self.senders.lock().await.push(tx);
        Ok(SocketHandle { socket, events: rx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comanda_storage::Database;
    use comanda_vault::SessionKey;
    use comanda_whatsapp::SessionStore;
    use tokio_util::task::TaskTracker;

    async fn auth(dir: &tempfile::TempDir, with_creds: bool) -> Arc<AuthState> {
        let db = Database::open(dir.path().join("mock.db").to_str().unwrap())
            .await
            .unwrap();
        let store = SessionStore::new(db, Some(SessionKey::generate().unwrap()));
        let auth = Arc::new(AuthState::empty(store, "main", TaskTracker::new()));
        if with_creds {
            let mut patch = Map::new();
            patch.insert("me".into(), json!({"id": "5511900000000:1@s.whatsapp.net"}));
            auth.update_creds(patch);
        }
        auth
    }

    #[tokio::test]
    async fn auto_asks_for_qr_without_creds() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockMessagingClient::new();
        let mut handle = client
            .connect(ProtocolVersion([2, 3000, 1]), auth(&dir, false).await)
            .await
            .unwrap();
        let event = handle.events.recv().await.unwrap();
        assert_eq!(
            event,
            SocketEvent::Connection(ConnectionUpdate::qr("mock-qr-1"))
        );
    }

    #[tokio::test]
    async fn auto_opens_with_creds_and_reports_identity() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockMessagingClient::new();
        let mut handle = client
            .connect(ProtocolVersion([2, 3000, 1]), auth(&dir, true).await)
            .await
            .unwrap();
        assert_eq!(
            handle.events.recv().await.unwrap(),
            SocketEvent::Connection(ConnectionUpdate::open())
        );
        assert_eq!(
            handle.socket.own_id().as_deref(),
            Some("5511900000000:1@s.whatsapp.net")
        );
    }

    #[tokio::test]
    async fn scripted_failures_come_first() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockMessagingClient::with_default(ConnectBehavior::Silent);
        client
            .script([ConnectBehavior::Fail("boom".into())])
            .await;
        let auth = auth(&dir, false).await;

        assert!(client
            .connect(ProtocolVersion([2, 3000, 1]), Arc::clone(&auth))
            .await
            .is_err());
        assert!(client
            .connect(ProtocolVersion([2, 3000, 1]), auth)
            .await
            .is_ok());
        assert_eq!(client.connect_count(), 2);
        assert_eq!(client.socket_count().await, 1);
    }
}
