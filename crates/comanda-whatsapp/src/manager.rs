// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection lifecycle: one live socket, the state machine around it,
//! reconnect with backoff, and the periodic health check.
//!
//! Shared state sits behind a single async mutex. Two extra primitives
//! carry the concurrency rules:
//! - `retrying` is taken with a compare-exchange before the first await of
//!   a reconnect loop, so at most one loop runs.
//! - `epoch` is bumped by disconnect, retry, reset and shutdown; loops that
//!   started under an older epoch stop at their next checkpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use comanda_config::model::WhatsAppConfig;
use comanda_core::{AdapterType, ComandaError, HealthStatus, PluginAdapter};
use comanda_vault::mask_secret;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::auth_state::AuthState;
use crate::backoff::RetryPolicy;
use crate::client::{
    DisconnectInfo, DisconnectReason, MessagingClient, MessagingSocket, SocketEvent,
    TransportState,
};
use crate::phone::{normalize_phone, phone_from_jid, to_jid};
use crate::session_store::SessionStore;
use crate::state::{
    ConnectionState, ConnectionStatus, MonitorSnapshot, StateEvent, StatusCell,
};

/// Upper bound on the best-effort logout during reset.
const LOGOUT_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub session_id: String,
    pub retry: RetryPolicy,
    pub health_check_interval: Duration,
    /// Connection age after which each health tick probes the transport.
    pub stale_after: Duration,
    /// Upper bound on one initialize attempt.
    pub connect_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from_config(&WhatsAppConfig::default())
    }
}

impl ConnectionSettings {
    pub fn from_config(config: &WhatsAppConfig) -> Self {
        Self {
            session_id: config.session_id.clone(),
            retry: RetryPolicy::from_config(config),
            health_check_interval: Duration::from_secs(config.health_check_interval_secs),
            stale_after: Duration::from_secs(config.stale_after_secs),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }
}

/// Result of a successful `send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    pub message_id: String,
    pub jid: String,
}

/// Result of the `retry` action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryOutcome {
    pub success: bool,
    pub message: String,
}

impl RetryOutcome {
    fn new(success: bool, message: &str) -> Self {
        Self {
            success,
            message: message.to_string(),
        }
    }
}

#[derive(Default)]
struct Monitor {
    retry_count: u32,
    last_retry_time: Option<DateTime<Utc>>,
    connection_start_time: Option<DateTime<Utc>>,
    last_heartbeat: Option<DateTime<Utc>>,
    /// Monotonic instant of the last `open`, for the staleness check.
    connected_at: Option<Instant>,
    health_check: Option<JoinHandle<()>>,
}

struct ActiveSocket {
    generation: u64,
    socket: Arc<dyn MessagingSocket>,
    auth: Arc<AuthState>,
    pump: JoinHandle<()>,
}

struct Shared {
    status: StatusCell,
    monitor: Monitor,
    active: Option<ActiveSocket>,
    generation: u64,
}

struct Inner {
    settings: ConnectionSettings,
    store: SessionStore,
    client: Arc<dyn MessagingClient>,
    shared: Mutex<Shared>,
    retrying: AtomicBool,
    epoch: watch::Sender<u64>,
    tasks: TaskTracker,
}

/// Owner of the WhatsApp connection.
///
/// Cheap to clone; every clone drives the same connection. Construct one per
/// process (or per test).
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("session_id", &self.inner.settings.session_id)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(
        settings: ConnectionSettings,
        store: SessionStore,
        client: Arc<dyn MessagingClient>,
    ) -> Self {
        let (epoch, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                settings,
                store,
                client,
                shared: Mutex::new(Shared {
                    status: StatusCell::default(),
                    monitor: Monitor::default(),
                    active: None,
                    generation: 0,
                }),
                retrying: AtomicBool::new(false),
                epoch,
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.inner.settings
    }

    /// Snapshot of the connection status.
    pub async fn status(&self) -> ConnectionStatus {
        self.inner.shared.lock().await.status.snapshot()
    }

    /// Snapshot of the reconnect and health-check bookkeeping.
    pub async fn monitoring(&self) -> MonitorSnapshot {
        let shared = self.inner.shared.lock().await;
        MonitorSnapshot {
            retry_count: shared.monitor.retry_count,
            last_retry_time: shared.monitor.last_retry_time,
            is_retrying: self.inner.retrying.load(Ordering::Acquire),
            connection_start_time: shared.monitor.connection_start_time,
            last_heartbeat: shared.monitor.last_heartbeat,
            health_check_active: shared.monitor.health_check.is_some(),
        }
    }

    fn epoch(&self) -> u64 {
        *self.inner.epoch.borrow()
    }

    /// Invalidate reconnect loops and release the retry flag.
    ///
    /// Called with the shared lock held so a loop cannot release a flag
    /// that a newer loop already owns.
    fn cancel_background(&self, _shared: &mut MutexGuard<'_, Shared>) {
        self.inner.epoch.send_modify(|epoch| *epoch += 1);
        self.inner.retrying.store(false, Ordering::Release);
    }

    // --- socket ownership ---

    /// Create a socket with freshly loaded credentials and make it the live one.
    pub async fn initialize(&self) -> Result<(), ComandaError> {
        self.initialize_bounded(self.epoch()).await
    }

    async fn initialize_bounded(&self, epoch: u64) -> Result<(), ComandaError> {
        let limit = self.inner.settings.connect_timeout;
        match tokio::time::timeout(limit, self.initialize_for(epoch)).await {
            Ok(result) => result,
            Err(_) => Err(ComandaError::Timeout { duration: limit }),
        }
    }

    async fn initialize_for(&self, epoch: u64) -> Result<(), ComandaError> {
        let version = self.inner.client.latest_version().await?;
        let auth = AuthState::load(
            self.inner.store.clone(),
            self.inner.settings.session_id.clone(),
            self.inner.tasks.clone(),
        )
        .await?;

        // The previous socket must be silenced before its successor exists.
        {
            let mut shared = self.inner.shared.lock().await;
            if self.epoch() != epoch {
                return Err(superseded());
            }
            if let Some(old) = self.detach(&mut shared) {
                self.end_in_background(old.socket);
            }
        }

        let handle = self.inner.client.connect(version, Arc::clone(&auth)).await?;

        let mut shared = self.inner.shared.lock().await;
        if self.epoch() != epoch {
            self.end_in_background(handle.socket);
            return Err(superseded());
        }
        if let Some(old) = self.detach(&mut shared) {
            self.end_in_background(old.socket);
        }

        shared.generation += 1;
        let generation = shared.generation;
        let pump = tokio::spawn(pump_events(
            Arc::downgrade(&self.inner),
            generation,
            handle.events,
        ));
        shared.active = Some(ActiveSocket {
            generation,
            socket: handle.socket,
            auth: Arc::clone(&auth),
            pump,
        });

        if matches!(
            shared.status.state(),
            ConnectionState::Connected | ConnectionState::QrRequired
        ) {
            shared.status.apply(StateEvent::Closed);
        }
        shared.status.apply(StateEvent::Initialize);
        shared.monitor.connection_start_time = Some(Utc::now());
        self.start_health_monitor(&mut shared);

        info!(
            generation,
            version = %version,
            resumed = auth.has_creds(),
            "socket initialized"
        );
        Ok(())
    }

    /// Take the live socket out, detaching its event pump.
    fn detach(&self, shared: &mut Shared) -> Option<ActiveSocket> {
        let active = shared.active.take()?;
        active.pump.abort();
        shared.monitor.connected_at = None;
        debug!(generation = active.generation, "socket detached");
        Some(active)
    }

    fn end_in_background(&self, socket: Arc<dyn MessagingSocket>) {
        self.inner.tasks.spawn(async move { socket.end().await });
    }

    // --- socket events ---

    async fn handle_event(&self, generation: u64, event: SocketEvent) {
        let mut shared = self.inner.shared.lock().await;
        let Some(active) = shared.active.as_ref().filter(|a| a.generation == generation) else {
            debug!(generation, "ignoring event from detached socket");
            return;
        };
        let auth = Arc::clone(&active.auth);
        let socket = Arc::clone(&active.socket);

        match event {
            SocketEvent::CredsUpdate(patch) => {
                auth.update_creds(patch);
                auth.save_creds();
            }
            SocketEvent::Connection(update) => {
                if let Some(qr) = update.qr
                    && shared.status.set_qr(qr)
                {
                    info!("pairing QR received, waiting for scan");
                }
                match update.connection {
                    Some(TransportState::Connecting) => {
                        shared.status.apply(StateEvent::TransportConnecting);
                    }
                    Some(TransportState::Open) => self.on_open(&mut shared, &auth, socket.as_ref()),
                    Some(TransportState::Close) => {
                        self.on_close(&mut shared, auth, update.disconnect.unwrap_or_default());
                    }
                    None => {}
                }
            }
        }
    }

    fn on_open(&self, shared: &mut Shared, auth: &AuthState, socket: &dyn MessagingSocket) {
        if !shared.status.apply(StateEvent::Opened) {
            return;
        }
        let now = Utc::now();
        if let Some(phone) = socket.own_id().map(|jid| phone_from_jid(&jid)) {
            auth.set_phone(Some(phone));
        }
        shared.status.phone_number = auth.phone();
        shared.status.last_connected = Some(now);
        shared.monitor.retry_count = 0;
        shared.monitor.last_heartbeat = Some(now);
        shared.monitor.connected_at = Some(Instant::now());
        self.inner.retrying.store(false, Ordering::Release);
        self.start_health_monitor(shared);

        let masked = shared.status.phone_number.as_deref().map(mask_secret);
        info!(phone = ?masked, "WhatsApp connected");
    }

    fn on_close(&self, shared: &mut Shared, auth: Arc<AuthState>, info: DisconnectInfo) {
        let reason = DisconnectReason::from_status_code(info.status_code);
        let decision = reason.decision();

        shared.status.apply(StateEvent::Closed);
        shared.monitor.connected_at = None;
        self.stop_health_monitor(shared);

        if reason == DisconnectReason::LoggedOut {
            shared.status.phone_number = None;
            auth.set_phone(None);
        }

        warn!(
            %reason,
            status_code = ?info.status_code,
            message = ?info.message,
            reconnect = decision.reconnect,
            clear_session = decision.clear_session,
            "connection closed"
        );

        if !decision.reconnect && !decision.clear_session {
            return;
        }
        let resume_from = shared.monitor.retry_count;
        let manager = self.clone();
        self.inner.tasks.spawn(async move {
            if decision.clear_session
                && let Err(e) = auth.clear_session().await
            {
                warn!(error = %e, "failed to clear persisted session");
            }
            if decision.reconnect {
                manager.reconnect(resume_from).await;
            }
        });
    }

    // --- recovery ---

    /// Reconnect with exponential backoff, starting at `attempt`.
    ///
    /// A call while another loop is running returns immediately.
    pub async fn reconnect(&self, attempt: u32) {
        if self
            .inner
            .retrying
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("reconnect already in progress");
            return;
        }

        let mut epoch_rx = self.inner.epoch.subscribe();
        let epoch = *epoch_rx.borrow_and_update();
        let policy = &self.inner.settings.retry;
        let mut attempt = attempt;

        loop {
            if policy.is_exhausted(attempt) {
                let mut shared = self.inner.shared.lock().await;
                if self.epoch() != epoch {
                    return;
                }
                shared.status.apply(StateEvent::RetriesExhausted);
                self.stop_health_monitor(&mut shared);
                self.inner.retrying.store(false, Ordering::Release);
                error!(attempts = attempt, "reconnect attempts exhausted, connection failed");
                return;
            }

            let delay = policy.delay_for(attempt);
            {
                let mut shared = self.inner.shared.lock().await;
                if self.epoch() != epoch {
                    return;
                }
                shared.monitor.retry_count = attempt + 1;
                shared.monitor.last_retry_time = Some(Utc::now());
            }
            info!(
                attempt = attempt + 1,
                max_retries = policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                "scheduling reconnect"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = epoch_rx.changed() => {
                    debug!("reconnect cancelled");
                    return;
                }
            }

            match self.initialize_bounded(epoch).await {
                Ok(()) => {
                    let _shared = self.inner.shared.lock().await;
                    if self.epoch() == epoch {
                        self.inner.retrying.store(false, Ordering::Release);
                    }
                    return;
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "reconnect attempt failed");
                    attempt += 1;
                }
            }
        }
    }

    /// Operator retry: restart the reconnect loop from attempt 0.
    pub async fn retry(&self) -> RetryOutcome {
        {
            let mut shared = self.inner.shared.lock().await;
            match shared.status.state() {
                ConnectionState::Connected => {
                    return RetryOutcome::new(true, "Connection already active");
                }
                ConnectionState::Connecting | ConnectionState::QrRequired => {
                    return RetryOutcome::new(true, "Connection attempt already in progress");
                }
                ConnectionState::Disconnected | ConnectionState::Failed => {}
            }
            if self.inner.retrying.load(Ordering::Acquire) {
                return RetryOutcome::new(true, "Connection attempt already in progress");
            }
            self.cancel_background(&mut shared);
            self.stop_health_monitor(&mut shared);
            shared.status.apply(StateEvent::Retry);
            shared.monitor.retry_count = 0;
            shared.monitor.last_retry_time = None;
        }

        info!("retry requested, restarting reconnect loop");
        let manager = self.clone();
        self.inner.tasks.spawn(async move { manager.reconnect(0).await });
        RetryOutcome::new(true, "Reconnection started")
    }

    // --- health monitoring ---

    fn start_health_monitor(&self, shared: &mut Shared) {
        self.stop_health_monitor(shared);
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.settings.health_check_interval;
        shared.monitor.health_check = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let manager = ConnectionManager { inner };
                if !manager.health_tick().await {
                    break;
                }
            }
        }));
    }

    fn stop_health_monitor(&self, shared: &mut Shared) {
        if let Some(handle) = shared.monitor.health_check.take() {
            handle.abort();
        }
    }

    /// One health check. Returns `false` when monitoring should stop.
    async fn health_tick(&self) -> bool {
        let mut shared = self.inner.shared.lock().await;
        if !shared.status.is_connected() {
            return true;
        }
        let Some(connected_at) = shared.monitor.connected_at else {
            return true;
        };
        if connected_at.elapsed() < self.inner.settings.stale_after {
            return true;
        }
        let Some(active) = shared.active.as_ref() else {
            return true;
        };

        if active.socket.is_transport_open() {
            shared.monitor.last_heartbeat = Some(Utc::now());
            debug!("health check passed");
            return true;
        }

        warn!("health check found a dead transport, reconnecting");
        shared.status.apply(StateEvent::Closed);
        shared.monitor.connected_at = None;
        // This task is the monitor; dropping its own handle just detaches it.
        shared.monitor.health_check = None;
        let manager = self.clone();
        self.inner.tasks.spawn(async move { manager.reconnect(0).await });
        false
    }

    // --- caller actions ---

    /// Start connecting unless a socket is already live or negotiating.
    ///
    /// A connection in `failed` stays failed until `retry` or `reset`.
    pub async fn connect(&self) -> Result<ConnectionStatus, ComandaError> {
        let epoch = {
            let mut shared = self.inner.shared.lock().await;
            let state = shared.status.state();
            if state.is_active()
                || state == ConnectionState::Failed
                || self.inner.retrying.load(Ordering::Acquire)
            {
                debug!(%state, "connect ignored, connection already in progress");
                return Ok(shared.status.snapshot());
            }
            shared.status.apply(StateEvent::Initialize);
            self.epoch()
        };

        if let Err(e) = self.initialize_bounded(epoch).await {
            let mut shared = self.inner.shared.lock().await;
            if self.epoch() == epoch && shared.status.state() == ConnectionState::Connecting {
                shared.status.apply(StateEvent::Closed);
            }
            error!(error = %e, "connect failed");
            return Err(e);
        }
        Ok(self.status().await)
    }

    /// Stop monitoring, cancel recovery and close the socket.
    ///
    /// The persisted session is kept so the next `connect` resumes.
    pub async fn disconnect(&self) {
        let detached = {
            let mut shared = self.inner.shared.lock().await;
            self.cancel_background(&mut shared);
            self.stop_health_monitor(&mut shared);
            let detached = self.detach(&mut shared);
            shared.status.apply(StateEvent::Disconnect);
            detached
        };
        if let Some(active) = detached {
            active.socket.end().await;
        }
        info!("disconnected");
    }

    /// Send `text` to the customer number `to`.
    pub async fn send_message(&self, to: &str, text: &str) -> Result<SentMessage, ComandaError> {
        let socket = {
            let shared = self.inner.shared.lock().await;
            match shared.active.as_ref() {
                Some(active) if shared.status.is_connected() => Arc::clone(&active.socket),
                _ => return Err(ComandaError::NotConnected),
            }
        };

        let number = normalize_phone(to)?;
        let jid = to_jid(&number);
        let message_id = socket.send_text(&jid, text).await?;
        info!(to = %mask_secret(&number), %message_id, "message sent");
        Ok(SentMessage { message_id, jid })
    }

    /// Forget everything: log out (best effort), clear the persisted session
    /// and zero the status and monitor. Never fails.
    pub async fn reset(&self) {
        let detached = {
            let mut shared = self.inner.shared.lock().await;
            self.cancel_background(&mut shared);
            self.stop_health_monitor(&mut shared);
            let detached = self.detach(&mut shared);
            shared.status = StatusCell::default();
            shared.monitor = Monitor::default();
            detached
        };

        let cleared = match &detached {
            Some(active) => active.auth.clear_session().await,
            None => self.inner.store.clear(&self.inner.settings.session_id).await,
        };
        if let Err(e) = cleared {
            warn!(error = %e, "failed to clear persisted session during reset");
        }

        if let Some(active) = detached {
            let socket = active.socket;
            self.inner.tasks.spawn(async move {
                match tokio::time::timeout(LOGOUT_TIMEOUT, socket.logout()).await {
                    Ok(Ok(())) => debug!("logged out during reset"),
                    Ok(Err(e)) => warn!(error = %e, "logout failed during reset"),
                    Err(_) => warn!("logout timed out during reset"),
                }
                socket.end().await;
            });
        }
        info!("connection reset");
    }
}

fn superseded() -> ComandaError {
    ComandaError::channel("connection attempt superseded")
}

async fn pump_events(weak: Weak<Inner>, generation: u64, mut events: mpsc::Receiver<SocketEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = weak.upgrade() else { break };
        let manager = ConnectionManager { inner };
        manager.handle_event(generation, event).await;
    }
    debug!(generation, "socket event stream ended");
}

#[async_trait]
impl PluginAdapter for ConnectionManager {
    fn name(&self) -> &str {
        "whatsapp"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Channel
    }

    async fn health_check(&self) -> Result<HealthStatus, ComandaError> {
        let state = self.inner.shared.lock().await.status.state();
        Ok(match state {
            ConnectionState::Connected => HealthStatus::Healthy,
            ConnectionState::Failed => {
                HealthStatus::Unhealthy("reconnect attempts exhausted".to_string())
            }
            other => HealthStatus::Degraded(format!("connection {other}")),
        })
    }

    async fn shutdown(&self) -> Result<(), ComandaError> {
        let detached = {
            let mut shared = self.inner.shared.lock().await;
            self.cancel_background(&mut shared);
            self.stop_health_monitor(&mut shared);
            self.detach(&mut shared)
        };
        if let Some(active) = detached {
            active.socket.end().await;
        }
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        debug!("connection manager drained");
        Ok(())
    }
}
