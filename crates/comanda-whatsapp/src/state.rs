// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection state machine and the snapshots exposed to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of the WhatsApp connection.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    QrRequired,
    /// Reconnects exhausted. Left only by an explicit retry or reset.
    Failed,
}

/// Everything that can move the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum StateEvent {
    /// A socket was created and is negotiating.
    Initialize,
    /// The transport reported it is (re)negotiating, e.g. after a scan.
    TransportConnecting,
    /// A pairing QR arrived.
    QrReceived,
    /// The transport is open and authenticated.
    Opened,
    /// The transport closed, or the health probe found it dead.
    Closed,
    /// The reconnect loop ran out of attempts.
    RetriesExhausted,
    /// The operator asked to retry after a failure.
    Retry,
    /// Caller-initiated disconnect.
    Disconnect,
    /// Caller-initiated reset.
    Reset,
}

impl ConnectionState {
    /// The state reached from `self` on `event`, or `None` if the event is
    /// not legal here.
    pub fn transition(self, event: StateEvent) -> Option<ConnectionState> {
        use ConnectionState::*;
        use StateEvent::*;

        match (self, event) {
            (Disconnected | Connecting | Failed, Initialize) => Some(Connecting),
            (Connecting | QrRequired, TransportConnecting) => Some(Connecting),
            (Connecting | QrRequired, QrReceived) => Some(QrRequired),
            (Connecting | QrRequired, Opened) => Some(Connected),
            (Disconnected | Connecting | Connected | QrRequired, Closed) => Some(Disconnected),
            (Disconnected | Connecting, RetriesExhausted) => Some(Failed),
            (Failed | Disconnected, Retry) => Some(Disconnected),
            (_, Disconnect | Reset) => Some(Disconnected),
            _ => None,
        }
    }

    /// Whether a live or negotiating socket exists in this state.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::QrRequired
        )
    }
}

/// Mutable connection status owned by the manager.
///
/// `is_connected` is derived from the state and the QR is dropped whenever
/// the state leaves `qr_required`, so snapshots always satisfy both
/// invariants.
#[derive(Debug, Clone, Default)]
pub(crate) struct StatusCell {
    state: ConnectionState,
    qr_code: Option<String>,
    pub(crate) phone_number: Option<String>,
    pub(crate) last_connected: Option<DateTime<Utc>>,
}

impl StatusCell {
    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Apply `event`. Illegal transitions leave the state untouched and
    /// return `false`.
    pub(crate) fn apply(&mut self, event: StateEvent) -> bool {
        match self.state.transition(event) {
            Some(next) => {
                self.state = next;
                if next != ConnectionState::QrRequired {
                    self.qr_code = None;
                }
                true
            }
            None => {
                tracing::warn!(state = %self.state, event = %event, "ignoring illegal state transition");
                false
            }
        }
    }

    /// Record a QR and enter `qr_required`.
    pub(crate) fn set_qr(&mut self, qr: String) -> bool {
        if self.apply(StateEvent::QrReceived) {
            self.qr_code = Some(qr);
            true
        } else {
            false
        }
    }

    pub(crate) fn snapshot(&self) -> ConnectionStatus {
        ConnectionStatus {
            is_connected: self.is_connected(),
            connection_state: self.state,
            qr_code: self.qr_code.clone(),
            phone_number: self.phone_number.clone(),
            last_connected: self.last_connected,
        }
    }
}

/// Read-only connection status, as reported by the `status` action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub is_connected: bool,
    pub connection_state: ConnectionState,
    pub qr_code: Option<String>,
    pub phone_number: Option<String>,
    pub last_connected: Option<DateTime<Utc>>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        StatusCell::default().snapshot()
    }
}

/// Read-only view of the reconnect and health-check bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSnapshot {
    pub retry_count: u32,
    pub last_retry_time: Option<DateTime<Utc>>,
    pub is_retrying: bool,
    pub connection_start_time: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub health_check_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn fresh_pairing_path() {
        let s = ConnectionState::Disconnected;
        let s = s.transition(StateEvent::Initialize).unwrap();
        assert_eq!(s, ConnectionState::Connecting);
        let s = s.transition(StateEvent::QrReceived).unwrap();
        assert_eq!(s, ConnectionState::QrRequired);
        let s = s.transition(StateEvent::TransportConnecting).unwrap();
        assert_eq!(s, ConnectionState::Connecting);
        let s = s.transition(StateEvent::Opened).unwrap();
        assert_eq!(s, ConnectionState::Connected);
        assert_eq!(
            s.transition(StateEvent::Closed),
            Some(ConnectionState::Disconnected)
        );
    }

    #[test]
    fn failed_is_left_only_by_retry_or_reset() {
        let failed = ConnectionState::Failed;
        assert_eq!(failed.transition(StateEvent::Opened), None);
        assert_eq!(failed.transition(StateEvent::QrReceived), None);
        assert_eq!(failed.transition(StateEvent::Closed), None);
        assert_eq!(
            failed.transition(StateEvent::Retry),
            Some(ConnectionState::Disconnected)
        );
        assert_eq!(
            failed.transition(StateEvent::Reset),
            Some(ConnectionState::Disconnected)
        );
    }

    #[test]
    fn qr_required_cannot_fail_directly() {
        assert_eq!(
            ConnectionState::QrRequired.transition(StateEvent::RetriesExhausted),
            None
        );
    }

    #[test]
    fn connected_cannot_reinitialize() {
        assert_eq!(
            ConnectionState::Connected.transition(StateEvent::Initialize),
            None
        );
        assert_eq!(
            ConnectionState::Connected.transition(StateEvent::QrReceived),
            None
        );
    }

    #[test]
    fn state_names_are_snake_case() {
        assert_eq!(ConnectionState::QrRequired.to_string(), "qr_required");
        assert_eq!(
            ConnectionState::from_str("qr_required").unwrap(),
            ConnectionState::QrRequired
        );
        let json = serde_json::to_string(&ConnectionState::QrRequired).unwrap();
        assert_eq!(json, "\"qr_required\"");
    }

    #[test]
    fn status_cell_keeps_invariants() {
        let mut cell = StatusCell::default();
        assert!(cell.apply(StateEvent::Initialize));
        assert!(cell.set_qr("qr-1".into()));
        let snap = cell.snapshot();
        assert_eq!(snap.qr_code.as_deref(), Some("qr-1"));
        assert!(!snap.is_connected);

        assert!(cell.apply(StateEvent::Opened));
        let snap = cell.snapshot();
        assert!(snap.is_connected);
        assert_eq!(snap.connection_state, ConnectionState::Connected);
        assert_eq!(snap.qr_code, None);

        // Illegal: a QR while connected is ignored and leaves no QR behind.
        assert!(!cell.set_qr("qr-2".into()));
        assert_eq!(cell.snapshot().qr_code, None);
        assert!(cell.snapshot().is_connected);
    }

    #[test]
    fn status_serializes_camel_case() {
        let json = serde_json::to_value(ConnectionStatus::default()).unwrap();
        assert_eq!(json["isConnected"], false);
        assert_eq!(json["connectionState"], "disconnected");
        assert!(json["qrCode"].is_null());
        assert!(json["lastConnected"].is_null());
    }
}
