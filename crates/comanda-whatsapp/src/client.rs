// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Seam between the connection manager and the messaging library.
//!
//! The library owns the wire protocol; the manager only sees a socket it can
//! probe, send through, log out of, and end, plus a stream of events.

use std::sync::Arc;

use async_trait::async_trait;
use comanda_core::ComandaError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::auth_state::AuthState;

/// Messaging protocol version, as `[major, minor, patch]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion(pub [u32; 3]);

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{a}.{b}.{c}")
    }
}

/// Factory for messaging sockets.
#[async_trait]
pub trait MessagingClient: Send + Sync + 'static {
    /// Latest protocol version the network accepts.
    async fn latest_version(&self) -> Result<ProtocolVersion, ComandaError>;

    /// Open a socket authenticated with `auth`.
    ///
    /// The returned event stream ends when the socket is gone.
    async fn connect(
        &self,
        version: ProtocolVersion,
        auth: Arc<AuthState>,
    ) -> Result<SocketHandle, ComandaError>;
}

/// A live messaging socket.
#[async_trait]
pub trait MessagingSocket: Send + Sync + 'static {
    /// Whether the underlying transport is currently open.
    fn is_transport_open(&self) -> bool;

    /// JID of the authenticated account, once known.
    fn own_id(&self) -> Option<String>;

    /// Send a text message, returning the network's message id.
    async fn send_text(&self, jid: &str, text: &str) -> Result<String, ComandaError>;

    /// Unlink this device from the account.
    async fn logout(&self) -> Result<(), ComandaError>;

    /// Close the transport without logging out.
    async fn end(&self);
}

/// A socket plus the events it emits.
pub struct SocketHandle {
    pub socket: Arc<dyn MessagingSocket>,
    pub events: mpsc::Receiver<SocketEvent>,
}

impl std::fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketHandle").finish_non_exhaustive()
    }
}

/// Events surfaced by a socket.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    /// Credential fields changed; the patch is merged into the stored creds.
    CredsUpdate(Map<String, Value>),
    /// Transport and pairing state changed.
    Connection(ConnectionUpdate),
}

/// Payload of a connection event. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionUpdate {
    #[serde(default)]
    pub connection: Option<TransportState>,
    #[serde(default)]
    pub qr: Option<String>,
    #[serde(default)]
    pub disconnect: Option<DisconnectInfo>,
}

impl ConnectionUpdate {
    pub fn open() -> Self {
        Self {
            connection: Some(TransportState::Open),
            ..Self::default()
        }
    }

    pub fn qr(qr: impl Into<String>) -> Self {
        Self {
            qr: Some(qr.into()),
            ..Self::default()
        }
    }

    pub fn closed(status_code: Option<u16>) -> Self {
        Self {
            connection: Some(TransportState::Close),
            disconnect: Some(DisconnectInfo {
                status_code,
                message: None,
            }),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    Connecting,
    Open,
    Close,
}

/// Why the transport closed, as reported by the library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectInfo {
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Classified close reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum DisconnectReason {
    LoggedOut,
    BadSession,
    ConnectionClosed,
    ConnectionLost,
    ConnectionReplaced,
    RestartRequired,
    Unknown,
}

/// What the manager does after a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseDecision {
    pub reconnect: bool,
    pub clear_session: bool,
}

impl DisconnectReason {
    /// Map the library's numeric close code.
    pub fn from_status_code(code: Option<u16>) -> Self {
        match code {
            Some(401) => Self::LoggedOut,
            Some(500) => Self::BadSession,
            Some(428) => Self::ConnectionClosed,
            Some(408) => Self::ConnectionLost,
            Some(440) => Self::ConnectionReplaced,
            Some(515) => Self::RestartRequired,
            _ => Self::Unknown,
        }
    }

    pub fn decision(self) -> CloseDecision {
        match self {
            Self::LoggedOut => CloseDecision {
                reconnect: false,
                clear_session: true,
            },
            Self::BadSession => CloseDecision {
                reconnect: true,
                clear_session: true,
            },
            Self::ConnectionReplaced => CloseDecision {
                reconnect: false,
                clear_session: false,
            },
            Self::ConnectionClosed
            | Self::ConnectionLost
            | Self::RestartRequired
            | Self::Unknown => CloseDecision {
                reconnect: true,
                clear_session: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_classify() {
        assert_eq!(
            DisconnectReason::from_status_code(Some(401)),
            DisconnectReason::LoggedOut
        );
        assert_eq!(
            DisconnectReason::from_status_code(Some(515)),
            DisconnectReason::RestartRequired
        );
        assert_eq!(
            DisconnectReason::from_status_code(Some(999)),
            DisconnectReason::Unknown
        );
        assert_eq!(
            DisconnectReason::from_status_code(None),
            DisconnectReason::Unknown
        );
    }

    #[test]
    fn close_decision_table() {
        let table = [
            (401, false, true),
            (500, true, true),
            (428, true, false),
            (408, true, false),
            (440, false, false),
            (515, true, false),
            (499, true, false),
        ];
        for (code, reconnect, clear_session) in table {
            let decision = DisconnectReason::from_status_code(Some(code)).decision();
            assert_eq!(
                decision,
                CloseDecision {
                    reconnect,
                    clear_session
                },
                "status code {code}"
            );
        }
    }

    #[test]
    fn connection_update_parses_camel_case_disconnect() {
        let update: ConnectionUpdate = serde_json::from_str(
            r#"{"connection":"close","disconnect":{"statusCode":401,"message":"logged out"}}"#,
        )
        .unwrap();
        assert_eq!(update.connection, Some(TransportState::Close));
        assert_eq!(update.disconnect.unwrap().status_code, Some(401));
    }

    #[test]
    fn protocol_version_display() {
        assert_eq!(ProtocolVersion([2, 3000, 1]).to_string(), "2.3000.1");
    }
}
