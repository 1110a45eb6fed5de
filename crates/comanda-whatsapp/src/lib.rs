// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WhatsApp session persistence and connection lifecycle for the Comanda platform.
//!
//! The pieces, leaf-first:
//! - [`SessionStore`]: encrypted, soft-deletable session rows in SQLite.
//! - [`AuthState`]: in-memory credentials and key material handed to the
//!   messaging client, flushed back to the store on change.
//! - [`ConnectionManager`]: owns the single live socket, drives the
//!   [`ConnectionState`] machine, reconnects with backoff and runs the
//!   health check.
//! - [`BridgeClient`]: the shipped [`MessagingClient`], talking to a protocol
//!   sidecar over WebSocket.

pub mod auth_state;
pub mod backoff;
pub mod bridge;
pub mod client;
pub mod manager;
pub mod phone;
pub mod session_store;
pub mod state;

pub use auth_state::{AuthState, SessionData};
pub use backoff::RetryPolicy;
pub use bridge::BridgeClient;
pub use client::{
    CloseDecision, ConnectionUpdate, DisconnectInfo, DisconnectReason, MessagingClient,
    MessagingSocket, ProtocolVersion, SocketEvent, SocketHandle, TransportState,
};
pub use manager::{ConnectionManager, ConnectionSettings, RetryOutcome, SentMessage};
pub use session_store::{LoadedSession, SessionStore};
pub use state::{ConnectionState, ConnectionStatus, MonitorSnapshot, StateEvent};
