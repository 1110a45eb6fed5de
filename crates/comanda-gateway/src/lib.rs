// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP control surface for the WhatsApp connection.
//!
//! Every action lives under one base path and is selected either by the
//! `action` query parameter or by a trailing path segment:
//! `GET /api/whatsapp?action=status` and `GET /api/whatsapp/status` are the
//! same request. Handlers only translate between HTTP and
//! [`ConnectionManager`](comanda_whatsapp::ConnectionManager) calls.

pub mod auth;
pub mod handlers;
pub mod server;

pub use auth::AuthConfig;
pub use handlers::Action;
pub use server::{build_router, start_server, GatewayState};
