// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Comanda integration tests.
//!
//! Provides a scripted messaging client and a harness that wires it to a
//! temp SQLite database, so lifecycle tests run without a real sidecar.
//!
//! # Components
//!
//! - [`MockMessagingClient`] - scripted sockets with event injection
//! - [`TestHarness`] - temp database, session store and connection manager

pub mod harness;
pub mod mock_client;

pub use harness::{fast_settings, wait_until, TestHarness, TestHarnessBuilder, TEST_SESSION_ID};
pub use mock_client::{ConnectBehavior, MockMessagingClient, MockSocket, MOCK_JID};
