// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for connection lifecycle tests.
//!
//! `TestHarness` wires a [`MockMessagingClient`] to a temp SQLite database,
//! an encrypted session store and a `ConnectionManager` tuned with
//! millisecond timings, so reconnect and health-check paths finish quickly.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use comanda_core::ComandaError;
use comanda_storage::Database;
use comanda_vault::SessionKey;
use comanda_whatsapp::{
    ConnectionManager, ConnectionSettings, ConnectionState, MessagingClient, RetryPolicy,
    SessionData, SessionStore,
};
use serde_json::json;

use crate::mock_client::{ConnectBehavior, MockMessagingClient, MOCK_JID};

/// How often `wait_until` re-checks its condition.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Upper bound for `wait_until` before it gives up.
const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Session id used by harness-built managers.
pub const TEST_SESSION_ID: &str = "test-session";

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    settings: ConnectionSettings,
    with_key: bool,
    default_behavior: ConnectBehavior,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            settings: fast_settings(),
            with_key: true,
            default_behavior: ConnectBehavior::Auto,
        }
    }

    /// Replace all connection settings.
    pub fn with_settings(mut self, settings: ConnectionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace only the reconnect policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.settings.retry = retry;
        self
    }

    /// Set the health-check period and the connection age that triggers probing.
    pub fn with_health_check(mut self, interval: Duration, stale_after: Duration) -> Self {
        self.settings.health_check_interval = interval;
        self.settings.stale_after = stale_after;
        self
    }

    /// Build the session store without an encryption key.
    pub fn without_key(mut self) -> Self {
        self.with_key = false;
        self
    }

    /// What unscripted connects on the mock client do.
    pub fn with_default_behavior(mut self, behavior: ConnectBehavior) -> Self {
        self.default_behavior = behavior;
        self
    }

    /// Build the harness on a fresh temp database.
    pub async fn build(self) -> Result<TestHarness, ComandaError> {
        let temp_dir = tempfile::TempDir::new().map_err(|e| ComandaError::Storage {
            source: Box::new(e),
        })?;
        let db_path = temp_dir.path().join("test.db");
        let db = Database::open(&db_path.to_string_lossy()).await?;

        let key = if self.with_key {
            Some(SessionKey::generate()?)
        } else {
            None
        };
        let store = SessionStore::new(db, key);

        let client = Arc::new(MockMessagingClient::with_default(self.default_behavior));
        let manager = ConnectionManager::new(
            self.settings.clone(),
            store.clone(),
            Arc::clone(&client) as Arc<dyn MessagingClient>,
        );

        Ok(TestHarness {
            client,
            store,
            manager,
            settings: self.settings,
            _temp_dir: temp_dir,
        })
    }
}

/// A connection manager backed by a mock client and temp storage.
pub struct TestHarness {
    /// The scripted messaging client.
    pub client: Arc<MockMessagingClient>,
    /// Session store on the temp database.
    pub store: SessionStore,
    /// The manager under test.
    pub manager: ConnectionManager,
    /// Settings the manager was built with.
    pub settings: ConnectionSettings,
    /// Temp directory kept alive for cleanup on drop.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Persist a paired session so the next connect resumes it.
    pub async fn seed_session(&self) -> Result<(), ComandaError> {
        let data = SessionData {
            creds: json!({
                "me": { "id": MOCK_JID },
                "registered": true,
            }),
            ..SessionData::default()
        };
        self.store
            .save(&self.settings.session_id, &data, Some("5511987654321"))
            .await?;
        Ok(())
    }

    /// Wait until the manager reports `state`. Panics after the wait limit.
    pub async fn wait_for_state(&self, state: ConnectionState) {
        let manager = self.manager.clone();
        wait_until(&format!("state {state}"), move || {
            let manager = manager.clone();
            async move { manager.status().await.connection_state == state }
        })
        .await;
    }
}

/// Poll `condition` until it holds. Panics after the wait limit.
pub async fn wait_until<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    loop {
        if condition().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Millisecond timings: five attempts at 10, 20, 40, 80, 80 ms, a 20 ms
/// health tick that never probes, and a 2 s connect bound.
pub fn fast_settings() -> ConnectionSettings {
    ConnectionSettings {
        session_id: TEST_SESSION_ID.to_string(),
        retry: RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(10),
            multiplier: 2.0,
            max_delay: Duration::from_millis(80),
        },
        health_check_interval: Duration::from_millis(20),
        stale_after: Duration::from_secs(3600),
        connect_timeout: Duration::from_secs(2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn harness_builds_with_an_empty_store() {
        let harness = TestHarness::builder().build().await.unwrap();
        assert!(harness.store.load(TEST_SESSION_ID).await.unwrap().is_none());
        assert_eq!(
            harness.manager.status().await.connection_state,
            ConnectionState::Disconnected
        );
    }

    #[tokio::test]
    async fn seeded_session_is_loadable() {
        let harness = TestHarness::builder().build().await.unwrap();
        harness.seed_session().await.unwrap();
        let loaded = harness.store.load(TEST_SESSION_ID).await.unwrap().unwrap();
        assert_eq!(loaded.phone_number.as_deref(), Some("5511987654321"));
        assert_eq!(loaded.data.creds["me"]["id"], MOCK_JID);
    }

    #[tokio::test]
    async fn without_key_rejects_saves() {
        let harness = TestHarness::builder().without_key().build().await.unwrap();
        assert!(matches!(
            harness.seed_session().await,
            Err(ComandaError::Encryption(_))
        ));
    }
}
