// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory credentials and key material handed to the messaging client.
//!
//! The [`SessionStore`] stays the source of truth: an `AuthState` is loaded
//! from it once per connection attempt and flushed back whenever the client
//! reports a credential change.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use comanda_core::ComandaError;
use comanda_storage::PersistedSession;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::session_store::SessionStore;

/// Serialized form of a session: `{creds, keys}`.
///
/// `keys` is nested `category -> id -> material`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default)]
    pub creds: Value,
    #[serde(default)]
    pub keys: BTreeMap<String, BTreeMap<String, Value>>,
}

/// Credential state for one connection attempt.
pub struct AuthState {
    session_id: String,
    store: SessionStore,
    creds: ArcSwapOption<Value>,
    keys: DashMap<(String, String), Value>,
    phone: ArcSwapOption<String>,
    /// Serializes flushes so the last one to run writes the newest snapshot.
    save_lock: Mutex<()>,
    cleared: AtomicBool,
    tasks: TaskTracker,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("session_id", &self.session_id)
            .field("has_creds", &self.has_creds())
            .field("keys", &self.keys.len())
            .finish_non_exhaustive()
    }
}

impl AuthState {
    /// Start with no credentials.
    pub fn empty(store: SessionStore, session_id: impl Into<String>, tasks: TaskTracker) -> Self {
        Self {
            session_id: session_id.into(),
            store,
            creds: ArcSwapOption::empty(),
            keys: DashMap::new(),
            phone: ArcSwapOption::empty(),
            save_lock: Mutex::new(()),
            cleared: AtomicBool::new(false),
            tasks,
        }
    }

    /// Load `session_id` from the store.
    ///
    /// A missing row or an undecryptable one yields an empty state, which
    /// forces re-pairing. Other failures (no key, storage down) propagate.
    pub async fn load(
        store: SessionStore,
        session_id: impl Into<String>,
        tasks: TaskTracker,
    ) -> Result<Arc<Self>, ComandaError> {
        let state = Self::empty(store, session_id, tasks);

        match state.store.load(&state.session_id).await {
            Ok(Some(loaded)) => {
                if !loaded.data.creds.is_null() {
                    state.creds.store(Some(Arc::new(loaded.data.creds)));
                }
                for (category, entries) in loaded.data.keys {
                    for (id, value) in entries {
                        state.keys.insert((category.clone(), id), value);
                    }
                }
                state.phone.store(loaded.phone_number.map(Arc::new));
                info!(
                    session_id = %state.session_id,
                    keys = state.keys.len(),
                    updated_at = %loaded.updated_at,
                    "resuming persisted session"
                );
            }
            Ok(None) => {
                info!(session_id = %state.session_id, "no persisted session, starting fresh");
            }
            Err(ComandaError::Decryption(reason)) => {
                warn!(
                    session_id = %state.session_id,
                    %reason,
                    "persisted session is unusable, starting fresh"
                );
            }
            Err(e) => return Err(e),
        }

        Ok(Arc::new(state))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current credential bundle.
    pub fn creds(&self) -> Option<Arc<Value>> {
        self.creds.load_full()
    }

    pub fn has_creds(&self) -> bool {
        self.creds.load().is_some()
    }

    /// Cached key material for `ids` in `category`. Missing ids are omitted.
    pub fn get_keys<S: AsRef<str>>(&self, category: &str, ids: &[S]) -> HashMap<String, Value> {
        ids.iter()
            .filter_map(|id| {
                let id = id.as_ref();
                self.keys
                    .get(&(category.to_string(), id.to_string()))
                    .map(|entry| (id.to_string(), entry.value().clone()))
            })
            .collect()
    }

    /// Apply a `category -> id -> value` batch. `null` deletes the entry.
    ///
    /// Nothing is persisted until the next [`AuthState::save_creds`].
    pub fn set_keys(&self, batch: BTreeMap<String, BTreeMap<String, Value>>) {
        for (category, entries) in batch {
            for (id, value) in entries {
                let key = (category.clone(), id);
                if value.is_null() {
                    self.keys.remove(&key);
                } else {
                    self.keys.insert(key, value);
                }
            }
        }
    }

    /// Shallow-merge `patch` into the credential object.
    pub fn update_creds(&self, patch: Map<String, Value>) {
        self.creds.rcu(|current| {
            let mut merged = match current.as_deref() {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            };
            for (field, value) in &patch {
                merged.insert(field.clone(), value.clone());
            }
            Some(Arc::new(Value::Object(merged)))
        });
    }

    pub fn phone(&self) -> Option<String> {
        self.phone.load_full().map(|p| p.as_ref().clone())
    }

    pub fn set_phone(&self, phone: Option<String>) {
        self.phone.store(phone.map(Arc::new));
    }

    /// Copy of the current `{creds, keys}`.
    pub fn snapshot(&self) -> SessionData {
        let mut keys: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
        for entry in self.keys.iter() {
            let (category, id) = entry.key();
            keys.entry(category.clone())
                .or_default()
                .insert(id.clone(), entry.value().clone());
        }
        SessionData {
            creds: self.creds().map(|c| c.as_ref().clone()).unwrap_or(Value::Null),
            keys,
        }
    }

    /// Write the current snapshot to the store and wait for it.
    ///
    /// Returns `None` once the session has been cleared, so a late flush
    /// cannot resurrect a logged-out session.
    pub async fn persist(&self) -> Result<Option<PersistedSession>, ComandaError> {
        let _guard = self.save_lock.lock().await;
        if self.cleared.load(Ordering::Acquire) {
            debug!(session_id = %self.session_id, "session cleared, skipping save");
            return Ok(None);
        }
        let data = self.snapshot();
        let phone = self.phone();
        let row = self
            .store
            .save(&self.session_id, &data, phone.as_deref())
            .await?;
        Ok(Some(row))
    }

    /// Flush in the background. Failures are logged and never reach the caller.
    pub fn save_creds(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.tasks.spawn(async move {
            if let Err(e) = this.persist().await {
                warn!(session_id = %this.session_id, error = %e, "failed to persist credentials");
            }
        });
    }

    /// Soft-delete the persisted session and stop further flushes.
    pub async fn clear_session(&self) -> Result<(), ComandaError> {
        let _guard = self.save_lock.lock().await;
        self.cleared.store(true, Ordering::Release);
        self.store.clear(&self.session_id).await
    }
}
