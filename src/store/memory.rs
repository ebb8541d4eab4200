//! In-memory store implementing every capability trait. Used by tests and
//! by hosts that don't need persistence across restarts.

use crate::appstate::hash::HashState;
use crate::store::error::Result;
use crate::store::traits::{
    AppStateKeyStore, AppStateStore, AppStateSyncKey, ChatSettingsStore, ContactStore,
    DeviceDataStore,
};
use crate::types::jid::Jid;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    app_state_versions: Mutex<HashMap<String, HashState>>,
    app_state_keys: Mutex<HashMap<Vec<u8>, AppStateSyncKey>>,
    muted_until: Mutex<HashMap<Jid, Option<DateTime<Utc>>>>,
    pinned: Mutex<HashMap<Jid, bool>>,
    archived: Mutex<HashMap<Jid, bool>>,
    contact_names: Mutex<HashMap<Jid, (String, String)>>,
    saved_push_name: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn muted_until(&self, chat: &Jid) -> Option<Option<DateTime<Utc>>> {
        self.muted_until.lock().await.get(chat).cloned()
    }

    pub async fn pinned(&self, chat: &Jid) -> Option<bool> {
        self.pinned.lock().await.get(chat).copied()
    }

    pub async fn archived(&self, chat: &Jid) -> Option<bool> {
        self.archived.lock().await.get(chat).copied()
    }

    pub async fn contact_name(&self, contact: &Jid) -> Option<(String, String)> {
        self.contact_names.lock().await.get(contact).cloned()
    }

    pub async fn saved_push_name(&self) -> Option<String> {
        self.saved_push_name.lock().await.clone()
    }
}

#[async_trait]
impl AppStateStore for MemoryStore {
    async fn get_app_state_version(&self, name: &str) -> Result<HashState> {
        Ok(self
            .app_state_versions
            .lock()
            .await
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_app_state_version(&self, name: &str, state: HashState) -> Result<()> {
        self.app_state_versions
            .lock()
            .await
            .insert(name.to_string(), state);
        Ok(())
    }

    async fn delete_app_state_version(&self, name: &str) -> Result<()> {
        self.app_state_versions.lock().await.remove(name);
        Ok(())
    }
}

#[async_trait]
impl AppStateKeyStore for MemoryStore {
    async fn get_app_state_sync_key(&self, key_id: &[u8]) -> Result<Option<AppStateSyncKey>> {
        Ok(self.app_state_keys.lock().await.get(key_id).cloned())
    }

    async fn set_app_state_sync_key(&self, key_id: &[u8], key: AppStateSyncKey) -> Result<()> {
        self.app_state_keys
            .lock()
            .await
            .insert(key_id.to_vec(), key);
        Ok(())
    }
}

#[async_trait]
impl ChatSettingsStore for MemoryStore {
    async fn put_muted_until(&self, chat: &Jid, muted_until: Option<DateTime<Utc>>) -> Result<()> {
        self.muted_until
            .lock()
            .await
            .insert(chat.clone(), muted_until);
        Ok(())
    }

    async fn put_pinned(&self, chat: &Jid, pinned: bool) -> Result<()> {
        self.pinned.lock().await.insert(chat.clone(), pinned);
        Ok(())
    }

    async fn put_archived(&self, chat: &Jid, archived: bool) -> Result<()> {
        self.archived.lock().await.insert(chat.clone(), archived);
        Ok(())
    }
}

#[async_trait]
impl ContactStore for MemoryStore {
    async fn put_contact_name(
        &self,
        contact: &Jid,
        first_name: &str,
        full_name: &str,
    ) -> Result<()> {
        self.contact_names.lock().await.insert(
            contact.clone(),
            (first_name.to_string(), full_name.to_string()),
        );
        Ok(())
    }
}

#[async_trait]
impl DeviceDataStore for MemoryStore {
    async fn save(&self, push_name: &str) -> Result<()> {
        *self.saved_push_name.lock().await = Some(push_name.to_string());
        Ok(())
    }
}
