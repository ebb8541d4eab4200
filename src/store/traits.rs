use crate::appstate::hash::HashState;
use crate::proto::ExternalBlobReference;
use crate::store::error::Result;
use crate::types::jid::Jid;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Master sync key for one app-state key ID, delivered out-of-band through
/// the E2EE message channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppStateSyncKey {
    pub key_data: Vec<u8>,
    pub fingerprint: Vec<u8>,
    pub timestamp: i64,
}

/// Persisted `(version, hash)` per app-state collection. Updates must be
/// atomic per name.
#[async_trait]
pub trait AppStateStore: Send + Sync {
    async fn get_app_state_version(&self, name: &str) -> Result<HashState>;
    async fn set_app_state_version(&self, name: &str, state: HashState) -> Result<()>;
    async fn delete_app_state_version(&self, name: &str) -> Result<()>;
}

#[async_trait]
pub trait AppStateKeyStore: Send + Sync {
    async fn get_app_state_sync_key(&self, key_id: &[u8]) -> Result<Option<AppStateSyncKey>>;
    async fn set_app_state_sync_key(&self, key_id: &[u8], key: AppStateSyncKey) -> Result<()>;
}

/// Per-chat settings written from app-state mutations. Optional: hosts that
/// don't track chat settings simply don't wire this in.
#[async_trait]
pub trait ChatSettingsStore: Send + Sync {
    async fn put_muted_until(&self, chat: &Jid, muted_until: Option<DateTime<Utc>>) -> Result<()>;
    async fn put_pinned(&self, chat: &Jid, pinned: bool) -> Result<()>;
    async fn put_archived(&self, chat: &Jid, archived: bool) -> Result<()>;
}

/// Contact names written from app-state mutations. Optional like
/// [`ChatSettingsStore`].
#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn put_contact_name(&self, contact: &Jid, first_name: &str, full_name: &str)
        -> Result<()>;
}

/// Persists the device's root fields (currently the push name).
#[async_trait]
pub trait DeviceDataStore: Send + Sync {
    async fn save(&self, push_name: &str) -> Result<()>;
}

/// Seam for the media helper: fetches and decrypts an externally stored
/// app-state blob. The download/decrypt pipeline itself is outside the core.
#[async_trait]
pub trait AppStateBlobDownloader: Send + Sync {
    async fn download(&self, blob_ref: &ExternalBlobReference) -> anyhow::Result<Vec<u8>>;
}
