use crate::crypto::KeyPair;
use crate::proto;
use crate::store::error::Result;
use crate::store::traits::{
    AppStateKeyStore, AppStateStore, ChatSettingsStore, ContactStore, DeviceDataStore,
};
use crate::types::jid::Jid;
use std::sync::{Arc, RwLock};

/// The device store as a capability record: the required sub-stores plus the
/// optional ones a host may or may not provide. The app-state engine checks
/// presence before invoking an optional capability.
pub struct Device {
    /// Our own JID once the device is paired.
    pub id: Option<Jid>,
    /// Static Noise identity.
    pub noise_key: KeyPair,
    /// Signal registration ID, carried in the pairing payload.
    pub registration_id: u32,
    pub push_name: RwLock<String>,

    pub app_state: Arc<dyn AppStateStore>,
    pub app_state_keys: Arc<dyn AppStateKeyStore>,
    pub chat_settings: Option<Arc<dyn ChatSettingsStore>>,
    pub contacts: Option<Arc<dyn ContactStore>>,

    data: Arc<dyn DeviceDataStore>,
}

impl Device {
    pub fn new(
        noise_key: KeyPair,
        data: Arc<dyn DeviceDataStore>,
        app_state: Arc<dyn AppStateStore>,
        app_state_keys: Arc<dyn AppStateKeyStore>,
    ) -> Self {
        Self {
            id: None,
            noise_key,
            registration_id: rand::random::<u32>() & 0x3FFF,
            push_name: RwLock::new(String::new()),
            app_state,
            app_state_keys,
            chat_settings: None,
            contacts: None,
            data,
        }
    }

    pub fn with_id(mut self, id: Jid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_chat_settings(mut self, store: Arc<dyn ChatSettingsStore>) -> Self {
        self.chat_settings = Some(store);
        self
    }

    pub fn with_contacts(mut self, store: Arc<dyn ContactStore>) -> Self {
        self.contacts = Some(store);
        self
    }

    pub fn push_name(&self) -> String {
        self.push_name.read().expect("push_name lock").clone()
    }

    pub fn set_push_name(&self, name: &str) {
        *self.push_name.write().expect("push_name lock") = name.to_string();
    }

    /// Persists the root fields through the host's data store.
    pub async fn save(&self) -> Result<()> {
        let push_name = self.push_name();
        self.data.save(&push_name).await
    }

    /// Builds the client payload for the handshake: a login payload when the
    /// device is paired, a registration payload otherwise.
    pub fn client_payload(&self) -> proto::ClientPayload {
        match &self.id {
            Some(id) => self.login_payload(id),
            None => self.register_payload(),
        }
    }

    fn base_payload(&self) -> proto::ClientPayload {
        proto::ClientPayload {
            user_agent: Some(proto::UserAgent {
                platform: Some(14), // web
                app_version: Some(proto::AppVersion {
                    primary: Some(2),
                    secondary: Some(3000),
                    tertiary: Some(1015901307),
                }),
                release_channel: Some(0),
                mcc: Some("000".to_string()),
                os_version: Some("0.1.0".to_string()),
                device: Some("Desktop".to_string()),
                lc: Some("en".to_string()),
                locale: Some("en".to_string()),
                manufacturer: None,
                os_build_number: Some("0.1.0".to_string()),
            }),
            web_info: Some(proto::WebInfo {
                ref_token: None,
                version: Some("2.3000.1015901307".to_string()),
            }),
            connect_type: Some(1),   // wifi
            connect_reason: Some(1), // user activated
            ..Default::default()
        }
    }

    fn login_payload(&self, id: &Jid) -> proto::ClientPayload {
        let mut payload = self.base_payload();
        payload.username = id.user.parse::<u64>().ok();
        payload.device = Some(id.device as u32);
        payload.passive = Some(false);
        payload
    }

    fn register_payload(&self) -> proto::ClientPayload {
        let mut payload = self.base_payload();
        payload.passive = Some(false);
        payload.device_pairing_data = Some(proto::DevicePairingData {
            e_regid: Some(self.registration_id.to_be_bytes().to_vec()),
            e_keytype: Some(vec![5]), // curve25519
            e_ident: Some(self.noise_key.public_bytes().to_vec()),
            ..Default::default()
        });
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn test_device() -> Device {
        let store = Arc::new(MemoryStore::new());
        Device::new(KeyPair::generate(), store.clone(), store.clone(), store)
    }

    #[test]
    fn unpaired_device_builds_registration_payload() {
        let payload = test_device().client_payload();
        assert!(payload.device_pairing_data.is_some());
        assert!(payload.username.is_none());
    }

    #[test]
    fn paired_device_builds_login_payload() {
        let device = test_device().with_id("1234567890:3@s.whatsapp.net".parse().unwrap());
        let payload = device.client_payload();
        assert_eq!(payload.username, Some(1234567890));
        assert_eq!(payload.device, Some(3));
        assert!(payload.device_pairing_data.is_none());
    }

    #[tokio::test]
    async fn save_persists_push_name() {
        let store = Arc::new(MemoryStore::new());
        let device = Device::new(KeyPair::generate(), store.clone(), store.clone(), store.clone());
        device.set_push_name("Alice");
        device.save().await.unwrap();
        assert_eq!(store.saved_push_name().await.as_deref(), Some("Alice"));
    }
}
