use crate::appstate::errors::{AppStateError, Result};
use crate::appstate::hash::{generate_patch_mac, generate_snapshot_mac, HashState};
use crate::appstate::keys::{expand_app_state_keys, ExpandedAppStateKeys};
use crate::appstate::lthash::PATCH_INTEGRITY;
use crate::crypto::{cbc, content_mac::generate_content_mac};
use crate::proto;
use crate::store::traits::{AppStateKeyStore, AppStateStore};
use base64::prelude::BASE64_STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use log::{debug, warn};
use prost::Message;
use sha2::Sha256;
use std::sync::Arc;

/// One decoded and verified app-state mutation.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub operation: proto::SyncdOperation,
    pub action: proto::SyncActionValue,
    pub index: Vec<String>,
    pub index_mac: Vec<u8>,
    pub value_mac: Vec<u8>,
}

/// A parsed sync response for one collection. External patch blobs have
/// already been downloaded and inlined by the time this exists.
pub struct PatchList {
    pub name: String,
    pub has_more_patches: bool,
    pub patches: Vec<proto::SyncdPatch>,
    pub snapshot: Option<proto::SyncdSnapshot>,
}

/// Verifies and applies patch lists.
///
/// The persisted `(version, hash)` advances once per verified patch: a
/// failure inside patch N leaves the store at the post-state of patch N-1,
/// never anywhere in between.
pub struct Processor {
    key_store: Arc<dyn AppStateKeyStore>,
    app_state_store: Arc<dyn AppStateStore>,
}

impl Processor {
    pub fn new(
        key_store: Arc<dyn AppStateKeyStore>,
        app_state_store: Arc<dyn AppStateStore>,
    ) -> Self {
        Self {
            key_store,
            app_state_store,
        }
    }

    async fn get_expanded_keys(&self, key_id: &[u8]) -> Result<ExpandedAppStateKeys> {
        match self.key_store.get_app_state_sync_key(key_id).await {
            Ok(Some(key)) => Ok(expand_app_state_keys(&key.key_data)),
            Ok(None) => Err(AppStateError::KeysNotFound(vec![key_id.to_vec()])),
            Err(e) => Err(AppStateError::GetKeyFailed(key_id.to_vec(), e)),
        }
    }

    /// Decodes every patch (and optional snapshot) in `list`, verifying the
    /// MAC chain and the LTHash post-state, and persists `(version, hash)`
    /// after each verified patch.
    pub async fn decode_patches(
        &self,
        list: &PatchList,
        mut state: HashState,
    ) -> Result<(Vec<Mutation>, HashState)> {
        let mut mutations = Vec::new();

        if let Some(snapshot) = &list.snapshot {
            state = self.decode_snapshot(list, snapshot, &mut mutations).await?;
            self.app_state_store
                .set_app_state_version(&list.name, state.clone())
                .await?;
        }

        for (i, patch) in list.patches.iter().enumerate() {
            let version = patch.version.as_ref().and_then(|v| v.version).unwrap_or(0);
            if version <= state.version {
                debug!(target: "Client/AppState",
                    "Skipping already-applied patch version {version} for '{}'", list.name);
                continue;
            }

            let key_id = patch_key_id(patch);
            let keys = match self.get_expanded_keys(key_id).await {
                Ok(keys) => keys,
                Err(AppStateError::KeysNotFound(_)) => {
                    // Report every unknown key in the remaining patches so
                    // the host can request them in one round.
                    return Err(AppStateError::KeysNotFound(
                        self.collect_missing_keys(&list.patches[i..]).await,
                    ));
                }
                Err(e) => return Err(e),
            };

            let mut patch_mutations = Vec::with_capacity(patch.mutations.len());
            for mutation in &patch.mutations {
                decode_mutation(&keys, mutation, &mut patch_mutations)?;
            }

            // LTHash update: SETs add their value MAC; REMOVEs subtract the
            // value MAC of the record they displace (earlier in this patch,
            // or from the persisted index map).
            let mut subtract: Vec<Vec<u8>> = Vec::new();
            let mut add: Vec<Vec<u8>> = Vec::new();
            for (j, mutation) in patch_mutations.iter().enumerate() {
                match mutation.operation {
                    proto::SyncdOperation::Set => add.push(mutation.value_mac.clone()),
                    proto::SyncdOperation::Remove => {
                        let prior = patch_mutations[..j]
                            .iter()
                            .rev()
                            .find(|m| {
                                m.operation == proto::SyncdOperation::Set
                                    && m.index_mac == mutation.index_mac
                            })
                            .map(|m| m.value_mac.clone())
                            .or_else(|| {
                                state
                                    .index_value_map
                                    .get(&BASE64_STANDARD.encode(&mutation.index_mac))
                                    .cloned()
                            });
                        match prior {
                            Some(value_mac) => subtract.push(value_mac),
                            None => warn!(target: "Client/AppState",
                                "No previous value for REMOVE in '{}'; hash may drift", list.name),
                        }
                    }
                }
            }
            PATCH_INTEGRITY.subtract_then_add_in_place(&mut state.hash, &subtract, &add);
            state.version = version;

            // The patch advertises its post-state twice over: the snapshot
            // MAC binds the LTHash, the patch MAC binds the mutation chain.
            if let Some(server_mac) = &patch.snapshot_mac {
                let expected =
                    generate_snapshot_mac(&state.hash, version, &list.name, &keys.snapshot_mac);
                if *server_mac != expected {
                    return Err(AppStateError::MismatchingLtHash);
                }
            }
            if let Some(server_mac) = &patch.patch_mac {
                let expected = generate_patch_mac(patch, &list.name, &keys.patch_mac, version);
                if *server_mac != expected {
                    return Err(AppStateError::MismatchingPatchMac);
                }
            }

            for mutation in &patch_mutations {
                let index_key = BASE64_STANDARD.encode(&mutation.index_mac);
                match mutation.operation {
                    proto::SyncdOperation::Set => {
                        state
                            .index_value_map
                            .insert(index_key, mutation.value_mac.clone());
                    }
                    proto::SyncdOperation::Remove => {
                        state.index_value_map.remove(&index_key);
                    }
                }
            }

            self.app_state_store
                .set_app_state_version(&list.name, state.clone())
                .await?;
            mutations.extend(patch_mutations);
        }

        Ok((mutations, state))
    }

    async fn decode_snapshot(
        &self,
        list: &PatchList,
        snapshot: &proto::SyncdSnapshot,
        out: &mut Vec<Mutation>,
    ) -> Result<HashState> {
        let version = snapshot
            .version
            .as_ref()
            .and_then(|v| v.version)
            .unwrap_or(0);
        let key_id = snapshot
            .key_id
            .as_ref()
            .and_then(|k| k.id.as_deref())
            .unwrap_or_default();
        let keys = self.get_expanded_keys(key_id).await?;

        let mut state = HashState {
            version,
            ..Default::default()
        };

        let mut decoded = Vec::with_capacity(snapshot.records.len());
        for record in &snapshot.records {
            let as_set = proto::SyncdMutation {
                operation: Some(proto::SyncdOperation::Set as i32),
                record: Some(record.clone()),
            };
            decode_mutation(&keys, &as_set, &mut decoded)?;
        }

        let add: Vec<&[u8]> = decoded.iter().map(|m| m.value_mac.as_slice()).collect();
        PATCH_INTEGRITY.subtract_then_add_in_place(&mut state.hash, &[] as &[&[u8]], &add);

        if let Some(server_mac) = &snapshot.mac {
            let expected =
                generate_snapshot_mac(&state.hash, version, &list.name, &keys.snapshot_mac);
            if *server_mac != expected {
                return Err(AppStateError::MismatchingLtHash);
            }
        }

        for mutation in &decoded {
            state.index_value_map.insert(
                BASE64_STANDARD.encode(&mutation.index_mac),
                mutation.value_mac.clone(),
            );
        }
        out.extend(decoded);
        Ok(state)
    }

    async fn collect_missing_keys(&self, patches: &[proto::SyncdPatch]) -> Vec<Vec<u8>> {
        let mut missing: Vec<Vec<u8>> = Vec::new();
        for patch in patches {
            let key_id = patch_key_id(patch);
            if missing.iter().any(|k| k == key_id) {
                continue;
            }
            if matches!(
                self.key_store.get_app_state_sync_key(key_id).await,
                Ok(None)
            ) {
                missing.push(key_id.to_vec());
            }
        }
        missing
    }
}

fn patch_key_id(patch: &proto::SyncdPatch) -> &[u8] {
    patch
        .key_id
        .as_ref()
        .and_then(|k| k.id.as_deref())
        .unwrap_or_default()
}

/// Decrypts and verifies a single mutation record, appending the decoded
/// form to `out`.
pub fn decode_mutation(
    keys: &ExpandedAppStateKeys,
    mutation: &proto::SyncdMutation,
    out: &mut Vec<Mutation>,
) -> Result<()> {
    let record = mutation
        .record
        .as_ref()
        .ok_or(AppStateError::MissingRecordField("record"))?;
    let key_id = record
        .key_id
        .as_ref()
        .and_then(|k| k.id.as_deref())
        .ok_or(AppStateError::MissingRecordField("key id"))?;
    let value_blob = record
        .value
        .as_ref()
        .and_then(|v| v.blob.as_deref())
        .ok_or(AppStateError::MissingRecordField("value blob"))?;
    if value_blob.len() < 48 {
        return Err(AppStateError::ValueBlobTooShort(value_blob.len()));
    }

    let (content, value_mac) = value_blob.split_at(value_blob.len() - 32);
    let expected_mac =
        generate_content_mac(mutation.operation(), content, key_id, &keys.value_mac);
    if expected_mac != value_mac {
        return Err(AppStateError::MismatchingContentMac);
    }

    let (iv, ciphertext) = content.split_at(16);
    let plaintext = cbc::decrypt(&keys.value_encryption, iv, ciphertext)?;
    let action_data = proto::SyncActionData::decode(plaintext.as_slice())?;

    let index_json = action_data
        .index
        .as_deref()
        .ok_or(AppStateError::MissingRecordField("index"))?;
    let index_mac = record
        .index
        .as_ref()
        .and_then(|i| i.blob.as_deref())
        .ok_or(AppStateError::MissingRecordField("index MAC"))?;

    let mut mac = Hmac::<Sha256>::new_from_slice(&keys.index).expect("HMAC accepts any key length");
    mac.update(index_json);
    if mac.finalize().into_bytes().as_slice() != index_mac {
        return Err(AppStateError::MismatchingIndexMac);
    }

    let index: Vec<String> = serde_json::from_slice(index_json)?;
    out.push(Mutation {
        operation: mutation.operation(),
        action: action_data.value.unwrap_or_default(),
        index,
        index_mac: index_mac.to_vec(),
        value_mac: value_mac.to_vec(),
    });
    Ok(())
}
