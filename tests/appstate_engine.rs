//! End-to-end tests of the app-state patch engine: fixtures are built with
//! the same primitives the server uses (CBC-encrypted values, HMAC chain,
//! LTHash post-state) and fed through the processor.

use hmac::{Hmac, Mac};
use prost::Message;
use sha2::Sha256;
use std::sync::Arc;
use wamd::appstate::errors::AppStateError;
use wamd::appstate::hash::{generate_patch_mac, generate_snapshot_mac, HashState};
use wamd::appstate::keys::{expand_app_state_keys, ExpandedAppStateKeys};
use wamd::appstate::lthash::PATCH_INTEGRITY;
use wamd::appstate::{PatchList, Processor};
use wamd::crypto::{cbc, content_mac::generate_content_mac};
use wamd::proto;
use wamd::store::traits::{AppStateKeyStore, AppStateStore, AppStateSyncKey};
use wamd::store::MemoryStore;

const KEY_ID: &[u8] = b"kid-1";
const COLLECTION: &str = "regular";

struct Fixture {
    store: Arc<MemoryStore>,
    keys: ExpandedAppStateKeys,
    processor: Processor,
}

async fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let master_key = [7u8; 32];
    store
        .set_app_state_sync_key(
            KEY_ID,
            AppStateSyncKey {
                key_data: master_key.to_vec(),
                fingerprint: Vec::new(),
                timestamp: 0,
            },
        )
        .await
        .unwrap();
    Fixture {
        keys: expand_app_state_keys(&master_key),
        processor: Processor::new(store.clone(), store.clone()),
        store,
    }
}

/// Builds an encrypted mutation record the way the server would.
fn encrypt_mutation(
    keys: &ExpandedAppStateKeys,
    operation: proto::SyncdOperation,
    index: &[&str],
    action: proto::SyncActionValue,
) -> (proto::SyncdMutation, Vec<u8>) {
    let index_json = serde_json::to_vec(index).unwrap();

    let plaintext = proto::SyncActionData {
        index: Some(index_json.clone()),
        value: Some(action),
        padding: None,
        version: Some(3),
    }
    .encode_to_vec();

    let iv = [0x42u8; 16];
    let ciphertext = cbc::encrypt(&keys.value_encryption, &iv, &plaintext).unwrap();
    let mut content = iv.to_vec();
    content.extend_from_slice(&ciphertext);

    let value_mac = generate_content_mac(operation, &content, KEY_ID, &keys.value_mac);
    let mut blob = content;
    blob.extend_from_slice(&value_mac);

    let mut index_hmac = Hmac::<Sha256>::new_from_slice(&keys.index).unwrap();
    index_hmac.update(&index_json);
    let index_mac = index_hmac.finalize().into_bytes().to_vec();

    let mutation = proto::SyncdMutation {
        operation: Some(operation as i32),
        record: Some(proto::SyncdRecord {
            index: Some(proto::SyncdIndex {
                blob: Some(index_mac),
            }),
            value: Some(proto::SyncdValue { blob: Some(blob) }),
            key_id: Some(proto::KeyId {
                id: Some(KEY_ID.to_vec()),
            }),
        }),
    };
    (mutation, value_mac.to_vec())
}

/// Wraps mutations into a patch whose advertised post-hash and patch MAC
/// are consistent with `pre_hash`.
fn build_patch(
    keys: &ExpandedAppStateKeys,
    version: u64,
    pre_hash: &[u8; 128],
    mutations: Vec<proto::SyncdMutation>,
    add: &[Vec<u8>],
    subtract: &[Vec<u8>],
) -> (proto::SyncdPatch, [u8; 128]) {
    let mut post_hash = *pre_hash;
    PATCH_INTEGRITY.subtract_then_add_in_place(&mut post_hash, subtract, add);

    let mut patch = proto::SyncdPatch {
        version: Some(proto::SyncdVersion {
            version: Some(version),
        }),
        mutations,
        snapshot_mac: Some(generate_snapshot_mac(
            &post_hash,
            version,
            COLLECTION,
            &keys.snapshot_mac,
        )),
        key_id: Some(proto::KeyId {
            id: Some(KEY_ID.to_vec()),
        }),
        ..Default::default()
    };
    patch.patch_mac = Some(generate_patch_mac(&patch, COLLECTION, &keys.patch_mac, version));
    (patch, post_hash)
}

fn mute_action() -> proto::SyncActionValue {
    proto::SyncActionValue {
        timestamp: Some(1_700_000_000),
        mute_action: Some(proto::MuteAction {
            muted: Some(true),
            mute_end_timestamp: Some(1_700_000_000),
        }),
        ..Default::default()
    }
}

fn patch_list(patches: Vec<proto::SyncdPatch>) -> PatchList {
    PatchList {
        name: COLLECTION.to_string(),
        has_more_patches: false,
        patches,
        snapshot: None,
    }
}

#[tokio::test]
async fn valid_patch_decodes_and_persists() {
    let f = fixture().await;
    let index = ["mute", "1234@s.whatsapp.net"];
    let (mutation, value_mac) =
        encrypt_mutation(&f.keys, proto::SyncdOperation::Set, &index, mute_action());
    let (patch, post_hash) =
        build_patch(&f.keys, 1, &[0u8; 128], vec![mutation], &[value_mac], &[]);

    let (mutations, state) = f
        .processor
        .decode_patches(&patch_list(vec![patch]), HashState::default())
        .await
        .unwrap();

    assert_eq!(mutations.len(), 1);
    assert_eq!(mutations[0].index, index);
    assert_eq!(
        mutations[0]
            .action
            .mute_action
            .as_ref()
            .unwrap()
            .mute_end_timestamp,
        Some(1_700_000_000)
    );
    assert_eq!(state.version, 1);
    assert_eq!(state.hash, post_hash);

    let persisted = f.store.get_app_state_version(COLLECTION).await.unwrap();
    assert_eq!(persisted.version, 1);
    assert_eq!(persisted.hash, post_hash);
}

#[tokio::test]
async fn tampered_value_fails_and_leaves_state_untouched() {
    let f = fixture().await;
    let (mut mutation, value_mac) = encrypt_mutation(
        &f.keys,
        proto::SyncdOperation::Set,
        &["mute", "1234@s.whatsapp.net"],
        mute_action(),
    );
    // Corrupt one ciphertext byte; the content MAC no longer matches.
    if let Some(blob) = mutation
        .record
        .as_mut()
        .and_then(|r| r.value.as_mut())
        .and_then(|v| v.blob.as_mut())
    {
        blob[20] ^= 0x01;
    }
    let (patch, _) = build_patch(&f.keys, 1, &[0u8; 128], vec![mutation], &[value_mac], &[]);

    let result = f
        .processor
        .decode_patches(&patch_list(vec![patch]), HashState::default())
        .await;
    assert!(matches!(result, Err(AppStateError::MismatchingContentMac)));

    let persisted = f.store.get_app_state_version(COLLECTION).await.unwrap();
    assert_eq!(persisted.version, 0, "failed batch must not advance the store");
    assert_eq!(persisted.hash, [0u8; 128]);
}

#[tokio::test]
async fn wrong_advertised_hash_is_rejected() {
    let f = fixture().await;
    let (mutation, value_mac) = encrypt_mutation(
        &f.keys,
        proto::SyncdOperation::Set,
        &["mute", "1234@s.whatsapp.net"],
        mute_action(),
    );
    let (mut patch, _) =
        build_patch(&f.keys, 1, &[0u8; 128], vec![mutation], &[value_mac], &[]);
    patch.snapshot_mac = Some(generate_snapshot_mac(
        &[0xAA; 128],
        1,
        COLLECTION,
        &f.keys.snapshot_mac,
    ));

    let result = f
        .processor
        .decode_patches(&patch_list(vec![patch]), HashState::default())
        .await;
    assert!(matches!(result, Err(AppStateError::MismatchingLtHash)));

    let persisted = f.store.get_app_state_version(COLLECTION).await.unwrap();
    assert_eq!(persisted.version, 0);
}

#[tokio::test]
async fn tampered_patch_mac_is_rejected() {
    let f = fixture().await;
    let (mutation, value_mac) = encrypt_mutation(
        &f.keys,
        proto::SyncdOperation::Set,
        &["pin_v1", "1234@s.whatsapp.net"],
        mute_action(),
    );
    let (mut patch, _) =
        build_patch(&f.keys, 1, &[0u8; 128], vec![mutation], &[value_mac], &[]);
    patch.patch_mac = Some(vec![0u8; 32]);

    let result = f
        .processor
        .decode_patches(&patch_list(vec![patch]), HashState::default())
        .await;
    assert!(matches!(result, Err(AppStateError::MismatchingPatchMac)));
}

#[tokio::test]
async fn missing_sync_key_reports_key_id() {
    let store = Arc::new(MemoryStore::new());
    let processor = Processor::new(store.clone(), store.clone());

    let master_key = [7u8; 32];
    let keys = expand_app_state_keys(&master_key);
    let (mutation, value_mac) = encrypt_mutation(
        &keys,
        proto::SyncdOperation::Set,
        &["mute", "1234@s.whatsapp.net"],
        mute_action(),
    );
    let (patch, _) = build_patch(&keys, 1, &[0u8; 128], vec![mutation], &[value_mac], &[]);

    let result = processor
        .decode_patches(&patch_list(vec![patch]), HashState::default())
        .await;
    match result {
        Err(AppStateError::KeysNotFound(ids)) => assert_eq!(ids, vec![KEY_ID.to_vec()]),
        other => panic!("expected KeysNotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn remove_reverses_the_hash_via_the_index_map() {
    let f = fixture().await;
    let index = ["pin_v1", "1234@s.whatsapp.net"];

    // Patch 1 SETs the record.
    let (set_mutation, set_value_mac) =
        encrypt_mutation(&f.keys, proto::SyncdOperation::Set, &index, mute_action());
    let (set_patch, hash_after_set) = build_patch(
        &f.keys,
        1,
        &[0u8; 128],
        vec![set_mutation],
        &[set_value_mac.clone()],
        &[],
    );
    let (_, state) = f
        .processor
        .decode_patches(&patch_list(vec![set_patch]), HashState::default())
        .await
        .unwrap();
    assert_eq!(state.hash, hash_after_set);
    assert_eq!(state.index_value_map.len(), 1);

    // Patch 2 REMOVEs it; the displaced value MAC comes from the persisted
    // index map, and the hash returns to zero. The REMOVE's own value MAC
    // never enters the hash.
    let (remove_mutation, _) =
        encrypt_mutation(&f.keys, proto::SyncdOperation::Remove, &index, mute_action());
    let (remove_patch, hash_after_remove) = build_patch(
        &f.keys,
        2,
        &hash_after_set,
        vec![remove_mutation],
        &[],
        &[set_value_mac],
    );
    let (mutations, state) = f
        .processor
        .decode_patches(&patch_list(vec![remove_patch]), state)
        .await
        .unwrap();

    assert_eq!(mutations.len(), 1);
    assert_eq!(mutations[0].operation, proto::SyncdOperation::Remove);
    assert_eq!(state.version, 2);
    assert_eq!(state.hash, hash_after_remove);
    assert!(state.index_value_map.is_empty());

    let persisted = f.store.get_app_state_version(COLLECTION).await.unwrap();
    assert_eq!(persisted.version, 2);
}

#[tokio::test]
async fn second_patch_failure_keeps_first_patch_persisted() {
    let f = fixture().await;

    let (ok_mutation, ok_value_mac) = encrypt_mutation(
        &f.keys,
        proto::SyncdOperation::Set,
        &["mute", "1111@s.whatsapp.net"],
        mute_action(),
    );
    let (ok_patch, hash_after_first) = build_patch(
        &f.keys,
        1,
        &[0u8; 128],
        vec![ok_mutation],
        &[ok_value_mac],
        &[],
    );

    let (mut bad_mutation, bad_value_mac) = encrypt_mutation(
        &f.keys,
        proto::SyncdOperation::Set,
        &["mute", "2222@s.whatsapp.net"],
        mute_action(),
    );
    if let Some(blob) = bad_mutation
        .record
        .as_mut()
        .and_then(|r| r.value.as_mut())
        .and_then(|v| v.blob.as_mut())
    {
        blob[20] ^= 0x01;
    }
    let (bad_patch, _) = build_patch(
        &f.keys,
        2,
        &hash_after_first,
        vec![bad_mutation],
        &[bad_value_mac],
        &[],
    );

    let result = f
        .processor
        .decode_patches(&patch_list(vec![ok_patch, bad_patch]), HashState::default())
        .await;
    assert!(result.is_err());

    // The engine commits per verified patch: patch 1 is durable, patch 2
    // left no trace.
    let persisted = f.store.get_app_state_version(COLLECTION).await.unwrap();
    assert_eq!(persisted.version, 1);
    assert_eq!(persisted.hash, hash_after_first);
}
