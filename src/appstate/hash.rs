use crate::proto;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use sha2::Sha256;
use std::collections::HashMap;

/// Per-collection sync state: the server-assigned version, the 128-byte
/// LTHash accumulator and the index-MAC → value-MAC map needed to reverse
/// REMOVE operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashState {
    pub version: u64,
    #[serde(with = "BigArray")]
    pub hash: [u8; 128],
    pub index_value_map: HashMap<String, Vec<u8>>,
}

impl Default for HashState {
    fn default() -> Self {
        Self {
            version: 0,
            hash: [0; 128],
            index_value_map: HashMap::new(),
        }
    }
}

/// MAC over the LTHash accumulator, binding it to a collection name and
/// version. Patches advertise this as their post-state.
pub fn generate_snapshot_mac(lthash: &[u8; 128], version: u64, name: &str, key: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(lthash);
    mac.update(&version.to_be_bytes());
    mac.update(name.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// MAC chaining a patch to its snapshot MAC, its mutations' value MACs, its
/// version and the collection name.
pub fn generate_patch_mac(
    patch: &proto::SyncdPatch,
    name: &str,
    key: &[u8],
    version: u64,
) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
    if let Some(snapshot_mac) = &patch.snapshot_mac {
        mac.update(snapshot_mac);
    }
    for mutation in &patch.mutations {
        if let Some(blob) = mutation
            .record
            .as_ref()
            .and_then(|r| r.value.as_ref())
            .and_then(|v| v.blob.as_deref())
        {
            if blob.len() >= 32 {
                mac.update(&blob[blob.len() - 32..]);
            }
        }
    }
    mac.update(&version.to_be_bytes());
    mac.update(name.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_mac_binds_name_and_version() {
        let hash = [3u8; 128];
        let key = [5u8; 32];
        let base = generate_snapshot_mac(&hash, 7, "regular", &key);
        assert_ne!(base, generate_snapshot_mac(&hash, 8, "regular", &key));
        assert_ne!(base, generate_snapshot_mac(&hash, 7, "regular_high", &key));
        assert_eq!(base, generate_snapshot_mac(&hash, 7, "regular", &key));
    }
}
