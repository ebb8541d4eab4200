use hkdf::Hkdf;
use sha2::Sha256;

/// The 160 bytes of sub-keys derived from one 32-byte master sync key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedAppStateKeys {
    pub index: [u8; 32],
    pub value_encryption: [u8; 32],
    pub value_mac: [u8; 32],
    pub snapshot_mac: [u8; 32],
    pub patch_mac: [u8; 32],
}

pub fn expand_app_state_keys(key_data: &[u8]) -> ExpandedAppStateKeys {
    const INFO: &[u8] = b"WhatsApp Mutation Keys";
    let hk = Hkdf::<Sha256>::new(None, key_data);
    let mut okm = [0u8; 160];
    hk.expand(INFO, &mut okm).expect("HKDF output fits");

    let take = |start: usize| -> [u8; 32] {
        okm[start..start + 32].try_into().expect("slice length")
    };
    ExpandedAppStateKeys {
        index: take(0),
        value_encryption: take(32),
        value_mac: take(64),
        snapshot_mac: take(96),
        patch_mac: take(128),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Known-answer test: expansion of an all-0x07 master key, verified
    /// against the reference implementation.
    #[test]
    fn expansion_known_answer() {
        let keys = expand_app_state_keys(&[7u8; 32]);
        assert_eq!(
            hex::encode(keys.index),
            "a3c20564c4744dc336223b76a374ac369fb1bc2062969b26bd0104cba5149e7a"
        );
        assert_eq!(
            hex::encode(keys.value_encryption),
            "28f9ac3865f5c0d77441c361c8eb0c40435487e1fca973df3828cbe320faa07f"
        );
        assert_eq!(
            hex::encode(keys.value_mac),
            "e2b9c9aaebb04ac52b5c04c449a8af48945e63af3e4b8e2b3f8266753675bc3e"
        );
        assert_eq!(
            hex::encode(keys.snapshot_mac),
            "c49519c1aa1718c8f1c1f14c546fb2dedfcc58cace2b5fba9de15f9c084bd04b"
        );
        assert_eq!(
            hex::encode(keys.patch_mac),
            "3b9efe15c717b5da8b85c45200bb6ce8af59c72d62f4c203909c53749b54cd04"
        );
    }
}
