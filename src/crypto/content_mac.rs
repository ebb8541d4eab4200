//! MAC over an app-state mutation's encrypted value.
//!
//! HMAC-SHA512 truncated to 32 bytes, computed over the operation byte
//! (enum value + 1), the key ID, the ciphertext and the big-endian length
//! of (key ID + operation byte).

use crate::proto::SyncdOperation;
use hmac::{Hmac, Mac};
use sha2::Sha512;

pub fn generate_content_mac(
    operation: SyncdOperation,
    data: &[u8],
    key_id: &[u8],
    key: &[u8],
) -> [u8; 32] {
    let mut mac = Hmac::<Sha512>::new_from_slice(key).expect("HMAC accepts any key length");

    let operation_byte = (operation as i32 + 1) as u8;
    mac.update(&[operation_byte]);
    mac.update(key_id);
    mac.update(data);
    mac.update(&((key_id.len() + 1) as u64).to_be_bytes());

    let full = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&full[..32]);
    out
}
