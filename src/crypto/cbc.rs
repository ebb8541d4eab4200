//! AES-256-CBC for app-state mutation values.

use aes::Aes256;
use cbc::{Decryptor, Encryptor};
use cipher::block_padding::Pkcs7;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use thiserror::Error;

type Aes256CbcEnc = Encryptor<Aes256>;
type Aes256CbcDec = Decryptor<Aes256>;

#[derive(Debug, Error)]
pub enum CbcError {
    #[error("invalid key or IV length")]
    InvalidLength,
    #[error("ciphertext is not block-aligned")]
    Misaligned,
    #[error("invalid padding")]
    InvalidPadding,
}

pub fn decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CbcError> {
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(CbcError::Misaligned);
    }
    let dec = Aes256CbcDec::new_from_slices(key, iv).map_err(|_| CbcError::InvalidLength)?;
    dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CbcError::InvalidPadding)
}

pub fn encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CbcError> {
    let enc = Aes256CbcEnc::new_from_slices(key, iv).map_err(|_| CbcError::InvalidLength)?;
    Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let key = [3u8; 32];
        let iv = [9u8; 16];
        let plaintext = b"app state mutation payload";
        let ciphertext = encrypt(&key, &iv, plaintext).unwrap();
        assert_eq!(decrypt(&key, &iv, &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn misaligned_ciphertext_is_rejected() {
        assert!(matches!(
            decrypt(&[3u8; 32], &[9u8; 16], &[1, 2, 3]),
            Err(CbcError::Misaligned)
        ));
    }
}
