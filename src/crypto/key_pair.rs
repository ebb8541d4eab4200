use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

/// X25519 key pair used for the Noise handshake (both the device's static
/// identity and per-session ephemerals).
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    pub public: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_secret_bytes(bytes)
    }

    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_bytes(&self) -> &[u8; 32] {
        self.public.as_bytes()
    }

    /// Diffie-Hellman agreement with a peer's public key.
    pub fn dh(&self, their_public: &[u8; 32]) -> [u8; 32] {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*their_public));
        *shared.as_bytes()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(self.public.as_bytes()))
            .finish_non_exhaustive()
    }
}
