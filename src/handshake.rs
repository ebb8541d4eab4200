//! Noise_XX_25519_AESGCM_SHA256 handshake over the frame socket.
//!
//! Three framed messages: ClientHello (our ephemeral), ServerHello (server
//! ephemeral + encrypted static + encrypted certificate chain), ClientFinish
//! (our encrypted static + encrypted client payload). On success the state
//! splits into the send/recv ciphers used for every subsequent frame.

use crate::crypto::KeyPair;
use crate::proto;
use crate::socket::consts::{CONN_HEADER, NOISE_START_PATTERN};
use crate::socket::{generate_iv, FrameSocket, NoiseCipher, NoiseSocket};
use crate::store::Device;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit};
use hkdf::Hkdf;
use log::{debug, info};
use prost::Message;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::time::{timeout, Duration};

const HANDSHAKE_RESPONSE_TIMEOUT: Duration = Duration::from_secs(20);

/// Issuer serial the intermediate certificate must carry.
const CERT_ISSUER_SERIAL: u32 = 0;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("protobuf decode error: {0}")]
    ProtoDecode(#[from] prost::DecodeError),
    #[error("handshake response is missing required parts")]
    IncompleteResponse,
    #[error("crypto operation failed: {0}")]
    Crypto(String),
    #[error("server certificate verification failed: {0}")]
    CertVerification(String),
    #[error("unexpected length for {name}: expected {expected}, got {got}")]
    InvalidLength {
        name: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("transport error: {0}")]
    Transport(#[from] crate::socket::SocketError),
    #[error("timed out waiting for handshake response")]
    Timeout,
    #[error("socket closed during handshake")]
    SocketClosed,
}

pub type Result<T> = std::result::Result<T, HandshakeError>;

fn to_key(slice: &[u8], name: &'static str) -> Result<[u8; 32]> {
    slice.try_into().map_err(|_| HandshakeError::InvalidLength {
        name,
        expected: 32,
        got: slice.len(),
    })
}

/// The symmetric half of the Noise state: hash transcript, chaining key and
/// the current handshake cipher.
pub struct NoiseHandshake {
    hash: [u8; 32],
    salt: [u8; 32],
    cipher: Aes256Gcm,
    counter: u64,
}

impl NoiseHandshake {
    pub fn new(pattern: &str, prologue: &[u8]) -> Self {
        let h: [u8; 32] = if pattern.len() == 32 {
            pattern.as_bytes().try_into().expect("checked length")
        } else {
            Sha256::digest(pattern.as_bytes()).into()
        };
        let mut state = Self {
            hash: h,
            salt: h,
            cipher: Aes256Gcm::new_from_slice(&h).expect("32-byte key"),
            counter: 0,
        };
        state.authenticate(prologue);
        state
    }

    /// MixHash: folds data into the transcript hash.
    pub fn authenticate(&mut self, data: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.hash);
        hasher.update(data);
        self.hash = hasher.finalize().into();
    }

    /// MixKey: ratchets the chaining key with fresh DH output and resets the
    /// handshake cipher.
    pub fn mix_key(&mut self, input_key_material: &[u8]) -> Result<()> {
        self.counter = 0;
        let (salt, key) = self.extract_and_expand(Some(input_key_material))?;
        self.salt = salt;
        self.cipher = Aes256Gcm::new_from_slice(&key).expect("32-byte key");
        Ok(())
    }

    pub fn mix_shared_secret(&mut self, ours: &KeyPair, their_public: &[u8]) -> Result<()> {
        let their_public = to_key(their_public, "peer public key")?;
        self.mix_key(&ours.dh(&their_public))
    }

    fn next_counter(&mut self) -> u64 {
        let count = self.counter;
        self.counter += 1;
        count
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let iv = generate_iv(self.next_counter());
        let ciphertext = self
            .cipher
            .encrypt(
                iv.as_ref().into(),
                Payload {
                    msg: plaintext,
                    aad: &self.hash,
                },
            )
            .map_err(|e| HandshakeError::Crypto(e.to_string()))?;
        self.authenticate(&ciphertext);
        Ok(ciphertext)
    }

    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let iv = generate_iv(self.next_counter());
        let plaintext = self
            .cipher
            .decrypt(
                iv.as_ref().into(),
                Payload {
                    msg: ciphertext,
                    aad: &self.hash,
                },
            )
            .map_err(|e| HandshakeError::Crypto(e.to_string()))?;
        self.authenticate(ciphertext);
        Ok(plaintext)
    }

    fn extract_and_expand(&self, ikm: Option<&[u8]>) -> Result<([u8; 32], [u8; 32])> {
        let hk = Hkdf::<Sha256>::new(Some(&self.salt), ikm.unwrap_or(&[]));
        let mut okm = [0u8; 64];
        hk.expand(&[], &mut okm)
            .map_err(|_| HandshakeError::Crypto("HKDF expand failed".into()))?;
        Ok((
            okm[..32].try_into().expect("checked length"),
            okm[32..].try_into().expect("checked length"),
        ))
    }

    /// Final Split: derives the (write, read) stream ciphers.
    pub fn split(self) -> Result<(NoiseCipher, NoiseCipher)> {
        let (write, read) = self.extract_and_expand(None)?;
        Ok((NoiseCipher::new(&write), NoiseCipher::new(&read)))
    }
}

/// Checks the decrypted certificate chain against the decrypted server
/// static key: intermediate issuer serial, leaf issuer linkage, and leaf key
/// equality.
fn verify_server_cert(cert_bytes: &[u8], server_static: &[u8; 32]) -> Result<()> {
    let chain = proto::CertChain::decode(cert_bytes)?;

    let intermediate = chain
        .intermediate
        .ok_or_else(|| HandshakeError::CertVerification("missing intermediate cert".into()))?;
    let leaf = chain
        .leaf
        .ok_or_else(|| HandshakeError::CertVerification("missing leaf cert".into()))?;

    let intermediate_details = proto::CertificateDetails::decode(
        intermediate.details.unwrap_or_default().as_slice(),
    )?;
    if intermediate_details.issuer_serial.unwrap_or_default() != CERT_ISSUER_SERIAL {
        return Err(HandshakeError::CertVerification(format!(
            "unexpected intermediate issuer serial {}",
            intermediate_details.issuer_serial.unwrap_or_default()
        )));
    }

    let leaf_details =
        proto::CertificateDetails::decode(leaf.details.unwrap_or_default().as_slice())?;
    if leaf_details.issuer_serial != intermediate_details.serial {
        return Err(HandshakeError::CertVerification(
            "leaf issuer serial does not match intermediate serial".into(),
        ));
    }
    if leaf_details.key.as_deref() != Some(server_static.as_slice()) {
        return Err(HandshakeError::CertVerification(
            "leaf key does not match server static key".into(),
        ));
    }
    Ok(())
}

/// Client-side XX state machine. Drives the three handshake messages and
/// yields the stream ciphers.
pub struct HandshakeState {
    noise: NoiseHandshake,
    ephemeral: KeyPair,
    static_kp: KeyPair,
    payload: Vec<u8>,
}

impl HandshakeState {
    pub fn new(static_kp: KeyPair, client_payload: Vec<u8>) -> Self {
        let ephemeral = KeyPair::generate();
        let mut noise = NoiseHandshake::new(NOISE_START_PATTERN, &CONN_HEADER);
        noise.authenticate(ephemeral.public_bytes());
        Self {
            noise,
            ephemeral,
            static_kp,
            payload: client_payload,
        }
    }

    pub fn build_client_hello(&self) -> Vec<u8> {
        proto::HandshakeMessage {
            client_hello: Some(proto::ClientHello {
                ephemeral: Some(self.ephemeral.public_bytes().to_vec()),
            }),
            ..Default::default()
        }
        .encode_to_vec()
    }

    pub fn read_server_hello_and_build_client_finish(
        &mut self,
        response: &[u8],
    ) -> Result<Vec<u8>> {
        let server_hello = proto::HandshakeMessage::decode(response)?
            .server_hello
            .ok_or(HandshakeError::IncompleteResponse)?;
        let server_ephemeral = to_key(
            &server_hello
                .ephemeral
                .ok_or(HandshakeError::IncompleteResponse)?,
            "server ephemeral key",
        )?;
        let static_ciphertext = server_hello
            .r#static
            .ok_or(HandshakeError::IncompleteResponse)?;
        let cert_ciphertext = server_hello
            .payload
            .ok_or(HandshakeError::IncompleteResponse)?;

        self.noise.authenticate(&server_ephemeral);
        self.noise
            .mix_shared_secret(&self.ephemeral, &server_ephemeral)?;

        let server_static = to_key(
            &self.noise.decrypt(&static_ciphertext)?,
            "server static key",
        )?;
        self.noise.mix_shared_secret(&self.ephemeral, &server_static)?;

        let cert_plaintext = self.noise.decrypt(&cert_ciphertext)?;
        verify_server_cert(&cert_plaintext, &server_static)?;

        let encrypted_static = self.noise.encrypt(self.static_kp.public_bytes())?;
        self.noise
            .mix_shared_secret(&self.static_kp, &server_ephemeral)?;
        let encrypted_payload = self.noise.encrypt(&self.payload)?;

        Ok(proto::HandshakeMessage {
            client_finish: Some(proto::ClientFinish {
                r#static: Some(encrypted_static),
                payload: Some(encrypted_payload),
            }),
            ..Default::default()
        }
        .encode_to_vec())
    }

    pub fn finish(self) -> Result<(NoiseCipher, NoiseCipher)> {
        self.noise.split()
    }
}

/// Runs the full handshake over a connected frame socket and returns the
/// established session cipher pair.
pub async fn do_handshake(
    device: &Device,
    frame_socket: &FrameSocket,
    frames_rx: &mut tokio::sync::mpsc::Receiver<bytes::Bytes>,
) -> Result<NoiseSocket> {
    let payload = device.client_payload().encode_to_vec();
    let mut state = HandshakeState::new(device.noise_key.clone(), payload);

    debug!(target: "Client", "--> ClientHello");
    frame_socket.send_frame(&state.build_client_hello()).await?;

    let response = match timeout(HANDSHAKE_RESPONSE_TIMEOUT, frames_rx.recv()).await {
        Ok(Some(frame)) => frame,
        Ok(None) => return Err(HandshakeError::SocketClosed),
        Err(_) => return Err(HandshakeError::Timeout),
    };

    debug!(target: "Client", "<-- ServerHello, building ClientFinish");
    let client_finish = state.read_server_hello_and_build_client_finish(&response)?;
    frame_socket.send_frame(&client_finish).await?;

    let (write, read) = state.finish()?;
    info!(target: "Client", "Handshake complete, switching to encrypted stream");
    Ok(NoiseSocket::new(write, read))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Server half of the XX exchange, built from the same primitives, so
    /// the client state machine can be exercised end to end without a
    /// network.
    struct TestServer {
        noise: NoiseHandshake,
        ephemeral: KeyPair,
    }

    impl TestServer {
        fn respond_to_hello(client_hello: &[u8]) -> (Self, Vec<u8>) {
            let hello = proto::HandshakeMessage::decode(client_hello)
                .unwrap()
                .client_hello
                .unwrap();
            let client_ephemeral: [u8; 32] =
                hello.ephemeral.unwrap().as_slice().try_into().unwrap();

            let static_kp = KeyPair::generate();
            let ephemeral = KeyPair::generate();
            let mut noise = NoiseHandshake::new(NOISE_START_PATTERN, &CONN_HEADER);
            noise.authenticate(&client_ephemeral);
            noise.authenticate(ephemeral.public_bytes());
            noise.mix_key(&ephemeral.dh(&client_ephemeral)).unwrap();

            let encrypted_static = noise.encrypt(static_kp.public_bytes()).unwrap();
            noise.mix_key(&static_kp.dh(&client_ephemeral)).unwrap();

            let cert = Self::make_cert_chain(static_kp.public_bytes());
            let encrypted_cert = noise.encrypt(&cert).unwrap();

            let response = proto::HandshakeMessage {
                server_hello: Some(proto::ServerHello {
                    ephemeral: Some(ephemeral.public_bytes().to_vec()),
                    r#static: Some(encrypted_static),
                    payload: Some(encrypted_cert),
                }),
                ..Default::default()
            }
            .encode_to_vec();

            (Self { noise, ephemeral }, response)
        }

        fn make_cert_chain(static_key: &[u8; 32]) -> Vec<u8> {
            let intermediate_details = proto::CertificateDetails {
                serial: Some(17),
                issuer_serial: Some(CERT_ISSUER_SERIAL),
                key: Some(vec![0xEE; 32]),
                ..Default::default()
            };
            let leaf_details = proto::CertificateDetails {
                serial: Some(18),
                issuer_serial: Some(17),
                key: Some(static_key.to_vec()),
                ..Default::default()
            };
            proto::CertChain {
                intermediate: Some(proto::NoiseCertificate {
                    details: Some(intermediate_details.encode_to_vec()),
                    signature: Some(vec![0; 64]),
                }),
                leaf: Some(proto::NoiseCertificate {
                    details: Some(leaf_details.encode_to_vec()),
                    signature: Some(vec![0; 64]),
                }),
            }
            .encode_to_vec()
        }

        fn read_client_finish(mut self, client_finish: &[u8]) -> (Vec<u8>, NoiseCipher, NoiseCipher) {
            let finish = proto::HandshakeMessage::decode(client_finish)
                .unwrap()
                .client_finish
                .unwrap();
            let client_static: [u8; 32] = self
                .noise
                .decrypt(&finish.r#static.unwrap())
                .unwrap()
                .as_slice()
                .try_into()
                .unwrap();
            self.noise
                .mix_key(&self.ephemeral.dh(&client_static))
                .unwrap();
            let payload = self.noise.decrypt(&finish.payload.unwrap()).unwrap();
            // Split is symmetric: the server writes with the client's read
            // key and reads with the client's write key.
            let (client_write, client_read) = self.noise.split().unwrap();
            (payload, client_read, client_write)
        }
    }

    #[test]
    fn full_exchange_yields_working_stream_ciphers() {
        let device_static = KeyPair::generate();
        let client_payload = b"client payload bytes".to_vec();
        let mut client = HandshakeState::new(device_static, client_payload.clone());

        let hello = client.build_client_hello();
        let (server, server_hello) = TestServer::respond_to_hello(&hello);
        let finish = client
            .read_server_hello_and_build_client_finish(&server_hello)
            .unwrap();
        let (seen_payload, server_write, server_read) = server.read_client_finish(&finish);
        assert_eq!(seen_payload, client_payload);

        let (client_write, client_read) = client.finish().unwrap();

        let client_socket = NoiseSocket::new(client_write, client_read);
        let server_socket = NoiseSocket::new(server_write, server_read);

        let wire = client_socket.encrypt_frame(b"post-handshake frame").unwrap();
        assert_eq!(
            server_socket.decrypt_frame(&wire).unwrap(),
            b"post-handshake frame"
        );
        let wire = server_socket.encrypt_frame(b"reply").unwrap();
        assert_eq!(client_socket.decrypt_frame(&wire).unwrap(), b"reply");
    }

    #[test]
    fn tampered_server_hello_fails() {
        let mut client = HandshakeState::new(KeyPair::generate(), Vec::new());
        let hello = client.build_client_hello();
        let (_, server_hello_bytes) = TestServer::respond_to_hello(&hello);

        let mut msg = proto::HandshakeMessage::decode(server_hello_bytes.as_slice()).unwrap();
        if let Some(hello) = msg.server_hello.as_mut() {
            if let Some(payload) = hello.payload.as_mut() {
                payload[0] ^= 0xFF;
            }
        }

        assert!(client
            .read_server_hello_and_build_client_finish(&msg.encode_to_vec())
            .is_err());
    }

    #[test]
    fn cert_chain_must_match_static_key() {
        let static_key = [0x11u8; 32];
        let chain = TestServer::make_cert_chain(&static_key);
        assert!(verify_server_cert(&chain, &static_key).is_ok());
        assert!(verify_server_cert(&chain, &[0x22u8; 32]).is_err());
    }

    #[test]
    fn cert_chain_issuer_linkage_is_checked() {
        let static_key = [0x11u8; 32];
        let leaf_details = proto::CertificateDetails {
            serial: Some(18),
            issuer_serial: Some(99), // does not match intermediate serial
            key: Some(static_key.to_vec()),
            ..Default::default()
        };
        let intermediate_details = proto::CertificateDetails {
            serial: Some(17),
            issuer_serial: Some(CERT_ISSUER_SERIAL),
            key: Some(vec![0xEE; 32]),
            ..Default::default()
        };
        let chain = proto::CertChain {
            intermediate: Some(proto::NoiseCertificate {
                details: Some(intermediate_details.encode_to_vec()),
                signature: None,
            }),
            leaf: Some(proto::NoiseCertificate {
                details: Some(leaf_details.encode_to_vec()),
                signature: None,
            }),
        }
        .encode_to_vec();
        assert!(verify_server_cert(&chain, &static_key).is_err());
    }
}
