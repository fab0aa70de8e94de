//! Session key exchange and payload encryption.
//!
//! The server publishes an X25519 public key in its first frame, each client
//! answers with its own, and both sides hash the shared secret into a
//! ChaCha20-Poly1305 key. Connection workers only talk to the
//! [`SessionCrypto`] trait, so a different cipher can be plugged in there.

use crate::{framing, FrameError, ProtocolMessage};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use parking_lot::RwLock;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret, StaticSecret};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LABEL: &[u8] = b"tron-session-key";

pub type ConnectionId = u32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("malformed key material: {0}")]
    MalformedKey(String),
    #[error("no session key registered for connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("ciphertext too short ({0} bytes)")]
    TooShort(usize),
    #[error("authentication tag mismatch")]
    TagMismatch,
    #[error("payload could not be sealed")]
    Seal,
}

/// Server parameters sent unencrypted as the first frame of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicParameters {
    /// Base64 of the 32-byte X25519 public key.
    pub public_key: String,
}

/// The client's answer to [`PublicParameters`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientKeyMaterial {
    pub public_key: String,
}

/// Operations a connection worker needs from the crypto layer.
pub trait SessionCrypto: Send + Sync {
    /// Exported public key material, sent to every client on connect.
    fn public_parameters(&self) -> String;
    fn register_client_key(&self, conn: ConnectionId, material: &str) -> Result<(), CryptoError>;
    fn is_established(&self, conn: ConnectionId) -> bool;
    fn encrypt_for(&self, conn: ConnectionId, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn decrypt_from(&self, conn: ConnectionId, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    /// Drops the session key of a closed connection.
    fn forget(&self, conn: ConnectionId);
}

fn encode_public_key(key: &PublicKey) -> String {
    framing::to_base64(key.as_bytes())
}

fn decode_public_key(text: &str) -> Result<PublicKey, CryptoError> {
    let bytes = framing::from_base64(text.as_bytes())
        .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
    let bytes: [u8; 32] = bytes.try_into().map_err(|raw: Vec<u8>| {
        CryptoError::MalformedKey(format!("{} byte public key", raw.len()))
    })?;
    Ok(PublicKey::from(bytes))
}

/// Symmetric key derived from an X25519 shared secret.
pub struct SessionKey {
    cipher: ChaCha20Poly1305,
}

impl SessionKey {
    /// Fails on a low-order peer key, which would yield a predictable secret.
    pub fn derive(shared: &SharedSecret) -> Result<Self, CryptoError> {
        if !shared.was_contributory() {
            return Err(CryptoError::MalformedKey(
                "non-contributory public key".to_string(),
            ));
        }
        let mut hasher = Sha256::new();
        hasher.update(KEY_LABEL);
        hasher.update(shared.as_bytes());
        let digest = hasher.finalize();
        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(digest.as_slice())),
        })
    }

    /// Output layout: `nonce || ciphertext || tag`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce: [u8; NONCE_LEN] = rand::random();
        let body = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Seal)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + body.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&body);
        Ok(sealed)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::TooShort(sealed.len()));
        }
        let (nonce, body) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| CryptoError::TagMismatch)
    }
}

/// Server key pair plus the session keys of every established connection.
pub struct KeyRing {
    secret: StaticSecret,
    public_key: PublicKey,
    sessions: RwLock<HashMap<ConnectionId, SessionKey>>,
}

impl KeyRing {
    /// Generates a fresh server key pair.
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    pub fn from_secret(secret: StaticSecret) -> Self {
        Self {
            public_key: PublicKey::from(&secret),
            secret,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn with_session<T>(
        &self,
        conn: ConnectionId,
        f: impl FnOnce(&SessionKey) -> Result<T, CryptoError>,
    ) -> Result<T, CryptoError> {
        let sessions = self.sessions.read();
        let key = sessions
            .get(&conn)
            .ok_or(CryptoError::UnknownConnection(conn))?;
        f(key)
    }
}

impl SessionCrypto for KeyRing {
    fn public_parameters(&self) -> String {
        let params = PublicParameters {
            public_key: encode_public_key(&self.public_key),
        };
        // A single string field always serializes.
        serde_json::to_string(&params).unwrap_or_default()
    }

    fn register_client_key(&self, conn: ConnectionId, material: &str) -> Result<(), CryptoError> {
        let material: ClientKeyMaterial = serde_json::from_str(material.trim())
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        let client_public = decode_public_key(&material.public_key)?;
        let key = SessionKey::derive(&self.secret.diffie_hellman(&client_public))?;

        self.sessions.write().insert(conn, key);
        Ok(())
    }

    fn is_established(&self, conn: ConnectionId) -> bool {
        self.sessions.read().contains_key(&conn)
    }

    fn encrypt_for(&self, conn: ConnectionId, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.with_session(conn, |key| key.seal(plaintext))
    }

    fn decrypt_from(&self, conn: ConnectionId, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.with_session(conn, |key| key.open(ciphertext))
    }

    fn forget(&self, conn: ConnectionId) {
        self.sessions.write().remove(&conn);
    }
}

/// Client end of a session.
pub struct ClientCipher {
    key: SessionKey,
}

impl ClientCipher {
    /// Answers the server's parameter frame.
    ///
    /// Returns the cipher and the key-material frame payload to send back.
    pub fn negotiate(server_parameters: &str) -> Result<(Self, String), CryptoError> {
        let params: PublicParameters = serde_json::from_str(server_parameters.trim())
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        let server_public = decode_public_key(&params.public_key)?;

        let secret = EphemeralSecret::random_from_rng(OsRng);
        let material = ClientKeyMaterial {
            public_key: encode_public_key(&PublicKey::from(&secret)),
        };
        let payload = serde_json::to_string(&material)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        let key = SessionKey::derive(&secret.diffie_hellman(&server_public))?;

        Ok((Self { key }, payload))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.key.seal(plaintext)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.key.open(ciphertext)
    }

    /// Encodes, encrypts and frames a message for the server.
    pub fn seal_message(&self, message: &ProtocolMessage) -> Result<Vec<u8>, FrameError> {
        let json = message.encode()?;
        let sealed = self.encrypt(json.as_bytes())?;
        Ok(framing::encode_frame(&framing::to_base64(&sealed)))
    }

    /// Decodes one encrypted frame (without its delimiter) from the server.
    pub fn open_frame(&self, frame: &[u8]) -> Result<ProtocolMessage, FrameError> {
        let sealed = framing::from_base64(frame)?;
        let plaintext = self.decrypt(&sealed)?;
        let text = String::from_utf8(plaintext)?;
        ProtocolMessage::decode(&text)
    }

    /// Decodes a server frame that may predate the handshake.
    ///
    /// Messages published before the server registered this client's key
    /// arrive as plain JSON.
    pub fn decode_frame(&self, frame: &[u8]) -> Result<ProtocolMessage, FrameError> {
        if frame.first() == Some(&b'{') {
            let text = String::from_utf8(frame.to_vec())?;
            return ProtocolMessage::decode(&text);
        }
        self.open_frame(frame)
    }
}
