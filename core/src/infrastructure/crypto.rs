// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! Crypto (§4.7): ephemeral ECDH P-256 key exchange, HKDF-SHA256 directional
//! key derivation, and the AES-GCM envelope every encrypted event travels
//! in. `seq` itself is never encrypted (§3) — only the event payload is.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use elliptic_curve::sec1::ToEncodedPoint;
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::PublicKey;
use rand_core::OsRng;
use sha2::Sha256;
use thiserror::Error;

use crate::domain::errors::ErrorCode;
use crate::domain::events::EncryptedEnvelope;

pub const CURVE_NAME: &str = "P-256";
pub const SELECTED_ALGORITHM: &str = "AES-GCM-256";
pub const KDF_NAME: &str = "HKDF-SHA-256";

/// HKDF `info` labels (§4.7), directional so client-to-server and
/// server-to-client traffic never share a key.
pub const INFO_C2S: &[u8] = b"enclavejs-c2s-enc";
pub const INFO_S2C: &[u8] = b"enclavejs-s2c-enc";

/// A key may encrypt at most this many messages before it MUST rotate
/// (§4.7: "After `2^30` messages the key MUST rotate").
pub const MAX_NONCES: u64 = 1 << 30;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error, PartialEq)]
pub enum CryptoError {
    #[error("ECDH handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("HKDF key derivation failed: {0}")]
    KeyDerivationFailed(String),
    #[error("AES-GCM decryption failed (bad key, nonce, or tampered ciphertext)")]
    DecryptionFailed,
    #[error("nonce counter would be reused for key {0}")]
    NonceReuse(String),
    #[error("key {0} has exceeded its maximum nonce count and must rotate")]
    KeyExpired(String),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("invalid public key material: {0}")]
    InvalidPublicKey(String),
}

impl CryptoError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::HandshakeFailed(_) => ErrorCode::HandshakeFailed,
            Self::KeyDerivationFailed(_) => ErrorCode::KeyDerivationFailed,
            Self::DecryptionFailed => ErrorCode::DecryptionFailed,
            Self::NonceReuse(_) => ErrorCode::NonceReuse,
            Self::KeyExpired(_) => ErrorCode::KeyExpired,
            Self::UnsupportedAlgorithm(_) => ErrorCode::UnsupportedAlgorithm,
            Self::InvalidPublicKey(_) => ErrorCode::InvalidPublicKey,
        }
    }
}

/// An ephemeral ECDH keypair for one side of the handshake (§4.7). Never
/// serialized whole — only `public_b64()` travels on the wire, inside
/// `ClientHello`/`ServerHello`.
pub struct EphemeralKeypair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralKeypair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The uncompressed SEC1 point, base64-encoded, as carried in
    /// `ClientHello.pubB64` / `ServerHello.pubB64`.
    pub fn public_b64(&self) -> String {
        BASE64.encode(self.public.to_encoded_point(false).as_bytes())
    }

    /// Performs the ECDH exchange against the peer's public key (decoded
    /// from its own `pubB64`), yielding the raw shared secret that
    /// [`derive_session_keys`] then expands via HKDF.
    pub fn shared_secret(&self, peer_public_b64: &str) -> Result<Vec<u8>, CryptoError> {
        let peer = decode_public_key(peer_public_b64)?;
        let shared = self.secret.diffie_hellman(&peer);
        Ok(shared.raw_secret_bytes().to_vec())
    }
}

fn decode_public_key(b64: &str) -> Result<PublicKey, CryptoError> {
    let bytes = BASE64.decode(b64).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    PublicKey::from_sec1_bytes(&bytes).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// A derived directional AES-GCM-256 key (§3 `SessionKeyInfo`): owned
/// exclusively by the endpoint that encrypts with it, never serialized.
pub struct SessionKey {
    pub key_id: String,
    key_bytes: [u8; KEY_LEN],
    nonce_counter: u64,
}

impl SessionKey {
    fn from_bytes(key_id: String, bytes: [u8; KEY_LEN]) -> Self {
        Self { key_id, key_bytes: bytes, nonce_counter: 0 }
    }

    pub fn nonces_used(&self) -> u64 {
        self.nonce_counter
    }

    pub fn is_expired(&self) -> bool {
        self.nonce_counter >= MAX_NONCES
    }

    /// Builds the next 12-byte nonce: a big-endian-padded 64-bit
    /// per-endpoint counter (§4.7), and advances the counter. Errors if
    /// doing so would exceed `MAX_NONCES`, signaling `KeyExpired` rather
    /// than silently reusing a nonce.
    fn next_nonce(&mut self) -> Result<[u8; NONCE_LEN], CryptoError> {
        if self.is_expired() {
            return Err(CryptoError::KeyExpired(self.key_id.clone()));
        }
        let counter = self.nonce_counter;
        self.nonce_counter += 1;
        let mut nonce = [0u8; NONCE_LEN];
        nonce[4..].copy_from_slice(&counter.to_be_bytes());
        Ok(nonce)
    }

    /// Encrypts `plaintext` (the JSON-encoded inner event) into the wire
    /// envelope shape (§4.7: `{kid, nonceB64, ciphertextB64}`, empty AAD).
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<EncryptedEnvelope, CryptoError> {
        let nonce_bytes = self.next_nonce()?;
        let cipher = Aes256Gcm::new_from_slice(&self.key_bytes).map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, Payload { msg: plaintext, aad: &[] })
            .map_err(|_| CryptoError::DecryptionFailed)?;
        Ok(EncryptedEnvelope { kid: self.key_id.clone(), nonce_b64: BASE64.encode(nonce_bytes), ciphertext_b64: BASE64.encode(ciphertext) })
    }

    /// Decrypts an [`EncryptedEnvelope`] addressed to this key. Fails
    /// closed: any altered byte in nonce, ciphertext, or tag surfaces as
    /// `DecryptionFailed`, never a partial result.
    pub fn decrypt(&self, envelope: &EncryptedEnvelope) -> Result<Vec<u8>, CryptoError> {
        if envelope.kid != self.key_id {
            return Err(CryptoError::DecryptionFailed);
        }
        let nonce_bytes = BASE64.decode(&envelope.nonce_b64).map_err(|_| CryptoError::DecryptionFailed)?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(CryptoError::DecryptionFailed);
        }
        let ciphertext = BASE64.decode(&envelope.ciphertext_b64).map_err(|_| CryptoError::DecryptionFailed)?;
        let cipher = Aes256Gcm::new_from_slice(&self.key_bytes).map_err(|_| CryptoError::DecryptionFailed)?;
        let nonce = Nonce::from_slice(&nonce_bytes);
        cipher.decrypt(nonce, Payload { msg: &ciphertext, aad: &[] }).map_err(|_| CryptoError::DecryptionFailed)
    }
}

/// The two directional keys produced by one handshake (§4.7): `c2s` for
/// client-to-server traffic, `s2c` for the reverse direction.
pub struct SessionKeyPair {
    pub c2s: SessionKey,
    pub s2c: SessionKey,
}

/// HKDF-SHA256(ikm = shared secret, salt = UTF-8 `sessionId`, info ∈
/// {c2s, s2c} label, length = 32) (§4.7). `key_id` is shared by both
/// directional keys so the wire envelope's `kid` round-trips regardless of
/// direction; callers that need to distinguish direction do so by which
/// endpoint originated the frame, not by `kid`.
pub fn derive_session_keys(shared_secret: &[u8], session_id: &str, key_id: &str) -> Result<SessionKeyPair, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(session_id.as_bytes()), shared_secret);
    let c2s = derive_one(&hk, INFO_C2S, key_id)?;
    let s2c = derive_one(&hk, INFO_S2C, key_id)?;
    Ok(SessionKeyPair { c2s, s2c })
}

fn derive_one(hk: &Hkdf<Sha256>, info: &[u8], key_id: &str) -> Result<SessionKey, CryptoError> {
    let mut okm = [0u8; KEY_LEN];
    hk.expand(info, &mut okm).map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    Ok(SessionKey::from_bytes(key_id.to_string(), okm))
}

/// Whether the client's `ClientHello.supportedAlgorithms` includes this
/// port's one supported algorithm, returning the negotiated choice for
/// `ServerHello.selectedAlgorithm` or `UnsupportedAlgorithm` otherwise.
pub fn negotiate_algorithm(supported: &[String]) -> Result<&'static str, CryptoError> {
    if supported.iter().any(|a| a == SELECTED_ALGORITHM) {
        Ok(SELECTED_ALGORITHM)
    } else {
        Err(CryptoError::UnsupportedAlgorithm(supported.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake() -> (SessionKeyPair, SessionKeyPair) {
        let client = EphemeralKeypair::generate();
        let server = EphemeralKeypair::generate();
        let client_shared = client.shared_secret(&server.public_b64()).unwrap();
        let server_shared = server.shared_secret(&client.public_b64()).unwrap();
        assert_eq!(client_shared, server_shared);
        let client_keys = derive_session_keys(&client_shared, "s_test", "key1").unwrap();
        let server_keys = derive_session_keys(&server_shared, "s_test", "key1").unwrap();
        (client_keys, server_keys)
    }

    #[test]
    fn ecdh_handshake_yields_matching_shared_secret_on_both_sides() {
        handshake();
    }

    #[test]
    fn directional_keys_differ_but_agree_across_endpoints() {
        let (client, server) = handshake();
        // client's c2s key must match server's c2s key (same derivation inputs)
        let mut client_c2s = client.c2s;
        let server_c2s = server.c2s;
        let envelope = client_c2s.encrypt(b"hello").unwrap();
        let plaintext = server_c2s.decrypt(&envelope).unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn encrypt_decrypt_round_trips() {
        let (client, _server) = handshake();
        let mut key = client.c2s;
        let msg = b"{\"type\":\"heartbeat\"}";
        let envelope = key.encrypt(msg).unwrap();
        assert_eq!(envelope.kid, "key1");
        let back = key.decrypt(&envelope).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn decrypt_fails_on_tampered_ciphertext() {
        let (client, _server) = handshake();
        let mut key = client.c2s;
        let mut envelope = key.encrypt(b"payload").unwrap();
        let mut bytes = BASE64.decode(&envelope.ciphertext_b64).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        envelope.ciphertext_b64 = BASE64.encode(bytes);
        assert_eq!(key.decrypt(&envelope), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn decrypt_fails_on_tampered_nonce() {
        let (client, _server) = handshake();
        let mut key = client.c2s;
        let mut envelope = key.encrypt(b"payload").unwrap();
        let mut nonce = BASE64.decode(&envelope.nonce_b64).unwrap();
        nonce[0] ^= 0xFF;
        envelope.nonce_b64 = BASE64.encode(nonce);
        assert_eq!(key.decrypt(&envelope), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn nonce_counter_advances_and_never_repeats() {
        let (client, _server) = handshake();
        let mut key = client.c2s;
        let e1 = key.encrypt(b"a").unwrap();
        let e2 = key.encrypt(b"b").unwrap();
        assert_ne!(e1.nonce_b64, e2.nonce_b64);
        assert_eq!(key.nonces_used(), 2);
    }

    #[test]
    fn key_reports_expired_at_the_nonce_ceiling() {
        let (client, _server) = handshake();
        let mut key = client.c2s;
        key.nonce_counter = MAX_NONCES;
        assert!(key.is_expired());
        assert_eq!(key.encrypt(b"x"), Err(CryptoError::KeyExpired("key1".to_string())));
    }

    #[test]
    fn negotiate_algorithm_selects_supported_aes_gcm_256() {
        assert_eq!(negotiate_algorithm(&["AES-GCM-256".to_string()]).unwrap(), "AES-GCM-256");
        assert!(negotiate_algorithm(&["AES-GCM-128".to_string()]).is_err());
    }
}
