//! Key material, block signatures and body encryption.
//!
//! Every endpoint owns a [`KeySet`]: an ed25519 pair for signatures and an
//! x25519 pair for key agreement. Encrypted bodies use a fresh random body
//! key with XChaCha20-Poly1305; that key is sealed once per receiver under
//! `sha256(shared secret, ephemeral public key, receiver public key)`.

use std::collections::HashMap;
use std::fmt;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use datex_types::IdEndpoint;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::error::{CryptoError, CryptoResult};
use crate::header::{NONCE_LEN, SIGNATURE_LEN, WRAPPED_KEY_LEN};

pub const KEY_LEN: usize = 32;

const WRAP_CONTEXT: &[u8] = b"datex key wrap v1";

// ══════════════════════════════════════════════════════════════════════════════
// Key sets
// ══════════════════════════════════════════════════════════════════════════════

/// Public halves of a [`KeySet`], as registered for peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeys {
    pub verify: [u8; KEY_LEN],
    pub encrypt: [u8; KEY_LEN],
}

impl PublicKeys {
    /// `verify || encrypt`, the form carried in HELLO blocks.
    pub fn to_bytes(&self) -> [u8; 2 * KEY_LEN] {
        let mut bytes = [0u8; 2 * KEY_LEN];
        bytes[..KEY_LEN].copy_from_slice(&self.verify);
        bytes[KEY_LEN..].copy_from_slice(&self.encrypt);
        bytes
    }

    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != 2 * KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "expected {} public key bytes, got {}",
                2 * KEY_LEN,
                bytes.len()
            )));
        }
        let mut keys = Self {
            verify: [0; KEY_LEN],
            encrypt: [0; KEY_LEN],
        };
        keys.verify.copy_from_slice(&bytes[..KEY_LEN]);
        keys.encrypt.copy_from_slice(&bytes[KEY_LEN..]);
        VerifyingKey::from_bytes(&keys.verify)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(keys)
    }
}

/// Private key halves in hex, the persisted form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedKeys {
    pub sign: String,
    pub encrypt: String,
}

/// The signing and key-agreement pairs of one endpoint.
#[derive(Clone)]
pub struct KeySet {
    sign: SigningKey,
    encrypt: StaticSecret,
}

impl KeySet {
    pub fn generate() -> Self {
        Self {
            sign: SigningKey::generate(&mut OsRng),
            encrypt: StaticSecret::random_from_rng(OsRng),
        }
    }

    pub fn public(&self) -> PublicKeys {
        PublicKeys {
            verify: self.sign.verifying_key().to_bytes(),
            encrypt: PublicKey::from(&self.encrypt).to_bytes(),
        }
    }

    pub fn export(&self) -> ExportedKeys {
        ExportedKeys {
            sign: hex::encode(self.sign.to_bytes()),
            encrypt: hex::encode(self.encrypt.to_bytes()),
        }
    }

    pub fn import(exported: &ExportedKeys) -> CryptoResult<Self> {
        Ok(Self {
            sign: SigningKey::from_bytes(&decode_key(&exported.sign)?),
            encrypt: StaticSecret::from(decode_key(&exported.encrypt)?),
        })
    }
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySet")
            .field("verify", &hex::encode(self.public().verify))
            .finish_non_exhaustive()
    }
}

fn decode_key(text: &str) -> CryptoResult<[u8; KEY_LEN]> {
    hex::decode(text)
        .ok()
        .and_then(|bytes| <[u8; KEY_LEN]>::try_from(bytes.as_slice()).ok())
        .ok_or_else(|| CryptoError::InvalidKey(format!("expected {KEY_LEN} hex-encoded bytes")))
}

// ══════════════════════════════════════════════════════════════════════════════
// Key store
// ══════════════════════════════════════════════════════════════════════════════

/// The local key set plus the public keys of known peers.
///
/// Rotation takes the write lock; signing and unsealing take the read lock.
#[derive(Debug, Default)]
pub struct KeyStore {
    own: RwLock<Option<KeySet>>,
    peers: RwLock<HashMap<IdEndpoint, PublicKeys>>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys(keys: KeySet) -> Self {
        let store = Self::new();
        store.set_own_keys(keys);
        store
    }

    /// Generate and activate a fresh key set, replacing any previous one.
    pub fn create_own_keys(&self) -> PublicKeys {
        let keys = KeySet::generate();
        let public = keys.public();
        *self.own.write() = Some(keys);
        debug!(verify = %hex::encode(public.verify), "created own keys");
        public
    }

    pub fn set_own_keys(&self, keys: KeySet) {
        *self.own.write() = Some(keys);
    }

    pub fn has_own_keys(&self) -> bool {
        self.own.read().is_some()
    }

    pub fn own_public(&self) -> Option<PublicKeys> {
        self.own.read().as_ref().map(KeySet::public)
    }

    pub fn export_own(&self) -> Option<ExportedKeys> {
        self.own.read().as_ref().map(KeySet::export)
    }

    pub fn import_own(&self, exported: &ExportedKeys) -> CryptoResult<PublicKeys> {
        let keys = KeySet::import(exported)?;
        let public = keys.public();
        self.set_own_keys(keys);
        Ok(public)
    }

    pub fn register_peer(&self, id: IdEndpoint, keys: PublicKeys) {
        self.peers.write().insert(id, keys);
    }

    pub fn peer(&self, id: IdEndpoint) -> Option<PublicKeys> {
        self.peers.read().get(&id).copied()
    }

    pub fn sign(&self, payload: &[u8]) -> CryptoResult<[u8; SIGNATURE_LEN]> {
        let own = self.own.read();
        let keys = own.as_ref().ok_or(CryptoError::MissingOwnKeys)?;
        Ok(keys.sign.sign(payload).to_bytes())
    }

    /// Check `signature` against the registered verify key of `signer`.
    pub fn verify(
        &self,
        signer: IdEndpoint,
        payload: &[u8],
        signature: &[u8; SIGNATURE_LEN],
    ) -> CryptoResult<()> {
        let keys = self
            .peer(signer)
            .ok_or_else(|| CryptoError::MissingPeerKeys(signer.to_string()))?;
        let key = VerifyingKey::from_bytes(&keys.verify)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        key.verify(payload, &Signature::from_bytes(signature))
            .map_err(|_| CryptoError::BadSignature)
    }

    /// Recover the body key from the wrap addressed to us.
    pub fn unwrap_key(&self, wrapped: &[u8; WRAPPED_KEY_LEN]) -> CryptoResult<[u8; KEY_LEN]> {
        let own = self.own.read();
        let keys = own.as_ref().ok_or(CryptoError::MissingOwnKeys)?;

        let mut ephemeral = [0u8; KEY_LEN];
        ephemeral.copy_from_slice(&wrapped[..KEY_LEN]);
        let nonce = &wrapped[KEY_LEN..KEY_LEN + NONCE_LEN];
        let sealed = &wrapped[KEY_LEN + NONCE_LEN..];

        let ephemeral = PublicKey::from(ephemeral);
        let shared = keys.encrypt.diffie_hellman(&ephemeral);
        let own_public = PublicKey::from(&keys.encrypt);
        let wrap_key = derive_wrap_key(shared.as_bytes(), ephemeral.as_bytes(), own_public.as_bytes());

        let opened = XChaCha20Poly1305::new(Key::from_slice(&wrap_key))
            .decrypt(XNonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::Decrypt)?;
        <[u8; KEY_LEN]>::try_from(opened.as_slice()).map_err(|_| CryptoError::Decrypt)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Body encryption
// ══════════════════════════════════════════════════════════════════════════════

/// A body sealed under a fresh key.
pub struct SealedBody {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub key: [u8; KEY_LEN],
}

pub fn seal_body(body: &[u8]) -> CryptoResult<SealedBody> {
    let mut rng = rand::thread_rng();
    let mut key = [0u8; KEY_LEN];
    rng.fill(&mut key);
    let mut nonce = [0u8; NONCE_LEN];
    rng.fill(&mut nonce);
    let ciphertext = XChaCha20Poly1305::new(Key::from_slice(&key))
        .encrypt(XNonce::from_slice(&nonce), body)
        .map_err(|_| CryptoError::Encrypt)?;
    Ok(SealedBody {
        ciphertext,
        nonce,
        key,
    })
}

pub fn open_body(
    ciphertext: &[u8],
    nonce: &[u8; NONCE_LEN],
    key: &[u8; KEY_LEN],
) -> CryptoResult<Vec<u8>> {
    XChaCha20Poly1305::new(Key::from_slice(key))
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decrypt)
}

/// Seal `body_key` for the holder of `receiver`'s encrypt key.
pub fn wrap_key(
    body_key: &[u8; KEY_LEN],
    receiver: &PublicKeys,
) -> CryptoResult<[u8; WRAPPED_KEY_LEN]> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let receiver_public = PublicKey::from(receiver.encrypt);
    let shared = ephemeral.diffie_hellman(&receiver_public);
    let wrap_key = derive_wrap_key(
        shared.as_bytes(),
        ephemeral_public.as_bytes(),
        receiver_public.as_bytes(),
    );

    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill(&mut nonce);
    let sealed = XChaCha20Poly1305::new(Key::from_slice(&wrap_key))
        .encrypt(XNonce::from_slice(&nonce), body_key.as_slice())
        .map_err(|_| CryptoError::Encrypt)?;

    let mut wrapped = [0u8; WRAPPED_KEY_LEN];
    wrapped[..KEY_LEN].copy_from_slice(ephemeral_public.as_bytes());
    wrapped[KEY_LEN..KEY_LEN + NONCE_LEN].copy_from_slice(&nonce);
    if sealed.len() != WRAPPED_KEY_LEN - KEY_LEN - NONCE_LEN {
        return Err(CryptoError::Encrypt);
    }
    wrapped[KEY_LEN + NONCE_LEN..].copy_from_slice(&sealed);
    Ok(wrapped)
}

fn derive_wrap_key(shared: &[u8; 32], ephemeral: &[u8; 32], receiver: &[u8; 32]) -> [u8; KEY_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(WRAP_CONTEXT);
    hasher.update(shared);
    hasher.update(ephemeral);
    hasher.update(receiver);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let store = KeyStore::new();
        let public = store.create_own_keys();
        let me = IdEndpoint::from_bytes([1; 12]);
        store.register_peer(me, public);
        let signature = store.sign(b"payload").unwrap();
        assert!(store.verify(me, b"payload", &signature).is_ok());
        assert_eq!(
            store.verify(me, b"tampered", &signature),
            Err(CryptoError::BadSignature)
        );
    }

    #[test]
    fn signing_without_keys_fails() {
        assert_eq!(KeyStore::new().sign(b"x"), Err(CryptoError::MissingOwnKeys));
    }

    #[test]
    fn wrap_and_unwrap() {
        let receiver = KeyStore::new();
        let public = receiver.create_own_keys();
        let sealed = seal_body(b"secret body").unwrap();
        let wrapped = wrap_key(&sealed.key, &public).unwrap();
        let key = receiver.unwrap_key(&wrapped).unwrap();
        assert_eq!(open_body(&sealed.ciphertext, &sealed.nonce, &key).unwrap(), b"secret body");

        let stranger = KeyStore::new();
        stranger.create_own_keys();
        assert_eq!(stranger.unwrap_key(&wrapped), Err(CryptoError::Decrypt));
    }

    #[test]
    fn export_import() {
        let keys = KeySet::generate();
        let restored = KeySet::import(&keys.export()).unwrap();
        assert_eq!(restored.public(), keys.public());
        assert!(KeySet::import(&ExportedKeys {
            sign: "zz".into(),
            encrypt: "00".into(),
        })
        .is_err());
    }

    #[test]
    fn rotation_changes_public_keys() {
        let store = KeyStore::new();
        let first = store.create_own_keys();
        let second = store.create_own_keys();
        assert_ne!(first, second);
        assert_eq!(store.own_public(), Some(second));
    }

    #[test]
    fn public_keys_bytes() {
        let public = KeySet::generate().public();
        assert_eq!(PublicKeys::from_slice(&public.to_bytes()).unwrap(), public);
        assert!(PublicKeys::from_slice(&[0; 10]).is_err());
    }
}
