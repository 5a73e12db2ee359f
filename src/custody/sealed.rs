//! SealedSecret - AEAD envelope for key material at rest.
//!
//! ChaCha20-Poly1305 with a 256-bit key, 96-bit random IV and 128-bit tag.
//! The wire form is `{ "ciphertext": hex, "iv": hex, "authTag": hex }`.

use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{EscrowError, Result};

const AAD_ESCROW_KEY: &[u8] = b"utxo-escrow-key-v1";

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Caller-owned 256-bit sealing key. Never stored by the engine.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self { Self(bytes) }

    pub fn from_hex(value: &str) -> Result<Self> {
        let mut bytes = Zeroizing::new(
            hex::decode(value.trim())
                .map_err(|e| EscrowError::InvalidConfig(format!("encryption key hex: {e}")))?,
        );
        if bytes.len() != KEY_LEN {
            return Err(EscrowError::InvalidConfig(format!(
                "encryption key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Self(key))
    }

    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] { &self.0 }

    pub fn to_hex(&self) -> Zeroizing<String> { Zeroizing::new(hex::encode(self.0)) }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedSecret {
    #[serde(with = "hex")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "hex")]
    pub iv: Vec<u8>,
    #[serde(with = "hex")]
    pub auth_tag: Vec<u8>,
}

impl SealedSecret {
    pub fn seal(plaintext: &[u8], key: &EncryptionKey) -> Result<Self> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        let mut sealed = cipher
            .encrypt(Nonce::from_slice(&iv), Payload { msg: plaintext, aad: AAD_ESCROW_KEY })
            .map_err(|_| EscrowError::InvalidConfig("plaintext too large to seal".into()))?;

        let auth_tag = sealed.split_off(sealed.len() - TAG_LEN);
        Ok(Self { ciphertext: sealed, iv: iv.to_vec(), auth_tag })
    }

    /// Decrypt and authenticate. Any tag mismatch yields `EscrowError::Decryption`
    /// and no plaintext bytes.
    pub fn open(&self, key: &EncryptionKey) -> Result<Zeroizing<Vec<u8>>> {
        self.check_shape()?;

        let mut combined = Vec::with_capacity(self.ciphertext.len() + TAG_LEN);
        combined.extend_from_slice(&self.ciphertext);
        combined.extend_from_slice(&self.auth_tag);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        cipher
            .decrypt(Nonce::from_slice(&self.iv), Payload { msg: &combined, aad: AAD_ESCROW_KEY })
            .map(Zeroizing::new)
            .map_err(|_| EscrowError::Decryption)
    }

    /// Parse the JSON wire form. Missing or non-hex fields are malformed input,
    /// distinct from a decryption failure.
    pub fn from_json(raw: &str) -> Result<Self> {
        let sealed: Self = serde_json::from_str(raw)
            .map_err(|e| EscrowError::MalformedSealedKey(e.to_string()))?;
        sealed.check_shape()?;
        Ok(sealed)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| EscrowError::MalformedSealedKey(e.to_string()))
    }

    fn check_shape(&self) -> Result<()> {
        if self.iv.len() != IV_LEN {
            return Err(EscrowError::MalformedSealedKey(format!(
                "iv must be {IV_LEN} bytes, got {}",
                self.iv.len()
            )));
        }
        if self.auth_tag.len() != TAG_LEN {
            return Err(EscrowError::MalformedSealedKey(format!(
                "authTag must be {TAG_LEN} bytes, got {}",
                self.auth_tag.len()
            )));
        }
        Ok(())
    }
}
