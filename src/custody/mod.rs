//! Key Custody - one fresh keypair per escrow, private key held only sealed.
//!
//! ```text
//! generate()            unseal() / with_unsealed()
//!     │                          │
//!     ├── random SecretKey       ├── SealedSecret::open (fails closed)
//!     ├── P2PKH address          ├── Zeroizing<[u8; 32]>
//!     └── SealedSecret::seal     └── SecretGuard (erased on drop, incl. unwind)
//! ```
//!
//! The plaintext key never outlives a single signing closure.

mod sealed;

pub use sealed::{EncryptionKey, SealedSecret, IV_LEN, KEY_LEN, TAG_LEN};

use bitcoin::base58;
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::PublicKey;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::info;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{EscrowError, Result};
use crate::network::NetworkParams;

/// Temporary custodial wallet for one escrow instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowWallet {
    pub address: String,
    pub public_key: PublicKey,
    pub sealed_key: SealedSecret,
    pub network: NetworkParams,
}

impl EscrowWallet {
    /// Check that the sealed key still controls `address`.
    pub fn verify_sealed_key(&self, key: &EncryptionKey) -> Result<bool> {
        let unsealed = KeyCustody::unseal(&self.sealed_key, key)?;
        let public_key = unsealed.public_key()?;
        Ok(public_key == self.public_key
            && self.network.p2pkh_address(&public_key.pubkey_hash()) == self.address)
    }
}

/// Decrypted private key. Zeroed on drop, never printed.
pub struct UnsealedKey {
    bytes: Zeroizing<[u8; 32]>,
}

impl UnsealedKey {
    /// Copyable key; callers outside the crate go through `KeyCustody::with_unsealed`.
    pub(crate) fn secret_key(&self) -> Result<SecretKey> {
        SecretKey::from_slice(&self.bytes[..]).map_err(|_| EscrowError::Decryption)
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        let secp = Secp256k1::signing_only();
        let guard = SecretGuard(self.secret_key()?);
        Ok(PublicKey::new(guard.0.public_key(&secp)))
    }

    /// Compressed-key WIF for operator recovery.
    pub fn to_wif(&self, network: &NetworkParams) -> Zeroizing<String> {
        let mut payload = Zeroizing::new(Vec::with_capacity(34));
        payload.push(network.wif_prefix);
        payload.extend_from_slice(&self.bytes[..]);
        payload.push(0x01);
        Zeroizing::new(base58::encode_check(&payload))
    }
}

impl std::fmt::Debug for UnsealedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("UnsealedKey(<redacted>)")
    }
}

/// Erases the wrapped key on every exit path, including unwinding.
struct SecretGuard(SecretKey);

impl Drop for SecretGuard {
    fn drop(&mut self) {
        self.0.non_secure_erase();
    }
}

#[derive(Debug, Clone)]
pub struct KeyCustody {
    network: NetworkParams,
}

impl KeyCustody {
    pub fn new(network: NetworkParams) -> Self { Self { network } }

    pub fn network(&self) -> &NetworkParams { &self.network }

    /// Generate a fresh keypair and seal it under `key`.
    pub fn generate(&self, key: &EncryptionKey) -> Result<EscrowWallet> {
        let secp = Secp256k1::signing_only();
        let guard = SecretGuard(random_secret_key());
        let public_key = PublicKey::new(guard.0.public_key(&secp));

        let mut raw = Zeroizing::new(guard.0.secret_bytes());
        let sealed_key = SealedSecret::seal(&raw[..], key)?;
        raw.zeroize();
        drop(guard);

        let address = self.network.p2pkh_address(&public_key.pubkey_hash());
        info!(network = %self.network.name, %address, "escrow wallet generated");

        Ok(EscrowWallet { address, public_key, sealed_key, network: self.network.clone() })
    }

    /// Decrypt a sealed key. Fails with `EscrowError::Decryption` if the tag
    /// does not verify or the plaintext is not a valid secp256k1 scalar.
    pub fn unseal(sealed: &SealedSecret, key: &EncryptionKey) -> Result<UnsealedKey> {
        let plaintext = sealed.open(key)?;
        if plaintext.len() != 32 {
            return Err(EscrowError::Decryption);
        }
        let mut bytes = Zeroizing::new([0u8; 32]);
        bytes.copy_from_slice(&plaintext);
        let unsealed = UnsealedKey { bytes };
        drop(SecretGuard(unsealed.secret_key()?));
        Ok(unsealed)
    }

    /// Scoped secret acquisition: the key exists only for the duration of `f`.
    pub fn with_unsealed<T>(
        sealed: &SealedSecret,
        key: &EncryptionKey,
        f: impl FnOnce(&SecretKey) -> Result<T>,
    ) -> Result<T> {
        let unsealed = Self::unseal(sealed, key)?;
        let guard = SecretGuard(unsealed.secret_key()?);
        drop(unsealed);
        f(&guard.0)
    }
}

fn random_secret_key() -> SecretKey {
    let mut bytes = Zeroizing::new([0u8; 32]);
    loop {
        OsRng.fill_bytes(&mut bytes[..]);
        // Out-of-range scalars occur with probability ~2^-128.
        if let Ok(sk) = SecretKey::from_slice(&bytes[..]) {
            return sk;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_derives_network_address() {
        let custody = KeyCustody::new(NetworkParams::testnet());
        let wallet = custody.generate(&EncryptionKey::generate()).unwrap();
        assert!(wallet.address.starts_with('m') || wallet.address.starts_with('n'));
        assert!(NetworkParams::testnet().is_valid_address(&wallet.address));
    }

    #[test]
    fn test_unseal_matches_public_key() {
        let key = EncryptionKey::generate();
        let wallet = KeyCustody::new(NetworkParams::mainnet()).generate(&key).unwrap();
        let unsealed = KeyCustody::unseal(&wallet.sealed_key, &key).unwrap();
        assert_eq!(unsealed.public_key().unwrap(), wallet.public_key);
        assert!(wallet.verify_sealed_key(&key).unwrap());
    }

    #[test]
    fn test_unseal_with_wrong_key() {
        let wallet = KeyCustody::new(NetworkParams::testnet())
            .generate(&EncryptionKey::generate())
            .unwrap();
        let err = KeyCustody::unseal(&wallet.sealed_key, &EncryptionKey::generate()).unwrap_err();
        assert!(matches!(err, EscrowError::Decryption));
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let key = EncryptionKey::generate();
        let mut wallet = KeyCustody::new(NetworkParams::testnet()).generate(&key).unwrap();
        wallet.sealed_key.ciphertext[7] ^= 0x80;
        assert!(matches!(
            KeyCustody::unseal(&wallet.sealed_key, &key).unwrap_err(),
            EscrowError::Decryption
        ));
    }

    #[test]
    fn test_with_unsealed_propagates_closure_error() {
        let key = EncryptionKey::generate();
        let wallet = KeyCustody::new(NetworkParams::testnet()).generate(&key).unwrap();
        let res: Result<()> = KeyCustody::with_unsealed(&wallet.sealed_key, &key, |_| {
            Err(EscrowError::Signing("boom".into()))
        });
        assert!(matches!(res, Err(EscrowError::Signing(_))));
    }

    #[test]
    fn test_wif_export() {
        // Private key 1 on mainnet, compressed.
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        let key = EncryptionKey::generate();
        let sealed = SealedSecret::seal(&bytes, &key).unwrap();
        let unsealed = KeyCustody::unseal(&sealed, &key).unwrap();
        assert_eq!(
            unsealed.to_wif(&NetworkParams::mainnet()).as_str(),
            "KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn"
        );
        assert_eq!(format!("{unsealed:?}"), "UnsealedKey(<redacted>)");
    }

    #[test]
    fn test_unseal_rejects_out_of_range_scalar() {
        let key = EncryptionKey::generate();
        for scalar in [[0u8; 32], [0xff; 32]] {
            let sealed = SealedSecret::seal(&scalar, &key).unwrap();
            assert!(matches!(KeyCustody::unseal(&sealed, &key), Err(EscrowError::Decryption)));
            let res: Result<()> = KeyCustody::with_unsealed(&sealed, &key, |_| Ok(()));
            assert!(matches!(res, Err(EscrowError::Decryption)));
        }
    }
}
