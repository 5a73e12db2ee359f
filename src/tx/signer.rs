//! Signers - the builder never holds more than one key; signatures are
//! gathered from whoever controls each key.

use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use bitcoin::sighash::LegacySighash;
use bitcoin::PublicKey;

use crate::custody::{EncryptionKey, EscrowWallet, KeyCustody};
use crate::error::{EscrowError, Result};

pub trait Signer {
    fn public_key(&self) -> PublicKey;

    /// Produce a SIGHASH_ALL signature over a legacy signature hash.
    fn sign(&self, sighash: LegacySighash) -> Result<ecdsa::Signature>;
}

/// Signs with the escrow wallet's sealed key, unsealing it for each signature only.
pub struct CustodySigner<'a> {
    wallet: &'a EscrowWallet,
    key: &'a EncryptionKey,
}

impl<'a> CustodySigner<'a> {
    pub fn new(wallet: &'a EscrowWallet, key: &'a EncryptionKey) -> Self { Self { wallet, key } }
}

impl Signer for CustodySigner<'_> {
    fn public_key(&self) -> PublicKey { self.wallet.public_key }

    fn sign(&self, sighash: LegacySighash) -> Result<ecdsa::Signature> {
        KeyCustody::with_unsealed(&self.wallet.sealed_key, self.key, |sk| {
            let secp = Secp256k1::signing_only();
            if PublicKey::new(sk.public_key(&secp)) != self.wallet.public_key {
                return Err(EscrowError::Signing(format!(
                    "sealed key does not control {}",
                    self.wallet.address
                )));
            }
            Ok(sign_sighash(sk, sighash))
        })
    }
}

/// Caller-held key, e.g. a co-signer of a multisig fallback.
pub struct KeySigner {
    secret: SecretKey,
    public_key: PublicKey,
}

impl KeySigner {
    pub fn new(secret: SecretKey) -> Self {
        let public_key = PublicKey::new(secret.public_key(&Secp256k1::signing_only()));
        Self { secret, public_key }
    }
}

impl Drop for KeySigner {
    fn drop(&mut self) {
        self.secret.non_secure_erase();
    }
}

impl Signer for KeySigner {
    fn public_key(&self) -> PublicKey { self.public_key }

    fn sign(&self, sighash: LegacySighash) -> Result<ecdsa::Signature> {
        Ok(sign_sighash(&self.secret, sighash))
    }
}

/// RFC6979 deterministic ECDSA, so identical builds give identical bytes.
fn sign_sighash(secret: &SecretKey, sighash: LegacySighash) -> ecdsa::Signature {
    let secp = Secp256k1::signing_only();
    let msg = Message::from_digest(sighash.to_byte_array());
    ecdsa::Signature::sighash_all(secp.sign_ecdsa(&msg, secret))
}

/// Pick exactly `required` signers, in the order their keys appear in the script.
pub(crate) fn select_signers<'s>(
    keys: &[PublicKey],
    required: usize,
    signers: &[&'s dyn Signer],
) -> Result<Vec<&'s dyn Signer>> {
    if let Some(stranger) = signers.iter().find(|s| !keys.contains(&s.public_key())) {
        return Err(EscrowError::UnknownSigner { pubkey: stranger.public_key().to_string() });
    }

    let selected: Vec<&dyn Signer> = keys
        .iter()
        .filter_map(|key| signers.iter().find(|s| s.public_key() == *key).copied())
        .take(required)
        .collect();

    if selected.len() < required {
        return Err(EscrowError::InsufficientSigners { required, provided: selected.len() });
    }
    Ok(selected)
}
