//! Attestation Signer - off-chain "address X is owed Y" claims.
//!
//! Canonical message, the only thing that is ever signed:
//!
//! ```text
//! <claimant>|<amount_sats>|<context>
//! ```
//!
//! It is hashed the way Bitcoin-family wallets hash signed messages,
//! `sha256d(varint(len(prefix)) || prefix || varint(len(msg)) || msg)` with the
//! network's message prefix, and signed with a 64-byte compact ECDSA signature.
//! Signer and verifier both go through [`canonical_message`] and [`message_hash`].

use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::secp256k1::{ecdsa, Message, Secp256k1};
use bitcoin::PublicKey;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::custody::{EncryptionKey, EscrowWallet, KeyCustody};
use crate::error::{EscrowError, Result};
use crate::network::NetworkParams;

const DELIMITER: char = '|';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardAttestation {
    pub claimant: String,
    pub amount_sats: u64,
    pub message: String,
    /// Hex of the 64-byte compact signature.
    pub signature: String,
}

impl RewardAttestation {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| EscrowError::InvalidConfig(format!("attestation json: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| EscrowError::InvalidConfig(format!("attestation json: {e}")))
    }

    /// Context part of the signed message, if the message is well formed.
    pub fn context(&self) -> Option<&str> {
        let mut parts = self.message.splitn(3, DELIMITER);
        let (_, _, context) = (parts.next()?, parts.next()?, parts.next()?);
        Some(context)
    }
}

pub fn canonical_message(claimant: &str, amount_sats: u64, context: &str) -> String {
    format!("{claimant}{DELIMITER}{amount_sats}{DELIMITER}{context}")
}

pub fn message_hash(message: &str, network: &NetworkParams) -> sha256d::Hash {
    let mut preimage = serialize(&network.message_prefix.as_bytes().to_vec());
    preimage.extend(serialize(&message.as_bytes().to_vec()));
    sha256d::Hash::hash(&preimage)
}

/// Signs attestations with the operator's sealed key.
#[derive(Debug, Clone)]
pub struct AttestationSigner {
    operator: EscrowWallet,
}

impl AttestationSigner {
    pub fn new(operator: EscrowWallet) -> Self { Self { operator } }

    pub fn public_key(&self) -> PublicKey { self.operator.public_key }

    pub fn sign(&self, key: &EncryptionKey, claimant: &str, amount_sats: u64, context: &str) -> Result<RewardAttestation> {
        let network = &self.operator.network;
        network.script_pubkey_for(claimant)?;
        if claimant.contains(DELIMITER) {
            return Err(EscrowError::InvalidAddress {
                address: claimant.to_string(),
                network: network.name.clone(),
                reason: format!("must not contain {DELIMITER:?}"),
            });
        }

        let message = canonical_message(claimant, amount_sats, context);
        let digest = Message::from_digest(message_hash(&message, network).to_byte_array());

        let signature = KeyCustody::with_unsealed(&self.operator.sealed_key, key, |sk| {
            let secp = Secp256k1::signing_only();
            if PublicKey::new(sk.public_key(&secp)) != self.operator.public_key {
                return Err(EscrowError::Signing("sealed key does not match operator public key".into()));
            }
            Ok(secp.sign_ecdsa(&digest, sk))
        })?;

        info!(%claimant, amount_sats, "reward attestation signed");
        Ok(RewardAttestation {
            claimant: claimant.to_string(),
            amount_sats,
            message,
            signature: hex::encode(signature.serialize_compact()),
        })
    }
}

/// Pure predicate: false on any mismatch or malformed field, never an error.
pub fn verify(attestation: &RewardAttestation, signer: &PublicKey, network: &NetworkParams) -> bool {
    let Some(context) = attestation.context() else {
        return false;
    };
    let expected = canonical_message(&attestation.claimant, attestation.amount_sats, context);
    if expected != attestation.message {
        debug!(claimant = %attestation.claimant, "attestation fields do not match message");
        return false;
    }

    let Ok(bytes) = hex::decode(&attestation.signature) else {
        return false;
    };
    let Ok(signature) = ecdsa::Signature::from_compact(&bytes) else {
        return false;
    };
    let digest = Message::from_digest(message_hash(&expected, network).to_byte_array());
    Secp256k1::verification_only().verify_ecdsa(&digest, &signature, &signer.inner).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLAIMANT: &str = "mrCDrCybB6J1vRfbwM5hemdJz73FwDBC8r";

    fn signed() -> (AttestationSigner, RewardAttestation) {
        let key = EncryptionKey::generate();
        let operator = KeyCustody::new(NetworkParams::testnet()).generate(&key).unwrap();
        let signer = AttestationSigner::new(operator);
        let att = signer.sign(&key, CLAIMANT, 25_000, "season-3").unwrap();
        (signer, att)
    }

    #[test]
    fn test_sign_and_verify() {
        let (signer, att) = signed();
        assert_eq!(att.message, format!("{CLAIMANT}|25000|season-3"));
        assert_eq!(att.signature.len(), 128);
        assert!(verify(&att, &signer.public_key(), &NetworkParams::testnet()));
    }

    #[test]
    fn test_signature_bit_flips_fail() {
        let (signer, att) = signed();
        let raw = hex::decode(&att.signature).unwrap();
        for byte in [0usize, 17, 40, 63] {
            for bit in [0u8, 3, 7] {
                let mut flipped = raw.clone();
                flipped[byte] ^= 1 << bit;
                let tampered = RewardAttestation { signature: hex::encode(&flipped), ..att.clone() };
                assert!(!verify(&tampered, &signer.public_key(), &NetworkParams::testnet()), "byte {byte} bit {bit}");
            }
        }
    }

    #[test]
    fn test_amount_bit_flips_fail() {
        let (signer, att) = signed();
        for bit in 0..64 {
            let tampered = RewardAttestation { amount_sats: att.amount_sats ^ (1 << bit), ..att.clone() };
            assert!(!verify(&tampered, &signer.public_key(), &NetworkParams::testnet()));
        }
    }

    #[test]
    fn test_claimant_change_fails() {
        let (signer, att) = signed();
        let mut bytes = att.claimant.clone().into_bytes();
        bytes[5] ^= 0x01;
        let tampered = RewardAttestation { claimant: String::from_utf8(bytes).unwrap(), ..att.clone() };
        assert!(!verify(&tampered, &signer.public_key(), &NetworkParams::testnet()));

        // message rewritten consistently, signature no longer covers it
        let forged_claimant = tampered.claimant.clone();
        let forged = RewardAttestation {
            message: canonical_message(&forged_claimant, att.amount_sats, "season-3"),
            ..tampered
        };
        assert!(!verify(&forged, &signer.public_key(), &NetworkParams::testnet()));
    }

    #[test]
    fn test_wrong_key_or_network_fails() {
        let (_, att) = signed();
        let other = KeyCustody::new(NetworkParams::testnet()).generate(&EncryptionKey::generate()).unwrap();
        assert!(!verify(&att, &other.public_key, &NetworkParams::testnet()));
    }

    #[test]
    fn test_message_prefix_is_part_of_hash() {
        let msg = canonical_message(CLAIMANT, 1, "x");
        assert_ne!(message_hash(&msg, &NetworkParams::testnet()), message_hash(&msg, &NetworkParams::dogecoin()));
    }

    #[test]
    fn test_invalid_claimant_rejected() {
        let key = EncryptionKey::generate();
        let operator = KeyCustody::new(NetworkParams::testnet()).generate(&key).unwrap();
        let signer = AttestationSigner::new(operator);
        assert!(matches!(
            signer.sign(&key, "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH", 1, "ctx"),
            Err(EscrowError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_garbage_signature_is_false() {
        let (signer, att) = signed();
        let tampered = RewardAttestation { signature: "zz".into(), ..att };
        assert!(!verify(&tampered, &signer.public_key(), &NetworkParams::testnet()));
    }

    #[test]
    fn test_wire_format() {
        let (_, att) = signed();
        let json: serde_json::Value = serde_json::from_str(&att.to_json().unwrap()).unwrap();
        assert_eq!(json["amountSats"], 25_000);
        assert_eq!(json["claimant"], CLAIMANT);
        assert_eq!(RewardAttestation::from_json(&json.to_string()).unwrap(), att);
    }
}
