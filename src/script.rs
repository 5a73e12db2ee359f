//! Script Builder - spending conditions and their script-hash addresses.
//!
//! Each `SpendingCondition` variant maps to exactly one script and one address
//! through a pure function; the same public keys always yield the same bytes.
//!
//! Multisig (P2SH):
//!
//! ```text
//! <m> <pk_1> ... <pk_n> <n> OP_CHECKMULTISIG
//! ```
//!
//! Time-locked (P2SH):
//!
//! ```text
//! OP_IF
//!   <primary> OP_CHECKSIG                          // operator settles any time
//! OP_ELSE
//!   <lock_height> OP_CHECKLOCKTIMEVERIFY OP_DROP   // absolute block height
//!   <m> <pk_1> ... <pk_n> <n> OP_CHECKMULTISIG     // parties self-refund
//! OP_ENDIF
//! ```

use bitcoin::opcodes::all::{
    OP_CHECKMULTISIG, OP_CHECKSIG, OP_CLTV, OP_DROP, OP_ELSE, OP_ENDIF, OP_IF,
};
use bitcoin::script::Builder;
use bitcoin::{PublicKey, ScriptBuf};
use serde::{Deserialize, Serialize};

use crate::error::{EscrowError, Result};
use crate::network::NetworkParams;

pub const MAX_MULTISIG_KEYS: usize = 16;
/// Consensus limit on a pushed P2SH redeem script.
pub const MAX_REDEEM_SCRIPT_SIZE: usize = 520;
/// nLockTime values at or above this are unix timestamps, not heights.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// m-of-n key set. Key order is significant and preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiSig {
    pub m: usize,
    pub pubkeys: Vec<PublicKey>,
}

impl MultiSig {
    pub fn new(m: usize, pubkeys: Vec<PublicKey>) -> Result<Self> {
        let multisig = Self { m, pubkeys };
        multisig.validate()?;
        Ok(multisig)
    }

    pub fn n(&self) -> usize { self.pubkeys.len() }

    pub fn validate(&self) -> Result<()> {
        let n = self.pubkeys.len();
        if self.m == 0 || self.m > n || n > MAX_MULTISIG_KEYS {
            return Err(EscrowError::InvalidThreshold { m: self.m, n });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpendingCondition {
    /// Server-custodied key, plain P2PKH.
    SingleKey { pubkey: PublicKey },
    MultiSig(MultiSig),
    /// Primary key at any time, or the fallback set once `lock_height` is reached.
    TimeLocked {
        primary: PublicKey,
        lock_height: u32,
        fallback: MultiSig,
    },
}

/// Which branch of a spending condition a transaction satisfies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpendPath {
    /// Single key, the multisig itself, or the IF branch of a time lock.
    #[default]
    Primary,
    /// ELSE branch of a time lock.
    Fallback,
}

/// Locking material derived from a spending condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowScript {
    pub address: String,
    pub script_pubkey: ScriptBuf,
    /// Present for script-hash conditions.
    pub redeem_script: Option<ScriptBuf>,
}

impl EscrowScript {
    /// Script committed to by legacy signature hashes.
    pub fn script_code(&self) -> &ScriptBuf {
        self.redeem_script.as_ref().unwrap_or(&self.script_pubkey)
    }
}

impl SpendingCondition {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::SingleKey { .. } => Ok(()),
            Self::MultiSig(multisig) => multisig.validate(),
            Self::TimeLocked { lock_height, fallback, .. } => {
                validate_lock_height(*lock_height)?;
                fallback.validate()
            }
        }
    }

    pub fn script(&self, network: &NetworkParams) -> Result<EscrowScript> {
        match self {
            Self::SingleKey { pubkey } => Ok(single_key(pubkey, network)),
            Self::MultiSig(multisig) => multisig_script(multisig.m, &multisig.pubkeys, network),
            Self::TimeLocked { primary, lock_height, fallback } => {
                time_locked(primary, *lock_height, fallback, network)
            }
        }
    }

    pub fn address(&self, network: &NetworkParams) -> Result<String> {
        Ok(self.script(network)?.address)
    }

    /// Keys that must sign for `path`, in script order, and how many of them.
    pub fn signing_keys(&self, path: SpendPath) -> Result<(usize, &[PublicKey])> {
        match (self, path) {
            (Self::SingleKey { pubkey }, SpendPath::Primary) => Ok((1, std::slice::from_ref(pubkey))),
            (Self::MultiSig(ms), SpendPath::Primary) => Ok((ms.m, &ms.pubkeys)),
            (Self::TimeLocked { primary, .. }, SpendPath::Primary) => {
                Ok((1, std::slice::from_ref(primary)))
            }
            (Self::TimeLocked { fallback, .. }, SpendPath::Fallback) => Ok((fallback.m, &fallback.pubkeys)),
            (_, SpendPath::Fallback) => Err(EscrowError::InvalidConfig(
                "fallback path exists only for time-locked conditions".into(),
            )),
        }
    }

    pub fn lock_height(&self) -> Option<u32> {
        match self {
            Self::TimeLocked { lock_height, .. } => Some(*lock_height),
            _ => None,
        }
    }
}

pub fn validate_lock_height(lock_height: u32) -> Result<()> {
    if lock_height == 0 {
        return Err(EscrowError::InvalidLockTime { lock_height, reason: "must be positive" });
    }
    if lock_height >= LOCKTIME_THRESHOLD {
        return Err(EscrowError::InvalidLockTime {
            lock_height,
            reason: "values >= 500000000 are timestamps, not block heights",
        });
    }
    Ok(())
}

/// P2PKH locking script for a single key.
pub fn single_key(pubkey: &PublicKey, network: &NetworkParams) -> EscrowScript {
    let hash = pubkey.pubkey_hash();
    EscrowScript {
        address: network.p2pkh_address(&hash),
        script_pubkey: ScriptBuf::new_p2pkh(&hash),
        redeem_script: None,
    }
}

pub fn multisig_redeem_script(m: usize, pubkeys: &[PublicKey]) -> Result<ScriptBuf> {
    let n = pubkeys.len();
    if m == 0 || m > n || n > MAX_MULTISIG_KEYS {
        return Err(EscrowError::InvalidThreshold { m, n });
    }
    Ok(push_multisig(Builder::new(), m, pubkeys).into_script())
}

/// m-of-n P2SH. Fails with `InvalidThreshold` unless `1 <= m <= n <= 16`.
pub fn multisig_script(m: usize, pubkeys: &[PublicKey], network: &NetworkParams) -> Result<EscrowScript> {
    let redeem = multisig_redeem_script(m, pubkeys)?;
    p2sh(redeem, network)
}

pub fn timelock_redeem_script(primary: &PublicKey, lock_height: u32, fallback: &MultiSig) -> Result<ScriptBuf> {
    validate_lock_height(lock_height)?;
    fallback.validate()?;

    let builder = Builder::new()
        .push_opcode(OP_IF)
        .push_key(primary)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ELSE)
        .push_int(i64::from(lock_height))
        .push_opcode(OP_CLTV)
        .push_opcode(OP_DROP);
    Ok(push_multisig(builder, fallback.m, &fallback.pubkeys)
        .push_opcode(OP_ENDIF)
        .into_script())
}

pub fn time_locked(
    primary: &PublicKey,
    lock_height: u32,
    fallback: &MultiSig,
    network: &NetworkParams,
) -> Result<EscrowScript> {
    let redeem = timelock_redeem_script(primary, lock_height, fallback)?;
    p2sh(redeem, network)
}

fn push_multisig(mut builder: Builder, m: usize, pubkeys: &[PublicKey]) -> Builder {
    builder = builder.push_int(m as i64);
    for pubkey in pubkeys {
        builder = builder.push_key(pubkey);
    }
    builder.push_int(pubkeys.len() as i64).push_opcode(OP_CHECKMULTISIG)
}

fn p2sh(redeem: ScriptBuf, network: &NetworkParams) -> Result<EscrowScript> {
    if redeem.len() > MAX_REDEEM_SCRIPT_SIZE {
        return Err(EscrowError::ScriptTooLarge { size: redeem.len(), max: MAX_REDEEM_SCRIPT_SIZE });
    }
    let hash = redeem.script_hash();
    Ok(EscrowScript {
        address: network.p2sh_address(&hash),
        script_pubkey: ScriptBuf::new_p2sh(&hash),
        redeem_script: Some(redeem),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};

    fn pubkey(seed: u8) -> PublicKey {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[seed; 32]).unwrap();
        PublicKey::new(sk.public_key(&secp))
    }

    fn three_keys() -> Vec<PublicKey> {
        vec![pubkey(1), pubkey(2), pubkey(3)]
    }

    #[test]
    fn test_multisig_layout() {
        let redeem = multisig_redeem_script(2, &three_keys()).unwrap();
        let bytes = redeem.as_bytes();
        assert_eq!(bytes.len(), 1 + 3 * 34 + 2);
        assert_eq!(bytes[0], 0x52); // OP_2
        assert_eq!(bytes[bytes.len() - 2], 0x53); // OP_3
        assert_eq!(bytes[bytes.len() - 1], 0xae); // OP_CHECKMULTISIG
    }

    #[test]
    fn test_multisig_deterministic() {
        let net = NetworkParams::testnet();
        let a = multisig_script(2, &three_keys(), &net).unwrap();
        let b = multisig_script(2, &three_keys(), &net).unwrap();
        assert_eq!(a, b);
        assert!(a.address.starts_with('2'));
        assert!(multisig_script(2, &three_keys(), &NetworkParams::mainnet())
            .unwrap()
            .address
            .starts_with('3'));
    }

    #[test]
    fn test_key_order_changes_address() {
        let net = NetworkParams::testnet();
        let mut reversed = three_keys();
        reversed.reverse();
        assert_ne!(
            multisig_script(2, &three_keys(), &net).unwrap().address,
            multisig_script(2, &reversed, &net).unwrap().address
        );
    }

    #[test]
    fn test_invalid_thresholds() {
        let net = NetworkParams::testnet();
        for (m, n) in [(0, 3), (4, 3), (1, 0)] {
            let keys: Vec<_> = (1..=n as u8).map(pubkey).collect();
            let err = multisig_script(m, &keys, &net).unwrap_err();
            assert!(matches!(err, EscrowError::InvalidThreshold { .. }), "{m}-of-{n}");
        }
        let seventeen: Vec<_> = (1..=17u8).map(pubkey).collect();
        assert!(matches!(
            multisig_script(1, &seventeen, &net).unwrap_err(),
            EscrowError::InvalidThreshold { m: 1, n: 17 }
        ));
    }

    #[test]
    fn test_sixteen_keys_exceed_p2sh_push_limit() {
        let keys: Vec<_> = (1..=16u8).map(pubkey).collect();
        let err = multisig_script(2, &keys, &NetworkParams::testnet()).unwrap_err();
        assert!(matches!(err, EscrowError::ScriptTooLarge { size: 547, max: 520 }));
        let fifteen: Vec<_> = (1..=15u8).map(pubkey).collect();
        assert!(multisig_script(2, &fifteen, &NetworkParams::testnet()).is_ok());
    }

    #[test]
    fn test_timelock_layout() {
        let fallback = MultiSig::new(2, vec![pubkey(2), pubkey(3)]).unwrap();
        let redeem = timelock_redeem_script(&pubkey(1), 800_000, &fallback).unwrap();
        let bytes = redeem.as_bytes();
        assert_eq!(bytes[0], 0x63); // OP_IF
        assert_eq!(bytes[1], 33);
        assert_eq!(bytes[35], 0xac); // OP_CHECKSIG
        assert_eq!(bytes[36], 0x67); // OP_ELSE
        // 800_000 = 0x0c3500, minimally encoded little-endian in 3 bytes
        assert_eq!(&bytes[37..41], &[0x03, 0x00, 0x35, 0x0c]);
        assert_eq!(bytes[41], 0xb1); // OP_CHECKLOCKTIMEVERIFY
        assert_eq!(bytes[42], 0x75); // OP_DROP
        assert_eq!(bytes[43], 0x52); // OP_2
        assert_eq!(bytes[bytes.len() - 2], 0xae);
        assert_eq!(bytes[bytes.len() - 1], 0x68); // OP_ENDIF
    }

    #[test]
    fn test_timelock_rejects_bad_heights() {
        let fallback = MultiSig::new(2, vec![pubkey(2), pubkey(3)]).unwrap();
        let net = NetworkParams::testnet();
        assert!(matches!(
            time_locked(&pubkey(1), 0, &fallback, &net).unwrap_err(),
            EscrowError::InvalidLockTime { lock_height: 0, .. }
        ));
        assert!(matches!(
            time_locked(&pubkey(1), LOCKTIME_THRESHOLD, &fallback, &net).unwrap_err(),
            EscrowError::InvalidLockTime { .. }
        ));
    }

    #[test]
    fn test_single_key_matches_p2pkh() {
        let net = NetworkParams::testnet();
        let script = SpendingCondition::SingleKey { pubkey: pubkey(1) }.script(&net).unwrap();
        assert!(script.script_pubkey.is_p2pkh());
        assert!(script.redeem_script.is_none());
        assert_eq!(script.script_code(), &script.script_pubkey);
        assert_eq!(net.script_pubkey_for(&script.address).unwrap(), script.script_pubkey);
    }

    #[test]
    fn test_signing_keys_per_path() {
        let fallback = MultiSig::new(2, vec![pubkey(2), pubkey(3)]).unwrap();
        let cond = SpendingCondition::TimeLocked { primary: pubkey(1), lock_height: 100, fallback };
        let (m, keys) = cond.signing_keys(SpendPath::Primary).unwrap();
        assert_eq!((m, keys.len()), (1, 1));
        let (m, keys) = cond.signing_keys(SpendPath::Fallback).unwrap();
        assert_eq!((m, keys.len()), (2, 2));
        assert!(SpendingCondition::SingleKey { pubkey: pubkey(1) }
            .signing_keys(SpendPath::Fallback)
            .is_err());
    }

    #[test]
    fn test_condition_serde_tagging() {
        let cond = SpendingCondition::MultiSig(MultiSig::new(2, three_keys()).unwrap());
        let json = serde_json::to_value(&cond).unwrap();
        assert_eq!(json["kind"], "multi_sig");
        let back: SpendingCondition = serde_json::from_value(json).unwrap();
        assert_eq!(back, cond);
    }
}
