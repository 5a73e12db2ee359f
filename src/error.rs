//! Error taxonomy for the escrow engine.
//!
//! Every variant carries the context needed to render a precise message
//! (amounts, addresses, states) without re-deriving it.

use thiserror::Error;

use crate::escrow::EscrowState;

pub type Result<T> = std::result::Result<T, EscrowError>;

/// Failure reported by a UTXO provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("UTXO provider failed for {address}: {reason}")]
pub struct ProviderError {
    pub address: String,
    pub reason: String,
}

impl ProviderError {
    pub fn new(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { address: address.into(), reason: reason.into() }
    }
}

/// Failure reported by a broadcaster.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("broadcast rejected: {reason}")]
pub struct BroadcastError {
    pub reason: String,
}

impl BroadcastError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[derive(Debug, Error)]
pub enum EscrowError {
    #[error("sealed key failed authentication")]
    Decryption,

    #[error("malformed sealed key: {0}")]
    MalformedSealedKey(String),

    #[error("invalid multisig threshold: {m}-of-{n} (need 1 <= m <= n <= 16)")]
    InvalidThreshold { m: usize, n: usize },

    #[error("invalid lock height {lock_height}: {reason}")]
    InvalidLockTime { lock_height: u32, reason: &'static str },

    #[error("invalid address {address:?} for {network}: {reason}")]
    InvalidAddress {
        address: String,
        network: String,
        reason: String,
    },

    #[error("redeem script is {size} bytes, limit is {max}")]
    ScriptTooLarge { size: usize, max: usize },

    #[error("invalid fee rate {0} sat/vB")]
    InvalidFeeRate(f64),

    #[error("outpoint {txid}:{vout} supplied more than once")]
    DuplicateInput { txid: String, vout: u32 },

    #[error(
        "insufficient funds: {needed} sats needed (requested payout {requested_sats} + fee {fee} \
         + minimum output {dust_threshold}), {available} available, short by {shortfall} sats"
    )]
    InsufficientFunds {
        needed: u64,
        /// Partial payout amount; 0 when settling everything, where the payout
        /// itself is the output that must clear dust.
        requested_sats: u64,
        available: u64,
        fee: u64,
        dust_threshold: u64,
        shortfall: u64,
    },

    #[error("need {required} signatures, only {provided} matching signers supplied")]
    InsufficientSigners { required: usize, provided: usize },

    #[error("signer {pubkey} does not match any key of the spending condition")]
    UnknownSigner { pubkey: String },

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("UTXO provider unavailable: {0}")]
    ProviderUnavailable(#[from] ProviderError),

    #[error(transparent)]
    Broadcast(#[from] BroadcastError),

    #[error("illegal transition: cannot {attempted} while {from}")]
    IllegalTransition {
        from: EscrowState,
        attempted: &'static str,
    },

    #[error("escrow already {state}; refusing to spend again")]
    AlreadySettled { state: EscrowState },

    #[error("lock height {lock_height} not reached (current height {current_height})")]
    LockTimeNotReached { lock_height: u32, current_height: u32 },

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl EscrowError {
    /// External dependency failures the caller may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_) | Self::Broadcast(_))
    }
}
