//! utxo-escrow: escrow custody and payout engine for UTXO chains.
//!
//! # Architecture
//!
//! ```text
//! KeyCustody (fresh key, sealed at rest)
//!   │
//!   ├── SpendingCondition ──► EscrowScript (address, redeem script)
//!   │
//!   └── Escrow (state machine)
//!         ├── DepositTracker ──► UtxoProvider      (injected)
//!         ├── TxBuilder      ──► Signer(s)         (custody or co-signer)
//!         └── settle/refund  ──► Broadcaster       (injected)
//!
//! AttestationSigner (off-chain reward claims, same sealed-key custody)
//! ```
//!
//! The core is synchronous. Every chain difference lives in one
//! [`NetworkParams`] value passed in at construction.
//!
//! # Lifecycle
//!
//! | State | Entered by | Next |
//! |-------|-----------|------|
//! | Created | `Escrow::new` | AwaitingDeposits |
//! | AwaitingDeposits | `open` | Funded, Refunded |
//! | Funded | `record_deposits` / `poll_deposits` | Settled |
//! | Settled | `settle` | terminal |
//! | Refunded | `refund` (time lock only) | terminal |
//!
//! # Features
//!
//! - `native` - logging initialisation and the `escrowd` CLI
//!
//! # Usage
//!
//! ```ignore
//! use utxo_escrow::{CustodySigner, DepositTracker, EncryptionKey, EngineConfig, Escrow,
//!     KeyCustody, PartyContribution, PayoutRequest, TxBuilder};
//!
//! let config = EngineConfig::testnet();
//! let key = EncryptionKey::generate();
//! let wallet = KeyCustody::new(config.network.clone()).generate(&key)?;
//! let mut escrow = Escrow::single_key(wallet.clone(), vec![
//!     PartyContribution::new("alice", 5_000_000),
//!     PartyContribution::new("bob", 5_000_000),
//! ])?;
//! escrow.open()?;
//!
//! let tracker = DepositTracker::new(provider, &config);
//! escrow.poll_deposits(&tracker)?;
//!
//! let signer = CustodySigner::new(&wallet, &key);
//! let tx = escrow.settle(&tracker, &TxBuilder::new(config), &PayoutRequest::new(winner, 5.0),
//!     &[&signer], &broadcaster)?;
//! ```

pub mod attestation;
pub mod config;
pub mod custody;
pub mod deposit;
pub mod error;
pub mod escrow;
pub mod network;
pub mod provider;
pub mod script;
pub mod tx;

#[cfg(feature = "native")]
pub mod logging;

// =============================================================================
// Re-exports
// =============================================================================
pub use attestation::{AttestationSigner, RewardAttestation};
pub use config::EngineConfig;
pub use custody::{EncryptionKey, EscrowWallet, KeyCustody, SealedSecret, UnsealedKey};
pub use deposit::{DepositStatus, DepositTracker, PartyContribution, PartyDeposit};
pub use error::{BroadcastError, EscrowError, ProviderError, Result};
pub use escrow::{Escrow, EscrowState};
pub use network::NetworkParams;
pub use provider::{Broadcaster, Utxo, UtxoProvider};
pub use script::{EscrowScript, MultiSig, SpendPath, SpendingCondition};
pub use tx::{CustodySigner, FeeModel, KeySigner, PayoutPlan, PayoutRequest, SignedTransaction, Signer, TxBuilder};
