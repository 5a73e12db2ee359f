//! Escrow State Machine - the single permitted lifecycle of one escrow.
//!
//! ```text
//! Created ──open──► AwaitingDeposits ──deposits met──► Funded ──settle──► Settled
//!                          │
//!                          └──refund (time lock reached)──► Refunded
//! ```
//!
//! `Settled` and `Refunded` are terminal. Every transition takes `&mut self`,
//! so one escrow has one writer; callers serialize access across threads.
//! A failed broadcast leaves the state untouched and is safe to retry.

use std::fmt;

use bitcoin::Txid;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::custody::EscrowWallet;
use crate::deposit::{DepositStatus, DepositTracker, PartyContribution};
use crate::error::{EscrowError, Result};
use crate::provider::{Broadcaster, UtxoProvider};
use crate::script::{SpendPath, SpendingCondition};
use crate::tx::{PayoutRequest, SignedTransaction, Signer, TxBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowState {
    Created,
    AwaitingDeposits,
    Funded,
    Settled,
    Refunded,
}

impl EscrowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Settled | Self::Refunded)
    }

    pub fn can_transition_to(self, next: EscrowState) -> bool {
        use EscrowState::*;
        matches!(
            (self, next),
            (Created, AwaitingDeposits) | (AwaitingDeposits, Funded) | (Funded, Settled) | (AwaitingDeposits, Refunded)
        )
    }
}

impl fmt::Display for EscrowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::AwaitingDeposits => "awaiting_deposits",
            Self::Funded => "funded",
            Self::Settled => "settled",
            Self::Refunded => "refunded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "EscrowRecord")]
pub struct Escrow {
    wallet: EscrowWallet,
    condition: SpendingCondition,
    /// Address the parties fund; derived from `condition`.
    address: String,
    parties: Vec<PartyContribution>,
    state: EscrowState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    spend_txid: Option<Txid>,
}

/// Stored form of an [`Escrow`]. Loading re-runs the constructor checks, so a
/// stale or edited record cannot pair one address with another condition.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EscrowRecord {
    wallet: EscrowWallet,
    condition: SpendingCondition,
    address: String,
    parties: Vec<PartyContribution>,
    state: EscrowState,
    #[serde(default)]
    spend_txid: Option<Txid>,
}

impl TryFrom<EscrowRecord> for Escrow {
    type Error = EscrowError;

    fn try_from(record: EscrowRecord) -> Result<Self> {
        let mut escrow = Escrow::new(record.wallet, record.condition, record.parties)?;
        if record.address != escrow.address {
            return Err(EscrowError::InvalidConfig(format!(
                "stored address {} does not match condition address {}",
                record.address, escrow.address
            )));
        }
        if record.state.is_terminal() != record.spend_txid.is_some() {
            return Err(EscrowError::InvalidConfig(format!(
                "escrow {} is {} but spend txid is {}",
                escrow.address,
                record.state,
                if record.spend_txid.is_some() { "set" } else { "missing" }
            )));
        }
        escrow.state = record.state;
        escrow.spend_txid = record.spend_txid;
        Ok(escrow)
    }
}

impl Escrow {
    /// New escrow in `Created`. The condition is validated and its address
    /// derived up front, so a bad threshold or lock height never reaches funding.
    pub fn new(wallet: EscrowWallet, condition: SpendingCondition, parties: Vec<PartyContribution>) -> Result<Self> {
        if parties.is_empty() {
            return Err(EscrowError::InvalidConfig("escrow needs at least one party".into()));
        }
        condition.validate()?;
        let address = condition.address(&wallet.network)?;
        Ok(Self { wallet, condition, address, parties, state: EscrowState::Created, spend_txid: None })
    }

    /// Custodial single-key escrow paying from the wallet's own address.
    pub fn single_key(wallet: EscrowWallet, parties: Vec<PartyContribution>) -> Result<Self> {
        let condition = SpendingCondition::SingleKey { pubkey: wallet.public_key };
        Self::new(wallet, condition, parties)
    }

    pub fn address(&self) -> &str { &self.address }
    pub fn wallet(&self) -> &EscrowWallet { &self.wallet }
    pub fn condition(&self) -> &SpendingCondition { &self.condition }
    pub fn parties(&self) -> &[PartyContribution] { &self.parties }
    pub fn state(&self) -> EscrowState { self.state }

    /// Txid of the settlement or refund, once broadcast.
    pub fn spend_txid(&self) -> Option<Txid> { self.spend_txid }

    /// Created -> AwaitingDeposits: the address is handed out to the parties.
    pub fn open(&mut self) -> Result<()> {
        self.transition(EscrowState::AwaitingDeposits, "open for deposits")
    }

    /// Apply a deposit check. Moves to `Funded` once every party's cumulative
    /// threshold is met; returns whether it did.
    pub fn record_deposits(&mut self, status: &DepositStatus) -> Result<bool> {
        self.guard(EscrowState::Funded, "record deposits")?;
        if status.address != self.address {
            return Err(EscrowError::InvalidConfig(format!(
                "deposit status is for {}, escrow address is {}",
                status.address, self.address
            )));
        }
        if !status.all_satisfied() {
            return Ok(false);
        }
        self.transition(EscrowState::Funded, "record deposits")?;
        Ok(true)
    }

    /// Query the tracker and apply the result.
    pub fn poll_deposits<P: UtxoProvider>(&mut self, tracker: &DepositTracker<P>) -> Result<DepositStatus> {
        self.guard(EscrowState::Funded, "poll deposits")?;
        let status = tracker.check_deposit(&self.address, &self.parties)?;
        self.record_deposits(&status)?;
        Ok(status)
    }

    /// Funded -> Settled. Spends every confirmed escrow UTXO along the primary
    /// path and broadcasts it.
    pub fn settle<P: UtxoProvider, B: Broadcaster>(
        &mut self,
        tracker: &DepositTracker<P>,
        builder: &TxBuilder,
        request: &PayoutRequest,
        signers: &[&dyn Signer],
        broadcaster: &B,
    ) -> Result<SignedTransaction> {
        self.guard(EscrowState::Settled, "settle")?;
        let request = request.clone().with_path(SpendPath::Primary);
        self.spend(tracker, builder, &request, signers, broadcaster, EscrowState::Settled)
    }

    /// AwaitingDeposits -> Refunded. Time-locked escrows only: the fallback
    /// signers reclaim the deposits once `current_height` reaches the lock.
    pub fn refund<P: UtxoProvider, B: Broadcaster>(
        &mut self,
        tracker: &DepositTracker<P>,
        builder: &TxBuilder,
        request: &PayoutRequest,
        signers: &[&dyn Signer],
        broadcaster: &B,
        current_height: u32,
    ) -> Result<SignedTransaction> {
        self.guard(EscrowState::Refunded, "refund")?;
        let lock_height = self.condition.lock_height().ok_or(EscrowError::IllegalTransition {
            from: self.state,
            attempted: "refund without a time lock",
        })?;
        if current_height < lock_height {
            return Err(EscrowError::LockTimeNotReached { lock_height, current_height });
        }
        let request = request.clone().with_path(SpendPath::Fallback);
        self.spend(tracker, builder, &request, signers, broadcaster, EscrowState::Refunded)
    }

    fn spend<P: UtxoProvider, B: Broadcaster>(
        &mut self,
        tracker: &DepositTracker<P>,
        builder: &TxBuilder,
        request: &PayoutRequest,
        signers: &[&dyn Signer],
        broadcaster: &B,
        next: EscrowState,
    ) -> Result<SignedTransaction> {
        let utxos = tracker.fetch_spendable(&self.address)?;
        let signed = builder.build_payout(&utxos, &self.condition, request, signers)?;

        let accepted = broadcaster.broadcast(&signed.raw_hex)?;
        if accepted != signed.txid {
            warn!(local = %signed.txid, reported = %accepted, "broadcaster reported a different txid");
        }

        self.spend_txid = Some(signed.txid);
        self.transition(next, "spend")?;
        Ok(signed)
    }

    /// Reject moves from terminal or out-of-order states before any work is done.
    fn guard(&self, next: EscrowState, attempted: &'static str) -> Result<()> {
        if self.state.is_terminal() {
            return Err(EscrowError::AlreadySettled { state: self.state });
        }
        if !self.state.can_transition_to(next) {
            return Err(EscrowError::IllegalTransition { from: self.state, attempted });
        }
        Ok(())
    }

    fn transition(&mut self, next: EscrowState, attempted: &'static str) -> Result<()> {
        self.guard(next, attempted)?;
        info!(address = %self.address, from = %self.state, to = %next, "escrow transition");
        self.state = next;
        Ok(())
    }
}
