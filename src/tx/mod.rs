//! Transaction Builder - spend every escrow UTXO to the payout recipient.
//!
//! ```text
//! PayoutRequest ──► plan_payout ──► PayoutPlan ──► sign ──► SignedTransaction
//!                    │                              │
//!                    ├── recipient decode            ├── legacy sighash per input
//!                    ├── all UTXOs, outpoint order   ├── m-of-n signers, script order
//!                    ├── linear vsize estimate       └── txid computed locally
//!                    └── fee / dust / change
//! ```
//!
//! There is no coin selection: every supplied UTXO is spent. Inputs are
//! ordered by outpoint so two builders given the same set in any order
//! produce byte-identical transactions.

mod fee;
mod signer;

pub use fee::{fee_for, FeeModel, MAX_MEMO_BYTES};
pub use signer::{CustodySigner, KeySigner, Signer};

use std::collections::HashSet;

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::opcodes::all::{OP_PUSHBYTES_0, OP_PUSHNUM_1};
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EscrowError, Result};
use crate::provider::Utxo;
use crate::script::{EscrowScript, SpendPath, SpendingCondition};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub recipient: String,
    pub fee_rate_sat_vb: f64,
    /// `None` settles everything; `Some` pays this much and returns change
    /// to the escrow address.
    #[serde(default)]
    pub amount_sats: Option<u64>,
    /// Payload of an extra zero-value OP_RETURN output.
    #[serde(default)]
    pub memo: Option<Vec<u8>>,
    #[serde(default)]
    pub path: SpendPath,
}

impl PayoutRequest {
    pub fn new(recipient: impl Into<String>, fee_rate_sat_vb: f64) -> Self {
        Self { recipient: recipient.into(), fee_rate_sat_vb, amount_sats: None, memo: None, path: SpendPath::Primary }
    }
    pub fn with_amount(mut self, sats: u64) -> Self { self.amount_sats = Some(sats); self }
    pub fn with_memo(mut self, memo: impl Into<Vec<u8>>) -> Self { self.memo = Some(memo.into()); self }
    pub fn with_path(mut self, path: SpendPath) -> Self { self.path = path; self }
}

/// Unsigned payout, fully determined by the inputs. Lets any party check
/// the fee and outputs before anything is signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutPlan {
    pub inputs: Vec<OutPoint>,
    pub total_input_sats: u64,
    pub payout_sats: u64,
    pub change_sats: Option<u64>,
    pub fee_sats: u64,
    pub estimated_vsize: u64,
    pub unsigned_tx: Transaction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub txid: Txid,
    pub raw_hex: String,
    pub total_input_sats: u64,
    pub payout_sats: u64,
    pub change_sats: Option<u64>,
    pub fee_sats: u64,
    pub estimated_vsize: u64,
    pub tx: Transaction,
}

#[derive(Debug, Clone)]
pub struct TxBuilder {
    config: EngineConfig,
}

impl TxBuilder {
    pub fn new(config: EngineConfig) -> Self { Self { config } }

    pub fn config(&self) -> &EngineConfig { &self.config }

    /// Compute inputs, fee and outputs without signing.
    pub fn plan_payout(&self, utxos: &[Utxo], condition: &SpendingCondition, request: &PayoutRequest) -> Result<PayoutPlan> {
        let network = &self.config.network;
        let recipient_spk = network.script_pubkey_for(&request.recipient)?;
        fee::validate_fee_rate(request.fee_rate_sat_vb)?;
        if let Some(memo) = &request.memo {
            if memo.len() > MAX_MEMO_BYTES {
                return Err(EscrowError::InvalidConfig(format!(
                    "memo is {} bytes, limit is {MAX_MEMO_BYTES}",
                    memo.len()
                )));
            }
        }
        condition.validate()?;
        let script = condition.script(network)?;
        let input_vbytes = self.config.fee_model.input_vbytes(condition, &script, request.path)?;

        let inputs = ordered_inputs(utxos, &script)?;
        let total_input_sats = utxos
            .iter()
            .try_fold(0u64, |acc, u| acc.checked_add(u.value_sats))
            .ok_or_else(|| EscrowError::InvalidConfig("input total overflows u64".into()))?;

        let dust = self.config.dust_threshold_sats;
        let data_len = request.memo.as_ref().map(Vec::len);
        let output_count = if request.amount_sats.is_some() { 2 } else { 1 };
        let estimated_vsize = self.config.fee_model.estimate_vsize(inputs.len(), input_vbytes, output_count, data_len);
        let fee_sats = fee_for(estimated_vsize, request.fee_rate_sat_vb)?;

        let (payout_sats, change_sats) = match request.amount_sats {
            None => {
                let needed = fee_sats.saturating_add(dust);
                self.ensure_funds(needed, 0, total_input_sats, fee_sats)?;
                (total_input_sats - fee_sats, None)
            }
            Some(amount) => {
                if amount < dust {
                    return Err(EscrowError::InvalidConfig(format!(
                        "partial payout of {amount} sats is below the dust threshold of {dust}"
                    )));
                }
                // change must clear dust as well
                let needed = amount.saturating_add(fee_sats).saturating_add(dust);
                self.ensure_funds(needed, amount, total_input_sats, fee_sats)?;
                (amount, Some(total_input_sats - amount - fee_sats))
            }
        };

        debug!(
            inputs = inputs.len(),
            total = total_input_sats,
            vsize = estimated_vsize,
            fee = fee_sats,
            payout = payout_sats,
            change = ?change_sats,
            "payout planned"
        );

        let mut output = vec![TxOut { value: Amount::from_sat(payout_sats), script_pubkey: recipient_spk }];
        if let Some(change) = change_sats {
            output.push(TxOut { value: Amount::from_sat(change), script_pubkey: script.script_pubkey.clone() });
        }
        if let Some(memo) = &request.memo {
            output.push(TxOut { value: Amount::ZERO, script_pubkey: op_return(memo)? });
        }

        let (lock_time, sequence) = match request.path {
            SpendPath::Primary => (LockTime::ZERO, Sequence::MAX),
            SpendPath::Fallback => {
                let height = condition.lock_height().unwrap_or_default();
                let lock_time = LockTime::from_height(height).map_err(|_| EscrowError::InvalidLockTime {
                    lock_height: height,
                    reason: "not a block height",
                })?;
                (lock_time, Sequence::ENABLE_LOCKTIME_NO_RBF)
            }
        };

        let unsigned_tx = Transaction {
            version: Version::TWO,
            lock_time,
            input: inputs
                .iter()
                .map(|outpoint| TxIn {
                    previous_output: *outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence,
                    witness: Witness::new(),
                })
                .collect(),
            output,
        };

        Ok(PayoutPlan { inputs, total_input_sats, payout_sats, change_sats, fee_sats, estimated_vsize, unsigned_tx })
    }

    /// Build, sign and serialize the payout.
    ///
    /// Single-key inputs are signed once; script-hash inputs collect exactly
    /// `m` signatures from `signers`, in the order their keys appear in the
    /// redeem script.
    pub fn build_payout(
        &self,
        utxos: &[Utxo],
        condition: &SpendingCondition,
        request: &PayoutRequest,
        signers: &[&dyn Signer],
    ) -> Result<SignedTransaction> {
        let plan = self.plan_payout(utxos, condition, request)?;
        let script = condition.script(&self.config.network)?;
        let (required, keys) = condition.signing_keys(request.path)?;
        let selected = signer::select_signers(keys, required, signers)?;

        let mut tx = plan.unsigned_tx;
        let script_sigs = {
            let cache = SighashCache::new(&tx);
            (0..tx.input.len())
                .map(|index| {
                    let sighash = cache
                        .legacy_signature_hash(index, script.script_code(), EcdsaSighashType::All.to_u32())
                        .map_err(|e| EscrowError::Signing(e.to_string()))?;
                    let signatures = selected
                        .iter()
                        .map(|s| s.sign(sighash).map(|sig| sig.to_vec()))
                        .collect::<Result<Vec<_>>>()?;
                    script_sig(condition, &script, request.path, signatures)
                })
                .collect::<Result<Vec<_>>>()?
        };
        for (input, script_sig) in tx.input.iter_mut().zip(script_sigs) {
            input.script_sig = script_sig;
        }

        let txid = tx.compute_txid();
        let raw_hex = serialize_hex(&tx);
        info!(%txid, payout = plan.payout_sats, fee = plan.fee_sats, recipient = %request.recipient, "payout signed");

        Ok(SignedTransaction {
            txid,
            raw_hex,
            total_input_sats: plan.total_input_sats,
            payout_sats: plan.payout_sats,
            change_sats: plan.change_sats,
            fee_sats: plan.fee_sats,
            estimated_vsize: plan.estimated_vsize,
            tx,
        })
    }

    fn ensure_funds(&self, needed: u64, requested_sats: u64, available: u64, fee: u64) -> Result<()> {
        if available >= needed {
            return Ok(());
        }
        let shortfall = needed - available;
        warn!(needed, requested_sats, available, shortfall, "insufficient funds for payout");
        Err(EscrowError::InsufficientFunds {
            needed,
            requested_sats,
            available,
            fee,
            dust_threshold: self.config.dust_threshold_sats,
            shortfall,
        })
    }
}

/// Every outpoint once, sorted; each must be locked by the escrow script when
/// the provider reported its script.
fn ordered_inputs(utxos: &[Utxo], script: &EscrowScript) -> Result<Vec<OutPoint>> {
    let mut seen = HashSet::with_capacity(utxos.len());
    for utxo in utxos {
        if !seen.insert(utxo.outpoint()) {
            return Err(EscrowError::DuplicateInput { txid: utxo.txid.to_string(), vout: utxo.vout });
        }
        if let Some(spk) = &utxo.script_pubkey {
            if spk != &script.script_pubkey {
                return Err(EscrowError::InvalidConfig(format!(
                    "utxo {}:{} is not locked to {}",
                    utxo.txid, utxo.vout, script.address
                )));
            }
        }
    }
    let mut inputs: Vec<OutPoint> = seen.into_iter().collect();
    inputs.sort();
    Ok(inputs)
}

fn op_return(memo: &[u8]) -> Result<ScriptBuf> {
    let data = PushBytesBuf::try_from(memo.to_vec()).map_err(|e| EscrowError::InvalidConfig(e.to_string()))?;
    Ok(ScriptBuf::new_op_return(data))
}

fn push_bytes(builder: Builder, bytes: Vec<u8>) -> Result<Builder> {
    let data = PushBytesBuf::try_from(bytes).map_err(|e| EscrowError::Signing(e.to_string()))?;
    Ok(builder.push_slice(data))
}

/// Unlocking script for one input.
///
/// - single key: `<sig> <pubkey>`
/// - multisig: `OP_0 <sig_1> .. <sig_m> <redeem>`
/// - time lock, primary: `<sig> OP_TRUE <redeem>`
/// - time lock, fallback: `OP_0 <sig_1> .. <sig_m> OP_FALSE <redeem>`
fn script_sig(
    condition: &SpendingCondition,
    script: &EscrowScript,
    path: SpendPath,
    signatures: Vec<Vec<u8>>,
) -> Result<ScriptBuf> {
    let mut builder = Builder::new();

    if let SpendingCondition::SingleKey { pubkey } = condition {
        for sig in signatures {
            builder = push_bytes(builder, sig)?;
        }
        return Ok(builder.push_key(pubkey).into_script());
    }

    let needs_dummy = matches!(
        (condition, path),
        (SpendingCondition::MultiSig(_), _) | (SpendingCondition::TimeLocked { .. }, SpendPath::Fallback)
    );
    if needs_dummy {
        builder = builder.push_opcode(OP_PUSHBYTES_0);
    }
    for sig in signatures {
        builder = push_bytes(builder, sig)?;
    }
    match (condition, path) {
        (SpendingCondition::TimeLocked { .. }, SpendPath::Primary) => builder = builder.push_opcode(OP_PUSHNUM_1),
        (SpendingCondition::TimeLocked { .. }, SpendPath::Fallback) => builder = builder.push_opcode(OP_PUSHBYTES_0),
        _ => {}
    }

    let redeem = script
        .redeem_script
        .as_ref()
        .ok_or_else(|| EscrowError::InvalidConfig("script-hash condition without redeem script".into()))?;
    Ok(push_bytes(builder, redeem.to_bytes())?.into_script())
}
