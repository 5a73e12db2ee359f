//! Size-based fee estimation.
//!
//! The virtual size is an *estimate* from a linear model, not a byte-exact
//! measurement of the signed transaction:
//!
//! ```text
//! vsize = base_overhead + inputs * per_input + outputs * per_output (+ data output)
//! fee   = ceil(vsize * fee_rate)
//! ```
//!
//! Script-hash inputs are costed from their redeem script with worst-case
//! 72-byte DER signatures, so the estimate never undershoots the real size.

use serde::{Deserialize, Serialize};

use crate::error::{EscrowError, Result};
use crate::script::{EscrowScript, SpendPath, SpendingCondition};

/// Outpoint (36) + sequence (4).
const INPUT_FIXED_VBYTES: u64 = 40;
/// Push opcode + DER signature (<= 72 incl. sighash byte).
const SIGNATURE_PUSH_VBYTES: u64 = 73;
pub const MAX_MEMO_BYTES: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeModel {
    /// Version, locktime and input/output counts.
    pub base_overhead_vbytes: u64,
    pub p2pkh_input_vbytes: u64,
    pub output_vbytes: u64,
    /// OP_RETURN output before its payload bytes.
    pub data_output_base_vbytes: u64,
}

impl Default for FeeModel {
    fn default() -> Self {
        Self {
            base_overhead_vbytes: 10,
            p2pkh_input_vbytes: 148,
            output_vbytes: 34,
            data_output_base_vbytes: 11,
        }
    }
}

impl FeeModel {
    /// Per-input cost for spending `condition` along `path`.
    pub fn input_vbytes(&self, condition: &SpendingCondition, script: &EscrowScript, path: SpendPath) -> Result<u64> {
        let redeem_len = match (condition, &script.redeem_script) {
            (SpendingCondition::SingleKey { .. }, _) => return Ok(self.p2pkh_input_vbytes),
            (_, Some(redeem)) => redeem.len() as u64,
            (_, None) => {
                return Err(EscrowError::InvalidConfig("script-hash condition without redeem script".into()))
            }
        };
        let (required, _) = condition.signing_keys(path)?;

        let mut script_sig = required as u64 * SIGNATURE_PUSH_VBYTES + push_overhead(redeem_len) + redeem_len;
        match (condition, path) {
            // OP_0 for the CHECKMULTISIG off-by-one
            (SpendingCondition::MultiSig(_), _) => script_sig += 1,
            // branch selector
            (SpendingCondition::TimeLocked { .. }, SpendPath::Primary) => script_sig += 1,
            // OP_0 + branch selector
            (SpendingCondition::TimeLocked { .. }, SpendPath::Fallback) => script_sig += 2,
            (SpendingCondition::SingleKey { .. }, _) => {}
        }
        Ok(INPUT_FIXED_VBYTES + compact_size_len(script_sig) + script_sig)
    }

    pub fn estimate_vsize(&self, input_count: usize, input_vbytes: u64, output_count: usize, data_len: Option<usize>) -> u64 {
        let data = data_len.map_or(0, |len| self.data_output_base_vbytes + len as u64);
        self.base_overhead_vbytes
            + input_count as u64 * input_vbytes
            + output_count as u64 * self.output_vbytes
            + data
    }
}

/// `ceil(vsize * fee_rate)`.
pub fn fee_for(vsize: u64, fee_rate_sat_vb: f64) -> Result<u64> {
    validate_fee_rate(fee_rate_sat_vb)?;
    Ok((vsize as f64 * fee_rate_sat_vb).ceil() as u64)
}

pub fn validate_fee_rate(fee_rate_sat_vb: f64) -> Result<()> {
    if !fee_rate_sat_vb.is_finite() || fee_rate_sat_vb < 0.0 {
        return Err(EscrowError::InvalidFeeRate(fee_rate_sat_vb));
    }
    Ok(())
}

fn push_overhead(len: u64) -> u64 {
    match len {
        0..=75 => 1,
        76..=255 => 2,
        _ => 3,
    }
}

fn compact_size_len(n: u64) -> u64 {
    if n < 253 { 1 } else { 3 }
}
