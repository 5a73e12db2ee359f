//! External collaborators. The core stays synchronous; implementations may
//! block, drive a runtime, or answer from memory.

use bitcoin::{OutPoint, ScriptBuf, Txid};
use serde::{Deserialize, Serialize};

use crate::error::{BroadcastError, ProviderError};

/// Unspent output as reported by a provider. Immutable once observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    pub value_sats: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_pubkey: Option<ScriptBuf>,
    #[serde(default)]
    pub confirmations: u32,
}

impl Utxo {
    /// A mined output with one confirmation.
    pub fn new(txid: Txid, vout: u32, value_sats: u64) -> Self {
        Self { txid, vout, value_sats, script_pubkey: None, confirmations: 1 }
    }
    pub fn with_confirmations(mut self, n: u32) -> Self { self.confirmations = n; self }
    pub fn with_script_pubkey(mut self, spk: ScriptBuf) -> Self { self.script_pubkey = Some(spk); self }
    pub fn outpoint(&self) -> OutPoint { OutPoint { txid: self.txid, vout: self.vout } }
}

pub trait UtxoProvider {
    fn get_utxos(&self, address: &str) -> Result<Vec<Utxo>, ProviderError>;
}

pub trait Broadcaster {
    /// Submit a raw transaction; returns the id the network accepted.
    fn broadcast(&self, raw_tx_hex: &str) -> Result<Txid, BroadcastError>;
}

impl<T: UtxoProvider + ?Sized> UtxoProvider for &T {
    fn get_utxos(&self, address: &str) -> Result<Vec<Utxo>, ProviderError> {
        (**self).get_utxos(address)
    }
}

impl<T: Broadcaster + ?Sized> Broadcaster for &T {
    fn broadcast(&self, raw_tx_hex: &str) -> Result<Txid, BroadcastError> {
        (**self).broadcast(raw_tx_hex)
    }
}
