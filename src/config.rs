//! Engine configuration. Higher layers construct this once and pass it down.

use serde::{Deserialize, Serialize};

use crate::error::{EscrowError, Result};
use crate::network::NetworkParams;
use crate::tx::FeeModel;

/// Minimum relay value for an output on Bitcoin-derived chains.
pub const DEFAULT_DUST_THRESHOLD: u64 = 546;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub network: NetworkParams,
    pub fee_model: FeeModel,
    pub dust_threshold_sats: u64,
    /// UTXOs with fewer confirmations are ignored by the deposit tracker.
    pub min_confirmations: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            network: NetworkParams::default(),
            fee_model: FeeModel::default(),
            dust_threshold_sats: DEFAULT_DUST_THRESHOLD,
            min_confirmations: 1,
        }
    }
}

impl EngineConfig {
    pub fn new(network: NetworkParams) -> Self {
        Self { network, ..Default::default() }
    }
    pub fn mainnet() -> Self { Self::new(NetworkParams::mainnet()) }
    pub fn testnet() -> Self { Self::new(NetworkParams::testnet()) }
    pub fn with_fee_model(mut self, m: FeeModel) -> Self { self.fee_model = m; self }
    pub fn with_dust_threshold(mut self, sats: u64) -> Self { self.dust_threshold_sats = sats; self }
    pub fn with_min_confirmations(mut self, n: u32) -> Self { self.min_confirmations = n; self }

    /// Parse a JSON config; omitted fields fall back to defaults.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| EscrowError::InvalidConfig(format!("config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.network.pubkey_address_prefix == self.network.script_address_prefix {
            return Err(EscrowError::InvalidConfig(format!(
                "{}: pubkey and script address prefixes must differ",
                self.network.name
            )));
        }
        if self.fee_model.output_vbytes == 0 {
            return Err(EscrowError::InvalidConfig("output_vbytes must be > 0".into()));
        }
        Ok(())
    }
}
