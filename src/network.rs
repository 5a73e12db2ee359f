//! Network parameters - static chain constants passed to a single generic engine.
//!
//! Every Bitcoin-derived chain differs only in its version bytes and its
//! signed-message prefix, so one struct covers all of them.

use bitcoin::base58;
use bitcoin::hashes::Hash;
use bitcoin::{PubkeyHash, ScriptBuf, ScriptHash};
use serde::{Deserialize, Serialize};

use crate::error::{EscrowError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParams {
    pub name: String,
    /// Version byte of pay-to-pubkey-hash addresses.
    pub pubkey_address_prefix: u8,
    /// Version byte of pay-to-script-hash addresses.
    pub script_address_prefix: u8,
    pub wif_prefix: u8,
    /// Prefix used when hashing off-chain signed messages.
    pub message_prefix: String,
}

impl Default for NetworkParams {
    fn default() -> Self { Self::testnet() }
}

impl NetworkParams {
    pub fn mainnet() -> Self {
        Self {
            name: "mainnet".into(),
            pubkey_address_prefix: 0x00,
            script_address_prefix: 0x05,
            wif_prefix: 0x80,
            message_prefix: "Bitcoin Signed Message:\n".into(),
        }
    }

    pub fn testnet() -> Self {
        Self {
            name: "testnet".into(),
            pubkey_address_prefix: 0x6f,
            script_address_prefix: 0xc4,
            wif_prefix: 0xef,
            message_prefix: "Bitcoin Signed Message:\n".into(),
        }
    }

    pub fn litecoin() -> Self {
        Self {
            name: "litecoin".into(),
            pubkey_address_prefix: 0x30,
            script_address_prefix: 0x32,
            wif_prefix: 0xb0,
            message_prefix: "Litecoin Signed Message:\n".into(),
        }
    }

    pub fn dogecoin() -> Self {
        Self {
            name: "dogecoin".into(),
            pubkey_address_prefix: 0x1e,
            script_address_prefix: 0x16,
            wif_prefix: 0x9e,
            message_prefix: "Dogecoin Signed Message:\n".into(),
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "bitcoin" | "main" => Some(Self::mainnet()),
            "testnet" | "test" => Some(Self::testnet()),
            "litecoin" | "ltc" => Some(Self::litecoin()),
            "dogecoin" | "doge" => Some(Self::dogecoin()),
            _ => None,
        }
    }

    pub fn p2pkh_address(&self, hash: &PubkeyHash) -> String {
        encode_versioned(self.pubkey_address_prefix, &hash.to_byte_array())
    }

    pub fn p2sh_address(&self, hash: &ScriptHash) -> String {
        encode_versioned(self.script_address_prefix, &hash.to_byte_array())
    }

    /// Decode a base58check address into the script that pays it.
    ///
    /// Only addresses whose version byte belongs to this network are accepted.
    pub fn script_pubkey_for(&self, address: &str) -> Result<ScriptBuf> {
        let invalid = |reason: String| EscrowError::InvalidAddress {
            address: address.to_string(),
            network: self.name.clone(),
            reason,
        };

        let data = base58::decode_check(address).map_err(|e| invalid(e.to_string()))?;
        if data.len() != 21 {
            return Err(invalid(format!("expected 21 payload bytes, got {}", data.len())));
        }
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&data[1..]);

        match data[0] {
            v if v == self.pubkey_address_prefix => {
                Ok(ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(hash)))
            }
            v if v == self.script_address_prefix => {
                Ok(ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(hash)))
            }
            v => Err(invalid(format!("version byte 0x{v:02x} belongs to another network"))),
        }
    }

    pub fn is_valid_address(&self, address: &str) -> bool {
        self.script_pubkey_for(address).is_ok()
    }
}

fn encode_versioned(version: u8, hash: &[u8; 20]) -> String {
    let mut payload = [0u8; 21];
    payload[0] = version;
    payload[1..].copy_from_slice(hash);
    base58::encode_check(&payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    // hash160 of the compressed generator point (private key 1)
    const KEY_ONE_HASH: &str = "751e76e8199196d454941c45d1b3a323f1433bd6";

    fn key_one_hash() -> PubkeyHash {
        let bytes: [u8; 20] = hex::decode(KEY_ONE_HASH).unwrap().try_into().unwrap();
        PubkeyHash::from_byte_array(bytes)
    }

    #[test]
    fn test_mainnet_p2pkh_address() {
        let addr = NetworkParams::mainnet().p2pkh_address(&key_one_hash());
        assert_eq!(addr, "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH");
    }

    #[test]
    fn test_testnet_p2pkh_address() {
        let addr = NetworkParams::testnet().p2pkh_address(&key_one_hash());
        assert_eq!(addr, "mrCDrCybB6J1vRfbwM5hemdJz73FwDBC8r");
    }

    #[test]
    fn test_decode_roundtrip_to_script() {
        let params = NetworkParams::testnet();
        let addr = params.p2pkh_address(&key_one_hash());
        let spk = params.script_pubkey_for(&addr).unwrap();
        assert_eq!(spk, ScriptBuf::new_p2pkh(&key_one_hash()));
    }

    #[test]
    fn test_foreign_network_rejected() {
        let mainnet_addr = NetworkParams::mainnet().p2pkh_address(&key_one_hash());
        let err = NetworkParams::testnet().script_pubkey_for(&mainnet_addr).unwrap_err();
        assert!(matches!(err, EscrowError::InvalidAddress { .. }));
    }

    #[test]
    fn test_garbage_rejected() {
        let params = NetworkParams::testnet();
        assert!(!params.is_valid_address("not-an-address"));
        assert!(!params.is_valid_address(""));
    }

    #[test]
    fn test_from_name() {
        assert_eq!(NetworkParams::from_name("Mainnet"), Some(NetworkParams::mainnet()));
        assert_eq!(NetworkParams::from_name("doge"), Some(NetworkParams::dogecoin()));
        assert_eq!(NetworkParams::from_name("regtest-ish"), None);
    }
}
