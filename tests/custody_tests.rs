//! Integration Tests: key custody, wire formats and attestations
//!
//! These tests verify:
//! 1. Escrow wallets survive a JSON round trip and still unseal
//! 2. Sealed-key wire format errors are malformed input, not decryption failures
//! 3. Addresses follow the configured network's version bytes
//! 4. Reward attestations verify with only the operator's public key

use once_cell::sync::Lazy;
use serde_json::json;
use utxo_escrow::attestation::{verify, AttestationSigner, RewardAttestation};
use utxo_escrow::{EncryptionKey, EngineConfig, EscrowError, EscrowWallet, KeyCustody, NetworkParams, SealedSecret};

static SEALING_KEY: Lazy<EncryptionKey> = Lazy::new(EncryptionKey::generate);

/// Test: wallet JSON round trip keeps the sealed key usable
#[test]
fn wallet_json_round_trip() {
    let wallet = KeyCustody::new(NetworkParams::testnet()).generate(&SEALING_KEY).expect("wallet");
    let raw = serde_json::to_string(&wallet).expect("serialize");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert!(value["sealedKey"]["authTag"].is_string());
    assert!(value["publicKey"].is_string());

    let restored: EscrowWallet = serde_json::from_str(&raw).expect("deserialize");
    assert_eq!(restored, wallet);
    assert!(restored.verify_sealed_key(&SEALING_KEY).expect("verify"));
}

/// Test: the same sealing key hex decodes to the same key
#[test]
fn sealing_key_hex_round_trip() {
    let hex = SEALING_KEY.to_hex();
    let decoded = EncryptionKey::from_hex(&hex).expect("hex");
    assert_eq!(decoded.as_bytes(), SEALING_KEY.as_bytes());
    assert!(matches!(EncryptionKey::from_hex("abcd"), Err(EscrowError::InvalidConfig(_))));
}

/// Test: missing wire fields are malformed, wrong key is decryption failure
#[test]
fn sealed_key_error_classes() {
    let missing = json!({ "ciphertext": "00", "iv": "000000000000000000000000" }).to_string();
    assert!(matches!(SealedSecret::from_json(&missing), Err(EscrowError::MalformedSealedKey(_))));

    let wallet = KeyCustody::new(NetworkParams::testnet()).generate(&SEALING_KEY).expect("wallet");
    let raw = wallet.sealed_key.to_json().expect("json");
    let parsed = SealedSecret::from_json(&raw).expect("parse");
    assert!(matches!(
        KeyCustody::unseal(&parsed, &EncryptionKey::generate()),
        Err(EscrowError::Decryption)
    ));
}

/// Test: each preset produces its own address prefix
#[test]
fn network_presets_address_prefixes() {
    for (network, prefixes) in [
        (NetworkParams::mainnet(), &['1'][..]),
        (NetworkParams::testnet(), &['m', 'n'][..]),
        (NetworkParams::litecoin(), &['L'][..]),
        (NetworkParams::dogecoin(), &['D'][..]),
    ] {
        let wallet = KeyCustody::new(network.clone()).generate(&SEALING_KEY).expect("wallet");
        let first = wallet.address.chars().next().expect("address");
        assert!(prefixes.contains(&first), "{} address {}", network.name, wallet.address);
        assert!(network.is_valid_address(&wallet.address));
        assert!(!NetworkParams::mainnet().is_valid_address(&wallet.address) || network.name == "mainnet");
    }
}

/// Test: engine config parses from JSON with network overrides
#[test]
fn engine_config_from_json() {
    let raw = json!({
        "network": NetworkParams::litecoin(),
        "min_confirmations": 3
    })
    .to_string();
    let config = EngineConfig::from_json_str(&raw).expect("config");
    assert_eq!(config.network.name, "litecoin");
    assert_eq!(config.min_confirmations, 3);
    assert_eq!(config.dust_threshold_sats, 546);
}

/// Test: attestation travels as JSON and verifies with the public key alone
#[test]
fn attestation_over_the_wire() {
    let operator = KeyCustody::new(NetworkParams::testnet()).generate(&SEALING_KEY).expect("wallet");
    let pubkey = operator.public_key;
    let claimant = KeyCustody::new(NetworkParams::testnet())
        .generate(&EncryptionKey::generate())
        .expect("claimant")
        .address;

    let att = AttestationSigner::new(operator)
        .sign(&SEALING_KEY, &claimant, 125_000, "tournament-7|round-2")
        .expect("sign");
    let wire = att.to_json().expect("json");
    let received = RewardAttestation::from_json(&wire).expect("parse");
    assert!(verify(&received, &pubkey, &NetworkParams::testnet()));
    assert_eq!(received.context(), Some("tournament-7|round-2"));

    let inflated = RewardAttestation { amount_sats: 1_250_000, ..received };
    assert!(!verify(&inflated, &pubkey, &NetworkParams::testnet()));
}
