//! Deposit Tracker - has the shared escrow address received what every party owes?
//!
//! All parties fund the same address, so thresholds are cumulative in join
//! order: party k is satisfied once the address balance covers the
//! contributions of parties 1..=k. One party over-depositing can therefore
//! satisfy another party's share. That is the behaviour of the deployed
//! system and is kept as-is.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::provider::{Utxo, UtxoProvider};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyContribution {
    pub party: String,
    pub expected_sats: u64,
}

impl PartyContribution {
    pub fn new(party: impl Into<String>, expected_sats: u64) -> Self {
        Self { party: party.into(), expected_sats }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyDeposit {
    pub party: String,
    pub expected_sats: u64,
    /// Sum of this and every earlier party's contribution.
    pub cumulative_required_sats: u64,
    pub satisfied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositStatus {
    pub address: String,
    pub total_sats: u64,
    pub counted_utxos: usize,
    pub parties: Vec<PartyDeposit>,
}

impl DepositStatus {
    /// False when no parties are expected.
    pub fn all_satisfied(&self) -> bool {
        !self.parties.is_empty() && self.parties.iter().all(|p| p.satisfied)
    }

    pub fn required_sats(&self) -> u64 {
        self.parties.last().map_or(0, |p| p.cumulative_required_sats)
    }

    /// Over-funding that will flow into the payout.
    pub fn excess_sats(&self) -> u64 {
        self.total_sats.saturating_sub(self.required_sats())
    }
}

/// Outputs that count towards the balance: confirmed enough, each outpoint once.
pub fn spendable(utxos: Vec<Utxo>, min_confirmations: u32) -> Vec<Utxo> {
    let mut seen = HashSet::new();
    utxos
        .into_iter()
        .filter(|u| u.confirmations >= min_confirmations)
        .filter(|u| seen.insert(u.outpoint()))
        .collect()
}

/// Pure evaluation of observed outputs against party thresholds.
pub fn evaluate(address: &str, utxos: &[Utxo], parties: &[PartyContribution]) -> DepositStatus {
    let total_sats = utxos.iter().fold(0u64, |acc, u| acc.saturating_add(u.value_sats));

    let mut cumulative = 0u64;
    let parties = parties
        .iter()
        .map(|p| {
            cumulative = cumulative.saturating_add(p.expected_sats);
            PartyDeposit {
                party: p.party.clone(),
                expected_sats: p.expected_sats,
                cumulative_required_sats: cumulative,
                satisfied: total_sats >= cumulative,
            }
        })
        .collect();

    DepositStatus { address: address.to_string(), total_sats, counted_utxos: utxos.len(), parties }
}

pub struct DepositTracker<P> {
    provider: P,
    min_confirmations: u32,
}

impl<P: UtxoProvider> DepositTracker<P> {
    pub fn new(provider: P, config: &EngineConfig) -> Self {
        Self { provider, min_confirmations: config.min_confirmations }
    }

    pub fn provider(&self) -> &P { &self.provider }

    /// Query the provider and evaluate. Provider failures surface as
    /// `ProviderUnavailable` and are safe to retry.
    pub fn check_deposit(&self, address: &str, parties: &[PartyContribution]) -> Result<DepositStatus> {
        let utxos = self.fetch_spendable(address)?;
        let status = evaluate(address, &utxos, parties);
        info!(
            %address,
            total = status.total_sats,
            required = status.required_sats(),
            funded = status.all_satisfied(),
            "deposit check"
        );
        Ok(status)
    }

    /// The outputs a settlement would spend.
    pub fn fetch_spendable(&self, address: &str) -> Result<Vec<Utxo>> {
        let reported = self.provider.get_utxos(address)?;
        let reported_count = reported.len();
        let utxos = spendable(reported, self.min_confirmations);
        debug!(%address, reported = reported_count, counted = utxos.len(), "utxos fetched");
        Ok(utxos)
    }
}
