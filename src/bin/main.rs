//! escrowd - escrow custody CLI
//!
//! Every command prints one JSON document:
//!   escrowd keygen                          → {"sealingKey": "<hex>"}
//!   escrowd generate                        → EscrowWallet
//!   escrowd multisig <m> <pubkey>...        → {"address", "redeemScript"}
//!   escrowd timelock <primary> <height> <m> <pubkey>...
//!   escrowd attest <claimant> <amount> <context> --wallet <file>
//!   escrowd verify <attestation.json> --pubkey <hex>
//!
//! Configuration:
//!   --key <hex>        sealing key (env: ESCROW_SEALING_KEY)
//!   --network <name>   mainnet|testnet|litecoin|dogecoin (env: ESCROW_NETWORK)
//!
//! Output format:
//!   --json     Compact JSON (default for non-tty)
//!   --pretty   Pretty-print JSON (default for tty)

use std::env;
use std::io::IsTerminal;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context};
use bitcoin::PublicKey;
use serde_json::{json, Value};
use tracing::debug;
use utxo_escrow::attestation::{self, AttestationSigner, RewardAttestation};
use utxo_escrow::logging::init_logging;
use utxo_escrow::script::{multisig_script, time_locked, MultiSig};
use utxo_escrow::{EncryptionKey, EscrowWallet, KeyCustody, NetworkParams};

fn main() {
    init_logging();

    let args: Vec<String> = env::args().collect();
    let opts = ParsedArgs::parse(&args[1..]);

    if opts.help {
        print_usage();
        return;
    }

    if opts.version {
        println!("escrowd {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let result = match opts.command.as_deref() {
        Some("keygen") => cmd_keygen(),
        Some("generate") | Some("gen") => cmd_generate(&opts),
        Some("multisig") => cmd_multisig(&opts),
        Some("timelock") => cmd_timelock(&opts),
        Some("attest") => cmd_attest(&opts),
        Some("verify") => cmd_verify(&opts),
        Some(cmd) => Err(anyhow!("Unknown command: {}", cmd)),
        None => {
            print_usage();
            return;
        }
    };

    let pretty = !opts.json && (opts.pretty || std::io::stdout().is_terminal());
    match result {
        Ok(output) => println!("{}", render(&output, pretty)),
        Err(e) => {
            eprintln!("{}", render(&json!({"error": format!("{:#}", e)}), pretty));
            std::process::exit(1);
        }
    }
}

fn render(value: &Value, pretty: bool) -> String {
    let rendered = if pretty { serde_json::to_string_pretty(value) } else { serde_json::to_string(value) };
    rendered.unwrap_or_else(|_| value.to_string())
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    positional: Vec<String>,
    key: Option<String>,
    network: Option<String>,
    wallet: Option<String>,
    pubkey: Option<String>,
    json: bool,
    pretty: bool,
    help: bool,
    version: bool,
}

impl ParsedArgs {
    fn parse(args: &[String]) -> Self {
        // Load .env file if present
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    let value = value.trim().trim_matches('"');
                    if !value.is_empty() && env::var(key.trim()).is_err() {
                        env::set_var(key.trim(), value);
                    }
                }
            }
        }

        let mut opts = ParsedArgs::default();
        let mut i = 0;

        while i < args.len() {
            let arg = &args[i];
            let mut value = || {
                i += 1;
                args.get(i).cloned()
            };
            match arg.as_str() {
                "--help" | "-h" => opts.help = true,
                "--version" | "-V" => opts.version = true,
                "--json" => opts.json = true,
                "--pretty" => opts.pretty = true,
                "--key" | "-k" => opts.key = value(),
                "--network" | "-n" => opts.network = value(),
                "--wallet" | "-w" => opts.wallet = value(),
                "--pubkey" | "-p" => opts.pubkey = value(),
                _ if !arg.starts_with('-') => opts.positional.push(arg.clone()),
                _ => {} // Ignore unknown flags
            }
            i += 1;
        }

        if !opts.positional.is_empty() {
            opts.command = Some(opts.positional.remove(0));
        }

        // Environment is lower priority than flags
        if opts.key.is_none() {
            opts.key = env::var("ESCROW_SEALING_KEY").ok().filter(|s| !s.is_empty());
        }
        if opts.network.is_none() {
            opts.network = env::var("ESCROW_NETWORK").ok().filter(|s| !s.is_empty());
        }
        if opts.wallet.is_none() {
            opts.wallet = env::var("ESCROW_OPERATOR_WALLET").ok().filter(|s| !s.is_empty());
        }

        opts
    }

    fn network(&self) -> anyhow::Result<NetworkParams> {
        network_by_name(self.network.as_deref().unwrap_or("testnet"))
    }

    fn sealing_key(&self) -> anyhow::Result<EncryptionKey> {
        let raw = self.key.as_deref().context("--key <hex> or ESCROW_SEALING_KEY is required")?;
        Ok(EncryptionKey::from_hex(raw)?)
    }

    fn arg(&self, index: usize, name: &str) -> anyhow::Result<&str> {
        self.positional
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("missing <{}>", name))
    }
}

fn network_by_name(name: &str) -> anyhow::Result<NetworkParams> {
    NetworkParams::from_name(name).ok_or_else(|| anyhow!("Unknown network: {}", name))
}

/// An explicit `--network` wins; otherwise a loaded operator wallet carries its own.
fn verification_network(explicit: Option<&str>, wallet: Option<&EscrowWallet>) -> anyhow::Result<NetworkParams> {
    match (explicit, wallet) {
        (Some(name), _) => network_by_name(name),
        (None, Some(wallet)) => Ok(wallet.network.clone()),
        (None, None) => network_by_name("testnet"),
    }
}

fn print_usage() {
    println!(
        r#"escrowd - escrow custody and payout engine

USAGE:
    escrowd <command> [args] [options]

COMMANDS:
    keygen                                  Generate a 256-bit sealing key
    generate                                Generate a sealed escrow wallet
    multisig <m> <pubkey>...                m-of-n P2SH address
    timelock <primary> <height> <m> <pubkey>...
                                            Primary key or m-of-n after height
    attest <claimant> <amount> <context>    Sign a reward attestation
    verify <attestation.json>               Verify a reward attestation

OPTIONS:
    --key, -k <hex>         Sealing key (env: ESCROW_SEALING_KEY)
    --network, -n <name>    mainnet|testnet|litecoin|dogecoin (env: ESCROW_NETWORK)
    --wallet, -w <file>     Operator wallet JSON for attest (env: ESCROW_OPERATOR_WALLET)
    --pubkey, -p <hex>      Signer public key for verify
                            (with --wallet instead, verify uses the wallet's network)
    --json                  Compact JSON output
    --pretty                Pretty-print JSON
    --version, -V           Print version

LOGGING:
    RUST_LOG=debug          Log filter (default: info)
    ESCROW_LOG_FORMAT=json  json|compact|pretty log lines on stderr
    ESCROW_LOG_JSON=1       Same as ESCROW_LOG_FORMAT=json

EXAMPLES:
    export ESCROW_SEALING_KEY=$(escrowd keygen --json | jq -r .sealingKey)
    escrowd generate --network testnet > operator.json
    escrowd multisig 2 02aa.. 03bb.. 02cc..
    escrowd attest mrCDrCybB6J1vRfbwM5hemdJz73FwDBC8r 25000 season-3 -w operator.json
"#
    );
}

fn cmd_keygen() -> anyhow::Result<Value> {
    let key = EncryptionKey::generate();
    Ok(json!({ "sealingKey": key.to_hex().as_str() }))
}

fn cmd_generate(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let key = opts.sealing_key()?;
    let wallet = KeyCustody::new(opts.network()?).generate(&key)?;
    Ok(serde_json::to_value(&wallet)?)
}

fn parse_pubkeys(raw: &[String]) -> anyhow::Result<Vec<PublicKey>> {
    raw.iter()
        .map(|s| PublicKey::from_str(s).with_context(|| format!("invalid public key {}", s)))
        .collect()
}

fn cmd_multisig(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let m: usize = opts.arg(0, "m")?.parse().context("<m> must be a number")?;
    let pubkeys = parse_pubkeys(&opts.positional[1..])?;
    let script = multisig_script(m, &pubkeys, &opts.network()?)?;
    Ok(json!({
        "address": script.address,
        "redeemScript": script.redeem_script.map(|s| s.to_hex_string()),
        "m": m,
        "n": pubkeys.len(),
    }))
}

fn cmd_timelock(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let primary = PublicKey::from_str(opts.arg(0, "primary")?).context("invalid primary key")?;
    let height: u32 = opts.arg(1, "height")?.parse().context("<height> must be a block height")?;
    let m: usize = opts.arg(2, "m")?.parse().context("<m> must be a number")?;
    let fallback = MultiSig::new(m, parse_pubkeys(&opts.positional[3..])?)?;
    let script = time_locked(&primary, height, &fallback, &opts.network()?)?;
    Ok(json!({
        "address": script.address,
        "redeemScript": script.redeem_script.map(|s| s.to_hex_string()),
        "lockHeight": height,
    }))
}

fn load_wallet(path: &str) -> anyhow::Result<EscrowWallet> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not an escrow wallet", path))
}

fn cmd_attest(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let claimant = opts.arg(0, "claimant")?;
    let amount: u64 = opts.arg(1, "amount")?.parse().context("<amount> must be sats")?;
    let context = opts.arg(2, "context")?;
    let wallet_path = opts.wallet.as_deref().context("--wallet <file> is required")?;

    let operator = load_wallet(wallet_path)?;
    debug!(operator = %operator.address, "signing attestation");
    let key = opts.sealing_key()?;
    let attestation = AttestationSigner::new(operator).sign(&key, claimant, amount, context)?;
    Ok(serde_json::to_value(&attestation)?)
}

fn cmd_verify(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let source = opts.arg(0, "attestation.json")?;
    let raw = if source.trim_start().starts_with('{') {
        source.to_string()
    } else {
        std::fs::read_to_string(source).with_context(|| format!("reading {}", source))?
    };
    let att = RewardAttestation::from_json(&raw)?;

    let wallet = match (&opts.pubkey, &opts.wallet) {
        (None, Some(path)) => Some(load_wallet(path)?),
        _ => None,
    };
    let pubkey = match (&opts.pubkey, &wallet) {
        (Some(hex), _) => PublicKey::from_str(hex).context("invalid --pubkey")?,
        (None, Some(wallet)) => wallet.public_key,
        (None, None) => bail!("--pubkey <hex> or --wallet <file> is required"),
    };

    let network = verification_network(opts.network.as_deref(), wallet.as_ref())?;
    let valid = attestation::verify(&att, &pubkey, &network);
    Ok(json!({ "valid": valid, "claimant": att.claimant, "amountSats": att.amount_sats }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet_on(network: NetworkParams) -> EscrowWallet {
        KeyCustody::new(network).generate(&EncryptionKey::generate()).unwrap()
    }

    #[test]
    fn test_verify_network_follows_wallet() {
        let wallet = wallet_on(NetworkParams::dogecoin());
        let network = verification_network(None, Some(&wallet)).unwrap();
        assert_eq!(network, NetworkParams::dogecoin());
    }

    #[test]
    fn test_verify_network_explicit_flag_wins() {
        let wallet = wallet_on(NetworkParams::dogecoin());
        let network = verification_network(Some("litecoin"), Some(&wallet)).unwrap();
        assert_eq!(network.name, "litecoin");
        assert!(verification_network(Some("nope"), None).is_err());
    }

    #[test]
    fn test_verify_network_defaults_to_testnet() {
        assert_eq!(verification_network(None, None).unwrap().name, "testnet");
    }

    #[test]
    fn test_dogecoin_attestation_verifies_from_wallet() {
        let key = EncryptionKey::generate();
        let operator = KeyCustody::new(NetworkParams::dogecoin()).generate(&key).unwrap();
        let claimant = wallet_on(NetworkParams::dogecoin()).address;
        let att = AttestationSigner::new(operator.clone()).sign(&key, &claimant, 42_000, "raffle").unwrap();

        let network = verification_network(None, Some(&operator)).unwrap();
        assert!(attestation::verify(&att, &operator.public_key, &network));
        assert!(!attestation::verify(&att, &operator.public_key, &NetworkParams::testnet()));
    }
}
