#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use alloy_primitives::U256;
use serde::Deserialize;
use tracing::debug;
use vaultgate_engines::abi::{
    encode_address, encode_address_array, encode_string, encode_uint256, erc20, FunctionSelector,
};
use vaultgate_engines::moderation::ModerationGate;
use vaultgate_engines::rate_limit::RateLimiter;
use vaultgate_engines::remote_reader::{FixtureStateReader, ReadRequest, RemoteStateReader};
use vaultgate_engines::resolver::{TierConfig, TieredResolver};
use vaultgate_kernel_contracts::access::{
    CanSendMessageRequest, ModerateMessageRequest, ValidateAccessRequest,
};
use vaultgate_kernel_contracts::address::ChainAddress;
use vaultgate_kernel_contracts::{UnixTimeMs, Validate};
use vaultgate_os::access::AccessGate;
use vaultgate_os::clock::SystemClock;
use vaultgate_os::config::{GateConfig, UnconfiguredClassifier};
use vaultgate_storage::store::InMemoryCacheStore;

const USAGE: &str = "usage: vaultgate <validate <vault> <user> <min_balance> [--fixture <json>] | moderate <text> | rate-check <user> <room> <count>>";

pub fn execute_command(args: &[String]) -> Result<String, String> {
    execute_with_config(args, &GateConfig::from_env())
}

pub fn execute_with_config(args: &[String], config: &GateConfig) -> Result<String, String> {
    let Some(command) = args.first() else {
        return Err(USAGE.to_string());
    };
    let rest = &args[1..];
    debug!(command = %command, args = rest.len(), "dispatching cli command");
    match command.as_str() {
        "validate" => validate(rest, config),
        "moderate" => moderate(rest, config),
        "rate-check" => rate_check(rest, config),
        other => Err(format!(
            "unknown command: {other}. expected one of: validate, moderate, rate-check"
        )),
    }
}

fn validate(args: &[String], config: &GateConfig) -> Result<String, String> {
    let mut positional = Vec::new();
    let mut fixture = None;
    let mut it = args.iter();
    while let Some(arg) = it.next() {
        if arg == "--fixture" {
            fixture = Some(
                it.next()
                    .ok_or_else(|| "--fixture needs a path".to_string())?,
            );
        } else {
            positional.push(arg.as_str());
        }
    }
    let &[vault, user, min_balance] = positional.as_slice() else {
        return Err("usage: vaultgate validate <vault> <user> <min_balance> [--fixture <json>]".to_string());
    };
    let request =
        ValidateAccessRequest::v1(vault, user, min_balance).map_err(|e| e.to_string())?;
    let gate = match fixture {
        Some(path) => fixture_gate(config, path)?,
        None => AccessGate::from_config(config).map_err(|e| e.to_string())?,
    };
    let result = gate.validate_access(&request).map_err(|e| e.to_string())?;
    serde_json::to_string_pretty(&result).map_err(|e| e.to_string())
}

fn moderate(args: &[String], config: &GateConfig) -> Result<String, String> {
    if args.is_empty() {
        return Err("usage: vaultgate moderate <text>".to_string());
    }
    let request = ModerateMessageRequest {
        text: args.join(" "),
    };
    request.validate().map_err(|e| e.to_string())?;
    let classifier = config.build_classifier().map_err(|e| e.to_string())?;
    let gate =
        ModerationGate::new(config.moderation.clone(), classifier).map_err(|e| e.to_string())?;
    serde_json::to_string_pretty(&gate.moderate(&request.text)).map_err(|e| e.to_string())
}

/// Simulates `count` sends at one instant and prints each decision.
fn rate_check(args: &[String], config: &GateConfig) -> Result<String, String> {
    let [user, room, count] = args else {
        return Err("usage: vaultgate rate-check <user> <room> <count>".to_string());
    };
    let request = CanSendMessageRequest::v1(user, room).map_err(|e| e.to_string())?;
    let count = count
        .parse::<u32>()
        .ok()
        .filter(|c| (1..=10_000).contains(c))
        .ok_or_else(|| "count must be between 1 and 10000".to_string())?;
    let limiter = RateLimiter::new(config.rate_limit.clone()).map_err(|e| e.to_string())?;
    let now = UnixTimeMs::now();
    let lines: Vec<String> = (1..=count)
        .map(|i| {
            let d = limiter.can_send(&request.user_address, &request.room_id, now);
            match (d.allowed, d.reason) {
                (true, _) => format!("{i} allowed"),
                (false, Some(reason)) => format!(
                    "{i} denied {reason} retry_after_ms={}",
                    d.retry_after_ms.unwrap_or(0)
                ),
                (false, None) => format!("{i} denied"),
            }
        })
        .collect();
    Ok(lines.join("\n"))
}

/// Offline chain state for `validate --fixture`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainFixture {
    pub vault: ChainAddress,
    pub base_token: ChainAddress,
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Omitted means the token has no `decimals()`.
    #[serde(default)]
    pub decimals: Option<u8>,
    #[serde(default)]
    pub authorized: Vec<ChainAddress>,
    #[serde(default)]
    pub setup_authority: Option<ChainAddress>,
    /// Raw base-unit balances as decimal strings.
    #[serde(default)]
    pub balances: BTreeMap<ChainAddress, String>,
}

impl ChainFixture {
    pub fn reader(&self, config: &GateConfig) -> Result<FixtureStateReader, String> {
        let selector =
            |sig: &str| FunctionSelector::from_signature(sig).map_err(|e| format!("{sig}: {e}"));
        let reader = FixtureStateReader::new();
        reader.answer(
            &ReadRequest::new(
                self.vault.clone(),
                selector(&config.auth_cache.authorized_signature)?,
            ),
            encode_address_array(&self.authorized),
        );
        reader.answer(
            &ReadRequest::new(
                self.vault.clone(),
                selector(&config.token_cache.base_token_signature)?,
            ),
            encode_address(&self.base_token).to_vec(),
        );
        if let (Some(authority), Some(sig)) = (
            &self.setup_authority,
            config.orchestrator.setup_authority_signature.as_deref(),
        ) {
            reader.answer(
                &ReadRequest::new(self.vault.clone(), selector(sig)?),
                encode_address(authority).to_vec(),
            );
        }
        let token = &self.base_token;
        reader.answer(
            &ReadRequest::new(token.clone(), erc20::SYMBOL),
            encode_string(&self.symbol),
        );
        if let Some(name) = &self.name {
            reader.answer(
                &ReadRequest::new(token.clone(), erc20::NAME),
                encode_string(name),
            );
        }
        if let Some(decimals) = self.decimals {
            reader.answer(
                &ReadRequest::new(token.clone(), erc20::DECIMALS),
                encode_uint256(U256::from(decimals)).to_vec(),
            );
        }
        for (holder, raw) in &self.balances {
            let value = U256::from_str_radix(raw.trim(), 10)
                .map_err(|_| format!("balance for {holder} is not a base-10 integer"))?;
            reader.answer(
                &ReadRequest::new(token.clone(), erc20::BALANCE_OF).with_address_arg(holder),
                encode_uint256(value).to_vec(),
            );
        }
        Ok(reader)
    }
}

fn fixture_gate(config: &GateConfig, path: &str) -> Result<AccessGate, String> {
    let raw = fs::read_to_string(path).map_err(|e| format!("failed to read fixture: {e}"))?;
    let fixture: ChainFixture =
        serde_json::from_str(&raw).map_err(|e| format!("invalid fixture: {e}"))?;
    let reader = fixture.reader(config)?;
    let tier = TierConfig {
        label: "fixture".to_string(),
        retry_count: 0,
        ..TierConfig::primary_v1()
    };
    let resolver = TieredResolver::new(vec![(tier, Arc::new(reader) as Arc<dyn RemoteStateReader>)])
        .map_err(|e| e.to_string())?;
    AccessGate::assemble(
        config,
        resolver,
        Arc::new(InMemoryCacheStore::new_in_memory()),
        Box::new(UnconfiguredClassifier),
        Arc::new(SystemClock),
    )
    .map_err(|e| e.to_string())
}
