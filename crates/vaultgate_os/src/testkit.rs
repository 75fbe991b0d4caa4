#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use vaultgate_engines::abi::{
    encode_address, encode_address_array, encode_string, encode_uint256, erc20, FunctionSelector,
};
use vaultgate_engines::remote_reader::{FixtureStateReader, ReadRequest, RemoteStateReader};
use vaultgate_engines::resolver::{TierConfig, TieredResolver};
use vaultgate_kernel_contracts::address::ChainAddress;

pub(crate) fn addr(n: u8) -> ChainAddress {
    ChainAddress::new(format!("0x{:040x}", n)).unwrap()
}

pub(crate) fn selector(signature: &str) -> FunctionSelector {
    FunctionSelector::from_signature(signature).unwrap()
}

pub(crate) fn fast_tier(label: &str) -> TierConfig {
    TierConfig {
        label: label.to_string(),
        timeout: Duration::from_millis(500),
        retry_count: 0,
        retry_delay: Duration::ZERO,
    }
}

/// Two fixture tiers answering the same scripted chain state.
pub(crate) struct Ledger {
    pub primary: FixtureStateReader,
    pub fallback: FixtureStateReader,
    pub resolver: TieredResolver,
}

impl Ledger {
    pub fn new() -> Self {
        let primary = FixtureStateReader::new();
        let fallback = FixtureStateReader::new();
        let resolver = TieredResolver::new(vec![
            (
                fast_tier("primary"),
                Arc::new(primary.clone()) as Arc<dyn RemoteStateReader>,
            ),
            (
                fast_tier("fallback"),
                Arc::new(fallback.clone()) as Arc<dyn RemoteStateReader>,
            ),
        ])
        .unwrap();
        Self {
            primary,
            fallback,
            resolver,
        }
    }

    pub fn answer(&self, request: &ReadRequest, value: Vec<u8>) {
        self.primary.answer(request, value.clone());
        self.fallback.answer(request, value);
    }

    pub fn calls(&self) -> u64 {
        self.primary.calls() + self.fallback.calls()
    }

    pub fn set_authorized(&self, vault: &ChainAddress, addresses: &[ChainAddress]) {
        let req = ReadRequest::new(vault.clone(), selector("getAuthorizedAddresses()"));
        self.answer(&req, encode_address_array(addresses));
    }

    pub fn set_base_token(&self, vault: &ChainAddress, token: &ChainAddress) {
        let req = ReadRequest::new(vault.clone(), selector("baseToken()"));
        self.answer(&req, encode_address(token).to_vec());
    }

    pub fn set_setup_authority(&self, vault: &ChainAddress, authority: &ChainAddress) {
        let req = ReadRequest::new(vault.clone(), selector("setupAuthority()"));
        self.answer(&req, encode_address(authority).to_vec());
    }

    pub fn set_token_meta(
        &self,
        token: &ChainAddress,
        symbol: &str,
        decimals: u8,
        name: Option<&str>,
    ) {
        self.answer(
            &ReadRequest::new(token.clone(), erc20::SYMBOL),
            encode_string(symbol),
        );
        self.answer(
            &ReadRequest::new(token.clone(), erc20::DECIMALS),
            encode_uint256(U256::from(decimals)).to_vec(),
        );
        if let Some(name) = name {
            self.answer(
                &ReadRequest::new(token.clone(), erc20::NAME),
                encode_string(name),
            );
        }
    }

    pub fn set_balance(&self, token: &ChainAddress, user: &ChainAddress, raw: u128) {
        let req = ReadRequest::new(token.clone(), erc20::BALANCE_OF).with_address_arg(user);
        self.answer(&req, encode_uint256(U256::from(raw)).to_vec());
    }
}
