//! Chain Registry
//!
//! Static per-chain configuration for every chain the relayer bridges between.
//! Built-in presets are activated by setting `<PREFIX>_RPC_URL` and
//! `<PREFIX>_BRIDGE_ADDRESS`; additional chains come from `EVM_CHAIN_{i}_*`.

use alloy::primitives::Address;
use eyre::{eyre, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const WEI_PER_GWEI: u128 = 1_000_000_000;

/// Raw settings for one chain, as read from the environment.
/// RPC URL and bridge address may be absent; such chains never go active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSettings {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: Option<String>,
    pub bridge_address: Option<String>,
    pub min_confirmations: u64,
    pub gas_limit: u64,
    /// Gas price ceiling in gwei, decimal (e.g. "0.5")
    pub max_gas_price_gwei: String,
    pub block_time_ms: u64,
}

/// Validated configuration of an active chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainDescriptor {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    pub bridge_address: Address,
    pub min_confirmations: u64,
    pub max_gas_price_wei: u128,
    pub gas_limit: u64,
    pub block_time: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("chain {0} is not configured")]
    NotFound(u64),
}

struct Preset {
    chain_id: u64,
    name: &'static str,
    env_prefix: &'static str,
    min_confirmations: u64,
    gas_limit: u64,
    max_gas_price_gwei: &'static str,
    block_time_ms: u64,
}

const PRESETS: &[Preset] = &[
    Preset {
        chain_id: 1,
        name: "Ethereum",
        env_prefix: "ETHEREUM",
        min_confirmations: 12,
        gas_limit: 500_000,
        max_gas_price_gwei: "100",
        block_time_ms: 12_000,
    },
    Preset {
        chain_id: 56,
        name: "BSC",
        env_prefix: "BSC",
        min_confirmations: 15,
        gas_limit: 300_000,
        max_gas_price_gwei: "20",
        block_time_ms: 3_000,
    },
    Preset {
        chain_id: 137,
        name: "Polygon",
        env_prefix: "POLYGON",
        min_confirmations: 20,
        gas_limit: 300_000,
        max_gas_price_gwei: "50",
        block_time_ms: 2_000,
    },
    Preset {
        chain_id: 42161,
        name: "Arbitrum",
        env_prefix: "ARBITRUM",
        min_confirmations: 1,
        gas_limit: 1_000_000,
        max_gas_price_gwei: "10",
        block_time_ms: 1_000,
    },
    Preset {
        chain_id: 43114,
        name: "Avalanche",
        env_prefix: "AVALANCHE",
        min_confirmations: 5,
        gas_limit: 300_000,
        max_gas_price_gwei: "30",
        block_time_ms: 2_000,
    },
    Preset {
        chain_id: 250,
        name: "Fantom",
        env_prefix: "FANTOM",
        min_confirmations: 10,
        gas_limit: 300_000,
        max_gas_price_gwei: "200",
        block_time_ms: 1_000,
    },
    Preset {
        chain_id: 2612,
        name: "ESR",
        env_prefix: "ESR",
        min_confirmations: 5,
        gas_limit: 200_000,
        max_gas_price_gwei: "1",
        block_time_ms: 5_000,
    },
    Preset {
        chain_id: 25062019,
        name: "ESR Testnet",
        env_prefix: "ESR_TESTNET",
        min_confirmations: 3,
        gas_limit: 200_000,
        max_gas_price_gwei: "1",
        block_time_ms: 3_000,
    },
];

/// Read-only registry of active chains
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: BTreeMap<u64, ChainDescriptor>,
}

impl ChainRegistry {
    /// Build the registry, excluding chains that are missing an RPC URL or
    /// bridge address, or whose settings do not parse.
    pub fn from_settings(settings: &[ChainSettings]) -> Self {
        let mut chains = BTreeMap::new();

        for chain in settings {
            match ChainDescriptor::try_from_settings(chain) {
                Ok(descriptor) => {
                    info!(
                        chain_id = descriptor.chain_id,
                        name = %descriptor.name,
                        min_confirmations = descriptor.min_confirmations,
                        "Chain active"
                    );
                    if chains.insert(descriptor.chain_id, descriptor).is_some() {
                        warn!(
                            chain_id = chain.chain_id,
                            "Chain configured more than once; last definition wins"
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        chain_id = chain.chain_id,
                        name = %chain.name,
                        error = %e,
                        "Skipping chain"
                    );
                }
            }
        }

        Self { chains }
    }

    /// Build directly from descriptors (tests, tooling)
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ChainDescriptor>) -> Self {
        Self {
            chains: descriptors
                .into_iter()
                .map(|d| (d.chain_id, d))
                .collect(),
        }
    }

    pub fn describe(&self, chain_id: u64) -> Result<&ChainDescriptor, RegistryError> {
        self.chains
            .get(&chain_id)
            .ok_or(RegistryError::NotFound(chain_id))
    }

    pub fn all_chain_ids(&self) -> BTreeSet<u64> {
        self.chains.keys().copied().collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ChainDescriptor> {
        self.chains.values()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

impl ChainDescriptor {
    fn try_from_settings(settings: &ChainSettings) -> Result<Self> {
        let rpc_url = settings
            .rpc_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| eyre!("missing RPC URL"))?;
        let bridge_address = settings
            .bridge_address
            .as_deref()
            .filter(|addr| !addr.trim().is_empty())
            .ok_or_else(|| eyre!("missing bridge address"))?;

        if bridge_address.len() != 42 || !bridge_address.starts_with("0x") {
            return Err(eyre!(
                "bridge address must be a hex address (42 chars with 0x prefix): {}",
                bridge_address
            ));
        }
        let bridge_address = Address::from_str(bridge_address)
            .map_err(|e| eyre!("invalid bridge address {}: {}", bridge_address, e))?;

        Ok(Self {
            chain_id: settings.chain_id,
            name: settings.name.clone(),
            rpc_url: rpc_url.to_string(),
            bridge_address,
            min_confirmations: settings.min_confirmations,
            max_gas_price_wei: parse_gwei(&settings.max_gas_price_gwei)?,
            gas_limit: settings.gas_limit,
            block_time: Duration::from_millis(settings.block_time_ms),
        })
    }
}

/// Parse a decimal gwei amount ("20", "0.5") into wei without floats.
pub fn parse_gwei(value: &str) -> Result<u128> {
    let value = value.trim();
    let (whole, fraction) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(eyre!("empty gas price"));
    }
    if fraction.len() > 9 {
        return Err(eyre!("gas price {} has more than 9 decimals", value));
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return Err(eyre!("invalid gas price: {}", value));
    }

    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_| eyre!("invalid gas price: {}", value))?
    };
    let fraction_wei: u128 = if fraction.is_empty() {
        0
    } else {
        format!("{:0<9}", fraction)
            .parse()
            .map_err(|_| eyre!("invalid gas price: {}", value))?
    };

    whole
        .checked_mul(WEI_PER_GWEI)
        .and_then(|w| w.checked_add(fraction_wei))
        .ok_or_else(|| eyre!("gas price {} overflows", value))
}

/// Load chain settings from the environment: presets first, then custom
/// chains from `EVM_CHAINS_COUNT` / `EVM_CHAIN_{i}_*`.
pub fn load_from_env() -> Result<Vec<ChainSettings>> {
    let mut settings: Vec<ChainSettings> = PRESETS
        .iter()
        .map(|preset| preset_settings(preset, |key| std::env::var(key).ok()))
        .collect();

    let count: usize = match std::env::var("EVM_CHAINS_COUNT").ok() {
        Some(s) => s
            .parse()
            .map_err(|_| eyre!("EVM_CHAINS_COUNT must be a number"))?,
        None => 0,
    };

    for i in 1..=count {
        let prefix = format!("EVM_CHAIN_{}", i);
        let var = |suffix: &str| std::env::var(format!("{}_{}", prefix, suffix)).ok();

        let chain_id: u64 = var("CHAIN_ID")
            .ok_or_else(|| eyre!("Missing {}_CHAIN_ID", prefix))?
            .parse()
            .map_err(|_| eyre!("Invalid {}_CHAIN_ID", prefix))?;

        let enabled: bool = var("ENABLED")
            .and_then(|s| s.parse().ok())
            .unwrap_or(true);
        if !enabled {
            info!(chain_id, "Custom chain disabled");
            continue;
        }

        let custom = ChainSettings {
            chain_id,
            name: var("NAME").unwrap_or_else(|| format!("chain_{}", i)),
            rpc_url: var("RPC_URL"),
            bridge_address: var("BRIDGE_ADDRESS"),
            min_confirmations: var("MIN_CONFIRMATIONS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(12),
            gas_limit: var("GAS_LIMIT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(300_000),
            max_gas_price_gwei: var("MAX_GAS_PRICE_GWEI").unwrap_or_else(|| "50".to_string()),
            block_time_ms: var("BLOCK_TIME_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(2_000),
        };

        // A custom chain replaces a preset with the same id
        settings.retain(|s| s.chain_id != chain_id);
        settings.push(custom);
    }

    Ok(settings)
}

fn preset_settings(preset: &Preset, var: impl Fn(&str) -> Option<String>) -> ChainSettings {
    let key = |suffix: &str| format!("{}_{}", preset.env_prefix, suffix);

    ChainSettings {
        chain_id: preset.chain_id,
        name: preset.name.to_string(),
        rpc_url: var(&key("RPC_URL")),
        bridge_address: var(&key("BRIDGE_ADDRESS")),
        min_confirmations: var(&key("MIN_CONFIRMATIONS"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(preset.min_confirmations),
        gas_limit: var(&key("GAS_LIMIT"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(preset.gas_limit),
        max_gas_price_gwei: var(&key("MAX_GAS_PRICE_GWEI"))
            .unwrap_or_else(|| preset.max_gas_price_gwei.to_string()),
        block_time_ms: var(&key("BLOCK_TIME_MS"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(preset.block_time_ms),
    }
}
