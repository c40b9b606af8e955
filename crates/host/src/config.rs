//! Configuration

use anyhow::{Context, Result};
use rollup_core::{DecimalCodec, Domain, Replayer, TransactionEngine};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

/// Host configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Depth of the balance-state tree
    pub state_tree_depth: usize,
    /// Depth of the public-key registry
    pub registry_depth: usize,
    /// Most transactions in one commitment
    pub max_txs_per_commit: usize,
    /// Height of the subtrees deposits are merged in
    pub deposit_subtree_depth: usize,
    /// Signing domain of the deployment
    pub domain: Domain,
    /// Amount codec exponent width
    pub exponent_bits: u32,
    /// Amount codec mantissa width
    pub mantissa_bits: u32,
    /// Decimals of the token's base unit
    pub place: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_tree_depth: 32,
            registry_depth: 32,
            max_txs_per_commit: 32,
            deposit_subtree_depth: 1,
            domain: [0u8; 32],
            exponent_bits: 4,
            mantissa_bits: 12,
            place: 6,
        }
    }
}

impl Config {
    /// Load from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from any key-value source, falling back to defaults for
    /// missing or unparsable values
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |key: &str, default: usize| {
            lookup(key)
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        };
        let bits = |key: &str, default: u32| {
            lookup(key)
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        };

        Self {
            state_tree_depth: number("STATE_TREE_DEPTH", defaults.state_tree_depth),
            registry_depth: number("REGISTRY_DEPTH", defaults.registry_depth),
            max_txs_per_commit: number("MAX_TXS_PER_COMMIT", defaults.max_txs_per_commit),
            deposit_subtree_depth: number("DEPOSIT_SUBTREE_DEPTH", defaults.deposit_subtree_depth),
            domain: lookup("DOMAIN")
                .and_then(|s| match parse_domain(&s) {
                    Ok(domain) => Some(domain),
                    Err(e) => {
                        warn!("Ignoring DOMAIN: {:#}", e);
                        None
                    }
                })
                .unwrap_or(defaults.domain),
            exponent_bits: bits("EXPONENT_BITS", defaults.exponent_bits),
            mantissa_bits: bits("MANTISSA_BITS", defaults.mantissa_bits),
            place: bits("TOKEN_DECIMALS", defaults.place),
        }
    }

    /// Amount codec described by the config
    pub fn codec(&self) -> Result<DecimalCodec> {
        DecimalCodec::new(self.exponent_bits, self.mantissa_bits, self.place)
            .context("invalid amount codec")
    }

    /// Transaction engine for this deployment
    pub fn engine(&self) -> Result<TransactionEngine> {
        Ok(TransactionEngine::new(self.codec()?, self.max_txs_per_commit))
    }

    /// Replayer matching [`Self::engine`]
    pub fn replayer(&self) -> Result<Replayer> {
        Ok(Replayer::new(
            self.state_tree_depth,
            self.codec()?,
            self.max_txs_per_commit,
        ))
    }
}

/// Parse a 32-byte hex domain, with or without `0x`
fn parse_domain(input: &str) -> Result<Domain> {
    let bytes = hex::decode(input.trim_start_matches("0x")).context("domain is not hex")?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| anyhow::anyhow!("domain has {} bytes, expected 32", bytes.len()))
}
