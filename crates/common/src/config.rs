use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat};
use eyre::{bail, Result, WrapErr};
use serde::Deserialize;

pub const DEFAULT_POLL_PERIOD_MS: u64 = 5_000;
pub const DEFAULT_CONFIRMATION_BLOCKS: u64 = 0;

/// Top-level monitor configuration, read from a TOML file.
///
/// Global `poll-period` and `confirmation-blocks` act as defaults for
/// chains that do not override them.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MonitorConfig {
    pub addresses_file: PathBuf,
    pub poll_period: Option<u64>,
    pub confirmation_blocks: Option<u64>,
    pub account: AccountConfig,
    pub chains: HashMap<String, ChainEntry>,
}

/// Encrypted JSON keystore holding the signing account.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub path: PathBuf,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainEntry {
    pub rpc_url: String,
    pub deployment_block: u64,
    pub poll_period: Option<u64>,
    pub confirmation_blocks: Option<u64>,
}

/// Per-chain settings after defaults have been applied.
#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub rpc_url: String,
    pub deployment_block: u64,
    pub poll_period_ms: u64,
    pub confirmation_blocks: u64,
}

impl MonitorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml))
            .build()
            .wrap_err_with(|| format!("failed to read config file: {}", path.display()))?;
        let config: MonitorConfig = settings
            .try_deserialize()
            .wrap_err_with(|| format!("invalid config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config from an in-memory TOML string.
    pub fn from_toml(toml: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        let config: MonitorConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            bail!("config declares no chains");
        }
        if self.account.password.is_empty() {
            bail!("account password must not be empty");
        }
        for (name, chain) in &self.chains {
            if chain.rpc_url.is_empty() {
                bail!("chain {name} has an empty rpc-url");
            }
        }
        Ok(())
    }

    /// Resolve one chain's settings, falling back to the global values and
    /// then the built-in defaults.
    pub fn chain_settings(&self, entry: &ChainEntry) -> ChainSettings {
        ChainSettings {
            rpc_url: entry.rpc_url.clone(),
            deployment_block: entry.deployment_block,
            poll_period_ms: entry
                .poll_period
                .or(self.poll_period)
                .unwrap_or(DEFAULT_POLL_PERIOD_MS),
            confirmation_blocks: entry
                .confirmation_blocks
                .or(self.confirmation_blocks)
                .unwrap_or(DEFAULT_CONFIRMATION_BLOCKS),
        }
    }
}
