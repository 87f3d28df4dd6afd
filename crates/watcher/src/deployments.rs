use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use alloy::primitives::Address;
use eyre::{Result, WrapErr};
use serde::Deserialize;

use crate::ChainId;

/// Deployment entry for one chain in the address registry file.
#[derive(Debug, Clone, Deserialize)]
struct ChainDeployment {
    #[serde(rename = "Socket")]
    socket: Address,
    /// integrated chain id -> switchboard type -> addresses.
    #[serde(default)]
    integrations: HashMap<String, HashMap<String, IntegrationEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
struct IntegrationEntry {
    switchboard: Address,
}

/// Parsed deployment-address registry: which Socket contract and which
/// switchboards exist per chain. An unreadable or malformed file is a
/// fatal configuration error.
pub struct DeploymentRegistry {
    chains: HashMap<ChainId, ChainDeployment>,
}

impl DeploymentRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read address file: {}", path.display()))?;
        Self::from_json(&contents)
            .wrap_err_with(|| format!("invalid address file: {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: HashMap<String, ChainDeployment> = serde_json::from_str(json)?;
        let mut chains = HashMap::new();
        for (chain_id, deployment) in raw {
            let chain_id: ChainId = chain_id
                .parse()
                .wrap_err_with(|| format!("invalid chain id key: {chain_id}"))?;
            chains.insert(chain_id, deployment);
        }
        Ok(Self { chains })
    }

    /// Every chain id the registry knows about. The configured chain set
    /// must match this exactly.
    pub fn supported_chain_ids(&self) -> HashSet<ChainId> {
        self.chains.keys().copied().collect()
    }

    pub fn socket_address(&self, chain_id: ChainId) -> Option<Address> {
        self.chains.get(&chain_id).map(|chain| chain.socket)
    }

    /// All switchboard addresses registered for a chain, deduplicated
    /// across integrations and switchboard types.
    pub fn switchboard_addresses(&self, chain_id: ChainId) -> HashSet<Address> {
        let mut addresses = HashSet::new();
        if let Some(chain) = self.chains.get(&chain_id) {
            for types in chain.integrations.values() {
                for entry in types.values() {
                    addresses.insert(entry.switchboard);
                }
            }
        }
        addresses
    }
}
