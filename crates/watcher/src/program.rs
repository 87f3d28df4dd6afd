use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use common::config::MonitorConfig;
use eyre::{bail, eyre, Result, WrapErr};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::context::{Chain, Context};
use crate::contracts::{Switchboard, SwitchboardContract};
use crate::deployments::DeploymentRegistry;
use crate::monitor::{EventMonitor, EventSink};
use crate::processor::EventProcessor;
use crate::provider::EvmRpc;
use crate::ChainId;

/// Owns the per-chain monitors and the single processor, and wires them to
/// live providers from the configuration and deployment registry.
pub struct MonitorProgram {
    config: MonitorConfig,
    monitors: HashMap<ChainId, Arc<EventMonitor>>,
    processor: Option<Arc<EventProcessor>>,
}

impl MonitorProgram {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            monitors: HashMap::new(),
            processor: None,
        }
    }

    /// Resolve the deployment registry, unlock the signing account, build
    /// one provider + monitor per configured chain and the shared
    /// processor. Any failure here is a fatal configuration error.
    pub async fn init(&mut self) -> Result<()> {
        self.monitors.clear();
        self.processor = None;

        let registry = DeploymentRegistry::load(&self.config.addresses_file)?;
        let signer = PrivateKeySigner::decrypt_keystore(
            &self.config.account.path,
            &self.config.account.password,
        )
        .wrap_err_with(|| {
            format!(
                "failed to decrypt keystore: {}",
                self.config.account.path.display()
            )
        })?;
        let account = signer.address();
        let supported = registry.supported_chain_ids();

        let mut chains: HashMap<ChainId, Chain> = HashMap::new();
        let mut monitors: HashMap<ChainId, EventMonitor> = HashMap::new();
        let mut skipped: Vec<String> = Vec::new();
        for (name, entry) in &self.config.chains {
            let settings = self.config.chain_settings(entry);
            let provider = ProviderBuilder::new()
                .wallet(EthereumWallet::from(signer.clone()))
                .connect(&settings.rpc_url)
                .await
                .wrap_err_with(|| format!("failed to connect to chain {name}"))?
                .erased();
            let chain_id = provider.get_chain_id().await?;
            if chains.contains_key(&chain_id) {
                warn!(chain = name, chain_id, "duplicate chain id, skipping");
                skipped.push(name.clone());
                continue;
            }
            if !supported.contains(&chain_id) {
                warn!(
                    chain = name,
                    chain_id, "chain is not in the deployment registry, skipping"
                );
                skipped.push(name.clone());
                continue;
            }

            let socket = registry
                .socket_address(chain_id)
                .ok_or_else(|| eyre!("no Socket deployment for chain {chain_id}"))?;
            let mut switchboards: HashMap<Address, Arc<dyn Switchboard>> = HashMap::new();
            for address in registry.switchboard_addresses(chain_id) {
                switchboards.insert(
                    address,
                    Arc::new(SwitchboardContract::new(address, provider.clone())),
                );
            }
            chains.insert(
                chain_id,
                Chain {
                    chain_id,
                    name: name.clone(),
                    account,
                    socket,
                    switchboards,
                },
            );
            monitors.insert(
                chain_id,
                EventMonitor::new(
                    Arc::new(EvmRpc::new(provider)),
                    socket,
                    settings.deployment_block,
                    Duration::from_millis(settings.poll_period_ms),
                    settings.confirmation_blocks,
                    chain_id,
                ),
            );
        }

        let configured: HashSet<ChainId> = chains.keys().copied().collect();
        check_chain_sets(&configured, &supported, &skipped)?;

        let context = Arc::new(Context::new(chains, account));
        let processor = Arc::new(EventProcessor::new(context));
        for monitor in monitors.values_mut() {
            // One processor for all chains: the proposal alone cannot name
            // its origin chain, so correlation needs the unified view.
            monitor.subscribe(Arc::clone(&processor) as Arc<dyn EventSink>);
        }
        self.monitors = monitors
            .into_iter()
            .map(|(chain_id, monitor)| (chain_id, Arc::new(monitor)))
            .collect();
        self.processor = Some(processor);
        info!(chains = self.monitors.len(), "monitor program initialized");
        Ok(())
    }

    /// Run every monitor plus the processor to completion. The first task
    /// fault is surfaced as the program error; dropping the set cancels
    /// the rest.
    pub async fn run(&self) -> Result<()> {
        let processor = self
            .processor
            .clone()
            .ok_or_else(|| eyre!("program is not initialized"))?;

        let mut tasks = JoinSet::new();
        for monitor in self.monitors.values() {
            let monitor = Arc::clone(monitor);
            tasks.spawn(async move { monitor.run_monitor().await });
        }
        tasks.spawn(async move { processor.run_processor().await });

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    error!(%error, "monitor task failed");
                    return Err(error);
                }
                Err(join_error) => {
                    error!(%join_error, "monitor task panicked");
                    return Err(eyre::Report::new(join_error));
                }
            }
        }
        Ok(())
    }

    /// Cooperative shutdown; idempotent.
    pub fn stop(&self) {
        for monitor in self.monitors.values() {
            monitor.stop_monitor();
        }
        if let Some(processor) = &self.processor {
            processor.stop_processor();
        }
    }
}

/// The configured chain set must equal the registry's supported set
/// exactly; a configured chain that got skipped during init is a mismatch
/// even when the surviving sets agree.
fn check_chain_sets(
    configured: &HashSet<ChainId>,
    supported: &HashSet<ChainId>,
    skipped: &[String],
) -> Result<()> {
    if !skipped.is_empty() {
        bail!("configured chains do not match the deployment registry (skipped: {skipped:?})");
    }
    if configured != supported {
        let mut missing: Vec<_> = supported.difference(configured).collect();
        missing.sort();
        bail!("configured chains do not match the deployment registry (missing: {missing:?})");
    }
    Ok(())
}
