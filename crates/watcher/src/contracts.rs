use alloy::primitives::{Address, B256, U256};
use alloy::providers::DynProvider;
use alloy::sol;
use async_trait::async_trait;
use eyre::Result;

sol! {
    /// Socket core events, emitted by the main protocol contract.
    #[derive(Debug)]
    event Sealed(
        address indexed transmitter,
        bytes32 indexed packetId,
        uint256 batchSize,
        bytes32 root,
        bytes signature
    );

    #[derive(Debug)]
    event PacketProposed(
        address indexed transmitter,
        bytes32 indexed packetId,
        uint256 proposalCount,
        bytes32 root,
        address switchboard
    );

    #[sol(rpc)]
    interface ISwitchboard {
        function isProposalTripped(bytes32 packetId, uint256 proposalCount) external view returns (bool);
        function tripProposal(bytes32 packetId, uint256 proposalCount) external;
    }
}

/// Enforcement surface of a destination-chain switchboard contract. The
/// processor only ever talks to switchboards through this trait, so tests
/// substitute recording fakes.
#[async_trait]
pub trait Switchboard: Send + Sync {
    fn address(&self) -> Address;

    async fn is_proposal_tripped(&self, packet_id: B256, proposal_count: U256) -> Result<bool>;

    /// Submit the trip transaction and wait for its receipt. A reverted
    /// receipt is an error.
    async fn trip_proposal(&self, packet_id: B256, proposal_count: U256) -> Result<()>;
}

/// `ISwitchboard` bound to a signer-capable provider for one chain.
pub struct SwitchboardContract {
    instance: ISwitchboard::ISwitchboardInstance<DynProvider>,
}

impl SwitchboardContract {
    pub fn new(address: Address, provider: DynProvider) -> Self {
        Self {
            instance: ISwitchboard::new(address, provider),
        }
    }
}

#[async_trait]
impl Switchboard for SwitchboardContract {
    fn address(&self) -> Address {
        *self.instance.address()
    }

    async fn is_proposal_tripped(&self, packet_id: B256, proposal_count: U256) -> Result<bool> {
        let tripped = self
            .instance
            .isProposalTripped(packet_id, proposal_count)
            .call()
            .await?;
        Ok(tripped)
    }

    async fn trip_proposal(&self, packet_id: B256, proposal_count: U256) -> Result<()> {
        let pending = self
            .instance
            .tripProposal(packet_id, proposal_count)
            .send()
            .await?;
        let receipt = pending.get_receipt().await?;
        if !receipt.status() {
            eyre::bail!(
                "trip transaction {} reverted",
                receipt.transaction_hash
            );
        }
        Ok(())
    }
}
