use std::fmt;

use alloy::primitives::{Address, Bytes, B256, U256};

use crate::{ChainId, PacketId};

/// Attestation emitted once per packet on its origin chain.
#[derive(Debug, Clone)]
pub struct SealedEvent {
    pub chain_id: ChainId,
    pub address: Address,
    pub transmitter: Address,
    pub packet_id: PacketId,
    pub batch_size: U256,
    pub root: B256,
    pub signature: Bytes,
}

/// Relayer claim emitted on a destination chain. `proposal_count`
/// distinguishes repeated proposals for the same packet.
#[derive(Debug, Clone)]
pub struct PacketProposedEvent {
    pub chain_id: ChainId,
    pub address: Address,
    pub transmitter: Address,
    pub packet_id: PacketId,
    pub proposal_count: U256,
    pub root: B256,
    pub switchboard: Address,
}

impl PacketProposedEvent {
    pub fn trip_id(&self) -> TripId {
        TripId {
            packet_id: self.packet_id,
            proposal_count: self.proposal_count,
        }
    }
}

/// Internal marker recorded once enforcement for a trip id has been
/// decided. Never observed on chain.
#[derive(Debug, Clone)]
pub struct ProposalTrippedEvent {
    pub chain_id: ChainId,
    pub address: Address,
    pub packet_id: PacketId,
    pub proposal_count: U256,
}

/// One enforcement decision: a specific proposal of a specific packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TripId {
    pub packet_id: PacketId,
    pub proposal_count: U256,
}

impl fmt::Display for TripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.packet_id, self.proposal_count)
    }
}

/// Everything the fetchers hand to the processor.
#[derive(Debug, Clone)]
pub enum Event {
    Sealed(SealedEvent),
    Proposed(PacketProposedEvent),
    Tripped(ProposalTrippedEvent),
}

impl Event {
    pub fn chain_id(&self) -> ChainId {
        match self {
            Event::Sealed(event) => event.chain_id,
            Event::Proposed(event) => event.chain_id,
            Event::Tripped(event) => event.chain_id,
        }
    }
}
