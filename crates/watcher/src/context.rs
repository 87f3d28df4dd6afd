use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::Address;

use crate::contracts::Switchboard;
use crate::events::{ProposalTrippedEvent, SealedEvent, TripId};
use crate::tracker::Tracker;
use crate::{ChainId, PacketId};

/// One participating chain: its signer-bound contract surface.
pub struct Chain {
    pub chain_id: ChainId,
    pub name: String,
    /// Address of the signing account used for enforcement on this chain.
    pub account: Address,
    /// The main protocol contract emitting `Sealed`/`PacketProposed`.
    pub socket: Address,
    /// Switchboards registered for this chain, by address.
    pub switchboards: HashMap<Address, Arc<dyn Switchboard>>,
}

/// Read-mostly aggregate shared by the processor: correlation state plus
/// the per-chain registry. Created once per process run; the trackers hold
/// no persistent state and die with it.
pub struct Context {
    pub seals: Tracker<PacketId, SealedEvent>,
    pub trips: Tracker<TripId, ProposalTrippedEvent>,
    pub chains: HashMap<ChainId, Chain>,
    pub address: Address,
}

impl Context {
    pub fn new(chains: HashMap<ChainId, Chain>, address: Address) -> Self {
        Self {
            seals: Tracker::new(),
            trips: Tracker::new(),
            chains,
            address,
        }
    }
}
