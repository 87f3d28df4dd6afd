pub mod context;
pub mod contracts;
pub mod deployments;
pub mod events;
pub mod fetcher;
pub mod monitor;
pub mod processor;
pub mod program;
pub mod provider;
pub mod tracker;

/// Chain ids as reported by `eth_chainId`.
pub type ChainId = u64;

/// Packet identifiers are stable across the origin/destination pair and are
/// the correlation key between seals and proposals.
pub type PacketId = alloy::primitives::B256;
