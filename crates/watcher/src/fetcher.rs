use std::sync::Arc;

use alloy::primitives::Address;
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use alloy::transports::TransportError;
use eyre::Result;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::contracts::{PacketProposed, Sealed};
use crate::events::{Event, PacketProposedEvent, SealedEvent};
use crate::provider::ChainRpc;
use crate::ChainId;

const DEFAULT_BLOCKS: u64 = 1_000;
const MIN_BLOCKS: u64 = 2;
const MAX_BLOCKS: u64 = 100_000;
/// `eth_getLogs` latency below this doubles the window.
const GET_LOGS_THRESHOLD_FAST_MS: u128 = 2_000;
/// `eth_getLogs` latency above this halves the window.
const GET_LOGS_THRESHOLD_SLOW_MS: u128 = 5_000;
/// Provider error code for a log query spanning too many blocks.
const RANGE_TOO_LARGE_CODE: i64 = -32614;

/// Pulls logs from a moving block cursor and decodes them into typed
/// events, adapting the request window to how the RPC behaves.
pub struct EventFetcher {
    rpc: Arc<dyn ChainRpc>,
    socket: Address,
    chain_id: ChainId,
    confirmation_blocks: u64,
    next_block_number: u64,
    blocks_to_fetch: u64,
}

impl EventFetcher {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        socket: Address,
        start_block: u64,
        confirmation_blocks: u64,
        chain_id: ChainId,
    ) -> Self {
        Self {
            rpc,
            socket,
            chain_id,
            confirmation_blocks,
            next_block_number: start_block,
            blocks_to_fetch: DEFAULT_BLOCKS,
        }
    }

    /// Last block known to be fully fetched.
    pub fn synced_block(&self) -> u64 {
        self.next_block_number.saturating_sub(1)
    }

    /// First block the next fetch will start from.
    pub fn next_block(&self) -> u64 {
        self.next_block_number
    }

    pub fn blocks_to_fetch(&self) -> u64 {
        self.blocks_to_fetch
    }

    /// Fetch everything between the cursor and the confirmed head. The
    /// cursor only moves forward on normal completion; a failed head read
    /// yields no events and leaves it untouched.
    pub async fn fetch(&mut self) -> Result<Vec<Event>> {
        let head = match self.rpc.block_number().await {
            Ok(head) => head,
            Err(error) => {
                error!(chain_id = self.chain_id, %error, "cannot retrieve current block number");
                return Ok(Vec::new());
            }
        };
        let confirmed = head.saturating_sub(self.confirmation_blocks);
        if confirmed < self.next_block_number {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        let mut from_block = self.next_block_number;
        while from_block <= confirmed {
            let to_block = confirmed.min(from_block + self.blocks_to_fetch);
            // `None` means the range was too large; retry the same cursor
            // with the shrunken window.
            if let Some(batch) = self.fetch_range(from_block, to_block).await? {
                events.extend(batch);
                from_block = to_block + 1;
            }
        }
        self.next_block_number = from_block;
        Ok(events)
    }

    async fn fetch_range(&mut self, from_block: u64, to_block: u64) -> Result<Option<Vec<Event>>> {
        debug!(
            chain_id = self.chain_id,
            address = %self.socket,
            from_block,
            to_block,
            "fetching events"
        );
        let filter = Filter::new()
            .address(self.socket)
            .from_block(from_block)
            .to_block(to_block);

        let started = Instant::now();
        let logs = match self.rpc.logs(&filter).await {
            Ok(logs) => {
                let elapsed_ms = started.elapsed().as_millis();
                if elapsed_ms < GET_LOGS_THRESHOLD_FAST_MS {
                    self.blocks_to_fetch = MAX_BLOCKS.min(self.blocks_to_fetch * 2);
                } else if elapsed_ms > GET_LOGS_THRESHOLD_SLOW_MS {
                    self.blocks_to_fetch = MIN_BLOCKS.max(self.blocks_to_fetch.div_ceil(2));
                }
                logs
            }
            Err(error) if is_range_too_large(&error) => {
                let old_window = self.blocks_to_fetch;
                self.blocks_to_fetch = MIN_BLOCKS.max(old_window.div_ceil(5));
                debug!(
                    chain_id = self.chain_id,
                    old = old_window,
                    new = self.blocks_to_fetch,
                    %error,
                    "failed to get events, reducing number of blocks"
                );
                return Ok(None);
            }
            Err(error) => {
                // The range is skipped, not retried. Logged with its bounds
                // so the gap can be backfilled by restarting from an
                // earlier deployment block.
                error!(
                    chain_id = self.chain_id,
                    from_block,
                    to_block,
                    %error,
                    "failed to get events, skipping range"
                );
                return Ok(Some(Vec::new()));
            }
        };

        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            if let Some(event) = self.decode_log(log)? {
                events.push(event);
            }
        }
        Ok(Some(events))
    }

    /// Decode a raw log by its signature topic. Logs for other events are
    /// dropped; a log that matches a known signature but fails to decode is
    /// an error.
    fn decode_log(&self, log: &Log) -> Result<Option<Event>> {
        let event = match log.topic0() {
            Some(&Sealed::SIGNATURE_HASH) => {
                let sealed = log.log_decode::<Sealed>()?.inner.data;
                Some(Event::Sealed(SealedEvent {
                    chain_id: self.chain_id,
                    address: log.address(),
                    transmitter: sealed.transmitter,
                    packet_id: sealed.packetId,
                    batch_size: sealed.batchSize,
                    root: sealed.root,
                    signature: sealed.signature,
                }))
            }
            Some(&PacketProposed::SIGNATURE_HASH) => {
                let proposed = log.log_decode::<PacketProposed>()?.inner.data;
                Some(Event::Proposed(PacketProposedEvent {
                    chain_id: self.chain_id,
                    address: log.address(),
                    transmitter: proposed.transmitter,
                    packet_id: proposed.packetId,
                    proposal_count: proposed.proposalCount,
                    root: proposed.root,
                    switchboard: proposed.switchboard,
                }))
            }
            _ => None,
        };
        Ok(event)
    }
}

fn is_range_too_large(error: &TransportError) -> bool {
    error
        .as_error_resp()
        .is_some_and(|payload| payload.code == RANGE_TOO_LARGE_CODE)
}
