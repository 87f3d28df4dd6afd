use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use eyre::Result;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use crate::events::Event;
use crate::fetcher::EventFetcher;
use crate::provider::ChainRpc;
use crate::ChainId;

/// Consumer side of a monitor's fan-out. The processor implements this;
/// tests subscribe recording fakes.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn add_events(&self, events: Vec<Event>);

    /// Called exactly once per chain, after the catch-up scan delivered the
    /// full historical backlog.
    async fn mark_sync_done(&self);

    async fn set_rpc_working(&self, working: bool, chain_id: ChainId);
}

/// Per-chain polling state machine: catch up from the deployment block,
/// then poll, fanning decoded events out to every subscriber and tracking
/// RPC health across fetches.
pub struct EventMonitor {
    rpc: Arc<dyn ChainRpc>,
    socket: Address,
    chain_id: ChainId,
    deployment_block: u64,
    poll_period: Duration,
    confirmation_blocks: u64,
    sinks: Vec<Arc<dyn EventSink>>,
    rpc_working: AtomicBool,
    stop: AtomicBool,
}

impl EventMonitor {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        socket: Address,
        deployment_block: u64,
        poll_period: Duration,
        confirmation_blocks: u64,
        chain_id: ChainId,
    ) -> Self {
        Self {
            rpc,
            socket,
            chain_id,
            deployment_block,
            poll_period,
            confirmation_blocks,
            sinks: Vec::new(),
            rpc_working: AtomicBool::new(true),
            stop: AtomicBool::new(false),
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Runs until stopped. Re-entrant: a second call restarts from the
    /// catch-up scan with a fresh cursor.
    #[instrument(skip_all, fields(CHAIN = %self.chain_id))]
    pub async fn run_monitor(&self) -> Result<()> {
        self.stop.store(false, Ordering::SeqCst);
        info!(address = %self.socket, "EventMonitor started");

        let mut fetcher = EventFetcher::new(
            Arc::clone(&self.rpc),
            self.socket,
            self.deployment_block,
            self.confirmation_blocks,
            self.chain_id,
        );

        // Catch-up: scan to the head captured at startup, unthrottled, and
        // deliver the whole backlog as one batch.
        let head = self.rpc.block_number().await?;
        let mut events = Vec::new();
        while fetcher.next_block() <= head && !self.stop.load(Ordering::SeqCst) {
            events.extend(self.fetch(&mut fetcher).await);
        }
        if !events.is_empty() {
            self.deliver(events).await;
        }
        for sink in &self.sinks {
            sink.mark_sync_done().await;
        }
        info!("sync done");

        while !self.stop.load(Ordering::SeqCst) {
            let events = self.fetch(&mut fetcher).await;
            if !events.is_empty() {
                self.deliver(events).await;
            }
            sleep(self.poll_period).await;
        }
        info!("EventMonitor stopped");
        Ok(())
    }

    /// Cooperative: the loop observes the flag at iteration boundaries, so
    /// shutdown latency is bounded by the poll period.
    pub fn stop_monitor(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    async fn deliver(&self, events: Vec<Event>) {
        for sink in &self.sinks {
            sink.add_events(events.clone()).await;
        }
    }

    /// Wrap a fetch attempt with RPC health tracking; every status
    /// transition is broadcast to the sinks so enforcement on this chain
    /// can be deferred while its RPC is down.
    async fn fetch(&self, fetcher: &mut EventFetcher) -> Vec<Event> {
        let was_working = self.rpc_working.load(Ordering::SeqCst);
        let (events, working) = match fetcher.fetch().await {
            Ok(events) => (events, true),
            Err(error) => {
                error!(%error, "fetch failed");
                (Vec::new(), false)
            }
        };
        if was_working != working {
            self.rpc_working.store(working, Ordering::SeqCst);
            for sink in &self.sinks {
                sink.set_rpc_working(working, self.chain_id).await;
            }
            if working {
                info!("RPC started working");
            } else {
                warn!("RPC stopped working");
            }
        }
        events
    }
}
