use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use eyre::Result;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::contracts::Switchboard;
use crate::events::{Event, PacketProposedEvent, ProposalTrippedEvent, SealedEvent};
use crate::monitor::EventSink;
use crate::ChainId;

const WAIT_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct ProcessorState {
    backlog: Vec<Event>,
    syncs_done: usize,
}

/// The single correlation-and-enforcement engine shared by every chain.
///
/// Packets are sealed on one chain and proposed on another, and the packet
/// id is the only correlation key, so there is exactly one processor for
/// the whole system; sharding it per chain would split the seal/proposal
/// pairing.
pub struct EventProcessor {
    context: Arc<Context>,
    chain_ids: HashSet<ChainId>,
    switchboards: HashMap<ChainId, HashMap<Address, Arc<dyn Switchboard>>>,
    state: Mutex<ProcessorState>,
    rpc_working: Mutex<HashMap<ChainId, bool>>,
    stop: AtomicBool,
}

impl EventProcessor {
    pub fn new(context: Arc<Context>) -> Self {
        let chain_ids: HashSet<ChainId> = context.chains.keys().copied().collect();
        let mut switchboards = HashMap::new();
        let mut rpc_working = HashMap::new();
        for chain in context.chains.values() {
            switchboards.insert(chain.chain_id, chain.switchboards.clone());
            rpc_working.insert(chain.chain_id, true);
        }
        Self {
            context,
            chain_ids,
            switchboards,
            state: Mutex::new(ProcessorState::default()),
            rpc_working: Mutex::new(rpc_working),
            stop: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// True once every participating chain has finished its catch-up scan.
    /// Proposals are never judged before this holds, so a seal that exists
    /// on chain can never be missed for having not been ingested yet.
    pub async fn is_synced(&self) -> bool {
        self.state.lock().await.syncs_done == self.chain_ids.len()
    }

    pub async fn run_processor(&self) -> Result<()> {
        self.stop.store(false, Ordering::SeqCst);
        info!("EventProcessor started");
        while !self.is_synced().await && !self.stop.load(Ordering::SeqCst) {
            sleep(WAIT_INTERVAL).await;
        }
        while !self.stop.load(Ordering::SeqCst) {
            sleep(WAIT_INTERVAL).await;
            let has_backlog = !self.state.lock().await.backlog.is_empty();
            if has_backlog {
                self.process_events().await;
            }
        }
        info!("EventProcessor stopped");
        Ok(())
    }

    pub fn stop_processor(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// One processing pass over a snapshot of the backlog. The lock is
    /// dropped while the snapshot is evaluated so the monitors can keep
    /// appending; the merge step removes exactly the snapshot and keeps
    /// both the requeued subset and anything that arrived meanwhile.
    pub(crate) async fn process_events(&self) {
        let snapshot = { self.state.lock().await.backlog.clone() };
        let started = Instant::now();

        let mut requeued: Vec<Event> = Vec::new();
        for event in &snapshot {
            match event {
                Event::Sealed(sealed) => {
                    // Last write wins; the protocol guarantees at most one
                    // valid seal per packet.
                    self.context
                        .seals
                        .set(sealed.packet_id, sealed.clone())
                        .await;
                }
                Event::Proposed(proposed) => {
                    if let Some(event) = self.process_proposal(proposed).await {
                        requeued.push(event);
                    }
                }
                Event::Tripped(_) => {}
            }
        }

        let remaining = {
            let mut state = self.state.lock().await;
            state.backlog.drain(..snapshot.len());
            state.backlog.extend(requeued);
            state.backlog.len()
        };
        debug!(
            duration_ms = started.elapsed().as_millis() as u64,
            num_events = remaining,
            "finished iteration"
        );
    }

    /// Returns the event if it must be requeued for a later pass.
    async fn process_proposal(&self, proposed: &PacketProposedEvent) -> Option<Event> {
        let trip_id = proposed.trip_id();

        let known_switchboards = self.switchboards.get(&proposed.chain_id);
        let switchboard = known_switchboards.and_then(|map| map.get(&proposed.switchboard));
        let Some(switchboard) = switchboard else {
            // Configuration mismatch, not a transient fault: dropped for
            // good.
            warn!(
                chain_id = proposed.chain_id,
                switchboard = %proposed.switchboard,
                "used switchboard is not defined in the deployment registry"
            );
            return None;
        };

        let Some(seal) = self.context.seals.get(&proposed.packet_id).await else {
            // The seal is fetched by another chain's monitor and may simply
            // not have arrived yet.
            return Some(Event::Proposed(proposed.clone()));
        };

        if seal_matches_proposal(&seal, proposed) {
            return None;
        }

        let old_trip = self.context.trips.get(&trip_id).await;
        if old_trip.is_some() {
            // Enforcement for this proposal is already in flight or decided.
            return None;
        }

        let marker = ProposalTrippedEvent {
            chain_id: proposed.chain_id,
            address: proposed.switchboard,
            packet_id: proposed.packet_id,
            proposal_count: proposed.proposal_count,
        };
        self.context.trips.set(trip_id, marker).await;
        warn!(
            chain_id = proposed.chain_id,
            trip_id = %trip_id,
            seal_root = %seal.root,
            proposal_root = %proposed.root,
            "seal/proposal mismatch found"
        );

        let rpc_working = self
            .rpc_working
            .lock()
            .await
            .get(&proposed.chain_id)
            .copied()
            .unwrap_or(false);
        if !rpc_working {
            // Keep the event around until the chain's RPC recovers; the
            // marker stays so no second trip is started meanwhile.
            return Some(Event::Proposed(proposed.clone()));
        }

        match self.send_trip(switchboard.as_ref(), proposed).await {
            Ok(()) => None,
            Err(error) => {
                error!(
                    chain_id = proposed.chain_id,
                    trip_id = %trip_id,
                    %error,
                    "could not send tripProposal"
                );
                // Compensating rollback: the marker only survives a send
                // that was actually handled.
                self.context.trips.delete(&trip_id).await;
                Some(Event::Proposed(proposed.clone()))
            }
        }
    }

    async fn send_trip(
        &self,
        switchboard: &dyn Switchboard,
        proposed: &PacketProposedEvent,
    ) -> Result<()> {
        let already_tripped = switchboard
            .is_proposal_tripped(proposed.packet_id, proposed.proposal_count)
            .await?;
        if already_tripped {
            return Ok(());
        }
        switchboard
            .trip_proposal(proposed.packet_id, proposed.proposal_count)
            .await?;
        info!(
            chain_id = proposed.chain_id,
            trip_id = %proposed.trip_id(),
            "proposal tripped"
        );
        Ok(())
    }
}

#[async_trait]
impl EventSink for EventProcessor {
    async fn add_events(&self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        let source = events[0].chain_id();
        let mut state = self.state.lock().await;
        state.backlog.extend(events);
        debug!(source, num_events = state.backlog.len(), "new events");
    }

    async fn mark_sync_done(&self) {
        self.state.lock().await.syncs_done += 1;
    }

    async fn set_rpc_working(&self, working: bool, chain_id: ChainId) {
        self.rpc_working.lock().await.insert(chain_id, working);
    }
}

fn seal_matches_proposal(seal: &SealedEvent, proposed: &PacketProposedEvent) -> bool {
    seal.root == proposed.root
        && seal.transmitter == proposed.transmitter
        && seal.packet_id == proposed.packet_id
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    use alloy::primitives::{Bytes, B256, U256};

    use super::*;
    use crate::context::Chain;
    use crate::events::TripId;

    const ORIGIN: ChainId = 1;
    const DESTINATION: ChainId = 10;

    /// Switchboard fake: records trips, can be made to fail, to report the
    /// proposal as already tripped on chain, or to block mid-send until
    /// released (for interleaving tests).
    struct FakeSwitchboard {
        address: Address,
        trips: StdMutex<Vec<TripId>>,
        is_tripped_queries: AtomicUsize,
        already_tripped: AtomicBool,
        fail_sends: AtomicBool,
        hold_sends: AtomicBool,
        entered: tokio::sync::Semaphore,
        gate: tokio::sync::Semaphore,
    }

    impl FakeSwitchboard {
        fn new(address: Address) -> Arc<Self> {
            Arc::new(Self {
                address,
                trips: StdMutex::new(Vec::new()),
                is_tripped_queries: AtomicUsize::new(0),
                already_tripped: AtomicBool::new(false),
                fail_sends: AtomicBool::new(false),
                hold_sends: AtomicBool::new(false),
                entered: tokio::sync::Semaphore::new(0),
                gate: tokio::sync::Semaphore::new(0),
            })
        }

        fn trips(&self) -> Vec<TripId> {
            self.trips.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Switchboard for FakeSwitchboard {
        fn address(&self) -> Address {
            self.address
        }

        async fn is_proposal_tripped(
            &self,
            _packet_id: B256,
            _proposal_count: U256,
        ) -> Result<bool> {
            self.is_tripped_queries.fetch_add(1, Ordering::SeqCst);
            Ok(self.already_tripped.load(Ordering::SeqCst))
        }

        async fn trip_proposal(&self, packet_id: B256, proposal_count: U256) -> Result<()> {
            if self.fail_sends.load(Ordering::SeqCst) {
                eyre::bail!("transaction reverted");
            }
            if self.hold_sends.load(Ordering::SeqCst) {
                self.entered.add_permits(1);
                let _permit = self.gate.acquire().await.unwrap();
            }
            self.trips.lock().unwrap().push(TripId {
                packet_id,
                proposal_count,
            });
            Ok(())
        }
    }

    fn switchboard_address() -> Address {
        Address::repeat_byte(0x5b)
    }

    fn setup() -> (Arc<EventProcessor>, Arc<FakeSwitchboard>) {
        let switchboard = FakeSwitchboard::new(switchboard_address());
        let mut chains = HashMap::new();
        chains.insert(
            ORIGIN,
            Chain {
                chain_id: ORIGIN,
                name: "origin".into(),
                account: Address::repeat_byte(0x01),
                socket: Address::repeat_byte(0xa1),
                switchboards: HashMap::new(),
            },
        );
        let mut destination_switchboards: HashMap<Address, Arc<dyn Switchboard>> = HashMap::new();
        destination_switchboards.insert(
            switchboard.address,
            Arc::clone(&switchboard) as Arc<dyn Switchboard>,
        );
        chains.insert(
            DESTINATION,
            Chain {
                chain_id: DESTINATION,
                name: "destination".into(),
                account: Address::repeat_byte(0x01),
                socket: Address::repeat_byte(0xa2),
                switchboards: destination_switchboards,
            },
        );
        let context = Arc::new(Context::new(chains, Address::repeat_byte(0x01)));
        (Arc::new(EventProcessor::new(context)), switchboard)
    }

    fn packet() -> B256 {
        B256::repeat_byte(0x70)
    }

    fn sealed(root: B256) -> Event {
        Event::Sealed(SealedEvent {
            chain_id: ORIGIN,
            address: Address::repeat_byte(0xa1),
            transmitter: Address::repeat_byte(0x11),
            packet_id: packet(),
            batch_size: U256::from(1),
            root,
            signature: Bytes::from(vec![0x01]),
        })
    }

    fn proposed(root: B256) -> Event {
        proposed_via(root, switchboard_address())
    }

    fn proposed_via(root: B256, switchboard: Address) -> Event {
        Event::Proposed(PacketProposedEvent {
            chain_id: DESTINATION,
            address: Address::repeat_byte(0xa2),
            transmitter: Address::repeat_byte(0x11),
            packet_id: packet(),
            proposal_count: U256::ZERO,
            root,
            switchboard,
        })
    }

    fn trip_id() -> TripId {
        TripId {
            packet_id: packet(),
            proposal_count: U256::ZERO,
        }
    }

    async fn backlog_len(processor: &EventProcessor) -> usize {
        processor.state.lock().await.backlog.len()
    }

    #[tokio::test]
    async fn matching_proposal_is_consistent() {
        let (processor, switchboard) = setup();
        let root = B256::repeat_byte(0xcc);
        processor.add_events(vec![sealed(root), proposed(root)]).await;
        processor.process_events().await;

        assert!(switchboard.trips().is_empty());
        assert_eq!(switchboard.is_tripped_queries.load(Ordering::SeqCst), 0);
        assert_eq!(processor.context.trips.len().await, 0);
        assert_eq!(backlog_len(&processor).await, 0);
    }

    #[tokio::test]
    async fn mismatched_root_trips_exactly_once() {
        let (processor, switchboard) = setup();
        processor
            .add_events(vec![
                sealed(B256::repeat_byte(0xcc)),
                proposed(B256::repeat_byte(0xdd)),
            ])
            .await;
        processor.process_events().await;

        assert_eq!(switchboard.trips(), vec![trip_id()]);
        assert!(processor.context.trips.get(&trip_id()).await.is_some());
        assert_eq!(backlog_len(&processor).await, 0);

        // Redelivery of the same proposal must not trip again.
        processor
            .add_events(vec![proposed(B256::repeat_byte(0xdd))])
            .await;
        processor.process_events().await;
        assert_eq!(switchboard.trips().len(), 1);
    }

    #[tokio::test]
    async fn proposal_waits_for_its_seal() {
        let (processor, switchboard) = setup();
        let root = B256::repeat_byte(0xcc);
        processor.add_events(vec![proposed(root)]).await;
        processor.process_events().await;

        // No seal yet: requeued, nothing judged.
        assert_eq!(backlog_len(&processor).await, 1);
        assert!(switchboard.trips().is_empty());

        processor.add_events(vec![sealed(root)]).await;
        processor.process_events().await;
        assert_eq!(backlog_len(&processor).await, 0);
        assert!(switchboard.trips().is_empty());
        assert_eq!(processor.context.trips.len().await, 0);
    }

    #[tokio::test]
    async fn failed_send_rolls_back_the_marker_and_retries() {
        let (processor, switchboard) = setup();
        switchboard.fail_sends.store(true, Ordering::SeqCst);
        processor
            .add_events(vec![
                sealed(B256::repeat_byte(0xcc)),
                proposed(B256::repeat_byte(0xdd)),
            ])
            .await;
        processor.process_events().await;

        assert!(switchboard.trips().is_empty());
        assert!(processor.context.trips.get(&trip_id()).await.is_none());
        assert_eq!(backlog_len(&processor).await, 1);

        // Next pass succeeds once the chain recovers.
        switchboard.fail_sends.store(false, Ordering::SeqCst);
        processor.process_events().await;
        assert_eq!(switchboard.trips(), vec![trip_id()]);
        assert!(processor.context.trips.get(&trip_id()).await.is_some());
        assert_eq!(backlog_len(&processor).await, 0);
    }

    #[tokio::test]
    async fn already_tripped_on_chain_counts_as_handled() {
        let (processor, switchboard) = setup();
        switchboard.already_tripped.store(true, Ordering::SeqCst);
        processor
            .add_events(vec![
                sealed(B256::repeat_byte(0xcc)),
                proposed(B256::repeat_byte(0xdd)),
            ])
            .await;
        processor.process_events().await;

        // The idempotent no-op: queried, not re-sent, marker kept.
        assert_eq!(switchboard.is_tripped_queries.load(Ordering::SeqCst), 1);
        assert!(switchboard.trips().is_empty());
        assert!(processor.context.trips.get(&trip_id()).await.is_some());
        assert_eq!(backlog_len(&processor).await, 0);
    }

    #[tokio::test]
    async fn unknown_switchboard_is_dropped_without_mutation() {
        let (processor, switchboard) = setup();
        processor
            .add_events(vec![
                sealed(B256::repeat_byte(0xcc)),
                proposed_via(B256::repeat_byte(0xdd), Address::repeat_byte(0x99)),
            ])
            .await;
        processor.process_events().await;

        assert!(switchboard.trips().is_empty());
        assert_eq!(processor.context.trips.len().await, 0);
        assert_eq!(backlog_len(&processor).await, 0);
    }

    #[tokio::test]
    async fn unhealthy_rpc_defers_the_send_but_keeps_the_marker() {
        let (processor, switchboard) = setup();
        processor.set_rpc_working(false, DESTINATION).await;
        processor
            .add_events(vec![
                sealed(B256::repeat_byte(0xcc)),
                proposed(B256::repeat_byte(0xdd)),
            ])
            .await;
        processor.process_events().await;

        assert!(switchboard.trips().is_empty());
        assert!(processor.context.trips.get(&trip_id()).await.is_some());
        assert_eq!(backlog_len(&processor).await, 1);
    }

    #[tokio::test]
    async fn events_arriving_during_a_pass_survive_the_merge() {
        let (processor, switchboard) = setup();
        switchboard.hold_sends.store(true, Ordering::SeqCst);
        processor
            .add_events(vec![
                sealed(B256::repeat_byte(0xcc)),
                proposed(B256::repeat_byte(0xdd)),
            ])
            .await;

        let pass = {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move { processor.process_events().await })
        };
        // The pass is parked inside the send; append a fresh event from a
        // producer, then let the send finish.
        switchboard.entered.acquire().await.unwrap().forget();
        processor
            .add_events(vec![sealed(B256::repeat_byte(0xee))])
            .await;
        switchboard.gate.add_permits(1);
        pass.await.unwrap();

        // The snapshot was removed, the mid-pass arrival was not.
        assert_eq!(switchboard.trips(), vec![trip_id()]);
        assert_eq!(backlog_len(&processor).await, 1);
    }

    #[tokio::test]
    async fn sync_gate_requires_every_chain() {
        let (processor, _switchboard) = setup();
        assert!(!processor.is_synced().await);
        processor.mark_sync_done().await;
        assert!(!processor.is_synced().await);
        processor.mark_sync_done().await;
        assert!(processor.is_synced().await);
    }

    #[tokio::test]
    async fn later_seal_overwrites_earlier_one() {
        let (processor, _switchboard) = setup();
        processor
            .add_events(vec![sealed(B256::repeat_byte(0x01))])
            .await;
        processor.process_events().await;
        processor
            .add_events(vec![sealed(B256::repeat_byte(0x02))])
            .await;
        processor.process_events().await;

        let seal = processor.context.seals.get(&packet()).await.unwrap();
        assert_eq!(seal.root, B256::repeat_byte(0x02));
        assert_eq!(processor.context.seals.len().await, 1);
    }
}
