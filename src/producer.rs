//! Block production loop for LVE Node
//!
//! A single cooperative task that wakes shortly after every slot boundary,
//! reports slots that passed without a block, and asks the node to produce
//! when the election lands on this identity. The loop never performs
//! network I/O: a produced block reaches the P2P layer through the node's
//! event channel.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::identity::NodeIdentity;
use crate::node::Node;
use crate::vrf;

/// Grace period past the slot boundary before waking, so a block broadcast
/// right at the boundary has a chance to arrive first.
const SLOT_WAKE_GRACE_MS: u64 = 100;

pub struct BlockProducer {
    node: Arc<Node>,
    identity: NodeIdentity,
}

impl BlockProducer {
    pub fn new(node: Arc<Node>, identity: NodeIdentity) -> Self {
        Self { node, identity }
    }

    /// Run until the shutdown channel fires. A stopped producer neither
    /// observes nor misses slots.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let params = self.node.read(|state| state.params().clone()).await;
        let genesis = params.genesis_time_ms;
        let slot_ms = params.slot_duration_ms;
        let mut last_processed_slot = vrf::slot_at(vrf::now_ms(), genesis, slot_ms);
        let mut last_produced_slot: Option<u64> = None;
        info!(address = %self.identity.address(), "block producer started");

        loop {
            let wait = vrf::time_until_next_slot_ms(vrf::now_ms(), genesis, slot_ms)
                + SLOT_WAKE_GRACE_MS;
            tokio::select! {
                _ = sleep(Duration::from_millis(wait)) => {}
                _ = shutdown.recv() => {
                    info!("block producer stopped");
                    return;
                }
            }

            let now = vrf::now_ms();
            let current_slot = vrf::slot_at(now, genesis, slot_ms);
            if current_slot <= last_processed_slot {
                continue;
            }
            // Settle liveness accounting for every slot that fully elapsed
            self.node.observe_slot(current_slot).await;

            if last_produced_slot == Some(current_slot) {
                last_processed_slot = current_slot;
                continue;
            }
            match self.node.produce_block(&self.identity, current_slot, now).await {
                Ok(Some(block)) => {
                    last_produced_slot = Some(current_slot);
                    debug!(index = block.index, slot = current_slot, "slot led by this node");
                }
                Ok(None) => {}
                Err(e) => warn!(slot = current_slot, error = %e, "block production failed"),
            }
            last_processed_slot = current_slot;
        }
    }
}
