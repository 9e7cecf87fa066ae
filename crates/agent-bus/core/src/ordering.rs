//! Per-conversation FIFO with a global concurrency bound.
//!
//! Each conversation gets a lane: a fair async mutex, so waiters are served
//! in arrival order. Lanes are created on demand and dropped when the last
//! holder or waiter leaves. A semaphore caps how many messages are in the
//! pipeline at once; it is acquired after the lane so a queued message
//! never holds a slot while it waits for its turn.

use std::collections::HashMap;
use std::sync::Arc;

use agent_bus_types::{BusError, BusResult, ConversationId};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};

type Lanes = Arc<Mutex<HashMap<ConversationId, Arc<AsyncMutex<()>>>>>;

pub struct ConversationSequencer {
    lanes: Lanes,
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl ConversationSequencer {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            lanes: Arc::new(Mutex::new(HashMap::new())),
            slots: Arc::new(Semaphore::new(max_concurrent)),
            capacity: max_concurrent,
        }
    }

    /// Wait for this conversation's turn and a free slot.
    pub async fn acquire(&self, conversation_id: ConversationId) -> BusResult<SequencePermit> {
        let lane = {
            let mut lanes = self.lanes.lock();
            lanes
                .entry(conversation_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let mut permit = SequencePermit {
            conversation_id,
            lane: lane.clone(),
            lanes: self.lanes.clone(),
            turn: None,
            slot: None,
        };

        permit.turn = Some(lane.lock_owned().await);
        permit.slot = Some(
            self.slots
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| BusError::BusNotStarted)?,
        );
        Ok(permit)
    }

    /// Conversations with a holder or waiter.
    pub fn active_conversations(&self) -> usize {
        self.lanes.lock().len()
    }

    /// Free pipeline slots.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Refuse further acquisitions; waiters fail with `BusNotStarted`.
    pub fn close(&self) {
        self.slots.close();
    }
}

/// Held for the duration of one message's processing.
///
/// Dropping it (including when the caller's future is cancelled) passes the
/// turn to the next message in the conversation.
pub struct SequencePermit {
    conversation_id: ConversationId,
    lane: Arc<AsyncMutex<()>>,
    lanes: Lanes,
    turn: Option<OwnedMutexGuard<()>>,
    slot: Option<OwnedSemaphorePermit>,
}

impl SequencePermit {
    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }
}

impl Drop for SequencePermit {
    fn drop(&mut self) {
        self.slot.take();
        self.turn.take();

        let mut lanes = self.lanes.lock();
        // Only the map and this permit still reference the lane.
        if Arc::strong_count(&self.lane) == 2 {
            if let Some(current) = lanes.get(&self.conversation_id) {
                if Arc::ptr_eq(current, &self.lane) {
                    lanes.remove(&self.conversation_id);
                }
            }
        }
    }
}
