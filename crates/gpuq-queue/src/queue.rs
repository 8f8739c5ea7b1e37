//! FIFO ticket queue with stale-holder pruning
//!
//! The head of the queue is inspected without being removed. Only the holder
//! of the head ticket may pop it, and it does so only after it has claimed a
//! device. A holder that dies while queued is pruned by whichever process
//! next looks at the head, so a crash costs at most one extra inspection.

use gpuq_core::{GpuqError, GpuqResult, HolderId, QueueConfig, Ticket};
use std::sync::Arc;
use tracing::{info, warn};

use crate::liveness::{LivenessOracle, ProcessLiveness};
use crate::store::{FileQueueStore, QueueStore};

/// Durable, ordered queue of tickets shared by every contender on the host
#[derive(Clone)]
pub struct TicketQueue {
    store: Arc<dyn QueueStore>,
    liveness: Arc<dyn LivenessOracle>,
}

impl TicketQueue {
    /// Create a queue over an explicit store and liveness oracle
    pub fn new(store: Arc<dyn QueueStore>, liveness: Arc<dyn LivenessOracle>) -> Self {
        Self { store, liveness }
    }

    /// Open the host-wide queue described by `config`
    pub fn open(config: &QueueConfig) -> GpuqResult<Self> {
        let store = FileQueueStore::open(&config.path)?;
        Ok(Self::new(Arc::new(store), Arc::new(ProcessLiveness)))
    }

    /// Append a ticket for `holder` at the tail
    pub fn enqueue(&self, holder: HolderId) -> GpuqResult<Ticket> {
        let ticket = Ticket::new(holder);
        self.store.transact(&mut |tickets| {
            tickets.push_back(ticket.clone());
            true
        })?;

        info!(holder = %holder, ticket_id = %ticket.id, "Enqueued");
        Ok(ticket)
    }

    /// Return the oldest ticket whose holder is alive, without removing it.
    ///
    /// Dead holders found at the head are removed one by one until a live
    /// head appears. Fails with [`GpuqError::QueueEmpty`] if nothing remains.
    pub fn peek_live_head(&self) -> GpuqResult<Ticket> {
        let mut head = None;
        let mut pruned = Vec::new();
        let liveness = &self.liveness;

        self.store.transact(&mut |tickets| {
            head = None;
            pruned.clear();
            while let Some(front) = tickets.front() {
                if liveness.is_alive(&front.holder) {
                    head = Some(front.clone());
                    break;
                }
                pruned.extend(tickets.pop_front());
            }
            !pruned.is_empty()
        })?;

        for ticket in &pruned {
            warn!(
                holder = %ticket.holder,
                ticket_id = %ticket.id,
                "Pruned ticket of dead holder"
            );
        }

        head.ok_or(GpuqError::QueueEmpty)
    }

    /// Remove the head ticket, provided it belongs to `ticket.holder`.
    ///
    /// Leaves the queue untouched and fails with [`GpuqError::NotHead`]
    /// otherwise.
    pub fn pop(&self, ticket: &Ticket) -> GpuqResult<()> {
        let mut outcome: GpuqResult<()> = Ok(());

        self.store.transact(&mut |tickets| {
            let is_head = tickets
                .front()
                .is_some_and(|front| front.holder == ticket.holder);
            if is_head {
                tickets.pop_front();
                outcome = Ok(());
                return true;
            }

            outcome = Err(GpuqError::NotHead {
                expected: ticket.holder,
                actual: tickets
                    .front()
                    .map(|t| t.holder.to_string())
                    .unwrap_or_else(|| "empty queue".to_string()),
            });
            false
        })?;

        outcome
    }

    /// Snapshot of every live ticket, in queue order.
    ///
    /// Tickets of dead holders are left out of the snapshot and, as a side
    /// effect, removed from the persisted queue. Removing a dead entry never
    /// reorders the live ones.
    pub fn list(&self) -> GpuqResult<Vec<Ticket>> {
        let mut live = Vec::new();
        let liveness = &self.liveness;

        self.store.transact(&mut |tickets| {
            let before = tickets.len();
            tickets.retain(|t| liveness.is_alive(&t.holder));
            live = tickets.iter().cloned().collect();
            tickets.len() != before
        })?;

        Ok(live)
    }
}
