// ============================================================
// Layer 6 — Shard Locks and Cancellation
// ============================================================
// Two small primitives the engine leans on:
//
//   ShardLocks   one exclusive gate per shard for unlearning
//                passes and (re)training. Waiters are served in
//                ticket order, so queued deletion requests are
//                never reordered or dropped. A caller may take its
//                ticket early (`enqueue`) and wait for its turn
//                later; a ticket dropped unused gives up its turn.
//
//   CancelToken  a shared flag the unlearning loop polls at
//                epoch boundaries only — never inside a gradient
//                step.
//
// Passes on different shards use different gates and never
// contend with each other.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::{Condvar, Mutex};

use crate::domain::error::{EngineError, EngineResult};
use crate::domain::shard::ShardId;

// ─── ShardLocks ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct TicketState {
    next_ticket: u64,
    now_serving: u64,
    abandoned:   BTreeSet<u64>,
}

impl TicketState {
    fn take(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    /// Serve the next ticket, skipping any that were given up.
    fn advance(&mut self) {
        self.now_serving += 1;
        while self.abandoned.remove(&self.now_serving) {
            self.now_serving += 1;
        }
    }
}

#[derive(Default)]
struct Gate {
    state: Mutex<TicketState>,
    turn:  Condvar,
}

/// Per-shard FIFO exclusive locks.
#[derive(Default)]
pub struct ShardLocks {
    gates: Mutex<HashMap<ShardId, Arc<Gate>>>,
}

impl ShardLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn gate(&self, shard: ShardId) -> Arc<Gate> {
        self.gates.lock().entry(shard).or_default().clone()
    }

    /// Block until this caller's turn on `shard` comes up.
    pub fn acquire(&self, shard: ShardId) -> ShardGuard {
        self.enqueue(shard).wait()
    }

    /// Take a place in `shard`'s queue without waiting for it yet.
    pub fn enqueue(&self, shard: ShardId) -> ShardTicket {
        let gate   = self.gate(shard);
        let ticket = gate.state.lock().take();
        ShardTicket { gate, shard, ticket, redeemed: false }
    }

    /// Take the gate only if nobody holds or waits for it.
    pub fn try_acquire(&self, shard: ShardId) -> EngineResult<ShardGuard> {
        let gate = self.gate(shard);
        {
            let mut state = gate.state.lock();
            if state.next_ticket != state.now_serving {
                return Err(EngineError::ShardBusy(shard));
            }
            state.take();
        }
        Ok(ShardGuard { gate })
    }

    /// True while a pass holds (or waits for) the shard's gate.
    pub fn is_busy(&self, shard: ShardId) -> bool {
        let Some(gate) = self.gates.lock().get(&shard).cloned() else {
            return false;
        };
        let state = gate.state.lock();
        state.next_ticket != state.now_serving
    }
}

/// A place in one shard's queue.
pub struct ShardTicket {
    gate:     Arc<Gate>,
    shard:    ShardId,
    ticket:   u64,
    redeemed: bool,
}

impl ShardTicket {
    pub fn shard(&self) -> ShardId {
        self.shard
    }

    /// Block until every earlier ticket has been served.
    pub fn wait(mut self) -> ShardGuard {
        self.redeemed = true;
        let gate = Arc::clone(&self.gate);
        {
            let mut state = gate.state.lock();
            if state.now_serving != self.ticket {
                tracing::info!(
                    "Shard {} busy; queued at position {}",
                    self.shard, self.ticket - state.now_serving
                );
            }
            while state.now_serving != self.ticket {
                gate.turn.wait(&mut state);
            }
        }
        ShardGuard { gate }
    }
}

impl Drop for ShardTicket {
    fn drop(&mut self) {
        if self.redeemed {
            return;
        }
        let mut state = self.gate.state.lock();
        if state.now_serving == self.ticket {
            state.advance();
            self.gate.turn.notify_all();
        } else {
            state.abandoned.insert(self.ticket);
        }
    }
}

/// Held for the duration of one pass; releasing it admits the
/// next queued ticket.
pub struct ShardGuard {
    gate: Arc<Gate>,
}

impl Drop for ShardGuard {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock();
        state.advance();
        self.gate.turn.notify_all();
    }
}

// ─── CancelToken ──────────────────────────────────────────────────────────────

/// Cloneable cancellation flag shared between a job handle and
/// the loop it controls.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
