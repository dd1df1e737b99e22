//! Single-slot rendezvous between the socket reader and a blocked
//! terminal callback
//!
//! Exactly one prompt is outstanding at a time because the device session
//! is single-threaded inside its blocking transaction call, so a slot is
//! enough - no queue. The contract call sites rely on:
//! - `deposit` blocks while the slot is full (never silently replaces)
//! - `await_reply` does not consume; callers `clear` explicitly
//!
//! Every `close` bumps a generation counter. A waiter records the
//! generation it entered with and gives up when it changes, so a close
//! releases it even when a fresh connection reopens the slot before the
//! waiter's thread gets scheduled.
//!
//! The source-of-truth implementation spin-waited; this one parks on a
//! condvar with the same observable semantics.

use parking_lot::{Condvar, Mutex};

/// The client's answer to an outstanding prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientReply {
    pub value: Option<String>,
}

struct Slot {
    reply: Option<ClientReply>,
    closed: bool,
    /// Bumped on every close; lets waiters detect a close they slept through
    generation: u64,
}

/// Thread-safe single-slot handoff cell
pub struct ReplySlot {
    slot: Mutex<Slot>,
    cond: Condvar,
}

impl Default for ReplySlot {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplySlot {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                reply: None,
                closed: false,
                generation: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Current close generation; waits can be pinned to it
    pub fn generation(&self) -> u64 {
        self.slot.lock().generation
    }

    /// Store a reply, blocking while the previous one has not been cleared
    ///
    /// Dropped without effect when the slot is closed (client gone) or a
    /// close happened while blocked.
    pub fn deposit(&self, reply: ClientReply) {
        let mut slot = self.slot.lock();
        let entered = slot.generation;
        while slot.reply.is_some() && !slot.closed && slot.generation == entered {
            self.cond.wait(&mut slot);
        }
        if slot.closed || slot.generation != entered {
            return;
        }
        slot.reply = Some(reply);
        self.cond.notify_all();
    }

    /// Block until a reply is present and return it without clearing
    ///
    /// Returns `None` when the slot was closed while waiting - the caller
    /// should unwind with a declining default.
    pub fn await_reply(&self) -> Option<ClientReply> {
        let entered = self.generation();
        self.await_reply_since(entered)
    }

    /// Like `await_reply`, but also gives up with `None` when the slot has
    /// been closed at any point since `entered` was sampled
    pub fn await_reply_since(&self, entered: u64) -> Option<ClientReply> {
        let mut slot = self.slot.lock();
        while slot.reply.is_none() && !slot.closed && slot.generation == entered {
            self.cond.wait(&mut slot);
        }
        if slot.closed || slot.generation != entered {
            return None;
        }
        slot.reply.clone()
    }

    /// Empty the slot unconditionally, waking blocked depositors
    pub fn clear(&self) {
        let mut slot = self.slot.lock();
        slot.reply = None;
        self.cond.notify_all();
    }

    /// Wake every waiter; subsequent awaits return `None`, deposits no-op
    pub fn close(&self) {
        let mut slot = self.slot.lock();
        slot.closed = true;
        slot.generation += 1;
        self.cond.notify_all();
    }

    /// Make the slot usable again for a fresh client connection
    pub fn reopen(&self) {
        let mut slot = self.slot.lock();
        slot.closed = false;
        slot.reply = None;
    }
}
