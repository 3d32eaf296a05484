/*
 * Copyright (c) Turnstile project developers.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Deterministic scheduling.
//!
//! Every deterministic operation of the record runtime is gated by a
//! [`Scheduler`].  The scheduler owns the logical clock, the run queue and
//! the wait sets, and it is the only component that transfers control
//! between application threads.  Two implementations exist:
//!
//! * [`turn_queue::TurnQueue`] — the turn-based round-robin scheduler that
//!   produces a replayable schedule.  The block/wakeup and non-det region
//!   protocols are defined against this one.
//! * [`serializer::Serializer`] — a first-come-first-served serializer that
//!   only guarantees the log faithfully reflects the order that occurred.

pub mod serializer;
pub mod turn_queue;

use std::cell::Cell;
use std::collections::HashMap;
use std::collections::HashSet;

use turnstile_model::tid::Ltid;
use turnstile_model::time::TurnCount;

/// An opaque address identifying a wait channel, usually the application's
/// own sync-object pointer.
pub type Channel = usize;

/// The "no channel" used by pure timed waits (sleeps); never signalled.
pub const NO_CHANNEL: Channel = 0;

/// Rendezvous channel for threads waiting to enter a non-deterministic
/// region.  Reserved addresses live in the kernel half of the address space
/// so they can never alias a user object.
pub const NON_DET_CHANNEL: Channel = usize::MAX;

/// Parking channel for the internal idle thread.
pub const IDLE_CHANNEL: Channel = usize::MAX - 1;

const LINEUP_CHANNEL_TAG: usize = 1usize << 62;

/// The wait channel of a lineup, derived from its opaque type id.
pub fn lineup_channel(opaque_type: u64) -> Channel {
    opaque_type as usize | LINEUP_CHANNEL_TAG
}

/// The OS-level thread handle used as the key of the registry and as the
/// join channel.
pub type RawThread = libc::pthread_t;

/// How a wait on a channel was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// Released by a signal on the channel.
    Woken,
    /// Released because the turn counter reached the deadline.
    TimedOut,
}

impl WaitStatus {
    /// True when the wait was released by its deadline.
    pub fn timed_out(self) -> bool {
        matches!(self, WaitStatus::TimedOut)
    }
}

thread_local! {
    static SELF_TID: Cell<Ltid> = Cell::new(Ltid::INVALID);
}

/// The calling thread's logical id, or `Ltid::INVALID` before binding.
pub fn current_ltid() -> Ltid {
    SELF_TID.with(|c| c.get())
}

pub(crate) fn set_current_ltid(tid: Ltid) {
    SELF_TID.with(|c| c.set(tid));
}

/// The synchronization authority every wrapper operates through.
///
/// `get_turn`/`put_turn` bracket each deterministic critical section; `wait`
/// and `signal` implement channel rendezvous; `block`/`wakeup` let a thread
/// leave and re-enter the deterministic domain around an external blocking
/// call.  All of the operations except `wakeup` require the caller to hold
/// the turn.
pub trait Scheduler: Send + Sync + 'static {
    /// Register the calling thread as the main thread and seed the run
    /// queue with it.
    fn init_main(&self);

    /// The calling thread's logical id.
    fn current(&self) -> Ltid {
        current_ltid()
    }

    /// Block until the calling thread becomes the run-queue head.
    fn get_turn(&self);

    /// Release the turn.  With `end_of_thread` the caller becomes a zombie
    /// and its joiners are released; otherwise it rotates to the tail.
    fn put_turn(&self, end_of_thread: bool);

    /// Atomically release the turn and park on `chan`; returns holding the
    /// turn again once signalled or once the turn counter reaches
    /// `deadline`.
    fn wait(&self, chan: Channel, deadline: Option<TurnCount>) -> WaitStatus;

    /// Move the first waiter (or all waiters) of `chan` to the run-queue
    /// tail, preserving the channel's FIFO order.  Caller must hold the
    /// turn.
    fn signal(&self, chan: Channel, all: bool);

    /// Depart the run queue without signalling any channel, passing the
    /// turn to the next runnable thread.  Caller must hold the turn.
    fn block(&self);

    /// Request re-insertion into the run queue at the next turn boundary.
    /// The only operation that may be called without holding the turn.
    fn wakeup(&self);

    /// Advance the turn counter by one and release any waits whose deadline
    /// has been reached.  Caller must hold the turn.
    fn inc_turn(&self) -> TurnCount;

    /// Read the turn counter.
    fn turn_count(&self) -> TurnCount;

    /// The number of live (non-zombie) registered threads.
    fn nthreads(&self) -> usize;

    /// The number of threads currently in the run queue.
    fn runnable_count(&self) -> usize;

    /// Assign the next dense logical id to a freshly spawned child and
    /// enqueue it.  Caller (the parent) must hold the turn.
    fn register_child(&self, handle: RawThread) -> Ltid;

    /// Called by a child thread to look up and adopt the logical id its
    /// parent registered for it.
    fn bind_self(&self, handle: RawThread) -> Ltid;

    /// Whether the thread with this handle has ended but not been joined.
    fn is_zombie(&self, handle: RawThread) -> bool;

    /// Drop a zombie from the registry after a successful join.
    fn reap(&self, handle: RawThread);

    /// Re-initialize all scheduler state in a fork child: only the calling
    /// thread survives, keeping its logical id, with a fresh turn counter.
    fn fork_reset(&self);

    /// The serializer exposes its internal token as a native mutex so the
    /// condition-variable wrappers can sleep against it; the turn-based
    /// scheduler has no such lock and returns `None`.
    fn native_lock(&self) -> Option<*mut libc::pthread_mutex_t> {
        None
    }
}

/// OS handle ↔ logical id bookkeeping shared by both scheduler
/// implementations.  Mutated only under the owning scheduler's lock.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    by_handle: HashMap<RawThread, Ltid>,
    handles: HashMap<Ltid, RawThread>,
    zombies: HashSet<Ltid>,
    next_raw: u32,
    live: usize,
}

impl Registry {
    pub(crate) fn bootstrap_main(&mut self, handle: RawThread) -> Ltid {
        assert!(
            self.by_handle.is_empty(),
            "main thread registered twice on one scheduler"
        );
        self.by_handle.insert(handle, Ltid::MAIN);
        self.handles.insert(Ltid::MAIN, handle);
        self.next_raw = Ltid::MAIN.as_raw() + 1;
        self.live = 1;
        Ltid::MAIN
    }

    pub(crate) fn allocate(&mut self, handle: RawThread) -> Ltid {
        let tid = Ltid::from_raw(self.next_raw);
        self.next_raw += 1;
        self.live += 1;
        let prev = self.by_handle.insert(handle, tid);
        assert!(prev.is_none(), "thread handle registered twice");
        self.handles.insert(tid, handle);
        tid
    }

    pub(crate) fn lookup(&self, handle: RawThread) -> Option<Ltid> {
        self.by_handle.get(&handle).copied()
    }

    pub(crate) fn handle_of(&self, tid: Ltid) -> Option<RawThread> {
        self.handles.get(&tid).copied()
    }

    pub(crate) fn mark_zombie(&mut self, tid: Ltid) {
        let fresh = self.zombies.insert(tid);
        assert!(fresh, "thread ended twice");
        self.live -= 1;
    }

    pub(crate) fn is_zombie_handle(&self, handle: RawThread) -> bool {
        self.lookup(handle)
            .map_or(false, |tid| self.zombies.contains(&tid))
    }

    pub(crate) fn reap_handle(&mut self, handle: RawThread) {
        if let Some(tid) = self.by_handle.remove(&handle) {
            self.handles.remove(&tid);
            self.zombies.remove(&tid);
        }
    }

    pub(crate) fn live(&self) -> usize {
        self.live
    }

    /// Keep only the surviving thread of a fork child.  Its logical id is
    /// preserved; id allocation continues densely from where it was.
    pub(crate) fn reset_to(&mut self, tid: Ltid, handle: RawThread) {
        self.by_handle.clear();
        self.handles.clear();
        self.zombies.clear();
        self.by_handle.insert(handle, tid);
        self.handles.insert(tid, handle);
        self.live = 1;
    }
}
