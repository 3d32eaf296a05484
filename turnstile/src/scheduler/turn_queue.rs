/*
 * Copyright (c) Turnstile project developers.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The turn-based round-robin scheduler.
//!
//! One internal lock guards all scheduler state, and a single condition
//! variable is broadcast at every turn boundary; each parked thread
//! re-checks whether it has become the run-queue head.  State invariants:
//!
//! * Exactly one thread is the run-queue head (the turn holder), or the
//!   queue is empty because every live thread is waiting, detached, or a
//!   zombie.
//! * Every live thread appears in exactly one of {run queue, one wait set,
//!   detached set}.
//! * A thread sits in at most one wait set, and if it has a deadline there
//!   is exactly one matching entry in the timed index.
//!
//! All mutation happens through the turn holder, with the single exception
//! of `wakeup`, which records a pending re-insertion under the lock; the
//! pending set is spliced (in ascending id order) at the next turn
//! boundary.  Turn boundaries also release the non-det rendezvous and
//! unpark the idle thread whenever the run queue drains, which is what
//! keeps logical time advancing while every application thread is blocked
//! externally.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Condvar;
use std::sync::Mutex;

use turnstile_model::tid::Ltid;
use turnstile_model::time::TurnCount;

use super::current_ltid;
use super::set_current_ltid;
use super::Channel;
use super::Registry;
use super::RawThread;
use super::Scheduler;
use super::WaitStatus;
use super::IDLE_CHANNEL;
use super::NON_DET_CHANNEL;

#[derive(Debug, Clone, Copy)]
struct Waiter {
    tid: Ltid,
    deadline: Option<TurnCount>,
}

#[derive(Debug, Default)]
struct SchedState {
    /// Runnable threads; the head holds the turn.
    run_queue: VecDeque<Ltid>,

    /// FIFO wait list per channel.  Entries are never empty.
    waiting: HashMap<Channel, VecDeque<Waiter>>,

    /// Index of timed waits, ordered by (deadline, ltid) so expiry releases
    /// deterministically.
    timed: BTreeMap<(TurnCount, Ltid), Channel>,

    /// Why a thread's wait was released, consumed when it resumes.
    released: HashMap<Ltid, WaitStatus>,

    /// Threads outside the deterministic domain (block/wakeup protocol or
    /// non-det regions).
    detached: BTreeSet<Ltid>,

    /// Threads that called `wakeup` and await splicing.
    pending_wakeups: BTreeSet<Ltid>,

    /// Monotonically counts upwards, one per completed sync action.
    turn: TurnCount,

    registry: Registry,
}

/// The turn-based scheduler.
#[derive(Debug, Default)]
pub struct TurnQueue {
    state: Mutex<SchedState>,
    turnover: Condvar,
}

impl TurnQueue {
    /// Create an empty scheduler; `init_main` must run before first use.
    pub fn new() -> Self {
        Self::default()
    }

    fn signal_locked(st: &mut SchedState, chan: Channel, all: bool) {
        let drained: Vec<Waiter> = match st.waiting.get_mut(&chan) {
            None => return,
            Some(q) => {
                if all {
                    q.drain(..).collect()
                } else {
                    q.pop_front().into_iter().collect()
                }
            }
        };
        if st.waiting.get(&chan).map_or(false, |q| q.is_empty()) {
            st.waiting.remove(&chan);
        }
        for w in drained {
            if let Some(d) = w.deadline {
                st.timed.remove(&(d, w.tid));
            }
            st.released.insert(w.tid, WaitStatus::Woken);
            st.run_queue.push_back(w.tid);
        }
    }

    fn fire_timeouts_locked(st: &mut SchedState) {
        loop {
            let (deadline, tid, chan) = match st.timed.iter().next() {
                Some((&(d, t), &c)) => (d, t, c),
                None => break,
            };
            if deadline > st.turn {
                break;
            }
            st.timed.remove(&(deadline, tid));
            let now_empty = match st.waiting.get_mut(&chan) {
                Some(q) => {
                    q.retain(|w| w.tid != tid);
                    q.is_empty()
                }
                None => false,
            };
            if now_empty {
                st.waiting.remove(&chan);
            }
            st.released.insert(tid, WaitStatus::TimedOut);
            st.run_queue.push_back(tid);
        }
    }

    /// Housekeeping performed whenever the head changes: splice pending
    /// wakeups, and if the queue drained, release the non-det rendezvous,
    /// then the idle thread.
    fn boundary_locked(st: &mut SchedState) {
        let pending: Vec<Ltid> = std::mem::take(&mut st.pending_wakeups).into_iter().collect();
        for tid in pending {
            st.detached.remove(&tid);
            st.run_queue.push_back(tid);
        }
        if st.run_queue.is_empty() {
            Self::signal_locked(st, NON_DET_CHANNEL, true);
        }
        if st.run_queue.is_empty() {
            Self::signal_locked(st, IDLE_CHANNEL, true);
        }
    }

    fn assert_holder(st: &SchedState, me: Ltid, what: &str) {
        assert_eq!(
            st.run_queue.front(),
            Some(&me),
            "{} called by thread {} which does not hold the turn",
            what,
            me
        );
    }
}

impl Scheduler for TurnQueue {
    fn init_main(&self) {
        let mut st = self.state.lock().unwrap();
        let tid = st.registry.bootstrap_main(unsafe { libc::pthread_self() });
        st.run_queue.push_back(tid);
        set_current_ltid(tid);
    }

    fn get_turn(&self) {
        let me = current_ltid();
        assert_ne!(me, Ltid::INVALID, "get_turn before the thread was bound");
        let mut st = self.state.lock().unwrap();
        loop {
            if st.run_queue.front() == Some(&me) {
                return;
            }
            st = self.turnover.wait(st).unwrap();
        }
    }

    fn put_turn(&self, end_of_thread: bool) {
        let me = current_ltid();
        let mut st = self.state.lock().unwrap();
        Self::assert_holder(&st, me, "put_turn");
        st.run_queue.pop_front();
        if end_of_thread {
            let handle = st
                .registry
                .handle_of(me)
                .expect("ending thread is not registered");
            st.registry.mark_zombie(me);
            // Joiners park on the channel named by the OS handle.
            Self::signal_locked(&mut st, handle as Channel, true);
        } else {
            st.run_queue.push_back(me);
        }
        Self::boundary_locked(&mut st);
        self.turnover.notify_all();
    }

    fn wait(&self, chan: Channel, deadline: Option<TurnCount>) -> WaitStatus {
        let me = current_ltid();
        let mut st = self.state.lock().unwrap();
        Self::assert_holder(&st, me, "wait");
        // A deadline the counter has already reached releases immediately;
        // parking would otherwise require another thread to advance the
        // counter before the release could fire.
        if let Some(d) = deadline {
            if d <= st.turn {
                return WaitStatus::TimedOut;
            }
        }
        st.run_queue.pop_front();
        st.waiting
            .entry(chan)
            .or_default()
            .push_back(Waiter { tid: me, deadline });
        if let Some(d) = deadline {
            let prev = st.timed.insert((d, me), chan);
            assert!(prev.is_none(), "thread in two timed waits at once");
        }
        Self::boundary_locked(&mut st);
        self.turnover.notify_all();
        loop {
            if st.run_queue.front() == Some(&me) {
                return st
                    .released
                    .remove(&me)
                    .expect("woken waiter has no release status");
            }
            st = self.turnover.wait(st).unwrap();
        }
    }

    fn signal(&self, chan: Channel, all: bool) {
        let me = current_ltid();
        let mut st = self.state.lock().unwrap();
        Self::assert_holder(&st, me, "signal");
        Self::signal_locked(&mut st, chan, all);
        self.turnover.notify_all();
    }

    fn block(&self) {
        let me = current_ltid();
        let mut st = self.state.lock().unwrap();
        Self::assert_holder(&st, me, "block");
        st.run_queue.pop_front();
        st.detached.insert(me);
        Self::boundary_locked(&mut st);
        self.turnover.notify_all();
    }

    fn wakeup(&self) {
        let me = current_ltid();
        let mut st = self.state.lock().unwrap();
        st.pending_wakeups.insert(me);
        if st.run_queue.is_empty() {
            Self::boundary_locked(&mut st);
        }
        self.turnover.notify_all();
    }

    fn inc_turn(&self) -> TurnCount {
        let me = current_ltid();
        let mut st = self.state.lock().unwrap();
        Self::assert_holder(&st, me, "inc_turn");
        st.turn += 1;
        Self::fire_timeouts_locked(&mut st);
        st.turn
    }

    fn turn_count(&self) -> TurnCount {
        self.state.lock().unwrap().turn
    }

    fn nthreads(&self) -> usize {
        self.state.lock().unwrap().registry.live()
    }

    fn runnable_count(&self) -> usize {
        self.state.lock().unwrap().run_queue.len()
    }

    fn register_child(&self, handle: RawThread) -> Ltid {
        let me = current_ltid();
        let mut st = self.state.lock().unwrap();
        Self::assert_holder(&st, me, "register_child");
        let tid = st.registry.allocate(handle);
        st.run_queue.push_back(tid);
        tid
    }

    fn bind_self(&self, handle: RawThread) -> Ltid {
        let st = self.state.lock().unwrap();
        let tid = st
            .registry
            .lookup(handle)
            .expect("child started before its parent registered it");
        set_current_ltid(tid);
        tid
    }

    fn is_zombie(&self, handle: RawThread) -> bool {
        self.state.lock().unwrap().registry.is_zombie_handle(handle)
    }

    fn reap(&self, handle: RawThread) {
        self.state.lock().unwrap().registry.reap_handle(handle);
    }

    fn fork_reset(&self) {
        let me = current_ltid();
        let mut st = self.state.lock().unwrap();
        st.run_queue.clear();
        st.run_queue.push_back(me);
        st.waiting.clear();
        st.timed.clear();
        st.released.clear();
        st.detached.clear();
        st.pending_wakeups.clear();
        st.turn = 0;
        st.registry.reset_to(me, unsafe { libc::pthread_self() });
    }
}
