/*
 * Copyright (c) Turnstile project developers.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! A first-come-first-served serializer.
//!
//! The turn is a plain native mutex: whoever locks it next runs next, with
//! no fairness and no replayable schedule.  What survives is log
//! faithfulness: records are still stamped with a strictly increasing turn
//! counter reflecting the order that actually occurred.  `wait` degrades to
//! release-yield-reacquire and `signal` is a no-op; the condition-variable
//! wrappers instead sleep natively against the token mutex, which the
//! runtime reaches through [`Scheduler::native_lock`].

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use turnstile_model::tid::Ltid;
use turnstile_model::time::TurnCount;

use super::current_ltid;
use super::set_current_ltid;
use super::Channel;
use super::RawThread;
use super::Registry;
use super::Scheduler;
use super::WaitStatus;

/// The FCFS scheduler.
pub struct Serializer {
    /// The turn token.  A native mutex rather than a std one so the cond
    /// wrappers can hand it to `pthread_cond_wait`.
    token: Box<UnsafeCell<libc::pthread_mutex_t>>,
    turn: AtomicU64,
    registry: Mutex<Registry>,
}

// The token is only touched through pthread calls, which provide their own
// synchronization.
unsafe impl Send for Serializer {}
unsafe impl Sync for Serializer {}

impl Serializer {
    /// Create an empty serializer; `init_main` must run before first use.
    pub fn new() -> Self {
        Serializer {
            token: Box::new(UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER)),
            turn: AtomicU64::new(0),
            registry: Mutex::new(Registry::default()),
        }
    }

    fn lock_token(&self) {
        let rc = unsafe { libc::pthread_mutex_lock(self.token.get()) };
        assert_eq!(rc, 0, "serializer token lock failed");
    }

    fn unlock_token(&self) {
        let rc = unsafe { libc::pthread_mutex_unlock(self.token.get()) };
        assert_eq!(rc, 0, "serializer token unlock failed");
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new()
    }
}

// The token mutex is opaque; print only the observable pieces.
impl fmt::Debug for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serializer")
            .field("turn", &self.turn)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Scheduler for Serializer {
    fn init_main(&self) {
        let mut reg = self.registry.lock().unwrap();
        let tid = reg.bootstrap_main(unsafe { libc::pthread_self() });
        set_current_ltid(tid);
    }

    fn get_turn(&self) {
        assert_ne!(
            current_ltid(),
            Ltid::INVALID,
            "get_turn before the thread was bound"
        );
        self.lock_token();
    }

    fn put_turn(&self, end_of_thread: bool) {
        if end_of_thread {
            let mut reg = self.registry.lock().unwrap();
            reg.mark_zombie(current_ltid());
        }
        self.unlock_token();
    }

    fn wait(&self, _chan: Channel, deadline: Option<TurnCount>) -> WaitStatus {
        self.unlock_token();
        unsafe { libc::sched_yield() };
        self.lock_token();
        match deadline {
            Some(d) if self.turn.load(Ordering::SeqCst) >= d => WaitStatus::TimedOut,
            _ => WaitStatus::Woken,
        }
    }

    fn signal(&self, _chan: Channel, _all: bool) {}

    fn block(&self) {
        self.unlock_token();
    }

    fn wakeup(&self) {}

    fn inc_turn(&self) -> TurnCount {
        self.turn.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn turn_count(&self) -> TurnCount {
        self.turn.load(Ordering::SeqCst)
    }

    fn nthreads(&self) -> usize {
        self.registry.lock().unwrap().live()
    }

    fn runnable_count(&self) -> usize {
        // No run queue to measure; report the minimum so the idle thread
        // never parks and keeps the counter moving.
        1
    }

    fn register_child(&self, handle: RawThread) -> Ltid {
        self.registry.lock().unwrap().allocate(handle)
    }

    fn bind_self(&self, handle: RawThread) -> Ltid {
        let reg = self.registry.lock().unwrap();
        let tid = reg
            .lookup(handle)
            .expect("child started before its parent registered it");
        set_current_ltid(tid);
        tid
    }

    fn is_zombie(&self, handle: RawThread) -> bool {
        self.registry.lock().unwrap().is_zombie_handle(handle)
    }

    fn reap(&self, handle: RawThread) {
        self.registry.lock().unwrap().reap_handle(handle);
    }

    fn fork_reset(&self) {
        // The child inherits the token in the locked state belonging to the
        // forking thread; the wrapper that performed the fork releases it on
        // the way out, so the token itself is left alone here.
        self.turn.store(0, Ordering::SeqCst);
        let me = current_ltid();
        let mut reg = self.registry.lock().unwrap();
        reg.reset_to(me, unsafe { libc::pthread_self() });
    }

    fn native_lock(&self) -> Option<*mut libc::pthread_mutex_t> {
        Some(self.token.get())
    }
}
