/*
 * Copyright (c) Turnstile project developers.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Turnstile imposes deterministic multithreading on programs that use the
//! standard synchronization primitives.  It interposes on mutexes, rwlocks,
//! condition variables, barriers, semaphores and blocking I/O so that, for
//! a fixed input, the order in which threads observe synchronization events
//! is a pure function of a per-process turn schedule, independent of kernel
//! scheduling, core count, or timing jitter.
//!
//! The pieces:
//!
//! * [`scheduler`] — the logical-clock turn queue (and its FCFS sibling)
//!   that every deterministic operation is gated through.
//! * [`runtime`] — the record runtime: wrappers for each primitive, built
//!   from the scheduler's `wait`/`signal` and logged in lockstep with turn
//!   advancement.
//! * [`hooks`] — the C-linkage annotation surface injected programs call;
//!   every hook is a no-op until a runtime is installed.
//!
//! A process embeds the runtime either by calling [`install`] (typically
//! from a constructor in a preload shim) or, for tests and embedding, by
//! building a [`Recorder`] directly over a chosen scheduler.

#![deny(missing_docs)]

mod blocking;
mod idle;
mod logger;
mod stats;
mod util;

pub mod hooks;
pub mod nondet;
pub mod runtime;
pub mod scheduler;

use std::sync::Arc;
use std::sync::RwLock;

use lazy_static::lazy_static;

pub use runtime::RecordRuntime;
pub use runtime::Recorder;
pub use runtime::StartRoutine;
pub use scheduler::serializer::Serializer;
pub use scheduler::turn_queue::TurnQueue;
pub use scheduler::Scheduler;
pub use stats::RuntimeStats;
pub use turnstile_model::config::Config;
pub use turnstile_model::config::SchedulerKind;
pub use turnstile_model::record::InsId;
pub use turnstile_model::record::SyncRec;
pub use turnstile_model::record::INVALID_INSID;
pub use turnstile_model::syncop::SyncOp;
pub use turnstile_model::tid::Ltid;
pub use turnstile_model::time::Timespec;
pub use turnstile_model::time::TurnCount;

lazy_static! {
    static ref RUNTIME: RwLock<Option<Arc<dyn RecordRuntime>>> = RwLock::new(None);
}

/// Install the process-wide runtime per the configuration's scheduler
/// policy and attach the calling thread as the main thread.
///
/// Panics if a runtime is already installed.
pub fn install(cfg: Config) -> Arc<dyn RecordRuntime> {
    let rt: Arc<dyn RecordRuntime> = match cfg.scheduler {
        SchedulerKind::RoundRobin => Recorder::new(TurnQueue::new(), cfg),
        SchedulerKind::Serializer => Recorder::new(Serializer::new(), cfg),
    };
    {
        let mut slot = RUNTIME.write().unwrap();
        assert!(slot.is_none(), "runtime already installed");
        *slot = Some(rt.clone());
    }
    rt.prog_begin();
    rt
}

/// The installed runtime, if any.  Hooks route through this and fall back
/// to no-ops when it is absent, so an instrumented binary runs standalone.
pub fn runtime() -> Option<Arc<dyn RecordRuntime>> {
    RUNTIME.read().unwrap().clone()
}
