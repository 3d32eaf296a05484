/*
 * Copyright (c) Turnstile project developers.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The internal idle thread.
//!
//! A process whose every thread is parked in a timed wait or blocked on an
//! external party has nobody left to advance the turn counter, so timed
//! waits would never fire.  The idle thread is a regular registered thread
//! whose only job is to take turns: each tick advances the counter once,
//! then parks on a reserved channel while real threads are runnable.  The
//! scheduler unparks it whenever the run queue drains.

use std::ptr;
use std::sync::Arc;

use libc::c_void;

use turnstile_model::record::INVALID_INSID;

use crate::runtime::Recorder;
use crate::runtime::RecordRuntime;
use crate::scheduler::RawThread;
use crate::scheduler::Scheduler;

extern "C" fn idle_main(arg: *mut c_void) -> *mut c_void {
    let rt = unsafe { Box::from_raw(arg as *mut Arc<dyn RecordRuntime>) };
    while !rt.idle_done() {
        rt.idle_tick();
    }
    ptr::null_mut()
}

/// Spawn the idle thread through the ordinary deterministic creation
/// protocol, so it has a logical id and a slot in the run queue like any
/// other thread.
pub(crate) fn spawn<S: Scheduler>(rt: &Recorder<S>) -> RawThread {
    let arg = Box::into_raw(Box::new(rt.arc_dyn())) as *mut c_void;
    let mut th: RawThread = 0;
    let mut error = 0;
    let ret = rt.thread_create(INVALID_INSID, &mut error, &mut th, ptr::null(), idle_main, arg);
    assert_eq!(ret, 0, "failed to spawn the idle thread");
    th
}
