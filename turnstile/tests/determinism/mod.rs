/*
 * Copyright (c) Turnstile project developers.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The determinism law: identical inputs and configuration produce an
//! identical schedule, run after run.

use std::cell::UnsafeCell;
use std::path::Path;
use std::ptr;
use std::sync::Arc;

use libc::c_void;

use turnstile::RecordRuntime;
use turnstile_model::record::SyncFlags;
use turnstile_model::syncop::SyncOp;

use crate::common;

struct Ctx {
    rt: Arc<dyn RecordRuntime>,
    mu: UnsafeCell<libc::pthread_mutex_t>,
    cv: UnsafeCell<libc::pthread_cond_t>,
    counter: UnsafeCell<u64>,
    released: UnsafeCell<u32>,
}

extern "C" fn incrementer(arg: *mut c_void) -> *mut c_void {
    let ctx = unsafe { &*(arg as *const Ctx) };
    let mut error = 0;
    for _ in 0..200 {
        ctx.rt.mutex_lock(1, &mut error, ctx.mu.get());
        unsafe { *ctx.counter.get() += 1 };
        ctx.rt.mutex_unlock(2, &mut error, ctx.mu.get());
    }
    ptr::null_mut()
}

extern "C" fn waiter(arg: *mut c_void) -> *mut c_void {
    let ctx = unsafe { &*(arg as *const Ctx) };
    let mut error = 0;
    ctx.rt.mutex_lock(3, &mut error, ctx.mu.get());
    while unsafe { *ctx.released.get() } == 0 {
        ctx.rt.cond_wait(4, &mut error, ctx.cv.get(), ctx.mu.get());
    }
    ctx.rt.mutex_unlock(5, &mut error, ctx.mu.get());
    ptr::null_mut()
}

/// One run of a mixed lock/cond scenario, reduced to its observable
/// schedule: per-thread (ltid, op, flags, turn) tuples in turn order.
/// Argument words are excluded deliberately, since they carry addresses.
fn run_schedule(dir: &Path) -> Vec<(u32, SyncOp, SyncFlags, u64)> {
    let rt = common::runtime_with(dir, |_| {});
    let ctx = Ctx {
        rt: rt.clone(),
        mu: UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER),
        cv: UnsafeCell::new(libc::PTHREAD_COND_INITIALIZER),
        counter: UnsafeCell::new(0),
        released: UnsafeCell::new(0),
    };
    let arg = &ctx as *const Ctx as *mut c_void;
    let w = common::spawn(rt.as_ref(), waiter, arg);
    let t1 = common::spawn(rt.as_ref(), incrementer, arg);
    let t2 = common::spawn(rt.as_ref(), incrementer, arg);
    let mut error = 0;
    rt.mutex_lock(6, &mut error, ctx.mu.get());
    unsafe { *ctx.released.get() = 1 };
    rt.cond_broadcast(7, &mut error, ctx.cv.get());
    rt.mutex_unlock(8, &mut error, ctx.mu.get());
    common::join(rt.as_ref(), w);
    common::join(rt.as_ref(), t1);
    common::join(rt.as_ref(), t2);
    assert_eq!(unsafe { *ctx.counter.get() }, 400);
    rt.prog_end();

    let logs = common::read_logs(dir);
    common::assert_gapless(&logs);
    common::merged_by_turn(&logs)
        .into_iter()
        .map(|(ltid, r)| (ltid, r.op, r.flags, r.turn))
        .collect()
}

#[test]
fn identical_runs_produce_identical_schedules() {
    let d1 = tempfile::tempdir().unwrap();
    let d2 = tempfile::tempdir().unwrap();
    let s1 = run_schedule(d1.path());
    let s2 = run_schedule(d2.path());
    assert_eq!(s1.len(), s2.len());
    for (i, (a, b)) in s1.iter().zip(s2.iter()).enumerate() {
        assert_eq!(a, b, "schedules diverge at event {}", i);
    }
}
