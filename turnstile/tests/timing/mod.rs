/*
 * Copyright (c) Turnstile project developers.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Timed waits in logical time, driven by the idle thread.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use libc::c_void;

use turnstile::RecordRuntime;
use turnstile::Timespec;

use crate::common;

/// With one turn per microsecond of logical time and a 10ms deadline, an
/// unposted semaphore times out after at least 10_000 turns, which only the
/// idle thread can provide.
#[test]
fn sem_timedwait_times_out_in_logical_time() {
    let dir = tempfile::tempdir().unwrap();
    let rt = common::runtime_with(dir.path(), |cfg| {
        cfg.launch_idle_thread = true;
        cfg.nanosec_per_turn = 1000;
    });
    rt.set_base_time(Timespec { sec: 0, nsec: 0 });

    let sem: UnsafeCell<libc::sem_t> = UnsafeCell::new(unsafe { std::mem::zeroed() });
    let mut error = 0;
    assert_eq!(rt.sem_init(1, &mut error, sem.get(), 0, 0), 0);

    let abstime = libc::timespec {
        tv_sec: 0,
        tv_nsec: 10_000_000,
    };
    let ret = rt.sem_timedwait(2, &mut error, sem.get(), &abstime);
    assert_eq!(ret, -1);
    assert_eq!(error, libc::ETIMEDOUT);
    assert!(
        rt.turn_count() >= 10_000,
        "turn counter only reached {}",
        rt.turn_count()
    );
    rt.prog_end();
    common::assert_gapless(&common::read_logs(dir.path()));
}

struct TimedLockCtx {
    rt: Arc<dyn RecordRuntime>,
    mu: UnsafeCell<libc::pthread_mutex_t>,
    ret: AtomicI32,
}

extern "C" fn timed_locker(arg: *mut c_void) -> *mut c_void {
    let ctx = unsafe { &*(arg as *const TimedLockCtx) };
    ctx.rt.set_base_time(Timespec { sec: 0, nsec: 0 });
    let abstime = libc::timespec {
        tv_sec: 0,
        tv_nsec: 1000,
    };
    let mut error = 0;
    let ret = ctx.rt.mutex_timedlock(1, &mut error, ctx.mu.get(), &abstime);
    ctx.ret.store(ret, Ordering::SeqCst);
    ptr::null_mut()
}

/// A timed lock on a mutex its owner never releases comes back ETIMEDOUT
/// once the clamped logical deadline passes.
#[test]
fn mutex_timedlock_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let rt = common::runtime_with(dir.path(), |cfg| {
        cfg.launch_idle_thread = true;
    });
    let ctx = TimedLockCtx {
        rt: rt.clone(),
        mu: UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER),
        ret: AtomicI32::new(0),
    };
    let mut error = 0;
    assert_eq!(rt.mutex_lock(1, &mut error, ctx.mu.get()), 0);
    let th = common::spawn(
        rt.as_ref(),
        timed_locker,
        &ctx as *const TimedLockCtx as *mut c_void,
    );
    common::join(rt.as_ref(), th);
    assert_eq!(ctx.ret.load(Ordering::SeqCst), libc::ETIMEDOUT);
    assert_eq!(rt.mutex_unlock(2, &mut error, ctx.mu.get()), 0);
    rt.prog_end();
    common::assert_gapless(&common::read_logs(dir.path()));
}

/// A sleep is a pure timed wait: the turn counter must advance past the
/// converted deadline before the call returns.
#[test]
fn usleep_advances_logical_clock() {
    let dir = tempfile::tempdir().unwrap();
    let rt = common::runtime_with(dir.path(), |cfg| {
        cfg.launch_idle_thread = true;
        cfg.nanosec_per_turn = 1000;
    });
    let before = rt.turn_count();
    let mut error = 0;
    assert_eq!(rt.usleep(1, &mut error, 50), 0);
    assert!(
        rt.turn_count() >= before + 50,
        "only {} turns elapsed across a 50-turn sleep",
        rt.turn_count() - before
    );
    rt.prog_end();
    common::assert_gapless(&common::read_logs(dir.path()));
}
