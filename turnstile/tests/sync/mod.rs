/*
 * Copyright (c) Turnstile project developers.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Mutual exclusion and semaphore behavior under the turn-based scheduler.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::Arc;

use libc::c_void;

use turnstile::RecordRuntime;
use turnstile::SyncOp;

use crate::common;

struct MutexCtx {
    rt: Arc<dyn RecordRuntime>,
    mu: UnsafeCell<libc::pthread_mutex_t>,
    counter: UnsafeCell<u64>,
}

extern "C" fn mutex_worker(arg: *mut c_void) -> *mut c_void {
    let ctx = unsafe { &*(arg as *const MutexCtx) };
    let mut error = 0;
    for _ in 0..1000 {
        ctx.rt.mutex_lock(1, &mut error, ctx.mu.get());
        unsafe { *ctx.counter.get() += 1 };
        ctx.rt.mutex_unlock(2, &mut error, ctx.mu.get());
    }
    ptr::null_mut()
}

/// Two threads each take the lock 1000 times; the counter must come out
/// exactly 2000 and the log must show locks and unlocks strictly
/// alternating.
#[test]
fn mutex_mutual_exclusion() {
    let dir = tempfile::tempdir().unwrap();
    let rt = common::runtime_with(dir.path(), |_| {});
    let ctx = MutexCtx {
        rt: rt.clone(),
        mu: UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER),
        counter: UnsafeCell::new(0),
    };
    let arg = &ctx as *const MutexCtx as *mut c_void;
    let t1 = common::spawn(rt.as_ref(), mutex_worker, arg);
    let t2 = common::spawn(rt.as_ref(), mutex_worker, arg);
    common::join(rt.as_ref(), t1);
    common::join(rt.as_ref(), t2);
    assert_eq!(unsafe { *ctx.counter.get() }, 2000);
    rt.prog_end();

    let logs = common::read_logs(dir.path());
    common::assert_gapless(&logs);
    let merged = common::merged_by_turn(&logs);
    let lock_ops: Vec<SyncOp> = merged
        .iter()
        .map(|(_, r)| r.op)
        .filter(|op| matches!(op, SyncOp::MutexLock | SyncOp::MutexUnlock))
        .collect();
    assert_eq!(lock_ops.len(), 4000);
    for (i, op) in lock_ops.iter().enumerate() {
        let expected = if i % 2 == 0 {
            SyncOp::MutexLock
        } else {
            SyncOp::MutexUnlock
        };
        assert_eq!(*op, expected, "lock/unlock order broken at index {}", i);
    }
}

/// Trylock under contention surfaces EBUSY instead of waiting.
#[test]
fn mutex_trylock_reports_busy() {
    let dir = tempfile::tempdir().unwrap();
    let rt = common::runtime_with(dir.path(), |_| {});
    let mu = UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER);
    let mut error = 0;
    assert_eq!(rt.mutex_lock(1, &mut error, mu.get()), 0);
    assert_eq!(rt.mutex_trylock(2, &mut error, mu.get()), libc::EBUSY);
    assert_eq!(rt.mutex_unlock(3, &mut error, mu.get()), 0);
    assert_eq!(rt.mutex_trylock(4, &mut error, mu.get()), 0);
    assert_eq!(rt.mutex_unlock(5, &mut error, mu.get()), 0);
    rt.prog_end();
}

struct RwCtx {
    rt: Arc<dyn RecordRuntime>,
    rw: UnsafeCell<libc::pthread_rwlock_t>,
    value: UnsafeCell<u64>,
}

extern "C" fn rw_writer(arg: *mut c_void) -> *mut c_void {
    let ctx = unsafe { &*(arg as *const RwCtx) };
    let mut error = 0;
    for _ in 0..200 {
        ctx.rt.rwlock_wrlock(1, &mut error, ctx.rw.get());
        unsafe { *ctx.value.get() += 1 };
        ctx.rt.rwlock_unlock(2, &mut error, ctx.rw.get());
    }
    ptr::null_mut()
}

extern "C" fn rw_reader(arg: *mut c_void) -> *mut c_void {
    let ctx = unsafe { &*(arg as *const RwCtx) };
    let mut error = 0;
    for _ in 0..200 {
        ctx.rt.rwlock_rdlock(1, &mut error, ctx.rw.get());
        let v = unsafe { *ctx.value.get() };
        assert!(v <= 400);
        ctx.rt.rwlock_unlock(2, &mut error, ctx.rw.get());
    }
    ptr::null_mut()
}

#[test]
fn rwlock_serializes_readers_and_writers() {
    let dir = tempfile::tempdir().unwrap();
    let rt = common::runtime_with(dir.path(), |_| {});
    let ctx = RwCtx {
        rt: rt.clone(),
        rw: UnsafeCell::new(libc::PTHREAD_RWLOCK_INITIALIZER),
        value: UnsafeCell::new(0),
    };
    let arg = &ctx as *const RwCtx as *mut c_void;
    let w1 = common::spawn(rt.as_ref(), rw_writer, arg);
    let w2 = common::spawn(rt.as_ref(), rw_writer, arg);
    let r1 = common::spawn(rt.as_ref(), rw_reader, arg);
    common::join(rt.as_ref(), w1);
    common::join(rt.as_ref(), w2);
    common::join(rt.as_ref(), r1);
    assert_eq!(unsafe { *ctx.value.get() }, 400);
    rt.prog_end();
    common::assert_gapless(&common::read_logs(dir.path()));
}

struct SemCtx {
    rt: Arc<dyn RecordRuntime>,
    sem: UnsafeCell<libc::sem_t>,
    consumed: UnsafeCell<u32>,
}

extern "C" fn sem_consumer(arg: *mut c_void) -> *mut c_void {
    let ctx = unsafe { &*(arg as *const SemCtx) };
    let mut error = 0;
    for _ in 0..10 {
        assert_eq!(ctx.rt.sem_wait(1, &mut error, ctx.sem.get()), 0);
        unsafe { *ctx.consumed.get() += 1 };
    }
    ptr::null_mut()
}

#[test]
fn semaphore_counts_posts() {
    let dir = tempfile::tempdir().unwrap();
    let rt = common::runtime_with(dir.path(), |_| {});
    let ctx = SemCtx {
        rt: rt.clone(),
        sem: UnsafeCell::new(unsafe { std::mem::zeroed() }),
        consumed: UnsafeCell::new(0),
    };
    let mut error = 0;
    assert_eq!(rt.sem_init(1, &mut error, ctx.sem.get(), 0, 0), 0);
    let arg = &ctx as *const SemCtx as *mut c_void;
    let t = common::spawn(rt.as_ref(), sem_consumer, arg);
    for _ in 0..10 {
        assert_eq!(rt.sem_post(2, &mut error, ctx.sem.get()), 0);
    }
    common::join(rt.as_ref(), t);
    assert_eq!(unsafe { *ctx.consumed.get() }, 10);

    // Nothing left: trywait reports exhaustion.
    assert_eq!(rt.sem_trywait(3, &mut error, ctx.sem.get()), -1);
    assert_eq!(error, libc::EAGAIN);
    rt.prog_end();
    common::assert_gapless(&common::read_logs(dir.path()));
}
