/*
 * Copyright (c) Turnstile project developers.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Thread lifecycle, fork re-initialization, the blocking domain, non-det
//! regions, the FCFS serializer, and the standalone hook surface.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use libc::c_void;

use turnstile::RecordRuntime;
use turnstile::Scheduler;
use turnstile::SchedulerKind;
use turnstile::SyncOp;
use turnstile::TurnQueue;

use crate::common;

extern "C" fn returns_arg_plus_one(arg: *mut c_void) -> *mut c_void {
    (arg as usize + 1) as *mut c_void
}

#[test]
fn join_passes_return_value() {
    let dir = tempfile::tempdir().unwrap();
    let rt = common::runtime_with(dir.path(), |_| {});
    let th = common::spawn(rt.as_ref(), returns_arg_plus_one, 41 as *mut c_void);
    let mut ret: *mut c_void = ptr::null_mut();
    let mut error = 0;
    assert_eq!(
        rt.thread_join(turnstile::INVALID_INSID, &mut error, th, &mut ret),
        0
    );
    assert_eq!(ret as usize, 42);
    rt.prog_end();
}

/// Joining a thread that already became a zombie must not block.
#[test]
fn join_after_exit() {
    let dir = tempfile::tempdir().unwrap();
    let rt = common::runtime_with(dir.path(), |_| {});
    let th = common::spawn(rt.as_ref(), returns_arg_plus_one, ptr::null_mut());
    // Let the child run to completion; it needs no further turns from us
    // once it is at the head of the queue.
    std::thread::sleep(std::time::Duration::from_millis(100));
    common::join(rt.as_ref(), th);
    rt.prog_end();
}

/// A fork child keeps only the forking thread, with its logical id intact
/// and a fresh clock.
#[test]
fn fork_reset_keeps_only_survivor() {
    let q = TurnQueue::new();
    q.init_main();
    q.get_turn();
    assert_eq!(q.inc_turn(), 1);
    let me = q.current();
    q.fork_reset();
    assert_eq!(q.turn_count(), 0);
    assert_eq!(q.current(), me);
    assert_eq!(q.nthreads(), 1);
    // The queue is usable immediately: the survivor still holds the turn.
    assert_eq!(q.inc_turn(), 1);
    q.put_turn(false);
    q.get_turn();
    q.put_turn(false);
}

struct SerCtx {
    rt: Arc<dyn RecordRuntime>,
    mu: UnsafeCell<libc::pthread_mutex_t>,
    bar: UnsafeCell<libc::pthread_barrier_t>,
    counter: UnsafeCell<u64>,
    serial_seen: AtomicI32,
}

extern "C" fn serializer_worker(arg: *mut c_void) -> *mut c_void {
    let ctx = unsafe { &*(arg as *const SerCtx) };
    let mut error = 0;
    for _ in 0..500 {
        ctx.rt.mutex_lock(1, &mut error, ctx.mu.get());
        unsafe { *ctx.counter.get() += 1 };
        ctx.rt.mutex_unlock(2, &mut error, ctx.mu.get());
    }
    let ret = ctx.rt.barrier_wait(3, &mut error, ctx.bar.get());
    if ret == libc::PTHREAD_BARRIER_SERIAL_THREAD {
        ctx.serial_seen.fetch_add(1, Ordering::SeqCst);
    }
    ptr::null_mut()
}

/// The FCFS serializer still provides mutual exclusion and a working
/// native-barrier path; only the replayable schedule is given up.
#[test]
fn serializer_preserves_semantics() {
    let dir = tempfile::tempdir().unwrap();
    let rt = common::runtime_with(dir.path(), |cfg| {
        cfg.scheduler = SchedulerKind::Serializer;
    });
    let ctx = SerCtx {
        rt: rt.clone(),
        mu: UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER),
        bar: UnsafeCell::new(unsafe { std::mem::zeroed() }),
        counter: UnsafeCell::new(0),
        serial_seen: AtomicI32::new(0),
    };
    let mut error = 0;
    assert_eq!(rt.barrier_init(1, &mut error, ctx.bar.get(), ptr::null(), 2), 0);
    let arg = &ctx as *const SerCtx as *mut c_void;
    let t1 = common::spawn(rt.as_ref(), serializer_worker, arg);
    let t2 = common::spawn(rt.as_ref(), serializer_worker, arg);
    common::join(rt.as_ref(), t1);
    common::join(rt.as_ref(), t2);
    assert_eq!(unsafe { *ctx.counter.get() }, 1000);
    assert_eq!(ctx.serial_seen.load(Ordering::SeqCst), 1);
    rt.prog_end();

    // Log faithfulness only: per-thread turns are strictly increasing even
    // though the interleaving is not replayable.
    let logs = common::read_logs(dir.path());
    common::assert_gapless(&logs);
}

struct NonDetCtx {
    rt: Arc<dyn RecordRuntime>,
    mu: UnsafeCell<libc::pthread_mutex_t>,
    counter: UnsafeCell<u64>,
}

extern "C" fn non_det_worker(arg: *mut c_void) -> *mut c_void {
    let ctx = unsafe { &*(arg as *const NonDetCtx) };
    let mut error = 0;
    ctx.rt.non_det_start();
    for _ in 0..10 {
        ctx.rt.mutex_lock(1, &mut error, ctx.mu.get());
        unsafe { *ctx.counter.get() += 1 };
        ctx.rt.mutex_unlock(2, &mut error, ctx.mu.get());
    }
    ctx.rt.non_det_end();
    // Back under the deterministic discipline.
    ctx.rt.mutex_lock(3, &mut error, ctx.mu.get());
    unsafe { *ctx.counter.get() += 1 };
    ctx.rt.mutex_unlock(4, &mut error, ctx.mu.get());
    ptr::null_mut()
}

/// Inside a non-det region every wrapper short-circuits: no turns, no
/// records.  The region is entered only once the run queue drains, and the
/// thread rejoins cleanly afterwards.
#[test]
fn non_det_region_short_circuits() {
    let dir = tempfile::tempdir().unwrap();
    let rt = common::runtime_with(dir.path(), |cfg| {
        cfg.enforce_non_det_annotations = true;
        cfg.record_runtime_stat = true;
    });
    let ctx = NonDetCtx {
        rt: rt.clone(),
        mu: UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER),
        counter: UnsafeCell::new(0),
    };
    let arg = &ctx as *const NonDetCtx as *mut c_void;
    let th = common::spawn(rt.as_ref(), non_det_worker, arg);
    common::join(rt.as_ref(), th);
    assert_eq!(unsafe { *ctx.counter.get() }, 11);

    let stats = rt.stats();
    assert_eq!(stats.non_det_regions, 1);
    assert_eq!(stats.non_det_sync_ops, 20);
    rt.prog_end();

    let logs = common::read_logs(dir.path());
    common::assert_gapless(&logs);
    let merged = common::merged_by_turn(&logs);
    let starts = merged
        .iter()
        .filter(|(_, r)| r.op == SyncOp::NonDetStart)
        .count();
    assert_eq!(starts, 1);
    // Exactly one deterministic lock/unlock pair made it into the log.
    let locks = merged
        .iter()
        .filter(|(_, r)| r.op == SyncOp::MutexLock)
        .count();
    assert_eq!(locks, 1);
}

struct PipeCtx {
    rt: Arc<dyn RecordRuntime>,
    wfd: libc::c_int,
}

extern "C" fn pipe_writer(arg: *mut c_void) -> *mut c_void {
    let ctx = unsafe { &*(arg as *const PipeCtx) };
    let mut error = 0;
    let msg = b"hello";
    let n = ctx.rt.write(
        1,
        &mut error,
        ctx.wfd,
        msg.as_ptr() as *const c_void,
        msg.len(),
    );
    assert_eq!(n, 5);
    ptr::null_mut()
}

/// A read from a pipe leaves the deterministic domain while it blocks and
/// logs its completion after re-entry; the writer on the other end keeps
/// getting turns meanwhile.
#[test]
fn pipe_read_goes_through_blocking_domain() {
    let dir = tempfile::tempdir().unwrap();
    let rt = common::runtime_with(dir.path(), |_| {});
    let mut fds = [0 as libc::c_int; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    let ctx = PipeCtx {
        rt: rt.clone(),
        wfd: fds[1],
    };
    let th = common::spawn(
        rt.as_ref(),
        pipe_writer,
        &ctx as *const PipeCtx as *mut c_void,
    );
    let mut buf = [0u8; 16];
    let mut error = 0;
    let n = rt.read(2, &mut error, fds[0], buf.as_mut_ptr() as *mut c_void, 16);
    assert_eq!(n, 5);
    assert_eq!(&buf[..5], b"hello");
    common::join(rt.as_ref(), th);
    unsafe {
        libc::close(fds[0]);
        libc::close(fds[1]);
    }
    rt.prog_end();

    let logs = common::read_logs(dir.path());
    common::assert_gapless(&logs);
    let merged = common::merged_by_turn(&logs);
    assert_eq!(merged.iter().filter(|(_, r)| r.op == SyncOp::Read).count(), 1);
    assert_eq!(merged.iter().filter(|(_, r)| r.op == SyncOp::Write).count(), 1);
}

/// Regular-file I/O bypasses the blocking domain entirely: no turns
/// consumed, nothing logged.
#[test]
fn regular_file_io_bypasses_turns() {
    let dir = tempfile::tempdir().unwrap();
    let rt = common::runtime_with(dir.path(), |_| {});
    let file = tempfile::NamedTempFile::new().unwrap();
    use std::os::unix::io::AsRawFd;
    let fd = file.as_file().as_raw_fd();

    let before = rt.turn_count();
    let mut error = 0;
    let msg = b"data";
    assert_eq!(
        rt.write(1, &mut error, fd, msg.as_ptr() as *const c_void, msg.len()),
        4
    );
    let mut buf = [0u8; 4];
    assert_eq!(
        rt.pread(2, &mut error, fd, buf.as_mut_ptr() as *mut c_void, 4, 0),
        4
    );
    assert_eq!(&buf, b"data");
    assert_eq!(rt.turn_count(), before);
    rt.prog_end();
}

/// Without an installed runtime every annotation hook is a no-op, so an
/// instrumented binary runs standalone.
#[test]
fn hooks_are_noops_without_runtime() {
    turnstile::hooks::turnstile_lineup_init(7, 4, 100);
    turnstile::hooks::turnstile_lineup_start(7);
    turnstile::hooks::turnstile_lineup_end(7);
    turnstile::hooks::turnstile_lineup_destroy(7);
    turnstile::hooks::turnstile_non_det_start();
    turnstile::hooks::turnstile_non_det_end();
    turnstile::hooks::turnstile_thread_detach();
    let ts = libc::timespec {
        tv_sec: 1,
        tv_nsec: 0,
    };
    unsafe { turnstile::hooks::turnstile_set_base_timespec(&ts) };
    unsafe { turnstile::hooks::turnstile_symbolic(ptr::null_mut(), 0, ptr::null()) };
}
