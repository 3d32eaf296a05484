/*
 * Copyright (c) Turnstile project developers.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The record runtime: deterministic wrappers for the standard
//! synchronization primitives, generic over the scheduler policy.
//!
//! Every wrapper follows one template, expressed by [`TurnGuard`]: acquire
//! the turn, perform the semantic action (the native primitive or its
//! reimplementation on the scheduler's wait/signal), stamp one log record
//! with a freshly incremented turn, release the turn, and restore the
//! application's errno.  Condition variables and barriers never sleep on
//! the native object; they are rebuilt on the scheduler's channels so the
//! released order is the deterministic one.
//!
//! The thread-creation protocol assigns the child's logical id in the
//! parent while the parent holds the turn.  The child is held on a
//! semaphore until that happens, and a second semaphore stops a post from
//! one creation pairing with the wait of another child when two creations
//! race.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;

use libc::c_char;
use libc::c_int;
use libc::c_uint;
use libc::c_void;

use turnstile_model::config::Config;
use turnstile_model::record::InsId;
use turnstile_model::record::SyncFlags;
use turnstile_model::record::SyncRec;
use turnstile_model::record::INVALID_INSID;
use turnstile_model::syncop::SyncOp;
use turnstile_model::tid::Ltid;
use turnstile_model::time::relative_turns;
use turnstile_model::time::Timespec;
use turnstile_model::time::TurnCount;

use crate::blocking;
use crate::idle;
use crate::logger::LogManager;
use crate::nondet;
use crate::scheduler::lineup_channel;
use crate::scheduler::Channel;
use crate::scheduler::RawThread;
use crate::scheduler::Scheduler;
use crate::scheduler::IDLE_CHANNEL;
use crate::scheduler::NON_DET_CHANNEL;
use crate::scheduler::NO_CHANNEL;
use crate::stats::RuntimeStats;
use crate::util;

// The `libc` crate dropped its binding for this glibc function; it still
// exists in the system C library, so declare it ourselves.
extern "C" {
    fn gethostbyname(name: *const c_char) -> *mut libc::hostent;
}
use crate::util::Sem;

/// The C-ABI entry point of a created thread.
pub type StartRoutine = extern "C" fn(*mut c_void) -> *mut c_void;

thread_local! {
    static BASE_TIME: std::cell::Cell<Option<Timespec>> = std::cell::Cell::new(None);
}

#[derive(Debug)]
struct BarrierState {
    count: u32,
    narrived: u32,
}

#[derive(Debug, PartialEq, Eq)]
enum LineupPhase {
    Arriving,
    Leaving,
}

#[derive(Debug)]
struct LineupState {
    count: u32,
    nactive: u32,
    timeout_turns: u64,
    phase: LineupPhase,
}

/// The record runtime, parameterized by scheduler policy.
#[derive(Debug)]
pub struct Recorder<S: Scheduler> {
    self_ref: Weak<Recorder<S>>,
    cfg: Config,
    sched: S,
    logger: LogManager,
    stats: Mutex<RuntimeStats>,

    /// Barrier bookkeeping, keyed by the barrier's address.  Accessed only
    /// while holding the turn.
    barriers: Mutex<HashMap<Channel, BarrierState>>,

    /// Lineup bookkeeping, keyed by the opaque type id.  Accessed only
    /// while holding the turn.
    lineups: Mutex<HashMap<u64, LineupState>>,

    begin_sem: Sem,
    begin_done_sem: Sem,

    idle_done: AtomicBool,
    idle_handle: Mutex<Option<RawThread>>,
}

struct StartPayload {
    start: StartRoutine,
    arg: *mut c_void,
    rt: Arc<dyn RecordRuntime>,
}

extern "C" fn thread_trampoline(p: *mut c_void) -> *mut c_void {
    let payload = unsafe { Box::from_raw(p as *mut StartPayload) };
    payload.rt.thread_begin();
    let ret = (payload.start)(payload.arg);
    payload.rt.thread_end(INVALID_INSID);
    ret
}

/// Run a native call with the application's errno installed, capturing the
/// value it leaves behind.
fn with_app_errno<T>(error: &mut i32, f: impl FnOnce() -> T) -> T {
    util::set_errno(*error);
    let ret = f();
    *error = util::errno();
    ret
}

/// Brackets one deterministic critical section: created by
/// `Recorder::turn` (which acquires the turn), finished by one of the
/// `finish*` methods (which stamp a record, release the turn, and restore
/// errno).  `log_half` emits the released half of a two-half wait mid-way.
struct TurnGuard<'a, S: Scheduler> {
    rt: &'a Recorder<S>,
    ins: InsId,
}

impl<'a, S: Scheduler> TurnGuard<'a, S> {
    fn log_half(&self, op: SyncOp, args: [u64; 2]) {
        let turn = self.rt.sched.inc_turn();
        self.rt.log(self.ins, op, turn, SyncFlags::empty(), args);
    }

    fn finish(self, op: SyncOp, args: [u64; 2]) {
        self.finish_with(op, false, args)
    }

    fn finish_with(self, op: SyncOp, timed_out: bool, args: [u64; 2]) {
        let saved = util::errno();
        let turn = self.rt.sched.inc_turn();
        let mut flags = SyncFlags::AFTER;
        if timed_out {
            flags |= SyncFlags::TIMED_OUT;
        }
        self.rt.log(self.ins, op, turn, flags, args);
        self.rt.sched.put_turn(false);
        util::set_errno(saved);
    }

    fn finish_thread(self, op: SyncOp, args: [u64; 2]) {
        let saved = util::errno();
        let turn = self.rt.sched.inc_turn();
        self.rt.log(self.ins, op, turn, SyncFlags::AFTER, args);
        self.rt.sched.put_turn(true);
        util::set_errno(saved);
    }
}

impl<S: Scheduler> Recorder<S> {
    /// Build a runtime over the given scheduler.  The returned value is not
    /// yet attached to the calling thread; run [`RecordRuntime::prog_begin`]
    /// from the main thread first.
    pub fn new(sched: S, mut cfg: Config) -> Arc<Recorder<S>> {
        cfg.validate();
        let logger = LogManager::new(cfg.output_dir.clone(), cfg.dmt && cfg.log_sync);
        Arc::new_cyclic(|w| Recorder {
            self_ref: w.clone(),
            cfg,
            sched,
            logger,
            stats: Mutex::new(RuntimeStats::default()),
            barriers: Mutex::new(HashMap::new()),
            lineups: Mutex::new(HashMap::new()),
            begin_sem: Sem::new(),
            begin_done_sem: Sem::new(),
            idle_done: AtomicBool::new(false),
            idle_handle: Mutex::new(None),
        })
    }

    pub(crate) fn log(
        &self,
        ins: InsId,
        op: SyncOp,
        turn: TurnCount,
        flags: SyncFlags,
        args: [u64; 2],
    ) {
        if !self.cfg.log_sync {
            return;
        }
        self.logger.log(
            self.sched.current(),
            SyncRec {
                insid: ins,
                op,
                flags,
                turn,
                args,
            },
        );
    }

    pub(crate) fn bump(&self, f: impl FnOnce(&mut RuntimeStats)) {
        if self.cfg.record_runtime_stat {
            f(&mut self.stats.lock().unwrap());
        }
    }

    pub(crate) fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub(crate) fn sched(&self) -> &S {
        &self.sched
    }

    fn turn(&self, ins: InsId) -> TurnGuard<'_, S> {
        if self.cfg.enforce_non_det_annotations {
            debug_assert!(
                !nondet::in_non_det(),
                "deterministic operation inside a non-det region"
            );
        }
        self.sched.get_turn();
        self.bump(|s| s.det_sync_ops += 1);
        TurnGuard { rt: self, ins }
    }

    fn passthrough(&self) -> bool {
        !self.cfg.dmt
    }

    /// The non-det region short-circuit: inside a region the wrapper runs
    /// the native primitive with no turn and no log, tagging the var.
    fn non_det_passthrough(&self, var: Channel) -> bool {
        if self.cfg.enforce_non_det_annotations && nondet::in_non_det() {
            self.bump(|s| s.non_det_sync_ops += 1);
            nondet::add_non_det_var(var);
            true
        } else {
            false
        }
    }

    /// Spin on trylock, parking on the mutex's channel between attempts.
    /// Caller holds the turn.  Returns 0 or ETIMEDOUT.
    fn mutex_lock_helper(
        &self,
        mu: *mut libc::pthread_mutex_t,
        deadline: Option<TurnCount>,
    ) -> c_int {
        loop {
            let ret = unsafe { libc::pthread_mutex_trylock(mu) };
            if ret == 0 {
                return 0;
            }
            assert_eq!(ret, libc::EBUSY, "failed sync calls are not supported");
            if self.sched.wait(mu as Channel, deadline).timed_out() {
                return libc::ETIMEDOUT;
            }
        }
    }

    /// Both read and write acquisitions spin on the *write* trylock;
    /// readers are serialized rather than shared.
    fn rwlock_lock_helper(
        &self,
        rw: *mut libc::pthread_rwlock_t,
        deadline: Option<TurnCount>,
    ) -> c_int {
        loop {
            let ret = unsafe { libc::pthread_rwlock_trywrlock(rw) };
            if ret == 0 {
                return 0;
            }
            assert_eq!(ret, libc::EBUSY, "failed sync calls are not supported");
            if self.sched.wait(rw as Channel, deadline).timed_out() {
                return libc::ETIMEDOUT;
            }
        }
    }

    /// Relative interval for an absolute deadline, measured from the
    /// thread's announced base time so identical runs see identical
    /// intervals.  Falls back to the wall clock with a warning.
    fn relative_deadline(&self, abstime: Timespec) -> Timespec {
        match BASE_TIME.with(|c| c.get()) {
            Some(base) => abstime.since(base),
            None => {
                tracing::warn!(
                    "timed wait without an announced base time has a nondeterministic timeout"
                );
                abstime.since(Timespec::now_realtime())
            }
        }
    }

    /// Absolute turn deadline for a relative interval.  Converting physical
    /// to logical time is only sound when the idle thread keeps the counter
    /// moving; without it a fully-waiting process would hang, so refuse.
    fn deadline_turns(&self, rel: Timespec) -> TurnCount {
        if !self.cfg.launch_idle_thread {
            panic!(
                "converting physical time to logical time requires launch_idle_thread; \
                 enable it and rerun"
            );
        }
        self.sched.turn_count()
            + relative_turns(rel, self.cfg.nanosec_per_turn, self.sched.nthreads())
    }

    fn spawn_idle(&self) {
        let th = idle::spawn(self);
        *self.idle_handle.lock().unwrap() = Some(th);
    }

    pub(crate) fn arc_dyn(&self) -> Arc<dyn RecordRuntime> {
        let strong: Arc<Recorder<S>> = self
            .self_ref
            .upgrade()
            .expect("runtime used after teardown");
        strong
    }
}

/// The full wrapper surface of the record runtime, object-safe so the
/// process-wide installed runtime can be policy-erased, mirroring the
/// scheduler-parameterized recorder behind a common interface.
///
/// Wrapper methods take the instrumentation callsite id and the
/// application's captured errno, exactly as the C hook surface presents
/// them.
#[allow(missing_docs, clippy::missing_safety_doc)]
pub trait RecordRuntime: Send + Sync {
    fn config(&self) -> &Config;
    fn turn_count(&self) -> TurnCount;
    fn stats(&self) -> RuntimeStats;

    /// Attach the calling thread as the main thread and start the idle
    /// thread if configured.
    fn prog_begin(&self);
    /// Tear down: retire the idle thread, print stats, end the main thread.
    fn prog_end(&self);
    fn print_stats(&self);

    fn thread_begin(&self);
    fn thread_end(&self, ins: InsId);
    fn thread_create(
        &self,
        ins: InsId,
        error: &mut i32,
        thread: *mut RawThread,
        attr: *const libc::pthread_attr_t,
        start: StartRoutine,
        arg: *mut c_void,
    ) -> c_int;
    fn thread_join(
        &self,
        ins: InsId,
        error: &mut i32,
        th: RawThread,
        retval: *mut *mut c_void,
    ) -> c_int;
    fn thread_detach(&self);

    fn mutex_init(
        &self,
        ins: InsId,
        error: &mut i32,
        mu: *mut libc::pthread_mutex_t,
        attr: *const libc::pthread_mutexattr_t,
    ) -> c_int;
    fn mutex_destroy(&self, ins: InsId, error: &mut i32, mu: *mut libc::pthread_mutex_t) -> c_int;
    fn mutex_lock(&self, ins: InsId, error: &mut i32, mu: *mut libc::pthread_mutex_t) -> c_int;
    fn mutex_trylock(&self, ins: InsId, error: &mut i32, mu: *mut libc::pthread_mutex_t) -> c_int;
    fn mutex_timedlock(
        &self,
        ins: InsId,
        error: &mut i32,
        mu: *mut libc::pthread_mutex_t,
        abstime: *const libc::timespec,
    ) -> c_int;
    fn mutex_unlock(&self, ins: InsId, error: &mut i32, mu: *mut libc::pthread_mutex_t) -> c_int;

    fn rwlock_init(
        &self,
        ins: InsId,
        error: &mut i32,
        rw: *mut libc::pthread_rwlock_t,
        attr: *const libc::pthread_rwlockattr_t,
    ) -> c_int;
    fn rwlock_destroy(&self, ins: InsId, error: &mut i32, rw: *mut libc::pthread_rwlock_t)
        -> c_int;
    fn rwlock_rdlock(&self, ins: InsId, error: &mut i32, rw: *mut libc::pthread_rwlock_t) -> c_int;
    fn rwlock_wrlock(&self, ins: InsId, error: &mut i32, rw: *mut libc::pthread_rwlock_t) -> c_int;
    fn rwlock_tryrdlock(
        &self,
        ins: InsId,
        error: &mut i32,
        rw: *mut libc::pthread_rwlock_t,
    ) -> c_int;
    fn rwlock_trywrlock(
        &self,
        ins: InsId,
        error: &mut i32,
        rw: *mut libc::pthread_rwlock_t,
    ) -> c_int;
    fn rwlock_unlock(&self, ins: InsId, error: &mut i32, rw: *mut libc::pthread_rwlock_t) -> c_int;

    fn cond_wait(
        &self,
        ins: InsId,
        error: &mut i32,
        cv: *mut libc::pthread_cond_t,
        mu: *mut libc::pthread_mutex_t,
    ) -> c_int;
    fn cond_timedwait(
        &self,
        ins: InsId,
        error: &mut i32,
        cv: *mut libc::pthread_cond_t,
        mu: *mut libc::pthread_mutex_t,
        abstime: *const libc::timespec,
    ) -> c_int;
    fn cond_signal(&self, ins: InsId, error: &mut i32, cv: *mut libc::pthread_cond_t) -> c_int;
    fn cond_broadcast(&self, ins: InsId, error: &mut i32, cv: *mut libc::pthread_cond_t) -> c_int;

    fn barrier_init(
        &self,
        ins: InsId,
        error: &mut i32,
        bar: *mut libc::pthread_barrier_t,
        attr: *const libc::pthread_barrierattr_t,
        count: c_uint,
    ) -> c_int;
    fn barrier_wait(&self, ins: InsId, error: &mut i32, bar: *mut libc::pthread_barrier_t)
        -> c_int;
    fn barrier_destroy(
        &self,
        ins: InsId,
        error: &mut i32,
        bar: *mut libc::pthread_barrier_t,
    ) -> c_int;

    fn sem_init(
        &self,
        ins: InsId,
        error: &mut i32,
        sem: *mut libc::sem_t,
        pshared: c_int,
        value: c_uint,
    ) -> c_int;
    fn sem_wait(&self, ins: InsId, error: &mut i32, sem: *mut libc::sem_t) -> c_int;
    fn sem_trywait(&self, ins: InsId, error: &mut i32, sem: *mut libc::sem_t) -> c_int;
    fn sem_timedwait(
        &self,
        ins: InsId,
        error: &mut i32,
        sem: *mut libc::sem_t,
        abstime: *const libc::timespec,
    ) -> c_int;
    fn sem_post(&self, ins: InsId, error: &mut i32, sem: *mut libc::sem_t) -> c_int;

    fn lineup_init(&self, opaque_type: u64, count: c_uint, timeout_turns: u64);
    fn lineup_destroy(&self, opaque_type: u64);
    fn lineup_start(&self, opaque_type: u64);
    fn lineup_end(&self, opaque_type: u64);

    fn non_det_start(&self);
    fn non_det_end(&self);
    fn non_det_barrier_end(&self, bar_id: c_int, count: c_int);

    /// Announce the base time against which this thread's absolute
    /// deadlines are made relative (and thereby deterministic).
    fn set_base_time(&self, ts: Timespec);

    fn symbolic(
        &self,
        ins: InsId,
        error: &mut i32,
        addr: *mut c_void,
        nbytes: c_int,
        name: *const c_char,
    );
    fn sched_yield(&self, ins: InsId, error: &mut i32) -> c_int;
    fn sleep(&self, ins: InsId, error: &mut i32, seconds: c_uint) -> c_uint;
    fn usleep(&self, ins: InsId, error: &mut i32, usec: c_uint) -> c_int;
    fn nanosleep(
        &self,
        ins: InsId,
        error: &mut i32,
        req: *const libc::timespec,
        rem: *mut libc::timespec,
    ) -> c_int;
    fn fork(&self, ins: InsId, error: &mut i32) -> libc::pid_t;

    fn read(
        &self,
        ins: InsId,
        error: &mut i32,
        fd: c_int,
        buf: *mut c_void,
        count: libc::size_t,
    ) -> libc::ssize_t;
    fn write(
        &self,
        ins: InsId,
        error: &mut i32,
        fd: c_int,
        buf: *const c_void,
        count: libc::size_t,
    ) -> libc::ssize_t;
    fn pread(
        &self,
        ins: InsId,
        error: &mut i32,
        fd: c_int,
        buf: *mut c_void,
        count: libc::size_t,
        offset: libc::off_t,
    ) -> libc::ssize_t;
    fn pwrite(
        &self,
        ins: InsId,
        error: &mut i32,
        fd: c_int,
        buf: *const c_void,
        count: libc::size_t,
        offset: libc::off_t,
    ) -> libc::ssize_t;
    fn accept(
        &self,
        ins: InsId,
        error: &mut i32,
        fd: c_int,
        addr: *mut libc::sockaddr,
        addrlen: *mut libc::socklen_t,
    ) -> c_int;
    fn connect(
        &self,
        ins: InsId,
        error: &mut i32,
        fd: c_int,
        addr: *const libc::sockaddr,
        addrlen: libc::socklen_t,
    ) -> c_int;
    fn recv(
        &self,
        ins: InsId,
        error: &mut i32,
        fd: c_int,
        buf: *mut c_void,
        len: libc::size_t,
        flags: c_int,
    ) -> libc::ssize_t;
    fn send(
        &self,
        ins: InsId,
        error: &mut i32,
        fd: c_int,
        buf: *const c_void,
        len: libc::size_t,
        flags: c_int,
    ) -> libc::ssize_t;
    fn select(
        &self,
        ins: InsId,
        error: &mut i32,
        nfds: c_int,
        readfds: *mut libc::fd_set,
        writefds: *mut libc::fd_set,
        exceptfds: *mut libc::fd_set,
        timeout: *mut libc::timeval,
    ) -> c_int;
    fn poll(
        &self,
        ins: InsId,
        error: &mut i32,
        fds: *mut libc::pollfd,
        nfds: libc::nfds_t,
        timeout: c_int,
    ) -> c_int;
    fn epoll_wait(
        &self,
        ins: InsId,
        error: &mut i32,
        epfd: c_int,
        events: *mut libc::epoll_event,
        maxevents: c_int,
        timeout: c_int,
    ) -> c_int;
    fn sigwait(
        &self,
        ins: InsId,
        error: &mut i32,
        set: *const libc::sigset_t,
        sig: *mut c_int,
    ) -> c_int;
    fn waitpid(
        &self,
        ins: InsId,
        error: &mut i32,
        pid: libc::pid_t,
        status: *mut c_int,
        options: c_int,
    ) -> libc::pid_t;
    fn wait_child(&self, ins: InsId, error: &mut i32, status: *mut c_int) -> libc::pid_t;
    fn gethostbyname(
        &self,
        ins: InsId,
        error: &mut i32,
        name: *const c_char,
    ) -> *mut libc::hostent;
    fn fgets(
        &self,
        ins: InsId,
        error: &mut i32,
        s: *mut c_char,
        size: c_int,
        stream: *mut libc::FILE,
    ) -> *mut c_char;

    /// One loop iteration of the internal idle thread.
    fn idle_tick(&self);
    /// Whether the idle thread has been asked to retire.
    fn idle_done(&self) -> bool;
}

impl<S: Scheduler> RecordRuntime for Recorder<S> {
    fn config(&self) -> &Config {
        &self.cfg
    }

    fn turn_count(&self) -> TurnCount {
        self.sched.turn_count()
    }

    fn stats(&self) -> RuntimeStats {
        self.stats.lock().unwrap().clone()
    }

    fn prog_begin(&self) {
        if self.passthrough() {
            return;
        }
        self.sched.init_main();
        self.thread_begin();
        if self.cfg.launch_idle_thread {
            self.spawn_idle();
        }
    }

    fn prog_end(&self) {
        if self.passthrough() {
            return;
        }
        let idle_th = self.idle_handle.lock().unwrap().take();
        if let Some(th) = idle_th {
            self.idle_done.store(true, Ordering::SeqCst);
            self.sched.get_turn();
            self.sched.signal(IDLE_CHANNEL, true);
            self.sched.put_turn(false);
            let mut err = 0;
            self.thread_join(INVALID_INSID, &mut err, th, std::ptr::null_mut());
        }
        if self.cfg.record_runtime_stat {
            self.print_stats();
        }
        self.thread_end(INVALID_INSID);
    }

    /// Printing while holding the turn gives a deterministic snapshot.  The
    /// turn counter is left alone so the event log stays gap-free.
    fn print_stats(&self) {
        self.sched.get_turn();
        if self.cfg.record_runtime_stat {
            tracing::info!("runtime stats:\n{}", self.stats.lock().unwrap());
        }
        self.sched.put_turn(false);
    }

    fn thread_begin(&self) {
        if self.passthrough() {
            return;
        }
        let handle = unsafe { libc::pthread_self() };
        if crate::scheduler::current_ltid() == Ltid::INVALID {
            self.begin_sem.wait();
            self.sched.bind_self(handle);
            self.begin_done_sem.post();
        }
        assert_ne!(self.sched.current(), Ltid::INVALID);
        let g = self.turn(INVALID_INSID);
        g.finish(SyncOp::ThreadBegin, [handle as u64, 0]);
    }

    fn thread_end(&self, ins: InsId) {
        if self.passthrough() {
            return;
        }
        let handle = unsafe { libc::pthread_self() };
        let g = self.turn(ins);
        g.finish_thread(SyncOp::ThreadEnd, [handle as u64, 0]);
        self.logger.thread_end();
    }

    fn thread_create(
        &self,
        ins: InsId,
        error: &mut i32,
        thread: *mut RawThread,
        attr: *const libc::pthread_attr_t,
        start: StartRoutine,
        arg: *mut c_void,
    ) -> c_int {
        if self.passthrough() {
            let mut th: RawThread = 0;
            let ret = unsafe { libc::pthread_create(&mut th, attr, start, arg) };
            if !thread.is_null() {
                unsafe { *thread = th };
            }
            return ret;
        }
        let g = self.turn(ins);
        let payload = Box::new(StartPayload {
            start,
            arg,
            rt: self.arc_dyn(),
        });
        let mut th: RawThread = 0;
        let ret = with_app_errno(error, || unsafe {
            libc::pthread_create(
                &mut th,
                attr,
                thread_trampoline,
                Box::into_raw(payload) as *mut c_void,
            )
        });
        assert_eq!(ret, 0, "failed sync calls are not supported");
        self.sched.register_child(th);
        if !thread.is_null() {
            unsafe { *thread = th };
        }
        g.finish(SyncOp::ThreadCreate, [th as u64, ret as u64]);
        // The child consumes exactly this post, then acknowledges, so two
        // racing creations cannot cross their handshakes.
        self.begin_sem.post();
        self.begin_done_sem.wait();
        ret
    }

    fn thread_join(
        &self,
        ins: InsId,
        error: &mut i32,
        th: RawThread,
        retval: *mut *mut c_void,
    ) -> c_int {
        if self.passthrough() {
            return unsafe { libc::pthread_join(th, retval) };
        }
        let g = self.turn(ins);
        while !self.sched.is_zombie(th) {
            self.sched.wait(th as Channel, None);
        }
        let ret = with_app_errno(error, || unsafe { libc::pthread_join(th, retval) });
        assert_eq!(ret, 0, "failed sync calls are not supported");
        self.sched.reap(th);
        g.finish(SyncOp::ThreadJoin, [th as u64, ret as u64]);
        ret
    }

    fn thread_detach(&self) {
        // Contract kept for the annotation surface; detaching has no
        // scheduler-visible effect.
        tracing::debug!("thread_detach from ltid {}", self.sched.current());
    }

    fn mutex_init(
        &self,
        ins: InsId,
        error: &mut i32,
        mu: *mut libc::pthread_mutex_t,
        attr: *const libc::pthread_mutexattr_t,
    ) -> c_int {
        if self.passthrough() || self.non_det_passthrough(mu as Channel) {
            return unsafe { libc::pthread_mutex_init(mu, attr) };
        }
        let g = self.turn(ins);
        let ret = with_app_errno(error, || unsafe { libc::pthread_mutex_init(mu, attr) });
        g.finish(SyncOp::MutexInit, [mu as u64, ret as u64]);
        ret
    }

    fn mutex_destroy(&self, ins: InsId, error: &mut i32, mu: *mut libc::pthread_mutex_t) -> c_int {
        if self.passthrough() || self.non_det_passthrough(mu as Channel) {
            return unsafe { libc::pthread_mutex_destroy(mu) };
        }
        let g = self.turn(ins);
        let ret = with_app_errno(error, || unsafe { libc::pthread_mutex_destroy(mu) });
        g.finish(SyncOp::MutexDestroy, [mu as u64, ret as u64]);
        ret
    }

    fn mutex_lock(&self, ins: InsId, error: &mut i32, mu: *mut libc::pthread_mutex_t) -> c_int {
        if self.passthrough() || self.non_det_passthrough(mu as Channel) {
            return unsafe { libc::pthread_mutex_lock(mu) };
        }
        let g = self.turn(ins);
        let ret = with_app_errno(error, || self.mutex_lock_helper(mu, None));
        debug_assert_eq!(ret, 0);
        g.finish(SyncOp::MutexLock, [mu as u64, 0]);
        0
    }

    /// Try exactly once while holding the turn; EBUSY is surfaced, not
    /// retried, preserving trylock semantics.
    fn mutex_trylock(&self, ins: InsId, error: &mut i32, mu: *mut libc::pthread_mutex_t) -> c_int {
        if self.passthrough() || self.non_det_passthrough(mu as Channel) {
            return unsafe { libc::pthread_mutex_trylock(mu) };
        }
        let g = self.turn(ins);
        let ret = with_app_errno(error, || unsafe { libc::pthread_mutex_trylock(mu) });
        assert!(
            ret == 0 || ret == libc::EBUSY,
            "failed sync calls are not supported"
        );
        g.finish(SyncOp::MutexTryLock, [mu as u64, ret as u64]);
        ret
    }

    fn mutex_timedlock(
        &self,
        ins: InsId,
        error: &mut i32,
        mu: *mut libc::pthread_mutex_t,
        abstime: *const libc::timespec,
    ) -> c_int {
        if abstime.is_null() {
            return self.mutex_lock(ins, error, mu);
        }
        if self.passthrough() || self.non_det_passthrough(mu as Channel) {
            return unsafe { libc::pthread_mutex_timedlock(mu, abstime) };
        }
        let rel = self.relative_deadline(Timespec::from(unsafe { *abstime }));
        let g = self.turn(ins);
        let deadline = self.deadline_turns(rel);
        let ret = with_app_errno(error, || self.mutex_lock_helper(mu, Some(deadline)));
        g.finish_with(
            SyncOp::MutexTimedLock,
            ret == libc::ETIMEDOUT,
            [mu as u64, ret as u64],
        );
        ret
    }

    fn mutex_unlock(&self, ins: InsId, error: &mut i32, mu: *mut libc::pthread_mutex_t) -> c_int {
        if self.passthrough() || self.non_det_passthrough(mu as Channel) {
            return unsafe { libc::pthread_mutex_unlock(mu) };
        }
        let g = self.turn(ins);
        let ret = with_app_errno(error, || unsafe { libc::pthread_mutex_unlock(mu) });
        assert_eq!(ret, 0, "failed sync calls are not supported");
        self.sched.signal(mu as Channel, false);
        g.finish(SyncOp::MutexUnlock, [mu as u64, ret as u64]);
        ret
    }

    fn rwlock_init(
        &self,
        ins: InsId,
        error: &mut i32,
        rw: *mut libc::pthread_rwlock_t,
        attr: *const libc::pthread_rwlockattr_t,
    ) -> c_int {
        if self.passthrough() || self.non_det_passthrough(rw as Channel) {
            return unsafe { libc::pthread_rwlock_init(rw, attr) };
        }
        let g = self.turn(ins);
        let ret = with_app_errno(error, || unsafe { libc::pthread_rwlock_init(rw, attr) });
        g.finish(SyncOp::RwlockInit, [rw as u64, ret as u64]);
        ret
    }

    fn rwlock_destroy(
        &self,
        ins: InsId,
        error: &mut i32,
        rw: *mut libc::pthread_rwlock_t,
    ) -> c_int {
        if self.passthrough() || self.non_det_passthrough(rw as Channel) {
            return unsafe { libc::pthread_rwlock_destroy(rw) };
        }
        let g = self.turn(ins);
        let ret = with_app_errno(error, || unsafe { libc::pthread_rwlock_destroy(rw) });
        g.finish(SyncOp::RwlockDestroy, [rw as u64, ret as u64]);
        ret
    }

    fn rwlock_rdlock(&self, ins: InsId, error: &mut i32, rw: *mut libc::pthread_rwlock_t) -> c_int {
        if self.passthrough() || self.non_det_passthrough(rw as Channel) {
            return unsafe { libc::pthread_rwlock_rdlock(rw) };
        }
        let g = self.turn(ins);
        with_app_errno(error, || self.rwlock_lock_helper(rw, None));
        g.finish(SyncOp::RwlockRdLock, [rw as u64, 0]);
        0
    }

    fn rwlock_wrlock(&self, ins: InsId, error: &mut i32, rw: *mut libc::pthread_rwlock_t) -> c_int {
        if self.passthrough() || self.non_det_passthrough(rw as Channel) {
            return unsafe { libc::pthread_rwlock_wrlock(rw) };
        }
        let g = self.turn(ins);
        with_app_errno(error, || self.rwlock_lock_helper(rw, None));
        g.finish(SyncOp::RwlockWrLock, [rw as u64, 0]);
        0
    }

    fn rwlock_tryrdlock(
        &self,
        ins: InsId,
        error: &mut i32,
        rw: *mut libc::pthread_rwlock_t,
    ) -> c_int {
        if self.passthrough() || self.non_det_passthrough(rw as Channel) {
            return unsafe { libc::pthread_rwlock_tryrdlock(rw) };
        }
        let g = self.turn(ins);
        // Readers take the write trylock as well, keeping them serialized.
        let ret = with_app_errno(error, || unsafe { libc::pthread_rwlock_trywrlock(rw) });
        g.finish(SyncOp::RwlockTryRdLock, [rw as u64, ret as u64]);
        ret
    }

    fn rwlock_trywrlock(
        &self,
        ins: InsId,
        error: &mut i32,
        rw: *mut libc::pthread_rwlock_t,
    ) -> c_int {
        if self.passthrough() || self.non_det_passthrough(rw as Channel) {
            return unsafe { libc::pthread_rwlock_trywrlock(rw) };
        }
        let g = self.turn(ins);
        let ret = with_app_errno(error, || unsafe { libc::pthread_rwlock_trywrlock(rw) });
        g.finish(SyncOp::RwlockTryWrLock, [rw as u64, ret as u64]);
        ret
    }

    fn rwlock_unlock(&self, ins: InsId, error: &mut i32, rw: *mut libc::pthread_rwlock_t) -> c_int {
        if self.passthrough() || self.non_det_passthrough(rw as Channel) {
            return unsafe { libc::pthread_rwlock_unlock(rw) };
        }
        let g = self.turn(ins);
        let ret = with_app_errno(error, || unsafe { libc::pthread_rwlock_unlock(rw) });
        self.sched.signal(rw as Channel, false);
        g.finish(SyncOp::RwlockUnlock, [rw as u64, ret as u64]);
        ret
    }

    fn cond_wait(
        &self,
        ins: InsId,
        error: &mut i32,
        cv: *mut libc::pthread_cond_t,
        mu: *mut libc::pthread_mutex_t,
    ) -> c_int {
        if self.passthrough() || self.non_det_passthrough(cv as Channel) {
            return unsafe { libc::pthread_cond_wait(cv, mu) };
        }
        match self.sched.native_lock() {
            None => {
                // The native cv is never slept on: release the mutex, wake a
                // pending locker, park on the cv's channel, then reacquire
                // through the lock helper once signalled.
                let g = self.turn(ins);
                unsafe { libc::pthread_mutex_unlock(mu) };
                self.sched.signal(mu as Channel, false);
                g.log_half(SyncOp::CondWait, [cv as u64, mu as u64]);
                self.sched.wait(cv as Channel, None);
                with_app_errno(error, || self.mutex_lock_helper(mu, None));
                g.finish(SyncOp::CondWait, [cv as u64, mu as u64]);
            }
            Some(lk) => {
                // FCFS policy: sleep natively against the serializer token,
                // which doubles as the scheduler lock.
                let g = self.turn(ins);
                unsafe { libc::pthread_mutex_unlock(mu) };
                g.log_half(SyncOp::CondWait, [cv as u64, mu as u64]);
                with_app_errno(error, || unsafe { libc::pthread_cond_wait(cv, lk) });
                with_app_errno(error, || self.mutex_lock_helper(mu, None));
                g.finish(SyncOp::CondWait, [cv as u64, mu as u64]);
            }
        }
        0
    }

    fn cond_timedwait(
        &self,
        ins: InsId,
        error: &mut i32,
        cv: *mut libc::pthread_cond_t,
        mu: *mut libc::pthread_mutex_t,
        abstime: *const libc::timespec,
    ) -> c_int {
        if abstime.is_null() {
            return self.cond_wait(ins, error, cv, mu);
        }
        if self.passthrough() || self.non_det_passthrough(cv as Channel) {
            return unsafe { libc::pthread_cond_timedwait(cv, mu, abstime) };
        }
        match self.sched.native_lock() {
            None => {
                let rel = self.relative_deadline(Timespec::from(unsafe { *abstime }));
                let g = self.turn(ins);
                unsafe { libc::pthread_mutex_unlock(mu) };
                self.sched.signal(mu as Channel, false);
                g.log_half(SyncOp::CondTimedWait, [cv as u64, mu as u64]);
                let deadline = self.deadline_turns(rel);
                let timed_out = self.sched.wait(cv as Channel, Some(deadline)).timed_out();
                let ret = if timed_out { libc::ETIMEDOUT } else { 0 };
                with_app_errno(error, || self.mutex_lock_helper(mu, None));
                g.finish_with(SyncOp::CondTimedWait, timed_out, [cv as u64, ret as u64]);
                ret
            }
            Some(lk) => {
                let g = self.turn(ins);
                unsafe { libc::pthread_mutex_unlock(mu) };
                g.log_half(SyncOp::CondTimedWait, [cv as u64, mu as u64]);
                let ret =
                    with_app_errno(error, || unsafe { libc::pthread_cond_timedwait(cv, lk, abstime) });
                assert!(
                    ret == 0 || ret == libc::ETIMEDOUT,
                    "failed sync calls are not supported"
                );
                with_app_errno(error, || self.mutex_lock_helper(mu, None));
                g.finish_with(
                    SyncOp::CondTimedWait,
                    ret == libc::ETIMEDOUT,
                    [cv as u64, ret as u64],
                );
                ret
            }
        }
    }

    fn cond_signal(&self, ins: InsId, error: &mut i32, cv: *mut libc::pthread_cond_t) -> c_int {
        if self.passthrough() || self.non_det_passthrough(cv as Channel) {
            return unsafe { libc::pthread_cond_signal(cv) };
        }
        let g = self.turn(ins);
        match self.sched.native_lock() {
            None => self.sched.signal(cv as Channel, false),
            Some(_) => {
                with_app_errno(error, || unsafe { libc::pthread_cond_signal(cv) });
            }
        }
        g.finish(SyncOp::CondSignal, [cv as u64, 0]);
        0
    }

    fn cond_broadcast(&self, ins: InsId, error: &mut i32, cv: *mut libc::pthread_cond_t) -> c_int {
        if self.passthrough() || self.non_det_passthrough(cv as Channel) {
            return unsafe { libc::pthread_cond_broadcast(cv) };
        }
        let g = self.turn(ins);
        match self.sched.native_lock() {
            None => self.sched.signal(cv as Channel, true),
            Some(_) => {
                with_app_errno(error, || unsafe { libc::pthread_cond_broadcast(cv) });
            }
        }
        g.finish(SyncOp::CondBroadcast, [cv as u64, 0]);
        0
    }

    fn barrier_init(
        &self,
        ins: InsId,
        error: &mut i32,
        bar: *mut libc::pthread_barrier_t,
        attr: *const libc::pthread_barrierattr_t,
        count: c_uint,
    ) -> c_int {
        if self.passthrough() || self.non_det_passthrough(bar as Channel) {
            return unsafe { libc::pthread_barrier_init(bar, attr, count) };
        }
        let g = self.turn(ins);
        let ret = with_app_errno(error, || unsafe { libc::pthread_barrier_init(bar, attr, count) });
        assert_eq!(ret, 0, "failed sync calls are not supported");
        {
            let mut bs = self.barriers.lock().unwrap();
            let prev = bs.insert(
                bar as Channel,
                BarrierState {
                    count,
                    narrived: 0,
                },
            );
            assert!(prev.is_none(), "barrier already initialized");
        }
        g.finish(SyncOp::BarrierInit, [bar as u64, count as u64]);
        ret
    }

    fn barrier_wait(
        &self,
        ins: InsId,
        error: &mut i32,
        bar: *mut libc::pthread_barrier_t,
    ) -> c_int {
        if self.passthrough() || self.non_det_passthrough(bar as Channel) {
            return unsafe { libc::pthread_barrier_wait(bar) };
        }
        let chan = bar as Channel;
        match self.sched.native_lock() {
            None => {
                // Reimplemented: arrivals are counted here so the last
                // arriver can release everyone while holding the turn.  It
                // then briefly releases and reacquires the turn so its
                // release and its return occupy distinct turns, keeping
                // concurrent barriers ordered.
                let g = self.turn(ins);
                g.log_half(SyncOp::BarrierWait, [bar as u64, 0]);
                let is_last = {
                    let mut bs = self.barriers.lock().unwrap();
                    let b = bs.get_mut(&chan).expect("barrier is not initialized");
                    b.narrived += 1;
                    assert!(b.narrived <= b.count, "barrier overflow");
                    if b.narrived == b.count {
                        // The barrier may be reused immediately.
                        b.narrived = 0;
                        true
                    } else {
                        false
                    }
                };
                let ret;
                if is_last {
                    self.sched.signal(chan, true);
                    ret = libc::PTHREAD_BARRIER_SERIAL_THREAD;
                    self.sched.put_turn(false);
                    self.sched.get_turn();
                } else {
                    ret = 0;
                    self.sched.wait(chan, None);
                }
                g.finish(SyncOp::BarrierWait, [bar as u64, ret as u64]);
                ret
            }
            Some(_) => {
                // FCFS policy: the native barrier provides the rendezvous;
                // the token is released around it so arrivals can pile up.
                let g = self.turn(ins);
                g.log_half(SyncOp::BarrierWait, [bar as u64, 0]);
                self.sched.put_turn(false);
                let ret = with_app_errno(error, || unsafe { libc::pthread_barrier_wait(bar) });
                assert!(
                    ret == 0 || ret == libc::PTHREAD_BARRIER_SERIAL_THREAD,
                    "failed sync calls are not supported"
                );
                self.sched.get_turn();
                g.finish(SyncOp::BarrierWait, [bar as u64, ret as u64]);
                ret
            }
        }
    }

    fn barrier_destroy(
        &self,
        ins: InsId,
        error: &mut i32,
        bar: *mut libc::pthread_barrier_t,
    ) -> c_int {
        if self.passthrough() || self.non_det_passthrough(bar as Channel) {
            return unsafe { libc::pthread_barrier_destroy(bar) };
        }
        let g = self.turn(ins);
        let ret = with_app_errno(error, || unsafe { libc::pthread_barrier_destroy(bar) });
        // EBUSY means the barrier is still in use and stays registered.
        assert!(
            ret == 0 || ret == libc::EBUSY,
            "failed sync calls are not supported"
        );
        if ret == 0 {
            let mut bs = self.barriers.lock().unwrap();
            let prev = bs.remove(&(bar as Channel));
            assert!(prev.is_some(), "barrier is not initialized");
        }
        g.finish(SyncOp::BarrierDestroy, [bar as u64, ret as u64]);
        ret
    }

    fn sem_init(
        &self,
        ins: InsId,
        error: &mut i32,
        sem: *mut libc::sem_t,
        pshared: c_int,
        value: c_uint,
    ) -> c_int {
        if self.passthrough() || self.non_det_passthrough(sem as Channel) {
            return unsafe { libc::sem_init(sem, pshared, value) };
        }
        let g = self.turn(ins);
        let ret = with_app_errno(error, || unsafe { libc::sem_init(sem, pshared, value) });
        assert_eq!(ret, 0, "failed sync calls are not supported");
        g.finish(SyncOp::SemInit, [sem as u64, ret as u64]);
        ret
    }

    fn sem_wait(&self, ins: InsId, error: &mut i32, sem: *mut libc::sem_t) -> c_int {
        if self.passthrough() || self.non_det_passthrough(sem as Channel) {
            return unsafe { libc::sem_wait(sem) };
        }
        let g = self.turn(ins);
        loop {
            let ret = unsafe { libc::sem_trywait(sem) };
            if ret == 0 {
                break;
            }
            // sem_trywait reports an unavailable semaphore via errno.
            assert_eq!(
                util::errno(),
                libc::EAGAIN,
                "failed sync calls are not supported"
            );
            self.sched.wait(sem as Channel, None);
        }
        g.finish(SyncOp::SemWait, [sem as u64, 0]);
        0
    }

    fn sem_trywait(&self, ins: InsId, error: &mut i32, sem: *mut libc::sem_t) -> c_int {
        if self.passthrough() || self.non_det_passthrough(sem as Channel) {
            return unsafe { libc::sem_trywait(sem) };
        }
        let g = self.turn(ins);
        let ret = with_app_errno(error, || unsafe { libc::sem_trywait(sem) });
        if ret != 0 {
            assert_eq!(*error, libc::EAGAIN, "failed sync calls are not supported");
        }
        g.finish(SyncOp::SemTryWait, [sem as u64, ret as u64]);
        ret
    }

    fn sem_timedwait(
        &self,
        ins: InsId,
        error: &mut i32,
        sem: *mut libc::sem_t,
        abstime: *const libc::timespec,
    ) -> c_int {
        if abstime.is_null() {
            return self.sem_wait(ins, error, sem);
        }
        if self.passthrough() || self.non_det_passthrough(sem as Channel) {
            return unsafe { libc::sem_timedwait(sem, abstime) };
        }
        let rel = self.relative_deadline(Timespec::from(unsafe { *abstime }));
        let g = self.turn(ins);
        let deadline = self.deadline_turns(rel);
        let mut ret;
        let mut timed_out = false;
        loop {
            ret = unsafe { libc::sem_trywait(sem) };
            if ret == 0 {
                break;
            }
            assert_eq!(
                util::errno(),
                libc::EAGAIN,
                "failed sync calls are not supported"
            );
            if self.sched.wait(sem as Channel, Some(deadline)).timed_out() {
                ret = -1;
                timed_out = true;
                *error = libc::ETIMEDOUT;
                break;
            }
        }
        g.finish_with(SyncOp::SemTimedWait, timed_out, [sem as u64, ret as u64]);
        if timed_out {
            util::set_errno(libc::ETIMEDOUT);
        }
        ret
    }

    fn sem_post(&self, ins: InsId, error: &mut i32, sem: *mut libc::sem_t) -> c_int {
        if self.passthrough() || self.non_det_passthrough(sem as Channel) {
            return unsafe { libc::sem_post(sem) };
        }
        let g = self.turn(ins);
        let ret = with_app_errno(error, || unsafe { libc::sem_post(sem) });
        assert_eq!(ret, 0, "failed sync calls are not supported");
        self.sched.signal(sem as Channel, false);
        g.finish(SyncOp::SemPost, [sem as u64, ret as u64]);
        0
    }

    fn lineup_init(&self, opaque_type: u64, count: c_uint, timeout_turns: u64) {
        if self.passthrough() || self.non_det_passthrough(opaque_type as Channel) {
            return;
        }
        let g = self.turn(opaque_type as InsId);
        {
            let mut ls = self.lineups.lock().unwrap();
            if ls.contains_key(&opaque_type) {
                panic!("lineup {:#x} already initialized", opaque_type);
            }
            ls.insert(
                opaque_type,
                LineupState {
                    count,
                    nactive: 0,
                    timeout_turns,
                    phase: LineupPhase::Arriving,
                },
            );
        }
        g.finish(SyncOp::LineupInit, [opaque_type, count as u64]);
    }

    fn lineup_destroy(&self, opaque_type: u64) {
        if self.passthrough() || self.non_det_passthrough(opaque_type as Channel) {
            return;
        }
        let g = self.turn(opaque_type as InsId);
        {
            let mut ls = self.lineups.lock().unwrap();
            let prev = ls.remove(&opaque_type);
            assert!(prev.is_some(), "lineup is not initialized");
        }
        g.finish(SyncOp::LineupDestroy, [opaque_type, 0]);
    }

    fn lineup_start(&self, opaque_type: u64) {
        if self.passthrough() || self.non_det_passthrough(opaque_type as Channel) {
            return;
        }
        let chan = lineup_channel(opaque_type);
        let g = self.turn(opaque_type as InsId);
        let full = {
            let mut ls = self.lineups.lock().unwrap();
            let b = ls.get_mut(&opaque_type).expect("lineup is not initialized");
            b.nactive += 1;
            if b.phase == LineupPhase::Arriving {
                if b.nactive == b.count {
                    // Full assembly: nactive is ref-counted, not reset.
                    b.phase = LineupPhase::Leaving;
                    Some(true)
                } else {
                    Some(false)
                }
            } else {
                None
            }
        };
        match full {
            Some(true) => {
                self.bump(|s| s.lineup_full += 1);
                self.sched.signal(chan, true);
            }
            Some(false) => {
                let deadline = {
                    let ls = self.lineups.lock().unwrap();
                    self.sched.turn_count() + ls[&opaque_type].timeout_turns
                };
                self.sched.wait(chan, Some(deadline));
                let fire = {
                    let mut ls = self.lineups.lock().unwrap();
                    let b = ls.get_mut(&opaque_type).expect("lineup is not initialized");
                    if b.nactive < b.count && b.phase == LineupPhase::Arriving {
                        b.phase = LineupPhase::Leaving;
                        true
                    } else {
                        false
                    }
                };
                if fire {
                    // This thread's deadline fired before assembly; it flips
                    // the phase and releases the rest itself.
                    self.bump(|s| s.lineup_timeout += 1);
                    self.sched.signal(chan, true);
                }
            }
            None => {}
        }
        g.finish(SyncOp::LineupStart, [opaque_type, 0]);
    }

    fn lineup_end(&self, opaque_type: u64) {
        if self.passthrough() || self.non_det_passthrough(opaque_type as Channel) {
            return;
        }
        let g = self.turn(opaque_type as InsId);
        {
            let mut ls = self.lineups.lock().unwrap();
            let b = ls.get_mut(&opaque_type).expect("lineup is not initialized");
            assert!(b.nactive > 0, "lineup end without a matching start");
            b.nactive -= 1;
            if b.nactive == 0 && b.phase == LineupPhase::Leaving {
                b.phase = LineupPhase::Arriving;
            }
        }
        g.finish(SyncOp::LineupEnd, [opaque_type, 0]);
    }

    fn non_det_start(&self) {
        if self.passthrough() {
            return;
        }
        assert!(
            self.cfg.enforce_non_det_annotations,
            "non-det region entered while enforce_non_det_annotations is off"
        );
        let g = self.turn(INVALID_INSID);
        self.bump(|s| s.non_det_regions += 1);
        nondet::enter_pending();
        // Parked until the run queue drains, maximizing the window in which
        // non-det regions may overlap.
        self.sched.wait(NON_DET_CHANNEL, None);
        nondet::enter_done();
        g.finish(SyncOp::NonDetStart, [0, 0]);
        // Leave the deterministic domain entirely until the matching end.
        self.sched.get_turn();
        self.sched.block();
        assert!(!nondet::in_non_det());
        nondet::set_in_non_det(true);
    }

    fn non_det_end(&self) {
        if self.passthrough() {
            return;
        }
        assert!(self.cfg.enforce_non_det_annotations);
        assert!(nondet::in_non_det(), "non-det end without a start");
        nondet::set_in_non_det(false);
        // Rejoin at the next turn boundary; the thread keeps running its
        // region-free code meanwhile.
        self.sched.wakeup();
    }

    fn non_det_barrier_end(&self, bar_id: c_int, count: c_int) {
        if self.passthrough() {
            return;
        }
        assert!(self.cfg.enforce_non_det_annotations);
        assert!(nondet::in_non_det(), "non-det end without a start");
        tracing::debug!("non-det barrier {} (count {}) ending", bar_id, count);
        nondet::set_in_non_det(false);
        self.sched.wakeup();
    }

    fn set_base_time(&self, ts: Timespec) {
        BASE_TIME.with(|c| c.set(Some(ts)));
    }

    fn symbolic(
        &self,
        ins: InsId,
        _error: &mut i32,
        addr: *mut c_void,
        nbytes: c_int,
        _name: *const c_char,
    ) {
        if self.passthrough() {
            return;
        }
        let g = self.turn(ins);
        g.finish(SyncOp::Symbolic, [addr as u64, nbytes as u64]);
    }

    fn sched_yield(&self, ins: InsId, error: &mut i32) -> c_int {
        if self.passthrough() || (self.cfg.enforce_non_det_annotations && nondet::in_non_det()) {
            return unsafe { libc::sched_yield() };
        }
        let g = self.turn(ins);
        let ret = with_app_errno(error, || unsafe { libc::sched_yield() });
        g.finish(SyncOp::SchedYield, [ret as u64, 0]);
        ret
    }

    fn sleep(&self, ins: InsId, error: &mut i32, seconds: c_uint) -> c_uint {
        if self.passthrough() {
            return unsafe { libc::sleep(seconds) };
        }
        let _ = error;
        let rel = Timespec {
            sec: seconds as i64,
            nsec: 0,
        };
        let g = self.turn(ins);
        let deadline = self.deadline_turns(rel);
        self.sched.wait(NO_CHANNEL, Some(deadline));
        g.finish(SyncOp::Sleep, [seconds as u64 * 1_000_000_000, 0]);
        if self.cfg.exec_sleep {
            unsafe { libc::sleep(seconds) };
        }
        0
    }

    fn usleep(&self, ins: InsId, error: &mut i32, usec: c_uint) -> c_int {
        if self.passthrough() {
            return unsafe { libc::usleep(usec) };
        }
        let _ = error;
        let rel = Timespec {
            sec: 0,
            nsec: usec as i64 * 1000,
        };
        let g = self.turn(ins);
        let deadline = self.deadline_turns(rel);
        self.sched.wait(NO_CHANNEL, Some(deadline));
        g.finish(SyncOp::Usleep, [usec as u64 * 1000, 0]);
        if self.cfg.exec_sleep {
            unsafe { libc::usleep(usec) };
        }
        0
    }

    fn nanosleep(
        &self,
        ins: InsId,
        error: &mut i32,
        req: *const libc::timespec,
        rem: *mut libc::timespec,
    ) -> c_int {
        if self.passthrough() {
            return unsafe { libc::nanosleep(req, rem) };
        }
        let _ = error;
        let g = self.turn(ins);
        let (deadline, nanos) = if req.is_null() {
            (self.sched.turn_count(), 0)
        } else {
            let rel = Timespec::from(unsafe { *req });
            (self.deadline_turns(rel), rel.as_nanos())
        };
        self.sched.wait(NO_CHANNEL, Some(deadline));
        g.finish(SyncOp::Nanosleep, [nanos, 0]);
        if self.cfg.exec_sleep {
            unsafe { libc::nanosleep(req, rem) };
        }
        0
    }

    fn fork(&self, ins: InsId, error: &mut i32) -> libc::pid_t {
        if self.passthrough() {
            return unsafe { libc::fork() };
        }
        // Flush so the child does not re-write records buffered in the
        // parent.
        self.logger.flush_current();
        let g = self.turn(ins);
        let ret = with_app_errno(error, || unsafe { libc::fork() });
        if ret == 0 {
            // Child: the forking thread is the only survivor.  Pending
            // creation handshakes from the parent are discarded and all
            // scheduler state restarts from a fresh clock.
            self.begin_sem.reset();
            self.begin_done_sem.reset();
            self.sched.fork_reset();
            *self.idle_handle.lock().unwrap() = None;
            self.logger.fork_child(self.sched.current());
        } else {
            assert!(ret > 0, "failed sync calls are not supported");
        }
        g.finish(SyncOp::Fork, [ret as u64, 0]);
        if ret == 0 && self.cfg.launch_idle_thread {
            self.spawn_idle();
        }
        ret
    }

    fn read(
        &self,
        ins: InsId,
        error: &mut i32,
        fd: c_int,
        buf: *mut c_void,
        count: libc::size_t,
    ) -> libc::ssize_t {
        if self.passthrough() {
            return unsafe { libc::read(fd, buf, count) };
        }
        if self.cfg.ignore_regular_file_io && blocking::is_regular_file(fd) {
            return unsafe { libc::read(fd, buf, count) };
        }
        self.blocking_region(
            ins,
            SyncOp::Read,
            || with_app_errno(error, || unsafe { libc::read(fd, buf, count) }),
            |ret| [fd as u64, *ret as u64],
        )
    }

    fn write(
        &self,
        ins: InsId,
        error: &mut i32,
        fd: c_int,
        buf: *const c_void,
        count: libc::size_t,
    ) -> libc::ssize_t {
        if self.passthrough() {
            return unsafe { libc::write(fd, buf, count) };
        }
        if self.cfg.ignore_regular_file_io && blocking::is_regular_file(fd) {
            return unsafe { libc::write(fd, buf, count) };
        }
        self.blocking_region(
            ins,
            SyncOp::Write,
            || with_app_errno(error, || unsafe { libc::write(fd, buf, count) }),
            |ret| [fd as u64, *ret as u64],
        )
    }

    fn pread(
        &self,
        ins: InsId,
        error: &mut i32,
        fd: c_int,
        buf: *mut c_void,
        count: libc::size_t,
        offset: libc::off_t,
    ) -> libc::ssize_t {
        if self.passthrough() {
            return unsafe { libc::pread(fd, buf, count, offset) };
        }
        if self.cfg.ignore_regular_file_io && blocking::is_regular_file(fd) {
            return unsafe { libc::pread(fd, buf, count, offset) };
        }
        self.blocking_region(
            ins,
            SyncOp::Pread,
            || with_app_errno(error, || unsafe { libc::pread(fd, buf, count, offset) }),
            |ret| [fd as u64, *ret as u64],
        )
    }

    fn pwrite(
        &self,
        ins: InsId,
        error: &mut i32,
        fd: c_int,
        buf: *const c_void,
        count: libc::size_t,
        offset: libc::off_t,
    ) -> libc::ssize_t {
        if self.passthrough() {
            return unsafe { libc::pwrite(fd, buf, count, offset) };
        }
        if self.cfg.ignore_regular_file_io && blocking::is_regular_file(fd) {
            return unsafe { libc::pwrite(fd, buf, count, offset) };
        }
        self.blocking_region(
            ins,
            SyncOp::Pwrite,
            || with_app_errno(error, || unsafe { libc::pwrite(fd, buf, count, offset) }),
            |ret| [fd as u64, *ret as u64],
        )
    }

    fn accept(
        &self,
        ins: InsId,
        error: &mut i32,
        fd: c_int,
        addr: *mut libc::sockaddr,
        addrlen: *mut libc::socklen_t,
    ) -> c_int {
        if self.passthrough() {
            return unsafe { libc::accept(fd, addr, addrlen) };
        }
        self.blocking_region(
            ins,
            SyncOp::Accept,
            || with_app_errno(error, || unsafe { libc::accept(fd, addr, addrlen) }),
            |ret| [*ret as u64, 0],
        )
    }

    fn connect(
        &self,
        ins: InsId,
        error: &mut i32,
        fd: c_int,
        addr: *const libc::sockaddr,
        addrlen: libc::socklen_t,
    ) -> c_int {
        if self.passthrough() {
            return unsafe { libc::connect(fd, addr, addrlen) };
        }
        self.blocking_region(
            ins,
            SyncOp::Connect,
            || with_app_errno(error, || unsafe { libc::connect(fd, addr, addrlen) }),
            |ret| [fd as u64, *ret as u64],
        )
    }

    fn recv(
        &self,
        ins: InsId,
        error: &mut i32,
        fd: c_int,
        buf: *mut c_void,
        len: libc::size_t,
        flags: c_int,
    ) -> libc::ssize_t {
        if self.passthrough() {
            return unsafe { libc::recv(fd, buf, len, flags) };
        }
        self.blocking_region(
            ins,
            SyncOp::Recv,
            || with_app_errno(error, || unsafe { libc::recv(fd, buf, len, flags) }),
            |ret| [fd as u64, *ret as u64],
        )
    }

    fn send(
        &self,
        ins: InsId,
        error: &mut i32,
        fd: c_int,
        buf: *const c_void,
        len: libc::size_t,
        flags: c_int,
    ) -> libc::ssize_t {
        if self.passthrough() {
            return unsafe { libc::send(fd, buf, len, flags) };
        }
        // Even when the socket is non-blocking this goes through the
        // blocking domain, so an external explorer may order it.
        self.blocking_region(
            ins,
            SyncOp::Send,
            || with_app_errno(error, || unsafe { libc::send(fd, buf, len, flags) }),
            |ret| [fd as u64, *ret as u64],
        )
    }

    fn select(
        &self,
        ins: InsId,
        error: &mut i32,
        nfds: c_int,
        readfds: *mut libc::fd_set,
        writefds: *mut libc::fd_set,
        exceptfds: *mut libc::fd_set,
        timeout: *mut libc::timeval,
    ) -> c_int {
        if self.passthrough() {
            return unsafe { libc::select(nfds, readfds, writefds, exceptfds, timeout) };
        }
        self.blocking_region(
            ins,
            SyncOp::Select,
            || {
                with_app_errno(error, || unsafe {
                    libc::select(nfds, readfds, writefds, exceptfds, timeout)
                })
            },
            |ret| [*ret as u64, 0],
        )
    }

    fn poll(
        &self,
        ins: InsId,
        error: &mut i32,
        fds: *mut libc::pollfd,
        nfds: libc::nfds_t,
        timeout: c_int,
    ) -> c_int {
        if self.passthrough() {
            return unsafe { libc::poll(fds, nfds, timeout) };
        }
        self.blocking_region(
            ins,
            SyncOp::Poll,
            || with_app_errno(error, || unsafe { libc::poll(fds, nfds, timeout) }),
            |ret| [nfds as u64, *ret as u64],
        )
    }

    fn epoll_wait(
        &self,
        ins: InsId,
        error: &mut i32,
        epfd: c_int,
        events: *mut libc::epoll_event,
        maxevents: c_int,
        timeout: c_int,
    ) -> c_int {
        if self.passthrough() {
            return unsafe { libc::epoll_wait(epfd, events, maxevents, timeout) };
        }
        self.blocking_region(
            ins,
            SyncOp::EpollWait,
            || {
                with_app_errno(error, || unsafe {
                    libc::epoll_wait(epfd, events, maxevents, timeout)
                })
            },
            |ret| [epfd as u64, *ret as u64],
        )
    }

    fn sigwait(
        &self,
        ins: InsId,
        error: &mut i32,
        set: *const libc::sigset_t,
        sig: *mut c_int,
    ) -> c_int {
        if self.passthrough() {
            return unsafe { libc::sigwait(set, sig) };
        }
        self.blocking_region(
            ins,
            SyncOp::Sigwait,
            || with_app_errno(error, || unsafe { libc::sigwait(set, sig) }),
            |ret| [*ret as u64, 0],
        )
    }

    fn waitpid(
        &self,
        ins: InsId,
        error: &mut i32,
        pid: libc::pid_t,
        status: *mut c_int,
        options: c_int,
    ) -> libc::pid_t {
        if self.passthrough() {
            return unsafe { libc::waitpid(pid, status, options) };
        }
        self.blocking_region(
            ins,
            SyncOp::Waitpid,
            || with_app_errno(error, || unsafe { libc::waitpid(pid, status, options) }),
            |ret| [pid as u64, *ret as u64],
        )
    }

    fn wait_child(&self, ins: InsId, error: &mut i32, status: *mut c_int) -> libc::pid_t {
        if self.passthrough() {
            return unsafe { libc::wait(status) };
        }
        self.blocking_region(
            ins,
            SyncOp::Wait,
            || with_app_errno(error, || unsafe { libc::wait(status) }),
            |ret| [*ret as u64, 0],
        )
    }

    fn gethostbyname(
        &self,
        ins: InsId,
        error: &mut i32,
        name: *const c_char,
    ) -> *mut libc::hostent {
        if self.passthrough() {
            return unsafe { gethostbyname(name) };
        }
        self.blocking_region(
            ins,
            SyncOp::Gethostbyname,
            || with_app_errno(error, || unsafe { gethostbyname(name) }),
            |ret| [*ret as u64, 0],
        )
    }

    fn fgets(
        &self,
        ins: InsId,
        error: &mut i32,
        s: *mut c_char,
        size: c_int,
        stream: *mut libc::FILE,
    ) -> *mut c_char {
        if self.passthrough() {
            return unsafe { libc::fgets(s, size, stream) };
        }
        let fd = unsafe { libc::fileno(stream) };
        if self.cfg.ignore_regular_file_io && blocking::is_regular_file(fd) {
            return unsafe { libc::fgets(s, size, stream) };
        }
        self.blocking_region(
            ins,
            SyncOp::Fgets,
            || with_app_errno(error, || unsafe { libc::fgets(s, size, stream) }),
            |ret| [fd as u64, *ret as u64],
        )
    }

    fn idle_tick(&self) {
        self.sched.get_turn();
        let turn = self.sched.inc_turn();
        self.log(INVALID_INSID, SyncOp::Idle, turn, SyncFlags::AFTER, [0, 0]);
        // Park while real threads are runnable; the scheduler unparks the
        // idle thread whenever the run queue drains.
        if self.sched.runnable_count() >= 2 && !self.idle_done.load(Ordering::SeqCst) {
            self.sched.wait(IDLE_CHANNEL, None);
        }
        self.sched.put_turn(false);
    }

    fn idle_done(&self) -> bool {
        self.idle_done.load(Ordering::SeqCst)
    }
}
