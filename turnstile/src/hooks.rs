/*
 * Copyright (c) Turnstile project developers.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The C-linkage annotation surface.
//!
//! The instrumentation layer injects calls to these symbols into target
//! programs.  Every hook is a no-op when no runtime is installed, so an
//! instrumented binary remains runnable standalone; when a runtime is
//! present, hooks additionally honor the `enforce_annotations` and
//! `enforce_non_det_annotations` switches.

use libc::c_char;
use libc::c_int;
use libc::c_long;
use libc::c_uint;
use libc::c_void;

use turnstile_model::record::INVALID_INSID;
use turnstile_model::time::Timespec;

use crate::runtime::RecordRuntime;

fn with_runtime(f: impl FnOnce(&dyn RecordRuntime)) {
    if let Some(rt) = crate::runtime() {
        f(rt.as_ref());
    }
}

fn with_annotations(f: impl FnOnce(&dyn RecordRuntime)) {
    with_runtime(|rt| {
        if rt.config().dmt && rt.config().enforce_annotations {
            f(rt);
        }
    });
}

fn with_non_det_annotations(f: impl FnOnce(&dyn RecordRuntime)) {
    with_runtime(|rt| {
        let cfg = rt.config();
        if cfg.dmt && cfg.enforce_annotations && cfg.enforce_non_det_annotations {
            f(rt);
        }
    });
}

/// Install the runtime from the environment if none is present yet; the
/// calling thread is attached as the main thread.  A second call is a
/// no-op, since installation already attached the process.
#[no_mangle]
pub extern "C" fn turnstile_prog_begin() {
    if crate::runtime().is_none() {
        crate::install(crate::Config::from_env());
    }
}

/// Tear the runtime down at program end.
#[no_mangle]
pub extern "C" fn turnstile_prog_end() {
    with_runtime(|rt| rt.prog_end());
}

/// First call a created thread makes, before any user code.
#[no_mangle]
pub extern "C" fn turnstile_thread_begin() {
    with_runtime(|rt| rt.thread_begin());
}

/// Last call a thread makes on its way out.
#[no_mangle]
pub extern "C" fn turnstile_thread_end(ins: c_uint) {
    with_runtime(|rt| rt.thread_end(ins));
}

/// Detach annotation; kept for the instrumentation contract.
#[no_mangle]
pub extern "C" fn turnstile_thread_detach() {
    with_runtime(|rt| rt.thread_detach());
}

/// Declare a lineup (ref-counted soft barrier) over an opaque type.
#[no_mangle]
pub extern "C" fn turnstile_lineup_init(opaque_type: c_long, count: c_uint, timeout_turns: c_uint) {
    with_annotations(|rt| rt.lineup_init(opaque_type as u64, count, timeout_turns as u64));
}

/// Retire a lineup.
#[no_mangle]
pub extern "C" fn turnstile_lineup_destroy(opaque_type: c_long) {
    with_annotations(|rt| rt.lineup_destroy(opaque_type as u64));
}

/// Arrive at a lineup: waits for full assembly or the logical-time timeout.
#[no_mangle]
pub extern "C" fn turnstile_lineup_start(opaque_type: c_long) {
    with_annotations(|rt| rt.lineup_start(opaque_type as u64));
}

/// Leave a lineup.
#[no_mangle]
pub extern "C" fn turnstile_lineup_end(opaque_type: c_long) {
    with_annotations(|rt| rt.lineup_end(opaque_type as u64));
}

/// Arrive at and immediately leave a lineup.
#[no_mangle]
pub extern "C" fn turnstile_lineup(opaque_type: c_long) {
    with_annotations(|rt| {
        rt.lineup_start(opaque_type as u64);
        rt.lineup_end(opaque_type as u64);
    });
}

/// Enter an explicitly nondeterministic region.
#[no_mangle]
pub extern "C" fn turnstile_non_det_start() {
    with_non_det_annotations(|rt| rt.non_det_start());
}

/// Leave an explicitly nondeterministic region.
#[no_mangle]
pub extern "C" fn turnstile_non_det_end() {
    with_non_det_annotations(|rt| rt.non_det_end());
}

/// Leave a nondeterministic region at an external explorer's barrier.
#[no_mangle]
pub extern "C" fn turnstile_non_det_barrier_end(bar_id: c_int, count: c_int) {
    with_non_det_annotations(|rt| rt.non_det_barrier_end(bar_id, count));
}

/// Announce the base time for this thread's timed waits.
///
/// # Safety
///
/// `ts` must be null or point to a valid `timespec`.
#[no_mangle]
pub unsafe extern "C" fn turnstile_set_base_timespec(ts: *const libc::timespec) {
    if ts.is_null() {
        return;
    }
    let ts = Timespec::from(*ts);
    with_annotations(|rt| rt.set_base_time(ts));
}

/// Announce the base time for this thread's timed waits, timeval flavor.
///
/// # Safety
///
/// `tv` must be null or point to a valid `timeval`.
#[no_mangle]
pub unsafe extern "C" fn turnstile_set_base_timeval(tv: *const libc::timeval) {
    if tv.is_null() {
        return;
    }
    let ts = Timespec::from(*tv);
    with_annotations(|rt| rt.set_base_time(ts));
}

/// Mark a value symbolic: a passthrough turn event for log correlation.
///
/// # Safety
///
/// `name` must be null or a valid C string; `addr` is recorded, not read.
#[no_mangle]
pub unsafe extern "C" fn turnstile_symbolic(addr: *mut c_void, nbytes: c_int, name: *const c_char) {
    with_runtime(|rt| {
        if rt.config().dmt {
            let mut error = 0;
            rt.symbolic(INVALID_INSID, &mut error, addr, nbytes, name);
        }
    });
}
