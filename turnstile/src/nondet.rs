/*
 * Copyright (c) Turnstile project developers.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Per-thread and process-wide state of explicitly non-deterministic
//! regions.
//!
//! While a thread is inside such a region every wrapper short-circuits to
//! the native primitive: no turn, no log.  Entry rendezvous and exit are
//! implemented in the runtime; this module owns the thread-local flag, the
//! waiting-to-enter counter, and the set of sync vars ever touched inside a
//! region.

use std::cell::Cell;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use crate::scheduler::Channel;

thread_local! {
    static IN_NON_DET: Cell<bool> = Cell::new(false);
}

/// Number of threads parked on the entry rendezvous.  Only touched while
/// holding the turn.
static WAITING_TO_ENTER: AtomicUsize = AtomicUsize::new(0);

/// Whether the calling thread is inside a non-det region.
pub fn in_non_det() -> bool {
    IN_NON_DET.with(|c| c.get())
}

pub(crate) fn set_in_non_det(v: bool) {
    IN_NON_DET.with(|c| c.set(v));
}

pub(crate) fn enter_pending() {
    WAITING_TO_ENTER.fetch_add(1, Ordering::SeqCst);
}

pub(crate) fn enter_done() {
    WAITING_TO_ENTER.fetch_sub(1, Ordering::SeqCst);
}

/// Record that a sync var was touched inside a non-det region.
///
/// The tagging side effect is deliberately a no-op for now: the tagged set
/// would only feed a warning on later deterministic access, and the
/// interface is kept so that wrappers already call it at every
/// short-circuit site.
pub(crate) fn add_non_det_var(var: Channel) {
    let _ = var;
}

/// Whether a sync var was ever touched inside a non-det region.  Pairs with
/// [`add_non_det_var`]; always false while tagging is a no-op.
#[allow(dead_code)]
pub(crate) fn is_non_det_var(var: Channel) -> bool {
    let _ = var;
    false
}
