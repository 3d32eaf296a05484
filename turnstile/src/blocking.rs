/*
 * Copyright (c) Turnstile project developers.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The block/wakeup domain.
//!
//! Operations whose completion depends on an external party (a network
//! peer, a child process) cannot be serialized by turns without deadlock,
//! so they leave the deterministic domain: detach from the run queue and
//! pass the turn, perform the real call outside any turn, then request
//! re-insertion and log the completion under a freshly acquired turn.  No
//! wrapper ever holds the scheduler's internal lock across the real call.
//!
//! Regular files are exempt: their ordering is not part of the determinism
//! contract, and `fstat` distinguishes them from sockets and fifos.

use std::os::unix::io::RawFd;

use turnstile_model::record::InsId;
use turnstile_model::record::SyncFlags;
use turnstile_model::syncop::SyncOp;

use crate::nondet;
use crate::runtime::Recorder;
use crate::scheduler::Scheduler;
use crate::util;

/// True when the descriptor is neither a socket nor a fifo, i.e. not an
/// inter-process communication endpoint.
pub(crate) fn is_regular_file(fd: RawFd) -> bool {
    match nix::sys::stat::fstat(fd) {
        Ok(st) => {
            let fmt = st.st_mode & libc::S_IFMT;
            fmt != libc::S_IFSOCK && fmt != libc::S_IFIFO
        }
        // An unstattable descriptor is left on the native path.
        Err(_) => true,
    }
}

impl<S: Scheduler> Recorder<S> {
    /// Run `f` outside the deterministic domain, then log its completion
    /// with the turn number obtained after re-entry.  `args` projects the
    /// result into the record's argument words.
    pub(crate) fn blocking_region<T>(
        &self,
        ins: InsId,
        op: SyncOp,
        f: impl FnOnce() -> T,
        args: impl FnOnce(&T) -> [u64; 2],
    ) -> T {
        self.bump(|s| s.blocking_ops += 1);
        if self.cfg().enforce_non_det_annotations && nondet::in_non_det() {
            return f();
        }
        self.sched().get_turn();
        self.sched().block();

        let ret = f();

        let saved = util::errno();
        self.sched().wakeup();
        self.sched().get_turn();
        let turn = self.sched().inc_turn();
        self.log(ins, op, turn, SyncFlags::AFTER, args(&ret));
        self.sched().put_turn(false);
        util::set_errno(saved);
        ret
    }
}
