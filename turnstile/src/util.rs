/*
 * Copyright (c) Turnstile project developers.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Small shared utilities: errno plumbing and the counting semaphore used
//! by the thread-creation handshake.

use std::sync::Condvar;
use std::sync::Mutex;

use nix::errno::Errno;

/// Read the calling thread's errno.
pub(crate) fn errno() -> i32 {
    Errno::last() as i32
}

/// Overwrite the calling thread's errno.  Scheduler internals clobber it,
/// so every wrapper restores the application's value across turn
/// transitions.
pub(crate) fn set_errno(v: i32) {
    unsafe { *libc::__errno_location() = v }
}

/// A counting semaphore.  Used for the two-phase creation handshake, where
/// posts from different creators must not be consumed by the wrong child.
#[derive(Debug, Default)]
pub(crate) struct Sem {
    count: Mutex<u32>,
    cv: Condvar,
}

impl Sem {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn post(&self) {
        let mut n = self.count.lock().unwrap();
        *n += 1;
        self.cv.notify_one();
    }

    pub(crate) fn wait(&self) {
        let mut n = self.count.lock().unwrap();
        while *n == 0 {
            n = self.cv.wait(n).unwrap();
        }
        *n -= 1;
    }

    /// Discard any pending posts; a fork child must not consume a post that
    /// belonged to the parent.
    pub(crate) fn reset(&self) {
        let mut n = self.count.lock().unwrap();
        *n = 0;
    }
}
