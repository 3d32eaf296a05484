/*
 * Copyright (c) Turnstile project developers.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Logical time: turn counting and the physical-to-logical deadline
//! conversion used by every timed wait.
//!
//! Deadlines arrive from the application as absolute `timespec` values but
//! are enforced in *turns* of the scheduler.  The conversion divides the
//! relative interval by a configured nanoseconds-per-turn constant and then
//! clamps the result: the lower bound guarantees a deadline cannot fire
//! before every live thread has plausibly taken a turn, and the upper bound
//! caps wait-set housekeeping cost.

use serde::Deserialize;
use serde::Serialize;

/// The process-wide monotonically increasing turn counter value.  Advances
/// once per completed synchronization action, always by the turn holder.
pub type TurnCount = u64;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// The largest relative deadline, in turns, a timed wait may be given.
pub const MAX_RELATIVE_TURNS: u64 = 1_000_000;

/// A plain seconds/nanoseconds pair, independent of libc struct layout
/// differences across targets.
#[derive(
    Default, Debug, Clone, Copy, Serialize, Deserialize, Ord, PartialOrd, Eq, PartialEq, Hash,
)]
pub struct Timespec {
    /// Whole seconds.
    pub sec: i64,
    /// Nanoseconds, in `[0, 1e9)` once normalized.
    pub nsec: i64,
}

impl Timespec {
    /// The interval from `start` to `self`, normalized so the nanosecond
    /// part is non-negative.  An interval that would be negative collapses
    /// to zero.
    pub fn since(&self, start: Timespec) -> Timespec {
        let mut sec = self.sec - start.sec;
        let mut nsec = self.nsec - start.nsec;
        if nsec < 0 {
            sec -= 1;
            nsec += NANOS_PER_SEC;
        }
        if sec < 0 {
            return Timespec::default();
        }
        Timespec { sec, nsec }
    }

    /// Total nanoseconds, saturating at `u64::MAX`.
    pub fn as_nanos(&self) -> u64 {
        (self.sec as u64)
            .saturating_mul(NANOS_PER_SEC as u64)
            .saturating_add(self.nsec as u64)
    }

    /// Read the realtime clock.  Only used as the explicitly
    /// nondeterministic fallback when no base time was announced.
    pub fn now_realtime() -> Timespec {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // clock_gettime(CLOCK_REALTIME) cannot fail with a valid output pointer.
        unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
        Timespec::from(ts)
    }
}

impl From<libc::timespec> for Timespec {
    fn from(ts: libc::timespec) -> Self {
        Timespec {
            sec: ts.tv_sec as i64,
            nsec: ts.tv_nsec as i64,
        }
    }
}

impl From<libc::timeval> for Timespec {
    fn from(tv: libc::timeval) -> Self {
        Timespec {
            sec: tv.tv_sec as i64,
            nsec: (tv.tv_usec as i64) * 1000,
        }
    }
}

impl From<Timespec> for libc::timespec {
    fn from(ts: Timespec) -> libc::timespec {
        libc::timespec {
            tv_sec: ts.sec,
            tv_nsec: ts.nsec,
        }
    }
}

/// Convert a relative physical interval into a number of turns, clamped into
/// `[5 * nthreads + 1, MAX_RELATIVE_TURNS]`.
pub fn relative_turns(rel: Timespec, nanosec_per_turn: u64, nthreads: usize) -> u64 {
    debug_assert!(nanosec_per_turn > 0);
    let turns = rel.as_nanos() / nanosec_per_turn;
    let floor = 5 * nthreads as u64 + 1;
    turns.clamp(floor, MAX_RELATIVE_TURNS.max(floor))
}
