/*
 * Copyright (c) Turnstile project developers.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Logical thread identity.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

/// A dense logical thread id, assigned by the creating thread while it holds
/// the turn.  Stable for the life of the thread and reused for log file
/// naming, so the ordering of values is meaningful.
#[derive(
    PartialEq, // Silly protection from rustfmt disagreements.
    Debug,
    Eq,
    Clone,
    Copy,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Default,
)]
pub struct Ltid(u32);

impl Ltid {
    /// The reserved id of the first (main) thread of the process.
    pub const MAIN: Ltid = Ltid(0);

    /// Sentinel for a thread that has not yet been bound to a logical id.
    pub const INVALID: Ltid = Ltid(u32::MAX);

    /// Create an `Ltid` from a raw integer.
    pub const fn from_raw(raw: u32) -> Ltid {
        Ltid(raw)
    }

    /// Convert to the raw integer.
    pub fn as_raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Ltid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for Ltid {
    type Err = <u32 as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_raw(s.parse::<u32>()?))
    }
}
