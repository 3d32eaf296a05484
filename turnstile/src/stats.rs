/*
 * Copyright (c) Turnstile project developers.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Per-category runtime event counters, kept only when
//! `record_runtime_stat` is set.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Event counts by category.  Mutated while holding the turn, so printing
/// under the turn yields a deterministic snapshot.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RuntimeStats {
    /// Deterministic wrapper operations (idle-thread turns excluded).
    pub det_sync_ops: u64,
    /// Operations routed through the blocking domain.
    pub blocking_ops: u64,
    /// Sync operations short-circuited inside non-det regions.
    pub non_det_sync_ops: u64,
    /// Non-det regions entered.
    pub non_det_regions: u64,
    /// Lineups released by full assembly.
    pub lineup_full: u64,
    /// Lineups released by logical-time timeout.
    pub lineup_timeout: u64,
}

impl fmt::Display for RuntimeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "deterministic sync ops: {}", self.det_sync_ops)?;
        writeln!(f, "blocking-domain ops:    {}", self.blocking_ops)?;
        writeln!(f, "non-det sync ops:       {}", self.non_det_sync_ops)?;
        writeln!(f, "non-det regions:        {}", self.non_det_regions)?;
        writeln!(f, "lineups (full):         {}", self.lineup_full)?;
        write!(f, "lineups (timeout):      {}", self.lineup_timeout)
    }
}
