/*
 * Copyright (c) Turnstile project developers.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Runtime configuration.

use std::ffi::OsString;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use serde::Deserialize;
use serde::Serialize;

/// Configuration options for the turnstile runtime.
#[derive(Debug, Serialize, Deserialize, Clone, Parser)]
pub struct Config {
    /// Disable deterministic multithreading entirely.  With this set every
    /// wrapper becomes a passthrough to the native primitive.
    #[clap(long = "no-dmt", parse(from_flag = std::ops::Not::not))]
    pub dmt: bool,

    /// Disable the per-thread synchronization event log.
    #[clap(long = "no-log-sync", parse(from_flag = std::ops::Not::not))]
    pub log_sync: bool,

    /// Count per-category runtime events and print them at program end.
    #[clap(long)]
    pub record_runtime_stat: bool,

    /// Disable the application annotation hooks (lineup, base time).
    #[clap(long = "no-enforce-annotations", parse(from_flag = std::ops::Not::not))]
    pub enforce_annotations: bool,

    /// Honor explicitly-nondeterministic region annotations.
    #[clap(long)]
    pub enforce_non_det_annotations: bool,

    /// Disable the regular-file bypass, forcing reads and writes of regular
    /// files through the blocking domain.  Leaving the bypass on is the
    /// normal configuration; regular-file I/O is not serialized by turns.
    #[clap(long = "no-ignore-regular-file-io", parse(from_flag = std::ops::Not::not))]
    pub ignore_regular_file_io: bool,

    /// Spawn the internal idle thread that advances the logical clock when
    /// every application thread is blocked externally.  Required for any
    /// physical-to-logical deadline conversion.
    #[clap(long)]
    pub launch_idle_thread: bool,

    /// Nanoseconds of physical time represented by one turn when converting
    /// timed-wait deadlines to logical time.
    #[clap(
        long,
        env = "TURNSTILE_NANOSEC_PER_TURN",
        default_value = "1000",
        value_name = "uint64"
    )]
    pub nanosec_per_turn: u64,

    /// After a deterministic turn-wait standing in for a sleep, also perform
    /// the real sleep.
    #[clap(long)]
    pub exec_sleep: bool,

    /// Directory receiving the per-thread log files.
    #[clap(
        long,
        env = "TURNSTILE_OUTPUT_DIR",
        default_value = ".",
        value_name = "path"
    )]
    pub output_dir: PathBuf,

    /// Which scheduler policy to run the record runtime against.
    #[clap(long, default_value = "round-robin", value_name = "str")]
    pub scheduler: SchedulerKind,
}

impl Config {
    /// Sanity check the flags, and update any wherever flag B is implied by A.
    pub fn validate(&mut self) {
        if !self.dmt {
            tracing::warn!(
                "deterministic multithreading is off; every wrapper is a passthrough"
            );
        }
        if !self.ignore_regular_file_io {
            tracing::warn!(
                "regular-file reads and writes will go through the blocking domain; \
                 their ordering is nondeterministic"
            );
        }
        if self.enforce_non_det_annotations && !self.enforce_annotations {
            self.enforce_annotations = true;
        }
        if self.nanosec_per_turn == 0 {
            tracing::warn!("nanosec_per_turn of 0 is meaningless; using 1");
            self.nanosec_per_turn = 1;
        }
    }

    /// Construct the config using environment variables only, not CLI args.
    pub fn from_env() -> Self {
        let args: [OsString; 1] = [OsString::from("turnstile")];
        let mut cfg = Config::parse_from(args.iter());
        cfg.validate();
        cfg
    }
}

/// N.B. we don't want to specify two different notions of "default", so we
/// use the `Clap` instance above.
impl Default for Config {
    fn default() -> Self {
        let v: Vec<String> = vec![String::from("turnstile")];
        Config::parse_from(v.iter())
    }
}

/// Selects which scheduler implementation the record runtime is built on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SchedulerKind {
    /// The turn-based round-robin scheduler.  Produces a replayable
    /// schedule.
    RoundRobin,
    /// A first-come-first-served serializer that does not enforce fairness;
    /// it only preserves log faithfulness, not a replayable schedule.
    Serializer,
}

impl Default for SchedulerKind {
    fn default() -> Self {
        SchedulerKind::RoundRobin
    }
}

// Lame to not derive this, but even `derive_more` won't do enums.
impl FromStr for SchedulerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "round-robin" | "roundrobin" => Ok(SchedulerKind::RoundRobin),
            "serializer" | "fcfs" => Ok(SchedulerKind::Serializer),
            _ => Err(format!(
                "Expected round-robin|serializer, could not parse: {:?}",
                s
            )),
        }
    }
}
