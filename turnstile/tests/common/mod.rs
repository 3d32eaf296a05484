/*
 * Copyright (c) Turnstile project developers.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Helpers shared by the integration tests: building runtimes against a
//! scratch log directory, driving threads through the runtime's own
//! creation protocol, and decoding the per-thread logs back.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::ptr;
use std::sync::Arc;

use libc::c_void;

use turnstile::Config;
use turnstile::RecordRuntime;
use turnstile::Recorder;
use turnstile::scheduler::RawThread;
use turnstile::SchedulerKind;
use turnstile::Serializer;
use turnstile::StartRoutine;
use turnstile::SyncRec;
use turnstile::TurnQueue;
use turnstile::INVALID_INSID;
use turnstile_model::record::RECORD_SIZE;

/// Build a runtime logging into `dir`, tweaked by `f`, and attach the
/// calling thread as its main thread.
pub fn runtime_with(dir: &Path, f: impl FnOnce(&mut Config)) -> Arc<dyn RecordRuntime> {
    let mut cfg = Config::default();
    cfg.output_dir = dir.to_path_buf();
    f(&mut cfg);
    let rt: Arc<dyn RecordRuntime> = match cfg.scheduler {
        SchedulerKind::RoundRobin => Recorder::new(TurnQueue::new(), cfg),
        SchedulerKind::Serializer => Recorder::new(Serializer::new(), cfg),
    };
    rt.prog_begin();
    rt
}

/// Spawn a thread through the runtime's deterministic creation protocol.
pub fn spawn(rt: &dyn RecordRuntime, start: StartRoutine, arg: *mut c_void) -> RawThread {
    let mut th: RawThread = 0;
    let mut error = 0;
    let ret = rt.thread_create(INVALID_INSID, &mut error, &mut th, ptr::null(), start, arg);
    assert_eq!(ret, 0);
    th
}

/// Join a thread through the runtime.
pub fn join(rt: &dyn RecordRuntime, th: RawThread) {
    let mut error = 0;
    let ret = rt.thread_join(INVALID_INSID, &mut error, th, ptr::null_mut());
    assert_eq!(ret, 0);
}

/// Decode every per-thread log in `dir`, keyed by logical thread id.
pub fn read_logs(dir: &Path) -> BTreeMap<u32, Vec<SyncRec>> {
    let mut logs = BTreeMap::new();
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        let name = path.file_name().unwrap().to_str().unwrap().to_owned();
        let ltid: u32 = name
            .strip_prefix("tid-")
            .and_then(|s| s.strip_suffix(".bin"))
            .and_then(|s| s.rsplit('-').next())
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| panic!("unexpected log file name {:?}", name));
        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len() % RECORD_SIZE, 0, "truncated log {:?}", name);
        let recs = bytes
            .chunks_exact(RECORD_SIZE)
            .filter_map(|c| SyncRec::decode(c.try_into().unwrap()))
            .collect();
        logs.insert(ltid, recs);
    }
    logs
}

/// All records of all threads, ordered by turn.
pub fn merged_by_turn(logs: &BTreeMap<u32, Vec<SyncRec>>) -> Vec<(u32, SyncRec)> {
    let mut all: Vec<(u32, SyncRec)> = logs
        .iter()
        .flat_map(|(ltid, recs)| recs.iter().map(|r| (*ltid, *r)))
        .collect();
    all.sort_by_key(|(ltid, r)| (r.turn, *ltid));
    all
}

/// The global turn numbers must be exactly 1..=N with no gaps, and each
/// thread's own sequence must be strictly increasing.
pub fn assert_gapless(logs: &BTreeMap<u32, Vec<SyncRec>>) {
    for (ltid, recs) in logs {
        for pair in recs.windows(2) {
            assert!(
                pair[0].turn < pair[1].turn,
                "thread {} log is not strictly increasing: {} then {}",
                ltid,
                pair[0].turn,
                pair[1].turn
            );
        }
    }
    let mut turns: Vec<u64> = logs
        .values()
        .flat_map(|recs| recs.iter().map(|r| r.turn))
        .collect();
    turns.sort_unstable();
    for (i, t) in turns.iter().enumerate() {
        assert_eq!(
            *t,
            i as u64 + 1,
            "turn numbers have a gap or duplicate at position {}",
            i
        );
    }
}
