/*
 * Copyright (c) Turnstile project developers.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Per-thread synchronization event logs.
//!
//! Each thread appends packed 32-byte records to its own file,
//! `<output_dir>/tid-<pid>-<ltid>.bin`.  Writes are buffered; buffers are
//! flushed when a thread ends, before a fork, and whenever a trunk boundary
//! is crossed.  Log I/O failure is fatal: a runtime that silently drops
//! records would defeat the point of recording.

use std::cell::RefCell;
use std::fs;
use std::fs::File;
use std::io::BufWriter;
use std::io::Write;
use std::path::PathBuf;

use turnstile_model::record::log_file_path;
use turnstile_model::record::SyncRec;
use turnstile_model::record::RECORD_SIZE;
use turnstile_model::record::TRUNK_SIZE;
use turnstile_model::tid::Ltid;

thread_local! {
    static THREAD_LOG: RefCell<Option<ThreadLog>> = RefCell::new(None);
}

#[derive(Debug)]
struct ThreadLog {
    out: BufWriter<File>,
    written: u64,
}

/// Owns the output directory and hands each thread its own buffered
/// writer through thread-local storage.
#[derive(Debug)]
pub(crate) struct LogManager {
    dir: PathBuf,
    enabled: bool,
}

impl LogManager {
    pub(crate) fn new(dir: PathBuf, enabled: bool) -> Self {
        if enabled {
            fs::create_dir_all(&dir)
                .unwrap_or_else(|e| panic!("cannot create log directory {:?}: {}", dir, e));
        }
        LogManager { dir, enabled }
    }

    fn open(&self, ltid: Ltid) -> ThreadLog {
        let path = log_file_path(&self.dir, std::process::id(), ltid);
        let file = File::create(&path)
            .unwrap_or_else(|e| panic!("cannot create log file {:?}: {}", path, e));
        ThreadLog {
            out: BufWriter::new(file),
            written: 0,
        }
    }

    /// Append one record to the calling thread's log, opening it lazily.
    pub(crate) fn log(&self, ltid: Ltid, rec: SyncRec) {
        if !self.enabled {
            return;
        }
        THREAD_LOG.with(|slot| {
            let mut slot = slot.borrow_mut();
            let tl = slot.get_or_insert_with(|| self.open(ltid));
            tl.out
                .write_all(&rec.encode())
                .expect("log write failed");
            let before = tl.written / TRUNK_SIZE;
            tl.written += RECORD_SIZE as u64;
            if tl.written / TRUNK_SIZE != before {
                tl.out.flush().expect("log flush failed");
            }
        });
    }

    /// Flush and close the calling thread's log.
    pub(crate) fn thread_end(&self) {
        THREAD_LOG.with(|slot| {
            if let Some(mut tl) = slot.borrow_mut().take() {
                tl.out.flush().expect("log flush failed");
            }
        });
    }

    /// Flush the calling thread's buffer without closing, so a fork child
    /// does not duplicate buffered records.
    pub(crate) fn flush_current(&self) {
        THREAD_LOG.with(|slot| {
            if let Some(tl) = slot.borrow_mut().as_mut() {
                tl.out.flush().expect("log flush failed");
            }
        });
    }

    /// In a fork child: drop the inherited writer and start a fresh file
    /// named with the child's pid.
    pub(crate) fn fork_child(&self, ltid: Ltid) {
        THREAD_LOG.with(|slot| {
            let mut slot = slot.borrow_mut();
            *slot = None;
            if self.enabled {
                *slot = Some(self.open(ltid));
            }
        });
    }
}
