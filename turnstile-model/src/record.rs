/*
 * Copyright (c) Turnstile project developers.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The on-disk log record layout.
//!
//! A log file is a packed stream of fixed-size 32-byte cells in host
//! endianness.  The first word of every cell packs a 29-bit instruction id
//! with a 3-bit record-kind tag.  Of the record kinds only `Sync` is
//! produced by this runtime; the rest are reserved for the instrumentation
//! collaborator that shares the format.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::syncop::SyncOp;
use crate::tid::Ltid;
use crate::time::TurnCount;

/// Size of one log cell in bytes.
pub const RECORD_SIZE: usize = 32;

/// Bits available for the instruction id in the header word.
pub const INSID_BITS: u32 = 29;

/// Bits available for the record-kind tag in the header word.
pub const REC_TYPE_BITS: u32 = 3;

/// Maximum inline argument words carried by a sync record.
pub const MAX_INLINE_ARGS: usize = 2;

/// Log files grow in trunks of this many bytes.
pub const TRUNK_SIZE: u64 = 1024 * 1024 * 1024;

/// An instruction id correlating a record with an instrumentation callsite.
pub type InsId = u32;

/// The reserved "no instruction" id; stored masked into [`INSID_BITS`] bits.
pub const INVALID_INSID: InsId = (1u32 << INSID_BITS) - 1;

const INSID_MASK: u32 = (1u32 << INSID_BITS) - 1;

/// The record-kind tag stored in the top bits of the header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum RecordKind {
    Insid = 0,
    Load = 1,
    Store = 2,
    Call = 3,
    ExtraArgs = 4,
    Return = 5,
    Sync = 6,
}

impl RecordKind {
    fn from_u8(v: u8) -> Option<RecordKind> {
        use RecordKind::*;
        Some(match v {
            0 => Insid,
            1 => Load,
            2 => Store,
            3 => Call,
            4 => ExtraArgs,
            5 => Return,
            6 => Sync,
            _ => return None,
        })
    }
}

bitflags! {
    /// Marker bits of a sync record.
    #[derive(Serialize, Deserialize)]
    pub struct SyncFlags: u8 {
        /// Set on the record logged *after* the semantic action (the
        /// acquired half of a two-half wait, or the sole record of a
        /// one-record operation).  Clear on the released half.
        const AFTER = 0b0000_0001;
        /// The wait was released by its deadline rather than a signal.
        const TIMED_OUT = 0b0000_0010;
    }
}

/// One synchronization event: which operation, at which turn, with up to two
/// inline argument words (typically the address of the primitive and a
/// return value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRec {
    /// Instrumentation callsite id, or [`INVALID_INSID`].
    pub insid: InsId,
    /// The operation performed.
    pub op: SyncOp,
    /// Before/after and timed-out markers.
    pub flags: SyncFlags,
    /// The turn at which this event was committed.
    pub turn: TurnCount,
    /// Inline argument words.
    pub args: [u64; MAX_INLINE_ARGS],
}

impl SyncRec {
    /// Pack into one 32-byte cell (host endianness).
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        let header =
            (self.insid & INSID_MASK) | ((RecordKind::Sync as u32) << INSID_BITS);
        buf[0..4].copy_from_slice(&header.to_ne_bytes());
        buf[4..6].copy_from_slice(&self.op.as_u16().to_ne_bytes());
        buf[6] = self.flags.bits();
        // buf[7] is padding.
        buf[8..16].copy_from_slice(&self.turn.to_ne_bytes());
        buf[16..24].copy_from_slice(&self.args[0].to_ne_bytes());
        buf[24..32].copy_from_slice(&self.args[1].to_ne_bytes());
        buf
    }

    /// Decode one cell.  Returns `None` for non-sync records or unknown
    /// opcodes, which lets a reader skim past reserved record kinds.
    pub fn decode(buf: &[u8; RECORD_SIZE]) -> Option<SyncRec> {
        let header = u32::from_ne_bytes(buf[0..4].try_into().unwrap());
        let kind = RecordKind::from_u8((header >> INSID_BITS) as u8)?;
        if kind != RecordKind::Sync {
            return None;
        }
        let op = SyncOp::from_u16(u16::from_ne_bytes(buf[4..6].try_into().unwrap()))?;
        let flags = SyncFlags::from_bits_truncate(buf[6]);
        let turn = u64::from_ne_bytes(buf[8..16].try_into().unwrap());
        let args = [
            u64::from_ne_bytes(buf[16..24].try_into().unwrap()),
            u64::from_ne_bytes(buf[24..32].try_into().unwrap()),
        ];
        Some(SyncRec {
            insid: header & INSID_MASK,
            op,
            flags,
            turn,
            args,
        })
    }
}

/// The per-thread log file path: `<dir>/tid-<pid>-<ltid>.bin`.
pub fn log_file_path(dir: &Path, pid: u32, ltid: Ltid) -> PathBuf {
    dir.join(format!("tid-{}-{}.bin", pid, ltid))
}
