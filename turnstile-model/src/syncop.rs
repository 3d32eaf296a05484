/*
 * Copyright (c) Turnstile project developers.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Opcodes for every synchronization action the runtime records.

use serde::Deserialize;
use serde::Serialize;

/// One opcode per logged operation.  The numeric values are part of the log
/// format and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum SyncOp {
    ThreadBegin = 0,
    ThreadEnd = 1,
    ThreadCreate = 2,
    ThreadJoin = 3,

    MutexInit = 10,
    MutexDestroy = 11,
    MutexLock = 12,
    MutexTryLock = 13,
    MutexTimedLock = 14,
    MutexUnlock = 15,

    RwlockInit = 20,
    RwlockDestroy = 21,
    RwlockRdLock = 22,
    RwlockWrLock = 23,
    RwlockTryRdLock = 24,
    RwlockTryWrLock = 25,
    RwlockUnlock = 26,

    CondWait = 30,
    CondTimedWait = 31,
    CondSignal = 32,
    CondBroadcast = 33,

    BarrierInit = 40,
    BarrierWait = 41,
    BarrierDestroy = 42,

    SemInit = 50,
    SemWait = 51,
    SemTryWait = 52,
    SemTimedWait = 53,
    SemPost = 54,

    LineupInit = 60,
    LineupDestroy = 61,
    LineupStart = 62,
    LineupEnd = 63,

    NonDetStart = 70,
    NonDetEnd = 71,

    SchedYield = 80,
    Sleep = 81,
    Usleep = 82,
    Nanosleep = 83,

    Symbolic = 90,
    Idle = 91,
    Fork = 92,

    Accept = 100,
    Connect = 101,
    Send = 102,
    Recv = 103,
    Read = 104,
    Write = 105,
    Pread = 106,
    Pwrite = 107,
    Select = 108,
    Poll = 109,
    EpollWait = 110,
    Sigwait = 111,
    Waitpid = 112,
    Gethostbyname = 113,
    Fgets = 114,
    Wait = 115,
}

impl SyncOp {
    /// Recover an opcode from its wire value.
    pub fn from_u16(v: u16) -> Option<SyncOp> {
        use SyncOp::*;
        let op = match v {
            0 => ThreadBegin,
            1 => ThreadEnd,
            2 => ThreadCreate,
            3 => ThreadJoin,
            10 => MutexInit,
            11 => MutexDestroy,
            12 => MutexLock,
            13 => MutexTryLock,
            14 => MutexTimedLock,
            15 => MutexUnlock,
            20 => RwlockInit,
            21 => RwlockDestroy,
            22 => RwlockRdLock,
            23 => RwlockWrLock,
            24 => RwlockTryRdLock,
            25 => RwlockTryWrLock,
            26 => RwlockUnlock,
            30 => CondWait,
            31 => CondTimedWait,
            32 => CondSignal,
            33 => CondBroadcast,
            40 => BarrierInit,
            41 => BarrierWait,
            42 => BarrierDestroy,
            50 => SemInit,
            51 => SemWait,
            52 => SemTryWait,
            53 => SemTimedWait,
            54 => SemPost,
            60 => LineupInit,
            61 => LineupDestroy,
            62 => LineupStart,
            63 => LineupEnd,
            70 => NonDetStart,
            71 => NonDetEnd,
            80 => SchedYield,
            81 => Sleep,
            82 => Usleep,
            83 => Nanosleep,
            90 => Symbolic,
            91 => Idle,
            92 => Fork,
            100 => Accept,
            101 => Connect,
            102 => Send,
            103 => Recv,
            104 => Read,
            105 => Write,
            106 => Pread,
            107 => Pwrite,
            108 => Select,
            109 => Poll,
            110 => EpollWait,
            111 => Sigwait,
            112 => Waitpid,
            113 => Gethostbyname,
            114 => Fgets,
            115 => Wait,
            _ => return None,
        };
        Some(op)
    }

    /// The wire value of this opcode.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Waits with a released half and an acquired half log two records; all
    /// other operations log one.
    pub fn record_halves(self) -> u8 {
        match self {
            SyncOp::CondWait | SyncOp::CondTimedWait | SyncOp::BarrierWait => 2,
            _ => 1,
        }
    }
}
