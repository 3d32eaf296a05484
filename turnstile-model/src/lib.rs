/*
 * Copyright (c) Turnstile project developers.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Widely-shared type definitions for the turnstile runtime: configuration,
//! logical thread ids, turn arithmetic, sync opcodes, and the on-disk log
//! record layout.

pub mod config;
pub mod record;
pub mod syncop;
pub mod tid;
pub mod time;

pub use config::Config;
pub use config::SchedulerKind;
pub use record::InsId;
pub use record::SyncRec;
pub use record::INVALID_INSID;
pub use syncop::SyncOp;
pub use tid::Ltid;
pub use time::TurnCount;

#[macro_use]
extern crate bitflags;
