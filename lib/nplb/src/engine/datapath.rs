// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! What a datapath program sees and what it may decide.

use super::maps::Maps;
use super::packet::ReadErr;
use super::packet::WriteError;
use crate::ExecCtx;
use crate::provider::LogLevel;
use core::fmt;
use core::fmt::Display;
use nplb_api::NodeportCfg;

/// Accept the packet and continue as normal.
pub const CTX_ACT_OK: u32 = 0;
/// Drop the packet.
pub const CTX_ACT_DROP: u32 = 2;
/// Transmit the packet out of another (or the same) interface.
pub const CTX_ACT_REDIRECT: u32 = 7;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DropReason {
    /// The service has no usable backend and replying is disabled.
    NoService,
}

impl Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NoService => write!(f, "no service"),
        }
    }
}

/// The terminal disposition of a packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    Ok,
    Drop(DropReason),
    Redirect { ifindex: u32 },
}

impl Verdict {
    /// The numeric action code of this verdict.
    pub fn code(&self) -> u32 {
        match self {
            Self::Ok => CTX_ACT_OK,
            Self::Drop(_) => CTX_ACT_DROP,
            Self::Redirect { .. } => CTX_ACT_REDIRECT,
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Drop(reason) => write!(f, "DROP ({reason})"),
            Self::Redirect { ifindex } => write!(f, "REDIRECT ({ifindex})"),
        }
    }
}

/// A program could not finish processing a packet.
///
/// These are fatal: the packet is abandoned with no verdict.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessError {
    /// A header did not fit in the frame.
    OutOfBounds { hdr: &'static str, err: ReadErr },
    /// The frame could not be reshaped.
    WriteFailed { what: &'static str, err: WriteError },
}

impl Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::OutOfBounds { hdr, err } => {
                write!(f, "{hdr} header out of bounds: {err}")
            }
            Self::WriteFailed { what, err } => {
                write!(f, "failed to write {what}: {err}")
            }
        }
    }
}

/// Everything a program may consult while processing a packet.
pub struct Datapath<'a> {
    pub cfg: &'a NodeportCfg,
    pub maps: &'a Maps,
    pub ectx: &'a ExecCtx,
}

impl<'a> Datapath<'a> {
    pub fn new(
        cfg: &'a NodeportCfg,
        maps: &'a Maps,
        ectx: &'a ExecCtx,
    ) -> Self {
        Self { cfg, maps, ectx }
    }

    pub fn log(&self, level: LogLevel, msg: &str) {
        self.ectx.log.log(level, msg);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn verdict_codes() {
        assert_eq!(Verdict::Ok.code(), 0);
        assert_eq!(Verdict::Drop(DropReason::NoService).code(), 2);
        assert_eq!(Verdict::Redirect { ifindex: 1 }.code(), 7);
    }
}
