// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Program chaining.
//!
//! Programs never call one another. A program finishes with a
//! [`Transition`]: either a terminal [`Verdict`], or a request to
//! continue in the program registered at some index of the
//! [`TailCallTable`]. [`TailCallTable::dispatch`] is the driver loop
//! which follows those requests, handing the (possibly rewritten)
//! context from one program to the next until a verdict is reached.
//!
//! The chain is bounded by [`MAX_TAIL_CALLS`]. The ingress entry
//! point may only be entered by the driver, never by a tail call.

use super::datapath::Datapath;
use super::datapath::ProcessError;
use super::datapath::Verdict;
use super::nodeport::FromNetdev;
use super::nodeport::NoServiceV4;
use super::nodeport::ToNetdev;
use super::packet::CtxBuff;
use crate::provider::LogLevel;
use alloc::boxed::Box;
use core::fmt;
use core::fmt::Display;

/// Packets arriving from the network.
pub const FROM_NETDEV: u32 = 0;
/// Packets about to leave towards the network.
pub const TO_NETDEV: u32 = 1;
/// Reply to a request for a service without a usable backend.
pub const IPV4_NO_SERVICE: u32 = 2;

pub const MAX_PROGS: usize = 8;

/// The most programs a single dispatch may run, entry included.
pub const MAX_TAIL_CALLS: usize = 33;

/// The well-known stages of the nodeport datapath.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    FromNetdev,
    ToNetdev,
    NoServiceV4,
}

impl Stage {
    pub fn index(self) -> u32 {
        match self {
            Self::FromNetdev => FROM_NETDEV,
            Self::ToNetdev => TO_NETDEV,
            Self::NoServiceV4 => IPV4_NO_SERVICE,
        }
    }

    pub fn from_index(idx: u32) -> Option<Self> {
        match idx {
            FROM_NETDEV => Some(Self::FromNetdev),
            TO_NETDEV => Some(Self::ToNetdev),
            IPV4_NO_SERVICE => Some(Self::NoServiceV4),
            _ => None,
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::FromNetdev => write!(f, "from-netdev"),
            Self::ToNetdev => write!(f, "to-netdev"),
            Self::NoServiceV4 => write!(f, "no-service-v4"),
        }
    }
}

/// How a program finished with a packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Transition {
    Verdict(Verdict),
    TailCall(u32),
}

/// A datapath program.
pub trait Program: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(
        &self,
        ctx: &mut CtxBuff,
        dp: &Datapath,
    ) -> Result<Transition, ProcessError>;
}

/// The indices of the programs a dispatch ran, in order.
pub type Trail = heapless::Vec<u32, MAX_TAIL_CALLS>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DispatchOutcome {
    pub verdict: Verdict,
    pub trail: Trail,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RegisterError {
    OutOfRange { idx: u32 },
    Occupied { idx: u32, name: &'static str },
}

impl Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::OutOfRange { idx } => {
                write!(f, "index {idx} out of range (max {MAX_PROGS})")
            }
            Self::Occupied { idx, name } => {
                write!(f, "index {idx} already holds {name}")
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DispatchError {
    /// Nothing is registered at the index.
    NotRegistered { idx: u32 },
    /// The chain did not reach a verdict within [`MAX_TAIL_CALLS`].
    ChainTooLong,
    /// A program tail called the ingress entry point.
    Reentry { from: &'static str },
    /// A program failed.
    Process { prog: &'static str, err: ProcessError },
}

impl Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NotRegistered { idx } => {
                write!(f, "no program registered at index {idx}")
            }
            Self::ChainTooLong => {
                write!(f, "more than {MAX_TAIL_CALLS} programs in chain")
            }
            Self::Reentry { from } => {
                write!(f, "{from} tail called the ingress program")
            }
            Self::Process { prog, err } => write!(f, "{prog}: {err}"),
        }
    }
}

/// A fixed-size table of programs, indexed by stage.
pub struct TailCallTable {
    progs: [Option<Box<dyn Program>>; MAX_PROGS],
}

impl Default for TailCallTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TailCallTable {
    pub fn new() -> Self {
        Self { progs: core::array::from_fn(|_| None) }
    }

    /// The table with every nodeport program registered at its
    /// [`Stage`] index.
    pub fn nodeport() -> Self {
        let mut tbl = Self::new();
        for stage in [Stage::FromNetdev, Stage::ToNetdev, Stage::NoServiceV4]
        {
            let prog: Box<dyn Program> = match stage {
                Stage::FromNetdev => Box::new(FromNetdev),
                Stage::ToNetdev => Box::new(ToNetdev),
                Stage::NoServiceV4 => Box::new(NoServiceV4),
            };
            tbl.progs[stage.index() as usize] = Some(prog);
        }
        tbl
    }

    pub fn register(
        &mut self,
        idx: u32,
        prog: Box<dyn Program>,
    ) -> Result<(), RegisterError> {
        let slot = self
            .progs
            .get_mut(idx as usize)
            .ok_or(RegisterError::OutOfRange { idx })?;

        if let Some(cur) = slot {
            return Err(RegisterError::Occupied { idx, name: cur.name() });
        }

        *slot = Some(prog);
        Ok(())
    }

    pub fn get(&self, idx: u32) -> Option<&dyn Program> {
        self.progs.get(idx as usize)?.as_deref()
    }

    /// Run `ctx` through the program at `idx` and every program it
    /// tail calls, until one of them returns a verdict.
    pub fn dispatch(
        &self,
        ctx: &mut CtxBuff,
        idx: u32,
        dp: &Datapath,
    ) -> Result<DispatchOutcome, DispatchError> {
        let res = self.follow(ctx, idx, dp);
        if let Err(e) = &res {
            dp.log(LogLevel::Error, &format!("dispatch to {idx} failed: {e}"));
        }
        res
    }

    fn follow(
        &self,
        ctx: &mut CtxBuff,
        mut idx: u32,
        dp: &Datapath,
    ) -> Result<DispatchOutcome, DispatchError> {
        let mut trail = Trail::new();

        loop {
            let prog =
                self.get(idx).ok_or(DispatchError::NotRegistered { idx })?;
            trail.push(idx).map_err(|_| DispatchError::ChainTooLong)?;

            let next = prog.run(ctx, dp).map_err(|err| {
                DispatchError::Process { prog: prog.name(), err }
            })?;

            match next {
                Transition::Verdict(verdict) => {
                    return Ok(DispatchOutcome { verdict, trail });
                }

                Transition::TailCall(FROM_NETDEV) => {
                    return Err(DispatchError::Reentry { from: prog.name() });
                }

                Transition::TailCall(next_idx) => idx = next_idx,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ExecCtx;
    use crate::engine::maps::Maps;
    use crate::provider::PrintlnLog;
    use nplb_api::NodeportCfg;

    struct Fixed(Transition);

    impl Program for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn run(
            &self,
            _ctx: &mut CtxBuff,
            _dp: &Datapath,
        ) -> Result<Transition, ProcessError> {
            Ok(self.0)
        }
    }

    fn run(
        tbl: &TailCallTable,
        idx: u32,
    ) -> Result<DispatchOutcome, DispatchError> {
        let cfg = NodeportCfg::default();
        let maps = Maps::new();
        let ectx = ExecCtx { log: Box::new(PrintlnLog) };
        let dp = Datapath::new(&cfg, &maps, &ectx);
        let mut ctx = CtxBuff::new(1);
        tbl.dispatch(&mut ctx, idx, &dp)
    }

    #[test]
    fn register_rules() {
        let mut tbl = TailCallTable::nodeport();
        let prog = || Box::new(Fixed(Transition::TailCall(4)));
        assert_eq!(
            tbl.register(FROM_NETDEV, prog()),
            Err(RegisterError::Occupied { idx: 0, name: "from-netdev" })
        );
        assert_eq!(
            tbl.register(IPV4_NO_SERVICE, prog()),
            Err(RegisterError::Occupied { idx: 2, name: "no-service-v4" })
        );
        assert_eq!(
            tbl.register(MAX_PROGS as u32, prog()),
            Err(RegisterError::OutOfRange { idx: MAX_PROGS as u32 })
        );
        assert!(tbl.register(3, prog()).is_ok());
        assert_eq!(tbl.get(3).map(|p| p.name()), Some("fixed"));
    }

    #[test]
    fn stages_hold_their_programs() {
        let tbl = TailCallTable::nodeport();
        for stage in [Stage::FromNetdev, Stage::ToNetdev, Stage::NoServiceV4]
        {
            assert_eq!(Stage::from_index(stage.index()), Some(stage));
            let prog = tbl.get(stage.index()).map(|p| p.name());
            assert_eq!(prog, Some(stage.to_string().as_str()));
        }
        assert_eq!(Stage::from_index(3), None);
        assert!(tbl.get(3).is_none());
    }

    #[test]
    fn chain() {
        let mut tbl = TailCallTable::new();
        tbl.register(2, Box::new(Fixed(Transition::TailCall(3)))).unwrap();
        tbl.register(3, Box::new(Fixed(Transition::Verdict(Verdict::Ok))))
            .unwrap();

        let out = run(&tbl, 2).unwrap();
        assert_eq!(out.verdict, Verdict::Ok);
        assert_eq!(&out.trail[..], &[2, 3]);
    }

    #[test]
    fn not_registered() {
        let mut tbl = TailCallTable::new();
        assert_eq!(run(&tbl, 5), Err(DispatchError::NotRegistered { idx: 5 }));

        tbl.register(2, Box::new(Fixed(Transition::TailCall(4)))).unwrap();
        assert_eq!(run(&tbl, 2), Err(DispatchError::NotRegistered { idx: 4 }));
    }

    #[test]
    fn cycle_is_bounded() {
        let mut tbl = TailCallTable::new();
        tbl.register(2, Box::new(Fixed(Transition::TailCall(2)))).unwrap();
        assert_eq!(run(&tbl, 2), Err(DispatchError::ChainTooLong));
    }

    #[test]
    fn no_reentry() {
        let mut tbl = TailCallTable::new();
        tbl.register(
            FROM_NETDEV,
            Box::new(Fixed(Transition::Verdict(Verdict::Ok))),
        )
        .unwrap();
        tbl.register(
            TO_NETDEV,
            Box::new(Fixed(Transition::TailCall(FROM_NETDEV))),
        )
        .unwrap();
        assert_eq!(
            run(&tbl, TO_NETDEV),
            Err(DispatchError::Reentry { from: "fixed" })
        );
    }
}
