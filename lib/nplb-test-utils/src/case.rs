// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Test cases and the runner which drives them.
//!
//! A [`TestCase`] is three steps, always run in this order:
//!
//! 1. `pktgen` builds the input frame.
//!
//! 2. `setup` seeds the tables and names the stage(s) to dispatch
//!    the frame into, via [`SetupCtx::tail_call`]. The runner then
//!    dispatches: the frame produced by one stage is the input of
//!    the next.
//!
//! 3. `check` inspects the observed buffer: the final verdict code
//!    followed by the frame.
//!
//! Every case gets fresh tables. A failing case is recorded and the
//! runner moves on to the next one.

use crate::pcap::PcapBuilder;
use crate::pktgen::BuildError;
use crate::pktgen::PktGen;
use crate::validate::TestError;
use nplb::ExecCtx;
use nplb::api::NodeportCfg;
use nplb::engine::CtxBuff;
use nplb::engine::Datapath;
use nplb::engine::Maps;
use nplb::engine::TailCallTable;
use nplb::engine::Verdict;
use nplb::engine::tail_call::DispatchError;
use nplb::engine::tail_call::DispatchOutcome;
use nplb::engine::tail_call::Trail;
use nplb::provider::LogLevel;
use std::io::Write;
use tabwriter::TabWriter;

pub type PktGenFn = fn(&mut PktGen) -> Result<(), BuildError>;
pub type SetupFn = fn(&mut SetupCtx<'_>) -> Result<TailCall, TestError>;
pub type CheckFn = fn(&CheckCtx<'_>) -> Result<(), TestError>;

#[derive(Clone, Copy)]
pub struct TestCase {
    pub name: &'static str,
    pub pktgen: PktGenFn,
    pub setup: SetupFn,
    pub check: CheckFn,
}

/// The stages a case's frame is to be dispatched into, in order.
///
/// Only [`SetupCtx::tail_call`] makes one, so a setup routine can
/// only succeed by naming where its frame goes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TailCall {
    stages: Vec<u32>,
}

impl TailCall {
    /// Feed the frame produced by the previous stage into `idx`.
    pub fn then(mut self, idx: u32) -> Self {
        self.stages.push(idx);
        self
    }

    pub fn stages(&self) -> &[u32] {
        &self.stages
    }
}

pub struct SetupCtx<'a> {
    pub maps: &'a mut Maps,
    pub cfg: &'a mut NodeportCfg,
}

impl SetupCtx<'_> {
    pub fn tail_call(&self, idx: u32) -> TailCall {
        TailCall { stages: vec![idx] }
    }
}

pub struct CheckCtx<'a> {
    /// The verdict code followed by the final frame.
    pub buf: &'a [u8],
    /// The frame `pktgen` built.
    pub input: &'a [u8],
    /// The outcome of the last dispatch.
    pub outcome: &'a DispatchOutcome,
    pub maps: &'a Maps,
}

#[derive(Clone, Debug)]
pub struct CaseResult {
    pub name: &'static str,
    pub verdict: Option<Verdict>,
    pub trail: Option<Trail>,
    pub result: Result<(), TestError>,
}

impl CaseResult {
    pub fn passed(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs test cases against the nodeport programs.
pub struct Runner {
    cfg: NodeportCfg,
    tbl: TailCallTable,
    ectx: ExecCtx,
    pcap: Option<PcapBuilder>,
}

impl Runner {
    pub fn new(ectx: ExecCtx) -> Self {
        Self {
            cfg: NodeportCfg::default(),
            tbl: TailCallTable::nodeport(),
            ectx,
            pcap: None,
        }
    }

    /// Start every case from `cfg` instead of the default.
    pub fn with_cfg(mut self, cfg: NodeportCfg) -> Self {
        self.cfg = cfg;
        self
    }

    /// Record the generated and final frame of every case.
    pub fn with_pcap(mut self, pcap: PcapBuilder) -> Self {
        self.pcap = Some(pcap);
        self
    }

    pub fn run_all(&mut self, cases: &[TestCase]) -> Vec<CaseResult> {
        cases.iter().map(|case| self.run_case(case)).collect()
    }

    pub fn run_case(&mut self, case: &TestCase) -> CaseResult {
        let mut verdict = None;
        let mut trail = None;
        let result = self.drive(case, &mut verdict, &mut trail);
        CaseResult { name: case.name, verdict, trail, result }
    }

    fn capture(&mut self, frame: &[u8]) {
        if let Some(pcap) = &mut self.pcap {
            if let Err(e) = pcap.add_pkt(frame) {
                self.ectx
                    .log
                    .log(LogLevel::Warn, &format!("pcap write failed: {e}"));
            }
        }
    }

    fn drive(
        &mut self,
        case: &TestCase,
        verdict: &mut Option<Verdict>,
        trail: &mut Option<Trail>,
    ) -> Result<(), TestError> {
        let mut cfg = self.cfg.clone();
        let mut maps = Maps::new();

        let mut pkt = PktGen::new(CtxBuff::new(cfg.ifindex));
        (case.pktgen)(&mut pkt)?;
        let mut ctx = pkt.finish()?;
        let input = ctx.bytes().to_vec();
        self.capture(&input);

        let tc = {
            let mut sctx = SetupCtx { maps: &mut maps, cfg: &mut cfg };
            (case.setup)(&mut sctx)?
        };
        ctx.set_ifindex(cfg.ifindex);

        let dp = Datapath::new(&cfg, &maps, &self.ectx);
        let mut last = None;
        for &idx in tc.stages() {
            let out = self.tbl.dispatch(&mut ctx, idx, &dp).map_err(|e| {
                match e {
                    DispatchError::NotRegistered { idx } => {
                        TestError::FellThrough { idx }
                    }
                    DispatchError::Process { err, .. } => {
                        TestError::Process(err)
                    }
                    e => TestError::Dispatch(e),
                }
            })?;
            *verdict = Some(out.verdict);
            *trail = Some(out.trail.clone());

            let stop = matches!(out.verdict, Verdict::Drop(_));
            last = Some(out);
            if stop {
                break;
            }
        }

        let Some(outcome) = last else {
            return Err(TestError::FellThrough { idx: u32::MAX });
        };

        self.capture(ctx.bytes());

        let buf = ctx.to_status_frame(outcome.verdict.code());
        (case.check)(&CheckCtx {
            buf: &buf,
            input: &input,
            outcome: &outcome,
            maps: &maps,
        })
    }
}

/// Print one line per case result.
pub fn print_results_into(
    writer: &mut impl Write,
    results: &[CaseResult],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "CASE\tVERDICT\tTRAIL\tRESULT")?;
    for res in results {
        let verdict = match &res.verdict {
            Some(v) => v.to_string(),
            None => String::from("-"),
        };
        let trail = match &res.trail {
            Some(t) => t
                .iter()
                .map(|idx| idx.to_string())
                .collect::<Vec<_>>()
                .join(" -> "),
            None => String::from("-"),
        };
        let result = match &res.result {
            Ok(()) => String::from("PASS"),
            Err(e) => format!("FAIL: {e}"),
        };
        writeln!(t, "{}\t{verdict}\t{trail}\t{result}", res.name)?;
    }
    t.flush()
}
