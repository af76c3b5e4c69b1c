// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! nplb administration library

use nplb::ExecCtx;
use nplb::api::FixtureCfg;
use nplb::api::Protocol;
use nplb::api::SocketAddrV4;
use nplb::engine::CtxBuff;
use nplb::engine::Datapath;
use nplb::engine::Maps;
use nplb::engine::TailCallTable;
use nplb::engine::Verdict;
use nplb::engine::maps::MapError;
use nplb::engine::tail_call::DispatchError;
use nplb::engine::tail_call::DispatchOutcome;
use nplb::engine::tail_call::FROM_NETDEV;
use nplb::engine::tail_call::TO_NETDEV;
use nplb::engine::tcp::TcpFlags;
use nplb::provider::LogLevel;
use nplb::provider::LogProvider;
use nplb_test_utils::BuildError;
use nplb_test_utils::CLIENT_MAC;
use nplb_test_utils::DEFAULT_DATA;
use nplb_test_utils::PktGen;
use nplb_test_utils::SYN_SEQ;
use slog::Drain;
use slog::Logger;
use std::path::Path;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("bad fixture: {0}")]
    Fixture(MapError),

    #[error("failed to build probe: {0}")]
    Build(#[from] BuildError),

    #[error("dispatch failed: {0}")]
    Dispatch(DispatchError),
}

/// Build the terminal logger. Notes are only shown when `verbose`.
pub fn logger(verbose: bool) -> Logger {
    let level = if verbose { slog::Level::Info } else { slog::Level::Warning };
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain =
        slog_async::Async::new(drain).build().filter_level(level).fuse();
    Logger::root(drain, slog::o!("component" => "nplb"))
}

/// A [`LogProvider`] which forwards to slog.
pub struct SlogLog {
    log: Logger,
}

impl SlogLog {
    pub fn new(log: Logger) -> Self {
        Self { log }
    }
}

impl LogProvider for SlogLog {
    fn log(&self, level: LogLevel, msg: &str) {
        match level {
            LogLevel::Note => slog::info!(self.log, "{}", msg),
            LogLevel::Warn => slog::warn!(self.log, "{}", msg),
            LogLevel::Error => slog::error!(self.log, "{}", msg),
        }
    }
}

pub fn ectx(log: &Logger) -> ExecCtx {
    ExecCtx { log: Box::new(SlogLog::new(log.clone())) }
}

/// Read a fixture file.
pub fn load_fixture(path: &Path) -> Result<FixtureCfg, Error> {
    let text = std::fs::read_to_string(path)
        .map_err(|source| Error::Read { path: path.to_path_buf(), source })?;
    toml::from_str(&text)
        .map_err(|source| Error::Parse { path: path.to_path_buf(), source })
}

/// Load a fixture into a fresh set of tables.
pub fn build_maps(fixture: &FixtureCfg) -> Result<Maps, Error> {
    let mut maps = Maps::new();
    maps.apply_fixture(fixture).map_err(Error::Fixture)?;
    Ok(maps)
}

/// What happened to a probe.
pub struct Probe {
    /// The frame sent.
    pub request: Vec<u8>,
    /// The ingress dispatch.
    pub ingress: DispatchOutcome,
    /// The egress dispatch of the frame ingress redirected, if it
    /// did.
    pub egress: Option<DispatchOutcome>,
    /// The frame as it was left by the last dispatch.
    pub result: CtxBuff,
}

/// Send a single request from `src` to `dst` through the datapath
/// configured by `fixture`. TCP requests are SYNs.
pub fn probe(
    fixture: &FixtureCfg,
    src: SocketAddrV4,
    dst: SocketAddrV4,
    proto: Protocol,
    ectx: &ExecCtx,
) -> Result<Probe, Error> {
    let cfg = &fixture.nodeport;
    let maps = build_maps(fixture)?;

    let mut pkt = PktGen::new(CtxBuff::new(cfg.ifindex));
    if proto == Protocol::UDP {
        pkt.push_ipv4_udp_packet(
            CLIENT_MAC, cfg.lb_mac, src.ip, dst.ip, src.port, dst.port,
        )?;
    } else {
        let tcp = pkt.push_ipv4_tcp_packet(
            CLIENT_MAC, cfg.lb_mac, src.ip, dst.ip, src.port, dst.port,
        )?;
        tcp.seq.set(SYN_SEQ);
        tcp.set_flags(TcpFlags::SYN);
        tcp.win.set(u16::MAX);
    }
    pkt.push_data(DEFAULT_DATA)?;
    let mut ctx = pkt.finish()?;
    let request = ctx.bytes().to_vec();

    let tbl = TailCallTable::nodeport();
    let dp = Datapath::new(cfg, &maps, ectx);
    let ingress =
        tbl.dispatch(&mut ctx, FROM_NETDEV, &dp).map_err(Error::Dispatch)?;

    let egress = match ingress.verdict {
        Verdict::Redirect { .. } => Some(
            tbl.dispatch(&mut ctx, TO_NETDEV, &dp)
                .map_err(Error::Dispatch)?,
        ),
        _ => None,
    };

    Ok(Probe { request, ingress, egress, result: ctx })
}
